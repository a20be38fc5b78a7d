// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use easel_render::RenderSize;
use std::time::{Duration, Instant};
use tracing::info;

/// What the renderer needs to know about the window, fed from winit events.
#[derive(Debug)]
pub struct WindowState {
    size: RenderSize,
    focused: bool,
    occluded: bool,
    unfocused_fps: u32,
    next_frame_deadline: Option<Instant>,
}

impl WindowState {
    pub fn new(size: RenderSize, unfocused_fps: u32) -> Self {
        Self {
            size,
            focused: true,
            occluded: false,
            unfocused_fps,
            next_frame_deadline: None,
        }
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn focused(&self) -> bool {
        self.focused
    }

    /// Nothing should be rendered while minimized or hidden.
    pub fn paused(&self) -> bool {
        self.occluded || self.size.is_empty()
    }

    /// Returns true when the paused state flipped.
    pub fn on_resized(&mut self, size: RenderSize) -> bool {
        let was = self.paused();
        self.size = size;
        let now = self.paused();
        if was != now {
            info!("resized → {}x{} (paused={})", size.width, size.height, now);
        }
        was != now
    }

    pub fn on_occluded(&mut self, occluded: bool) -> bool {
        let was = self.paused();
        self.occluded = occluded;
        let now = self.paused();
        if was != now {
            info!("occluded={} → paused={}", occluded, now);
        }
        was != now
    }

    pub fn on_focused(&mut self, focused: bool) {
        if self.focused == focused {
            return;
        }
        self.focused = focused;
        if focused {
            self.next_frame_deadline = None;
        }
        info!("focused({})", focused);
    }

    /// Frame pacing for an unfocused window.
    ///
    /// `None` means "draw now, no throttle". Otherwise the returned deadline is
    /// when the next frame may be drawn; the bool says whether it is due at `now`.
    pub fn throttle(&mut self, now: Instant) -> Option<(bool, Instant)> {
        if self.focused || self.unfocused_fps == 0 {
            return None;
        }
        let frame_dt = Duration::from_nanos(1_000_000_000u64 / self.unfocused_fps as u64);
        match self.next_frame_deadline {
            Some(t) if now < t => Some((false, t)),
            _ => {
                let next = now + frame_dt;
                self.next_frame_deadline = Some(next);
                Some((true, next))
            }
        }
    }
}
