// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral types shared by the renderer, the platform layer and the app.
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows and collapsed panels report a zero dimension.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Converts a UI content region into a pixel size.
    ///
    /// Returns `None` when either dimension is not strictly positive (this
    /// includes NaN), so callers can treat the request as "skip".
    pub fn from_region(width: f32, height: f32) -> Option<Self> {
        if !(width >= 1.0 && height >= 1.0) {
            return None;
        }
        Some(Self {
            width: width.min(u32::MAX as f32) as u32,
            height: height.min(u32::MAX as f32) as u32,
        })
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

/// A rectangle in window pixels, used to place the canvas inside the editor.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ViewportRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ViewportRegion {
    /// Content region of a panel that fills `window` minus `margin` on every side.
    pub fn inset(window: RenderSize, margin: f32) -> Self {
        let margin = margin.max(0.0);
        Self {
            x: margin,
            y: margin,
            width: (window.width as f32 - 2.0 * margin).max(0.0),
            height: (window.height as f32 - 2.0 * margin).max(0.0),
        }
    }

    pub fn size(&self) -> Option<RenderSize> {
        RenderSize::from_region(self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearColor(pub [f32; 4]);

impl ClearColor {
    /// Neutral dark grey used behind the editor and inside an empty canvas.
    pub const NEUTRAL: ClearColor = ClearColor([0.1, 0.1, 0.1, 1.0]);
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VsyncMode {
    /// Target monitor refresh rate
    #[default]
    Fifo,
    /// Latest frame wins, fps uncapped
    Mailbox,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PresentSettings {
    pub clear: ClearColor,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    /// Clamped to what the surface supports.
    pub desired_image_count: u32,
    /// `None` blocks until an image is available.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PresentSettings {
    fn default() -> Self {
        Self {
            clear: ClearColor::NEUTRAL,
            vsync: true,
            vsync_mode: VsyncMode::Fifo,
            desired_image_count: 3,
            acquire_timeout: None,
        }
    }
}

impl PresentSettings {
    pub fn acquire_timeout_ns(&self) -> u64 {
        match self.acquire_timeout {
            Some(t) => u64::try_from(t.as_nanos()).unwrap_or(u64::MAX),
            None => u64::MAX,
        }
    }
}

/// How the canvas submission is ordered against the frame that samples it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CanvasSync {
    /// Rely on in-order execution of a single graphics queue.
    #[default]
    QueueOrder,
    /// Signal a semaphore the frame waits on before sampling the canvas.
    Semaphore,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasSettings {
    pub clear: ClearColor,
    pub msaa_samples: u32,
    pub initial_size: RenderSize,
    pub sync: CanvasSync,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            clear: ClearColor::NEUTRAL,
            msaa_samples: 4,
            initial_size: RenderSize::new(32, 32),
            sync: CanvasSync::QueueOrder,
        }
    }
}
