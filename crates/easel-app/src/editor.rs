// SPDX-License-Identifier: CEPL-1.0
//! The editor frame: a scene rendered into the canvas, shown in a viewport
//! panel of the window.
use crate::config::AppCfg;
use anyhow::{Context, Result};
use easel_platform::winit::window::Window;
use easel_render::{PresentSettings, RenderSize, ViewportRegion};
use easel_render_vk::{
    vk, AshDevice, Compositor, DemoScene, Frame, OffscreenCanvas, PresentOutcome,
    SurfacePresenter, TextureRegistry, TextureSlot,
};
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Radians per second of the demo triangle.
const SPIN_RATE: f32 = 0.8;

/// Content region of the viewport panel, which fills the window minus a margin.
pub fn viewport_panel(window: RenderSize, margin: f32) -> ViewportRegion {
    ViewportRegion::inset(window, margin)
}

// Fields drop in declaration order: bindings before the canvas sampler,
// everything before the device.
pub struct Editor {
    slot: TextureSlot,
    registry: TextureRegistry<AshDevice>,
    compositor: Compositor,
    scene: DemoScene,
    canvas: OffscreenCanvas<AshDevice>,
    presenter: SurfacePresenter<AshDevice>,
    _device: Rc<AshDevice>,

    margin: f32,
    started: Instant,
}

impl Editor {
    pub fn new(window: &Window, cfg: &AppCfg) -> Result<Self> {
        let (device, surface) = AshDevice::new(window, window).context("vulkan device")?;
        let device = Rc::new(device);

        let size = window.inner_size();
        let presenter = SurfacePresenter::new(
            Rc::clone(&device),
            surface,
            cfg.present_settings(),
            RenderSize::new(size.width, size.height),
        )?;
        let canvas = OffscreenCanvas::new(
            Rc::clone(&device),
            presenter.surface_format().format,
            cfg.canvas_settings(),
        )?;
        let scene = DemoScene::new(Rc::clone(&device), canvas.render_pass(), canvas.samples())?;
        let compositor = Compositor::new(Rc::clone(&device), presenter.render_pass())?;
        let registry = TextureRegistry::new(Rc::clone(&device), canvas.sampler());

        info!("editor ready, panel margin {}", cfg.window.panel_margin);
        Ok(Self {
            slot: TextureSlot::default(),
            registry,
            compositor,
            scene,
            canvas,
            presenter,
            _device: device,
            margin: cfg.window.panel_margin,
            started: Instant::now(),
        })
    }

    pub fn resized(&mut self, size: RenderSize) {
        self.presenter.set_window_size(size);
    }

    pub fn set_present_settings(&mut self, settings: PresentSettings) -> Result<()> {
        Ok(self.presenter.set_present_settings(settings)?)
    }

    /// Draws one frame. Returns false when the presenter skipped it.
    pub fn frame(&mut self, window: RenderSize) -> Result<bool> {
        let panel = viewport_panel(window, self.margin);
        self.canvas.set_viewport(panel.width, panel.height)?;

        // The canvas renders only for frames that will present; a skipped
        // frame must not leave a signaled resolve semaphore behind.
        let Some(mut frame) = self.presenter.begin_frame()? else {
            return Ok(false);
        };
        let drawn = self.draw_panel(&mut frame, panel);
        let presented = self.presenter.end_frame(frame);
        if presented.is_err() {
            // The resolve signal may have gone unconsumed.
            if let Err(e) = self.canvas.discard_resolve_ready() {
                warn!("resolve semaphore: {e}");
            }
        }
        drawn?;
        if presented? == PresentOutcome::Stale {
            debug!("frame presented to a stale swapchain");
        }
        Ok(true)
    }

    fn draw_panel(&mut self, frame: &mut Frame, panel: ViewportRegion) -> Result<()> {
        if panel.size().is_none() {
            return Ok(());
        }
        let angle = self.started.elapsed().as_secs_f32() * SPIN_RATE;
        let aspect = self
            .canvas
            .extent()
            .map(|e| RenderSize::new(e.width, e.height).aspect())
            .unwrap_or(1.0);

        let cmd = self.canvas.begin_canvas_render()?;
        self.scene.draw(cmd, angle, aspect);
        self.canvas.end_canvas_render()?;
        if let Some(ready) = self.canvas.resolve_ready() {
            frame.wait_for(ready, vk::PipelineStageFlags::FRAGMENT_SHADER);
        }

        let Some(texture) = self.canvas.get_resolved_texture() else {
            return Ok(());
        };
        let id = self.registry.supersede(&mut self.slot, &texture)?;
        if let Some(entry) = self.registry.get(id) {
            self.compositor.draw(frame, entry.binding, panel);
        }
        Ok(())
    }
}
