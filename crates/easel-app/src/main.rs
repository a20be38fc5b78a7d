// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod editor;

use anyhow::Result;
use clap::Parser;
use config::{AppCfg, Args};
use easel_core::init_tracing;
use easel_platform::WindowState;
use easel_render::{RenderSize, VsyncMode};
use editor::Editor;
use std::time::Instant;
use tracing::{error, info, warn};

use easel_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

struct App {
    cfg: AppCfg,
    // Editor before window: the surface goes before the window it belongs to.
    editor: Option<Editor>,
    window: Option<Window>,
    state: WindowState,

    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let size = RenderSize::new(cfg.window.width, cfg.window.height);
        let unfocused_fps = cfg.window.unfocused_fps;
        Self {
            cfg,
            editor: None,
            window: None,
            state: WindowState::new(size, unfocused_fps),
            exiting: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.as_str())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs)?;
        let size = window.inner_size();
        self.state.on_resized(RenderSize::new(size.width, size.height));

        let editor = Editor::new(&window, &self.cfg)?;
        self.editor = Some(editor);
        self.window = Some(window);
        Ok(())
    }

    fn request_redraw(&self) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create(event_loop) {
                error!("startup failed: {e:#}");
                self.exiting = true;
                event_loop.exit();
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        info!("resumed → paused={}", self.state.paused());
        if !self.state.paused() {
            self.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.editor = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                self.state.on_resized(size);
                if let Some(editor) = &mut self.editor {
                    editor.resized(size);
                }
                if !self.state.paused() {
                    self.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                if self.state.on_occluded(occluded) && !self.state.paused() {
                    self.request_redraw();
                }
            }

            WindowEvent::Focused(focused) => {
                self.state.on_focused(focused);
                // Without a throttle, background windows fall back to vsync.
                if self.cfg.window.unfocused_fps == 0 {
                    let mut settings = self.cfg.present_settings();
                    if !focused {
                        settings.vsync = true;
                        settings.vsync_mode = VsyncMode::Fifo;
                    }
                    if let Some(editor) = &mut self.editor {
                        if let Err(e) = editor.set_present_settings(settings) {
                            warn!("present settings: {e:#}");
                        }
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.state.paused() {
                    return;
                }
                let size = self.state.size();
                if let Some(editor) = &mut self.editor {
                    match editor.frame(size) {
                        // count only frames that were actually presented
                        Ok(true) => self.frames = self.frames.saturating_add(1),
                        Ok(false) => {}
                        Err(e) => error!("render error: {e:#}"),
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.state.paused() {
            // minimized or occluded → sleep until the next window event
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        let now = Instant::now();
        match self.state.throttle(now) {
            Some((due, next)) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(next));
                if due {
                    self.request_redraw();
                }
            }
            None => {
                // Vsync paces us through present; otherwise keep drawing.
                event_loop.set_control_flow(if self.cfg.present.vsync {
                    ControlFlow::Wait
                } else {
                    ControlFlow::Poll
                });
                self.request_redraw();
            }
        }

        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let loaded = AppCfg::read(&args.config);
    let mut cfg = match &loaded {
        Ok(Some(cfg)) => cfg.clone(),
        _ => AppCfg::default(),
    };
    cfg.apply_args(&args);

    init_tracing(&cfg.log.filter);
    match loaded {
        Ok(Some(_)) => info!("config: {}", args.config.display()),
        Ok(None) => info!("{} not found, using defaults", args.config.display()),
        Err(e) => warn!("{e:#}; using defaults"),
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;
    Ok(())
}
