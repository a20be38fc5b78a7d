// SPDX-License-Identifier: CEPL-1.0
//! Command line and `easel.toml`.
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use easel_render::{CanvasSettings, CanvasSync, ClearColor, PresentSettings, RenderSize, VsyncMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file; missing or invalid files fall back to defaults
    #[arg(long, default_value = "easel.toml")]
    pub config: PathBuf,
    /// Overrides present.vsync_mode
    #[arg(long, value_enum)]
    pub vsync_mode: Option<VsyncModeCfg>,
    /// Overrides canvas.msaa_samples
    #[arg(long)]
    pub msaa: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum VsyncModeCfg {
    #[default]
    Fifo,
    Mailbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CanvasSyncCfg {
    #[default]
    QueueOrder,
    Semaphore,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PresentCfg {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncModeCfg,
    pub desired_image_count: u32,
    /// Absent means acquire blocks until an image is ready.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for PresentCfg {
    fn default() -> Self {
        PresentCfg {
            clear_color: ClearColor::NEUTRAL.0,
            vsync: true,
            vsync_mode: VsyncModeCfg::Fifo,
            desired_image_count: 3,
            acquire_timeout_ms: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CanvasCfg {
    pub clear_color: [f32; 4],
    pub msaa_samples: u32,
    pub initial_width: u32,
    pub initial_height: u32,
    pub sync: CanvasSyncCfg,
}

impl Default for CanvasCfg {
    fn default() -> Self {
        CanvasCfg {
            clear_color: ClearColor::NEUTRAL.0,
            msaa_samples: 4,
            initial_width: 32,
            initial_height: 32,
            sync: CanvasSyncCfg::QueueOrder,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Gap in pixels between the window edge and the viewport panel.
    pub panel_margin: f32,
    /// 0 disables throttling of unfocused windows.
    pub unfocused_fps: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "easel".into(),
            width: 1280,
            height: 720,
            panel_margin: 24.0,
            unfocused_fps: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogCfg {
    pub filter: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        LogCfg {
            filter: "info".into(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub present: PresentCfg,
    pub canvas: CanvasCfg,
    pub window: WindowCfg,
    pub log: LogCfg,
}

impl AppCfg {
    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// `Ok(None)` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse(&s)
                .map(Some)
                .with_context(|| format!("parse {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Command line flags win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(mode) = args.vsync_mode {
            self.present.vsync_mode = mode;
        }
        if let Some(msaa) = args.msaa {
            self.canvas.msaa_samples = msaa;
        }
    }

    pub fn present_settings(&self) -> PresentSettings {
        let p = &self.present;
        PresentSettings {
            clear: ClearColor(p.clear_color),
            vsync: p.vsync,
            vsync_mode: match p.vsync_mode {
                VsyncModeCfg::Fifo => VsyncMode::Fifo,
                VsyncModeCfg::Mailbox => VsyncMode::Mailbox,
            },
            desired_image_count: p.desired_image_count,
            acquire_timeout: p.acquire_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn canvas_settings(&self) -> CanvasSettings {
        let c = &self.canvas;
        CanvasSettings {
            clear: ClearColor(c.clear_color),
            msaa_samples: c.msaa_samples,
            initial_size: RenderSize::new(c.initial_width, c.initial_height),
            sync: match c.sync {
                CanvasSyncCfg::QueueOrder => CanvasSync::QueueOrder,
                CanvasSyncCfg::Semaphore => CanvasSync::Semaphore,
            },
        }
    }
}
