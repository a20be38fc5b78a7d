// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    #[error("{op} failed: {result:?}")]
    Vk { op: &'static str, result: vk::Result },

    #[error("no supported depth format among {0:?}")]
    NoDepthFormat(Vec<vk::Format>),

    #[error("swapchain has {count} images, surface allows {min}..={max}")]
    ImageCount { count: u32, min: u32, max: u32 },

    #[error("surface reports no formats")]
    NoSurfaceFormat,

    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("no physical device with a graphics queue that can present")]
    NoSuitableDevice,

    #[error("{0} returned no handles")]
    NoHandles(&'static str),
}

impl GpuError {
    pub(crate) fn vk(op: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::Vk { op, result }
    }
}

/// Errors surfaced from the per-frame calls. The caller may try again next
/// frame: a failed submit never leaves the canvas fence unsignaled for a
/// later wait, and a frame that fails after acquire hands its semaphores
/// back fresh and rebuilds the swap chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error(transparent)]
    Device(#[from] GpuError),

    #[error("{0} called without a matching begin")]
    NotRecording(&'static str),

    #[error("{0} called while a recording is already open")]
    AlreadyRecording(&'static str),

    #[error("frame belongs to swapchain generation {frame}, current is {current}")]
    StaleFrame { frame: u64, current: u64 },

    #[error("canvas has no attachments, the last rebuild failed")]
    NoAttachments,
}

pub type GpuResult<T> = Result<T, GpuError>;
