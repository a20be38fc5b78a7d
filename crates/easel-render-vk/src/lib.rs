// SPDX-License-Identifier: CEPL-1.0
//! Vulkan presentation and off-screen canvas rendering.
//!
//! [`SurfacePresenter`] and [`OffscreenCanvas`] are written against the
//! [`GpuDevice`] contract; [`AshDevice`] implements it on a real GPU.
#![deny(unsafe_op_in_unsafe_fn)]

mod ash_device;
mod canvas;
mod device;
mod error;
#[cfg(test)]
mod mock;
mod pipeline;
mod presenter;
mod registry;
pub mod select;

pub use ash::vk;
pub use ash_device::AshDevice;
pub use canvas::OffscreenCanvas;
pub use device::{
    Acquire, FrameSubmission, GpuDevice, ImageBarrier, PresentStatus, RenderPassDesc,
    SubpassDesc, SwapchainDesc, Texture, TextureDesc,
};
pub use error::{FrameError, GpuError, GpuResult};
pub use pipeline::{Compositor, DemoScene};
pub use presenter::{Frame, PresentOutcome, SurfacePresenter};
pub use registry::{RegisteredTexture, TextureId, TextureRegistry, TextureSlot};
