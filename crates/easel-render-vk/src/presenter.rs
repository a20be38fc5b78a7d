// SPDX-License-Identifier: CEPL-1.0
//! On-screen presentation.
//!
//! The presenter owns the swap chain of one window surface and runs the
//! acquire → record → submit → present cycle. Everything that depends on the
//! surface extent (image views, framebuffers, command buffers) lives in a
//! [`SwapchainGeneration`], which is rebuilt wholesale whenever the observed
//! extent changes. The render pass and both semaphores outlive generations.
//!
//! STRICT PER-FRAME ORDER:
//! 0) the previous frame's submission has drained from the queue
//! 1) acquire signals "image acquired"
//! 2) submit waits on it at COLOR_ATTACHMENT_OUTPUT and signals "render finished"
//! 3) present waits on "render finished"
//!
//! A frame that fails anywhere after 1) leaves a semaphore signaled with no
//! wait to consume it. Both semaphores are then replaced and the swap chain is
//! rebuilt, which also returns the acquired but never presented image.
use crate::device::{
    Acquire, FrameSubmission, GpuDevice, PresentStatus, RenderPassDesc, SubpassDesc,
    SwapchainDesc,
};
use crate::error::{FrameError, GpuResult};
use crate::select;
use anyhow::{Context, Result};
use ash::vk;
use easel_render::{PresentSettings, RenderSize};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Upper bound on back-to-back rebuilds while the surface keeps changing size
/// under us. Past it we render with whatever was built last.
const MAX_REGENERATIONS_PER_FRAME: usize = 4;

/// Size-dependent resources of one swap chain. Indexed by image index.
struct SwapchainGeneration<D: GpuDevice> {
    device: Rc<D>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl<D: GpuDevice> SwapchainGeneration<D> {
    fn build(
        device: &Rc<D>,
        images: &[vk::Image],
        format: vk::Format,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> GpuResult<Self> {
        // Filled in place so a failure halfway still releases what was made.
        let mut generation = Self {
            device: Rc::clone(device),
            views: Vec::with_capacity(images.len()),
            framebuffers: Vec::with_capacity(images.len()),
            command_buffers: Vec::new(),
        };
        for &image in images {
            let view = device.create_image_view(image, format, vk::ImageAspectFlags::COLOR)?;
            generation.views.push(view);
            let framebuffer = device.create_framebuffer(render_pass, &[view], extent)?;
            generation.framebuffers.push(framebuffer);
        }
        generation.command_buffers = device.allocate_command_buffers(images.len() as u32)?;
        Ok(generation)
    }
}

impl<D: GpuDevice> Drop for SwapchainGeneration<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!(error = %e, "device wait before swapchain teardown failed");
        }
        self.device.free_command_buffers(&self.command_buffers);
        for &fb in &self.framebuffers {
            self.device.destroy_framebuffer(fb);
        }
        for &view in &self.views {
            self.device.destroy_image_view(view);
        }
    }
}

/// A frame between [`SurfacePresenter::begin_frame`] and
/// [`SurfacePresenter::end_frame`]. Its render pass is already begun.
#[derive(Debug)]
#[must_use = "a begun frame has to be handed back to end_frame"]
pub struct Frame {
    image_index: u32,
    command_buffer: vk::CommandBuffer,
    generation: u64,
    extent: vk::Extent2D,
    waits: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
}

impl Frame {
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Makes the frame's submission also wait on `semaphore` at `stage`.
    pub fn wait_for(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) {
        self.waits.push((semaphore, stage));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The image went out, but the swap chain no longer matches the surface.
    /// The next `begin_frame` rebuilds it.
    Stale,
}

pub struct SurfacePresenter<D: GpuDevice> {
    device: Rc<D>,
    surface: vk::SurfaceKHR,
    settings: PresentSettings,

    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    composite_alpha: vk::CompositeAlphaFlagsKHR,
    render_pass: vk::RenderPass,
    image_acquired: vk::Semaphore,
    render_finished: vk::Semaphore,

    swapchain: vk::SwapchainKHR,
    generation: Option<SwapchainGeneration<D>>,
    image_count: u32,
    extent: vk::Extent2D,
    window_size: RenderSize,
    generation_id: u64,
    force_regenerate: bool,
    frame_open: bool,
    /// A submission may still hold a command buffer or a semaphore wait.
    in_flight: bool,
}

impl<D: GpuDevice> SurfacePresenter<D> {
    /// Takes ownership of `surface`; it is destroyed with the presenter.
    ///
    /// `window_size` only matters for surfaces that let the swap chain pick
    /// its own extent. A surface that starts out minimized gets its first
    /// swap chain on the first `begin_frame` with a non-zero extent.
    pub fn new(
        device: Rc<D>,
        surface: vk::SurfaceKHR,
        settings: PresentSettings,
        window_size: RenderSize,
    ) -> Result<Self> {
        // Null handles first: Drop cleans up whatever a failing step leaves.
        let mut presenter = Self {
            device: Rc::clone(&device),
            surface,
            settings,
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            render_pass: vk::RenderPass::null(),
            image_acquired: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            swapchain: vk::SwapchainKHR::null(),
            generation: None,
            image_count: 0,
            extent: vk::Extent2D::default(),
            window_size,
            generation_id: 0,
            force_regenerate: false,
            frame_open: false,
            in_flight: false,
        };

        let formats = device
            .surface_formats(surface)
            .context("query surface formats")?;
        presenter.surface_format =
            select::surface_format(&formats).context("choose surface format")?;
        presenter.present_mode = presenter
            .choose_present_mode()
            .context("query present modes")?;

        presenter.render_pass = device
            .create_render_pass(&present_pass(presenter.surface_format.format))
            .context("create presenter render pass")?;
        presenter.image_acquired = device
            .create_semaphore()
            .context("create image-acquired semaphore")?;
        presenter.render_finished = device
            .create_semaphore()
            .context("create render-finished semaphore")?;

        let caps = device
            .surface_capabilities(surface)
            .context("query surface capabilities")?;
        presenter.composite_alpha = select::composite_alpha(&caps);

        if select::is_zero(select::surface_extent(&caps, window_size)) {
            info!("vk: surface starts at 0x0, swapchain deferred");
        } else {
            presenter
                .regenerate(&caps)
                .context("create initial swapchain")?;
        }

        info!(
            "vk: presenter format: {} / {}, present_mode: {}",
            select::fmt_name(presenter.surface_format.format),
            select::cs_name(presenter.surface_format.color_space),
            select::pm_name(presenter.present_mode),
        );
        Ok(presenter)
    }

    /// Render pass every framebuffer of every generation is built against.
    /// UI pipelines drawing into the frame must be compatible with it.
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Extent of the current generation; zero before the first swap chain.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Number of swap chains built so far, the first one included.
    pub fn regenerations(&self) -> u64 {
        self.generation_id
    }

    /// Size hint for surfaces that leave the extent to the swap chain.
    pub fn set_window_size(&mut self, size: RenderSize) {
        self.window_size = size;
    }

    /// Clear color and acquire timeout apply from the next frame; present
    /// mode and image count changes rebuild the swap chain first.
    pub fn set_present_settings(&mut self, settings: PresentSettings) -> GpuResult<()> {
        let old = self.settings;
        self.settings = settings;
        let mode = self.choose_present_mode()?;
        if mode != self.present_mode || old.desired_image_count != settings.desired_image_count
        {
            info!(
                "vk: present mode {} -> {}, images {} -> {}",
                select::pm_name(self.present_mode),
                select::pm_name(mode),
                old.desired_image_count,
                settings.desired_image_count
            );
            self.present_mode = mode;
            self.force_regenerate = true;
        }
        Ok(())
    }

    /// Acquires the next image and begins its render pass, cleared to the
    /// configured color.
    ///
    /// `Ok(None)` means "skip this frame": the surface is zero-sized, the
    /// swap chain turned out of date during acquire, or the acquire timed out.
    pub fn begin_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.frame_open {
            return Err(FrameError::AlreadyRecording("begin_frame"));
        }
        // Command buffers and both semaphores are reused every frame.
        if self.in_flight {
            self.device.queue_wait_idle()?;
            self.in_flight = false;
        }
        if !self.sync_extent()? {
            return Ok(None);
        }
        let Some(generation) = self.generation.as_ref() else {
            return Ok(None);
        };

        let acquired = self.device.acquire_next_image(
            self.swapchain,
            self.settings.acquire_timeout_ns(),
            self.image_acquired,
        )?;
        let image_index = match acquired {
            Acquire::Image {
                index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!("vk: acquire reported suboptimal, rebuilding next frame");
                    self.force_regenerate = true;
                }
                index
            }
            Acquire::OutOfDate => {
                debug!("vk: acquire reported out of date, skipping frame");
                self.force_regenerate = true;
                return Ok(None);
            }
            Acquire::Timeout => {
                warn!(
                    timeout = ?self.settings.acquire_timeout,
                    "vk: no swapchain image in time, skipping frame"
                );
                return Ok(None);
            }
        };

        let cmd = generation.command_buffers[image_index as usize];
        let framebuffer = generation.framebuffers[image_index as usize];
        if let Err(e) = self.begin_pass(cmd, framebuffer) {
            self.discard_frame_sync();
            return Err(e.into());
        }

        self.frame_open = true;
        Ok(Some(Frame {
            image_index,
            command_buffer: cmd,
            generation: self.generation_id,
            extent: self.extent,
            waits: Vec::new(),
        }))
    }

    /// Ends the render pass, submits and presents.
    pub fn end_frame(&mut self, frame: Frame) -> Result<PresentOutcome, FrameError> {
        if !self.frame_open {
            return Err(FrameError::NotRecording("end_frame"));
        }
        self.frame_open = false;
        if frame.generation != self.generation_id {
            self.discard_frame_sync();
            return Err(FrameError::StaleFrame {
                frame: frame.generation,
                current: self.generation_id,
            });
        }

        let status = match self.submit_and_present(frame) {
            Ok(status) => status,
            Err(e) => {
                self.discard_frame_sync();
                return Err(e.into());
            }
        };
        match status {
            PresentStatus::Optimal => Ok(PresentOutcome::Presented),
            status => {
                debug!(?status, "vk: present reported a stale swapchain");
                self.force_regenerate = true;
                Ok(PresentOutcome::Stale)
            }
        }
    }

    fn begin_pass(&self, cmd: vk::CommandBuffer, framebuffer: vk::Framebuffer) -> GpuResult<()> {
        self.device.reset_command_buffer(cmd)?;
        self.device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        let clear = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.settings.clear.0,
            },
        }];
        self.device
            .cmd_begin_render_pass(cmd, self.render_pass, framebuffer, self.extent, &clear);
        Ok(())
    }

    fn submit_and_present(&mut self, frame: Frame) -> GpuResult<PresentStatus> {
        let cmd = frame.command_buffer;
        self.device.cmd_end_render_pass(cmd);
        self.device.end_command_buffer(cmd)?;

        let mut submission = FrameSubmission::new(cmd);
        submission.wait.push((
            self.image_acquired,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ));
        submission.wait.extend(frame.waits);
        submission.signal.push(self.render_finished);
        self.device.queue_submit(&submission)?;
        self.in_flight = true;

        self.device
            .queue_present(self.swapchain, frame.image_index, self.render_finished)
    }

    /// Recovery after a frame died between acquire and present.
    fn discard_frame_sync(&mut self) {
        if let Err(e) = self.replace_semaphores() {
            warn!(error = %e, "vk: could not replace frame semaphores");
        }
        self.force_regenerate = true;
    }

    fn replace_semaphores(&mut self) -> GpuResult<()> {
        self.device.queue_wait_idle()?;
        self.in_flight = false;
        for semaphore in [&mut self.image_acquired, &mut self.render_finished] {
            let fresh = self.device.create_semaphore()?;
            self.device
                .destroy_semaphore(std::mem::replace(semaphore, fresh));
        }
        debug!("vk: frame semaphores replaced");
        Ok(())
    }

    fn choose_present_mode(&self) -> GpuResult<vk::PresentModeKHR> {
        let modes = self.device.surface_present_modes(self.surface)?;
        Ok(select::present_mode(
            &modes,
            self.settings.vsync,
            self.settings.vsync_mode,
        ))
    }

    /// Brings the swap chain in line with the live surface extent.
    /// Returns false when there is nothing to render into this frame.
    fn sync_extent(&mut self) -> GpuResult<bool> {
        for _ in 0..MAX_REGENERATIONS_PER_FRAME {
            let caps = self.device.surface_capabilities(self.surface)?;
            let extent = select::surface_extent(&caps, self.window_size);
            if select::is_zero(extent) {
                return Ok(false);
            }
            let unchanged =
                extent.width == self.extent.width && extent.height == self.extent.height;
            if self.generation.is_some() && unchanged && !self.force_regenerate {
                return Ok(true);
            }
            self.regenerate(&caps)?;
        }
        Ok(self.generation.is_some())
    }

    fn regenerate(&mut self, caps: &vk::SurfaceCapabilitiesKHR) -> GpuResult<()> {
        let extent = select::surface_extent(caps, self.window_size);
        let old_extent = self.extent;

        // Idles the device before any old view or framebuffer goes away.
        self.generation = None;
        self.extent = vk::Extent2D::default();
        self.image_count = 0;

        let desc = SwapchainDesc {
            surface: self.surface,
            min_image_count: select::image_count(self.settings.desired_image_count, caps),
            format: self.surface_format,
            extent,
            present_mode: self.present_mode,
            pre_transform: select::pre_transform(caps),
            composite_alpha: self.composite_alpha,
        };
        let old = self.swapchain;
        let swapchain = self.device.create_swapchain(&desc, old)?;
        self.device.destroy_swapchain(old);
        self.swapchain = swapchain;

        let images = self.device.swapchain_images(swapchain)?;
        let image_count = select::check_image_count(images.len(), caps)?;
        self.generation = Some(SwapchainGeneration::build(
            &self.device,
            &images,
            self.surface_format.format,
            self.render_pass,
            extent,
        )?);

        self.extent = extent;
        self.image_count = image_count;
        self.generation_id += 1;
        self.force_regenerate = false;
        info!(
            "vk: swapchain #{} {}x{} -> {}x{}, images(min={} max={} -> {})",
            self.generation_id,
            old_extent.width,
            old_extent.height,
            extent.width,
            extent.height,
            caps.min_image_count,
            caps.max_image_count,
            image_count
        );
        Ok(())
    }
}

impl<D: GpuDevice> Drop for SurfacePresenter<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!(error = %e, "device wait before presenter teardown failed");
        }
        self.generation = None;
        self.device.destroy_swapchain(self.swapchain);
        self.device.destroy_semaphore(self.render_finished);
        self.device.destroy_semaphore(self.image_acquired);
        self.device.destroy_render_pass(self.render_pass);
        self.device.destroy_surface(self.surface);
    }
}

fn present_pass(format: vk::Format) -> RenderPassDesc {
    RenderPassDesc {
        attachments: vec![vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }],
        subpass: SubpassDesc {
            color: vec![vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
            ..Default::default()
        },
        // The acquire semaphore is waited at COLOR_ATTACHMENT_OUTPUT, so the
        // layout transition has to wait there too.
        dependencies: vec![vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        }],
    }
}
