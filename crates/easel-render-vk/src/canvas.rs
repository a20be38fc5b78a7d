// SPDX-License-Identifier: CEPL-1.0
//! Off-screen multisampled render target consumed as a texture by the UI.
//!
//! Attachment order of the render pass, fixed at construction:
//! 0 = multisampled color, 1 = multisampled depth, 2 = single-sample resolve.
//! The resolve attachment ends every pass in SHADER_READ_ONLY_OPTIMAL.
use crate::device::{
    FrameSubmission, GpuDevice, ImageBarrier, RenderPassDesc, SubpassDesc, Texture, TextureDesc,
};
use crate::error::{FrameError, GpuResult};
use crate::select;
use anyhow::{bail, Context, Result};
use ash::vk;
use easel_render::{CanvasSettings, CanvasSync, RenderSize};
use std::rc::Rc;
use tracing::{debug, info, warn};

const COLOR: usize = 0;
const DEPTH: usize = 1;
const RESOLVE: usize = 2;

/// Textures and framebuffer for one canvas size.
struct CanvasAttachments<D: GpuDevice> {
    device: Rc<D>,
    /// In render pass attachment order.
    textures: Vec<Texture>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl<D: GpuDevice> Drop for CanvasAttachments<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!(error = %e, "device wait before canvas teardown failed");
        }
        self.device.destroy_framebuffer(self.framebuffer);
        for texture in &self.textures {
            self.device.destroy_texture(texture);
        }
    }
}

pub struct OffscreenCanvas<D: GpuDevice> {
    device: Rc<D>,
    settings: CanvasSettings,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,

    render_pass: vk::RenderPass,
    sampler: vk::Sampler,
    command_buffer: vk::CommandBuffer,
    in_flight: vk::Fence,
    /// `in_flight` belongs to a submission that reached the queue. A failed
    /// submit leaves the fence reset with nothing to signal it.
    submitted: bool,
    resolve_ready: vk::Semaphore,

    attachments: Option<CanvasAttachments<D>>,
    recording: bool,
    rebuilds: u64,
}

impl<D: GpuDevice> OffscreenCanvas<D> {
    /// `color_format` is usually the presenter's surface format so the UI
    /// samples the canvas without conversion.
    pub fn new(device: Rc<D>, color_format: vk::Format, settings: CanvasSettings) -> Result<Self> {
        let depth_format = select::depth_format(&select::DEPTH_CANDIDATES, |f| {
            device.format_properties(f)
        })
        .context("pick canvas depth format")?;

        // A resolve attachment needs a multisampled source.
        let supported = device.max_msaa_samples();
        let samples = match select::msaa_samples(settings.msaa_samples, supported) {
            vk::SampleCountFlags::TYPE_1 => select::msaa_samples(u32::MAX, supported),
            s => s,
        };
        if samples == vk::SampleCountFlags::TYPE_1 {
            bail!("device supports no multisampled color and depth attachments");
        }

        let mut canvas = Self {
            device: Rc::clone(&device),
            settings,
            color_format,
            depth_format,
            samples,
            render_pass: vk::RenderPass::null(),
            sampler: vk::Sampler::null(),
            command_buffer: vk::CommandBuffer::null(),
            in_flight: vk::Fence::null(),
            submitted: false,
            resolve_ready: vk::Semaphore::null(),
            attachments: None,
            recording: false,
            rebuilds: 0,
        };

        canvas.render_pass = device
            .create_render_pass(&canvas_pass(color_format, depth_format, samples))
            .context("create canvas render pass")?;
        canvas.sampler = device.create_sampler().context("create canvas sampler")?;
        canvas.command_buffer = device
            .allocate_command_buffers(1)
            .context("allocate canvas command buffer")?
            .first()
            .copied()
            .context("allocate canvas command buffer: none returned")?;
        canvas.in_flight = device
            .create_fence(false)
            .context("create canvas fence")?;
        if settings.sync == CanvasSync::Semaphore {
            canvas.resolve_ready = device
                .create_semaphore()
                .context("create resolve-ready semaphore")?;
        }

        let initial = if settings.initial_size.is_empty() {
            CanvasSettings::default().initial_size
        } else {
            settings.initial_size
        };
        canvas
            .rebuild(initial)
            .context("create canvas attachments")?;

        info!(
            "vk: canvas color {} depth {} samples {:?} sync {:?}",
            select::fmt_name(color_format),
            select::fmt_name(depth_format),
            samples,
            settings.sync
        );
        Ok(canvas)
    }

    /// Resizes the canvas to the UI content region.
    ///
    /// Sizes below one pixel in either dimension are ignored and leave the
    /// current attachments alone. Returns true when the attachments were
    /// rebuilt, which invalidates any texture handed out earlier.
    pub fn set_viewport(&mut self, width: f32, height: f32) -> Result<bool, FrameError> {
        let Some(size) = RenderSize::from_region(width, height) else {
            return Ok(false);
        };
        if self.recording {
            return Err(FrameError::AlreadyRecording("set_viewport"));
        }
        if let Some(att) = &self.attachments {
            if att.extent.width == size.width && att.extent.height == size.height {
                return Ok(false);
            }
        }
        self.rebuild(size)?;
        Ok(true)
    }

    /// Begins the canvas render pass and returns the command buffer to record
    /// scene draws into. Viewport and scissor cover the whole canvas.
    pub fn begin_canvas_render(&mut self) -> Result<vk::CommandBuffer, FrameError> {
        if self.recording {
            return Err(FrameError::AlreadyRecording("begin_canvas_render"));
        }
        let Some(att) = self.attachments.as_ref() else {
            return Err(FrameError::NoAttachments);
        };
        let cmd = self.command_buffer;

        // The previous canvas submission still owns the command buffer.
        if self.submitted {
            self.device.wait_for_fence(self.in_flight, u64::MAX)?;
            self.submitted = false;
        }
        self.device.reset_command_buffer(cmd)?;
        self.device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let color = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.settings.clear.0,
            },
        };
        let depth = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };
        self.device.cmd_begin_render_pass(
            cmd,
            self.render_pass,
            att.framebuffer,
            att.extent,
            &[color, depth, color],
        );
        self.device.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: att.extent.width as f32,
                height: att.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        self.device.cmd_set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: att.extent,
            },
        );

        self.recording = true;
        Ok(cmd)
    }

    /// Ends the pass and submits it. No wait on the presenter: with
    /// `CanvasSync::QueueOrder` the frame sampling the result is ordered by
    /// the queue alone, with `CanvasSync::Semaphore` it has to wait on
    /// [`resolve_ready`](Self::resolve_ready) exactly once per call.
    pub fn end_canvas_render(&mut self) -> Result<(), FrameError> {
        if !self.recording {
            return Err(FrameError::NotRecording("end_canvas_render"));
        }
        self.recording = false;

        let cmd = self.command_buffer;
        self.device.cmd_end_render_pass(cmd);
        self.device.end_command_buffer(cmd)?;

        let mut submission = FrameSubmission::new(cmd);
        if self.resolve_ready != vk::Semaphore::null() {
            submission.signal.push(self.resolve_ready);
        }
        submission.fence = self.in_flight;
        self.device.reset_fence(self.in_flight)?;
        self.device.queue_submit(&submission)?;
        self.submitted = true;
        Ok(())
    }

    /// Swaps in a fresh resolve-ready semaphore. For when the frame that was
    /// meant to wait on the last signal never reached the queue.
    pub fn discard_resolve_ready(&mut self) -> GpuResult<()> {
        if self.resolve_ready == vk::Semaphore::null() {
            return Ok(());
        }
        self.device.queue_wait_idle()?;
        let fresh = self.device.create_semaphore()?;
        self.device
            .destroy_semaphore(std::mem::replace(&mut self.resolve_ready, fresh));
        Ok(())
    }

    /// The single-sample resolve target. Valid until the next resize.
    pub fn get_resolved_texture(&self) -> Option<Texture> {
        self.attachments.as_ref().map(|att| att.textures[RESOLVE])
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.attachments.as_ref().map(|att| att.extent)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Linear, clamp-to-edge; meant for sampling the resolved texture.
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Signaled by every submission when built with `CanvasSync::Semaphore`.
    pub fn resolve_ready(&self) -> Option<vk::Semaphore> {
        (self.resolve_ready != vk::Semaphore::null()).then_some(self.resolve_ready)
    }

    /// Attachment sets built so far, the initial one included.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn rebuild(&mut self, size: RenderSize) -> GpuResult<()> {
        // Idles the device, then frees the old set.
        self.attachments = None;

        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let mut att = CanvasAttachments {
            device: Rc::clone(&self.device),
            textures: Vec::with_capacity(3),
            framebuffer: vk::Framebuffer::null(),
            extent,
        };
        for desc in self.texture_descs(extent) {
            att.textures.push(self.device.create_texture(&desc)?);
        }
        let views: Vec<vk::ImageView> = att.textures.iter().map(|t| t.view).collect();
        att.framebuffer = self
            .device
            .create_framebuffer(self.render_pass, &views, extent)?;

        // Samplable before the first canvas pass ever runs.
        let resolve = att.textures[RESOLVE].image;
        self.device.submit_one_time(|d, cmd| {
            d.cmd_image_barrier(
                cmd,
                &ImageBarrier {
                    image: resolve,
                    aspect: vk::ImageAspectFlags::COLOR,
                    old_layout: vk::ImageLayout::UNDEFINED,
                    new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    src_access: vk::AccessFlags::empty(),
                    dst_access: vk::AccessFlags::SHADER_READ,
                    src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                },
            )
        })?;

        self.attachments = Some(att);
        self.rebuilds += 1;
        debug!("vk: canvas attachments {}x{}", size.width, size.height);
        Ok(())
    }

    fn texture_descs(&self, extent: vk::Extent2D) -> [TextureDesc; 3] {
        [
            TextureDesc {
                extent,
                format: self.color_format,
                samples: self.samples,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                aspect: vk::ImageAspectFlags::COLOR,
            },
            TextureDesc {
                extent,
                format: self.depth_format,
                samples: self.samples,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: select::depth_aspect(self.depth_format),
            },
            TextureDesc {
                extent,
                format: self.color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
                aspect: vk::ImageAspectFlags::COLOR,
            },
        ]
    }
}

impl<D: GpuDevice> Drop for OffscreenCanvas<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!(error = %e, "device wait before canvas teardown failed");
        }
        self.attachments = None;
        self.device.destroy_semaphore(self.resolve_ready);
        self.device.destroy_fence(self.in_flight);
        if self.command_buffer != vk::CommandBuffer::null() {
            self.device.free_command_buffers(&[self.command_buffer]);
        }
        self.device.destroy_sampler(self.sampler);
        self.device.destroy_render_pass(self.render_pass);
    }
}

fn canvas_pass(
    color: vk::Format,
    depth: vk::Format,
    samples: vk::SampleCountFlags,
) -> RenderPassDesc {
    let attachment = |format: vk::Format,
                      samples: vk::SampleCountFlags,
                      final_layout: vk::ImageLayout| vk::AttachmentDescription {
        format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout,
        ..Default::default()
    };
    RenderPassDesc {
        attachments: vec![
            attachment(color, samples, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            attachment(
                depth,
                samples,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            attachment(
                color,
                vk::SampleCountFlags::TYPE_1,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
        ],
        subpass: SubpassDesc {
            color: vec![vk::AttachmentReference {
                attachment: COLOR as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
            depth: Some(vk::AttachmentReference {
                attachment: DEPTH as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
            resolve: vec![vk::AttachmentReference {
                attachment: RESOLVE as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
        },
        dependencies: vec![
            // Nothing outside sees a half-cleared attachment, and last
            // frame's sampling of the resolve target finishes first.
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags::empty(),
                dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                ..Default::default()
            },
            // Resolve writes are visible to later fragment-shader reads on the queue.
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                ..Default::default()
            },
        ],
    }
}
