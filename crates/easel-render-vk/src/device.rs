// SPDX-License-Identifier: CEPL-1.0
//! The narrow device contract the presenter and the canvas are written against.
//!
//! Every call takes plain descriptor values instead of raw `*CreateInfo`
//! structs, so an implementation never has to chase pointers. Handles are the
//! regular `ash::vk` handle types; implementations that are not backed by a GPU
//! fabricate them with `vk::Handle::from_raw`.
use crate::error::{GpuError, GpuResult};
use ash::vk;

#[derive(Clone, Debug, Default)]
pub struct SubpassDesc {
    pub color: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    /// One entry per color reference when present.
    pub resolve: Vec<vk::AttachmentReference>,
}

#[derive(Clone, Debug, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpass: SubpassDesc,
    pub dependencies: Vec<vk::SubpassDependency>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// An image with its own memory and a single full-range view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Texture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    /// Distinct for every `create_texture` call on one device. Drivers may
    /// hand out a destroyed view's handle value again; the serial never repeats.
    pub serial: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// One queue submission: a recorded command buffer plus the semaphores and
/// fence it is ordered by. Built right before submit and dropped after.
#[derive(Clone, Debug, Default)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Vec<vk::Semaphore>,
    /// `vk::Fence::null()` when nobody waits on completion.
    pub fence: vk::Fence,
}

impl FrameSubmission {
    pub fn new(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

pub trait GpuDevice {
    fn surface_capabilities(&self, surface: vk::SurfaceKHR)
        -> GpuResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self, surface: vk::SurfaceKHR) -> GpuResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self, surface: vk::SurfaceKHR)
        -> GpuResult<Vec<vk::PresentModeKHR>>;
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;
    /// Sample counts usable for both color and depth framebuffer attachments.
    fn max_msaa_samples(&self) -> vk::SampleCountFlags;

    fn wait_idle(&self) -> GpuResult<()>;
    fn queue_wait_idle(&self) -> GpuResult<()>;

    fn create_render_pass(&self, desc: &RenderPassDesc) -> GpuResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> GpuResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> GpuResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_texture(&self, desc: &TextureDesc) -> GpuResult<Texture>;
    fn destroy_texture(&self, texture: &Texture);

    fn create_sampler(&self) -> GpuResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> GpuResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> GpuResult<()>;
    fn destroy_fence(&self, fence: vk::Fence);

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old: vk::SwapchainKHR,
    ) -> GpuResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> GpuResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn destroy_surface(&self, surface: vk::SurfaceKHR);

    fn allocate_command_buffers(&self, count: u32) -> GpuResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> GpuResult<()>;
    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> GpuResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> GpuResult<()>;

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_texture(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        binding: vk::DescriptorSet,
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        bytes: &[u8],
    );
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32);
    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier);

    fn queue_submit(&self, submission: &FrameSubmission) -> GpuResult<()>;
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> GpuResult<Acquire>;
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> GpuResult<PresentStatus>;

    /// Makes a shader-readable texture bindable as a combined image sampler.
    fn create_texture_binding(
        &self,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> GpuResult<vk::DescriptorSet>;
    fn destroy_texture_binding(&self, binding: vk::DescriptorSet);

    /// Records `record` into a throwaway command buffer, submits it and waits
    /// for the queue to drain before returning.
    fn submit_one_time<F>(&self, record: F) -> GpuResult<()>
    where
        Self: Sized,
        F: FnOnce(&Self, vk::CommandBuffer),
    {
        let cmds = self.allocate_command_buffers(1)?;
        let cmd = cmds
            .first()
            .copied()
            .ok_or(GpuError::NoHandles("vkAllocateCommandBuffers"))?;
        let result = (|| {
            self.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            record(self, cmd);
            self.end_command_buffer(cmd)?;
            self.queue_submit(&FrameSubmission::new(cmd))?;
            self.queue_wait_idle()
        })();
        self.free_command_buffers(&cmds);
        result
    }
}
