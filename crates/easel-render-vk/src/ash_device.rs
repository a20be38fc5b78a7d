// SPDX-License-Identifier: CEPL-1.0
//! `GpuDevice` on top of `ash`.
use crate::device::*;
use crate::error::{GpuError, GpuResult};
use anyhow::{anyhow, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::cell::Cell;
use std::ffi::CStr;
use tracing::info;

#[cfg(debug_assertions)]
type DebugState = (ext_debug::Instance, vk::DebugUtilsMessengerEXT);
#[cfg(not(debug_assertions))]
type DebugState = ();

/// Texture bindings the descriptor pool can hold at once.
const MAX_TEXTURE_BINDINGS: u32 = 64;

pub struct AshDevice {
    _entry: Entry,
    instance: Instance,
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    debug: Option<DebugState>,
    surface_loader: surface::Instance,

    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    swapchain_loader: swapchain::Device,
    memory: vk::PhysicalDeviceMemoryProperties,
    msaa: vk::SampleCountFlags,

    cmd_pool: vk::CommandPool,
    desc_pool: vk::DescriptorPool,
    texture_layout: vk::DescriptorSetLayout,
    texture_serial: Cell<u64>,
}

// STRICT TEARDOWN ORDER:
// - everything created through this device is gone (owners hold an Rc to it)
// - pools and layouts BEFORE the device
// - debug messenger BEFORE the instance
impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            d.device_wait_idle().ok();
            d.destroy_descriptor_pool(self.desc_pool, None);
            d.destroy_descriptor_set_layout(self.texture_layout, None);
            d.destroy_command_pool(self.cmd_pool, None);
            d.destroy_device(None);

            #[cfg(debug_assertions)]
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for this call.
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{msg}");
    } else {
        tracing::debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<Option<DebugState>> {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .context("create_debug_utils_messenger")?;
    Ok(Some((loader, messenger)))
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> Result<Option<DebugState>> {
    Ok(None)
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<Instance> {
    let app = c"Easel";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let mut exts = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    if cfg!(debug_assertions) {
        exts.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    // Validation only when the layer is installed.
    let validation = c"VK_LAYER_KHRONOS_validation";
    let mut layers: Vec<*const std::os::raw::c_char> = Vec::new();
    if cfg!(debug_assertions) {
        let available = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        if available
            .iter()
            .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == validation)
        {
            layers.push(validation.as_ptr());
        } else {
            info!("vk: validation layer not installed");
        }
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    Ok(unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?)
}

unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> GpuResult<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(GpuError::vk("vkEnumeratePhysicalDevices"))?;
    for phys in devices {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (i, q) in qprops.iter().enumerate() {
            let presents = unsafe {
                surf_i.get_physical_device_surface_support(phys, i as u32, surface)
            }
            .unwrap_or(false);
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && presents {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(GpuError::NoSuitableDevice)
}

unsafe fn create_texture_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    Ok(unsafe { device.create_descriptor_set_layout(&ci, None) }
        .context("create texture set layout")?)
}

impl AshDevice {
    /// Creates the instance, a surface for `window` and a device that can
    /// render to and present on it. The surface is handed back separately;
    /// whoever presents to it owns it.
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<(Self, vk::SurfaceKHR)> {
        unsafe { Self::build(window, display) }
    }

    // STRICT ORDER:
    // 1) instance (WSI + debug exts)
    // 2) surface from THIS instance
    // 3) physical device + queue family that can present to THIS surface
    // 4) logical device, pools, layouts
    unsafe fn build(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<(Self, vk::SurfaceKHR)> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::linked();
        let instance = unsafe { create_instance(&entry, dh) }?;
        let debug = unsafe { create_debug_messenger(&entry, &instance) }?;

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) }
            .context("ash_window::create_surface")?;

        let (phys, queue_family) =
            unsafe { pick_device_and_queue(&instance, &surface_loader, surface) }
                .context("select physical device")?;
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

        let priorities = [1.0_f32];
        let qinfo = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };
        let device_exts = [swapchain::NAME.as_ptr()];
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: 1,
            p_queue_create_infos: &qinfo,
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            ..Default::default()
        };
        let device = unsafe { instance.create_device(phys, &dinfo, None) }
            .context("create_device")?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let cmd_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("create_command_pool")?;

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_TEXTURE_BINDINGS,
        };
        let desc_pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets: MAX_TEXTURE_BINDINGS,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        let desc_pool = unsafe { device.create_descriptor_pool(&desc_pool_info, None) }
            .context("create_descriptor_pool")?;
        let texture_layout = unsafe { create_texture_layout(&device) }?;

        let limits = props.limits;
        let msaa = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        let memory = unsafe { instance.get_physical_device_memory_properties(phys) };

        info!(
            "vk: device \"{}\" api {}.{} queue_family {} msaa {:?}",
            name,
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            queue_family,
            msaa
        );

        Ok((
            Self {
                _entry: entry,
                instance,
                debug,
                surface_loader,
                phys,
                device,
                queue_family,
                queue,
                swapchain_loader,
                memory,
                msaa,
                cmd_pool,
                desc_pool,
                texture_layout,
                texture_serial: Cell::new(0),
            },
            surface,
        ))
    }

    /// The raw device, for pipeline creation.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// Set layout of every texture binding: one combined image sampler at
    /// binding 0, visible to the fragment stage.
    pub fn texture_layout(&self) -> vk::DescriptorSetLayout {
        self.texture_layout
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    fn memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> GpuResult<u32> {
        (0..self.memory.memory_type_count)
            .find(|&i| {
                (type_bits & (1 << i)) != 0
                    && self.memory.memory_types[i as usize]
                        .property_flags
                        .contains(flags)
            })
            .ok_or(GpuError::NoMemoryType { type_bits, flags })
    }
}

impl GpuDevice for AshDevice {
    fn surface_capabilities(
        &self,
        surface: vk::SurfaceKHR,
    ) -> GpuResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.phys, surface)
        }
        .map_err(GpuError::vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))
    }

    fn surface_formats(&self, surface: vk::SurfaceKHR) -> GpuResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.phys, surface)
        }
        .map_err(GpuError::vk("vkGetPhysicalDeviceSurfaceFormatsKHR"))
    }

    fn surface_present_modes(
        &self,
        surface: vk::SurfaceKHR,
    ) -> GpuResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.phys, surface)
        }
        .map_err(GpuError::vk("vkGetPhysicalDeviceSurfacePresentModesKHR"))
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, format)
        }
    }

    fn max_msaa_samples(&self) -> vk::SampleCountFlags {
        self.msaa
    }

    fn wait_idle(&self) -> GpuResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(GpuError::vk("vkDeviceWaitIdle"))
    }

    fn queue_wait_idle(&self) -> GpuResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }.map_err(GpuError::vk("vkQueueWaitIdle"))
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> GpuResult<vk::RenderPass> {
        let sub = &desc.subpass;
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: sub.color.len() as u32,
            p_color_attachments: sub.color.as_ptr(),
            p_resolve_attachments: if sub.resolve.is_empty() {
                std::ptr::null()
            } else {
                sub.resolve.as_ptr()
            },
            p_depth_stencil_attachment: sub
                .depth
                .as_ref()
                .map_or(std::ptr::null(), |d| d as *const _),
            ..Default::default()
        };
        let ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: desc.attachments.len() as u32,
            p_attachments: desc.attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: desc.dependencies.len() as u32,
            p_dependencies: desc.dependencies.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_render_pass(&ci, None) }
            .map_err(GpuError::vk("vkCreateRenderPass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> GpuResult<vk::Framebuffer> {
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.create_framebuffer(&ci, None) }
            .map_err(GpuError::vk("vkCreateFramebuffer"))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> GpuResult<vk::ImageView> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&ci, None) }
            .map_err(GpuError::vk("vkCreateImageView"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_texture(&self, desc: &TextureDesc) -> GpuResult<Texture> {
        let ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let d = &self.device;
        unsafe {
            let image = d
                .create_image(&ci, None)
                .map_err(GpuError::vk("vkCreateImage"))?;
            let req = d.get_image_memory_requirements(image);
            let memory = self
                .memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
                .and_then(|memory_type_index| {
                    let alloc = vk::MemoryAllocateInfo {
                        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                        allocation_size: req.size,
                        memory_type_index,
                        ..Default::default()
                    };
                    d.allocate_memory(&alloc, None)
                        .map_err(GpuError::vk("vkAllocateMemory"))
                });
            let memory = match memory {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_image(image, None);
                    return Err(e);
                }
            };
            let view = d
                .bind_image_memory(image, memory, 0)
                .map_err(GpuError::vk("vkBindImageMemory"))
                .and_then(|()| self.create_image_view(image, desc.format, desc.aspect));
            match view {
                Ok(view) => {
                    let serial = self.texture_serial.get() + 1;
                    self.texture_serial.set(serial);
                    Ok(Texture {
                        image,
                        memory,
                        view,
                        extent: desc.extent,
                        format: desc.format,
                        samples: desc.samples,
                        serial,
                    })
                }
                Err(e) => {
                    d.destroy_image(image, None);
                    d.free_memory(memory, None);
                    Err(e)
                }
            }
        }
    }

    fn destroy_texture(&self, texture: &Texture) {
        unsafe {
            self.device.destroy_image_view(texture.view, None);
            self.device.destroy_image(texture.image, None);
            self.device.free_memory(texture.memory, None);
        }
    }

    fn create_sampler(&self) -> GpuResult<vk::Sampler> {
        let ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 0.0,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
            ..Default::default()
        };
        unsafe { self.device.create_sampler(&ci, None) }.map_err(GpuError::vk("vkCreateSampler"))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        let ci = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&ci, None) }
            .map_err(GpuError::vk("vkCreateSemaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&ci, None) }.map_err(GpuError::vk("vkCreateFence"))
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> GpuResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
            .map_err(GpuError::vk("vkWaitForFences"))
    }

    fn reset_fence(&self, fence: vk::Fence) -> GpuResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(GpuError::vk("vkResetFences"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old: vk::SwapchainKHR,
    ) -> GpuResult<vk::SwapchainKHR> {
        // image_usage must match how the images are used; we only render to them.
        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: desc.surface,
            min_image_count: desc.min_image_count,
            image_format: desc.format.format,
            image_color_space: desc.format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: desc.pre_transform,
            composite_alpha: desc.composite_alpha,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.create_swapchain(&ci, None) }
            .map_err(GpuError::vk("vkCreateSwapchainKHR"))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> GpuResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(GpuError::vk("vkGetSwapchainImagesKHR"))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) }
    }

    fn allocate_command_buffers(&self, count: u32) -> GpuResult<Vec<vk::CommandBuffer>> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&ai) }
            .map_err(GpuError::vk("vkAllocateCommandBuffers"))
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(self.cmd_pool, buffers) }
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> GpuResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(GpuError::vk("vkResetCommandBuffer"))
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> GpuResult<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd, &bi) }
            .map_err(GpuError::vk("vkBeginCommandBuffer"))
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> GpuResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }.map_err(GpuError::vk("vkEndCommandBuffer"))
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn cmd_bind_texture(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        binding: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[binding],
                &[],
            )
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        bytes: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, 0, bytes) }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, instance_count, 0, 0) }
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        let b = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: barrier.src_access,
            dst_access_mask: barrier.dst_access,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: barrier.image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: barrier.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[b],
            )
        }
    }

    fn queue_submit(&self, submission: &FrameSubmission) -> GpuResult<()> {
        let (wait, stages): (Vec<vk::Semaphore>, Vec<vk::PipelineStageFlags>) =
            submission.wait.iter().copied().unzip();
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &submission.command_buffer,
            signal_semaphore_count: submission.signal.len() as u32,
            p_signal_semaphores: submission.signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), submission.fence)
        }
        .map_err(GpuError::vk("vkQueueSubmit"))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> GpuResult<Acquire> {
        match unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        } {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(Acquire::Timeout),
            Err(result) => Err(GpuError::Vk {
                op: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> GpuResult<PresentStatus> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.queue, &present) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(result) => Err(GpuError::Vk {
                op: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    fn create_texture_binding(
        &self,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> GpuResult<vk::DescriptorSet> {
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.desc_pool,
            descriptor_set_count: 1,
            p_set_layouts: &self.texture_layout,
            ..Default::default()
        };
        let set = unsafe { self.device.allocate_descriptor_sets(&ai) }
            .map_err(GpuError::vk("vkAllocateDescriptorSets"))?
            .first()
            .copied()
            .ok_or(GpuError::NoHandles("vkAllocateDescriptorSets"))?;
        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(set)
    }

    fn destroy_texture_binding(&self, binding: vk::DescriptorSet) {
        if let Err(e) = unsafe { self.device.free_descriptor_sets(self.desc_pool, &[binding]) } {
            tracing::warn!(error = ?e, "vkFreeDescriptorSets failed");
        }
    }
}
