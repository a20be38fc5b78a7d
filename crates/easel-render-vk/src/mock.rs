// SPDX-License-Identifier: CEPL-1.0
//! In-memory `GpuDevice` for unit tests.
//!
//! Handles are plain counters. Every object is tracked until destroyed, and
//! any use of a dead handle panics. Submissions are executed on the spot, so
//! render-pass clears, resolves and layout transitions can be observed on the
//! image contents afterwards.
use crate::device::*;
use crate::error::{GpuError, GpuResult};
use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    RenderPass,
    Framebuffer,
    ImageView,
    Image,
    Memory,
    Sampler,
    Semaphore,
    Fence,
    Swapchain,
    Surface,
    CommandBuffer,
    DescriptorSet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    WaitIdle,
    QueueWaitIdle,
    Create(Kind),
    Destroy(Kind),
    Submit,
    Acquire,
    Present(u32),
}

/// Device calls that can be made to fail once with `fail_next`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fail {
    ResetCommandBuffer,
    BeginCommandBuffer,
    EndCommandBuffer,
    Submit,
    Present,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Contents {
    Undefined,
    Color([f32; 4]),
    Depth(f32),
}

#[derive(Clone, Debug)]
pub struct FramebufferInfo {
    pub render_pass: vk::RenderPass,
    pub views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Debug)]
pub struct SwapchainInfo {
    pub images: Vec<vk::Image>,
    pub extent: vk::Extent2D,
    pub old: vk::SwapchainKHR,
    pub present_mode: vk::PresentModeKHR,
}

// No Debug: `vk::ClearValue` is a union.
#[derive(Clone)]
enum Cmd {
    BeginPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        clears: Vec<vk::ClearValue>,
    },
    EndPass,
    Barrier(ImageBarrier),
    Draw,
}

#[derive(Default)]
struct CmdState {
    recording: bool,
    commands: Vec<Cmd>,
}

struct MockState {
    next: u64,
    live: HashMap<u64, Kind>,
    /// When set, destroyed handle values are handed out again, newest first.
    recycle: bool,
    freed: Vec<u64>,
    failures: Vec<Fail>,
    empty_allocations: bool,
    texture_serial: u64,
    calls: Vec<Call>,

    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    modes: Vec<vk::PresentModeKHR>,
    depth_supported: Vec<vk::Format>,
    max_samples: vk::SampleCountFlags,
    image_count_override: Option<u32>,
    acquire_script: VecDeque<Acquire>,
    present_script: VecDeque<PresentStatus>,
    acquire_counter: u32,
    last_acquire_timeout: Option<u64>,

    render_passes: HashMap<u64, RenderPassDesc>,
    framebuffers: HashMap<u64, FramebufferInfo>,
    swapchains: HashMap<u64, SwapchainInfo>,
    textures: HashMap<u64, TextureDesc>,
    views: HashMap<u64, vk::Image>,
    bindings: HashMap<u64, vk::ImageView>,
    fences: HashMap<u64, bool>,
    signaled: HashSet<u64>,
    cmds: HashMap<u64, CmdState>,

    contents: HashMap<u64, Contents>,
    layouts: HashMap<u64, vk::ImageLayout>,
    last_viewport: Option<vk::Viewport>,
    last_scissor: Option<vk::Rect2D>,
    last_framebuffer: Option<vk::Framebuffer>,
    draws: usize,
    submissions: Vec<FrameSubmission>,
}

pub struct MockDevice {
    state: RefCell<MockState>,
}

fn is_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

impl MockDevice {
    pub fn new() -> Self {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 16384,
                height: 16384,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ..Default::default()
        };
        Self {
            state: RefCell::new(MockState {
                next: 1,
                live: HashMap::new(),
                recycle: false,
                freed: Vec::new(),
                failures: Vec::new(),
                empty_allocations: false,
                texture_serial: 0,
                calls: Vec::new(),
                caps,
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                depth_supported: vec![vk::Format::D32_SFLOAT],
                max_samples: vk::SampleCountFlags::TYPE_1
                    | vk::SampleCountFlags::TYPE_2
                    | vk::SampleCountFlags::TYPE_4
                    | vk::SampleCountFlags::TYPE_8,
                image_count_override: None,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                acquire_counter: 0,
                last_acquire_timeout: None,
                render_passes: HashMap::new(),
                framebuffers: HashMap::new(),
                swapchains: HashMap::new(),
                textures: HashMap::new(),
                views: HashMap::new(),
                bindings: HashMap::new(),
                fences: HashMap::new(),
                signaled: HashSet::new(),
                cmds: HashMap::new(),
                contents: HashMap::new(),
                layouts: HashMap::new(),
                last_viewport: None,
                last_scissor: None,
                last_framebuffer: None,
                draws: 0,
                submissions: Vec::new(),
            }),
        }
    }

    // ---- scripting ----

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.make(Kind::Surface)
    }

    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state.borrow_mut().caps.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_image_bounds(&self, min: u32, max: u32) {
        let mut s = self.state.borrow_mut();
        s.caps.min_image_count = min;
        s.caps.max_image_count = max;
    }

    pub fn set_image_count_override(&self, count: Option<u32>) {
        self.state.borrow_mut().image_count_override = count;
    }

    pub fn set_depth_supported(&self, formats: &[vk::Format]) {
        self.state.borrow_mut().depth_supported = formats.to_vec();
    }

    pub fn set_max_samples(&self, samples: vk::SampleCountFlags) {
        self.state.borrow_mut().max_samples = samples;
    }

    pub fn push_acquire(&self, result: Acquire) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    pub fn push_present(&self, result: PresentStatus) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    /// The next call of that kind returns `ERROR_DEVICE_LOST` without any
    /// side effect.
    pub fn fail_next(&self, call: Fail) {
        self.state.borrow_mut().failures.push(call);
    }

    pub fn recycle_handles(&self, on: bool) {
        self.state.borrow_mut().recycle = on;
    }

    /// Command buffer allocation succeeds but returns nothing.
    pub fn set_empty_allocations(&self, on: bool) {
        self.state.borrow_mut().empty_allocations = on;
    }

    // ---- inspection ----

    pub fn live(&self, kind: Kind) -> usize {
        self.state
            .borrow()
            .live
            .values()
            .filter(|&&k| k == kind)
            .count()
    }

    pub fn live_total(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state.borrow().live.contains_key(&handle.as_raw())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|&&c| c == call)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// True when every attachment-backing destroy in the log happened with no
    /// submission outstanding since the last device or queue wait.
    pub fn destroys_follow_idle(&self) -> bool {
        let mut idle = true;
        for call in self.state.borrow().calls.iter() {
            match call {
                Call::Submit => idle = false,
                Call::WaitIdle | Call::QueueWaitIdle => idle = true,
                Call::Destroy(
                    Kind::Framebuffer
                    | Kind::ImageView
                    | Kind::Image
                    | Kind::Memory
                    | Kind::Swapchain
                    | Kind::RenderPass
                    | Kind::Sampler,
                ) if !idle => return false,
                _ => {}
            }
        }
        true
    }

    pub fn swapchain(&self, swapchain: vk::SwapchainKHR) -> SwapchainInfo {
        self.state.borrow().swapchains[&swapchain.as_raw()].clone()
    }

    pub fn framebuffer(&self, framebuffer: vk::Framebuffer) -> FramebufferInfo {
        self.state.borrow().framebuffers[&framebuffer.as_raw()].clone()
    }

    pub fn render_pass_desc(&self, render_pass: vk::RenderPass) -> RenderPassDesc {
        self.state.borrow().render_passes[&render_pass.as_raw()].clone()
    }

    pub fn texture_desc(&self, image: vk::Image) -> TextureDesc {
        self.state.borrow().textures[&image.as_raw()]
    }

    pub fn contents(&self, image: vk::Image) -> Contents {
        self.state
            .borrow()
            .contents
            .get(&image.as_raw())
            .copied()
            .unwrap_or(Contents::Undefined)
    }

    pub fn layout(&self, image: vk::Image) -> vk::ImageLayout {
        self.state
            .borrow()
            .layouts
            .get(&image.as_raw())
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    pub fn binding_view(&self, binding: vk::DescriptorSet) -> vk::ImageView {
        self.state.borrow().bindings[&binding.as_raw()]
    }

    pub fn last_viewport(&self) -> Option<vk::Viewport> {
        self.state.borrow().last_viewport
    }

    pub fn last_scissor(&self) -> Option<vk::Rect2D> {
        self.state.borrow().last_scissor
    }

    /// Framebuffer of the most recently recorded render pass.
    pub fn last_framebuffer(&self) -> Option<vk::Framebuffer> {
        self.state.borrow().last_framebuffer
    }

    pub fn last_acquire_timeout(&self) -> Option<u64> {
        self.state.borrow().last_acquire_timeout
    }

    pub fn draws(&self) -> usize {
        self.state.borrow().draws
    }

    pub fn submissions(&self) -> Vec<FrameSubmission> {
        self.state.borrow().submissions.clone()
    }

    pub fn is_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state.borrow().signaled.contains(&semaphore.as_raw())
    }

    // ---- bookkeeping ----

    fn make<H: Handle>(&self, kind: Kind) -> H {
        let mut s = self.state.borrow_mut();
        let raw = match s.freed.pop() {
            Some(raw) => raw,
            None => {
                s.next += 1;
                s.next - 1
            }
        };
        s.live.insert(raw, kind);
        s.calls.push(Call::Create(kind));
        H::from_raw(raw)
    }

    fn kill<H: Handle>(&self, kind: Kind, handle: H) -> bool {
        let raw = handle.as_raw();
        if raw == 0 {
            return false;
        }
        let mut s = self.state.borrow_mut();
        match s.live.remove(&raw) {
            Some(k) if k == kind => {}
            other => panic!("destroying {kind:?} {raw:#x}, found {other:?}"),
        }
        if s.recycle {
            s.freed.push(raw);
        }
        s.calls.push(Call::Destroy(kind));
        true
    }

    fn injected(&self, call: Fail, op: &'static str) -> GpuResult<()> {
        let mut s = self.state.borrow_mut();
        match s.failures.iter().position(|&f| f == call) {
            Some(i) => {
                s.failures.remove(i);
                Err(GpuError::Vk {
                    op,
                    result: vk::Result::ERROR_DEVICE_LOST,
                })
            }
            None => Ok(()),
        }
    }

    fn check<H: Handle>(&self, kind: Kind, handle: H) {
        let raw = handle.as_raw();
        match self.state.borrow().live.get(&raw) {
            Some(&k) if k == kind => {}
            other => panic!("use of {kind:?} {raw:#x}, found {other:?}"),
        }
    }

    fn check_image(&self, image: vk::Image) {
        let s = self.state.borrow();
        let raw = image.as_raw();
        let owned = s.live.get(&raw) == Some(&Kind::Image);
        let presentable = s.swapchains.values().any(|sc| sc.images.contains(&image));
        assert!(owned || presentable, "use of dead image {raw:#x}");
    }

    fn record(&self, cmd: vk::CommandBuffer, command: Cmd) {
        self.check(Kind::CommandBuffer, cmd);
        let mut s = self.state.borrow_mut();
        let state = s.cmds.entry(cmd.as_raw()).or_default();
        assert!(state.recording, "recording into {cmd:?} outside begin/end");
        state.commands.push(command);
    }

    fn execute(&self, commands: Vec<Cmd>) {
        let mut s = self.state.borrow_mut();
        let mut pass: Option<(RenderPassDesc, Vec<vk::Image>)> = None;
        for command in commands {
            match command {
                Cmd::BeginPass {
                    render_pass,
                    framebuffer,
                    clears,
                } => {
                    assert!(pass.is_none(), "nested render pass");
                    let desc = s.render_passes[&render_pass.as_raw()].clone();
                    let fb = s.framebuffers[&framebuffer.as_raw()].clone();
                    let images: Vec<vk::Image> =
                        fb.views.iter().map(|v| s.views[&v.as_raw()]).collect();
                    for (i, att) in desc.attachments.iter().enumerate() {
                        let image = images[i].as_raw();
                        let current = s
                            .layouts
                            .get(&image)
                            .copied()
                            .unwrap_or(vk::ImageLayout::UNDEFINED);
                        assert!(
                            att.initial_layout == vk::ImageLayout::UNDEFINED
                                || att.initial_layout == current,
                            "attachment {i} expected {:?}, image is {current:?}",
                            att.initial_layout
                        );
                        let loaded = if att.load_op == vk::AttachmentLoadOp::CLEAR {
                            let cv = clears
                                .get(i)
                                .copied()
                                .unwrap_or_else(|| panic!("no clear value for attachment {i}"));
                            if is_depth(att.format) {
                                Contents::Depth(unsafe { cv.depth_stencil.depth })
                            } else {
                                Contents::Color(unsafe { cv.color.float32 })
                            }
                        } else if att.load_op == vk::AttachmentLoadOp::LOAD {
                            s.contents.get(&image).copied().unwrap_or(Contents::Undefined)
                        } else {
                            Contents::Undefined
                        };
                        s.contents.insert(image, loaded);
                    }
                    pass = Some((desc, images));
                }
                Cmd::EndPass => {
                    let (desc, images) = pass.take().expect("end without begin");
                    for (color, resolve) in
                        desc.subpass.color.iter().zip(desc.subpass.resolve.iter())
                    {
                        let src = images[color.attachment as usize].as_raw();
                        let dst = images[resolve.attachment as usize].as_raw();
                        let value = s.contents.get(&src).copied().unwrap_or(Contents::Undefined);
                        s.contents.insert(dst, value);
                    }
                    for (i, att) in desc.attachments.iter().enumerate() {
                        let image = images[i].as_raw();
                        if att.store_op == vk::AttachmentStoreOp::DONT_CARE {
                            s.contents.insert(image, Contents::Undefined);
                        }
                        s.layouts.insert(image, att.final_layout);
                    }
                }
                Cmd::Barrier(b) => {
                    let raw = b.image.as_raw();
                    let current = s
                        .layouts
                        .get(&raw)
                        .copied()
                        .unwrap_or(vk::ImageLayout::UNDEFINED);
                    assert!(
                        b.old_layout == vk::ImageLayout::UNDEFINED || b.old_layout == current,
                        "barrier from {:?}, image is {current:?}",
                        b.old_layout
                    );
                    if b.old_layout == vk::ImageLayout::UNDEFINED {
                        s.contents.insert(raw, Contents::Undefined);
                    }
                    s.layouts.insert(raw, b.new_layout);
                }
                Cmd::Draw => s.draws += 1,
            }
        }
        assert!(pass.is_none(), "render pass left open at submit");
    }
}

impl GpuDevice for MockDevice {
    fn surface_capabilities(
        &self,
        surface: vk::SurfaceKHR,
    ) -> GpuResult<vk::SurfaceCapabilitiesKHR> {
        self.check(Kind::Surface, surface);
        Ok(self.state.borrow().caps)
    }

    fn surface_formats(&self, surface: vk::SurfaceKHR) -> GpuResult<Vec<vk::SurfaceFormatKHR>> {
        self.check(Kind::Surface, surface);
        Ok(self.state.borrow().formats.clone())
    }

    fn surface_present_modes(
        &self,
        surface: vk::SurfaceKHR,
    ) -> GpuResult<Vec<vk::PresentModeKHR>> {
        self.check(Kind::Surface, surface);
        Ok(self.state.borrow().modes.clone())
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let supported = self.state.borrow().depth_supported.contains(&format);
        vk::FormatProperties {
            optimal_tiling_features: if supported {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    fn max_msaa_samples(&self) -> vk::SampleCountFlags {
        self.state.borrow().max_samples
    }

    fn wait_idle(&self) -> GpuResult<()> {
        self.state.borrow_mut().calls.push(Call::WaitIdle);
        Ok(())
    }

    fn queue_wait_idle(&self) -> GpuResult<()> {
        self.state.borrow_mut().calls.push(Call::QueueWaitIdle);
        Ok(())
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> GpuResult<vk::RenderPass> {
        let sub = &desc.subpass;
        let n = desc.attachments.len() as u32;
        assert!(
            sub.resolve.is_empty() || sub.resolve.len() == sub.color.len(),
            "resolve references must pair with color references"
        );
        for r in sub.color.iter().chain(sub.resolve.iter()).chain(sub.depth.iter()) {
            assert!(r.attachment < n, "reference to missing attachment {}", r.attachment);
        }
        let rp: vk::RenderPass = self.make(Kind::RenderPass);
        self.state
            .borrow_mut()
            .render_passes
            .insert(rp.as_raw(), desc.clone());
        Ok(rp)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        if self.kill(Kind::RenderPass, render_pass) {
            self.state
                .borrow_mut()
                .render_passes
                .remove(&render_pass.as_raw());
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> GpuResult<vk::Framebuffer> {
        self.check(Kind::RenderPass, render_pass);
        for &view in attachments {
            self.check(Kind::ImageView, view);
        }
        let expected = self.state.borrow().render_passes[&render_pass.as_raw()]
            .attachments
            .len();
        assert_eq!(attachments.len(), expected, "framebuffer attachment count");
        assert!(extent.width > 0 && extent.height > 0, "zero-sized framebuffer");
        let fb: vk::Framebuffer = self.make(Kind::Framebuffer);
        self.state.borrow_mut().framebuffers.insert(
            fb.as_raw(),
            FramebufferInfo {
                render_pass,
                views: attachments.to_vec(),
                extent,
            },
        );
        Ok(fb)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        if self.kill(Kind::Framebuffer, framebuffer) {
            self.state
                .borrow_mut()
                .framebuffers
                .remove(&framebuffer.as_raw());
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> GpuResult<vk::ImageView> {
        self.check_image(image);
        let view: vk::ImageView = self.make(Kind::ImageView);
        self.state.borrow_mut().views.insert(view.as_raw(), image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        if self.kill(Kind::ImageView, view) {
            self.state.borrow_mut().views.remove(&view.as_raw());
        }
    }

    fn create_texture(&self, desc: &TextureDesc) -> GpuResult<Texture> {
        assert!(
            desc.extent.width > 0 && desc.extent.height > 0,
            "zero-sized texture"
        );
        let image: vk::Image = self.make(Kind::Image);
        let memory: vk::DeviceMemory = self.make(Kind::Memory);
        self.state.borrow_mut().textures.insert(image.as_raw(), *desc);
        let view = self.create_image_view(image, desc.format, desc.aspect)?;
        let serial = {
            let mut s = self.state.borrow_mut();
            s.texture_serial += 1;
            s.texture_serial
        };
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

    fn destroy_texture(&self, texture: &Texture) {
        self.destroy_image_view(texture.view);
        if self.kill(Kind::Image, texture.image) {
            let mut s = self.state.borrow_mut();
            let raw = texture.image.as_raw();
            s.textures.remove(&raw);
            s.contents.remove(&raw);
            s.layouts.remove(&raw);
        }
        self.kill(Kind::Memory, texture.memory);
    }

    fn create_sampler(&self) -> GpuResult<vk::Sampler> {
        Ok(self.make(Kind::Sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.kill(Kind::Sampler, sampler);
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        Ok(self.make(Kind::Semaphore))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        if self.kill(Kind::Semaphore, semaphore) {
            self.state.borrow_mut().signaled.remove(&semaphore.as_raw());
        }
    }

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        let fence: vk::Fence = self.make(Kind::Fence);
        self.state
            .borrow_mut()
            .fences
            .insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> GpuResult<()> {
        self.check(Kind::Fence, fence);
        let signaled = self.state.borrow().fences[&fence.as_raw()];
        if signaled {
            Ok(())
        } else {
            Err(GpuError::Vk {
                op: "vkWaitForFences",
                result: vk::Result::TIMEOUT,
            })
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> GpuResult<()> {
        self.check(Kind::Fence, fence);
        self.state
            .borrow_mut()
            .fences
            .insert(fence.as_raw(), false);
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        if self.kill(Kind::Fence, fence) {
            self.state.borrow_mut().fences.remove(&fence.as_raw());
        }
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old: vk::SwapchainKHR,
    ) -> GpuResult<vk::SwapchainKHR> {
        self.check(Kind::Surface, desc.surface);
        if old != vk::SwapchainKHR::null() {
            self.check(Kind::Swapchain, old);
        }
        assert!(
            desc.extent.width > 0 && desc.extent.height > 0,
            "zero-sized swapchain"
        );
        let count = self
            .state
            .borrow()
            .image_count_override
            .unwrap_or(desc.min_image_count);
        let swapchain: vk::SwapchainKHR = self.make(Kind::Swapchain);
        let mut s = self.state.borrow_mut();
        let images = (0..count)
            .map(|_| {
                let raw = s.next;
                s.next += 1;
                vk::Image::from_raw(raw)
            })
            .collect();
        s.swapchains.insert(
            swapchain.as_raw(),
            SwapchainInfo {
                images,
                extent: desc.extent,
                old,
                present_mode: desc.present_mode,
            },
        );
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> GpuResult<Vec<vk::Image>> {
        self.check(Kind::Swapchain, swapchain);
        Ok(self.state.borrow().swapchains[&swapchain.as_raw()]
            .images
            .clone())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if self.kill(Kind::Swapchain, swapchain) {
            let mut s = self.state.borrow_mut();
            if let Some(info) = s.swapchains.remove(&swapchain.as_raw()) {
                let alive: HashSet<u64> = s.views.values().map(|i| i.as_raw()).collect();
                for image in info.images {
                    assert!(
                        !alive.contains(&image.as_raw()),
                        "swapchain destroyed while views of its images are alive"
                    );
                    s.contents.remove(&image.as_raw());
                    s.layouts.remove(&image.as_raw());
                }
            }
        }
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        self.kill(Kind::Surface, surface);
    }

    fn allocate_command_buffers(&self, count: u32) -> GpuResult<Vec<vk::CommandBuffer>> {
        if self.state.borrow().empty_allocations {
            return Ok(Vec::new());
        }
        Ok((0..count)
            .map(|_| {
                let cmd: vk::CommandBuffer = self.make(Kind::CommandBuffer);
                self.state
                    .borrow_mut()
                    .cmds
                    .insert(cmd.as_raw(), CmdState::default());
                cmd
            })
            .collect())
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        for &cmd in buffers {
            if self.kill(Kind::CommandBuffer, cmd) {
                self.state.borrow_mut().cmds.remove(&cmd.as_raw());
            }
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> GpuResult<()> {
        self.check(Kind::CommandBuffer, cmd);
        self.injected(Fail::ResetCommandBuffer, "vkResetCommandBuffer")?;
        self.state
            .borrow_mut()
            .cmds
            .insert(cmd.as_raw(), CmdState::default());
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> GpuResult<()> {
        self.check(Kind::CommandBuffer, cmd);
        self.injected(Fail::BeginCommandBuffer, "vkBeginCommandBuffer")?;
        let mut s = self.state.borrow_mut();
        let state = s.cmds.entry(cmd.as_raw()).or_default();
        assert!(!state.recording, "begin on a recording command buffer");
        state.recording = true;
        state.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> GpuResult<()> {
        self.check(Kind::CommandBuffer, cmd);
        self.injected(Fail::EndCommandBuffer, "vkEndCommandBuffer")?;
        let mut s = self.state.borrow_mut();
        let state = s.cmds.entry(cmd.as_raw()).or_default();
        assert!(state.recording, "end on an idle command buffer");
        state.recording = false;
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.check(Kind::RenderPass, render_pass);
        self.check(Kind::Framebuffer, framebuffer);
        let fb = self.framebuffer(framebuffer);
        assert_eq!(fb.render_pass, render_pass, "framebuffer from another pass");
        assert_eq!(
            (fb.extent.width, fb.extent.height),
            (extent.width, extent.height),
            "render area must match the framebuffer"
        );
        self.state.borrow_mut().last_framebuffer = Some(framebuffer);
        self.record(
            cmd,
            Cmd::BeginPass {
                render_pass,
                framebuffer,
                clears: clear_values.to_vec(),
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.record(cmd, Cmd::EndPass);
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.check(Kind::CommandBuffer, cmd);
        self.state.borrow_mut().last_viewport = Some(viewport);
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.check(Kind::CommandBuffer, cmd);
        self.state.borrow_mut().last_scissor = Some(scissor);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, _pipeline: vk::Pipeline) {
        self.check(Kind::CommandBuffer, cmd);
    }

    fn cmd_bind_texture(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        binding: vk::DescriptorSet,
    ) {
        self.check(Kind::CommandBuffer, cmd);
        self.check(Kind::DescriptorSet, binding);
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _bytes: &[u8],
    ) {
        self.check(Kind::CommandBuffer, cmd);
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, _vertex_count: u32, _instance_count: u32) {
        self.record(cmd, Cmd::Draw);
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.check_image(barrier.image);
        self.record(cmd, Cmd::Barrier(*barrier));
    }

    fn queue_submit(&self, submission: &FrameSubmission) -> GpuResult<()> {
        let cmd = submission.command_buffer;
        self.check(Kind::CommandBuffer, cmd);
        for &(sem, _) in &submission.wait {
            self.check(Kind::Semaphore, sem);
        }
        for &sem in &submission.signal {
            self.check(Kind::Semaphore, sem);
        }
        if submission.fence != vk::Fence::null() {
            self.check(Kind::Fence, submission.fence);
        }
        self.injected(Fail::Submit, "vkQueueSubmit")?;

        let commands = {
            let mut s = self.state.borrow_mut();
            let state = s.cmds.entry(cmd.as_raw()).or_default();
            assert!(!state.recording, "submit of a command buffer still recording");
            let commands = state.commands.clone();

            for &(sem, _) in &submission.wait {
                assert!(
                    s.signaled.remove(&sem.as_raw()),
                    "wait on a semaphore nobody signaled"
                );
            }
            for &sem in &submission.signal {
                assert!(
                    s.signaled.insert(sem.as_raw()),
                    "signal of an already signaled semaphore"
                );
            }
            if submission.fence != vk::Fence::null() {
                let was = s.fences.insert(submission.fence.as_raw(), true);
                assert_eq!(was, Some(false), "submit with a signaled fence");
            }
            s.calls.push(Call::Submit);
            s.submissions.push(submission.clone());
            commands
        };
        self.execute(commands);
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> GpuResult<Acquire> {
        self.check(Kind::Swapchain, swapchain);
        self.check(Kind::Semaphore, signal);
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::Acquire);
        s.last_acquire_timeout = Some(timeout_ns);
        let count = s.swapchains[&swapchain.as_raw()].images.len() as u32;
        let result = match s.acquire_script.pop_front() {
            Some(scripted) => scripted,
            None => {
                let index = s.acquire_counter % count;
                s.acquire_counter += 1;
                Acquire::Image {
                    index,
                    suboptimal: false,
                }
            }
        };
        if let Acquire::Image { index, .. } = result {
            assert!(index < count, "acquired index out of range");
            assert!(
                s.signaled.insert(signal.as_raw()),
                "acquire signals an already signaled semaphore"
            );
        }
        Ok(result)
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> GpuResult<PresentStatus> {
        self.check(Kind::Swapchain, swapchain);
        self.check(Kind::Semaphore, wait);
        self.injected(Fail::Present, "vkQueuePresentKHR")?;
        let mut s = self.state.borrow_mut();
        let image = s.swapchains[&swapchain.as_raw()].images[image_index as usize];
        let layout = s
            .layouts
            .get(&image.as_raw())
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED);
        assert_eq!(
            layout,
            vk::ImageLayout::PRESENT_SRC_KHR,
            "presenting an image that is not in PRESENT_SRC"
        );
        assert!(
            s.signaled.remove(&wait.as_raw()),
            "present waits on a semaphore nobody signaled"
        );
        s.calls.push(Call::Present(image_index));
        Ok(s
            .present_script
            .pop_front()
            .unwrap_or(PresentStatus::Optimal))
    }

    fn create_texture_binding(
        &self,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> GpuResult<vk::DescriptorSet> {
        self.check(Kind::ImageView, view);
        self.check(Kind::Sampler, sampler);
        let set: vk::DescriptorSet = self.make(Kind::DescriptorSet);
        self.state.borrow_mut().bindings.insert(set.as_raw(), view);
        Ok(set)
    }

    fn destroy_texture_binding(&self, binding: vk::DescriptorSet) {
        if self.kill(Kind::DescriptorSet, binding) {
            self.state.borrow_mut().bindings.remove(&binding.as_raw());
        }
    }
}
