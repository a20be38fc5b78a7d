// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipelines of the demo editor: the scene drawn into the canvas and
//! the textured quad that composites the canvas into the window.
use crate::ash_device::AshDevice;
use crate::device::GpuDevice;
use crate::presenter::Frame;
use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use easel_render::ViewportRegion;
use std::io::Cursor;
use std::rc::Rc;

const TRI_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv"));
const TRI_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv"));
const QUAD_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad.vert.spv"));
const QUAD_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad.frag.spv"));

/// Matches `Push` in quad.vert.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct QuadPush {
    /// x0, y0, x1, y1 in normalized device coordinates.
    rect: [f32; 4],
}

/// Matches `Push` in tri.vert.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ScenePush {
    angle: f32,
    aspect: f32,
}

struct PipelineDesc<'a> {
    vert: &'a [u8],
    frag: &'a [u8],
    render_pass: vk::RenderPass,
    samples: vk::SampleCountFlags,
    depth_test: bool,
    set_layouts: &'a [vk::DescriptorSetLayout],
    push_size: u32,
}

unsafe fn shader_module(device: &ash::Device, bytes: &[u8]) -> Result<vk::ShaderModule> {
    let code = read_spv(&mut Cursor::new(bytes)).context("read_spv")?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(unsafe { device.create_shader_module(&ci, None) }.context("create_shader_module")?)
}

unsafe fn create_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let vs = unsafe { shader_module(device, desc.vert) }?;
    let fs = match unsafe { shader_module(device, desc.frag) } {
        Ok(fs) => fs,
        Err(e) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };
    let result = unsafe { create_pipeline_with(device, desc, vs, fs) };
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }
    result
}

unsafe fn create_pipeline_with(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // Geometry comes from gl_VertexIndex; no vertex buffers.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: desc.samples,
        ..Default::default()
    };
    let depth_on = if desc.depth_test { vk::TRUE } else { vk::FALSE };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: depth_on,
        depth_write_enable: depth_on,
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let push_range = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: desc.push_size,
    };
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: desc.set_layouts.len() as u32,
        p_set_layouts: desc.set_layouts.as_ptr(),
        push_constant_range_count: 1,
        p_push_constant_ranges: &push_range,
        ..Default::default()
    };
    let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
        .context("create_pipeline_layout")?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass: desc.render_pass,
        subpass: 0,
        ..Default::default()
    };
    let created = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    };
    match created {
        Ok(p) => Ok((layout, p[0])),
        Err((_, err)) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(anyhow!("create_graphics_pipelines failed: {:?}", err))
        }
    }
}

/// Maps a pixel region of a `width`x`height` target to NDC corners.
fn ndc_rect(extent: vk::Extent2D, region: ViewportRegion) -> [f32; 4] {
    let w = extent.width.max(1) as f32;
    let h = extent.height.max(1) as f32;
    [
        region.x / w * 2.0 - 1.0,
        region.y / h * 2.0 - 1.0,
        (region.x + region.width) / w * 2.0 - 1.0,
        (region.y + region.height) / h * 2.0 - 1.0,
    ]
}

/// Draws a registered texture into a rectangle of the presented frame.
pub struct Compositor {
    device: Rc<AshDevice>,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl Compositor {
    pub fn new(device: Rc<AshDevice>, render_pass: vk::RenderPass) -> Result<Self> {
        let set_layouts = [device.texture_layout()];
        let (layout, pipeline) = unsafe {
            create_pipeline(
                device.raw(),
                &PipelineDesc {
                    vert: QUAD_VERT,
                    frag: QUAD_FRAG,
                    render_pass,
                    samples: vk::SampleCountFlags::TYPE_1,
                    depth_test: false,
                    set_layouts: &set_layouts,
                    push_size: std::mem::size_of::<QuadPush>() as u32,
                },
            )
        }
        .context("create compositor pipeline")?;
        Ok(Self {
            device,
            layout,
            pipeline,
        })
    }

    pub fn draw(&self, frame: &Frame, binding: vk::DescriptorSet, region: ViewportRegion) {
        let d = &*self.device;
        let cmd = frame.command_buffer();
        let extent = frame.extent();
        d.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        d.cmd_set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );
        d.cmd_bind_pipeline(cmd, self.pipeline);
        d.cmd_bind_texture(cmd, self.layout, binding);
        let push = QuadPush {
            rect: ndc_rect(extent, region),
        };
        d.cmd_push_constants(
            cmd,
            self.layout,
            vk::ShaderStageFlags::VERTEX,
            bytemuck::bytes_of(&push),
        );
        d.cmd_draw(cmd, 6, 1);
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        let d = self.device.raw();
        unsafe {
            d.device_wait_idle().ok();
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// A spinning triangle, rendered into the canvas with depth and MSAA.
pub struct DemoScene {
    device: Rc<AshDevice>,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl DemoScene {
    /// `render_pass` and `samples` come from the canvas the scene draws into.
    pub fn new(
        device: Rc<AshDevice>,
        render_pass: vk::RenderPass,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let (layout, pipeline) = unsafe {
            create_pipeline(
                device.raw(),
                &PipelineDesc {
                    vert: TRI_VERT,
                    frag: TRI_FRAG,
                    render_pass,
                    samples,
                    depth_test: true,
                    set_layouts: &[],
                    push_size: std::mem::size_of::<ScenePush>() as u32,
                },
            )
        }
        .context("create scene pipeline")?;
        Ok(Self {
            device,
            layout,
            pipeline,
        })
    }

    /// Records into a canvas command buffer; viewport and scissor are
    /// already set by the canvas.
    pub fn draw(&self, cmd: vk::CommandBuffer, angle: f32, aspect: f32) {
        let d = &*self.device;
        d.cmd_bind_pipeline(cmd, self.pipeline);
        let push = ScenePush { angle, aspect };
        d.cmd_push_constants(
            cmd,
            self.layout,
            vk::ShaderStageFlags::VERTEX,
            bytemuck::bytes_of(&push),
        );
        d.cmd_draw(cmd, 3, 1);
    }
}

impl Drop for DemoScene {
    fn drop(&mut self) {
        let d = self.device.raw();
        unsafe {
            d.device_wait_idle().ok();
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.layout, None);
        }
    }
}
