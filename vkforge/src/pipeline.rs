// Graphics pipeline construction (spec §3/§4.8). Grounded in the
// teacher's `GeomPipeline::create_pipeline`/`create_shader_stages`
// (pipelines/geometric.rs), generalised from its one hard-coded
// vertex+fragment, single-binding pipeline into per-stage sub-builders
// that return their own create-info, matching spec §4.8's description.
//
// vkforge contributors

use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use crate::device::LogicalDevice;
use crate::{Error, Result};

/// An abstract primitive topology, mapped to `vk::PrimitiveTopology`
/// (spec §4.8's Input Assembly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Point,
    Line,
    LineStrip,
    Triangle,
    TriangleStrip,
    TriangleFan,
    Patch,
}

impl Primitive {
    fn as_vk(&self) -> vk::PrimitiveTopology {
        match self {
            Primitive::Point => vk::PrimitiveTopology::POINT_LIST,
            Primitive::Line => vk::PrimitiveTopology::LINE_LIST,
            Primitive::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Primitive::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
            Primitive::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Primitive::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
            Primitive::Patch => vk::PrimitiveTopology::PATCH_LIST,
        }
    }
}

/// One component of a compound vertex layout: `(size, element-type,
/// signed, bytes-per-component)` (spec §4.8's `VertexInput::add`).
#[derive(Debug, Clone, Copy)]
pub struct ComponentLayout {
    pub size: u32,
    pub format: vk::Format,
}

impl ComponentLayout {
    pub fn new(size: u32, format: vk::Format) -> Self {
        Self { size, format }
    }
}

/// Vertex bindings and attributes (spec §4.8's "Vertex input").
#[derive(Default)]
pub struct VertexInput {
    bindings: Vec<vk::VertexInputBindingDescription>,
    attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binding(
        mut self,
        binding: u32,
        stride: u32,
        input_rate: vk::VertexInputRate,
    ) -> Self {
        self.bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate,
        });
        self
    }

    pub fn attribute(mut self, binding: u32, location: u32, format: vk::Format, offset: u32) -> Self {
        self.attributes.push(vk::VertexInputAttributeDescription {
            binding,
            location,
            format,
            offset,
        });
        self
    }

    /// Derives one binding plus one attribute per component from a
    /// compound layout, at `binding` with `VERTEX` input rate (spec
    /// §4.8's `add(layout)` helper).
    pub fn add(mut self, binding: u32, layout: &[ComponentLayout]) -> Self {
        let stride: u32 = layout.iter().map(|c| c.size).sum();
        self.bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate: vk::VertexInputRate::VERTEX,
        });

        let mut offset = 0u32;
        for (location, component) in layout.iter().enumerate() {
            self.attributes.push(vk::VertexInputAttributeDescription {
                binding,
                location: location as u32,
                format: component.format,
                offset,
            });
            offset += component.size;
        }
        self
    }

    fn as_vk(&self) -> vk::PipelineVertexInputStateCreateInfo {
        vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.bindings)
            .vertex_attribute_descriptions(&self.attributes)
            .build()
    }
}

/// Topology plus primitive-restart flag (spec §4.8's "Input assembly").
#[derive(Debug, Clone, Copy)]
pub struct InputAssembly {
    pub primitive: Primitive,
    pub primitive_restart: bool,
}

impl InputAssembly {
    pub fn new(primitive: Primitive) -> Self {
        Self {
            primitive,
            primitive_restart: false,
        }
    }

    fn as_vk(&self) -> vk::PipelineInputAssemblyStateCreateInfo {
        vk::PipelineInputAssemblyStateCreateInfo {
            topology: self.primitive.as_vk(),
            primitive_restart_enable: self.primitive_restart as vk::Bool32,
            ..Default::default()
        }
    }
}

/// An ordered list of viewports and a matching ordered list of scissor
/// rectangles; the lists must be equal length and nonzero (spec §4.8's
/// "Viewport" invariant).
pub struct ViewportState {
    viewports: Vec<vk::Viewport>,
    scissors: Vec<vk::Rect2D>,
}

impl ViewportState {
    pub fn new(viewports: Vec<vk::Viewport>, scissors: Vec<vk::Rect2D>) -> Result<Self> {
        if viewports.is_empty() || viewports.len() != scissors.len() {
            return Err(Error::Other(anyhow::anyhow!(
                "viewport/scissor lists must be equal length and nonzero ({} vs {})",
                viewports.len(),
                scissors.len()
            )));
        }
        Ok(Self {
            viewports,
            scissors,
        })
    }

    /// A single viewport spanning `extent`, with a matching full-extent
    /// scissor -- the shape every single-pass render target needs.
    pub fn single(extent: vk::Extent2D) -> Result<Self> {
        Self::new(
            vec![vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
            vec![vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            }],
        )
    }

    fn as_vk(&self) -> vk::PipelineViewportStateCreateInfo {
        vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&self.viewports)
            .scissors(&self.scissors)
            .build()
    }
}

/// Cull mode, front face, polygon mode, line width (spec §4.8's
/// "Rasterizer").
#[derive(Debug, Clone, Copy)]
pub struct Rasterizer {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub polygon_mode: vk::PolygonMode,
    pub line_width: f32,
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            polygon_mode: vk::PolygonMode::FILL,
            line_width: 1.0,
        }
    }
}

impl Rasterizer {
    fn as_vk(&self) -> vk::PipelineRasterizationStateCreateInfo {
        vk::PipelineRasterizationStateCreateInfo {
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            polygon_mode: self.polygon_mode,
            line_width: self.line_width,
            ..Default::default()
        }
    }
}

/// Depth/stencil test configuration (spec §4.8's "Depth/stencil,
/// blend" -- "straightforward mirrors of native descriptors with
/// defaults").
#[derive(Debug, Clone, Copy)]
pub struct DepthStencil {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
}

impl Default for DepthStencil {
    fn default() -> Self {
        Self {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: vk::CompareOp::LESS,
        }
    }
}

impl DepthStencil {
    fn as_vk(&self) -> vk::PipelineDepthStencilStateCreateInfo {
        vk::PipelineDepthStencilStateCreateInfo {
            depth_test_enable: self.depth_test_enable as vk::Bool32,
            depth_write_enable: self.depth_write_enable as vk::Bool32,
            depth_compare_op: self.depth_compare_op,
            ..Default::default()
        }
    }
}

/// One colour attachment's blend configuration.
#[derive(Debug, Clone, Copy)]
pub struct BlendAttachment {
    pub blend_enable: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
}

impl BlendAttachment {
    /// Straight alpha-over blending: `src*alpha + dst*(1-alpha)`.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
        }
    }

    pub fn disabled() -> Self {
        Self {
            blend_enable: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
        }
    }

    fn as_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable as vk::Bool32,
            src_color_blend_factor: self.src_color,
            dst_color_blend_factor: self.dst_color,
            color_blend_op: self.color_op,
            src_alpha_blend_factor: self.src_alpha,
            dst_alpha_blend_factor: self.dst_alpha,
            alpha_blend_op: self.alpha_op,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

/// `patchControlPoints`; the descriptor is omitted entirely from the
/// pipeline when zero (spec §4.8's "Tesselation").
#[derive(Debug, Clone, Copy, Default)]
pub struct Tesselation {
    pub patch_control_points: u32,
}

/// A shader stage enumeration, addressed one module per stage; only
/// `Vertex` is mandatory (spec §4.8's "Programmable stages").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEvaluation,
}

impl ShaderStage {
    fn as_vk(&self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        }
    }
}

/// A SPIR-V module plus its entry-point name (spec §4.8 -- default
/// entry point `"main"`).
pub struct ShaderModule {
    device: Arc<LogicalDevice>,
    handle: vk::ShaderModule,
    entry_point: CString,
}

impl ShaderModule {
    pub fn new(device: Arc<LogicalDevice>, spirv: &[u32], entry_point: &str) -> Result<Self> {
        let info = vk::ShaderModuleCreateInfo::builder().code(spirv).build();
        let handle = unsafe {
            device
                .raw()
                .create_shader_module(&info, None)
                .map_err(Error::from)?
        };
        let entry_point = CString::new(entry_point)
            .map_err(|e| Error::Other(anyhow::anyhow!(e)))?;

        Ok(Self {
            device,
            handle,
            entry_point,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_shader_module(self.handle, None);
        }
    }
}

/// Descriptor-set layouts (ordered) plus push-constant ranges (spec
/// §4.8's "Layout").
pub struct PipelineLayout {
    device: Arc<LogicalDevice>,
    pub(crate) handle: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<LogicalDevice>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges)
            .build();

        let handle = unsafe {
            device
                .raw()
                .create_pipeline_layout(&info, None)
                .map_err(Error::from)?
        };

        Ok(Self { device, handle })
    }

    pub fn raw(&self) -> vk::PipelineLayout {
        self.handle
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_pipeline_layout(self.handle, None);
        }
    }
}

/// Everything `Pipeline::build` needs, assembled by the caller before a
/// single `vkCreateGraphicsPipelines` call (spec §4.8).
pub struct PipelineDescriptor<'a> {
    pub vertex_input: VertexInput,
    pub input_assembly: InputAssembly,
    pub viewport: ViewportState,
    pub rasterizer: Rasterizer,
    pub depth_stencil: Option<DepthStencil>,
    pub blend_attachments: Vec<BlendAttachment>,
    pub tesselation: Option<Tesselation>,
    pub stages: Vec<(ShaderStage, &'a ShaderModule)>,
    pub layout: &'a PipelineLayout,
    pub render_pass: vk::RenderPass,
}

/// A built graphics pipeline (spec §3's `Pipeline`).
pub struct Pipeline {
    device: Arc<LogicalDevice>,
    handle: vk::Pipeline,
}

impl Pipeline {
    pub fn build(device: Arc<LogicalDevice>, desc: PipelineDescriptor) -> Result<Self> {
        if !desc.stages.iter().any(|(s, _)| *s == ShaderStage::Vertex) {
            return Err(Error::Other(anyhow::anyhow!(
                "pipeline requires a VERTEX stage"
            )));
        }

        let vk_stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.as_vk())
                    .module(module.handle)
                    .name(&module.entry_point)
                    .build()
            })
            .collect();

        let vertex_info = desc.vertex_input.as_vk();
        let assembly_info = desc.input_assembly.as_vk();
        let viewport_info = desc.viewport.as_vk();
        let raster_info = desc.rasterizer.as_vk();

        let multisample_info = vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };

        let depth_info = desc.depth_stencil.unwrap_or_default().as_vk();

        let blend_states: Vec<vk::PipelineColorBlendAttachmentState> =
            desc.blend_attachments.iter().map(|b| b.as_vk()).collect();
        let blend_info = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_states)
            .build();

        let tess_info = desc
            .tesselation
            .filter(|t| t.patch_control_points != 0)
            .map(|t| {
                vk::PipelineTessellationStateCreateInfo::builder()
                    .patch_control_points(t.patch_control_points)
                    .build()
            });

        let mut builder = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&vk_stages)
            .vertex_input_state(&vertex_info)
            .input_assembly_state(&assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&raster_info)
            .multisample_state(&multisample_info)
            .depth_stencil_state(&depth_info)
            .color_blend_state(&blend_info)
            .layout(desc.layout.handle)
            .render_pass(desc.render_pass);

        if let Some(tess) = tess_info.as_ref() {
            builder = builder.tessellation_state(tess);
        }

        let info = builder.build();

        let handles = unsafe {
            device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, e)| Error::from(e))?
        };

        Ok(Self {
            device,
            handle: handles[0],
        })
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.handle
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_pipeline(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_state_rejects_mismatched_lengths() {
        let result = ViewportState::new(
            vec![vk::Viewport::default(), vk::Viewport::default()],
            vec![vk::Rect2D::default()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn viewport_state_rejects_empty() {
        let result = ViewportState::new(vec![], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn vertex_input_add_derives_tightly_packed_offsets() {
        let layout = [
            ComponentLayout::new(8, vk::Format::R32G32_SFLOAT),
            ComponentLayout::new(8, vk::Format::R32G32_SFLOAT),
        ];
        let input = VertexInput::new().add(0, &layout);
        assert_eq!(input.bindings[0].stride, 16);
        assert_eq!(input.attributes[0].offset, 0);
        assert_eq!(input.attributes[1].offset, 8);
    }

    #[test]
    fn tesselation_is_skipped_when_zero() {
        let tess = Tesselation {
            patch_control_points: 0,
        };
        assert!(Some(tess).filter(|t| t.patch_control_points != 0).is_none());
    }
}
