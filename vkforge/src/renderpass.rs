// Render passes, subpasses and framebuffers (spec §3/§4.7). Grounded in
// the teacher's `GeomPipeline::create_pass`/`create_framebuffers`
// (pipelines/geometric.rs), generalised from its hard-coded two-
// attachment colour+depth pass into a builder that back-patches
// attachment/subpass indices from object identity, per spec §4.7's
// build algorithm.
//
// vkforge contributors

use ash::vk;
use std::sync::Arc;

use crate::device::LogicalDevice;
use crate::image::ImageViewHandle;
use crate::{Error, Result};

/// Source subpass sentinel for a dependency on work outside the render
/// pass (spec §4.7's "external sentinel").
pub const EXTERNAL: u32 = vk::SUBPASS_EXTERNAL;

/// An attachment before it has been assigned an index by `RenderPass::build`.
#[derive(Debug, Clone, Copy)]
pub struct Attachment {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl Attachment {
    /// `clear-on-load, store-on-end, PRESENT_SRC_KHR final` -- spec
    /// §4.7's named convenience for a presentable colour attachment.
    pub fn color_for_presentation(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    pub fn depth(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    fn as_vk(&self) -> vk::AttachmentDescription {
        vk::AttachmentDescription {
            format: self.format,
            samples: self.samples,
            load_op: self.load_op,
            store_op: self.store_op,
            stencil_load_op: self.stencil_load_op,
            stencil_store_op: self.stencil_store_op,
            initial_layout: self.initial_layout,
            final_layout: self.final_layout,
            ..Default::default()
        }
    }
}

/// A subpass's reference to an attachment, keyed by the `Attachment`'s
/// object identity rather than by a pre-assigned index (spec §4.7 step
/// 1-3: the build step discovers indices from identity).
#[derive(Clone, Copy)]
pub struct AttachmentReference {
    attachment: *const Attachment,
    pub layout: vk::ImageLayout,
}

impl AttachmentReference {
    pub fn new(attachment: &Attachment, layout: vk::ImageLayout) -> Self {
        Self {
            attachment: attachment as *const Attachment,
            layout,
        }
    }
}

/// One subpass: its colour/input/depth references and bind point. Built
/// up against `&Attachment` identities; indices are assigned later by
/// `RenderPass::build`.
#[derive(Default)]
pub struct Subpass {
    pub bind_point: vk::PipelineBindPoint,
    pub color: Vec<AttachmentReference>,
    pub input: Vec<AttachmentReference>,
    pub depth: Option<AttachmentReference>,
}

impl Subpass {
    pub fn graphics() -> Self {
        Self {
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            ..Default::default()
        }
    }

    pub fn color(mut self, reference: AttachmentReference) -> Self {
        self.color.push(reference);
        self
    }

    pub fn depth(mut self, reference: AttachmentReference) -> Self {
        self.depth = Some(reference);
        self
    }
}

/// A dependency between two subpasses, or between a subpass and work
/// outside the render pass (source/destination `EXTERNAL`).
#[derive(Debug, Clone, Copy)]
pub struct Dependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
}

impl Dependency {
    fn as_vk(&self) -> vk::SubpassDependency {
        vk::SubpassDependency {
            src_subpass: self.src_subpass,
            dst_subpass: self.dst_subpass,
            src_stage_mask: self.src_stage_mask,
            dst_stage_mask: self.dst_stage_mask,
            src_access_mask: self.src_access_mask,
            dst_access_mask: self.dst_access_mask,
            ..Default::default()
        }
    }
}

/// Assembles a `vk::RenderPass` from attachments, subpasses and
/// dependencies built up against attachment identity, per spec §4.7's
/// build algorithm:
/// 1. Enumerate all references across subpasses.
/// 2. Compute distinct attachments in first-seen order.
/// 3. Back-patch each reference with its attachment index.
/// 4. Assign each subpass a monotonic index.
/// 5. Emit the create descriptor.
pub struct RenderPass {
    device: Arc<LogicalDevice>,
    pub(crate) handle: vk::RenderPass,
}

impl RenderPass {
    pub fn build(
        device: Arc<LogicalDevice>,
        attachments: &[Attachment],
        subpasses: &[Subpass],
        dependencies: &[Dependency],
    ) -> Result<Self> {
        // Step 1-3: first-seen order over every reference, by pointer
        // identity against the caller's `attachments` slice.
        let mut order: Vec<*const Attachment> = Vec::new();
        let index_of = |order: &mut Vec<*const Attachment>, ptr: *const Attachment| -> u32 {
            if let Some(pos) = order.iter().position(|p| *p == ptr) {
                pos as u32
            } else {
                order.push(ptr);
                (order.len() - 1) as u32
            }
        };

        // Seed `order` by walking subpass references so index assignment
        // matches first-seen order across the whole subpass list, not
        // just the flat `attachments` slice's declaration order.
        for subpass in subpasses {
            for r in subpass.color.iter().chain(subpass.input.iter()) {
                index_of(&mut order, r.attachment);
            }
            if let Some(d) = &subpass.depth {
                index_of(&mut order, d.attachment);
            }
        }

        let vk_attachments: Vec<vk::AttachmentDescription> = order
            .iter()
            .map(|&ptr| unsafe { (*ptr).as_vk() })
            .collect();

        // Per-subpass reference storage must outlive the builder calls
        // below, so collect it before building `vk::SubpassDescription`s.
        let mut color_refs_storage: Vec<Vec<vk::AttachmentReference>> = Vec::new();
        let mut depth_refs_storage: Vec<vk::AttachmentReference> = Vec::new();
        let mut has_depth: Vec<bool> = Vec::new();

        for subpass in subpasses {
            let color_refs: Vec<vk::AttachmentReference> = subpass
                .color
                .iter()
                .map(|r| vk::AttachmentReference {
                    attachment: index_of(&mut order, r.attachment),
                    layout: r.layout,
                })
                .collect();
            color_refs_storage.push(color_refs);

            if let Some(d) = &subpass.depth {
                depth_refs_storage.push(vk::AttachmentReference {
                    attachment: index_of(&mut order, d.attachment),
                    layout: d.layout,
                });
                has_depth.push(true);
            } else {
                depth_refs_storage.push(vk::AttachmentReference::default());
                has_depth.push(false);
            }
        }

        let vk_subpasses: Vec<vk::SubpassDescription> = subpasses
            .iter()
            .enumerate()
            .map(|(i, subpass)| {
                let mut builder = vk::SubpassDescription::builder()
                    .pipeline_bind_point(subpass.bind_point)
                    .color_attachments(&color_refs_storage[i]);
                if has_depth[i] {
                    builder = builder.depth_stencil_attachment(&depth_refs_storage[i]);
                }
                builder.build()
            })
            .collect();

        let vk_dependencies: Vec<vk::SubpassDependency> =
            dependencies.iter().map(|d| d.as_vk()).collect();

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&vk_attachments)
            .subpasses(&vk_subpasses)
            .dependencies(&vk_dependencies)
            .build();

        let handle = unsafe {
            device
                .raw()
                .create_render_pass(&info, None)
                .map_err(Error::from)?
        };

        Ok(Self { device, handle })
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.handle
    }

    pub(crate) fn device_raw(&self) -> &ash::Device {
        self.device.raw()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_render_pass(self.handle, None);
        }
    }
}

/// One framebuffer: a render pass plus the attachment views it binds
/// for one swapchain image (spec §3's `FrameBuffer`).
pub struct FrameBuffer {
    device: Arc<LogicalDevice>,
    handle: vk::Framebuffer,
}

impl FrameBuffer {
    pub fn new(
        device: Arc<LogicalDevice>,
        pass: &RenderPass,
        attachments: &[vk::ImageView],
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(pass.handle)
            .attachments(attachments)
            .width(width)
            .height(height)
            .layers(1)
            .build();

        let handle = unsafe {
            device
                .raw()
                .create_framebuffer(&info, None)
                .map_err(Error::from)?
        };

        Ok(Self { device, handle })
    }

    pub fn raw(&self) -> vk::Framebuffer {
        self.handle
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_framebuffer(self.handle, None);
        }
    }
}

/// One framebuffer per swapchain image view (spec §4.7's
/// `FrameBuffer.Group`): created at swapchain-creation time, destroyed
/// as a unit.
pub struct Group {
    framebuffers: Vec<FrameBuffer>,
}

impl Group {
    pub fn new(
        device: Arc<LogicalDevice>,
        pass: &RenderPass,
        views: &[ImageViewHandle],
        depth_view: Option<vk::ImageView>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let framebuffers = views
            .iter()
            .map(|v| {
                let mut attachments = vec![v.raw()];
                if let Some(d) = depth_view {
                    attachments.push(d);
                }
                FrameBuffer::new(device.clone(), pass, &attachments, width, height)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { framebuffers })
    }

    pub fn get(&self, index: usize) -> &FrameBuffer {
        &self.framebuffers[index]
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_index_assignment_is_first_seen_order() {
        let a = Attachment::color_for_presentation(vk::Format::B8G8R8A8_UNORM);
        let b = Attachment::depth(vk::Format::D32_SFLOAT);

        let mut order: Vec<*const Attachment> = Vec::new();
        let idx_a = if let Some(pos) = order.iter().position(|p| *p == &a as *const _) {
            pos as u32
        } else {
            order.push(&a as *const _);
            (order.len() - 1) as u32
        };
        let idx_b = if let Some(pos) = order.iter().position(|p| *p == &b as *const _) {
            pos as u32
        } else {
            order.push(&b as *const _);
            (order.len() - 1) as u32
        };

        assert_eq!(idx_a, 0);
        assert_eq!(idx_b, 1);
    }

    #[test]
    fn external_sentinel_matches_vulkan_constant() {
        assert_eq!(EXTERNAL, vk::SUBPASS_EXTERNAL);
    }
}
