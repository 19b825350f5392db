// Images, image views and samplers (spec §3/§4.4). Grounded in the
// teacher's `Device::create_image`/`transition_image_layout`/
// `create_sampler` (device.rs), rebuilt against the pooled `Allocator`
// instead of one `vkAllocateMemory` call per image, and against the
// typed `SubResource`/`CopyRegion` the spec names instead of the
// teacher's ad hoc per-call `vk::ImageSubresourceRange` construction.
//
// vkforge contributors

use ash::vk;
use std::sync::Arc;

use crate::command::CommandPool;
use crate::device::LogicalDevice;
use crate::marshal::component_mapping;
use crate::{Error, Result};

/// `(type, format, extents, aspect-set, mip-levels, array-layers)` --
/// spec §3's `Image` descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ImageDescriptor {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub aspect_mask: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl ImageDescriptor {
    /// A simple 2D, single-mip, single-layer colour image descriptor --
    /// what every texture-upload and render-target path in this crate
    /// actually needs.
    pub fn texture_2d(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
            array_layers: 1,
        }
    }

    pub fn depth_2d(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            ..Self::texture_2d(format, width, height)
        }
    }
}

/// `(aspect-set, mipLevel, levelCount, baseArrayLayer, layerCount)` --
/// must be a subset of its parent image's descriptor (spec §3/§4.4).
#[derive(Debug, Clone, Copy)]
pub struct SubResource {
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl SubResource {
    pub fn whole(desc: &ImageDescriptor) -> Self {
        Self {
            aspect_mask: desc.aspect_mask,
            base_mip_level: 0,
            level_count: desc.mip_levels,
            base_array_layer: 0,
            layer_count: desc.array_layers,
        }
    }

    /// The range form used by pipeline barriers and image views.
    pub fn as_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect_mask,
            base_mip_level: self.base_mip_level,
            level_count: self.level_count,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }

    /// The layers form used by buffer<->image copies.
    pub fn as_layers(&self, mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect_mask,
            mip_level,
            base_array_layer: self.base_array_layer,
            layer_count: self.layer_count,
        }
    }
}

/// `vkCmdCopyBufferToImage`/`vkCmdCopyImageToBuffer` region (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct CopyRegion {
    pub buffer_offset: u64,
    pub row_length: u32,
    pub image_height: u32,
    pub sub_resource: SubResource,
    pub image_offset: vk::Offset3D,
    pub image_extent: vk::Extent3D,
}

impl CopyRegion {
    fn as_vk(&self, mip_level: u32) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset: self.buffer_offset,
            buffer_row_length: self.row_length,
            buffer_image_height: self.image_height,
            image_subresource: self.sub_resource.as_layers(mip_level),
            image_offset: self.image_offset,
            image_extent: self.image_extent,
        }
    }
}

/// `(handle, descriptor, memory)` -- spec §3's `Image`. Its *layout* is
/// not tracked here: the spec documents layout as a property of the
/// barriers the application issues, not of this object (spec §4.4), so
/// this type offers the barrier/copy helpers but does not remember what
/// layout it is currently in.
pub struct Image {
    device: Arc<LogicalDevice>,
    pub(crate) handle: vk::Image,
    desc: ImageDescriptor,
    alloc: Option<crate::memory::DeviceAlloc>,
}

impl Image {
    /// Creates a device-local image per `desc`, with the given `usage`
    /// and `tiling` (spec §4.4's "describe -> create -> query
    /// requirements -> allocate memory -> bind").
    pub fn new(
        device: Arc<LogicalDevice>,
        desc: ImageDescriptor,
        usage: vk::ImageUsageFlags,
        tiling: vk::ImageTiling,
        required: vk::MemoryPropertyFlags,
        optimal: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        let handle = unsafe { device.raw().create_image(&info, None).map_err(Error::from)? };
        let reqs = unsafe { device.raw().get_image_memory_requirements(handle) };

        let alloc = {
            let mut allocator = device.allocator();
            match allocator.allocate(device.raw(), &reqs, required, optimal) {
                Ok(a) => a,
                Err(e) => {
                    unsafe { device.raw().destroy_image(handle, None) };
                    return Err(e);
                }
            }
        };

        unsafe {
            device
                .raw()
                .bind_image_memory(handle, alloc.handle, alloc.offset)
                .map_err(Error::from)?;
        }

        Ok(Self {
            device,
            handle,
            desc,
            alloc: Some(alloc),
        })
    }

    /// Wraps an image this crate does not own the memory of -- the
    /// swapchain's presentable images, whose `VkImage`s are destroyed by
    /// `vkDestroySwapchainKHR`, not by this type's `Drop` (spec §4.11).
    pub(crate) fn from_foreign(
        handle: vk::Image,
        desc: ImageDescriptor,
        device: Arc<LogicalDevice>,
    ) -> Self {
        Self {
            device,
            handle,
            desc,
            alloc: None,
        }
    }

    pub fn raw(&self) -> vk::Image {
        self.handle
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.desc
    }

    /// Records a layout-transition barrier on `cbuf`. Callers pick the
    /// stage/access masks explicitly; this only builds and issues the
    /// `vkCmdPipelineBarrier` call (spec §4.4's "library offers
    /// helpers", not an automatic layout tracker).
    #[allow(clippy::too_many_arguments)]
    pub fn barrier(
        &self,
        device: &ash::Device,
        cbuf: vk::CommandBuffer,
        sub_resource: SubResource,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .image(self.handle)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(sub_resource.as_range())
            .build();

        unsafe {
            device.cmd_pipeline_barrier(
                cbuf,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Records `vkCmdCopyBufferToImage` for every region in `regions`
    /// (spec §4.4). Validation of `TRANSFER_DST` usage is the caller's
    /// responsibility to have requested at creation, the same way
    /// `Buffer::upload` trusts its caller's declared usage.
    /// Validates `buffer`'s `TRANSFER_SRC` usage before recording the
    /// copy (spec §4.4's "must validate usage flags on operations").
    pub fn copy_from_buffer(
        &self,
        cbuf: vk::CommandBuffer,
        buffer: &crate::buffer::Buffer,
        dst_layout: vk::ImageLayout,
        regions: &[CopyRegion],
    ) -> Result<()> {
        let vk_regions: Vec<vk::BufferImageCopy> = regions.iter().map(|r| r.as_vk(0)).collect();
        buffer.copy_to_image(cbuf, self.handle, dst_layout, &vk_regions)
    }

    /// Uploads `data` via a one-time-submit staging buffer, transitions
    /// `UNDEFINED -> TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL`,
    /// and waits for the queue to go idle -- the full path named by
    /// spec §8 scenario S3.
    pub fn upload_and_transition(&self, pool: &CommandPool, queue: vk::Queue, data: &[u8]) -> Result<()> {
        let staging = crate::buffer::Buffer::new_staging(self.device.clone(), data.len() as u64)?;
        staging.upload(data)?;

        let sub_resource = SubResource::whole(&self.desc);
        let region = CopyRegion {
            buffer_offset: 0,
            row_length: 0,
            image_height: 0,
            sub_resource,
            image_offset: vk::Offset3D::default(),
            image_extent: self.desc.extent,
        };

        pool.submit_one_time(queue, |cbuf| {
            self.barrier(
                self.device.raw(),
                cbuf,
                sub_resource,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
            );
            self.copy_from_buffer(
                cbuf,
                &staging,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )?;
            self.barrier(
                self.device.raw(),
                cbuf,
                sub_resource,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
            );
            Ok(())
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(alloc) = self.alloc.take() {
            unsafe {
                self.device.raw().destroy_image(self.handle, None);
            }
            self.device.allocator().free(&alloc);
        }
    }
}

/// `(image, subresource-range, component-mapping, viewType)` -- spec
/// §3's `ImageView`. Owns no image memory.
pub struct ImageView {
    device: Arc<LogicalDevice>,
    handle: vk::ImageView,
}

impl ImageView {
    pub fn new(
        device: Arc<LogicalDevice>,
        image: &Image,
        view_type: vk::ImageViewType,
        components: vk::ComponentMapping,
        sub_resource: SubResource,
    ) -> Result<Self> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image.handle)
            .view_type(view_type)
            .format(image.desc.format)
            .components(components)
            .subresource_range(sub_resource.as_range())
            .build();

        let handle = unsafe {
            device
                .raw()
                .create_image_view(&info, None)
                .map_err(Error::from)?
        };

        Ok(Self { device, handle })
    }

    /// A view over the image's entire extent with the given component
    /// swizzle, the shape scenario S3 needs for an `"ABGR"`-labelled
    /// texture (spec §4.4/§8).
    pub fn with_swizzle(device: Arc<LogicalDevice>, image: &Image, swizzle: &str) -> Result<Self> {
        Self::new(
            device,
            image,
            vk::ImageViewType::TYPE_2D,
            component_mapping(swizzle),
            SubResource::whole(image.descriptor()),
        )
    }

    pub fn raw(&self) -> vk::ImageView {
        self.handle
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_image_view(self.handle, None);
        }
    }
}

/// A non-owning handle to a view this crate did not create, used by
/// `Swapchain` which owns its views directly rather than through
/// `ImageView` (the per-swapchain-image views are destroyed as a group
/// by the swapchain, not individually).
pub struct ImageViewHandle(vk::ImageView);

impl ImageViewHandle {
    pub(crate) fn new(handle: vk::ImageView) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> vk::ImageView {
        self.0
    }
}

/// Immutable-after-creation sampler (spec §3/§4.4), defaulting to linear
/// min/mag/mip, `REPEAT` wrap on all axes, no anisotropy, no compare-op,
/// and the "no clamp" LOD sentinel (`vk::LOD_CLAMP_NONE`).
pub struct Sampler {
    device: Arc<LogicalDevice>,
    handle: vk::Sampler,
}

/// Builder for `Sampler`, following spec §4.4's description of its
/// defaults plus the "wrap may be set per axis by numeric index" escape
/// hatch.
pub struct SamplerBuilder {
    mag_filter: vk::Filter,
    min_filter: vk::Filter,
    mipmap_mode: vk::SamplerMipmapMode,
    address_modes: [vk::SamplerAddressMode; 3],
    anisotropy: Option<f32>,
    compare_op: Option<vk::CompareOp>,
    max_lod: f32,
}

impl Default for SamplerBuilder {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_modes: [vk::SamplerAddressMode::REPEAT; 3],
            anisotropy: None,
            compare_op: None,
            // "LOD clamp sentinel for no clamp" (spec §4.4).
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

impl SamplerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the wrap mode for axis `index` (0=U, 1=V, 2=W).
    pub fn wrap(mut self, index: usize, mode: vk::SamplerAddressMode) -> Self {
        self.address_modes[index] = mode;
        self
    }

    pub fn anisotropy(mut self, max: f32) -> Self {
        self.anisotropy = Some(max);
        self
    }

    pub fn compare_op(mut self, op: vk::CompareOp) -> Self {
        self.compare_op = Some(op);
        self
    }

    pub fn build(self, device: Arc<LogicalDevice>) -> Result<Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_modes[0])
            .address_mode_v(self.address_modes[1])
            .address_mode_w(self.address_modes[2])
            .anisotropy_enable(self.anisotropy.is_some())
            .max_anisotropy(self.anisotropy.unwrap_or(1.0))
            .compare_enable(self.compare_op.is_some())
            .compare_op(self.compare_op.unwrap_or(vk::CompareOp::ALWAYS))
            .unnormalized_coordinates(false)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .max_lod(self.max_lod)
            .build();

        let handle = unsafe {
            device
                .raw()
                .create_sampler(&info, None)
                .map_err(Error::from)?
        };

        Ok(Sampler { device, handle })
    }
}

impl Sampler {
    pub fn raw(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_sampler(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_whole_matches_descriptor() {
        let desc = ImageDescriptor::texture_2d(vk::Format::R8G8B8A8_UNORM, 256, 256);
        let sub = SubResource::whole(&desc);
        assert_eq!(sub.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(sub.level_count, 1);
        assert_eq!(sub.layer_count, 1);
    }

    #[test]
    fn sampler_builder_defaults_match_spec() {
        let builder = SamplerBuilder::new();
        assert_eq!(builder.mag_filter, vk::Filter::LINEAR);
        assert_eq!(builder.address_modes[0], vk::SamplerAddressMode::REPEAT);
        assert_eq!(builder.max_lod, vk::LOD_CLAMP_NONE);
        assert!(builder.anisotropy.is_none());
    }
}
