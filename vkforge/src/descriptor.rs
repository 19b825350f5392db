// Descriptor set layouts, pools and sets with dirty-tracking (spec
// §3/§4.9). Grounded in the teacher's `DescPool` (descpool.rs), which
// hard-codes a single combined-image-sampler binding and a fixed
// POOL_SIZE; generalised here into an ordered binding list, a
// type-budgeted pool, and per-entry dirty tracking the teacher's
// sampler-only pool never needed.
//
// vkforge contributors

use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::LogicalDevice;
use crate::{Error, Result};

/// One binding in a `DescriptorSetLayout` (spec §4.9).
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub index: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_mask: vk::ShaderStageFlags,
}

/// An ordered list of bindings, created up-front (spec §4.9's "Layout").
pub struct DescriptorSetLayout {
    device: Arc<LogicalDevice>,
    pub(crate) handle: vk::DescriptorSetLayout,
    bindings: Vec<Binding>,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<LogicalDevice>, bindings: &[Binding]) -> Result<Self> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.index)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stage_mask)
                    .build()
            })
            .collect();

        let info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&vk_bindings)
            .build();

        let handle = unsafe {
            device
                .raw()
                .create_descriptor_set_layout(&info, None)
                .map_err(Error::from)?
        };

        Ok(Self {
            device,
            handle,
            bindings: bindings.to_vec(),
        })
    }

    pub fn raw(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    fn binding_type(&self, index: u32) -> Option<vk::DescriptorType> {
        self.bindings
            .iter()
            .find(|b| b.index == index)
            .map(|b| b.descriptor_type)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

/// A `(type -> count)` budget plus a `maxSets` ceiling (spec §4.9's
/// "Pool"). Unlike the teacher's `DescPool`, which transparently grows
/// a list of same-shaped pools as capacity runs out, this pool is sized
/// once at creation per its declared budget -- callers batch their
/// descriptor-set needs up front, matching how `Pipeline` construction
/// already requires every layout to be known ahead of time.
pub struct DescriptorPool {
    device: Arc<LogicalDevice>,
    handle: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<LogicalDevice>,
        budget: &[(vk::DescriptorType, u32)],
        max_sets: u32,
    ) -> Result<Self> {
        let sizes: Vec<vk::DescriptorPoolSize> = budget
            .iter()
            .map(|(ty, count)| {
                vk::DescriptorPoolSize::builder()
                    .ty(*ty)
                    .descriptor_count(*count)
                    .build()
            })
            .collect();

        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(max_sets)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .build();

        let handle = unsafe {
            device
                .raw()
                .create_descriptor_pool(&info, None)
                .map_err(Error::from)?
        };

        Ok(Self { device, handle })
    }

    /// Allocates one descriptor set per layout, returning a parallel
    /// list (spec §4.9's "Allocating a list of layouts returns a
    /// parallel list of descriptor sets").
    pub fn allocate(&self, layouts: &[&DescriptorSetLayout]) -> Result<Vec<DescriptorSet>> {
        let vk_layouts: Vec<vk::DescriptorSetLayout> = layouts.iter().map(|l| l.handle).collect();

        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.handle)
            .set_layouts(&vk_layouts)
            .build();

        let handles = unsafe {
            self.device
                .raw()
                .allocate_descriptor_sets(&info)
                .map_err(Error::from)?
        };

        Ok(handles
            .into_iter()
            .zip(layouts.iter())
            .map(|(handle, layout)| DescriptorSet {
                handle,
                bindings: layout.bindings.clone(),
                entries: HashMap::new(),
            })
            .collect())
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_descriptor_pool(self.handle, None);
        }
    }
}

/// A resource a descriptor entry may be bound to (spec §4.9's "either
/// `pImageInfo` or `pBufferInfo` based on the resource's native form").
#[derive(Clone, Copy)]
pub enum Resource {
    CombinedImageSampler {
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    UniformBuffer {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    StorageBuffer {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
}

impl Resource {
    fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Resource::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Resource::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Resource::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

struct Entry {
    resource: Resource,
    dirty: bool,
}

/// One allocated descriptor set: a map from binding index to its
/// current resource plus a dirty flag (spec §4.9's "Entries").
pub struct DescriptorSet {
    pub(crate) handle: vk::DescriptorSet,
    bindings: Vec<Binding>,
    entries: HashMap<u32, Entry>,
}

impl DescriptorSet {
    pub fn raw(&self) -> vk::DescriptorSet {
        self.handle
    }

    /// Validates `resource`'s type against `binding`'s declared type and
    /// marks the entry dirty (spec §4.9's `set(binding, resource)`).
    pub fn set(&mut self, binding: u32, resource: Resource) -> Result<()> {
        let declared = self
            .bindings
            .iter()
            .find(|b| b.index == binding)
            .ok_or_else(|| Error::Other(anyhow::anyhow!("no such binding: {}", binding)))?
            .descriptor_type;

        if declared != resource.descriptor_type() {
            return Err(Error::Other(anyhow::anyhow!(
                "binding {} expects {:?}, got {:?}",
                binding,
                declared,
                resource.descriptor_type()
            )));
        }

        self.entries.insert(
            binding,
            Entry {
                resource,
                dirty: true,
            },
        );
        Ok(())
    }

    fn dirty_entries(&self) -> impl Iterator<Item = (u32, &Resource)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(b, e)| (*b, &e.resource))
    }

    fn clear_dirty(&mut self) {
        for e in self.entries.values_mut() {
            e.dirty = false;
        }
    }
}

/// Collects dirty entries across `sets`, builds one `vkUpdateDescriptorSets`
/// call, and clears every dirty flag (spec §4.9's "Batch update").
pub fn update(device: &LogicalDevice, sets: &mut [&mut DescriptorSet]) {
    // Owning storage for the `pImageInfo`/`pBufferInfo` payloads the
    // `vk::WriteDescriptorSet`s below borrow from; must outlive the
    // `update_descriptor_sets` call.
    let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();
    let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();

    struct PendingWrite {
        dst_set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        image_info_index: Option<usize>,
        buffer_info_index: Option<usize>,
    }
    let mut pending: Vec<PendingWrite> = Vec::new();

    for set in sets.iter() {
        for (binding, resource) in set.dirty_entries() {
            let (image_idx, buffer_idx) = match resource {
                Resource::CombinedImageSampler {
                    sampler,
                    view,
                    layout,
                } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: *sampler,
                        image_view: *view,
                        image_layout: *layout,
                    });
                    (Some(image_infos.len() - 1), None)
                }
                Resource::UniformBuffer {
                    buffer,
                    offset,
                    range,
                }
                | Resource::StorageBuffer {
                    buffer,
                    offset,
                    range,
                } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: *buffer,
                        offset: *offset,
                        range: *range,
                    });
                    (None, Some(buffer_infos.len() - 1))
                }
            };

            pending.push(PendingWrite {
                dst_set: set.handle,
                binding,
                ty: resource.descriptor_type(),
                image_info_index: image_idx,
                buffer_info_index: buffer_idx,
            });
        }
    }

    let writes: Vec<vk::WriteDescriptorSet> = pending
        .iter()
        .map(|p| {
            let mut builder = vk::WriteDescriptorSet::builder()
                .dst_set(p.dst_set)
                .dst_binding(p.binding)
                .dst_array_element(0)
                .descriptor_count(1)
                .descriptor_type(p.ty);

            if let Some(i) = p.image_info_index {
                builder = builder.image_info(std::slice::from_ref(&image_infos[i]));
            }
            if let Some(i) = p.buffer_info_index {
                builder = builder.buffer_info(std::slice::from_ref(&buffer_infos[i]));
            }
            builder.build()
        })
        .collect();

    if !writes.is_empty() {
        unsafe {
            device.raw().update_descriptor_sets(&writes, &[]);
        }
    }

    for set in sets {
        set.clear_dirty();
    }
}

/// Records `vkCmdBindDescriptorSets` at `GRAPHICS` bind-point starting
/// at set 0 (spec §4.9's "Bind command").
pub fn bind(
    device: &ash::Device,
    cbuf: vk::CommandBuffer,
    layout: vk::PipelineLayout,
    sets: &[&DescriptorSet],
) {
    let handles: Vec<vk::DescriptorSet> = sets.iter().map(|s| s.handle).collect();
    unsafe {
        device.cmd_bind_descriptor_sets(
            cbuf,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            0,
            &handles,
            &[],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_bindings() -> Vec<Binding> {
        vec![Binding {
            index: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 1,
            stage_mask: vk::ShaderStageFlags::FRAGMENT,
        }]
    }

    #[test]
    fn set_rejects_mismatched_resource_type() {
        let mut set = DescriptorSet {
            handle: vk::DescriptorSet::null(),
            bindings: layout_bindings(),
            entries: HashMap::new(),
        };

        let result = set.set(
            0,
            Resource::UniformBuffer {
                buffer: vk::Buffer::null(),
                offset: 0,
                range: 4,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn set_marks_entry_dirty() {
        let mut set = DescriptorSet {
            handle: vk::DescriptorSet::null(),
            bindings: layout_bindings(),
            entries: HashMap::new(),
        };

        set.set(
            0,
            Resource::CombinedImageSampler {
                sampler: vk::Sampler::null(),
                view: vk::ImageView::null(),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        )
        .unwrap();

        assert_eq!(set.dirty_entries().count(), 1);
        set.clear_dirty();
        assert_eq!(set.dirty_entries().count(), 0);
    }
}
