// Device-memory allocator with pooling, paging and block reuse
// (spec §4.3). This has no direct counterpart in the teacher -- which
// calls `vkAllocateMemory` once per request and never reuses or pools
// anything -- so it is built fresh here, grounded in the teacher's own
// `find_memory_type_index` selection algorithm (device.rs) and its
// `Arc<RwLock<DeviceInternal>>` externally-synchronized-state idiom
// (the pool lives behind the same kind of single-writer lock, owned by
// `LogicalDevice`). See DESIGN.md.
//
// vkforge contributors

use ash::vk;
use std::collections::HashMap;

use crate::error::AllocationFailure;
use crate::{Error, Result};

/// A static descriptor of one of the device's memory types (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct MemoryType {
    pub index: u32,
    pub heap_index: u32,
    pub property_flags: vk::MemoryPropertyFlags,
}

/// Memory-type selection algorithm (spec §4.3):
/// 1. Filter candidates by `reqs.memory_type_bits`.
/// 2. Require the candidate's property-set to be a superset of `required`.
/// 3. Prefer the first that also satisfies `optimal`; otherwise fall
///    back to the first satisfying only `required`.
/// 4. `None` if nothing matches.
pub fn find_memory_type_index(
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    reqs: &vk::MemoryRequirements,
    required: vk::MemoryPropertyFlags,
    optimal: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let mut fallback = None;

    for i in 0..mem_props.memory_type_count {
        if (reqs.memory_type_bits >> i) & 1 != 1 {
            continue;
        }

        let mem_type = mem_props.memory_types[i as usize];
        if !mem_type.property_flags.contains(required) {
            continue;
        }

        if mem_type.property_flags.contains(optimal) {
            return Some(i);
        }

        if fallback.is_none() {
            fallback = Some(i);
        }
    }

    fallback
}

fn round_up(value: u64, granularity: u64) -> u64 {
    if granularity == 0 {
        return value;
    }
    ((value + granularity - 1) / granularity) * granularity
}

/// A sub-range of a `MemoryBlock`. Destroying a child only marks it
/// destroyed (spec §4.3's "Block allocation"); the bytes are reclaimed
/// the next time a request is satisfied by reuse.
#[derive(Debug, Clone, Copy)]
struct ChildAllocation {
    offset: u64,
    size: u64,
    destroyed: bool,
}

/// A slab of device memory owned by a `MemoryPool`. Tracks a monotonic
/// `next` free-space cursor plus the list of live/destroyed children.
struct MemoryBlock {
    handle: vk::DeviceMemory,
    size: u64,
    next: u64,
    children: Vec<ChildAllocation>,
    mapped: Option<*mut u8>,
}

impl MemoryBlock {
    fn free(&self) -> u64 {
        self.size - self.next
    }
}

/// Where the next allocation for a given request should come from. Pure
/// bookkeeping, with no Vulkan calls, so the reuse/block-reuse policy
/// can be unit tested without a device (spec §8 property 2).
#[derive(Debug, PartialEq, Eq)]
enum Plan {
    FromBlockTail { block: usize, offset: u64 },
    ReuseChild { block: usize, child: usize },
    NewBlock { size: u64 },
}

struct MemoryPool {
    blocks: Vec<MemoryBlock>,
    total: u64,
}

impl MemoryPool {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            total: 0,
        }
    }

    /// The pool-allocation strategy from spec §4.3:
    /// 1. Scan existing blocks for one with `free >= size`.
    /// 2. Otherwise scan destroyed children pool-wide, sorted by size
    ///    ascending, and take the first with `size >= requested` (the
    ///    Open Question in spec §9 is resolved this way -- see
    ///    DESIGN.md).
    /// 3. Otherwise a new block is needed.
    fn plan(&self, size: u64) -> Plan {
        for (bi, block) in self.blocks.iter().enumerate() {
            if block.free() >= size {
                return Plan::FromBlockTail {
                    block: bi,
                    offset: block.next,
                };
            }
        }

        let mut candidates: Vec<(usize, usize, u64)> = Vec::new();
        for (bi, block) in self.blocks.iter().enumerate() {
            for (ci, child) in block.children.iter().enumerate() {
                if child.destroyed && child.size >= size {
                    candidates.push((bi, ci, child.size));
                }
            }
        }
        candidates.sort_by_key(|c| c.2);
        if let Some((bi, ci, _)) = candidates.into_iter().next() {
            return Plan::ReuseChild { block: bi, child: ci };
        }

        Plan::NewBlock { size }
    }
}

/// One allocation returned to a `Buffer`/`Image`. Proxies its parent
/// block's handle with `(offset, size)`, per spec §3's "child
/// allocation's `handle` equals its parent block's handle" invariant.
#[derive(Debug, Clone, Copy)]
pub struct DeviceAlloc {
    pub memory_type: u32,
    pub offset: u64,
    pub size: u64,
    pub handle: vk::DeviceMemory,
    pub(crate) block_index: usize,
    pub(crate) child_index: usize,
}

const DEFAULT_MIN_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Per-`MemoryType` pool allocator, keyed on demand, plus the device's
/// allocation-count cap and page granularity.
pub struct Allocator {
    mem_props: vk::PhysicalDeviceMemoryProperties,
    granularity: u64,
    min_block_size: u64,
    max_allocation_count: u32,
    allocation_count: u32,
    pools: HashMap<u32, MemoryPool>,
}

impl Allocator {
    pub fn new(
        mem_props: vk::PhysicalDeviceMemoryProperties,
        limits: vk::PhysicalDeviceLimits,
    ) -> Self {
        let granularity = limits.buffer_image_granularity.max(1);
        Self {
            mem_props,
            granularity,
            min_block_size: round_up(DEFAULT_MIN_BLOCK_SIZE, granularity),
            max_allocation_count: limits.max_memory_allocation_count,
            allocation_count: 0,
            pools: HashMap::new(),
        }
    }

    pub fn memory_types(&self) -> impl Iterator<Item = MemoryType> + '_ {
        let props = self.mem_props;
        (0..props.memory_type_count).map(move |i| {
            let t = props.memory_types[i as usize];
            MemoryType {
                index: i,
                heap_index: t.heap_index,
                property_flags: t.property_flags,
            }
        })
    }

    /// Serves `(reqs, required, optimal)`, per spec §4.3.
    pub fn allocate(
        &mut self,
        device: &ash::Device,
        reqs: &vk::MemoryRequirements,
        required: vk::MemoryPropertyFlags,
        optimal: vk::MemoryPropertyFlags,
    ) -> Result<DeviceAlloc> {
        if reqs.size == 0 {
            return Err(Error::AllocationFailed(AllocationFailure::InvalidSize));
        }

        let memory_type = find_memory_type_index(&self.mem_props, reqs, required, optimal)
            .ok_or(Error::AllocationFailed(AllocationFailure::NoMatchingType))?;

        let size = round_up(reqs.size.max(reqs.alignment), self.granularity);
        let pool = self.pools.entry(memory_type).or_insert_with(MemoryPool::new);

        match pool.plan(size) {
            Plan::FromBlockTail { block, offset } => {
                let b = &mut pool.blocks[block];
                b.next += size;
                let child = b.children.len();
                b.children.push(ChildAllocation {
                    offset,
                    size,
                    destroyed: false,
                });
                Ok(DeviceAlloc {
                    memory_type,
                    offset,
                    size,
                    handle: b.handle,
                    block_index: block,
                    child_index: child,
                })
            }
            Plan::ReuseChild { block, child } => {
                let b = &mut pool.blocks[block];
                b.children[child].destroyed = false;
                let c = b.children[child];
                Ok(DeviceAlloc {
                    memory_type,
                    offset: c.offset,
                    // Surplus bytes between `size` and `c.size` are
                    // orphaned, not tracked: accepted fragmentation
                    // (spec §4.3).
                    size: c.size,
                    handle: b.handle,
                    block_index: block,
                    child_index: child,
                })
            }
            Plan::NewBlock { size: requested } => {
                if self.allocation_count >= self.max_allocation_count {
                    return Err(Error::AllocationFailed(AllocationFailure::CapacityExceeded));
                }

                let block_size = self.min_block_size.max(requested);
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(block_size)
                    .memory_type_index(memory_type)
                    .build();

                let handle = unsafe {
                    device
                        .allocate_memory(&alloc_info, None)
                        .map_err(Error::from)?
                };
                self.allocation_count += 1;

                let block = MemoryBlock {
                    handle,
                    size: block_size,
                    next: requested,
                    children: vec![ChildAllocation {
                        offset: 0,
                        size: requested,
                        destroyed: false,
                    }],
                    mapped: None,
                };
                pool.total += block_size;
                pool.blocks.push(block);
                let block_index = pool.blocks.len() - 1;

                Ok(DeviceAlloc {
                    memory_type,
                    offset: 0,
                    size: requested,
                    handle,
                    block_index,
                    child_index: 0,
                })
            }
        }
    }

    /// Marks a child allocation destroyed so a later request may reuse
    /// its bytes (`reallocate` in spec §4.3). Does not call
    /// `vkFreeMemory` -- only `destroy()` returns memory to the driver.
    pub fn free(&mut self, alloc: &DeviceAlloc) {
        if let Some(pool) = self.pools.get_mut(&alloc.memory_type) {
            if let Some(block) = pool.blocks.get_mut(alloc.block_index) {
                if let Some(child) = block.children.get_mut(alloc.child_index) {
                    child.destroyed = true;
                }
            }
        }
    }

    /// Maps `(offset, size)` relative to `alloc` into host address
    /// space. At most one mapping per block: an existing mapping on the
    /// same block is silently replaced (spec §4.3 -- the pool's block
    /// memory acts as its own proxy, unlike a bare, unpooled allocation
    /// which would raise instead).
    pub fn map(
        &mut self,
        device: &ash::Device,
        alloc: &DeviceAlloc,
        offset: u64,
        size: u64,
    ) -> Result<*mut u8> {
        let pool = self
            .pools
            .get_mut(&alloc.memory_type)
            .expect("mapping an allocation from an unknown pool");
        let block = &mut pool.blocks[alloc.block_index];

        if let Some(_prev) = block.mapped.take() {
            unsafe {
                device.unmap_memory(block.handle);
            }
        }

        let ptr = unsafe {
            device
                .map_memory(
                    block.handle,
                    alloc.offset + offset,
                    size,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(Error::from)?
        } as *mut u8;
        block.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Clears the mapping slot for the block backing `alloc`.
    pub fn unmap(&mut self, device: &ash::Device, alloc: &DeviceAlloc) {
        if let Some(pool) = self.pools.get_mut(&alloc.memory_type) {
            if let Some(block) = pool.blocks.get_mut(alloc.block_index) {
                if block.mapped.take().is_some() {
                    unsafe {
                        device.unmap_memory(block.handle);
                    }
                }
            }
        }
    }

    /// Frees every block in every pool. Called once, from
    /// `LogicalDevice::drop`.
    pub fn destroy(&mut self, device: &ash::Device) {
        for (_, pool) in self.pools.drain() {
            for block in pool.blocks {
                unsafe {
                    device.free_memory(block.handle, None);
                }
            }
        }
    }
}

// Raw pointers in `MemoryBlock::mapped` are only ever dereferenced by
// the `LogicalDevice` that owns this allocator, itself guarded by the
// `Mutex` that wraps `Allocator`.
unsafe impl Send for Allocator {}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_mem_props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = flags.len() as u32;
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: *f,
                heap_index: 0,
            };
        }
        props.memory_heap_count = 1;
        props.memory_heaps[0] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        props
    }

    #[test]
    fn selects_optimal_over_required_only() {
        let props = make_mem_props(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let reqs = vk::MemoryRequirements {
            size: 256,
            alignment: 16,
            memory_type_bits: 0b11,
        };
        let idx = find_memory_type_index(
            &props,
            &reqs,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn falls_back_to_required_only_when_no_optimal_match() {
        let props = make_mem_props(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        let reqs = vk::MemoryRequirements {
            size: 256,
            alignment: 16,
            memory_type_bits: 0b1,
        };
        let idx = find_memory_type_index(
            &props,
            &reqs,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn respects_memory_type_bits_mask() {
        let props = make_mem_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let reqs = vk::MemoryRequirements {
            size: 256,
            alignment: 16,
            // Only type 1 is a candidate.
            memory_type_bits: 0b10,
        };
        let idx = find_memory_type_index(
            &props,
            &reqs,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        assert_eq!(idx, Some(1));
    }

    #[test]
    fn no_match_returns_none() {
        let props = make_mem_props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let reqs = vk::MemoryRequirements {
            size: 256,
            alignment: 16,
            memory_type_bits: 0b1,
        };
        let idx = find_memory_type_index(
            &props,
            &reqs,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        );
        assert_eq!(idx, None);
    }

    #[test]
    fn pool_plan_allocates_from_tail_when_space_free() {
        let mut pool = MemoryPool::new();
        pool.blocks.push(MemoryBlock {
            handle: vk::DeviceMemory::null(),
            size: 1024,
            next: 128,
            children: vec![ChildAllocation {
                offset: 0,
                size: 128,
                destroyed: false,
            }],
            mapped: None,
        });

        assert_eq!(
            pool.plan(64),
            Plan::FromBlockTail {
                block: 0,
                offset: 128
            }
        );
    }

    #[test]
    fn pool_plan_reuses_smallest_sufficient_destroyed_child() {
        let mut pool = MemoryPool::new();
        pool.blocks.push(MemoryBlock {
            handle: vk::DeviceMemory::null(),
            size: 1024,
            next: 1024,
            children: vec![
                ChildAllocation {
                    offset: 0,
                    size: 512,
                    destroyed: true,
                },
                ChildAllocation {
                    offset: 512,
                    size: 256,
                    destroyed: true,
                },
            ],
            mapped: None,
        });

        // Both destroyed children fit a 200-byte request; the smaller
        // (256) should win over the larger (512).
        assert_eq!(
            pool.plan(200),
            Plan::ReuseChild { block: 0, child: 1 }
        );
    }

    #[test]
    fn pool_plan_requests_new_block_when_nothing_fits() {
        let mut pool = MemoryPool::new();
        pool.blocks.push(MemoryBlock {
            handle: vk::DeviceMemory::null(),
            size: 128,
            next: 128,
            children: vec![],
            mapped: None,
        });

        assert_eq!(pool.plan(4096), Plan::NewBlock { size: 4096 });
    }

    #[test]
    fn round_up_pages_to_granularity() {
        assert_eq!(round_up(1, 256), 256);
        assert_eq!(round_up(256, 256), 256);
        assert_eq!(round_up(257, 256), 512);
        assert_eq!(round_up(10, 0), 10);
    }
}
