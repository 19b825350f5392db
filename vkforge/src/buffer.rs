// Buffers (spec §3/§4.4's Buffer, backed by the pooled allocator in
// memory.rs). Grounded in the teacher's `VkBuffer`/`MemImage` creation
// pattern (device.rs) but rebuilt against the new `Allocator` instead of
// one `vkAllocateMemory` call per buffer.
//
// vkforge contributors

use ash::vk;
use std::sync::Arc;

use crate::device::LogicalDevice;
use crate::{Error, Result};

/// A device buffer plus the pooled memory backing it (spec §3's
/// `Buffer`). Owns its `DeviceAlloc` for the whole of its lifetime; the
/// allocation is released back to the pool on `Drop`, not necessarily
/// returned to the driver (spec §4.3).
pub struct Buffer {
    device: Arc<LogicalDevice>,
    pub(crate) handle: vk::Buffer,
    alloc: crate::memory::DeviceAlloc,
    size: u64,
    usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Creates a buffer of `size` bytes for `usage`, backed by memory
    /// chosen by `required`/`optimal` property flags (spec §4.3's
    /// selection algorithm, by way of `memory::Allocator::allocate`).
    pub fn new(
        device: Arc<LogicalDevice>,
        size: u64,
        usage: vk::BufferUsageFlags,
        required: vk::MemoryPropertyFlags,
        optimal: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                crate::error::AllocationFailure::InvalidSize,
            ));
        }

        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        let handle = unsafe { device.raw().create_buffer(&info, None).map_err(Error::from)? };
        let reqs = unsafe { device.raw().get_buffer_memory_requirements(handle) };

        let alloc = {
            let mut allocator = device.allocator();
            match allocator.allocate(device.raw(), &reqs, required, optimal) {
                Ok(a) => a,
                Err(e) => {
                    unsafe { device.raw().destroy_buffer(handle, None) };
                    return Err(e);
                }
            }
        };

        unsafe {
            device
                .raw()
                .bind_buffer_memory(handle, alloc.handle, alloc.offset)
                .map_err(Error::from)?;
        }

        Ok(Self {
            device,
            handle,
            alloc,
            size,
            usage,
        })
    }

    /// A host-visible buffer sized for `size` bytes, the shape every
    /// staging upload in `image.rs` needs.
    pub fn new_staging(device: Arc<LogicalDevice>, size: u64) -> Result<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    pub fn raw(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Raises `Error::Other` if `self` was not created with every flag
    /// in `required` -- the usage-flag check spec §4.4 requires at
    /// call time, not just at creation.
    fn require_usage(&self, required: vk::BufferUsageFlags) -> Result<()> {
        if self.usage.contains(required) {
            Ok(())
        } else {
            Err(Error::Other(anyhow::anyhow!(
                "buffer usage {:?} does not include required {:?}",
                self.usage,
                required
            )))
        }
    }

    /// Maps the buffer's full extent into host address space.
    pub fn map(&self) -> Result<*mut u8> {
        self.device
            .allocator()
            .map(self.device.raw(), &self.alloc, 0, self.size)
    }

    pub fn unmap(&self) {
        self.device.allocator().unmap(self.device.raw(), &self.alloc);
    }

    /// Copies `data` into the buffer's backing memory, mapping and
    /// unmapping around the copy. `data.len()` must not exceed `size()`.
    pub fn upload(&self, data: &[u8]) -> Result<()> {
        assert!(data.len() as u64 <= self.size, "upload exceeds buffer size");
        let ptr = self.map()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        }
        self.unmap();
        Ok(())
    }

    /// Records `vkCmdCopyBuffer` from `self` into `dst`, validating
    /// `TRANSFER_SRC` on `self` and `TRANSFER_DST` on `dst` first (spec
    /// §4.4: "copy requires TRANSFER_SRC on source and TRANSFER_DST on
    /// destination"). Used by the staging-buffer upload path (scenario
    /// S2) to move data into a device-local buffer.
    pub fn copy_to_buffer(
        &self,
        cbuf: vk::CommandBuffer,
        dst: &Buffer,
        regions: &[vk::BufferCopy],
    ) -> Result<()> {
        self.require_usage(vk::BufferUsageFlags::TRANSFER_SRC)?;
        dst.require_usage(vk::BufferUsageFlags::TRANSFER_DST)?;
        unsafe {
            self.device
                .raw()
                .cmd_copy_buffer(cbuf, self.handle, dst.handle, regions);
        }
        Ok(())
    }

    /// Records `vkCmdCopyBufferToImage` from `self` into `image`,
    /// validating `TRANSFER_SRC` usage first (spec §4.4's "must
    /// validate usage flags on operations").
    pub(crate) fn copy_to_image(
        &self,
        cbuf: vk::CommandBuffer,
        image: vk::Image,
        image_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) -> Result<()> {
        self.require_usage(vk::BufferUsageFlags::TRANSFER_SRC)?;
        unsafe {
            self.device
                .raw()
                .cmd_copy_buffer_to_image(cbuf, self.handle, image, image_layout, regions);
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_buffer(self.handle, None);
        }
        self.device.allocator().free(&self.alloc);
    }
}
