// Semaphores and fences (spec §3/§4.10's Synchronisation component).
// Binary semaphore/fence wrappers follow the teacher's thin RAII
// handles; `TimelineSemaphore` is net-new, added for the upload-path
// sync mechanism named in SPEC_FULL.md's supplemental-features section.
//
// vkforge contributors

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use crate::device::LogicalDevice;
use crate::{Error, Result};

/// A binary semaphore (spec §3's `Semaphore`): GPU-GPU ordering between
/// queue submissions, with no host-visible state.
pub struct Semaphore {
    device: Arc<LogicalDevice>,
    handle: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<LogicalDevice>) -> Result<Self> {
        let info = vk::SemaphoreCreateInfo::builder().build();
        let handle = unsafe {
            device
                .raw()
                .create_semaphore(&info, None)
                .map_err(Error::from)?
        };
        Ok(Self { device, handle })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_semaphore(self.handle, None);
        }
    }
}

/// A fence (spec §3's `Fence`): host-visible completion signal for a
/// `Work` submission.
pub struct Fence {
    device: Arc<LogicalDevice>,
    handle: vk::Fence,
}

impl Fence {
    pub fn new(device: Arc<LogicalDevice>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags).build();
        let handle = unsafe { device.raw().create_fence(&info, None).map_err(Error::from)? };
        Ok(Self { device, handle })
    }

    pub fn raw(&self) -> vk::Fence {
        self.handle
    }

    /// Blocks the calling thread until the fence is signalled or
    /// `timeout_ns` elapses. Returns `Ok(true)` if the fence was observed
    /// signalled, `Ok(false)` on a genuine timeout -- a timed-out wait is
    /// not an error (spec §5), so it must not be folded into `Error`
    /// alongside a real driver failure.
    pub fn wait(&self, timeout_ns: u64) -> Result<bool> {
        unsafe {
            match self
                .device
                .raw()
                .wait_for_fences(&[self.handle], true, timeout_ns)
            {
                Ok(()) => Ok(true),
                Err(vk::Result::TIMEOUT) => Ok(false),
                Err(e) => Err(Error::from(e)),
            }
        }
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .reset_fences(&[self.handle])
                .map_err(Error::from)
        }
    }

    pub fn is_signaled(&self) -> Result<bool> {
        unsafe {
            self.device
                .raw()
                .get_fence_status(self.handle)
                .map_err(Error::from)
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_fence(self.handle, None);
        }
    }
}

/// A timeline semaphore (promoted to core in Vulkan 1.2, requested here
/// as `VK_KHR_timeline_semaphore` since the instance only asks for 1.1 --
/// spec §6). Used by the upload path to order a transfer against the
/// render loop without a dedicated fence per upload.
///
/// Only constructible when `device.supports_timeline_semaphores()` is
/// true; callers otherwise fall back to a binary `Semaphore` + `Fence`
/// pair.
pub struct TimelineSemaphore {
    device: Arc<LogicalDevice>,
    loader: khr::TimelineSemaphore,
    handle: vk::Semaphore,
}

impl TimelineSemaphore {
    pub fn new(device: Arc<LogicalDevice>, initial_value: u64) -> Result<Self> {
        if !device.supports_timeline_semaphores() {
            return Err(Error::Other(anyhow::anyhow!(
                "timeline semaphores are not supported on this device"
            )));
        }

        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value)
            .build();
        let info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info).build();

        let handle = unsafe {
            device
                .raw()
                .create_semaphore(&info, None)
                .map_err(Error::from)?
        };
        let loader = khr::TimelineSemaphore::new(device.instance().raw(), device.raw());

        Ok(Self {
            device,
            loader,
            handle,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.handle
    }

    pub fn value(&self) -> Result<u64> {
        unsafe {
            self.loader
                .get_semaphore_counter_value(self.handle)
                .map_err(Error::from)
        }
    }

    /// Signals the timeline from the host side, without a queue
    /// submission.
    pub fn signal(&self, value: u64) -> Result<()> {
        let info = vk::SemaphoreSignalInfo::builder()
            .semaphore(self.handle)
            .value(value)
            .build();
        unsafe { self.loader.signal_semaphore(&info).map_err(Error::from) }
    }

    /// Blocks until the timeline reaches `value` or `timeout_ns` elapses.
    /// Returns `Ok(true)` if the wait value was observed reached,
    /// `Ok(false)` on a genuine timeout (spec §5's "a timed-out wait
    /// surfaces the native result rather than raising").
    pub fn wait(&self, value: u64, timeout_ns: u64) -> Result<bool> {
        let semaphores = [self.handle];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values)
            .build();
        unsafe {
            match self.loader.wait_semaphores(&info, timeout_ns) {
                Ok(()) => Ok(true),
                Err(vk::Result::TIMEOUT) => Ok(false),
                Err(e) => Err(Error::from(e)),
            }
        }
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_semaphore(self.handle, None);
        }
    }
}
