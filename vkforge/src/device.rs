// Physical/logical device (spec §4.2's neighbour, §3's PhysicalDevice /
// LogicalDevice / WorkQueue / QueueFamily).
//
// vkforge contributors

use ash::extensions::khr;
use ash::vk;
use std::ffi::CStr;
use std::sync::{Arc, Mutex};

use crate::instance::Instance;
use crate::memory::Allocator;
use crate::surface::Surface;
use crate::{Error, Result};
use vkforge_utils::log;

/// A queue family as exposed by the physical device: its index into
/// `vkGetPhysicalDeviceQueueFamilyProperties`, the number of queues it
/// offers, and its capability flags.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    pub index: u32,
    pub count: u32,
    pub flags: vk::QueueFlags,
}

/// Immutable-after-creation hardware description (spec §3).
pub struct PhysicalDevice {
    pub(crate) pdev: vk::PhysicalDevice,
    pub(crate) queue_families: Vec<QueueFamily>,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,
    pub(crate) limits: vk::PhysicalDeviceLimits,
    pub(crate) name: String,
}

impl PhysicalDevice {
    /// Enumerates every physical device visible to `instance`, the way
    /// the teacher's `Device::select_pdev` does, but returning the full
    /// list rather than picking one -- selection is the caller's job
    /// (`LogicalDevice::new` below picks the first one with a graphics
    /// queue family, which is the teacher's actual policy).
    pub fn enumerate(instance: &Instance) -> Result<Vec<PhysicalDevice>> {
        let pdevs = unsafe {
            instance
                .inst
                .enumerate_physical_devices()
                .map_err(Error::from)?
        };

        Ok(pdevs
            .into_iter()
            .map(|pdev| unsafe {
                let props = instance.inst.get_physical_device_properties(pdev);
                let name = CStr::from_ptr(props.device_name.as_ptr())
                    .to_string_lossy()
                    .into_owned();

                let family_props = instance
                    .inst
                    .get_physical_device_queue_family_properties(pdev);
                let queue_families = family_props
                    .iter()
                    .enumerate()
                    .map(|(i, p)| QueueFamily {
                        index: i as u32,
                        count: p.queue_count,
                        flags: p.queue_flags,
                    })
                    .collect();

                let mem_props = instance.inst.get_physical_device_memory_properties(pdev);

                PhysicalDevice {
                    pdev,
                    queue_families,
                    mem_props,
                    limits: props.limits,
                    name,
                }
            })
            .collect())
    }

    pub fn queue_families(&self) -> &[QueueFamily] {
        &self.queue_families
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.mem_props
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Selects the first queue family with every flag in `required`,
    /// mirroring the teacher's `select_queue_family` filter_map+nth(0)
    /// idiom.
    pub fn select_queue_family(&self, required: vk::QueueFlags) -> Option<QueueFamily> {
        self.queue_families
            .iter()
            .filter(|f| f.flags.contains(required))
            .nth(0)
            .copied()
    }
}

/// Wraps a queue handle plus its owning family (spec §3's `WorkQueue`).
#[derive(Clone, Copy)]
pub struct WorkQueue {
    pub(crate) queue: vk::Queue,
    pub family: u32,
}

impl WorkQueue {
    pub fn raw(&self) -> vk::Queue {
        self.queue
    }

    /// Blocks until every submission to this queue has completed.
    pub fn wait_idle(&self, device: &LogicalDevice) -> Result<()> {
        unsafe { device.dev.queue_wait_idle(self.queue).map_err(Error::from) }
    }
}

/// Owns a set of named `WorkQueue`s, the enabled extensions/layers, and
/// the device-memory allocator (spec §3's `LogicalDevice`).
pub struct LogicalDevice {
    pub(crate) instance: Arc<Instance>,
    pub(crate) pdev: PhysicalDevice,
    pub(crate) dev: ash::Device,
    pub(crate) graphics_queue: WorkQueue,
    pub(crate) present_queue: WorkQueue,
    pub(crate) supports_timeline_semaphores: bool,
    pub(crate) allocator: Mutex<Allocator>,
}

impl LogicalDevice {
    /// Picks a physical device with a graphics-capable queue family that
    /// also supports presenting to `surface` (when not headless), then
    /// creates the logical device and its work queues.
    pub fn new(instance: Arc<Instance>, surface: &Surface) -> Result<Self> {
        let pdevs = PhysicalDevice::enumerate(&instance)?;

        let (pdev, graphics_family, present_family) = pdevs
            .into_iter()
            .find_map(|pdev| {
                let graphics = pdev.select_queue_family(vk::QueueFlags::GRAPHICS)?;
                let present = pdev
                    .queue_families()
                    .iter()
                    .find(|f| surface.supports_present(pdev.pdev, f.index).unwrap_or(false))
                    .copied()
                    .unwrap_or(graphics);
                Some((pdev, graphics, present))
            })
            .ok_or_else(|| Error::Other(anyhow::anyhow!("no suitable physical device found")))?;

        log::debug!("selected physical device {}", pdev.name());

        let mut unique_families = vec![graphics_family.index];
        if present_family.index != graphics_family.index {
            unique_families.push(present_family.index);
        }

        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let mut device_extensions: Vec<*const i8> = Vec::new();
        if !surface.is_headless() {
            device_extensions.push(khr::Swapchain::name().as_ptr());
        }

        let supports_timeline_semaphores = unsafe {
            instance
                .inst
                .enumerate_device_extension_properties(pdev.pdev)
                .map(|exts| {
                    exts.iter().any(|e| {
                        CStr::from_ptr(e.extension_name.as_ptr())
                            == khr::TimelineSemaphore::name()
                    })
                })
                .unwrap_or(false)
        };
        if supports_timeline_semaphores {
            device_extensions.push(khr::TimelineSemaphore::name().as_ptr());
        }

        let mut timeline_features = vk::PhysicalDeviceTimelineSemaphoreFeatures::builder()
            .timeline_semaphore(supports_timeline_semaphores)
            .build();

        let features = vk::PhysicalDeviceFeatures::builder().build();

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features)
            .push_next(&mut timeline_features)
            .build();
        create_info.p_next = &timeline_features as *const _ as *const std::ffi::c_void;

        let dev = unsafe {
            instance
                .inst
                .create_device(pdev.pdev, &create_info, None)
                .map_err(Error::from)?
        };

        let graphics_queue = WorkQueue {
            queue: unsafe { dev.get_device_queue(graphics_family.index, 0) },
            family: graphics_family.index,
        };
        let present_queue = WorkQueue {
            queue: unsafe { dev.get_device_queue(present_family.index, 0) },
            family: present_family.index,
        };

        let allocator = Allocator::new(pdev.mem_props, pdev.limits);

        Ok(Self {
            instance,
            pdev,
            dev,
            graphics_queue,
            present_queue,
            supports_timeline_semaphores,
            allocator: Mutex::new(allocator),
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.dev
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.pdev
    }

    pub fn graphics_queue(&self) -> WorkQueue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> WorkQueue {
        self.present_queue
    }

    pub fn supports_timeline_semaphores(&self) -> bool {
        self.supports_timeline_semaphores
    }

    /// Blocks until every queue on this device is idle. Used during
    /// teardown and swapchain recreation (spec §5).
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.dev.device_wait_idle().map_err(Error::from) }
    }

    pub(crate) fn allocator(&self) -> std::sync::MutexGuard<'_, Allocator> {
        self.allocator
            .lock()
            .expect("memory allocator mutex poisoned")
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        let _ = self.wait_idle();
        self.allocator.lock().unwrap().destroy(&self.dev);
        unsafe {
            self.dev.destroy_device(None);
        }
    }
}
