// Swapchain and presentation (spec §3/§4.11). Grounded in the teacher's
// `Renderer::create_swapchain`/`select_images_and_views`/
// `get_next_swapchain_image`/`present` (renderer.rs), stripped of the
// Intel mutable-swapchain/storage-usage workaround and incremental-
// present damage regions (no spec counterpart, see DESIGN.md), and
// rebuilt against surface-capability defaults rather than a
// `desired_image_count + 1` heuristic.
//
// A `SurfaceType::Headless` `Surface` has no `vk::SurfaceKHR` to query
// capabilities from, so `Swapchain` backs onto a small ring of plain
// device images instead of a real `VkSwapchainKHR` in that case (spec
// §6's test-tooling note: integration tests drive the whole render
// loop against `Headless`). `acquire`/`present` keep the same
// signatures either way; the headless backend just never blocks on the
// presentation engine.
//
// vkforge contributors

use ash::extensions::khr;
use ash::vk;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::device::LogicalDevice;
use crate::image::{Image, ImageDescriptor, ImageView, ImageViewHandle};
use crate::surface::Surface;
use crate::{Error, Result};

const HEADLESS_IMAGE_COUNT: u32 = 2;

enum Backend {
    Real {
        loader: khr::Swapchain,
        handle: vk::SwapchainKHR,
    },
    /// Owns its images directly, since there is no presentation engine
    /// to own them instead (spec §4.11 step 4 assumes a real swapchain).
    Headless {
        _images: Vec<Image>,
        next: AtomicU32,
    },
}

/// Builder for `Swapchain`, defaulting to the surface's capabilities
/// (spec §4.11): current extent, minImageCount, identity transform, a
/// default format/colour space, single array layer, exclusive sharing,
/// opaque composite alpha, clipped, and MAILBOX-else-FIFO present mode.
/// Every field is overridable.
#[derive(Default)]
pub struct SwapchainBuilder {
    image_count: Option<u32>,
    format: Option<vk::SurfaceFormatKHR>,
    extent: Option<vk::Extent2D>,
    present_mode: Option<vk::PresentModeKHR>,
    transform: Option<vk::SurfaceTransformFlagsKHR>,
}

impl SwapchainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_count(mut self, count: u32) -> Self {
        self.image_count = Some(count);
        self
    }

    pub fn format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.format = Some(format);
        self
    }

    pub fn extent(mut self, extent: vk::Extent2D) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.present_mode = Some(mode);
        self
    }

    pub fn build(
        self,
        device: Arc<LogicalDevice>,
        surface: &Surface,
        old_swapchain: Option<&Swapchain>,
    ) -> Result<Swapchain> {
        if surface.is_headless() {
            return self.build_headless(device);
        }

        let pdev = device.physical_device().pdev;
        let caps = surface.capabilities(pdev)?;
        let formats = surface.formats(pdev)?;
        let present_modes = surface.present_modes(pdev)?;

        let image_count = self
            .image_count
            .unwrap_or(caps.min_image_count)
            .max(caps.min_image_count);
        let image_count = if caps.max_image_count > 0 {
            image_count.min(caps.max_image_count)
        } else {
            image_count
        };

        let surface_format = self.format.unwrap_or_else(|| {
            formats
                .iter()
                .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
                .copied()
                .unwrap_or(formats[0])
        });

        let extent = self.extent.unwrap_or(caps.current_extent);
        let transform = self.transform.unwrap_or(caps.current_transform);

        let present_mode = self.present_mode.unwrap_or_else(|| {
            if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
                vk::PresentModeKHR::MAILBOX
            } else {
                vk::PresentModeKHR::FIFO
            }
        });

        let loader = khr::Swapchain::new(device.instance().raw(), device.raw());

        let surface_khr = surface
            .s_surface
            .expect("surface capabilities/formats queried above imply a real VkSurfaceKHR");

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface_khr)
            .min_image_count(image_count)
            .image_color_space(surface_format.color_space)
            .image_format(surface_format.format)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.map(|s| s.raw()).unwrap_or(vk::SwapchainKHR::null()))
            .build();

        let handle = unsafe { loader.create_swapchain(&create_info, None).map_err(Error::from)? };
        let images = unsafe { loader.get_swapchain_images(handle).map_err(Error::from)? };
        let desc = ImageDescriptor::texture_2d(surface_format.format, extent.width, extent.height);
        let views = wrap_foreign_views(&device, &images, &desc)?;

        Ok(Swapchain {
            device,
            backend: Backend::Real { loader, handle },
            format: surface_format.format,
            extent,
            views,
        })
    }

    fn build_headless(self, device: Arc<LogicalDevice>) -> Result<Swapchain> {
        let extent = self.extent.unwrap_or(vk::Extent2D {
            width: 256,
            height: 256,
        });
        let format = self
            .format
            .map(|f| f.format)
            .unwrap_or(vk::Format::R8G8B8A8_UNORM);
        let count = self.image_count.unwrap_or(HEADLESS_IMAGE_COUNT);

        let desc = ImageDescriptor::texture_2d(format, extent.width, extent.height);
        let images: Vec<Image> = (0..count)
            .map(|_| {
                Image::new(
                    device.clone(),
                    desc,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                    vk::ImageTiling::OPTIMAL,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let views: Vec<ImageViewHandle> = images
            .iter()
            .map(|image| {
                let view = ImageView::with_swizzle(device.clone(), image, "RGBA")?;
                let raw = view.raw();
                std::mem::forget(view);
                Ok(ImageViewHandle::new(raw))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Swapchain {
            device,
            backend: Backend::Headless {
                _images: images,
                next: AtomicU32::new(0),
            },
            format,
            extent,
            views,
        })
    }
}

/// Wraps each presentable image handle as a non-owning `Image` just
/// long enough to build its view with the standard identity/RGBA
/// swizzle path, then discards the wrapper without destroying the
/// foreign `VkImage` (spec §4.11 step 3).
fn wrap_foreign_views(
    device: &Arc<LogicalDevice>,
    images: &[vk::Image],
    desc: &ImageDescriptor,
) -> Result<Vec<ImageViewHandle>> {
    images
        .iter()
        .map(|&handle| {
            let wrapped = Image::from_foreign(handle, *desc, device.clone());
            let view = ImageView::with_swizzle(device.clone(), &wrapped, "RGBA")?;
            let raw = view.raw();
            std::mem::forget(view);
            std::mem::forget(wrapped);
            Ok(ImageViewHandle::new(raw))
        })
        .collect()
}

/// A presentable chain of images plus their views (spec §3's
/// `Swapchain`). Destroying it destroys its views but not its images
/// when backed by a real `VkSwapchainKHR`, which owns them (spec §4.11
/// step 4); the headless backend owns its images outright and destroys
/// them too.
pub struct Swapchain {
    device: Arc<LogicalDevice>,
    backend: Backend,
    format: vk::Format,
    extent: vk::Extent2D,
    views: Vec<ImageViewHandle>,
}

impl Swapchain {
    pub fn raw(&self) -> vk::SwapchainKHR {
        match &self.backend {
            Backend::Real { handle, .. } => *handle,
            Backend::Headless { .. } => vk::SwapchainKHR::null(),
        }
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn views(&self) -> &[ImageViewHandle] {
        &self.views
    }

    pub fn image_count(&self) -> usize {
        self.views.len()
    }

    pub fn is_headless(&self) -> bool {
        matches!(self.backend, Backend::Headless { .. })
    }

    /// Acquires the next presentable image. Returns its index on
    /// `SUCCESS` or `SUBOPTIMAL_KHR`; `ERROR_OUT_OF_DATE_KHR` raises
    /// `SwapchainInvalidated` (spec §4.11's `acquire`). The headless
    /// backend has no presentation engine to synchronize with, so it
    /// advances a plain round-robin counter instead.
    pub fn acquire(&self, semaphore: vk::Semaphore, fence: vk::Fence) -> Result<u32> {
        match &self.backend {
            Backend::Real { loader, handle } => loop {
                match unsafe { loader.acquire_next_image(*handle, u64::MAX, semaphore, fence) } {
                    Ok((index, _suboptimal)) => return Ok(index),
                    Err(vk::Result::NOT_READY) | Err(vk::Result::TIMEOUT) => continue,
                    Err(e) => return Err(Error::from(e)),
                }
            },
            Backend::Headless { next, .. } => {
                let index = next.fetch_add(1, Ordering::Relaxed) % self.views.len() as u32;
                Ok(index)
            }
        }
    }

    /// Presents `index` to `queue`, waiting on `wait` if given.
    /// `SUBOPTIMAL_KHR` or `ERROR_OUT_OF_DATE_KHR` raises
    /// `SwapchainInvalidated` (spec §4.11's `present`). A no-op on the
    /// headless backend, which has nothing to present to.
    pub fn present(&self, queue: vk::Queue, index: u32, wait: Option<vk::Semaphore>) -> Result<()> {
        let (loader, handle) = match &self.backend {
            Backend::Real { loader, handle } => (loader, *handle),
            Backend::Headless { .. } => return Ok(()),
        };

        let waits: Vec<vk::Semaphore> = wait.into_iter().collect();
        let swapchains = [handle];
        let indices = [index];

        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices)
            .build();

        match unsafe { loader.queue_present(queue, &info) } {
            Ok(_suboptimal) => Ok(()),
            Err(vk::Result::SUBOPTIMAL_KHR) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(Error::SwapchainInvalidated)
            }
            Err(e) => Err(Error::from(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for view in &self.views {
            unsafe {
                self.device.raw().destroy_image_view(view.raw(), None);
            }
        }
        if let Backend::Real { loader, handle } = &self.backend {
            unsafe {
                loader.destroy_swapchain(*handle, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_image_count_default_is_nonzero() {
        assert!(HEADLESS_IMAGE_COUNT > 0);
    }
}
