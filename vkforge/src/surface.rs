// Surface: binds Instance, PhysicalDevice, and an externally provided
// window handle (spec §3, §4.11).
//
// vkforge contributors

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::instance::Instance;
use crate::{Error, Result};

/// The native-window/surface provider's interface (spec §1's external
/// collaborator). Only the interface is specified there; this realizes
/// it with `raw-window-handle`, the seam the wider `ash` ecosystem uses
/// for exactly this purpose, plus a `Headless` variant for integration
/// tests and CI runs that have no window system.
#[derive(Debug, Clone, Copy)]
pub enum SurfaceType {
    /// A real on-screen surface, described by its raw display/window
    /// handle pair (as obtained from winit, SDL2, etc.).
    Raw {
        display: RawDisplayHandle,
        window: RawWindowHandle,
    },
    /// No presentation surface at all; used by tests that only need a
    /// device and a set of off-screen images to render into.
    Headless,
}

// RawDisplayHandle/RawWindowHandle are plain FFI pointers; vkforge never
// dereferences them itself (ash-window does, synchronously, inside
// `create_surface`), so it is safe to move a `SurfaceType` between
// threads same as the teacher's `MemImage` wrapper is.
unsafe impl Send for SurfaceType {}

/// The set of instance extensions the chosen surface backend requires.
/// `Instance::new` calls this before creating the Vulkan instance itself
/// (spec §4.2).
pub fn required_instance_extensions(surface_type: &SurfaceType) -> Vec<*const i8> {
    match surface_type {
        SurfaceType::Headless => Vec::new(),
        SurfaceType::Raw { display, .. } => {
            match ash_window::enumerate_required_extensions(*display) {
                Ok(exts) => exts.to_vec(),
                Err(_) => Vec::new(),
            }
        }
    }
}

/// Binds an `Instance`, a `PhysicalDevice` and a window handle together,
/// per spec §3. `Surface::new` with `SurfaceType::Headless` is a
/// stand-in used when there is no window system: it never becomes a
/// real `vk::SurfaceKHR`, and `Swapchain` construction instead renders
/// to a ring of plain device images (see `swapchain.rs`).
pub struct Surface {
    pub(crate) s_surface: Option<vk::SurfaceKHR>,
    pub(crate) s_loader: Option<khr::Surface>,
    /// Set by `destroy`; a transient `NativeObject` is destroyed exactly
    /// once per lifetime (spec §3/§8's "destroy is not idempotent").
    destroyed: bool,
}

impl Surface {
    pub fn new(instance: &Instance, surface_type: &SurfaceType) -> Result<Self> {
        match surface_type {
            SurfaceType::Headless => Ok(Self {
                s_surface: None,
                s_loader: None,
                destroyed: false,
            }),
            SurfaceType::Raw { display, window } => {
                let loader = khr::Surface::new(&instance.loader, &instance.inst);
                let surface = unsafe {
                    ash_window::create_surface(
                        &instance.loader,
                        &instance.inst,
                        *display,
                        *window,
                        None,
                    )
                    .map_err(Error::from)?
                };

                Ok(Self {
                    s_surface: Some(surface),
                    s_loader: Some(loader),
                    destroyed: false,
                })
            }
        }
    }

    pub fn is_headless(&self) -> bool {
        self.s_surface.is_none()
    }

    /// Capabilities, formats and present modes as exposed by spec §3's
    /// `Surface` data model. Callers ask for these when sizing a
    /// `Swapchain`.
    pub fn capabilities(&self, pdev: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        let (loader, surface) = self.handles()?;
        unsafe {
            loader
                .get_physical_device_surface_capabilities(pdev, surface)
                .map_err(Error::from)
        }
    }

    pub fn formats(&self, pdev: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        let (loader, surface) = self.handles()?;
        unsafe {
            loader
                .get_physical_device_surface_formats(pdev, surface)
                .map_err(Error::from)
        }
    }

    pub fn present_modes(&self, pdev: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        let (loader, surface) = self.handles()?;
        unsafe {
            loader
                .get_physical_device_surface_present_modes(pdev, surface)
                .map_err(Error::from)
        }
    }

    pub fn supports_present(&self, pdev: vk::PhysicalDevice, queue_family: u32) -> Result<bool> {
        match (&self.s_loader, self.s_surface) {
            (Some(loader), Some(surface)) => unsafe {
                loader
                    .get_physical_device_surface_support(pdev, queue_family, surface)
                    .map_err(Error::from)
            },
            _ => Ok(true),
        }
    }

    fn handles(&self) -> Result<(&khr::Surface, vk::SurfaceKHR)> {
        match (&self.s_loader, self.s_surface) {
            (Some(loader), Some(surface)) => Ok((loader, surface)),
            _ => Err(Error::Other(anyhow::anyhow!(
                "surface operation requested on a headless Surface"
            ))),
        }
    }

    /// Destroys the underlying `VkSurfaceKHR`, if any. Not idempotent: a
    /// second call raises `Error::ResourceDestroyed` (spec §3's
    /// NativeObject contract, §8's explicit double-destroy test), rather
    /// than silently no-opping.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(Error::ResourceDestroyed);
        }
        self.destroyed = true;
        if let (Some(loader), Some(surface)) = (self.s_loader.take(), self.s_surface.take()) {
            unsafe {
                loader.destroy_surface(surface, None);
            }
        }
        Ok(())
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // A caller may have already destroyed this Surface explicitly;
        // Drop cannot propagate that as an error, so it is ignored here.
        let _ = self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_is_not_idempotent() {
        let mut surface = Surface {
            s_surface: None,
            s_loader: None,
            destroyed: false,
        };
        assert!(surface.destroy().is_ok());
        assert!(matches!(surface.destroy(), Err(Error::ResourceDestroyed)));
    }
}
