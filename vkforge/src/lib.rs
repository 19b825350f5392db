// vkforge - a Vulkan rendering library (spec.md / SPEC_FULL.md)
//
// vkforge contributors

pub mod buffer;
pub mod command;
pub mod deletion_queue;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod image;
pub mod instance;
pub mod marshal;
pub mod memory;
pub mod pipeline;
pub mod renderpass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod work;

mod context;

pub use context::Context;
pub use error::{AllocationFailure, Error, Result};
pub use surface::SurfaceType;
pub use vkforge_utils::MemImage;

/// Anything that owns a native Vulkan handle and needs to release it
/// exactly once. The `DeletionQueue` (spec §4.3/§4.12's deferred
/// destruction) holds these as trait objects so it does not need to
/// know the concrete resource type it is draining.
///
/// Grounded in the teacher's own `Droppable` seam (referenced from
/// `device.rs`/`renderer.rs`/`deletion_queue.rs`), which every
/// GPU-owning resource in `thundr` implements so the deletion queue can
/// be generic over resource type.
pub trait Droppable {
    /// Releases the native handle(s) immediately. Must be idempotent:
    /// the deletion queue guarantees single delivery, but a resource
    /// that is also dropped normally (falling out of scope before its
    /// scheduled point arrives) must not double-free.
    fn drop_now(&mut self);
}

/// Construction-time configuration (spec §6's `ApplicationConfig`,
/// realized the way the teacher's test suite builds a `CreateInfo` via
/// `CreateInfo::builder()`).
#[derive(Debug, Clone)]
pub struct CreateInfo {
    /// Application name, forwarded into `VkApplicationInfo` and used as
    /// the window/swapchain title where the surface backend shows one.
    pub title: String,
    /// How this `Context` gets a `VkSurfaceKHR` (spec §4.2): a real
    /// window via `raw-window-handle`, or `Headless` for tests and
    /// offscreen rendering.
    pub surface_type: SurfaceType,
    /// Requests `VK_LAYER_KHRONOS_validation` plus the debug-utils
    /// messenger (spec §4.2's diagnostics handler).
    pub enable_validation: bool,
    /// Target frames per second for `RenderLoop::start` (spec §4.12).
    pub frame_rate: u32,
    /// Depth of the `VulkanFrame` ring (spec §4.12's `RenderTask`); how
    /// many frames may be in flight simultaneously.
    pub in_flight_frames: usize,
}

impl CreateInfo {
    pub fn builder() -> CreateInfoBuilder {
        CreateInfoBuilder::default()
    }
}

impl Default for CreateInfo {
    fn default() -> Self {
        Self {
            title: "vkforge".to_string(),
            surface_type: SurfaceType::Headless,
            enable_validation: cfg!(debug_assertions),
            frame_rate: 60,
            in_flight_frames: 2,
        }
    }
}

/// Builder for `CreateInfo`, following the teacher's `CreateInfo::builder()`
/// idiom used throughout its own test suite.
#[derive(Debug, Clone, Default)]
pub struct CreateInfoBuilder {
    info: CreateInfo,
}

impl CreateInfoBuilder {
    pub fn title<S: Into<String>>(mut self, title: S) -> Self {
        self.info.title = title.into();
        self
    }

    pub fn surface_type(mut self, surface_type: SurfaceType) -> Self {
        self.info.surface_type = surface_type;
        self
    }

    pub fn enable_validation(mut self, enable: bool) -> Self {
        self.info.enable_validation = enable;
        self
    }

    pub fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.info.frame_rate = frame_rate;
        self
    }

    pub fn in_flight_frames(mut self, count: usize) -> Self {
        self.info.in_flight_frames = count;
        self
    }

    pub fn build(self) -> CreateInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_info_builder_defaults_and_overrides() {
        let info = CreateInfo::builder()
            .title("demo")
            .frame_rate(30)
            .in_flight_frames(3)
            .build();
        assert_eq!(info.title, "demo");
        assert_eq!(info.frame_rate, 30);
        assert_eq!(info.in_flight_frames, 3);
        assert!(matches!(info.surface_type, SurfaceType::Headless));
    }
}
