// Error taxonomy for vkforge.
//
// vkforge contributors

use thiserror::Error;

/// Why a `MemoryPool`/`DeviceMemory` allocation request failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationFailure {
    #[error("no memory type satisfies the requested properties")]
    NoMatchingType,
    #[error("maxAllocationCount would be exceeded")]
    CapacityExceeded,
    #[error("requested allocation size must be nonzero")]
    InvalidSize,
}

/// The complete error taxonomy described in spec §7.
///
/// Every public fallible operation in this crate returns `vkforge::Result<T>`,
/// which is `std::result::Result<T, Error>`.
#[derive(Error, Debug)]
pub enum Error {
    /// A domain structure's declared layout does not agree with its
    /// native counterpart. Raised at marshalling-table build time, never
    /// at call time.
    #[error("interop layout mismatch: {0}")]
    InteropLayout(String),

    /// A Vulkan call returned a non-`SUCCESS`, non-whitelisted result
    /// code.
    #[error("vulkan call failed: {0:?}")]
    VulkanResult(ash::vk::Result),

    /// `acquire`/`present` returned `ERROR_OUT_OF_DATE_KHR` or
    /// `SUBOPTIMAL_KHR`. Distinct from `VulkanResult` so the caller is
    /// statically required to handle the recreate-swapchain path.
    #[error("swapchain is out of date and must be recreated")]
    SwapchainInvalidated,

    /// The device-memory allocator could not satisfy a request.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(AllocationFailure),

    /// A `CommandBuffer` operation was attempted outside the state that
    /// documents it as legal.
    #[error("command buffer state machine violation: {0}")]
    InvalidCommandBufferState(String),

    /// A transient `NativeObject` was destroyed twice, or used after
    /// destruction.
    #[error("resource already destroyed")]
    ResourceDestroyed,

    /// A submission or present call returned `ERROR_DEVICE_LOST`. Fatal;
    /// the caller must re-initialize the device.
    #[error("vulkan device was lost")]
    DeviceLost,

    /// Anything else (I/O, image decoding, etc.) that does not belong in
    /// the Vulkan-specific taxonomy above.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ash::vk::Result> for Error {
    fn from(res: ash::vk::Result) -> Self {
        match res {
            ash::vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
            ash::vk::Result::ERROR_OUT_OF_DATE_KHR | ash::vk::Result::SUBOPTIMAL_KHR => {
                Error::SwapchainInvalidated
            }
            other => Error::VulkanResult(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
