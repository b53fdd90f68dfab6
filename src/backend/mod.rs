// Backend module - Vulkan abstraction layer
//
// Everything that issues native calls goes through a DeviceContext, so the
// surface, swapchain and sync wrappers run against a real device or the
// in-memory one used by the tests.

pub mod clear;
pub mod context;
pub mod depth;
pub mod device;
pub mod surface;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub mod mock;

pub use clear::ClearPass;
pub use context::DeviceContext;
pub use depth::DepthTargets;
pub use device::VulkanDevice;
pub use surface::{FramebufferSource, PresentationSurface};
pub use swapchain::SwapchainResources;
pub use sync::FrameSyncSet;
