// Device context - the explicit handle every frame-pacing component is built on
//
// The swapchain, sync set and scheduler never touch global device or queue
// state. They receive an Arc<D: DeviceContext> and issue every native call
// through it, which is what lets several schedulers (one per window) coexist
// and lets the tests swap the GPU for an in-memory model.

use ash::prelude::VkResult;
use ash::vk;

/// Everything needed to build one swapchain.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// One queue submission: a single command buffer gated by one wait signal.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Native calls consumed by the frame-pacing core.
///
/// Implementations must be callable from `&self`; queue access is external
/// synchronization the implementation takes care of.
pub trait DeviceContext: Send + Sync + 'static {
    // Surface queries
    fn surface_capabilities(&self, surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>>;
    fn destroy_surface(&self, surface: vk::SurfaceKHR);

    // Swapchain
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Returns `(image_index, suboptimal)`; out-of-date is `Err(ERROR_OUT_OF_DATE_KHR)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;

    /// Returns `suboptimal`; out-of-date is `Err(ERROR_OUT_OF_DATE_KHR)`.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    // Synchronization primitives
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// `Err(TIMEOUT)` when the timeout (nanoseconds) expires first.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> VkResult<bool>;

    // Queue
    fn queue_submit(&self, submission: &Submission) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;
}
