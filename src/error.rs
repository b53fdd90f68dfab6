// Error taxonomy for the frame pacing core
//
// Stale / suboptimal presentation is NOT an error: the scheduler absorbs it.
// Everything here either escapes to the application shell (fatal) or is a
// typed creation failure the caller may react to.

use ash::vk;
use thiserror::Error;

/// Errors produced by the surface, swapchain, sync set and scheduler.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Native surface query or use failed; the window surface is gone
    #[error("presentation surface lost ({0})")]
    SurfaceLost(vk::Result),

    /// The logical device was lost
    #[error("device lost")]
    DeviceLost,

    /// The platform rejected the requested swapchain configuration
    #[error("swapchain creation failed: {0}")]
    SwapchainCreationFailed(vk::Result),

    /// Surface reported no formats at all
    #[error("surface reports no supported formats")]
    NoSurfaceFormat,

    /// Drawable extent is zero in at least one dimension (minimized window)
    #[error("drawable extent is {width}x{height}")]
    ZeroExtent { width: u32, height: u32 },

    #[error("image view creation failed: {0}")]
    ImageViewCreationFailed(vk::Result),

    #[error("failed to create synchronization primitives: {0}")]
    SyncCreationFailed(vk::Result),

    #[error("frames in flight must be at least 1, got {0}")]
    InvalidFrameCount(usize),

    #[error("device wait idle failed: {0}")]
    WaitIdleFailed(vk::Result),

    #[error("fence wait failed: {0}")]
    FenceWait(vk::Result),

    #[error("queue submit failed: {0}")]
    SubmitFailed(vk::Result),

    /// A recorder or per-image resource owner failed
    #[error("{stage} failed")]
    Collaborator {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An earlier fatal error left the scheduler unusable; tear it down
    #[error("frame scheduler stopped after a fatal error")]
    Stopped,

    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

impl FrameError {
    /// Map a raw result from acquire/present/submit into the taxonomy.
    pub fn from_vk(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_SURFACE_LOST_KHR => FrameError::SurfaceLost(result),
            vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
            other => FrameError::Vulkan(other),
        }
    }

    pub(crate) fn collaborator(stage: &'static str, err: anyhow::Error) -> Self {
        FrameError::Collaborator {
            stage,
            source: err.into(),
        }
    }

    /// Fatal errors require full teardown of the renderer, not just a new swapchain.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FrameError::SwapchainCreationFailed(_)
                | FrameError::NoSurfaceFormat
                | FrameError::ZeroExtent { .. }
                | FrameError::ImageViewCreationFailed(_)
        )
    }
}
