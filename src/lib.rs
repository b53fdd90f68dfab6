// Frame pacing and swapchain lifecycle for a Vulkan presentation loop
//
// ┌─────────────────────────────────────────────────────────────────┐
// │  FrameScheduler (acquire -> record -> submit -> present)        │
// │    ├── PresentationSurface (capabilities, format / mode choice) │
// │    ├── SwapchainResources  (swapchain + images + views)         │
// │    └── FrameSyncSet        (N semaphore/semaphore/fence slots)  │
// │  all built on an Arc<D: DeviceContext>                          │
// └─────────────────────────────────────────────────────────────────┘

pub mod backend;
pub mod config;
pub mod error;
pub mod scheduler;

pub use error::{FrameError, FrameResult};
pub use scheduler::{
    CommandRecorder, FrameOutcome, FrameScheduler, FrameState, FrameTarget, SchedulerConfig, SwapchainListener,
};
