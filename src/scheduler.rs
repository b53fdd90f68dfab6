// Frame scheduler - drives acquire -> record -> submit -> present
//
// FRAME TIMELINE (one slot):
// ┌──────────────────────────────────────────────────────────────────────────┐
// │  wait_fence ─> acquire ─> reset_fence ─> record ─> submit ─> present     │
// │  (CPU blocks   (GPU signals          (no GPU     (signals     (waits on  │
// │   here only)    image_available)      wait)       render +     render)   │
// │                                                    fence)                │
// └──────────────────────────────────────────────────────────────────────────┘
//
// A stale acquire skips everything after it and rebuilds the swapchain. A
// suboptimal / out-of-date present rebuilds after the frame is on its way.
// At most N slots ever have GPU work outstanding: a slot's fence is waited on
// before the slot is touched again.

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::context::{DeviceContext, Submission};
use crate::backend::surface::PresentationSurface;
use crate::backend::swapchain::{Acquired, PresentResult, SwapchainResources};
use crate::backend::sync::FrameSyncSet;
use crate::error::{FrameError, FrameResult};

/// Where the scheduler is in the per-frame cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    /// No usable swapchain; waiting for a (non-zero) resize
    Recreating,
    /// A fatal error escaped. Slot fences may be reset with nothing
    /// submitted, so the scheduler refuses further work.
    Failed,
}

/// What one call to [`FrameScheduler::run_frame`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and queued for presentation.
    /// `recreated` is set when the swapchain was rebuilt right after presenting.
    Presented { slot: usize, image_index: u32, recreated: bool },
    /// Acquire found the swapchain stale; it was rebuilt and nothing was drawn
    Recreated,
    /// The window has no drawable area; nothing happens until `notify_resized`
    Suspended,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// N: how many frames the CPU may run ahead of the GPU
    pub frames_in_flight: usize,
    /// Requested swapchain image count, clamped to the surface limits
    pub desired_image_count: u32,
    /// Acquire timeout in nanoseconds
    pub acquire_timeout: u64,
    /// How often a stalled fence wait is reported; never aborts the wait
    pub fence_timeout: Duration,
    /// Rebuild after presenting when acquire reports a suboptimal swapchain
    pub recreate_on_suboptimal: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            desired_image_count: 3,
            acquire_timeout: u64::MAX,
            fence_timeout: Duration::from_secs(1),
            recreate_on_suboptimal: true,
        }
    }
}

/// Image and slot handed to the recorder for one frame
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    pub slot: usize,
    pub image_index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

/// Produces the command buffer for one frame.
///
/// Called after the slot's fence has been waited on and reset, so any
/// per-slot recording resource is free to reuse. Must not block on the GPU.
pub trait CommandRecorder {
    fn record(&mut self, target: &FrameTarget) -> anyhow::Result<vk::CommandBuffer>;
}

/// Owner of resources sized to the swapchain (depth buffers, framebuffers,
/// per-image descriptor sets).
pub trait SwapchainListener<D: DeviceContext> {
    fn on_swapchain_recreated(&mut self, swapchain: &SwapchainResources<D>) -> anyhow::Result<()>;
}

pub struct FrameScheduler<D: DeviceContext> {
    // Field order is drop order: swapchain, then sync objects, then surface
    swapchain: SwapchainResources<D>,
    sync: FrameSyncSet<D>,
    surface: PresentationSurface<D>,
    listeners: Vec<Box<dyn SwapchainListener<D>>>,
    device: Arc<D>,
    config: SchedulerConfig,
    /// Slot whose submission last rendered each swapchain image
    images_in_flight: Vec<Option<usize>>,
    state: FrameState,
    slot: usize,
    resize_pending: bool,
}

impl<D: DeviceContext> FrameScheduler<D> {
    /// Create the sync set and build the first swapchain.
    ///
    /// A window with no drawable area leaves the scheduler suspended until
    /// the first resize notification.
    pub fn new(device: Arc<D>, surface: PresentationSurface<D>, config: SchedulerConfig) -> FrameResult<Self> {
        let sync = FrameSyncSet::new(&device, config.frames_in_flight, config.fence_timeout)?;

        let mut scheduler = Self {
            swapchain: SwapchainResources::empty(device.clone()),
            sync,
            surface,
            listeners: Vec::new(),
            device,
            config,
            images_in_flight: Vec::new(),
            state: FrameState::Recreating,
            slot: 0,
            resize_pending: false,
        };
        scheduler.recreate()?;

        log::info!(
            "Frame scheduler ready: {} frames in flight",
            scheduler.sync.frames_in_flight()
        );
        Ok(scheduler)
    }

    /// Register a per-image resource owner. It is notified right away when a
    /// swapchain already exists, and again after every rebuild.
    pub fn add_listener(&mut self, mut listener: Box<dyn SwapchainListener<D>>) -> FrameResult<()> {
        if !self.swapchain.is_empty() {
            listener
                .on_swapchain_recreated(&self.swapchain)
                .map_err(|e| FrameError::collaborator("swapchain listener", e))?;
        }
        self.listeners.push(listener);
        Ok(())
    }

    /// The window changed size (or was restored); rebuild before the next frame.
    pub fn notify_resized(&mut self) {
        log::debug!("Resize notification received");
        self.resize_pending = true;
    }

    /// Run one acquire -> submit -> present iteration.
    ///
    /// Stale and suboptimal swapchains are handled here and never surface as
    /// errors. Every error returned is fatal except a swapchain creation
    /// failure that persisted through one retry.
    ///
    /// After a fatal error every later call returns [`FrameError::Stopped`].
    pub fn run_frame(&mut self, recorder: &mut dyn CommandRecorder) -> FrameResult<FrameOutcome> {
        self.ensure_running()?;
        let result = self.frame(recorder);
        self.stop_on_fatal(result)
    }

    fn frame(&mut self, recorder: &mut dyn CommandRecorder) -> FrameResult<FrameOutcome> {
        if std::mem::take(&mut self.resize_pending) {
            if !self.rebuild()? {
                return Ok(FrameOutcome::Suspended);
            }
        } else if self.state == FrameState::Recreating {
            return Ok(FrameOutcome::Suspended);
        }

        let slot = self.slot;

        // 1. Backpressure: the GPU must be done with this slot's last frame
        self.state = FrameState::Acquiring;
        self.sync.wait(slot)?;

        // 2. Acquire
        let acquired = self
            .swapchain
            .acquire_next(self.config.acquire_timeout, self.sync.signal_after_acquire(slot))?;
        let (image_index, acquire_suboptimal) = match acquired {
            Acquired::Image { index, suboptimal } => (index, suboptimal),
            Acquired::Stale => {
                // Nothing consumed: fence untouched, slot unchanged
                log::debug!("Swapchain out of date during acquire");
                return Ok(if self.rebuild()? {
                    FrameOutcome::Recreated
                } else {
                    FrameOutcome::Suspended
                });
            }
        };

        // An image can come back before the slot that last drew it finished
        // (more slots than images)
        let image = image_index as usize;
        if let Some(previous) = self.images_in_flight.get(image).copied().flatten() {
            if previous != slot {
                self.sync.wait(previous)?;
            }
        }

        // 3. Only now is this slot's fence consumed
        self.sync.fence(slot).reset()?;

        // 4. Record
        self.state = FrameState::Recording;
        let target = FrameTarget {
            slot,
            image_index,
            image: self.swapchain.images()[image],
            view: self.swapchain.views()[image],
            extent: self.swapchain.extent(),
            format: self.swapchain.format().format,
        };
        let command_buffer = recorder
            .record(&target)
            .map_err(|e| FrameError::collaborator("command recording", e))?;

        // 5. Submit
        let submission = Submission {
            command_buffer,
            wait_semaphore: self.sync.signal_after_acquire(slot),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: self.sync.signal_after_render(slot),
            fence: self.sync.fence(slot).handle(),
        };
        self.device.queue_submit(&submission).map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => FrameError::DeviceLost,
            other => FrameError::SubmitFailed(other),
        })?;
        self.state = FrameState::Submitted;
        if let Some(entry) = self.images_in_flight.get_mut(image) {
            *entry = Some(slot);
        }

        // 6. Present
        self.state = FrameState::Presenting;
        let presented = self
            .swapchain
            .present(image_index, self.sync.signal_after_render(slot))?;
        let rebuild = match presented {
            PresentResult::Ok => acquire_suboptimal && self.config.recreate_on_suboptimal,
            PresentResult::Suboptimal | PresentResult::OutOfDate => {
                log::debug!("Swapchain {:?} during present", presented);
                true
            }
        };

        // 7. Advance
        self.slot = (slot + 1) % self.sync.frames_in_flight();
        self.state = FrameState::Idle;

        let recreated = rebuild && self.rebuild()?;
        Ok(FrameOutcome::Presented {
            slot,
            image_index,
            recreated,
        })
    }

    /// Tear down and rebuild the swapchain and everything sized to it.
    ///
    /// Returns `false` when the window has no drawable area; the scheduler
    /// then stays in [`FrameState::Recreating`] until the next resize
    /// notification.
    pub fn recreate(&mut self) -> FrameResult<bool> {
        self.ensure_running()?;
        let result = self.rebuild();
        self.stop_on_fatal(result)
    }

    fn ensure_running(&self) -> FrameResult<()> {
        if self.state == FrameState::Failed {
            return Err(FrameError::Stopped);
        }
        Ok(())
    }

    fn stop_on_fatal<T>(&mut self, result: FrameResult<T>) -> FrameResult<T> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                log::error!("Frame scheduler stopped: {}", e);
                self.state = FrameState::Failed;
            }
        }
        result
    }

    fn rebuild(&mut self) -> FrameResult<bool> {
        self.state = FrameState::Recreating;

        // No slot may still reference an image that is about to go away
        self.device.wait_idle().map_err(FrameError::WaitIdleFailed)?;
        self.swapchain.destroy();
        self.images_in_flight.clear();

        let swapchain = match self.build_swapchain() {
            Ok(swapchain) => swapchain,
            Err(FrameError::ZeroExtent { width, height }) => {
                log::info!(
                    "Drawable extent is {}x{}, waiting for a resize before rebuilding",
                    width,
                    height
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.images_in_flight = vec![None; swapchain.image_count()];
        self.swapchain = swapchain;

        for listener in &mut self.listeners {
            listener
                .on_swapchain_recreated(&self.swapchain)
                .map_err(|e| FrameError::collaborator("swapchain listener", e))?;
        }

        self.state = FrameState::Idle;
        Ok(true)
    }

    /// One retry with a fresh capability query before giving up
    fn build_swapchain(&self) -> FrameResult<SwapchainResources<D>> {
        let desired = self.config.desired_image_count;
        match SwapchainResources::create(self.device.clone(), &self.surface, desired, None) {
            Err(FrameError::SwapchainCreationFailed(result)) => {
                log::warn!(
                    "Swapchain creation rejected ({}), retrying with fresh surface capabilities",
                    result
                );
                SwapchainResources::create(self.device.clone(), &self.surface, desired, None)
            }
            other => other,
        }
    }

    /// Wait for the GPU to go idle, reporting failure. Resources are then
    /// released in order as the scheduler drops.
    pub fn shutdown(self) -> FrameResult<()> {
        log::info!("Shutting down frame scheduler");
        self.device.wait_idle().map_err(FrameError::WaitIdleFailed)
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    pub fn swapchain(&self) -> &SwapchainResources<D> {
        &self.swapchain
    }

    pub fn surface(&self) -> &PresentationSurface<D> {
        &self.surface
    }
}

impl<D: DeviceContext> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        // Equivalent to waiting on every slot's fence, and covers listeners too
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait idle failed during teardown: {}", e);
        }
    }
}
