// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// One triple per frame in flight, created once and kept across resizes
// (nothing here depends on the swapchain image count).

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::context::DeviceContext;
use crate::error::{FrameError, FrameResult};

/// Binary semaphore: GPU-side ordering between queue operations
pub struct Semaphore<D: DeviceContext> {
    device: Arc<D>,
    semaphore: vk::Semaphore,
}

impl<D: DeviceContext> Semaphore<D> {
    pub fn new(device: Arc<D>) -> FrameResult<Self> {
        let semaphore = device
            .create_semaphore()
            .map_err(FrameError::SyncCreationFailed)?;
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<D: DeviceContext> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// CPU-observable fence signaled when a submission completes
pub struct Fence<D: DeviceContext> {
    device: Arc<D>,
    fence: vk::Fence,
}

impl<D: DeviceContext> Fence<D> {
    pub fn new(device: Arc<D>, signaled: bool) -> FrameResult<Self> {
        let fence = device
            .create_fence(signaled)
            .map_err(FrameError::SyncCreationFailed)?;
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Block until signaled.
    ///
    /// `diagnostic_timeout` only controls how often a stall is reported; the
    /// wait itself never gives up.
    pub fn wait(&self, diagnostic_timeout: Duration) -> FrameResult<()> {
        let timeout = u64::try_from(diagnostic_timeout.as_nanos()).unwrap_or(u64::MAX);
        let mut stalls = 0u32;

        loop {
            match self.device.wait_for_fence(self.fence, timeout) {
                Ok(()) => return Ok(()),
                Err(vk::Result::TIMEOUT) => {
                    stalls += 1;
                    log::warn!(
                        "Fence {:?} still unsignaled after {:?} (stall #{})",
                        self.fence,
                        diagnostic_timeout * stalls,
                        stalls
                    );
                }
                Err(vk::Result::ERROR_DEVICE_LOST) => return Err(FrameError::DeviceLost),
                Err(e) => return Err(FrameError::FenceWait(e)),
            }
        }
    }

    pub fn reset(&self) -> FrameResult<()> {
        self.device.reset_fence(self.fence).map_err(FrameError::from_vk)
    }

    pub fn is_signaled(&self) -> bool {
        matches!(self.device.fence_signaled(self.fence), Ok(true))
    }
}

impl<D: DeviceContext> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
    }
}

/// Frame synchronization - one per frame in flight
pub struct FrameSync<D: DeviceContext> {
    pub image_available: Semaphore<D>,
    pub render_finished: Semaphore<D>,
    pub in_flight: Fence<D>,
}

impl<D: DeviceContext> FrameSync<D> {
    pub fn new(device: &Arc<D>) -> FrameResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?, // Start signaled
        })
    }
}

/// N independent sync triples indexed by frame slot
pub struct FrameSyncSet<D: DeviceContext> {
    frames: Vec<FrameSync<D>>,
    fence_timeout: Duration,
}

impl<D: DeviceContext> FrameSyncSet<D> {
    /// Create `frames_in_flight` triples, all fences signaled.
    ///
    /// Any creation failure is fatal; triples built so far are released.
    pub fn new(device: &Arc<D>, frames_in_flight: usize, fence_timeout: Duration) -> FrameResult<Self> {
        if frames_in_flight == 0 {
            return Err(FrameError::InvalidFrameCount(frames_in_flight));
        }

        let frames = (0..frames_in_flight)
            .map(|_| FrameSync::new(device))
            .collect::<FrameResult<Vec<_>>>()?;

        log::info!("Created {} frame sync slots", frames_in_flight);
        Ok(Self { frames, fence_timeout })
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Signaled by the acquire for `slot`, waited on by its submission
    #[inline]
    pub fn signal_after_acquire(&self, slot: usize) -> vk::Semaphore {
        self.frames[slot].image_available.handle()
    }

    /// Signaled by the submission for `slot`, waited on by its present
    #[inline]
    pub fn signal_after_render(&self, slot: usize) -> vk::Semaphore {
        self.frames[slot].render_finished.handle()
    }

    #[inline]
    pub fn fence(&self, slot: usize) -> &Fence<D> {
        &self.frames[slot].in_flight
    }

    /// Block until the last submission made from `slot` has completed.
    pub fn wait(&self, slot: usize) -> FrameResult<()> {
        self.fence(slot).wait(self.fence_timeout)
    }

    /// Block until every slot is idle.
    pub fn wait_all(&self) -> FrameResult<()> {
        self.frames
            .iter()
            .try_for_each(|frame| frame.in_flight.wait(self.fence_timeout))
    }
}
