// In-memory device used by the unit tests
//
// Models just enough of a GPU to check frame pacing: handles are counters,
// submissions complete in queue order when a fence on them is waited for (or
// on wait_idle), and acquire/present results can be scripted. Misuse that
// would be a data race or a deadlock on real hardware panics.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::context::{DeviceContext, Submission, SwapchainDesc};
use super::surface::FramebufferSource;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateSwapchain { min_image_count: u32, extent: (u32, u32), old: vk::SwapchainKHR },
    DestroySwapchain,
    Acquire { signal: vk::Semaphore },
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Submit { fence: vk::Fence, wait: vk::Semaphore, signal: vk::Semaphore, stage: vk::PipelineStageFlags },
    Present { image_index: u32, wait: vk::Semaphore },
    WaitIdle,
}

struct MockSwapchain {
    images: Vec<vk::Image>,
    next_image: u32,
}

struct State {
    next_handle: u64,
    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    surface_lost: bool,

    surfaces: HashSet<vk::SurfaceKHR>,
    swapchains: HashMap<vk::SwapchainKHR, MockSwapchain>,
    views: HashSet<vk::ImageView>,
    semaphores: HashSet<vk::Semaphore>,
    /// fence -> signaled
    fences: HashMap<vk::Fence, bool>,
    /// Fences of submitted, not yet completed work, in queue order
    gpu_queue: VecDeque<vk::Fence>,

    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    swapchain_create_failures: u32,
    view_budget: Option<u32>,
    sync_budget: Option<u32>,
    fence_stalls: u32,
    wait_idle_error: Option<vk::Result>,

    unsignaled_peak: usize,
    in_flight_peak: usize,
    last_old_swapchain: vk::SwapchainKHR,
    calls: Vec<Call>,
}

impl State {
    fn handle<T: Handle>(&mut self) -> T {
        self.next_handle += 1;
        T::from_raw(self.next_handle)
    }

    fn complete_through(&mut self, fence: vk::Fence) {
        while let Some(done) = self.gpu_queue.pop_front() {
            self.fences.insert(done, true);
            if done == fence {
                break;
            }
        }
    }

    fn take_sync_budget(&mut self) -> VkResult<()> {
        if let Some(budget) = self.sync_budget.as_mut() {
            if *budget == 0 {
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            *budget -= 1;
        }
        Ok(())
    }
}

pub struct MockDevice {
    state: Mutex<State>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };

        Arc::new(Self {
            state: Mutex::new(State {
                next_handle: 0,
                caps,
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                surface_lost: false,
                surfaces: HashSet::new(),
                swapchains: HashMap::new(),
                views: HashSet::new(),
                semaphores: HashSet::new(),
                fences: HashMap::new(),
                gpu_queue: VecDeque::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                swapchain_create_failures: 0,
                view_budget: None,
                sync_budget: None,
                fence_stalls: 0,
                wait_idle_error: None,
                unsignaled_peak: 0,
                in_flight_peak: 0,
                last_old_swapchain: vk::SwapchainKHR::null(),
                calls: Vec::new(),
            }),
        })
    }

    // ---- setup ------------------------------------------------------------

    pub fn make_surface(&self) -> vk::SurfaceKHR {
        let mut state = self.state.lock();
        let surface = state.handle();
        state.surfaces.insert(surface);
        surface
    }

    pub fn set_current_extent(&self, width: u32, height: u32) {
        self.state.lock().caps.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_image_count_limits(&self, min: u32, max: u32) {
        let mut state = self.state.lock();
        state.caps.min_image_count = min;
        state.caps.max_image_count = max;
    }

    pub fn lose_surface(&self) {
        self.state.lock().surface_lost = true;
    }

    pub fn script_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.lock().acquire_script.push_back(result);
    }

    pub fn script_present(&self, result: VkResult<bool>) {
        self.state.lock().present_script.push_back(result);
    }

    pub fn fail_next_swapchain_creates(&self, count: u32) {
        self.state.lock().swapchain_create_failures = count;
    }

    /// The first `ok` image views succeed, later ones fail
    pub fn fail_image_view_after(&self, ok: u32) {
        self.state.lock().view_budget = Some(ok);
    }

    /// The first `ok` semaphore/fence creations succeed, later ones fail
    pub fn fail_sync_creation_after(&self, ok: u32) {
        self.state.lock().sync_budget = Some(ok);
    }

    /// The next `count` fence waits time out before the real wait happens
    pub fn stall_fence_waits(&self, count: u32) {
        self.state.lock().fence_stalls = count;
    }

    pub fn fail_wait_idle(&self, result: vk::Result) {
        self.state.lock().wait_idle_error = Some(result);
    }

    /// Queue GPU work with nothing in it but a fence to signal
    pub fn submit_empty(&self, fence: vk::Fence) {
        self.state.lock().gpu_queue.push_back(fence);
    }

    // ---- inspection -------------------------------------------------------

    pub fn live_surfaces(&self) -> usize {
        self.state.lock().surfaces.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.lock().swapchains.len()
    }

    pub fn live_views(&self) -> usize {
        self.state.lock().views.len()
    }

    pub fn live_sync_objects(&self) -> usize {
        let state = self.state.lock();
        state.semaphores.len() + state.fences.len()
    }

    pub fn unsignaled_peak(&self) -> usize {
        self.state.lock().unsignaled_peak
    }

    pub fn in_flight_peak(&self) -> usize {
        self.state.lock().in_flight_peak
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.lock().gpu_queue.len()
    }

    pub fn last_old_swapchain(&self) -> vk::SwapchainKHR {
        self.state.lock().last_old_swapchain
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn calls_matching(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl DeviceContext for MockDevice {
    fn surface_capabilities(&self, _surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let state = self.state.lock();
        if state.surface_lost {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        }
        Ok(state.caps)
    }

    fn surface_formats(&self, _surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let state = self.state.lock();
        if state.surface_lost {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        }
        Ok(state.formats.clone())
    }

    fn surface_present_modes(&self, _surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>> {
        let state = self.state.lock();
        if state.surface_lost {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        }
        Ok(state.present_modes.clone())
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        self.state.lock().surfaces.remove(&surface);
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        state.calls.push(Call::CreateSwapchain {
            min_image_count: desc.min_image_count,
            extent: (desc.extent.width, desc.extent.height),
            old: desc.old_swapchain,
        });
        state.last_old_swapchain = desc.old_swapchain;

        if state.swapchain_create_failures > 0 {
            state.swapchain_create_failures -= 1;
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }

        let swapchain = state.handle();
        let images = (0..desc.min_image_count).map(|_| state.handle()).collect();
        state.swapchains.insert(swapchain, MockSwapchain { images, next_image: 0 });
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.calls.push(Call::DestroySwapchain);
        state.swapchains.remove(&swapchain);
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let state = self.state.lock();
        state
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let mut state = self.state.lock();
        if let Some(budget) = state.view_budget.as_mut() {
            if *budget == 0 {
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            *budget -= 1;
        }
        let view = state.handle();
        state.views.insert(view);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.lock().views.remove(&view);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        state.calls.push(Call::Acquire { signal });

        if let Some(result) = state.acquire_script.pop_front() {
            return result;
        }

        let chain = state
            .swapchains
            .get_mut(&swapchain)
            .expect("acquire on a destroyed swapchain");
        let index = chain.next_image;
        chain.next_image = (index + 1) % chain.images.len() as u32;
        Ok((index, false))
    }

    fn queue_present(&self, _swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.calls.push(Call::Present { image_index, wait });
        state.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        state.take_sync_budget()?;
        let semaphore = state.handle();
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        state.take_sync_budget()?;
        let fence = state.handle();
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        assert!(
            !state.gpu_queue.contains(&fence),
            "destroying fence {:?} while its submission is in flight",
            fence
        );
        state.fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitFence(fence));

        if state.fence_stalls > 0 {
            state.fence_stalls -= 1;
            return Err(vk::Result::TIMEOUT);
        }

        let signaled = state.fences.get(&fence).copied();
        match signaled {
            Some(true) => Ok(()),
            Some(false) if state.gpu_queue.contains(&fence) => {
                state.complete_through(fence);
                Ok(())
            }
            Some(false) => panic!("waiting on fence {:?} that no submission will signal", fence),
            None => panic!("waiting on unknown fence {:?}", fence),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ResetFence(fence));
        assert!(
            !state.gpu_queue.contains(&fence),
            "resetting fence {:?} while the GPU still owns it",
            fence
        );
        state.fences.insert(fence, false);

        let unsignaled = state.fences.values().filter(|&&signaled| !signaled).count();
        state.unsignaled_peak = state.unsignaled_peak.max(unsignaled);
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> VkResult<bool> {
        let state = self.state.lock();
        state.fences.get(&fence).copied().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn queue_submit(&self, submission: &Submission) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Submit {
            fence: submission.fence,
            wait: submission.wait_semaphore,
            signal: submission.signal_semaphore,
            stage: submission.wait_stage,
        });

        if submission.fence != vk::Fence::null() {
            assert_eq!(
                state.fences.get(&submission.fence),
                Some(&false),
                "submitted with fence {:?} that is not reset",
                submission.fence
            );
            state.gpu_queue.push_back(submission.fence);
        }
        state.in_flight_peak = state.in_flight_peak.max(state.gpu_queue.len());
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitIdle);
        if let Some(err) = state.wait_idle_error {
            return Err(err);
        }
        while let Some(done) = state.gpu_queue.pop_front() {
            state.fences.insert(done, true);
        }
        Ok(())
    }
}

/// Window stand-in with a settable framebuffer size
pub struct MockWindow {
    size: Mutex<(u32, u32)>,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new((width, height)),
        })
    }

    pub fn resize(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
    }
}

impl FramebufferSource for MockWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        *self.size.lock()
    }
}
