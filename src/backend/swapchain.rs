// Swapchain - Window presentation
//
// Owns the swapchain handle, its images and one view per image, and is
// rebuilt as a unit whenever the surface stops matching. Images belong to the
// swapchain; views are created and destroyed here.
//
// Invariant: views.len() == images.len(), both empty iff the handle is null.

use ash::vk;
use std::sync::Arc;

use super::context::{DeviceContext, SwapchainDesc};
use super::surface::{choose_surface_format, PresentationSurface};
use crate::error::{FrameError, FrameResult};

/// Outcome of an acquire that did not fail hard
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    /// Index is valid. `suboptimal` asks for a rebuild after this frame is presented.
    Image { index: u32, suboptimal: bool },
    /// Swapchain no longer matches the surface; nothing was acquired
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentResult {
    Ok,
    Suboptimal,
    OutOfDate,
}

/// Clamp a requested image count to the surface limits (max 0 = unbounded).
pub fn clamp_image_count(desired: u32, min: u32, max: u32) -> u32 {
    let count = desired.max(min);
    if max > 0 {
        count.min(max)
    } else {
        count
    }
}

pub struct SwapchainResources<D: DeviceContext> {
    device: Arc<D>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl<D: DeviceContext> SwapchainResources<D> {
    /// An instance holding nothing; `destroy()` and drop are no-ops.
    pub fn empty(device: Arc<D>) -> Self {
        Self {
            device,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
        }
    }

    /// Build a swapchain for `surface` from a fresh capability query.
    ///
    /// `previous`, when given, is handed to the platform as the swapchain
    /// being replaced. A zero drawable extent is refused with
    /// [`FrameError::ZeroExtent`] before any native call is made.
    pub fn create(
        device: Arc<D>,
        surface: &PresentationSurface<D>,
        desired_image_count: u32,
        previous: Option<vk::SwapchainKHR>,
    ) -> FrameResult<Self> {
        let caps = surface.capabilities()?;
        let extent = surface.drawable_extent(&caps);
        if extent.width == 0 || extent.height == 0 {
            return Err(FrameError::ZeroExtent {
                width: extent.width,
                height: extent.height,
            });
        }

        let format = choose_surface_format(&caps.formats).ok_or(FrameError::NoSurfaceFormat)?;
        let present_mode = surface.select_present_mode(&caps);
        let image_count = clamp_image_count(desired_image_count, caps.min_image_count, caps.max_image_count);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            format.format,
            present_mode
        );

        let desc = SwapchainDesc {
            surface: surface.handle(),
            min_image_count: image_count,
            surface_format: format,
            extent,
            present_mode,
            pre_transform: caps.current_transform,
            old_swapchain: previous.unwrap_or_else(vk::SwapchainKHR::null),
        };

        let swapchain = device
            .create_swapchain(&desc)
            .map_err(FrameError::SwapchainCreationFailed)?;

        // From here on `Drop` releases whatever was built if a later step fails
        let mut resources = Self {
            device,
            swapchain,
            images: Vec::new(),
            views: Vec::new(),
            format,
            present_mode,
            extent,
        };

        let images = resources
            .device
            .swapchain_images(swapchain)
            .map_err(FrameError::SwapchainCreationFailed)?;

        resources.views.reserve(images.len());
        for &image in &images {
            let view = resources
                .device
                .create_image_view(image, format.format)
                .map_err(FrameError::ImageViewCreationFailed)?;
            resources.views.push(view);
        }
        resources.images = images;

        log::info!("Created swapchain with {} images", resources.images.len());
        Ok(resources)
    }

    /// Release views then the swapchain handle.
    ///
    /// The caller must have drained all GPU work referencing these images.
    /// Calling this on an empty instance does nothing.
    pub fn destroy(&mut self) {
        for view in self.views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.images.clear();

        if self.swapchain != vk::SwapchainKHR::null() {
            self.device.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
            log::debug!("Destroyed swapchain");
        }
    }

    /// Acquire the next presentable image, signaling `signal` when it is ready.
    pub fn acquire_next(&self, timeout: u64, signal: vk::Semaphore) -> FrameResult<Acquired> {
        if self.is_empty() {
            return Ok(Acquired::Stale);
        }

        match self.device.acquire_next_image(self.swapchain, timeout, signal) {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::Stale),
            Err(e) => Err(FrameError::from_vk(e)),
        }
    }

    /// Queue `image_index` for presentation once `wait` is signaled.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> FrameResult<PresentResult> {
        match self.device.queue_present(self.swapchain, image_index, wait) {
            Ok(false) => Ok(PresentResult::Ok),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(FrameError::from_vk(e)),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.swapchain == vk::SwapchainKHR::null()
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl<D: DeviceContext> Drop for SwapchainResources<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
