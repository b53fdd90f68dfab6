// Presentation surface - the window's drawable, queried for capabilities
//
// Capabilities are queried fresh on every call. Nothing here is cached across
// a resize: the swapchain build path always asks again.

use ash::vk;
use std::sync::Arc;

use super::context::DeviceContext;
use crate::error::{FrameError, FrameResult};

/// Preferred swapchain format: 8 bits per channel, sRGB encoded
pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Sentinel the platform uses for "extent is decided by the swapchain"
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

/// Anything that can report the window's framebuffer size in pixels.
pub trait FramebufferSource: Send + Sync {
    fn framebuffer_size(&self) -> (u32, u32);
}

impl FramebufferSource for winit::window::Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }
}

/// Snapshot of what the surface supports right now.
#[derive(Clone, Debug)]
pub struct SurfaceCapabilities {
    /// Order as reported by the platform
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub min_image_count: u32,
    /// 0 means no upper bound
    pub max_image_count: u32,
    pub current_extent: vk::Extent2D,
    pub min_image_extent: vk::Extent2D,
    pub max_image_extent: vk::Extent2D,
    pub current_transform: vk::SurfaceTransformFlagsKHR,
}

/// Owns the native surface handle bound to one window.
pub struct PresentationSurface<D: DeviceContext> {
    device: Arc<D>,
    surface: vk::SurfaceKHR,
    window: Arc<dyn FramebufferSource>,
    low_latency_mode: vk::PresentModeKHR,
}

impl<D: DeviceContext> PresentationSurface<D> {
    /// Take ownership of `surface`; it is destroyed when this value drops.
    pub fn new(device: Arc<D>, surface: vk::SurfaceKHR, window: Arc<dyn FramebufferSource>) -> Self {
        Self {
            device,
            surface,
            window,
            low_latency_mode: vk::PresentModeKHR::MAILBOX,
        }
    }

    /// Replace the preferred low-latency present mode (FIFO stays the fallback).
    pub fn with_low_latency_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.low_latency_mode = mode;
        self
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn capabilities(&self) -> FrameResult<SurfaceCapabilities> {
        let caps = self
            .device
            .surface_capabilities(self.surface)
            .map_err(FrameError::SurfaceLost)?;
        let formats = self
            .device
            .surface_formats(self.surface)
            .map_err(FrameError::SurfaceLost)?;
        let present_modes = self
            .device
            .surface_present_modes(self.surface)
            .map_err(FrameError::SurfaceLost)?;

        log::debug!(
            "Surface: {} formats, {} present modes, image count {}-{}",
            formats.len(),
            present_modes.len(),
            caps.min_image_count,
            if caps.max_image_count == 0 {
                "unbounded".to_string()
            } else {
                caps.max_image_count.to_string()
            }
        );

        Ok(SurfaceCapabilities {
            formats,
            present_modes,
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
            current_extent: caps.current_extent,
            min_image_extent: caps.min_image_extent,
            max_image_extent: caps.max_image_extent,
            current_transform: caps.current_transform,
        })
    }

    pub fn preferred_format(&self) -> FrameResult<vk::SurfaceFormatKHR> {
        choose_surface_format(&self.capabilities()?.formats).ok_or(FrameError::NoSurfaceFormat)
    }

    pub fn preferred_present_mode(&self) -> FrameResult<vk::PresentModeKHR> {
        Ok(self.select_present_mode(&self.capabilities()?))
    }

    pub(crate) fn select_present_mode(&self, caps: &SurfaceCapabilities) -> vk::PresentModeKHR {
        choose_present_mode(&caps.present_modes, self.low_latency_mode)
    }

    /// Drawable size for a swapchain built from `caps`.
    ///
    /// Uses the surface's current extent unless it carries the undefined
    /// sentinel, in which case the window's framebuffer size is clamped to the
    /// surface limits.
    pub fn drawable_extent(&self, caps: &SurfaceCapabilities) -> vk::Extent2D {
        choose_extent(caps, self.window.framebuffer_size())
    }
}

impl<D: DeviceContext> Drop for PresentationSurface<D> {
    fn drop(&mut self) {
        self.device.destroy_surface(self.surface);
        log::debug!("Destroyed presentation surface");
    }
}

/// Preferred sRGB format if supported, else the first reported entry.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .or_else(|| formats.first())
        .copied()
}

/// `preferred` if supported, else FIFO (always available).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == preferred)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &SurfaceCapabilities, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        return caps.current_extent;
    }

    // A minimized window stays zero-sized; clamping would turn it into 1x1
    let (width, height) = framebuffer_size;
    if width == 0 || height == 0 {
        return vk::Extent2D { width, height };
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockDevice, MockWindow};

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps_with_extent(current: (u32, u32)) -> SurfaceCapabilities {
        SurfaceCapabilities {
            formats: vec![],
            present_modes: vec![],
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        }
    }

    #[test]
    fn preferred_format_wins_in_any_position() {
        let preferred = format(PREFERRED_FORMAT, PREFERRED_COLOR_SPACE);
        let others = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::HDR10_ST2084_EXT),
        ];

        for position in 0..=others.len() {
            let mut formats = others.to_vec();
            formats.insert(position, preferred);
            let chosen = choose_surface_format(&formats).unwrap();
            assert_eq!(chosen.format, PREFERRED_FORMAT);
            assert_eq!(chosen.color_space, PREFERRED_COLOR_SPACE);
        }
    }

    #[test]
    fn format_falls_back_to_first_entry() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // Right format, wrong color space: not a match
            format(PREFERRED_FORMAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);

        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_prefers_mailbox_then_fifo() {
        let with_mailbox = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            choose_present_mode(&with_mailbox, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );

        // IMMEDIATE is not a substitute: strict preference, not a score
        let without = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(
            choose_present_mode(&without, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_present_mode(&[], vk::PresentModeKHR::MAILBOX), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_current_extent_when_defined() {
        let caps = caps_with_extent((800, 600));
        let extent = choose_extent(&caps, (1920, 1080));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_falls_back_to_clamped_framebuffer_size() {
        let caps = caps_with_extent((UNDEFINED_EXTENT, UNDEFINED_EXTENT));
        let extent = choose_extent(&caps, (1280, 720));
        assert_eq!((extent.width, extent.height), (1280, 720));

        let extent = choose_extent(&caps, (10_000, 3));
        assert_eq!((extent.width, extent.height), (4096, 3));
    }

    #[test]
    fn zero_sized_window_is_not_clamped_up() {
        let caps = caps_with_extent((UNDEFINED_EXTENT, UNDEFINED_EXTENT));
        for size in [(0, 0), (10_000, 0), (0, 720)] {
            let extent = choose_extent(&caps, size);
            assert!(extent.width == 0 || extent.height == 0, "{:?} became {:?}", size, extent);
        }
    }

    #[test]
    fn capabilities_are_queried_fresh_each_time() {
        let device = MockDevice::new();
        let surface = device.make_surface();
        let window = MockWindow::new(800, 600);
        let surface = PresentationSurface::new(device.clone(), surface, window);

        assert_eq!(surface.capabilities().unwrap().current_extent.width, 800);
        device.set_current_extent(1024, 768);
        assert_eq!(surface.capabilities().unwrap().current_extent.width, 1024);
        assert_eq!(surface.preferred_format().unwrap().format, PREFERRED_FORMAT);
        assert_eq!(surface.preferred_present_mode().unwrap(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn failed_query_reports_surface_lost() {
        let device = MockDevice::new();
        let surface = device.make_surface();
        let surface = PresentationSurface::new(device.clone(), surface, MockWindow::new(800, 600));

        device.lose_surface();
        assert!(matches!(surface.capabilities(), Err(FrameError::SurfaceLost(_))));
    }

    #[test]
    fn surface_is_destroyed_on_drop() {
        let device = MockDevice::new();
        let handle = device.make_surface();
        let surface = PresentationSurface::new(device.clone(), handle, MockWindow::new(800, 600));
        assert_eq!(device.live_surfaces(), 1);
        drop(surface);
        assert_eq!(device.live_surfaces(), 0);
    }
}
