// Depth targets - per-image resources rebuilt with the swapchain
//
// One depth image + view per swapchain image, always matching the swapchain
// extent. Registered with the scheduler as a SwapchainListener.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::VulkanDevice;
use super::swapchain::SwapchainResources;
use crate::scheduler::SwapchainListener;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

struct DepthTarget {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

pub struct DepthTargets {
    device: Arc<VulkanDevice>,
    targets: Vec<DepthTarget>,
}

impl DepthTargets {
    pub fn new(device: Arc<VulkanDevice>) -> Self {
        Self {
            device,
            targets: Vec::new(),
        }
    }

    fn create_target(&self, extent: vk::Extent2D) -> Result<DepthTarget> {
        let device = &self.device.device;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(DEPTH_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            device
                .create_image(&image_info, None)
                .context("Failed to create depth image")?
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = match find_memory_type(
            &self.device.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Some(index) => index,
            None => {
                unsafe { device.destroy_image(image, None) };
                anyhow::bail!("No device-local memory type for depth image");
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e).context("Failed to allocate depth image memory");
            }
        };

        // Anything built so far is released by destroy_target on failure
        let mut target = DepthTarget {
            image,
            memory,
            view: vk::ImageView::null(),
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let built = unsafe {
            device
                .bind_image_memory(image, memory, 0)
                .context("Failed to bind depth image memory")
                .and_then(|()| {
                    device
                        .create_image_view(&view_info, None)
                        .context("Failed to create depth image view")
                })
        };

        match built {
            Ok(view) => {
                target.view = view;
                Ok(target)
            }
            Err(e) => {
                self.destroy_target(&target);
                Err(e)
            }
        }
    }

    fn destroy_target(&self, target: &DepthTarget) {
        let device = &self.device.device;
        unsafe {
            if target.view != vk::ImageView::null() {
                device.destroy_image_view(target.view, None);
            }
            device.destroy_image(target.image, None);
            device.free_memory(target.memory, None);
        }
    }

    fn release(&mut self) {
        for target in std::mem::take(&mut self.targets) {
            self.destroy_target(&target);
        }
    }
}

impl SwapchainListener<VulkanDevice> for DepthTargets {
    fn on_swapchain_recreated(&mut self, swapchain: &SwapchainResources<VulkanDevice>) -> Result<()> {
        // The scheduler only notifies after the device has gone idle
        self.release();

        let extent = swapchain.extent();
        for _ in 0..swapchain.image_count() {
            let target = self.create_target(extent)?;
            self.targets.push(target);
        }

        log::debug!(
            "Rebuilt {} depth targets at {}x{}",
            self.targets.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }
}

impl Drop for DepthTargets {
    fn drop(&mut self) {
        self.release();
    }
}

/// First memory type allowed by `type_filter` that has all of `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let allowed = type_filter & (1 << i) != 0;
        allowed
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}
