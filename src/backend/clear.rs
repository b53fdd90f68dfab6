// Clear pass - the simplest CommandRecorder
//
// One command buffer per frame slot, re-recorded every frame. Reusing a slot's
// buffer is safe because the scheduler waits on that slot's fence before it
// asks for a recording.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::VulkanDevice;
use crate::scheduler::{CommandRecorder, FrameTarget};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Clears the acquired image to a solid color and hands it to presentation.
pub struct ClearPass {
    device: Arc<VulkanDevice>,
    command_pool: vk::CommandPool,
    /// Indexed by frame slot
    command_buffers: Vec<vk::CommandBuffer>,
    clear_color: [f32; 4],
}

impl ClearPass {
    pub fn new(device: Arc<VulkanDevice>, frames_in_flight: usize, clear_color: [f32; 4]) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            // TRANSIENT: re-recorded every frame
            // RESET: each slot's buffer is reset on its own
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe {
            device
                .device
                .create_command_pool(&pool_info, None)
                .context("Failed to create command pool")?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);

        let command_buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(e).context("Failed to allocate command buffers");
            }
        };

        log::info!("Clear pass: {} command buffers", command_buffers.len());

        Ok(Self {
            device,
            command_pool,
            command_buffers,
            clear_color,
        })
    }
}

impl CommandRecorder for ClearPass {
    fn record(&mut self, target: &FrameTarget) -> Result<vk::CommandBuffer> {
        let cmd = *self
            .command_buffers
            .get(target.slot)
            .with_context(|| format!("No command buffer for frame slot {}", target.slot))?;
        let device = &self.device.device;
        let [to_transfer, to_present] = clear_barriers(target.image);
        let clear_color = vk::ClearColorValue {
            float32: self.clear_color,
        };

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            // Source stage matches the submission's acquire wait stage so the
            // layout change cannot start before the image is ours
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            device.cmd_clear_color_image(
                cmd,
                target.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_color,
                &[COLOR_RANGE],
            );

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present],
            );

            device.end_command_buffer(cmd)?;
        }

        Ok(cmd)
    }
}

impl Drop for ClearPass {
    fn drop(&mut self) {
        // Frees the command buffers too; the scheduler has drained the queue by now
        unsafe {
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// UNDEFINED -> TRANSFER_DST before the clear, TRANSFER_DST -> PRESENT_SRC after.
/// Old contents are discarded.
pub fn clear_barriers(image: vk::Image) -> [vk::ImageMemoryBarrier; 2] {
    let to_transfer = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .build();

    let to_present = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::empty())
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .build();

    [to_transfer, to_present]
}
