// SPDX-License-Identifier: CEPL-1.0
//! Small recording helpers for callers that drive [`VkGpu`] directly.

use anyhow::{anyhow, Context, Result};
use ash::vk;

use crate::swapchain::color_range;
use crate::VkGpu;

/// Clears a freshly acquired swapchain image and leaves it ready to present.
///
/// The first barrier waits at TRANSFER, which is where the frame core makes
/// graphics work wait for the acquire semaphore.
pub fn record_clear(gpu: &VkGpu, cmd: vk::CommandBuffer, image: vk::Image, rgba: [f32; 4]) {
    let d = gpu.device();

    let to_dst = vk::ImageMemoryBarrier2 {
        src_stage_mask: vk::PipelineStageFlags2::TRANSFER,
        src_access_mask: vk::AccessFlags2::empty(),
        dst_stage_mask: vk::PipelineStageFlags2::TRANSFER,
        dst_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        image,
        subresource_range: color_range(),
        ..Default::default()
    };
    let to_present = vk::ImageMemoryBarrier2 {
        src_stage_mask: vk::PipelineStageFlags2::TRANSFER,
        src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
        dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        dst_access_mask: vk::AccessFlags2::empty(),
        old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        image,
        subresource_range: color_range(),
        ..Default::default()
    };
    let clear = vk::ClearColorValue { float32: rgba };
    let range = color_range();

    unsafe {
        d.cmd_pipeline_barrier2(
            cmd,
            &vk::DependencyInfo {
                image_memory_barrier_count: 1,
                p_image_memory_barriers: &to_dst,
                ..Default::default()
            },
        );
        d.cmd_clear_color_image(
            cmd,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &clear,
            std::slice::from_ref(&range),
        );
        d.cmd_pipeline_barrier2(
            cmd,
            &vk::DependencyInfo {
                image_memory_barrier_count: 1,
                p_image_memory_barriers: &to_present,
                ..Default::default()
            },
        );
    }
}

fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && mem.memory_types[i as usize].property_flags.contains(req)
    })
}

/// Device-local buffer written by the transfer queue and read by graphics.
///
/// Shared concurrently between the two families when they differ, so no
/// ownership transfer barriers are needed. Must be destroyed before the
/// [`VkGpu`] it came from.
#[derive(Debug)]
pub struct StreamBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl StreamBuffer {
    pub fn new(gpu: &VkGpu, size: vk::DeviceSize) -> Result<Self> {
        let d = gpu.device();
        let q = gpu.queues();
        let families = [q.graphics_family, q.transfer_family];
        let (sharing_mode, family_count) = if q.shares_family() {
            (vk::SharingMode::EXCLUSIVE, 0)
        } else {
            (vk::SharingMode::CONCURRENT, 2)
        };

        let bci = vk::BufferCreateInfo {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER,
            sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            ..Default::default()
        };
        let buffer = unsafe { d.create_buffer(&bci, None) }.context("create_buffer")?;

        let req = unsafe { d.get_buffer_memory_requirements(buffer) };
        let Some(mem_type) = find_memory_type(
            &gpu.memory_properties(),
            req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) else {
            unsafe { d.destroy_buffer(buffer, None) };
            return Err(anyhow!("no device-local memory type for stream buffer"));
        };

        let mai = vk::MemoryAllocateInfo {
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        let memory = match unsafe { d.allocate_memory(&mai, None) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { d.destroy_buffer(buffer, None) };
                return Err(e).context("allocate_memory");
            }
        };
        if let Err(e) = unsafe { d.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                d.destroy_buffer(buffer, None);
                d.free_memory(memory, None);
            }
            return Err(e).context("bind_buffer_memory");
        }

        Ok(Self { buffer, memory, size })
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Records a fill of the whole buffer with `value`.
    pub fn record_fill(&self, gpu: &VkGpu, cmd: vk::CommandBuffer, value: u32) {
        unsafe { gpu.device().cmd_fill_buffer(cmd, self.buffer, 0, vk::WHOLE_SIZE, value) };
    }

    /// The caller must make sure no submitted work still uses the buffer.
    pub fn destroy(self, gpu: &VkGpu) {
        let d = gpu.device();
        unsafe {
            d.destroy_buffer(self.buffer, None);
            d.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_memory_type() {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        mem.memory_types[0].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        mem.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        mem.memory_types[2].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;

        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(find_memory_type(&mem, 0b111, local), Some(1));
        assert_eq!(find_memory_type(&mem, 0b100, local), Some(2));
        assert_eq!(find_memory_type(&mem, 0b001, local), None);
    }
}
