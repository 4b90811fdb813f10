// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for the frame core.
//!
//! [`VkGpu`] owns the instance, surface, device and queues. Everything the
//! frame core creates through the [`Gpu`] trait is destroyed by the core
//! before the `VkGpu` is dropped.
#![deny(unsafe_op_in_unsafe_fn)]

mod device;
mod error;
mod record;
mod swapchain;

use std::time::Duration;

use anyhow::{Context, Result};
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::{vk, Entry, Instance};
use cubic_render::{
    Acquired, Gpu, GpuResult, Presented, QueueKind, SubmitInfo, SurfaceCaps, SwapchainDesc,
    SwapchainParts,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::device::{DebugState, Queues};
use crate::error::{map_vk, stages_to_vk, VkResultExt};

pub use crate::record::{record_clear, StreamBuffer};
pub use crate::swapchain::{pick_surface_format, SurfaceFormat};

pub struct VkGpu {
    entry: Entry,
    instance: Instance,
    debug_messenger: DebugState,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    device: ash::Device,
    queues: Queues,
    swapchain_loader: khr_swapchain::Device,
}

impl VkGpu {
    /// Instance, surface, device, in that order. The surface must exist
    /// before the device so present support can be checked against it.
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::linked();
        let instance = unsafe { device::create_instance(&entry, dh) }?;

        let debug_messenger = match unsafe { device::create_debug_messenger(&entry, &instance) } {
            Ok(d) => d,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe {
                    device::destroy_debug_messenger(&entry, &instance, debug_messenger);
                    instance.destroy_instance(None);
                }
                return Err(e).context("ash_window::create_surface");
            }
        };

        let picked = unsafe { device::pick_device(&instance, &surface_loader, surface) }
            .and_then(|(phys, pick)| {
                unsafe { device::create_device(&instance, phys, pick) }.map(|d| (phys, d))
            });
        let (phys, (device, queues)) = match picked {
            Ok(p) => p,
            Err(e) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    device::destroy_debug_messenger(&entry, &instance, debug_messenger);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let swapchain_loader = khr_swapchain::Device::new(&instance, &device);
        info!(
            dedicated_transfer = !queues.shares_family(),
            "vulkan device ready"
        );

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            surface_loader,
            surface,
            phys,
            device,
            queues,
            swapchain_loader,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub(crate) fn queues(&self) -> Queues {
        self.queues
    }

    pub(crate) fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe { self.instance.get_physical_device_memory_properties(self.phys) }
    }

    fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.queues.graphics,
            QueueKind::Transfer => self.queues.transfer,
        }
    }
}

fn timeout_ns(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
}

impl Gpu for VkGpu {
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type CommandPool = vk::CommandPool;
    type CommandBuffer = vk::CommandBuffer;
    type Swapchain = vk::SwapchainKHR;
    type Image = vk::Image;
    type ImageView = vk::ImageView;
    type Format = SurfaceFormat;

    fn create_fence(&self, signaled: bool) -> GpuResult<vk::Fence> {
        let info = vk::FenceCreateInfo {
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&info, None) }.gpu("create_fence")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .gpu("create_semaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: Option<Duration>) -> GpuResult<()> {
        if fences.is_empty() {
            return Ok(());
        }
        unsafe { self.device.wait_for_fences(fences, true, timeout_ns(timeout)) }
            .gpu("wait_for_fences")
    }

    fn fence_signaled(&self, fence: vk::Fence) -> GpuResult<bool> {
        unsafe { self.device.get_fence_status(fence) }.gpu("get_fence_status")
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GpuResult<()> {
        unsafe { self.device.reset_fences(fences) }.gpu("reset_fences")
    }

    fn create_command_pool(&self, queue: QueueKind) -> GpuResult<vk::CommandPool> {
        let family = match queue {
            QueueKind::Graphics => self.queues.graphics_family,
            QueueKind::Transfer => self.queues.transfer_family,
        };
        let info = vk::CommandPoolCreateInfo {
            queue_family_index: family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        unsafe { self.device.create_command_pool(&info, None) }.gpu("create_command_pool")
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> GpuResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&info) }.gpu("allocate_command_buffers")
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.free_command_buffers(pool, buffers) };
        }
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> GpuResult<()> {
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
        .gpu("reset_command_pool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> GpuResult<()> {
        let info = vk::CommandBufferBeginInfo {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd, &info) }.gpu("begin_command_buffer")
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> GpuResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }.gpu("end_command_buffer")
    }

    fn submit(
        &self,
        queue: QueueKind,
        info: &SubmitInfo<'_, Self>,
        fence: Option<vk::Fence>,
    ) -> GpuResult<()> {
        let wait_sems: Vec<vk::Semaphore> = info.waits.iter().map(|w| w.semaphore).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            info.waits.iter().map(|w| stages_to_vk(w.stages)).collect();

        let submit = vk::SubmitInfo {
            wait_semaphore_count: wait_sems.len() as u32,
            p_wait_semaphores: wait_sems.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: info.command_buffers.len() as u32,
            p_command_buffers: info.command_buffers.as_ptr(),
            signal_semaphore_count: info.signals.len() as u32,
            p_signal_semaphores: info.signals.as_ptr(),
            ..Default::default()
        };
        debug!(?queue, waits = wait_sems.len(), signals = info.signals.len(), "queue_submit");
        unsafe {
            self.device.queue_submit(
                self.queue(queue),
                std::slice::from_ref(&submit),
                fence.unwrap_or_default(),
            )
        }
        .gpu("queue_submit")
    }

    fn device_wait_idle(&self) -> GpuResult<()> {
        unsafe { self.device.device_wait_idle() }.gpu("device_wait_idle")
    }

    fn surface_caps(&self) -> GpuResult<SurfaceCaps<SurfaceFormat>> {
        unsafe { swapchain::query_caps(&self.surface_loader, self.phys, self.surface) }
    }

    fn pick_surface_format(&self, formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
        pick_surface_format(formats)
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc<SurfaceFormat>,
        old: Option<vk::SwapchainKHR>,
    ) -> GpuResult<SwapchainParts<Self>> {
        let (handle, images, views) = unsafe {
            swapchain::create_chain(
                &self.device,
                &self.swapchain_loader,
                &self.surface_loader,
                self.phys,
                self.surface,
                desc,
                old,
            )
        }?;
        info!(
            format = %desc.format,
            extent = %desc.extent,
            images = images.len(),
            "vk swapchain created"
        );
        Ok(SwapchainParts { handle, images, views })
    }

    fn destroy_swapchain(&self, parts: SwapchainParts<Self>) {
        // Views before the chain they were created from.
        unsafe {
            for v in parts.views {
                self.device.destroy_image_view(v, None);
            }
            self.swapchain_loader.destroy_swapchain(parts.handle, None);
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> GpuResult<Acquired> {
        match unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        } {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(map_vk("acquire_next_image", e)),
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> GpuResult<Presented> {
        let info = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.queues.graphics, &info) } {
            Ok(false) => Ok(Presented::Optimal),
            Ok(true) => Ok(Presented::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::OutOfDate),
            Err(e) => Err(map_vk("queue_present", e)),
        }
    }
}

// TEARDOWN ORDER:
// - Everything created through `Gpu` is already gone (the renderer owns it)
// - device_wait_idle()
// - Device, then surface, then debug messenger, instance last
impl Drop for VkGpu {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            device::destroy_debug_messenger(&self.entry, &self.instance, self.debug_messenger);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_ns(None), u64::MAX);
        assert_eq!(timeout_ns(Some(Duration::from_millis(3))), 3_000_000);
        assert_eq!(timeout_ns(Some(Duration::MAX)), u64::MAX);
    }
}
