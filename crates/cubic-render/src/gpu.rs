// SPDX-License-Identifier: CEPL-1.0
//! The backend seam.
//!
//! [`Gpu`] is the narrow slice of a graphics API the frame core needs:
//! fences, binary semaphores, command pools, two queues and a presentable
//! surface. Handles are plain `Copy` values; ownership of what they refer to
//! is tracked by the core (one owner per handle) and released through the
//! matching `destroy_*` call.

use std::fmt::Debug;
use std::time::Duration;

use bitflags::bitflags;

use crate::error::GpuError;
use crate::RenderSize;

pub type GpuResult<T> = Result<T, GpuError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Transfer,
}

bitflags! {
    /// Pipeline stages a semaphore wait blocks.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const TRANSFER = 1 << 1;
        const COMPUTE_SHADER = 1 << 2;
        const ALL_GRAPHICS = 1 << 3;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 4;
        const BOTTOM_OF_PIPE = 1 << 5;
        const ALL_COMMANDS = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreWait<S> {
    pub semaphore: S,
    pub stages: PipelineStages,
}

impl<S> SemaphoreWait<S> {
    pub fn new(semaphore: S, stages: PipelineStages) -> Self {
        Self { semaphore, stages }
    }
}

/// One batch handed to [`Gpu::submit`].
pub struct SubmitInfo<'a, G: Gpu + ?Sized> {
    pub waits: &'a [SemaphoreWait<G::Semaphore>],
    pub command_buffers: &'a [G::CommandBuffer],
    pub signals: &'a [G::Semaphore],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceCaps<F> {
    pub formats: Vec<F>,
    pub present_modes: Vec<PresentMode>,
    pub min_image_count: u32,
    /// 0 means "no upper bound".
    pub max_image_count: u32,
    /// Set when the platform dictates the extent; `None` means the
    /// swapchain decides within `min_extent..=max_extent`.
    pub current_extent: Option<RenderSize>,
    pub min_extent: RenderSize,
    pub max_extent: RenderSize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc<F> {
    pub format: F,
    pub present_mode: PresentMode,
    pub extent: RenderSize,
    pub image_count: u32,
}

/// A freshly created image chain. Views are created by the backend and
/// destroyed together with the chain.
pub struct SwapchainParts<G: Gpu + ?Sized> {
    pub handle: G::Swapchain,
    pub images: Vec<G::Image>,
    pub views: Vec<G::ImageView>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface. No semaphore was signaled.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Optimal,
    Suboptimal,
    OutOfDate,
}

pub trait Gpu {
    type Fence: Copy + Eq + Debug;
    type Semaphore: Copy + Eq + Debug;
    type CommandPool: Copy + Eq + Debug;
    type CommandBuffer: Copy + Eq + Debug;
    type Swapchain: Copy + Eq + Debug;
    type Image: Copy + Eq + Debug;
    type ImageView: Copy + Eq + Debug;
    type Format: Copy + Eq + Debug;

    fn create_fence(&self, signaled: bool) -> GpuResult<Self::Fence>;
    fn destroy_fence(&self, fence: Self::Fence);
    fn create_semaphore(&self) -> GpuResult<Self::Semaphore>;
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);

    /// Blocks until every fence is signaled. `None` waits forever.
    fn wait_for_fences(&self, fences: &[Self::Fence], timeout: Option<Duration>) -> GpuResult<()>;
    fn fence_signaled(&self, fence: Self::Fence) -> GpuResult<bool>;
    fn reset_fences(&self, fences: &[Self::Fence]) -> GpuResult<()>;

    fn create_command_pool(&self, queue: QueueKind) -> GpuResult<Self::CommandPool>;
    fn allocate_command_buffers(
        &self,
        pool: Self::CommandPool,
        count: u32,
    ) -> GpuResult<Vec<Self::CommandBuffer>>;
    fn free_command_buffers(&self, pool: Self::CommandPool, buffers: &[Self::CommandBuffer]);
    fn reset_command_pool(&self, pool: Self::CommandPool) -> GpuResult<()>;
    /// Also frees every buffer allocated from `pool`.
    fn destroy_command_pool(&self, pool: Self::CommandPool);

    /// Begins recording; any previous contents are discarded.
    fn begin_command_buffer(&self, cmd: Self::CommandBuffer) -> GpuResult<()>;
    fn end_command_buffer(&self, cmd: Self::CommandBuffer) -> GpuResult<()>;

    fn submit(
        &self,
        queue: QueueKind,
        info: &SubmitInfo<'_, Self>,
        fence: Option<Self::Fence>,
    ) -> GpuResult<()>;
    fn device_wait_idle(&self) -> GpuResult<()>;

    fn surface_caps(&self) -> GpuResult<SurfaceCaps<Self::Format>>;

    /// Backend format policy. Must pick from `formats`.
    fn pick_surface_format(&self, formats: &[Self::Format]) -> Option<Self::Format> {
        formats.first().copied()
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc<Self::Format>,
        old: Option<Self::Swapchain>,
    ) -> GpuResult<SwapchainParts<Self>>;
    fn destroy_swapchain(&self, parts: SwapchainParts<Self>);

    fn acquire_next_image(
        &self,
        swapchain: Self::Swapchain,
        signal: Self::Semaphore,
    ) -> GpuResult<Acquired>;
    fn queue_present(
        &self,
        swapchain: Self::Swapchain,
        image_index: u32,
        wait: Self::Semaphore,
    ) -> GpuResult<Presented>;
}
