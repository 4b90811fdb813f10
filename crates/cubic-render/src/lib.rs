// SPDX-License-Identifier: CEPL-1.0
//! Frame orchestration core.
//!
//! Synchronizes CPU command recording with GPU execution across several
//! frames in flight, owns the swapchain lifecycle and sequences the graphics
//! and transfer queues. Everything here is written against the [`Gpu`] and
//! [`SurfaceProvider`] seams; `cubic-render-vk` supplies the Vulkan side and
//! [`headless`] a deterministic stand-in used by tests and smoke runs.
//!
//! Frame lifecycle: `acquire -> record -> submit -> present`, see [`Renderer`].
#![deny(unsafe_op_in_unsafe_fn)]

pub mod commands;
pub mod config;
pub mod error;
pub mod gpu;
pub mod headless;
pub mod renderer;
pub mod submit;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use commands::{CommandBufferScheduler, CommandBufferState};
pub use config::{FrameConfig, VsyncMode, MAX_FRAMES_IN_FLIGHT};
pub use error::{GpuError, RenderError, RenderResult};
pub use gpu::{
    Acquired, Gpu, GpuResult, PipelineStages, PresentMode, Presented, QueueKind, SemaphoreWait,
    SubmitInfo, SurfaceCaps, SwapchainDesc, SwapchainParts,
};
pub use renderer::{
    DrawStatus, FrameStatus, FrameToken, PresentStatus, RecordContext, Renderer, SkipReason,
};
pub use submit::{GraphicsSubmission, SubmissionPipeline, TransferSubmission};
pub use surface::SurfaceProvider;
pub use swapchain::{Rebuild, Swapchain, SwapchainManager};
pub use sync::{FrameState, FrameSyncController};

/// Drawable extent in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports zero in at least one dimension.
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
