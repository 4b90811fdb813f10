// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Failure reported by a [`Gpu`](crate::Gpu) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    #[error("device lost")]
    DeviceLost,

    #[error("out of memory in {0}")]
    OutOfMemory(&'static str),

    #[error("surface lost")]
    SurfaceLost,

    /// A bounded wait expired. Unbounded waits never produce this.
    #[error("wait timed out")]
    Timeout,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{op} failed: {code}")]
    Backend { op: &'static str, code: String },
}

/// Error type of the frame orchestration core.
///
/// Recoverable swapchain staleness never shows up here; it is resolved
/// internally and surfaced as [`FrameStatus::Skipped`](crate::FrameStatus).
/// Everything below is terminating for the frame loop.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("invalid frame config: {0}")]
    InvalidConfig(String),

    #[error("surface exposes no usable color format")]
    NoSurfaceFormat,

    #[error("surface exposes no usable present mode")]
    NoPresentMode,

    /// A rebuild must never change the color format.
    #[error("swapchain format changed across rebuild ({before} -> {after})")]
    FormatChanged { before: String, after: String },

    #[error("creating sync objects for frame slot {slot}")]
    SyncCreation {
        slot: usize,
        #[source]
        source: GpuError,
    },

    #[error("fence wait exceeded {waited_ms} ms, treating as device loss")]
    FenceTimeout { waited_ms: u64 },

    #[error("record callback failed")]
    Record(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Caller broke the frame protocol (acquire twice, submit without acquire, ...).
    #[error("renderer misuse: {0}")]
    Misuse(&'static str),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Builds a [`RenderError::Misuse`] and logs it at error level.
pub(crate) fn misuse(what: &'static str) -> RenderError {
    tracing::error!("renderer misuse: {what}");
    RenderError::Misuse(what)
}
