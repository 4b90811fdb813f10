// SPDX-License-Identifier: CEPL-1.0
//! Queue submission with the per-frame wait/signal sets.
//!
//! Graphics submissions always wait on the slot's acquire semaphore and
//! signal its render-finished semaphore. The transfer-finished semaphore is
//! added to the wait set only when a transfer was submitted since the slot
//! last consumed it.

use tracing::{debug, trace};

use crate::commands::{CommandBufferScheduler, CommandBufferState};
use crate::error::{misuse, RenderResult};
use crate::gpu::{Gpu, PipelineStages, Presented, QueueKind, SemaphoreWait, SubmitInfo};
use crate::swapchain::Swapchain;
use crate::sync::{FrameState, FrameSyncController};

/// Stage the acquire semaphore blocks: the first write to the swapchain
/// image is a transfer-stage clear/blit.
pub const ACQUIRE_WAIT_STAGES: PipelineStages = PipelineStages::TRANSFER;

/// Stages that consume transfer output.
pub const TRANSFER_WAIT_STAGES: PipelineStages =
    PipelineStages::COMPUTE_SHADER.union(PipelineStages::ALL_GRAPHICS);

/// What a graphics submission waited on and signaled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphicsSubmission<S> {
    pub frame_slot: usize,
    pub image_slot: usize,
    pub waits: Vec<SemaphoreWait<S>>,
    pub signals: Vec<S>,
    pub waited_on_transfer: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferSubmission<S> {
    /// Slots whose previous transfer signal was still unconsumed.
    pub waits: Vec<SemaphoreWait<S>>,
    pub signals: Vec<S>,
}

#[derive(Debug, Default)]
pub struct SubmissionPipeline {
    graphics_submits: u64,
    transfer_submits: u64,
}

impl SubmissionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graphics_submits(&self) -> u64 {
        self.graphics_submits
    }

    pub fn transfer_submits(&self) -> u64 {
        self.transfer_submits
    }

    /// Submits the current slot's recorded buffer for `image_slot`.
    ///
    /// The image-in-flight wait and rebind already happened when the image
    /// was acquired, so the recorded commands never raced a previous frame.
    pub fn submit_graphics<G: Gpu>(
        &mut self,
        gpu: &G,
        sync: &mut FrameSyncController<G>,
        commands: &mut CommandBufferScheduler<G>,
        image_slot: usize,
    ) -> RenderResult<GraphicsSubmission<G::Semaphore>> {
        let frame = sync.current_slot();
        if sync.state(frame) != Some(FrameState::Recording)
            || sync.image_owner(image_slot) != Some(frame)
        {
            return Err(misuse("graphics submitted without a matching acquire"));
        }
        if commands.graphics_state(frame, image_slot) != Some(CommandBufferState::Executable) {
            return Err(misuse("graphics submitted before recording finished"));
        }
        let cmd = commands.graphics_buffer(frame, image_slot)?;

        let mut waits = vec![SemaphoreWait::new(
            sync.image_available(frame),
            ACQUIRE_WAIT_STAGES,
        )];
        let waited_on_transfer = sync.take_transfer_pending(frame);
        if waited_on_transfer {
            waits.push(SemaphoreWait::new(
                sync.transfer_finished(frame),
                TRANSFER_WAIT_STAGES,
            ));
        }
        let signals = vec![sync.render_finished(frame)];

        sync.reset_fence(gpu)?;
        gpu.submit(
            QueueKind::Graphics,
            &SubmitInfo {
                waits: &waits,
                command_buffers: &[cmd],
                signals: &signals,
            },
            Some(sync.fence(frame)),
        )?;
        commands.mark_graphics_submitted(frame, image_slot)?;
        sync.mark_submitted();
        self.graphics_submits += 1;
        trace!(frame, image_slot, waited_on_transfer, "graphics submit");

        Ok(GraphicsSubmission {
            frame_slot: frame,
            image_slot,
            waits,
            signals,
            waited_on_transfer,
        })
    }

    /// Submits the recorded transfer buffer and arms every slot's
    /// transfer-finished semaphore.
    ///
    /// A slot whose semaphore is still armed from an earlier transfer gets
    /// that signal consumed here first, so each slot's graphics submission
    /// still waits exactly once and no binary semaphore is signaled twice.
    pub fn submit_transfer<G: Gpu>(
        &mut self,
        gpu: &G,
        sync: &mut FrameSyncController<G>,
        commands: &mut CommandBufferScheduler<G>,
    ) -> RenderResult<TransferSubmission<G::Semaphore>> {
        if commands.transfer_state() != CommandBufferState::Executable {
            return Err(misuse("transfer submitted before recording finished"));
        }
        let slots = sync.frames_in_flight();
        let mut waits = Vec::new();
        for slot in 0..slots {
            if sync.transfer_pending(slot) {
                debug!("frame slot {slot} has not consumed the last transfer, re-arming");
                waits.push(SemaphoreWait::new(
                    sync.transfer_finished(slot),
                    PipelineStages::TRANSFER,
                ));
            }
        }
        let signals: Vec<_> = (0..slots).map(|s| sync.transfer_finished(s)).collect();

        let fence = commands.transfer_fence();
        gpu.reset_fences(&[fence])?;
        gpu.submit(
            QueueKind::Transfer,
            &SubmitInfo {
                waits: &waits,
                command_buffers: &[commands.transfer_buffer()],
                signals: &signals,
            },
            Some(fence),
        )?;
        commands.mark_transfer_submitted()?;
        for slot in 0..slots {
            sync.set_transfer_pending(slot, true);
        }
        self.transfer_submits += 1;

        Ok(TransferSubmission { waits, signals })
    }

    /// Queues `image_slot` for presentation behind the current slot's
    /// render-finished semaphore.
    pub fn present<G: Gpu>(
        &mut self,
        gpu: &G,
        sync: &FrameSyncController<G>,
        swapchain: &Swapchain<G>,
        image_slot: usize,
    ) -> RenderResult<Presented> {
        let frame = sync.current_slot();
        if sync.state(frame) != Some(FrameState::Submitted)
            || sync.image_owner(image_slot) != Some(frame)
        {
            return Err(misuse("present without a matching graphics submission"));
        }
        let result = gpu.queue_present(
            swapchain.handle(),
            image_slot as u32,
            sync.render_finished(frame),
        )?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_masks() {
        assert_eq!(ACQUIRE_WAIT_STAGES, PipelineStages::TRANSFER);
        assert!(TRANSFER_WAIT_STAGES.contains(PipelineStages::COMPUTE_SHADER));
        assert!(TRANSFER_WAIT_STAGES.contains(PipelineStages::ALL_GRAPHICS));
        assert!(!TRANSFER_WAIT_STAGES.contains(PipelineStages::TRANSFER));
    }
}
