// SPDX-License-Identifier: CEPL-1.0
//! Pre-allocated command buffers for the graphics and transfer queues.

use std::time::Duration;

use tracing::debug;

use crate::error::{misuse, RenderResult};
use crate::gpu::{Gpu, QueueKind};
use crate::sync::wait_fences;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    Idle,
    Recording,
    /// Ended, not yet handed to a queue.
    Executable,
    Submitted,
}

/// Graphics buffers live at `frame + frames_in_flight * image`. There is
/// exactly one transfer buffer, guarded by its own fence.
pub struct CommandBufferScheduler<G: Gpu> {
    graphics_pool: G::CommandPool,
    transfer_pool: G::CommandPool,
    graphics: Vec<G::CommandBuffer>,
    graphics_state: Vec<CommandBufferState>,
    transfer: G::CommandBuffer,
    transfer_state: CommandBufferState,
    transfer_fence: G::Fence,
    frames_in_flight: usize,
    image_count: usize,
    fence_timeout: Option<Duration>,
    destroyed: bool,
}

impl<G: Gpu> CommandBufferScheduler<G> {
    pub fn new(
        gpu: &G,
        frames_in_flight: usize,
        image_count: usize,
        fence_timeout: Option<Duration>,
    ) -> RenderResult<Self> {
        let graphics_pool = gpu.create_command_pool(QueueKind::Graphics)?;
        let transfer_pool = match gpu.create_command_pool(QueueKind::Transfer) {
            Ok(p) => p,
            Err(e) => {
                gpu.destroy_command_pool(graphics_pool);
                return Err(e.into());
            }
        };
        let allocated = gpu
            .allocate_command_buffers(graphics_pool, (frames_in_flight * image_count) as u32)
            .and_then(|graphics| {
                let transfer = gpu.allocate_command_buffers(transfer_pool, 1)?;
                Ok((graphics, transfer))
            })
            .and_then(|(graphics, transfer)| {
                let fence = gpu.create_fence(true)?;
                Ok((graphics, transfer, fence))
            });
        let (graphics, transfer, transfer_fence) = match allocated {
            Ok(v) => v,
            Err(e) => {
                gpu.destroy_command_pool(transfer_pool);
                gpu.destroy_command_pool(graphics_pool);
                return Err(e.into());
            }
        };
        let Some(&transfer) = transfer.first() else {
            gpu.destroy_fence(transfer_fence);
            gpu.destroy_command_pool(transfer_pool);
            gpu.destroy_command_pool(graphics_pool);
            return Err(misuse("backend returned no transfer command buffer"));
        };

        debug!(
            "allocated {} graphics command buffers ({} frames x {} images) + 1 transfer",
            graphics.len(),
            frames_in_flight,
            image_count
        );
        Ok(Self {
            graphics_pool,
            transfer_pool,
            graphics_state: vec![CommandBufferState::Idle; graphics.len()],
            graphics,
            transfer,
            transfer_state: CommandBufferState::Idle,
            transfer_fence,
            frames_in_flight,
            image_count,
            fence_timeout,
            destroyed: false,
        })
    }

    #[inline]
    fn index(&self, frame: usize, image: usize) -> RenderResult<usize> {
        if frame >= self.frames_in_flight || image >= self.image_count {
            return Err(misuse("command buffer slot out of range"));
        }
        Ok(frame + self.frames_in_flight * image)
    }

    pub fn graphics_buffer_count(&self) -> usize {
        self.graphics.len()
    }

    pub fn graphics_buffer(&self, frame: usize, image: usize) -> RenderResult<G::CommandBuffer> {
        Ok(self.graphics[self.index(frame, image)?])
    }

    pub fn graphics_state(&self, frame: usize, image: usize) -> Option<CommandBufferState> {
        self.index(frame, image).ok().map(|i| self.graphics_state[i])
    }

    /// Opens the `(frame, image)` buffer for re-recording. `guard` is the
    /// fence of frame slot `frame`; a submitted buffer is only reused once
    /// it has signaled.
    pub fn begin_graphics(
        &mut self,
        gpu: &G,
        frame: usize,
        image: usize,
        guard: G::Fence,
    ) -> RenderResult<G::CommandBuffer> {
        let i = self.index(frame, image)?;
        match self.graphics_state[i] {
            CommandBufferState::Recording => {
                return Err(misuse("graphics command buffer is already recording"))
            }
            CommandBufferState::Submitted if !gpu.fence_signaled(guard)? => {
                return Err(misuse("graphics command buffer reused while its fence is pending"))
            }
            _ => {}
        }
        let cmd = self.graphics[i];
        gpu.begin_command_buffer(cmd)?;
        self.graphics_state[i] = CommandBufferState::Recording;
        Ok(cmd)
    }

    pub fn end_graphics(&mut self, gpu: &G, frame: usize, image: usize) -> RenderResult<()> {
        let i = self.index(frame, image)?;
        if self.graphics_state[i] != CommandBufferState::Recording {
            return Err(misuse("graphics command buffer ended without begin"));
        }
        gpu.end_command_buffer(self.graphics[i])?;
        self.graphics_state[i] = CommandBufferState::Executable;
        Ok(())
    }

    pub fn mark_graphics_submitted(&mut self, frame: usize, image: usize) -> RenderResult<()> {
        let i = self.index(frame, image)?;
        if self.graphics_state[i] != CommandBufferState::Executable {
            return Err(misuse("graphics command buffer submitted before it was recorded"));
        }
        self.graphics_state[i] = CommandBufferState::Submitted;
        Ok(())
    }

    /// Frees the graphics buffers and allocates `frames_in_flight * image_count`
    /// fresh ones. Only valid with the device idle.
    pub fn reallocate_graphics(&mut self, gpu: &G, image_count: usize) -> RenderResult<()> {
        if self.graphics_state.contains(&CommandBufferState::Recording) {
            return Err(misuse("command buffers reallocated while recording"));
        }
        gpu.free_command_buffers(self.graphics_pool, &self.graphics);
        self.graphics.clear();
        self.graphics_state.clear();
        self.image_count = 0;

        let fresh = gpu.allocate_command_buffers(
            self.graphics_pool,
            (self.frames_in_flight * image_count) as u32,
        )?;
        self.graphics_state = vec![CommandBufferState::Idle; fresh.len()];
        self.graphics = fresh;
        self.image_count = image_count;
        debug!(
            "reallocated {} graphics command buffers for {image_count} images",
            self.graphics.len()
        );
        Ok(())
    }

    /// Opens the single transfer buffer, waiting for its previous submission
    /// to retire first.
    pub fn begin_transfer(&mut self, gpu: &G) -> RenderResult<G::CommandBuffer> {
        if self.transfer_state == CommandBufferState::Recording {
            return Err(misuse("a transfer recording is already open"));
        }
        wait_fences(gpu, &[self.transfer_fence], self.fence_timeout)?;
        gpu.begin_command_buffer(self.transfer)?;
        self.transfer_state = CommandBufferState::Recording;
        Ok(self.transfer)
    }

    pub fn end_transfer(&mut self, gpu: &G) -> RenderResult<()> {
        if self.transfer_state != CommandBufferState::Recording {
            return Err(misuse("transfer command buffer ended without begin"));
        }
        gpu.end_command_buffer(self.transfer)?;
        self.transfer_state = CommandBufferState::Executable;
        Ok(())
    }

    pub fn mark_transfer_submitted(&mut self) -> RenderResult<()> {
        if self.transfer_state != CommandBufferState::Executable {
            return Err(misuse("transfer submitted before it was recorded"));
        }
        self.transfer_state = CommandBufferState::Submitted;
        Ok(())
    }

    #[inline]
    pub fn transfer_buffer(&self) -> G::CommandBuffer {
        self.transfer
    }

    #[inline]
    pub fn transfer_fence(&self) -> G::Fence {
        self.transfer_fence
    }

    #[inline]
    pub fn transfer_state(&self) -> CommandBufferState {
        self.transfer_state
    }

    #[inline]
    pub fn is_transfer_recording(&self) -> bool {
        self.transfer_state == CommandBufferState::Recording
    }

    /// Resets both pools at once. `frame_fences[f]` guards every graphics
    /// buffer of frame slot `f`; nothing may be recording and every submitted
    /// buffer's guard must have signaled.
    pub fn reset_pools(&mut self, gpu: &G, frame_fences: &[G::Fence]) -> RenderResult<()> {
        if self.is_transfer_recording()
            || self.graphics_state.contains(&CommandBufferState::Recording)
        {
            return Err(misuse("command pools reset while recording"));
        }
        for (i, state) in self.graphics_state.iter().enumerate() {
            if *state != CommandBufferState::Submitted {
                continue;
            }
            let Some(&guard) = frame_fences.get(i % self.frames_in_flight) else {
                return Err(misuse("missing guard fence for command pool reset"));
            };
            if !gpu.fence_signaled(guard)? {
                return Err(misuse("command pools reset while buffers are in flight"));
            }
        }
        if self.transfer_state == CommandBufferState::Submitted
            && !gpu.fence_signaled(self.transfer_fence)?
        {
            return Err(misuse("command pools reset while a transfer is in flight"));
        }

        gpu.reset_command_pool(self.graphics_pool)?;
        gpu.reset_command_pool(self.transfer_pool)?;
        self.graphics_state.fill(CommandBufferState::Idle);
        self.transfer_state = CommandBufferState::Idle;
        Ok(())
    }

    /// Caller must have drained the device. Safe to call more than once.
    pub fn destroy(&mut self, gpu: &G) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        gpu.destroy_command_pool(self.transfer_pool);
        gpu.destroy_command_pool(self.graphics_pool);
        gpu.destroy_fence(self.transfer_fence);
        self.graphics.clear();
        self.graphics_state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::gpu::SubmitInfo;
    use crate::headless::HeadlessGpu;

    fn scheduler(gpu: &HeadlessGpu) -> CommandBufferScheduler<HeadlessGpu> {
        CommandBufferScheduler::new(gpu, 2, 3, None).unwrap()
    }

    #[test]
    fn test_allocates_one_buffer_per_frame_and_image() {
        let gpu = HeadlessGpu::new();
        let mut cmds = scheduler(&gpu);
        assert_eq!(cmds.graphics_buffer_count(), 6);
        let a = cmds.graphics_buffer(1, 0).unwrap();
        let b = cmds.graphics_buffer(0, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(cmds.graphics_buffer(1, 2).unwrap(), cmds.graphics[1 + 2 * 2]);
        assert!(matches!(cmds.graphics_buffer(2, 0), Err(RenderError::Misuse(_))));
        cmds.destroy(&gpu);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_reuse_of_submitted_buffer_needs_signaled_guard() {
        let gpu = HeadlessGpu::new();
        let mut cmds = scheduler(&gpu);
        let fence = gpu.create_fence(true).unwrap();

        let cmd = cmds.begin_graphics(&gpu, 0, 0, fence).unwrap();
        cmds.end_graphics(&gpu, 0, 0).unwrap();
        gpu.reset_fences(&[fence]).unwrap();
        let info = SubmitInfo::<HeadlessGpu> {
            waits: &[],
            command_buffers: &[cmd],
            signals: &[],
        };
        gpu.submit(QueueKind::Graphics, &info, Some(fence)).unwrap();
        cmds.mark_graphics_submitted(0, 0).unwrap();

        assert!(matches!(
            cmds.begin_graphics(&gpu, 0, 0, fence),
            Err(RenderError::Misuse(_))
        ));
        assert!(matches!(
            cmds.reset_pools(&gpu, &[fence, fence]),
            Err(RenderError::Misuse(_))
        ));

        gpu.wait_for_fences(&[fence], None).unwrap();
        assert!(cmds.begin_graphics(&gpu, 0, 0, fence).is_ok());
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn test_single_transfer_recording() {
        let gpu = HeadlessGpu::new();
        let mut cmds = scheduler(&gpu);
        cmds.begin_transfer(&gpu).unwrap();
        assert!(cmds.is_transfer_recording());
        assert!(matches!(cmds.begin_transfer(&gpu), Err(RenderError::Misuse(_))));
        assert!(matches!(
            cmds.mark_transfer_submitted(),
            Err(RenderError::Misuse(_))
        ));
        cmds.end_transfer(&gpu).unwrap();
        assert_eq!(cmds.transfer_state(), CommandBufferState::Executable);
    }

    #[test]
    fn test_reset_pools_rejects_open_recording() {
        let gpu = HeadlessGpu::new();
        let mut cmds = scheduler(&gpu);
        let fence = gpu.create_fence(true).unwrap();
        cmds.begin_graphics(&gpu, 1, 2, fence).unwrap();
        assert!(matches!(
            cmds.reset_pools(&gpu, &[fence, fence]),
            Err(RenderError::Misuse(_))
        ));
        cmds.end_graphics(&gpu, 1, 2).unwrap();
        cmds.reset_pools(&gpu, &[fence, fence]).unwrap();
        assert_eq!(cmds.graphics_state(1, 2), Some(CommandBufferState::Idle));
    }

    #[test]
    fn test_reallocate_for_new_image_count() {
        let gpu = HeadlessGpu::new();
        let mut cmds = scheduler(&gpu);
        cmds.reallocate_graphics(&gpu, 4).unwrap();
        assert_eq!(cmds.graphics_buffer_count(), 8);
        assert!(cmds.graphics_buffer(1, 3).is_ok());
        cmds.destroy(&gpu);
        cmds.destroy(&gpu);
        assert_eq!(gpu.live_objects(), 0);
    }
}
