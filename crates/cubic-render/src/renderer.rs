// SPDX-License-Identifier: CEPL-1.0
//! Frame lifecycle facade: `acquire -> record -> submit -> present`.

use tracing::{debug, error, info, warn};

use crate::commands::CommandBufferScheduler;
use crate::config::FrameConfig;
use crate::error::{misuse, GpuError, RenderError, RenderResult};
use crate::gpu::{Acquired, Gpu, Presented};
use crate::submit::{GraphicsSubmission, SubmissionPipeline, TransferSubmission};
use crate::surface::SurfaceProvider;
use crate::swapchain::{Rebuild, SwapchainManager};
use crate::sync::FrameSyncController;
use crate::RenderSize;

/// Handle for the frame opened by [`Renderer::acquire_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameToken {
    pub frame_slot: usize,
    pub image_slot: usize,
    /// The chain will be rebuilt after this frame is presented.
    pub suboptimal: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Acquisition found the chain out of date; it was rebuilt and the frame
    /// should be retried on the same slot.
    SwapchainRebuilt,
    /// The surface is zero-sized; nothing to draw into.
    Minimized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Ready(FrameToken),
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Presented, then the chain was rebuilt (suboptimal, out of date or resized).
    Recreated,
    /// Presented, but the rebuild was deferred because the surface is zero-sized.
    Minimized,
}

/// Result of one [`Renderer::draw_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawStatus {
    Presented(PresentStatus),
    Skipped(SkipReason),
}

/// Everything a record callback may need about the open frame.
pub struct RecordContext<G: Gpu> {
    pub command_buffer: G::CommandBuffer,
    pub frame_slot: usize,
    pub image_slot: usize,
    pub image: G::Image,
    pub image_view: G::ImageView,
    pub extent: RenderSize,
    pub format: G::Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Acquired(FrameToken),
    Recorded(FrameToken),
    Submitted(FrameToken),
}

pub struct Renderer<G: Gpu, S: SurfaceProvider> {
    gpu: G,
    surface: S,
    config: FrameConfig,
    swapchain: SwapchainManager<G>,
    sync: FrameSyncController<G>,
    commands: CommandBufferScheduler<G>,
    pipeline: SubmissionPipeline,
    phase: Phase,
    recreate_after_present: bool,
    frame_count: u64,
    shut_down: bool,
}

impl<G: Gpu, S: SurfaceProvider> Renderer<G, S> {
    /// Builds the first swapchain, then the sync objects and command buffers.
    /// Whatever was created before a failure is released again.
    pub fn new(gpu: G, mut surface: S, config: FrameConfig) -> RenderResult<Self> {
        config.validate()?;
        let fif = config.frames_in_flight;
        let timeout = config.fence_timeout();

        let mut swapchain = SwapchainManager::new(&config);
        let image_count = swapchain.create(&gpu, &mut surface)?;

        let sync = match FrameSyncController::create_sync_objects(&gpu, fif, image_count, timeout) {
            Ok(s) => s,
            Err(e) => {
                swapchain.destroy(&gpu);
                return Err(e);
            }
        };
        let commands = match CommandBufferScheduler::new(&gpu, fif, image_count, timeout) {
            Ok(c) => c,
            Err(e) => {
                let mut sync = sync;
                sync.destroy(&gpu);
                swapchain.destroy(&gpu);
                return Err(e);
            }
        };

        info!("renderer ready: {fif} frames in flight, {image_count} swapchain images");
        Ok(Self {
            gpu,
            surface,
            config,
            swapchain,
            sync,
            commands,
            pipeline: SubmissionPipeline::new(),
            phase: Phase::Idle,
            recreate_after_present: false,
            frame_count: 0,
            shut_down: false,
        })
    }

    /// Opens a frame on the current ring slot.
    ///
    /// An out-of-date chain is rebuilt here and reported as skipped; the
    /// ring does not move, so the retry lands on the same slot.
    pub fn acquire_frame(&mut self) -> RenderResult<FrameStatus> {
        if self.shut_down {
            return Err(misuse("frame acquired after shutdown"));
        }
        if self.phase != Phase::Idle {
            return Err(misuse("frame acquired while another frame is open"));
        }
        if self.swapchain.is_stale() {
            if let Rebuild::Minimized = self.recreate()? {
                return Ok(FrameStatus::Skipped(SkipReason::Minimized));
            }
        }

        let frame = self.sync.begin_acquire(&self.gpu)?;
        let handle = self.swapchain.current()?.handle();
        let acquired = match self
            .gpu
            .acquire_next_image(handle, self.sync.image_available(frame))
        {
            Ok(a) => a,
            Err(e) => {
                self.sync.abort_acquire();
                return Err(e.into());
            }
        };

        match acquired {
            Acquired::OutOfDate => {
                self.sync.abort_acquire();
                warn!("swapchain out of date at acquire (frame slot {frame}), rebuilding");
                self.swapchain.mark_stale();
                Ok(FrameStatus::Skipped(match self.recreate()? {
                    Rebuild::Rebuilt { .. } => SkipReason::SwapchainRebuilt,
                    Rebuild::Minimized => SkipReason::Minimized,
                }))
            }
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    warn!("swapchain suboptimal at acquire, rebuilding after present");
                    self.recreate_after_present = true;
                }
                let image_slot = index as usize;
                if let Err(e) = self.sync.on_image_acquired(&self.gpu, image_slot) {
                    self.sync.abort_acquire();
                    return Err(e);
                }
                let token = FrameToken {
                    frame_slot: frame,
                    image_slot,
                    suboptimal,
                };
                self.phase = Phase::Acquired(token);
                Ok(FrameStatus::Ready(token))
            }
        }
    }

    /// Records the open frame's graphics command buffer through `f`.
    pub fn record<F, E>(&mut self, f: F) -> RenderResult<()>
    where
        F: FnOnce(&G, &RecordContext<G>) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Phase::Acquired(token) = self.phase else {
            return Err(misuse("record without an acquired frame"));
        };
        let chain = self.swapchain.current()?;
        let (Some(image), Some(image_view)) = (
            chain.image(token.image_slot),
            chain.image_view(token.image_slot),
        ) else {
            return Err(misuse("acquired image is not part of the current swapchain"));
        };
        let ctx = RecordContext {
            command_buffer: self.commands.begin_graphics(
                &self.gpu,
                token.frame_slot,
                token.image_slot,
                self.sync.fence(token.frame_slot),
            )?,
            frame_slot: token.frame_slot,
            image_slot: token.image_slot,
            image,
            image_view,
            extent: chain.extent(),
            format: chain.format(),
        };

        let recorded = f(&self.gpu, &ctx);
        self.commands
            .end_graphics(&self.gpu, token.frame_slot, token.image_slot)?;
        recorded.map_err(|e| RenderError::Record(e.into()))?;

        self.phase = Phase::Recorded(token);
        Ok(())
    }

    pub fn submit_graphics(&mut self) -> RenderResult<GraphicsSubmission<G::Semaphore>> {
        let Phase::Recorded(token) = self.phase else {
            return Err(misuse("graphics submitted without a recorded frame"));
        };
        let submission = self.pipeline.submit_graphics(
            &self.gpu,
            &mut self.sync,
            &mut self.commands,
            token.image_slot,
        )?;
        self.phase = Phase::Submitted(token);
        Ok(submission)
    }

    /// Records and submits the transfer buffer. Valid at any point outside
    /// shutdown, including between acquire and graphics submission.
    pub fn submit_transfer<F, E>(&mut self, f: F) -> RenderResult<TransferSubmission<G::Semaphore>>
    where
        F: FnOnce(&G, G::CommandBuffer) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.shut_down {
            return Err(misuse("transfer submitted after shutdown"));
        }
        let cmd = self.commands.begin_transfer(&self.gpu)?;
        let recorded = f(&self.gpu, cmd);
        self.commands.end_transfer(&self.gpu)?;
        recorded.map_err(|e| RenderError::Record(e.into()))?;
        self.pipeline
            .submit_transfer(&self.gpu, &mut self.sync, &mut self.commands)
    }

    /// Presents the submitted frame and advances the ring exactly once.
    ///
    /// Suboptimal or out-of-date results and surface resizes are handled by
    /// rebuilding the chain here.
    pub fn present(&mut self) -> RenderResult<PresentStatus> {
        let Phase::Submitted(token) = self.phase else {
            return Err(misuse("present without a submitted frame"));
        };
        let chain = self.swapchain.current()?;
        let result = self
            .pipeline
            .present(&self.gpu, &self.sync, chain, token.image_slot)?;

        self.phase = Phase::Idle;
        self.sync.advance_frame();
        self.frame_count += 1;

        let resized = self.surface.was_resized();
        let suboptimal = std::mem::take(&mut self.recreate_after_present);
        if result == Presented::Optimal && !resized && !suboptimal {
            return Ok(PresentStatus::Presented);
        }
        match result {
            Presented::OutOfDate => warn!("swapchain out of date at present"),
            Presented::Suboptimal => warn!("swapchain suboptimal at present"),
            Presented::Optimal => debug!("rebuilding swapchain (resized: {resized})"),
        }
        self.surface.reset_resized_flag();
        self.swapchain.mark_stale();
        Ok(match self.recreate()? {
            Rebuild::Rebuilt { .. } => PresentStatus::Recreated,
            Rebuild::Minimized => PresentStatus::Minimized,
        })
    }

    /// One full frame, re-attempted up to `max_acquire_attempts` times while
    /// acquisition keeps finding a stale chain.
    pub fn draw_frame<F, E>(&mut self, record: F) -> RenderResult<DrawStatus>
    where
        F: FnOnce(&G, &RecordContext<G>) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let attempts = self.config.max_acquire_attempts;
        for attempt in 1..=attempts {
            match self.acquire_frame()? {
                FrameStatus::Ready(_) => {
                    self.record(record)?;
                    self.submit_graphics()?;
                    return Ok(DrawStatus::Presented(self.present()?));
                }
                FrameStatus::Skipped(SkipReason::Minimized) => {
                    return Ok(DrawStatus::Skipped(SkipReason::Minimized));
                }
                FrameStatus::Skipped(SkipReason::SwapchainRebuilt) => {
                    debug!("acquire attempt {attempt}/{attempts} hit a stale swapchain");
                }
            }
        }
        Ok(DrawStatus::Skipped(SkipReason::SwapchainRebuilt))
    }

    /// Drains the device and rebuilds the chain. Image-scoped state follows
    /// the new chain: the image-in-flight table is cleared and the graphics
    /// command buffers are reallocated when the image count changed.
    pub fn recreate(&mut self) -> RenderResult<Rebuild> {
        if self.phase != Phase::Idle {
            return Err(misuse("swapchain rebuilt while a frame is open"));
        }
        let rebuild = self.swapchain.recreate(&self.gpu, &mut self.surface)?;
        if let Rebuild::Rebuilt {
            image_count,
            image_count_changed,
        } = rebuild
        {
            self.sync.resize_images(image_count);
            if image_count_changed {
                self.commands.reallocate_graphics(&self.gpu, image_count)?;
            }
        }
        Ok(rebuild)
    }

    /// Blocks until every frame slot's work has retired and the device is idle.
    pub fn wait_idle(&mut self) -> RenderResult<()> {
        if self.phase != Phase::Idle {
            return Err(misuse("wait_idle while a frame is open"));
        }
        self.sync.wait_all(&self.gpu)?;
        self.gpu.device_wait_idle()?;
        Ok(())
    }

    /// Resets both command pools. Only between frames.
    pub fn reset_command_pools(&mut self) -> RenderResult<()> {
        if self.phase != Phase::Idle {
            return Err(misuse("command pools reset while a frame is open"));
        }
        let fences = self.sync.fences();
        self.commands.reset_pools(&self.gpu, &fences)
    }

    /// Waits for all outstanding work, then destroys command pools, the
    /// swapchain and the sync objects, in that order. Idempotent.
    ///
    /// If the drain fails for any reason other than device loss, the GPU may
    /// still be using those objects; they are leaked and the error returned.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.phase = Phase::Idle;

        let drained = self
            .sync
            .wait_all(&self.gpu)
            .and_then(|()| {
                let fence = self.commands.transfer_fence();
                crate::sync::wait_fences(&self.gpu, &[fence], self.config.fence_timeout())
            })
            .and_then(|()| self.gpu.device_wait_idle().map_err(RenderError::from));

        match &drained {
            Ok(()) | Err(RenderError::Gpu(GpuError::DeviceLost)) => {
                self.commands.destroy(&self.gpu);
                self.swapchain.destroy(&self.gpu);
                self.sync.destroy(&self.gpu);
                info!("renderer shut down after {} frames", self.frame_count);
            }
            Err(e) => {
                error!("device did not drain ({e}); leaking frame resources");
            }
        }
        drained
    }

    #[inline]
    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    #[inline]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[inline]
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[inline]
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn sync(&self) -> &FrameSyncController<G> {
        &self.sync
    }

    pub fn commands(&self) -> &CommandBufferScheduler<G> {
        &self.commands
    }

    pub fn swapchain(&self) -> &SwapchainManager<G> {
        &self.swapchain
    }

    pub fn pipeline(&self) -> &SubmissionPipeline {
        &self.pipeline
    }

    #[inline]
    pub fn current_frame_slot(&self) -> usize {
        self.sync.current_slot()
    }

    /// Frames presented so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl<G: Gpu, S: SurfaceProvider> Drop for Renderer<G, S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("renderer shutdown failed: {e}");
        }
    }
}
