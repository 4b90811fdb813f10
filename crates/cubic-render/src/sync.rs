// SPDX-License-Identifier: CEPL-1.0
//! Per-frame-slot synchronization and the frames-in-flight ring.

use std::time::Duration;

use tracing::debug;

use crate::error::{misuse, GpuError, RenderError, RenderResult};
use crate::gpu::Gpu;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Destroyed,
}

struct FrameSlot<G: Gpu> {
    in_flight: G::Fence,
    image_available: G::Semaphore,
    render_finished: G::Semaphore,
    transfer_finished: G::Semaphore,
    transfer_pending: bool,
    state: FrameState,
}

impl<G: Gpu> FrameSlot<G> {
    /// Either the whole slot exists or nothing it created survives.
    fn create(gpu: &G) -> Result<Self, GpuError> {
        let in_flight = gpu.create_fence(true)?;
        let mut sems = Vec::with_capacity(3);
        for _ in 0..3 {
            match gpu.create_semaphore() {
                Ok(s) => sems.push(s),
                Err(e) => {
                    for s in sems.into_iter().rev() {
                        gpu.destroy_semaphore(s);
                    }
                    gpu.destroy_fence(in_flight);
                    return Err(e);
                }
            }
        }
        Ok(Self {
            in_flight,
            image_available: sems[0],
            render_finished: sems[1],
            transfer_finished: sems[2],
            transfer_pending: false,
            state: FrameState::Idle,
        })
    }

    fn destroy(&self, gpu: &G) {
        gpu.destroy_semaphore(self.transfer_finished);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_semaphore(self.image_available);
        gpu.destroy_fence(self.in_flight);
    }
}

/// Owns every frame slot's fence and semaphores plus the image-in-flight
/// table.
///
/// The ring index only moves in [`advance_frame`](Self::advance_frame).
/// `images_in_flight[i]` names the frame slot whose fence guards writes to
/// image `i`; it never owns that fence.
pub struct FrameSyncController<G: Gpu> {
    slots: Vec<FrameSlot<G>>,
    images_in_flight: Vec<Option<usize>>,
    current: usize,
    fence_timeout: Option<Duration>,
}

impl<G: Gpu> FrameSyncController<G> {
    /// Fences start signaled so the first lap through the ring does not block.
    pub fn create_sync_objects(
        gpu: &G,
        frames_in_flight: usize,
        image_count: usize,
        fence_timeout: Option<Duration>,
    ) -> RenderResult<Self> {
        let mut slots: Vec<FrameSlot<G>> = Vec::with_capacity(frames_in_flight);
        for slot in 0..frames_in_flight {
            match FrameSlot::create(gpu) {
                Ok(s) => slots.push(s),
                Err(source) => {
                    for s in slots.iter().rev() {
                        s.destroy(gpu);
                    }
                    return Err(RenderError::SyncCreation { slot, source });
                }
            }
        }
        debug!("created sync objects for {frames_in_flight} frame slots, {image_count} images");
        Ok(Self {
            slots,
            images_in_flight: vec![None; image_count],
            current: 0,
            fence_timeout,
        })
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> Option<FrameState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Moves the ring forward by one slot and returns the new index.
    pub fn advance_frame(&mut self) -> usize {
        self.current = (self.current + 1) % self.slots.len();
        self.current
    }

    /// Blocks on the current slot's fence so its previous submission is
    /// known to be retired.
    pub fn begin_acquire(&mut self, gpu: &G) -> RenderResult<usize> {
        let slot = self.current;
        match self.slots[slot].state {
            FrameState::Acquiring | FrameState::Recording => {
                return Err(misuse("frame acquired while another frame is open"))
            }
            FrameState::Destroyed => return Err(misuse("frame acquired after shutdown")),
            FrameState::Idle | FrameState::Submitted => {}
        }
        let fence = self.slots[slot].in_flight;
        debug!("frame slot {slot}: waiting on {fence:?}");
        self.wait_fences(gpu, &[fence])?;
        self.slots[slot].state = FrameState::Acquiring;
        Ok(slot)
    }

    /// Acquisition came back stale; the slot returns to `Idle` untouched.
    pub fn abort_acquire(&mut self) {
        let slot = &mut self.slots[self.current];
        if slot.state == FrameState::Acquiring {
            slot.state = FrameState::Idle;
        }
    }

    /// Waits out whichever other slot still guards `image`, then claims it
    /// for the current slot.
    pub fn on_image_acquired(&mut self, gpu: &G, image: usize) -> RenderResult<()> {
        if self.slots[self.current].state != FrameState::Acquiring {
            return Err(misuse("image acquired outside of an acquire"));
        }
        let Some(owner) = self.images_in_flight.get(image).copied() else {
            return Err(misuse("acquired image index out of range"));
        };
        if let Some(prev) = owner.filter(|&prev| prev != self.current) {
            let fence = self.slots[prev].in_flight;
            debug!("image {image} still guarded by frame slot {prev}, waiting on {fence:?}");
            self.wait_fences(gpu, &[fence])?;
        }
        self.images_in_flight[image] = Some(self.current);
        self.slots[self.current].state = FrameState::Recording;
        Ok(())
    }

    /// Must run immediately before the slot's graphics submission.
    pub fn reset_fence(&mut self, gpu: &G) -> RenderResult<()> {
        let slot = &self.slots[self.current];
        if slot.state != FrameState::Recording {
            return Err(misuse("frame submitted without an acquired image"));
        }
        gpu.reset_fences(&[slot.in_flight])?;
        Ok(())
    }

    pub fn mark_submitted(&mut self) {
        self.slots[self.current].state = FrameState::Submitted;
    }

    /// Forgets every image owner. Only valid once the device is idle.
    pub fn resize_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }

    #[inline]
    pub fn fence(&self, slot: usize) -> G::Fence {
        self.slots[slot].in_flight
    }

    pub fn fences(&self) -> Vec<G::Fence> {
        self.slots.iter().map(|s| s.in_flight).collect()
    }

    #[inline]
    pub fn image_available(&self, slot: usize) -> G::Semaphore {
        self.slots[slot].image_available
    }

    #[inline]
    pub fn render_finished(&self, slot: usize) -> G::Semaphore {
        self.slots[slot].render_finished
    }

    #[inline]
    pub fn transfer_finished(&self, slot: usize) -> G::Semaphore {
        self.slots[slot].transfer_finished
    }

    #[inline]
    pub fn transfer_pending(&self, slot: usize) -> bool {
        self.slots[slot].transfer_pending
    }

    pub fn set_transfer_pending(&mut self, slot: usize, pending: bool) {
        self.slots[slot].transfer_pending = pending;
    }

    /// Returns the flag and clears it.
    pub fn take_transfer_pending(&mut self, slot: usize) -> bool {
        std::mem::take(&mut self.slots[slot].transfer_pending)
    }

    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }

    /// Blocks until every slot's last submission has retired.
    pub fn wait_all(&mut self, gpu: &G) -> RenderResult<()> {
        let fences: Vec<_> = self
            .slots
            .iter()
            .filter(|s| s.state != FrameState::Destroyed)
            .map(|s| s.in_flight)
            .collect();
        if fences.is_empty() {
            return Ok(());
        }
        self.wait_fences(gpu, &fences)?;
        for s in &mut self.slots {
            if s.state == FrameState::Submitted {
                s.state = FrameState::Idle;
            }
        }
        Ok(())
    }

    /// Caller must have drained the device. Safe to call more than once.
    pub fn destroy(&mut self, gpu: &G) {
        for s in self.slots.iter_mut().rev() {
            if s.state != FrameState::Destroyed {
                s.destroy(gpu);
                s.state = FrameState::Destroyed;
                s.transfer_pending = false;
            }
        }
        self.images_in_flight.iter_mut().for_each(|o| *o = None);
    }

    pub(crate) fn wait_fences(&self, gpu: &G, fences: &[G::Fence]) -> RenderResult<()> {
        wait_fences(gpu, fences, self.fence_timeout)
    }
}

/// Fence wait with the configured bound; an expired bound is reported as
/// [`RenderError::FenceTimeout`].
pub(crate) fn wait_fences<G: Gpu>(
    gpu: &G,
    fences: &[G::Fence],
    timeout: Option<Duration>,
) -> RenderResult<()> {
    match gpu.wait_for_fences(fences, timeout) {
        Ok(()) => Ok(()),
        Err(GpuError::Timeout) => Err(RenderError::FenceTimeout {
            waited_ms: timeout.map_or(u64::MAX, |t| t.as_millis() as u64),
        }),
        Err(e) => Err(e.into()),
    }
}
