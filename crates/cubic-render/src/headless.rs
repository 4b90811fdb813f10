// SPDX-License-Identifier: CEPL-1.0
//! Deterministic, GPU-less implementation of the backend seams.
//!
//! [`HeadlessGpu`] executes nothing. It tracks the state every handle would
//! have on a real device, retires batches in submission order whenever the
//! host waits, and records anything a validation layer would reject as a
//! *violation*. Tests drive the frame core through it and then inspect the
//! submission log, the event log and the violation list.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::GpuError;
use crate::gpu::{
    Acquired, Gpu, GpuResult, PipelineStages, PresentMode, Presented, QueueKind, SubmitInfo,
    SurfaceCaps, SwapchainDesc, SwapchainParts,
};
use crate::surface::SurfaceProvider;
use crate::RenderSize;

macro_rules! handle {
    ($($name:ident),* $(,)?) => {$(
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    )*};
}

handle!(FenceId, SemaphoreId, PoolId, CmdId, SwapchainId, ImageId, ViewId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeadlessFormat {
    Bgra8Srgb,
    Rgba8Srgb,
    Bgra8Unorm,
    Rgba16Float,
}

/// Surface the simulated device reports.
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub formats: Vec<HeadlessFormat>,
    pub present_modes: Vec<PresentMode>,
    pub min_image_count: u32,
    pub max_image_count: u32,
    pub fixed_extent: Option<RenderSize>,
    pub min_extent: RenderSize,
    pub max_extent: RenderSize,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            formats: vec![HeadlessFormat::Bgra8Srgb, HeadlessFormat::Rgba8Srgb],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
            min_image_count: 2,
            max_image_count: 8,
            fixed_extent: None,
            min_extent: RenderSize::new(1, 1),
            max_extent: RenderSize::new(16384, 16384),
        }
    }
}

/// Next outcome of `acquire_next_image`. Without a script, images are
/// handed out round-robin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedAcquire {
    Image(u32),
    Suboptimal(u32),
    OutOfDate,
    Fail(GpuError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub queue: QueueKind,
    pub waits: Vec<(SemaphoreId, PipelineStages)>,
    pub command_buffers: Vec<CmdId>,
    pub signals: Vec<SemaphoreId>,
    pub fence: Option<FenceId>,
}

impl SubmissionRecord {
    pub fn waits_on(&self, semaphore: SemaphoreId) -> bool {
        self.waits.iter().any(|(s, _)| *s == semaphore)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GpuEvent {
    WaitFences { fences: Vec<FenceId> },
    ResetFences { fences: Vec<FenceId> },
    BeginCommandBuffer { cmd: CmdId },
    /// Index into [`HeadlessGpu::submissions`].
    Submit { queue: QueueKind, index: usize },
    DeviceWaitIdle,
    SwapchainCreated {
        swapchain: SwapchainId,
        format: HeadlessFormat,
        extent: RenderSize,
        image_count: usize,
        old: Option<SwapchainId>,
    },
    SwapchainDestroyed { swapchain: SwapchainId },
    Acquire { swapchain: SwapchainId, result: Acquired },
    Present { swapchain: SwapchainId, image: u32, result: Presented },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending(u64),
    Signaled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmdPhase {
    Initial,
    Recording,
    Executable,
    Pending(u64),
}

struct Batch {
    id: u64,
    fence: Option<FenceId>,
    cmds: Vec<CmdId>,
}

struct ChainState {
    images: Vec<ImageId>,
    views: Vec<ViewId>,
    retired: bool,
    next_image: u32,
}

#[derive(Default)]
struct State {
    config: HeadlessConfig,
    next_id: u32,
    next_batch: u64,
    fences: HashMap<FenceId, FenceState>,
    /// `true` while a signal is pending and unconsumed.
    semaphores: HashMap<SemaphoreId, bool>,
    pools: HashMap<PoolId, (QueueKind, Vec<CmdId>)>,
    cmds: HashMap<CmdId, (PoolId, CmdPhase)>,
    chains: HashMap<SwapchainId, ChainState>,
    batches: VecDeque<Batch>,
    submissions: Vec<SubmissionRecord>,
    events: Vec<GpuEvent>,
    violations: Vec<String>,
    max_pending_fences: usize,
    object_limit: Option<usize>,
    hung: bool,
    acquire_script: VecDeque<ScriptedAcquire>,
    present_script: VecDeque<Presented>,
}

impl State {
    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn violation(&mut self, what: String) {
        warn!("headless violation: {what}");
        self.violations.push(what);
    }

    fn sync_objects(&self) -> usize {
        self.fences.len() + self.semaphores.len()
    }

    fn check_limit(&self, what: &'static str) -> GpuResult<()> {
        match self.object_limit {
            Some(limit) if self.sync_objects() >= limit => Err(GpuError::OutOfMemory(what)),
            _ => Ok(()),
        }
    }

    fn pending_fences(&self) -> usize {
        self.fences
            .values()
            .filter(|f| matches!(f, FenceState::Pending(_)))
            .count()
    }

    /// Retires every batch up to and including `upto`.
    fn retire_through(&mut self, upto: u64) {
        while self.batches.front().is_some_and(|b| b.id <= upto) {
            if let Some(batch) = self.batches.pop_front() {
                self.retire(batch);
            }
        }
    }

    fn retire(&mut self, batch: Batch) {
        if let Some(f) = batch.fence {
            if let Some(state) = self.fences.get_mut(&f) {
                *state = FenceState::Signaled;
            }
        }
        for cmd in batch.cmds {
            if let Some((_, phase)) = self.cmds.get_mut(&cmd) {
                if *phase == CmdPhase::Pending(batch.id) {
                    *phase = CmdPhase::Initial;
                }
            }
        }
        trace!("headless batch {} retired", batch.id);
    }

    fn retire_all(&mut self) {
        while let Some(batch) = self.batches.pop_front() {
            self.retire(batch);
        }
    }

    fn signal(&mut self, sem: SemaphoreId, by: &str) {
        match self.semaphores.get_mut(&sem) {
            Some(pending) if *pending => {
                self.violation(format!("{by}: {sem:?} signaled while a signal is still pending"))
            }
            Some(pending) => *pending = true,
            None => self.violation(format!("{by}: unknown {sem:?}")),
        }
    }

    fn consume(&mut self, sem: SemaphoreId, by: &str) {
        match self.semaphores.get_mut(&sem) {
            Some(pending) if *pending => *pending = false,
            Some(_) => self.violation(format!("{by}: wait on {sem:?} with no pending signal")),
            None => self.violation(format!("{by}: unknown {sem:?}")),
        }
    }
}

/// Simulated device. Interior mutability keeps the [`Gpu`] methods `&self`.
#[derive(Default)]
pub struct HeadlessGpu {
    state: RefCell<State>,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HeadlessConfig) -> Self {
        let gpu = Self::default();
        gpu.state.borrow_mut().config = config;
        gpu
    }

    pub fn script_acquire(&self, outcomes: impl IntoIterator<Item = ScriptedAcquire>) {
        self.state.borrow_mut().acquire_script.extend(outcomes);
    }

    pub fn script_present(&self, outcomes: impl IntoIterator<Item = Presented>) {
        self.state.borrow_mut().present_script.extend(outcomes);
    }

    /// Changes what the surface offers from the next `surface_caps` on.
    pub fn set_surface_formats(&self, formats: Vec<HeadlessFormat>) {
        self.state.borrow_mut().config.formats = formats;
    }

    pub fn set_image_counts(&self, min: u32, max: u32) {
        let mut st = self.state.borrow_mut();
        st.config.min_image_count = min;
        st.config.max_image_count = max;
    }

    pub fn set_fixed_extent(&self, extent: Option<RenderSize>) {
        self.state.borrow_mut().config.fixed_extent = extent;
    }

    /// Fence and semaphore creation fails with `OutOfMemory` once this many
    /// sync objects are alive.
    pub fn set_object_limit(&self, limit: Option<usize>) {
        self.state.borrow_mut().object_limit = limit;
    }

    /// A hung device never retires a batch. Bounded waits then time out and
    /// unbounded ones report the device as lost.
    pub fn set_hung(&self, hung: bool) {
        self.state.borrow_mut().hung = hung;
    }

    pub fn retire_all(&self) {
        self.state.borrow_mut().retire_all();
    }

    pub fn pending_fence_count(&self) -> usize {
        self.state.borrow().pending_fences()
    }

    /// High-water mark of simultaneously pending fences.
    pub fn max_pending_fences(&self) -> usize {
        self.state.borrow().max_pending_fences
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.borrow().submissions.clone()
    }

    pub fn events(&self) -> Vec<GpuEvent> {
        self.state.borrow().events.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    /// Fences, semaphores, command pools, command buffers and swapchains
    /// that have not been destroyed.
    pub fn live_objects(&self) -> usize {
        let st = self.state.borrow();
        st.fences.len() + st.semaphores.len() + st.pools.len() + st.cmds.len() + st.chains.len()
    }

    pub fn swapchains_created(&self) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| matches!(e, GpuEvent::SwapchainCreated { .. }))
            .count()
    }
}

impl Gpu for HeadlessGpu {
    type Fence = FenceId;
    type Semaphore = SemaphoreId;
    type CommandPool = PoolId;
    type CommandBuffer = CmdId;
    type Swapchain = SwapchainId;
    type Image = ImageId;
    type ImageView = ViewId;
    type Format = HeadlessFormat;

    fn create_fence(&self, signaled: bool) -> GpuResult<FenceId> {
        let mut st = self.state.borrow_mut();
        st.check_limit("create_fence")?;
        let id = FenceId(st.id());
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        st.fences.insert(id, state);
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        let mut st = self.state.borrow_mut();
        match st.fences.remove(&fence) {
            Some(FenceState::Pending(_)) => {
                st.violation(format!("{fence:?} destroyed while pending"))
            }
            Some(_) => {}
            None => st.violation(format!("destroy of unknown {fence:?}")),
        }
    }

    fn create_semaphore(&self) -> GpuResult<SemaphoreId> {
        let mut st = self.state.borrow_mut();
        st.check_limit("create_semaphore")?;
        let id = SemaphoreId(st.id());
        st.semaphores.insert(id, false);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        let mut st = self.state.borrow_mut();
        if st.semaphores.remove(&semaphore).is_none() {
            st.violation(format!("destroy of unknown {semaphore:?}"));
        }
    }

    fn wait_for_fences(&self, fences: &[FenceId], timeout: Option<Duration>) -> GpuResult<()> {
        let mut st = self.state.borrow_mut();
        st.events.push(GpuEvent::WaitFences {
            fences: fences.to_vec(),
        });
        for fence in fences {
            match st.fences.get(fence).copied() {
                Some(FenceState::Signaled) => {}
                Some(FenceState::Pending(batch)) if !st.hung => st.retire_through(batch),
                Some(_) if timeout.is_some() => return Err(GpuError::Timeout),
                Some(_) => {
                    warn!("headless wait on {fence:?} can never complete");
                    return Err(GpuError::DeviceLost);
                }
                None => {
                    st.violation(format!("wait on unknown {fence:?}"));
                    return Err(GpuError::Backend {
                        op: "wait_for_fences",
                        code: "unknown fence".into(),
                    });
                }
            }
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: FenceId) -> GpuResult<bool> {
        match self.state.borrow().fences.get(&fence) {
            Some(state) => Ok(*state == FenceState::Signaled),
            None => Err(GpuError::Backend {
                op: "fence_signaled",
                code: "unknown fence".into(),
            }),
        }
    }

    fn reset_fences(&self, fences: &[FenceId]) -> GpuResult<()> {
        let mut st = self.state.borrow_mut();
        st.events.push(GpuEvent::ResetFences {
            fences: fences.to_vec(),
        });
        for fence in fences {
            match st.fences.get(fence).copied() {
                Some(FenceState::Pending(_)) => {
                    st.violation(format!("{fence:?} reset while pending"));
                }
                Some(_) => {
                    st.fences.insert(*fence, FenceState::Unsignaled);
                }
                None => st.violation(format!("reset of unknown {fence:?}")),
            }
        }
        Ok(())
    }

    fn create_command_pool(&self, queue: QueueKind) -> GpuResult<PoolId> {
        let mut st = self.state.borrow_mut();
        let id = PoolId(st.id());
        st.pools.insert(id, (queue, Vec::new()));
        Ok(id)
    }

    fn allocate_command_buffers(&self, pool: PoolId, count: u32) -> GpuResult<Vec<CmdId>> {
        let mut st = self.state.borrow_mut();
        if !st.pools.contains_key(&pool) {
            st.violation(format!("allocate from unknown {pool:?}"));
            return Err(GpuError::Backend {
                op: "allocate_command_buffers",
                code: "unknown pool".into(),
            });
        }
        let ids: Vec<CmdId> = (0..count).map(|_| CmdId(st.id())).collect();
        for id in &ids {
            st.cmds.insert(*id, (pool, CmdPhase::Initial));
        }
        if let Some((_, owned)) = st.pools.get_mut(&pool) {
            owned.extend(ids.iter().copied());
        }
        Ok(ids)
    }

    fn free_command_buffers(&self, pool: PoolId, buffers: &[CmdId]) {
        let mut st = self.state.borrow_mut();
        for cmd in buffers {
            match st.cmds.remove(cmd) {
                Some((_, CmdPhase::Pending(_))) => {
                    st.violation(format!("{cmd:?} freed while pending"))
                }
                Some((owner, _)) if owner != pool => {
                    st.violation(format!("{cmd:?} freed through foreign {pool:?}"))
                }
                Some(_) => {}
                None => st.violation(format!("free of unknown {cmd:?}")),
            }
        }
        if let Some((_, owned)) = st.pools.get_mut(&pool) {
            owned.retain(|c| !buffers.contains(c));
        }
    }

    fn reset_command_pool(&self, pool: PoolId) -> GpuResult<()> {
        let mut st = self.state.borrow_mut();
        let Some((_, owned)) = st.pools.get(&pool).cloned() else {
            st.violation(format!("reset of unknown {pool:?}"));
            return Ok(());
        };
        for cmd in owned {
            let phase = st.cmds.get(&cmd).map(|(_, p)| *p);
            match phase {
                Some(CmdPhase::Pending(_)) => {
                    st.violation(format!("{pool:?} reset while {cmd:?} is pending"))
                }
                Some(_) => {
                    st.cmds.insert(cmd, (pool, CmdPhase::Initial));
                }
                None => {}
            }
        }
        Ok(())
    }

    fn destroy_command_pool(&self, pool: PoolId) {
        let mut st = self.state.borrow_mut();
        let Some((_, owned)) = st.pools.remove(&pool) else {
            st.violation(format!("destroy of unknown {pool:?}"));
            return;
        };
        for cmd in owned {
            if let Some((_, CmdPhase::Pending(_))) = st.cmds.remove(&cmd) {
                st.violation(format!("{pool:?} destroyed while {cmd:?} is pending"));
            }
        }
    }

    fn begin_command_buffer(&self, cmd: CmdId) -> GpuResult<()> {
        let mut st = self.state.borrow_mut();
        st.events.push(GpuEvent::BeginCommandBuffer { cmd });
        let Some((pool, phase)) = st.cmds.get(&cmd).copied() else {
            st.violation(format!("begin of unknown {cmd:?}"));
            return Err(GpuError::Backend {
                op: "begin_command_buffer",
                code: "unknown command buffer".into(),
            });
        };
        match phase {
            CmdPhase::Pending(_) => st.violation(format!("{cmd:?} re-recorded while pending")),
            CmdPhase::Recording => st.violation(format!("{cmd:?} begun twice")),
            _ => {}
        }
        st.cmds.insert(cmd, (pool, CmdPhase::Recording));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CmdId) -> GpuResult<()> {
        let mut st = self.state.borrow_mut();
        match st.cmds.get(&cmd).copied() {
            Some((pool, CmdPhase::Recording)) => {
                st.cmds.insert(cmd, (pool, CmdPhase::Executable));
            }
            Some(_) => st.violation(format!("{cmd:?} ended while not recording")),
            None => st.violation(format!("end of unknown {cmd:?}")),
        }
        Ok(())
    }

    fn submit(
        &self,
        queue: QueueKind,
        info: &SubmitInfo<'_, Self>,
        fence: Option<FenceId>,
    ) -> GpuResult<()> {
        let mut st = self.state.borrow_mut();
        st.next_batch += 1;
        let batch = st.next_batch;

        for cmd in info.command_buffers {
            match st.cmds.get(cmd).copied() {
                Some((pool, CmdPhase::Executable)) => {
                    let pool_queue = st.pools.get(&pool).map(|(q, _)| *q);
                    if pool_queue != Some(queue) {
                        st.violation(format!("{cmd:?} from a {pool_queue:?} pool on {queue:?}"));
                    }
                    st.cmds.insert(*cmd, (pool, CmdPhase::Pending(batch)));
                }
                Some((_, phase)) => {
                    st.violation(format!("{cmd:?} submitted in state {phase:?}"))
                }
                None => st.violation(format!("submit of unknown {cmd:?}")),
            }
        }
        for wait in info.waits {
            st.consume(wait.semaphore, "submit");
        }
        for sem in info.signals {
            st.signal(*sem, "submit");
        }
        if let Some(f) = fence {
            match st.fences.get(&f).copied() {
                Some(FenceState::Unsignaled) => {
                    st.fences.insert(f, FenceState::Pending(batch));
                }
                Some(state) => st.violation(format!("{f:?} submitted while {state:?}")),
                None => st.violation(format!("submit with unknown {f:?}")),
            }
        }

        st.batches.push_back(Batch {
            id: batch,
            fence,
            cmds: info.command_buffers.to_vec(),
        });
        let index = st.submissions.len();
        st.submissions.push(SubmissionRecord {
            queue,
            waits: info.waits.iter().map(|w| (w.semaphore, w.stages)).collect(),
            command_buffers: info.command_buffers.to_vec(),
            signals: info.signals.to_vec(),
            fence,
        });
        st.events.push(GpuEvent::Submit { queue, index });
        let pending = st.pending_fences();
        st.max_pending_fences = st.max_pending_fences.max(pending);
        Ok(())
    }

    fn device_wait_idle(&self) -> GpuResult<()> {
        let mut st = self.state.borrow_mut();
        st.events.push(GpuEvent::DeviceWaitIdle);
        if st.hung && !st.batches.is_empty() {
            return Err(GpuError::DeviceLost);
        }
        st.retire_all();
        Ok(())
    }

    fn surface_caps(&self) -> GpuResult<SurfaceCaps<HeadlessFormat>> {
        let st = self.state.borrow();
        let cfg = &st.config;
        Ok(SurfaceCaps {
            formats: cfg.formats.clone(),
            present_modes: cfg.present_modes.clone(),
            min_image_count: cfg.min_image_count,
            max_image_count: cfg.max_image_count,
            current_extent: cfg.fixed_extent,
            min_extent: cfg.min_extent,
            max_extent: cfg.max_extent,
        })
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc<HeadlessFormat>,
        old: Option<SwapchainId>,
    ) -> GpuResult<SwapchainParts<Self>> {
        let mut st = self.state.borrow_mut();
        if !st.config.formats.contains(&desc.format) {
            st.violation(format!("swapchain with unsupported format {:?}", desc.format));
        }
        if desc.extent.is_zero() {
            st.violation("zero-sized swapchain".to_string());
        }
        if let Some(old) = old {
            match st.chains.get_mut(&old) {
                Some(chain) => chain.retired = true,
                None => st.violation(format!("old swapchain {old:?} unknown")),
            }
        }
        let handle = SwapchainId(st.id());
        let count = desc.image_count as usize;
        let images: Vec<ImageId> = (0..count).map(|_| ImageId(st.id())).collect();
        let views: Vec<ViewId> = (0..count).map(|_| ViewId(st.id())).collect();
        st.chains.insert(
            handle,
            ChainState {
                images: images.clone(),
                views: views.clone(),
                retired: false,
                next_image: 0,
            },
        );
        st.events.push(GpuEvent::SwapchainCreated {
            swapchain: handle,
            format: desc.format,
            extent: desc.extent,
            image_count: count,
            old,
        });
        Ok(SwapchainParts {
            handle,
            images,
            views,
        })
    }

    fn destroy_swapchain(&self, parts: SwapchainParts<Self>) {
        let mut st = self.state.borrow_mut();
        match st.chains.remove(&parts.handle) {
            Some(chain) if chain.images != parts.images || chain.views != parts.views => {
                st.violation(format!("{:?} destroyed with foreign images", parts.handle));
            }
            Some(_) => {}
            None => st.violation(format!("destroy of unknown {:?}", parts.handle)),
        }
        if !st.batches.is_empty() {
            st.violation(format!("{:?} destroyed with work in flight", parts.handle));
        }
        st.events.push(GpuEvent::SwapchainDestroyed {
            swapchain: parts.handle,
        });
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainId,
        signal: SemaphoreId,
    ) -> GpuResult<Acquired> {
        let mut st = self.state.borrow_mut();
        let Some(chain) = st.chains.get_mut(&swapchain) else {
            st.violation(format!("acquire from unknown {swapchain:?}"));
            return Err(GpuError::SurfaceLost);
        };
        let count = chain.images.len() as u32;
        let retired = chain.retired;
        let round_robin = chain.next_image;
        chain.next_image = (round_robin + 1) % count.max(1);
        if retired {
            st.violation(format!("acquire from retired {swapchain:?}"));
        }

        let scripted = st.acquire_script.pop_front();
        let result = match scripted {
            None => Acquired::Image {
                index: round_robin,
                suboptimal: false,
            },
            Some(ScriptedAcquire::Image(index)) => Acquired::Image {
                index,
                suboptimal: false,
            },
            Some(ScriptedAcquire::Suboptimal(index)) => Acquired::Image {
                index,
                suboptimal: true,
            },
            Some(ScriptedAcquire::OutOfDate) => Acquired::OutOfDate,
            Some(ScriptedAcquire::Fail(e)) => return Err(e),
        };
        if let Acquired::Image { index, .. } = result {
            if index >= count {
                st.violation(format!("scripted image {index} outside a {count}-image chain"));
            }
            st.signal(signal, "acquire");
        }
        st.events.push(GpuEvent::Acquire { swapchain, result });
        Ok(result)
    }

    fn queue_present(
        &self,
        swapchain: SwapchainId,
        image_index: u32,
        wait: SemaphoreId,
    ) -> GpuResult<Presented> {
        let mut st = self.state.borrow_mut();
        if !st.chains.contains_key(&swapchain) {
            st.violation(format!("present to unknown {swapchain:?}"));
            return Err(GpuError::SurfaceLost);
        }
        st.consume(wait, "present");
        let result = st.present_script.pop_front().unwrap_or(Presented::Optimal);
        st.events.push(GpuEvent::Present {
            swapchain,
            image: image_index,
            result,
        });
        Ok(result)
    }
}

/// Window stand-in with a scripted extent.
#[derive(Debug)]
pub struct HeadlessSurface {
    extent: RenderSize,
    /// Extents revealed one per `wait_events` call.
    script: VecDeque<RenderSize>,
    resized: bool,
    polls: u32,
}

impl HeadlessSurface {
    pub fn new(extent: RenderSize) -> Self {
        Self {
            extent,
            script: VecDeque::new(),
            resized: false,
            polls: 0,
        }
    }

    /// Each poll while zero-sized moves to the next extent in `extents`.
    pub fn with_poll_script(mut self, extents: impl IntoIterator<Item = RenderSize>) -> Self {
        self.script.extend(extents);
        self
    }

    /// Simulates a window resize.
    pub fn set_extent(&mut self, extent: RenderSize) {
        if extent != self.extent {
            self.extent = extent;
            self.resized = true;
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl SurfaceProvider for HeadlessSurface {
    fn current_extent(&self) -> RenderSize {
        self.extent
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn reset_resized_flag(&mut self) {
        self.resized = false;
    }

    fn wait_events(&mut self, _timeout: Duration) {
        self.polls += 1;
        if let Some(next) = self.script.pop_front() {
            self.extent = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_signal_is_a_violation() {
        let gpu = HeadlessGpu::new();
        let sem = gpu.create_semaphore().unwrap();
        let info = SubmitInfo::<HeadlessGpu> {
            waits: &[],
            command_buffers: &[],
            signals: &[sem],
        };
        gpu.submit(QueueKind::Graphics, &info, None).unwrap();
        assert!(gpu.violations().is_empty());
        gpu.submit(QueueKind::Graphics, &info, None).unwrap();
        assert_eq!(gpu.violations().len(), 1);
    }

    #[test]
    fn test_fences_retire_in_submission_order() {
        let gpu = HeadlessGpu::new();
        let a = gpu.create_fence(false).unwrap();
        let b = gpu.create_fence(false).unwrap();
        let empty = SubmitInfo::<HeadlessGpu> {
            waits: &[],
            command_buffers: &[],
            signals: &[],
        };
        gpu.submit(QueueKind::Graphics, &empty, Some(a)).unwrap();
        gpu.submit(QueueKind::Transfer, &empty, Some(b)).unwrap();
        assert_eq!(gpu.pending_fence_count(), 2);
        assert_eq!(gpu.max_pending_fences(), 2);

        gpu.wait_for_fences(&[a], None).unwrap();
        assert!(gpu.fence_signaled(a).unwrap());
        assert!(!gpu.fence_signaled(b).unwrap());
        gpu.device_wait_idle().unwrap();
        assert!(gpu.fence_signaled(b).unwrap());
    }

    #[test]
    fn test_wait_on_unsubmitted_fence_never_completes() {
        let gpu = HeadlessGpu::new();
        let f = gpu.create_fence(false).unwrap();
        assert_eq!(gpu.wait_for_fences(&[f], None), Err(GpuError::DeviceLost));
        assert_eq!(
            gpu.wait_for_fences(&[f], Some(Duration::from_millis(1))),
            Err(GpuError::Timeout)
        );
    }

    #[test]
    fn test_surface_poll_script() {
        let mut s = HeadlessSurface::new(RenderSize::new(0, 0))
            .with_poll_script([RenderSize::new(0, 0), RenderSize::new(640, 480)]);
        s.wait_events(Duration::ZERO);
        assert!(s.current_extent().is_zero());
        s.wait_events(Duration::ZERO);
        assert_eq!(s.current_extent(), RenderSize::new(640, 480));
        assert_eq!(s.polls(), 2);
        assert!(!s.was_resized());
    }
}
