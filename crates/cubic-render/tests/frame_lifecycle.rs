// SPDX-License-Identifier: CEPL-1.0
//! Frame lifecycle driven end to end through the headless backend.

use std::convert::Infallible;

use cubic_render::headless::{
    GpuEvent, HeadlessConfig, HeadlessFormat, HeadlessGpu, HeadlessSurface, ScriptedAcquire,
};
use cubic_render::submit::TRANSFER_WAIT_STAGES;
use cubic_render::{
    DrawStatus, FrameConfig, FrameStatus, Gpu, PipelineStages, PresentStatus, Presented,
    Rebuild, RecordContext, RenderError, RenderSize, Renderer, SkipReason,
};

type HeadlessRenderer = Renderer<HeadlessGpu, HeadlessSurface>;

fn renderer_with(gpu: HeadlessGpu, config: FrameConfig) -> HeadlessRenderer {
    cubic_core::init_tracing("debug");
    Renderer::new(gpu, HeadlessSurface::new(RenderSize::new(800, 600)), config).unwrap()
}

fn renderer(frames_in_flight: usize) -> HeadlessRenderer {
    renderer_with(
        HeadlessGpu::new(),
        FrameConfig::default().with_frames_in_flight(frames_in_flight),
    )
}

fn noop(_: &HeadlessGpu, _: &RecordContext<HeadlessGpu>) -> Result<(), Infallible> {
    Ok(())
}

/// acquire -> record -> submit -> present, returning the slot used and
/// whether the graphics submission waited on a transfer.
fn frame(r: &mut HeadlessRenderer) -> (usize, bool) {
    let FrameStatus::Ready(token) = r.acquire_frame().unwrap() else {
        panic!("frame unexpectedly skipped");
    };
    r.record(noop).unwrap();
    let submission = r.submit_graphics().unwrap();
    assert_eq!(submission.frame_slot, token.frame_slot);
    r.present().unwrap();
    (token.frame_slot, submission.waited_on_transfer)
}

fn transfer(r: &mut HeadlessRenderer) {
    r.submit_transfer(|_, _| Ok::<(), Infallible>(())).unwrap();
}

#[test]
fn scenario_a_ring_without_transfers() {
    let mut r = renderer(2);
    let mut slots = Vec::new();
    for _ in 0..5 {
        let (slot, waited) = frame(&mut r);
        assert!(!waited);
        slots.push(slot);
    }
    assert_eq!(slots, vec![0, 1, 0, 1, 0]);

    let transfer_sems = [r.sync().transfer_finished(0), r.sync().transfer_finished(1)];
    let subs = r.gpu().submissions();
    assert_eq!(subs.len(), 5);
    for s in &subs {
        assert_eq!(s.waits.len(), 1);
        assert_eq!(s.waits[0].1, PipelineStages::TRANSFER);
        assert!(transfer_sems.iter().all(|t| !s.waits_on(*t)));
    }
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn scenario_b_transfer_then_graphics() {
    let mut r = renderer(2);
    transfer(&mut r);
    assert!(r.sync().transfer_pending(0));
    assert!(r.sync().transfer_pending(1));

    let FrameStatus::Ready(token) = r.acquire_frame().unwrap() else {
        panic!("skipped");
    };
    assert_eq!(token.frame_slot, 0);
    r.record(noop).unwrap();
    let sub = r.submit_graphics().unwrap();
    let t0 = r.sync().transfer_finished(0);
    let hits: Vec<_> = sub.waits.iter().filter(|w| w.semaphore == t0).collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].stages, TRANSFER_WAIT_STAGES);
    assert!(sub.waited_on_transfer);
    assert!(!r.sync().transfer_pending(0));
    assert!(r.sync().transfer_pending(1));
    r.present().unwrap();

    // Slot 1 consumes its own signal once, then nobody waits again.
    assert_eq!(frame(&mut r), (1, true));
    assert_eq!(frame(&mut r), (0, false));
    assert_eq!(frame(&mut r), (1, false));
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn scenario_c_out_of_date_acquire_retries_same_slot() {
    let gpu = HeadlessGpu::new();
    gpu.script_acquire([
        ScriptedAcquire::Image(0),
        ScriptedAcquire::Image(1),
        ScriptedAcquire::OutOfDate,
    ]);
    let mut r = renderer_with(gpu, FrameConfig::default());
    frame(&mut r);
    frame(&mut r);
    assert_eq!(r.current_frame_slot(), 0);

    assert_eq!(
        r.acquire_frame().unwrap(),
        FrameStatus::Skipped(SkipReason::SwapchainRebuilt)
    );
    assert_eq!(r.current_frame_slot(), 0);
    assert_eq!(r.gpu().swapchains_created(), 2);

    let events = r.gpu().events();
    let idle = events
        .iter()
        .rposition(|e| *e == GpuEvent::DeviceWaitIdle)
        .unwrap();
    let rebuilt = events
        .iter()
        .rposition(|e| matches!(e, GpuEvent::SwapchainCreated { old: Some(_), .. }))
        .unwrap();
    assert!(idle < rebuilt);

    let (slot, _) = frame(&mut r);
    assert_eq!(slot, 0);
    assert_eq!(r.frame_count(), 3);
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn scenario_d_zero_extent_polls_before_building() {
    cubic_core::init_tracing("debug");
    let surface = HeadlessSurface::new(RenderSize::new(0, 0)).with_poll_script([
        RenderSize::new(0, 0),
        RenderSize::new(0, 0),
        RenderSize::new(1024, 768),
    ]);
    let r = Renderer::new(HeadlessGpu::new(), surface, FrameConfig::default()).unwrap();
    assert_eq!(r.surface().polls(), 3);
    assert_eq!(r.gpu().swapchains_created(), 1);
    assert_eq!(
        r.swapchain().current().unwrap().extent(),
        RenderSize::new(1024, 768)
    );
}

#[test]
fn minimized_window_skips_frames_without_building() {
    let config = FrameConfig {
        max_minimized_polls: Some(2),
        ..FrameConfig::default()
    };
    let mut r = renderer_with(HeadlessGpu::new(), config);
    frame(&mut r);

    r.surface_mut().set_extent(RenderSize::new(0, 0));
    assert_eq!(
        r.draw_frame(noop).unwrap(),
        DrawStatus::Presented(PresentStatus::Minimized)
    );
    assert!(r.swapchain().is_stale());
    assert_eq!(
        r.acquire_frame().unwrap(),
        FrameStatus::Skipped(SkipReason::Minimized)
    );
    assert_eq!(r.gpu().swapchains_created(), 1);

    r.surface_mut().set_extent(RenderSize::new(640, 480));
    assert!(matches!(r.acquire_frame().unwrap(), FrameStatus::Ready(_)));
    assert_eq!(r.gpu().swapchains_created(), 2);
    assert_eq!(
        r.swapchain().current().unwrap().extent(),
        RenderSize::new(640, 480)
    );
    r.record(noop).unwrap();
    r.submit_graphics().unwrap();
    r.present().unwrap();
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn bounded_overlap() {
    for fif in 1..=4 {
        let mut r = renderer(fif);
        for _ in 0..20 {
            frame(&mut r);
        }
        // Three images: with four slots the image guard already caps overlap at three.
        let max = r.gpu().max_pending_fences();
        assert!(max <= fif, "frames in flight {fif}, pending {max}");
        assert_eq!(max, fif.min(3));
        assert!(r.gpu().violations().is_empty());
    }
}

#[test]
fn image_guard_is_waited_before_recording() {
    let gpu = HeadlessGpu::new();
    gpu.script_acquire([ScriptedAcquire::Image(0), ScriptedAcquire::Image(0)]);
    let mut r = renderer_with(gpu, FrameConfig::default().with_frames_in_flight(2));
    frame(&mut r);

    let fence0 = r.sync().fence(0);
    assert!(!r.gpu().fence_signaled(fence0).unwrap());

    let FrameStatus::Ready(token) = r.acquire_frame().unwrap() else {
        panic!("skipped");
    };
    assert_eq!((token.frame_slot, token.image_slot), (1, 0));
    r.record(|gpu, ctx| {
        assert!(gpu.fence_signaled(fence0).unwrap());
        assert_eq!(ctx.image_slot, 0);
        Ok::<(), Infallible>(())
    })
    .unwrap();
    assert_eq!(r.sync().image_owner(0), Some(1));
    r.submit_graphics().unwrap();
    r.present().unwrap();
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn format_drift_on_rebuild_is_fatal() {
    let mut r = renderer(2);
    frame(&mut r);
    let before = r.swapchain().format();

    // Same format survives an ordinary resize.
    r.surface_mut().set_extent(RenderSize::new(1024, 768));
    assert_eq!(
        r.draw_frame(noop).unwrap(),
        DrawStatus::Presented(PresentStatus::Recreated)
    );
    assert_eq!(r.swapchain().format(), before);

    r.gpu().set_surface_formats(vec![HeadlessFormat::Rgba8Srgb]);
    r.surface_mut().set_extent(RenderSize::new(1280, 720));
    let err = r.draw_frame(noop).unwrap_err();
    assert!(matches!(err, RenderError::FormatChanged { .. }));

    r.shutdown().unwrap();
    assert_eq!(r.gpu().live_objects(), 0);
}

#[test]
fn ring_sequence() {
    let mut r = renderer(3);
    let slots: Vec<usize> = (0..10).map(|_| frame(&mut r).0).collect();
    assert_eq!(slots, (0..10).map(|i| i % 3).collect::<Vec<_>>());
}

#[test]
fn protocol_misuse_is_reported() {
    let mut r = renderer(2);
    assert!(matches!(r.record(noop), Err(RenderError::Misuse(_))));
    assert!(matches!(r.submit_graphics(), Err(RenderError::Misuse(_))));
    assert!(matches!(r.present(), Err(RenderError::Misuse(_))));

    r.acquire_frame().unwrap();
    assert!(matches!(r.acquire_frame(), Err(RenderError::Misuse(_))));
    assert!(matches!(r.submit_graphics(), Err(RenderError::Misuse(_))));
    assert!(matches!(r.reset_command_pools(), Err(RenderError::Misuse(_))));
    assert!(matches!(r.recreate(), Err(RenderError::Misuse(_))));
    r.record(noop).unwrap();
    assert!(matches!(r.present(), Err(RenderError::Misuse(_))));
    r.submit_graphics().unwrap();
    r.present().unwrap();

    // In flight work blocks a pool reset until it has retired.
    assert!(matches!(r.reset_command_pools(), Err(RenderError::Misuse(_))));
    r.wait_idle().unwrap();
    r.reset_command_pools().unwrap();

    r.shutdown().unwrap();
    assert!(matches!(r.acquire_frame(), Err(RenderError::Misuse(_))));
}

#[test]
fn record_failure_propagates() {
    let mut r = renderer(2);
    r.acquire_frame().unwrap();
    let err = r
        .record(|_, _| Err::<(), _>(std::io::Error::other("pipeline missing")))
        .unwrap_err();
    assert!(matches!(err, RenderError::Record(_)));
}

#[test]
fn back_to_back_transfers_rearm_pending_semaphores() {
    let mut r = renderer(2);
    let first = r.submit_transfer(|_, _| Ok::<(), Infallible>(())).unwrap();
    assert!(first.waits.is_empty());
    assert_eq!(first.signals.len(), 2);

    let second = r.submit_transfer(|_, _| Ok::<(), Infallible>(())).unwrap();
    assert_eq!(second.waits.len(), 2);
    assert!(second
        .waits
        .iter()
        .all(|w| w.stages == PipelineStages::TRANSFER));

    assert_eq!(frame(&mut r), (0, true));
    transfer(&mut r);
    let subs = r.gpu().submissions();
    let last = subs.last().unwrap();
    assert_eq!(last.waits.len(), 1);
    assert!(last.waits_on(r.sync().transfer_finished(1)));

    assert_eq!(frame(&mut r), (1, true));
    assert_eq!(frame(&mut r), (0, true));
    assert_eq!(frame(&mut r), (1, false));
    assert_eq!(r.pipeline().transfer_submits(), 3);
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn transfer_between_acquire_and_submit() {
    let mut r = renderer(2);
    r.acquire_frame().unwrap();
    transfer(&mut r);
    r.record(noop).unwrap();
    assert!(r.submit_graphics().unwrap().waited_on_transfer);
    r.present().unwrap();
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn shutdown_drains_and_releases_everything() {
    let mut r = renderer(3);
    for i in 0..7 {
        if i % 3 == 0 {
            transfer(&mut r);
        }
        frame(&mut r);
    }
    assert!(r.gpu().pending_fence_count() > 0);
    r.shutdown().unwrap();
    r.shutdown().unwrap();
    assert_eq!(r.gpu().live_objects(), 0);
    assert_eq!(r.gpu().pending_fence_count(), 0);
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn suboptimal_acquire_rebuilds_after_present() {
    let gpu = HeadlessGpu::new();
    gpu.script_acquire([ScriptedAcquire::Suboptimal(0)]);
    let mut r = renderer_with(gpu, FrameConfig::default());
    let FrameStatus::Ready(token) = r.acquire_frame().unwrap() else {
        panic!("skipped");
    };
    assert!(token.suboptimal);
    r.record(noop).unwrap();
    r.submit_graphics().unwrap();
    assert_eq!(r.present().unwrap(), PresentStatus::Recreated);
    assert_eq!(r.gpu().swapchains_created(), 2);
    assert_eq!(r.draw_frame(noop).unwrap(), DrawStatus::Presented(PresentStatus::Presented));
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn out_of_date_present_rebuilds_and_advances() {
    let gpu = HeadlessGpu::new();
    gpu.script_present([Presented::OutOfDate]);
    let mut r = renderer_with(gpu, FrameConfig::default());
    assert_eq!(
        r.draw_frame(noop).unwrap(),
        DrawStatus::Presented(PresentStatus::Recreated)
    );
    assert_eq!(r.frame_count(), 1);
    assert_eq!(r.current_frame_slot(), 1);
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn resize_rebuilds_at_new_extent() {
    let mut r = renderer(2);
    frame(&mut r);
    r.surface_mut().set_extent(RenderSize::new(1280, 720));
    assert_eq!(
        r.draw_frame(noop).unwrap(),
        DrawStatus::Presented(PresentStatus::Recreated)
    );
    assert_eq!(
        r.swapchain().current().unwrap().extent(),
        RenderSize::new(1280, 720)
    );
    assert!(!cubic_render::SurfaceProvider::was_resized(r.surface()));
    assert_eq!(r.draw_frame(noop).unwrap(), DrawStatus::Presented(PresentStatus::Presented));
}

#[test]
fn hung_gpu_with_timeout_is_fatal() {
    let config = FrameConfig {
        frames_in_flight: 1,
        fence_timeout_ms: Some(10),
        ..FrameConfig::default()
    };
    let mut r = renderer_with(HeadlessGpu::new(), config);
    frame(&mut r);
    r.gpu().set_hung(true);
    let err = r.draw_frame(noop).unwrap_err();
    assert!(matches!(err, RenderError::FenceTimeout { waited_ms: 10 }));
}

#[test]
fn shutdown_after_drain_timeout_leaks_instead_of_destroying() {
    let config = FrameConfig {
        frames_in_flight: 2,
        fence_timeout_ms: Some(10),
        ..FrameConfig::default()
    };
    let mut r = renderer_with(HeadlessGpu::new(), config);
    r.draw_frame(noop).unwrap();
    r.draw_frame(noop).unwrap();
    r.gpu().set_hung(true);

    let err = r.shutdown().unwrap_err();
    assert!(matches!(err, RenderError::FenceTimeout { waited_ms: 10 }));
    assert!(r.gpu().violations().is_empty());
    assert!(r.gpu().live_objects() > 0);
    r.shutdown().unwrap();
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn zero_fixed_surface_extent_counts_as_minimized() {
    let config = FrameConfig {
        max_minimized_polls: Some(2),
        ..FrameConfig::default()
    };
    let mut r = renderer_with(HeadlessGpu::new(), config);
    frame(&mut r);

    r.gpu().set_fixed_extent(Some(RenderSize::new(0, 0)));
    assert_eq!(r.recreate().unwrap(), Rebuild::Minimized);
    assert!(r.swapchain().is_stale());
    assert_eq!(r.gpu().swapchains_created(), 1);
    assert_eq!(
        r.acquire_frame().unwrap(),
        FrameStatus::Skipped(SkipReason::Minimized)
    );
    assert!(r.gpu().violations().is_empty());

    r.gpu().set_fixed_extent(None);
    assert!(matches!(r.recreate().unwrap(), Rebuild::Rebuilt { .. }));
    assert_eq!(
        r.swapchain().current().unwrap().extent(),
        RenderSize::new(800, 600)
    );
    assert_eq!(r.draw_frame(noop).unwrap(), DrawStatus::Presented(PresentStatus::Presented));
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn image_count_change_reallocates() {
    let mut r = renderer(2);
    assert_eq!(r.commands().graphics_buffer_count(), 2 * 3);
    frame(&mut r);

    r.gpu().set_image_counts(3, 0);
    r.surface_mut().set_extent(RenderSize::new(900, 700));
    assert_eq!(
        r.draw_frame(noop).unwrap(),
        DrawStatus::Presented(PresentStatus::Recreated)
    );
    assert_eq!(r.swapchain().image_count(), 4);
    assert_eq!(r.sync().image_count(), 4);
    assert_eq!(r.commands().graphics_buffer_count(), 2 * 4);
    for _ in 0..8 {
        frame(&mut r);
    }
    assert!(r.gpu().violations().is_empty());
}

#[test]
fn acquire_attempts_are_bounded() {
    let gpu = HeadlessGpu::new();
    gpu.script_acquire([ScriptedAcquire::OutOfDate, ScriptedAcquire::OutOfDate]);
    let config = FrameConfig {
        max_acquire_attempts: 2,
        ..FrameConfig::default()
    };
    let mut r = renderer_with(gpu, config);
    assert_eq!(
        r.draw_frame(noop).unwrap(),
        DrawStatus::Skipped(SkipReason::SwapchainRebuilt)
    );
    assert_eq!(r.frame_count(), 0);
    assert_eq!(r.current_frame_slot(), 0);
    assert_eq!(r.gpu().swapchains_created(), 3);
    assert_eq!(r.draw_frame(noop).unwrap(), DrawStatus::Presented(PresentStatus::Presented));
}

#[test]
fn invalid_config_is_rejected() {
    let err = Renderer::new(
        HeadlessGpu::new(),
        HeadlessSurface::new(RenderSize::new(800, 600)),
        FrameConfig::default().with_frames_in_flight(0),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RenderError::InvalidConfig(_)));
}

#[test]
fn surface_without_formats_fails_init() {
    let gpu = HeadlessGpu::new();
    gpu.set_surface_formats(Vec::new());
    let err = Renderer::new(
        gpu,
        HeadlessSurface::new(RenderSize::new(800, 600)),
        FrameConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RenderError::NoSurfaceFormat));
}

#[test]
fn surface_without_present_modes_fails_init() {
    let gpu = HeadlessGpu::with_config(HeadlessConfig {
        present_modes: Vec::new(),
        ..HeadlessConfig::default()
    });
    let err = Renderer::new(
        gpu,
        HeadlessSurface::new(RenderSize::new(800, 600)),
        FrameConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RenderError::NoPresentMode));
}
