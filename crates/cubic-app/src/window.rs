// SPDX-License-Identifier: CEPL-1.0
//! Windowed frame loop on the Vulkan backend.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use cubic_core::FpsCounter;
use cubic_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use cubic_platform::{create_window, WindowSurface};
use cubic_render::{DrawStatus, GpuError, RenderError, Renderer, SkipReason};
use cubic_render_vk::{record_clear, StreamBuffer, VkGpu};
use tracing::{error, info};

use crate::config::AppCfg;

const STREAM_BYTES: u64 = 64 * 1024;

struct App {
    cfg: AppCfg,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer<VkGpu, WindowSurface>>,
    stream: Option<StreamBuffer>,

    paused: bool,
    occluded: bool,
    exiting: bool,
    frame: u64,
    fps: FpsCounter,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            window: None,
            renderer: None,
            stream: None,
            paused: false,
            occluded: false,
            exiting: false,
            frame: 0,
            fps: FpsCounter::default(),
            failure: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(event_loop, "cubic")?;
        let gpu = VkGpu::new(&*window, &*window).context("vulkan init")?;
        let surface = WindowSurface::new(Arc::clone(&window));
        let renderer =
            Renderer::new(gpu, surface, self.cfg.render.clone()).context("renderer init")?;
        let stream = StreamBuffer::new(renderer.gpu(), STREAM_BYTES)?;

        info!(
            frames_in_flight = self.cfg.render.frames_in_flight,
            vsync = self.cfg.render.vsync,
            stream_bytes = stream.size(),
            "renderer ready"
        );
        self.paused = window.inner_size().width == 0 || window.inner_size().height == 0;
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.stream = Some(stream);
        Ok(())
    }

    /// Renderer shutdown drains the device; the stream buffer goes next,
    /// then the device itself, then the window. A device that failed to
    /// drain keeps the stream buffer, like the renderer keeps its objects.
    fn teardown(&mut self) -> Result<()> {
        let mut drained = Ok(());
        if let Some(mut renderer) = self.renderer.take() {
            drained = renderer.shutdown();
            let released = matches!(drained, Ok(()) | Err(RenderError::Gpu(GpuError::DeviceLost)));
            if let (true, Some(stream)) = (released, self.stream.take()) {
                stream.destroy(renderer.gpu());
            }
        }
        self.window = None;
        Ok(drained?)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure.get_or_insert(e);
        self.exiting = true;
        event_loop.exit();
    }

    fn draw(&mut self) -> Result<()> {
        let (Some(renderer), Some(stream)) = (self.renderer.as_mut(), self.stream.as_ref()) else {
            return Ok(());
        };
        self.frame += 1;

        if self.cfg.transfer_every > 0 && self.frame % self.cfg.transfer_every == 0 {
            let value = self.frame as u32;
            renderer.submit_transfer(|gpu, cmd| {
                stream.record_fill(gpu, cmd, value);
                Ok::<(), Infallible>(())
            })?;
        }

        let color = self.cfg.clear_color;
        match renderer.draw_frame(|gpu, ctx| {
            record_clear(gpu, ctx.command_buffer, ctx.image, color);
            Ok::<(), Infallible>(())
        })? {
            DrawStatus::Presented(_) => self.fps.frame(),
            DrawStatus::Skipped(SkipReason::Minimized) => self.paused = true,
            DrawStatus::Skipped(SkipReason::SwapchainRebuilt) => {}
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(if self.cfg.render.vsync {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        });
        info!("resumed, paused={}", self.paused);
        if let (false, Some(w)) = (self.paused, &self.window) {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.exiting = true;
                if let Err(e) = self.teardown() {
                    self.fail(event_loop, e);
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if let Some(r) = self.renderer.as_mut() {
                    r.surface_mut().notify_resized();
                }
                let zero = size.width == 0 || size.height == 0;
                self.paused = zero || self.occluded;
                info!("resized to {}x{} (paused={})", size.width, size.height, self.paused);
            }

            WindowEvent::Occluded(occluded) => {
                self.occluded = occluded;
                let zero = self
                    .window
                    .as_ref()
                    .map(|w| w.inner_size().width == 0 || w.inner_size().height == 0)
                    .unwrap_or(true);
                self.paused = occluded || zero;
                info!("occluded={occluded}, paused={}", self.paused);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if let Err(e) = self.draw() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.fps.reset();
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }
        if let Some(fps) = self.fps.tick(Instant::now()) {
            info!("fps ~ {fps}");
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Err(e) = self.teardown() {
            error!("teardown: {e:#}");
        }
    }
}

pub fn run(cfg: AppCfg) -> Result<()> {
    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
