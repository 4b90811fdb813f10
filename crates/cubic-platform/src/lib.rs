// SPDX-License-Identifier: CEPL-1.0
//! winit glue: the window-side [`SurfaceProvider`].
#![deny(unsafe_op_in_unsafe_fn)]

use std::sync::Arc;

use anyhow::{Context, Result};
use cubic_render::{RenderSize, SurfaceProvider};
use tracing::debug;

pub use winit;

use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// A winit window as seen by the renderer.
///
/// The event loop owns resize notification; the renderer only reads the
/// flag after present and clears it once the chain is rebuilt.
pub struct WindowSurface {
    window: Arc<Window>,
    resized: bool,
}

impl WindowSurface {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            resized: false,
        }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn notify_resized(&mut self) {
        self.resized = true;
    }
}

pub fn size_of(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

impl SurfaceProvider for WindowSurface {
    fn current_extent(&self) -> RenderSize {
        size_of(self.window.inner_size())
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn reset_resized_flag(&mut self) {
        if std::mem::take(&mut self.resized) {
            debug!("resize flag cleared");
        }
    }
}

pub fn create_window(event_loop: &ActiveEventLoop, title: &str) -> Result<Arc<Window>> {
    let window = event_loop
        .create_window(Window::default_attributes().with_title(title))
        .context("create_window")?;
    Ok(Arc::new(window))
}
