// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use crate::RenderSize;

/// Window-side collaborator of the renderer.
///
/// The native surface itself is consumed by the backend at construction;
/// the core only needs the drawable extent and the resize flag.
pub trait SurfaceProvider {
    fn current_extent(&self) -> RenderSize;
    fn was_resized(&self) -> bool;
    fn reset_resized_flag(&mut self);

    /// Called between extent polls while the surface is zero-sized.
    fn wait_events(&mut self, timeout: Duration) {
        std::thread::sleep(timeout);
    }
}
