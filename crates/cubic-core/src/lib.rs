// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_directive`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts frames and reports once per `window`.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    since: Instant,
    window: Duration,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            frames: 0,
            since: Instant::now(),
            window,
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Frames counted in the elapsed window, if it has elapsed. Restarts the window.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        if now.duration_since(self.since) < self.window {
            return None;
        }
        let frames = std::mem::take(&mut self.frames);
        self.since = now;
        Some(frames)
    }

    /// Drops the count, e.g. while paused.
    pub fn reset(&mut self) {
        self.frames = 0;
        self.since = Instant::now();
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        init_tracing("debug");
        init_tracing("info");
        tracing::debug!("still alive");
    }

    #[test]
    fn test_fps_window() {
        let mut fps = FpsCounter::new(Duration::from_millis(100));
        let start = Instant::now();
        fps.frame();
        fps.frame();
        assert_eq!(fps.tick(start), None);
        assert_eq!(fps.tick(start + Duration::from_millis(150)), Some(2));
        assert_eq!(fps.tick(start + Duration::from_millis(200)), None);
    }
}
