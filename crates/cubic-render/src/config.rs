// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RenderError, RenderResult};

pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,    // Target monitor refresh rate
    #[default]
    Mailbox, // Smart Vsync, fps uncapped
}

/// Frame core configuration. Fixed once the renderer is built.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub frames_in_flight: usize,
    /// `None` blocks forever on fences. When set, an expired wait is fatal.
    pub fence_timeout_ms: Option<u64>,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub minimized_poll_ms: u64,
    /// `None` keeps polling a zero-sized surface until it grows.
    pub max_minimized_polls: Option<u32>,
    pub max_acquire_attempts: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig {
            frames_in_flight: 2,
            fence_timeout_ms: None,
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            minimized_poll_ms: 16,
            max_minimized_polls: None,
            max_acquire_attempts: 3,
        }
    }
}

impl FrameConfig {
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(RenderError::InvalidConfig(format!(
                "frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.max_acquire_attempts == 0 {
            return Err(RenderError::InvalidConfig(
                "max_acquire_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }

    pub fn minimized_poll_interval(&self) -> Duration {
        Duration::from_millis(self.minimized_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = FrameConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.frames_in_flight, 2);
        assert_eq!(cfg.fence_timeout(), None);
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(FrameConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(FrameConfig::default()
            .with_frames_in_flight(MAX_FRAMES_IN_FLIGHT + 1)
            .validate()
            .is_err());
        assert!(FrameConfig::default()
            .with_frames_in_flight(MAX_FRAMES_IN_FLIGHT)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg: FrameConfig = toml::from_str(
            r#"
            frames_in_flight = 3
            fence_timeout_ms = 2000
            vsync_mode = "fifo"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.frames_in_flight, 3);
        assert_eq!(cfg.fence_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(cfg.vsync_mode, VsyncMode::Fifo);
        assert!(cfg.vsync);
        assert_eq!(cfg.max_minimized_polls, None);
    }
}
