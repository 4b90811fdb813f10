// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use cubic_render::FrameConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub render: FrameConfig,
    pub clear_color: [f32; 4],
    /// Default tracing directive; `RUST_LOG` overrides it.
    pub log: String,
    /// Submit a transfer every N frames. 0 disables it.
    pub transfer_every: u64,
}

impl Default for AppCfg {
    fn default() -> Self {
        AppCfg {
            render: FrameConfig::default(),
            clear_color: [0.02, 0.02, 0.04, 1.0],
            log: "info".into(),
            transfer_every: 4,
        }
    }
}

/// `Ok(None)` when the file does not exist.
pub fn read(path: &Path) -> Result<Option<AppCfg>> {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let cfg = toml::from_str::<AppCfg>(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubic_render::VsyncMode;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            clear_color = [1.0, 0.0, 0.0, 1.0]

            [render]
            frames_in_flight = 3
            vsync_mode = "fifo"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.log, "info");
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.vsync_mode, VsyncMode::Fifo);
        assert_eq!(cfg.render.max_acquire_attempts, 3);
    }

    #[test]
    fn test_missing_file_is_none() {
        let p = Path::new("definitely/not/here/cubic.toml");
        assert!(read(p).unwrap().is_none());
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(toml::from_str::<AppCfg>("render = 3").is_err());
    }
}
