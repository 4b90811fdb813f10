// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod headless;
mod window;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use cubic_core::init_tracing;
use tracing::{info, warn};

use crate::config::AppCfg;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Vk,
    Headless,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer backend
    #[arg(long, value_enum, default_value_t = Backend::Vk)]
    backend: Backend,

    /// Overrides `render.frames_in_flight` from the config file
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// Frames to draw with the headless backend
    #[arg(long, default_value_t = 300)]
    frames: u64,

    #[arg(long, default_value = "cubic.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Tracing wants the config's directive, so the read is reported after init.
    let loaded = config::read(&args.config);
    let mut cfg = match &loaded {
        Ok(Some(cfg)) => cfg.clone(),
        _ => AppCfg::default(),
    };
    init_tracing(&cfg.log);
    match loaded {
        Ok(Some(_)) => info!("loaded {}", args.config.display()),
        Ok(None) => info!("{} not found, using defaults", args.config.display()),
        Err(e) => warn!("{e:#}; using defaults"),
    }

    if let Some(n) = args.frames_in_flight {
        cfg.render.frames_in_flight = n;
    }
    cfg.render.validate()?;
    info!(backend = ?args.backend, frames_in_flight = cfg.render.frames_in_flight, "starting");

    match args.backend {
        Backend::Vk => window::run(cfg),
        Backend::Headless => headless::run(&cfg, args.frames),
    }
}
