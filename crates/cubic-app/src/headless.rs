// SPDX-License-Identifier: CEPL-1.0
//! GPU-less smoke run of the frame loop.

use std::convert::Infallible;

use anyhow::{bail, Context, Result};
use cubic_render::headless::{HeadlessGpu, HeadlessSurface};
use cubic_render::{DrawStatus, PresentStatus, RenderSize, Renderer};
use tracing::{info, warn};

use crate::config::AppCfg;

#[derive(Debug, Default)]
struct Summary {
    presented: u64,
    recreated: u64,
    skipped: u64,
    transfers: u64,
}

pub fn run(cfg: &AppCfg, frames: u64) -> Result<()> {
    let surface = HeadlessSurface::new(RenderSize::new(1280, 720));
    let mut renderer = Renderer::new(HeadlessGpu::new(), surface, cfg.render.clone())
        .context("headless renderer")?;

    let mut summary = Summary::default();
    for i in 0..frames {
        // One resize halfway through, so the run covers a rebuild.
        if i == frames / 2 {
            renderer.surface_mut().set_extent(RenderSize::new(1024, 768));
        }
        if cfg.transfer_every > 0 && i % cfg.transfer_every == 0 {
            renderer.submit_transfer(|_, _| Ok::<(), Infallible>(()))?;
            summary.transfers += 1;
        }
        match renderer.draw_frame(|_, _| Ok::<(), Infallible>(()))? {
            DrawStatus::Presented(PresentStatus::Presented) => summary.presented += 1,
            DrawStatus::Presented(_) => {
                summary.presented += 1;
                summary.recreated += 1;
            }
            DrawStatus::Skipped(reason) => {
                warn!(?reason, frame = i, "frame skipped");
                summary.skipped += 1;
            }
        }
    }

    renderer.wait_idle()?;
    let gpu = renderer.gpu();
    let violations = gpu.violations();
    info!(
        presented = summary.presented,
        recreated = summary.recreated,
        skipped = summary.skipped,
        transfers = summary.transfers,
        submissions = gpu.submissions().len(),
        max_pending = gpu.max_pending_fences(),
        swapchains = gpu.swapchains_created(),
        "headless run finished"
    );
    renderer.shutdown()?;

    if !violations.is_empty() {
        for v in &violations {
            warn!("{v}");
        }
        bail!("{} synchronization violations", violations.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke_run_is_clean() {
        let cfg = AppCfg {
            transfer_every: 3,
            ..AppCfg::default()
        };
        run(&cfg, 40).unwrap();
    }
}
