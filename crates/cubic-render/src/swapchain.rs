// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain and its rebuild protocol.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{FrameConfig, VsyncMode};
use crate::error::{misuse, RenderError, RenderResult};
use crate::gpu::{Gpu, PresentMode, SurfaceCaps, SwapchainDesc, SwapchainParts};
use crate::surface::SurfaceProvider;
use crate::RenderSize;

pub struct Swapchain<G: Gpu> {
    parts: SwapchainParts<G>,
    format: G::Format,
    present_mode: PresentMode,
    extent: RenderSize,
}

impl<G: Gpu> Swapchain<G> {
    #[inline]
    pub fn handle(&self) -> G::Swapchain {
        self.parts.handle
    }

    #[inline]
    pub fn format(&self) -> G::Format {
        self.format
    }

    #[inline]
    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    #[inline]
    pub fn extent(&self) -> RenderSize {
        self.extent
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.parts.images.len()
    }

    pub fn image(&self, index: usize) -> Option<G::Image> {
        self.parts.images.get(index).copied()
    }

    pub fn image_view(&self, index: usize) -> Option<G::ImageView> {
        self.parts.views.get(index).copied()
    }

    pub fn image_views(&self) -> &[G::ImageView] {
        &self.parts.views
    }
}

/// Outcome of a (re)build request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rebuild {
    Rebuilt { image_count: usize, image_count_changed: bool },
    /// The surface stayed zero-sized for the configured number of polls;
    /// nothing was built and the chain is still stale.
    Minimized,
}

/// Owns the presentable image chain.
///
/// A chain is never patched: staleness (resize, out-of-date, suboptimal)
/// always leads to a full rebuild behind a device-idle wait, and the color
/// format must survive every rebuild.
pub struct SwapchainManager<G: Gpu> {
    current: Option<Swapchain<G>>,
    stale: bool,
    vsync: bool,
    vsync_mode: VsyncMode,
    poll_interval: Duration,
    max_polls: Option<u32>,
    rebuilds: u64,
}

impl<G: Gpu> SwapchainManager<G> {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            current: None,
            stale: true,
            vsync: config.vsync,
            vsync_mode: config.vsync_mode,
            poll_interval: config.minimized_poll_interval(),
            max_polls: config.max_minimized_polls,
            rebuilds: 0,
        }
    }

    /// Constructs a chain sized to `extent`. `previous` is handed to the
    /// platform so the old chain keeps presenting until the new one exists.
    pub fn build(
        &self,
        gpu: &G,
        extent: RenderSize,
        previous: Option<G::Swapchain>,
    ) -> RenderResult<Swapchain<G>> {
        let caps = gpu.surface_caps()?;
        let extent = resolve_extent(&caps, extent);
        if extent.is_zero() {
            return Err(misuse("swapchain build with a zero extent"));
        }
        self.build_with_caps(gpu, &caps, extent, previous)
    }

    /// `extent` is already resolved against `caps` and non-zero.
    fn build_with_caps(
        &self,
        gpu: &G,
        caps: &SurfaceCaps<G::Format>,
        extent: RenderSize,
        previous: Option<G::Swapchain>,
    ) -> RenderResult<Swapchain<G>> {
        if caps.formats.is_empty() {
            return Err(RenderError::NoSurfaceFormat);
        }
        let format = gpu
            .pick_surface_format(&caps.formats)
            .ok_or(RenderError::NoSurfaceFormat)?;
        let present_mode = choose_present_mode(&caps.present_modes, self.vsync, self.vsync_mode)
            .ok_or(RenderError::NoPresentMode)?;
        let image_count = choose_image_count(caps);

        let desc = SwapchainDesc {
            format,
            present_mode,
            extent,
            image_count,
        };
        let parts = gpu.create_swapchain(&desc, previous)?;

        info!(
            "swapchain built: extent {}, format {:?}, present_mode {:?}, \
             images(min={} → picked={}, got={})",
            extent,
            format,
            present_mode,
            caps.min_image_count,
            image_count,
            parts.images.len()
        );

        Ok(Swapchain {
            parts,
            format,
            present_mode,
            extent,
        })
    }

    /// First build. Polls a zero-sized surface until it becomes drawable,
    /// regardless of `max_minimized_polls`: there is no chain to fall back on.
    /// Returns the image count.
    pub fn create<S: SurfaceProvider>(&mut self, gpu: &G, surface: &mut S) -> RenderResult<usize> {
        if self.current.is_some() {
            return Err(misuse("swapchain created twice"));
        }
        let (caps, extent) = self
            .wait_for_drawable(gpu, surface, None)?
            .ok_or_else(|| misuse("surface never became drawable"))?;
        let chain = self.build_with_caps(gpu, &caps, extent, None)?;
        let image_count = chain.image_count();
        self.current = Some(chain);
        self.stale = false;
        Ok(image_count)
    }

    /// Drains the device, re-queries the extent and rebuilds.
    ///
    /// Every queue is empty before any swapchain-scoped object is touched.
    /// On `FormatChanged` the new chain is kept installed so teardown still
    /// releases it.
    pub fn recreate<S: SurfaceProvider>(
        &mut self,
        gpu: &G,
        surface: &mut S,
    ) -> RenderResult<Rebuild> {
        gpu.device_wait_idle()?;

        let Some((caps, extent)) = self.wait_for_drawable(gpu, surface, self.max_polls)? else {
            self.stale = true;
            return Ok(Rebuild::Minimized);
        };

        let old = self.current.take();
        let before = old.as_ref().map(|sc| (sc.format, sc.image_count()));
        let built = self.build_with_caps(gpu, &caps, extent, old.as_ref().map(|sc| sc.handle()));
        // Old chain goes only after its replacement exists (or failed to).
        if let Some(old) = old {
            gpu.destroy_swapchain(old.parts);
        }
        let chain = built?;
        let format = chain.format;
        let image_count = chain.image_count();
        self.current = Some(chain);
        self.rebuilds += 1;

        let image_count_changed = match before {
            Some((before_format, _)) if before_format != format => {
                return Err(RenderError::FormatChanged {
                    before: format!("{before_format:?}"),
                    after: format!("{format:?}"),
                });
            }
            Some((_, before_count)) => before_count != image_count,
            None => true,
        };
        self.stale = false;

        if image_count_changed {
            info!("swapchain image count now {image_count}");
        }
        Ok(Rebuild::Rebuilt {
            image_count,
            image_count_changed,
        })
    }

    /// Polls until the extent the chain would actually get is non-zero.
    /// Both the provider and a platform-fixed surface extent can report zero
    /// while minimized.
    fn wait_for_drawable<S: SurfaceProvider>(
        &self,
        gpu: &G,
        surface: &mut S,
        max_polls: Option<u32>,
    ) -> RenderResult<Option<(SurfaceCaps<G::Format>, RenderSize)>> {
        let mut polls = 0u32;
        loop {
            let wanted = surface.current_extent();
            let caps = gpu.surface_caps()?;
            let extent = if wanted.is_zero() {
                wanted
            } else {
                resolve_extent(&caps, wanted)
            };
            if !extent.is_zero() {
                if polls > 0 {
                    info!("surface drawable again at {extent} after {polls} polls");
                }
                return Ok(Some((caps, extent)));
            }
            if max_polls.is_some_and(|max| polls >= max) {
                warn!("surface still {extent} after {polls} polls, deferring rebuild");
                return Ok(None);
            }
            if polls == 0 {
                debug!("surface is {extent}, polling until drawable");
            }
            surface.wait_events(self.poll_interval);
            polls += 1;
        }
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn current(&self) -> RenderResult<&Swapchain<G>> {
        self.current
            .as_ref()
            .ok_or_else(|| misuse("no swapchain has been built"))
    }

    pub fn image_count(&self) -> usize {
        self.current.as_ref().map_or(0, Swapchain::image_count)
    }

    pub fn format(&self) -> Option<G::Format> {
        self.current.as_ref().map(Swapchain::format)
    }

    /// Number of successful rebuilds after the first build.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Caller must have drained the device.
    pub fn destroy(&mut self, gpu: &G) {
        if let Some(chain) = self.current.take() {
            gpu.destroy_swapchain(chain.parts);
        }
        self.stale = true;
    }
}

/// Present-mode preference: vsync off favours IMMEDIATE, vsync on follows
/// `mode`. FIFO is the last resort whenever the surface offers it.
pub fn choose_present_mode(
    modes: &[PresentMode],
    vsync: bool,
    mode: VsyncMode,
) -> Option<PresentMode> {
    let order: &[PresentMode] = if !vsync {
        &[PresentMode::Immediate, PresentMode::Mailbox, PresentMode::Fifo]
    } else {
        match mode {
            VsyncMode::Mailbox => &[PresentMode::Mailbox, PresentMode::Fifo],
            VsyncMode::Fifo => &[PresentMode::Fifo, PresentMode::Mailbox],
        }
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .or_else(|| modes.first().copied())
}

/// One more than the minimum for better overlap, capped by max (0 == "no max").
pub fn choose_image_count<F>(caps: &SurfaceCaps<F>) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

pub fn resolve_extent<F>(caps: &SurfaceCaps<F>, want: RenderSize) -> RenderSize {
    match caps.current_extent {
        Some(fixed) => fixed,
        None => RenderSize {
            width: want.width.clamp(caps.min_extent.width, caps.max_extent.width),
            height: want
                .height
                .clamp(caps.min_extent.height, caps.max_extent.height),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> SurfaceCaps<u32> {
        SurfaceCaps {
            formats: vec![1],
            present_modes: vec![PresentMode::Fifo],
            min_image_count: min,
            max_image_count: max,
            current_extent: None,
            min_extent: RenderSize::new(1, 1),
            max_extent: RenderSize::new(4096, 4096),
        }
    }

    #[test]
    fn test_present_mode_vsync_off_prefers_immediate() {
        let modes = [PresentMode::Fifo, PresentMode::Mailbox, PresentMode::Immediate];
        assert_eq!(
            choose_present_mode(&modes, false, VsyncMode::Mailbox),
            Some(PresentMode::Immediate)
        );
        assert_eq!(
            choose_present_mode(&[PresentMode::Fifo], false, VsyncMode::Mailbox),
            Some(PresentMode::Fifo)
        );
    }

    #[test]
    fn test_present_mode_follows_vsync_mode() {
        let modes = [PresentMode::Fifo, PresentMode::Mailbox];
        assert_eq!(
            choose_present_mode(&modes, true, VsyncMode::Mailbox),
            Some(PresentMode::Mailbox)
        );
        assert_eq!(
            choose_present_mode(&modes, true, VsyncMode::Fifo),
            Some(PresentMode::Fifo)
        );
        assert_eq!(
            choose_present_mode(&[PresentMode::Fifo], true, VsyncMode::Mailbox),
            Some(PresentMode::Fifo)
        );
    }

    #[test]
    fn test_present_mode_none_when_surface_has_none() {
        assert_eq!(choose_present_mode(&[], true, VsyncMode::Fifo), None);
    }

    #[test]
    fn test_present_mode_falls_back_to_whatever_is_offered() {
        assert_eq!(
            choose_present_mode(&[PresentMode::FifoRelaxed], true, VsyncMode::Fifo),
            Some(PresentMode::FifoRelaxed)
        );
    }

    #[test]
    fn test_image_count_heuristic() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn test_extent_clamped_unless_fixed() {
        let mut c = caps(2, 0);
        assert_eq!(
            resolve_extent(&c, RenderSize::new(10_000, 600)),
            RenderSize::new(4096, 600)
        );
        c.current_extent = Some(RenderSize::new(800, 600));
        assert_eq!(
            resolve_extent(&c, RenderSize::new(1024, 768)),
            RenderSize::new(800, 600)
        );
    }
}
