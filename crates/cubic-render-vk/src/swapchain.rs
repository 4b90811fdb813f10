// SPDX-License-Identifier: CEPL-1.0
//! Surface format policy and the vk side of swapchain creation.

use std::fmt;

use ash::khr::{surface, swapchain};
use ash::vk;
use cubic_render::{GpuResult, PresentMode, RenderSize, SurfaceCaps, SwapchainDesc};

use crate::error::VkResultExt;

/// A surface format as the frame core sees it: pixel format plus color space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
}

impl From<vk::SurfaceFormatKHR> for SurfaceFormat {
    fn from(f: vk::SurfaceFormatKHR) -> Self {
        Self {
            format: f.format,
            color_space: f.color_space,
        }
    }
}

impl fmt::Display for SurfaceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", fmt_name(self.format), self.color_space)
    }
}

pub(crate) fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_SRGB => "BGRA8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "RGBA8_SRGB",
        vk::Format::B8G8R8A8_UNORM => "BGRA8_UNORM",
        vk::Format::R8G8B8A8_UNORM => "RGBA8_UNORM",
        vk::Format::A2B10G10R10_UNORM_PACK32 => "A2B10G10R10_UNORM",
        vk::Format::R16G16B16A16_SFLOAT => "RGBA16F",
        _ => "other",
    }
}

/// SDR preference: BGRA8 sRGB, RGBA8 sRGB, BGRA8 UNORM on an sRGB color
/// space, then whatever the driver lists first.
pub fn pick_surface_format(formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
        .or_else(|| {
            formats
                .iter()
                .copied()
                .find(|f| f.format == vk::Format::R8G8B8A8_SRGB)
        })
        .or_else(|| {
            formats.iter().copied().find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
}

pub(crate) fn present_mode_to_vk(m: PresentMode) -> vk::PresentModeKHR {
    match m {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub(crate) fn present_mode_from_vk(m: vk::PresentModeKHR) -> Option<PresentMode> {
    match m {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

fn size_of(e: vk::Extent2D) -> RenderSize {
    RenderSize::new(e.width, e.height)
}

/// `u32::MAX` in `current_extent` means the swapchain picks its own size.
pub(crate) fn caps_from_vk(
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    modes: &[vk::PresentModeKHR],
) -> SurfaceCaps<SurfaceFormat> {
    SurfaceCaps {
        formats: formats.iter().copied().map(SurfaceFormat::from).collect(),
        present_modes: modes.iter().copied().filter_map(present_mode_from_vk).collect(),
        min_image_count: caps.min_image_count,
        max_image_count: caps.max_image_count,
        current_extent: (caps.current_extent.width != u32::MAX)
            .then(|| size_of(caps.current_extent)),
        min_extent: size_of(caps.min_image_extent),
        max_extent: size_of(caps.max_image_extent),
    }
}

pub(crate) unsafe fn query_caps(
    surf_i: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> GpuResult<SurfaceCaps<SurfaceFormat>> {
    let (caps, formats, modes) = unsafe {
        (
            surf_i
                .get_physical_device_surface_capabilities(phys, surface)
                .gpu("get_physical_device_surface_capabilities")?,
            surf_i
                .get_physical_device_surface_formats(phys, surface)
                .gpu("get_physical_device_surface_formats")?,
            surf_i
                .get_physical_device_surface_present_modes(phys, surface)
                .gpu("get_physical_device_surface_present_modes")?,
        )
    };
    Ok(caps_from_vk(&caps, &formats, &modes))
}

/// Creates the chain and one 2D color view per image. On a view failure the
/// views created so far and the chain itself are released again.
pub(crate) unsafe fn create_chain(
    device: &ash::Device,
    sc_loader: &swapchain::Device,
    surf_i: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    desc: &SwapchainDesc<SurfaceFormat>,
    old: Option<vk::SwapchainKHR>,
) -> GpuResult<(vk::SwapchainKHR, Vec<vk::Image>, Vec<vk::ImageView>)> {
    let caps = unsafe { surf_i.get_physical_device_surface_capabilities(phys, surface) }
        .gpu("get_physical_device_surface_capabilities")?;

    let pre_transform = if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    };

    let sc_info = vk::SwapchainCreateInfoKHR {
        surface,
        min_image_count: desc.image_count,
        image_format: desc.format.format,
        image_color_space: desc.format.color_space,
        image_extent: vk::Extent2D {
            width: desc.extent.width,
            height: desc.extent.height,
        },
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
        image_sharing_mode: vk::SharingMode::EXCLUSIVE,
        pre_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode: present_mode_to_vk(desc.present_mode),
        clipped: vk::TRUE,
        old_swapchain: old.unwrap_or_default(),
        ..Default::default()
    };

    let handle = unsafe { sc_loader.create_swapchain(&sc_info, None) }.gpu("create_swapchain")?;
    let images = match unsafe { sc_loader.get_swapchain_images(handle) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { sc_loader.destroy_swapchain(handle, None) };
            return Err(crate::error::map_vk("get_swapchain_images", e));
        }
    };

    let mut views = Vec::with_capacity(images.len());
    for &image in &images {
        let iv_info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: desc.format.format,
            subresource_range: color_range(),
            ..Default::default()
        };
        match unsafe { device.create_image_view(&iv_info, None) } {
            Ok(v) => views.push(v),
            Err(e) => {
                unsafe {
                    for v in views.drain(..) {
                        device.destroy_image_view(v, None);
                    }
                    sc_loader.destroy_swapchain(handle, None);
                }
                return Err(crate::error::map_vk("create_image_view", e));
            }
        }
    }

    Ok((handle, images, views))
}

pub(crate) fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> SurfaceFormat {
        SurfaceFormat { format, color_space }
    }

    #[test]
    fn test_format_preference() {
        let cs = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        let list = [
            sf(vk::Format::B8G8R8A8_UNORM, cs),
            sf(vk::Format::R8G8B8A8_SRGB, cs),
            sf(vk::Format::B8G8R8A8_SRGB, cs),
        ];
        assert_eq!(pick_surface_format(&list), Some(list[2]));
        assert_eq!(pick_surface_format(&list[..2]), Some(list[1]));
        assert_eq!(pick_surface_format(&list[..1]), Some(list[0]));

        let odd = [sf(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )];
        assert_eq!(pick_surface_format(&odd), Some(odd[0]));
        assert_eq!(pick_surface_format(&[]), None);
    }

    #[test]
    fn test_caps_extent_sentinel() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::SHARED_DEMAND_REFRESH];
        let c = caps_from_vk(&caps, &[], &modes);
        assert_eq!(c.current_extent, None);
        assert_eq!(c.present_modes, vec![PresentMode::Fifo]);

        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let c = caps_from_vk(&caps, &[], &modes);
        assert_eq!(c.current_extent, Some(RenderSize::new(800, 600)));
    }
}
