// SPDX-License-Identifier: CEPL-1.0
//! Instance, debug messenger, physical device and queue selection.

#[cfg(debug_assertions)]
use std::ffi::CStr;
use std::ffi::CString;

use anyhow::{anyhow, bail, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, info};

#[cfg(debug_assertions)]
pub(crate) type DebugState = vk::DebugUtilsMessengerEXT;
#[cfg(not(debug_assertions))]
pub(crate) type DebugState = ();

/// Queue families and queues the frame core submits to.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Queues {
    pub graphics_family: u32,
    pub graphics: vk::Queue,
    pub transfer_family: u32,
    pub transfer: vk::Queue,
}

impl Queues {
    pub fn shares_family(&self) -> bool {
        self.graphics_family == self.transfer_family
    }
}

/// Family indices picked before the device exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FamilyPick {
    pub graphics: u32,
    pub transfer: u32,
    /// Second queue index inside the graphics family, when transfer shares it.
    pub transfer_index: u32,
}

pub(crate) unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
) -> Result<Instance> {
    let app = CString::new("Cubic").context("application name")?;

    let app_info = vk::ApplicationInfo {
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let ext_slice = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?;

    #[allow(unused_mut)]
    let mut ext_vec = ext_slice.to_vec();
    #[cfg(debug_assertions)]
    ext_vec.push(ext_debug::NAME.as_ptr());

    #[cfg(debug_assertions)]
    let layers = [CString::new("VK_LAYER_KHRONOS_validation").context("layer name")?];
    #[cfg(debug_assertions)]
    let layer_ptrs: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();
    #[cfg(not(debug_assertions))]
    let layer_ptrs: Vec<*const std::ffi::c_char> = Vec::new();

    let create_info = vk::InstanceCreateInfo {
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };

    unsafe { entry.create_instance(&create_info, None) }.context("create_instance")
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{msg}");
    } else {
        debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
pub(crate) unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<DebugState> {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .context("create_debug_utils_messenger")
}

#[cfg(not(debug_assertions))]
pub(crate) unsafe fn create_debug_messenger(
    _entry: &Entry,
    _instance: &Instance,
) -> Result<DebugState> {
    Ok(())
}

#[cfg(debug_assertions)]
pub(crate) unsafe fn destroy_debug_messenger(entry: &Entry, instance: &Instance, dbg: DebugState) {
    let loader = ext_debug::Instance::new(entry, instance);
    unsafe { loader.destroy_debug_utils_messenger(dbg, None) };
}

#[cfg(not(debug_assertions))]
pub(crate) unsafe fn destroy_debug_messenger(
    _entry: &Entry,
    _instance: &Instance,
    _dbg: DebugState,
) {
}

/// Chooses queue families from the raw family flags.
///
/// Graphics must also present (`presents[i]`). Transfer prefers a family
/// with TRANSFER but no GRAPHICS; otherwise it shares the graphics family,
/// on a second queue when the family has one.
pub(crate) fn pick_families(
    families: &[vk::QueueFamilyProperties],
    presents: &[bool],
) -> Option<FamilyPick> {
    let graphics = families.iter().enumerate().find_map(|(i, q)| {
        let presents = presents.get(i).copied().unwrap_or(false);
        (q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && presents).then_some(i as u32)
    })?;

    let dedicated = families.iter().enumerate().find_map(|(i, q)| {
        let flags = q.queue_flags;
        (flags.contains(vk::QueueFlags::TRANSFER) && !flags.contains(vk::QueueFlags::GRAPHICS))
            .then_some(i as u32)
    });

    Some(match dedicated {
        Some(transfer) => FamilyPick {
            graphics,
            transfer,
            transfer_index: 0,
        },
        None => FamilyPick {
            graphics,
            transfer: graphics,
            transfer_index: u32::from(families[graphics as usize].queue_count > 1),
        },
    })
}

pub(crate) unsafe fn pick_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, FamilyPick)> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.context("enumerate_physical_devices")?;
    for phys in devices {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let api = props.api_version;
        if vk::api_version_major(api) == 1 && vk::api_version_minor(api) < 3 {
            debug!("skipping device below Vulkan 1.3");
            continue;
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let presents: Vec<bool> = (0..families.len() as u32)
            .map(|i| {
                unsafe { surf_i.get_physical_device_surface_support(phys, i, surface) }
                    .unwrap_or(false)
            })
            .collect();

        if let Some(pick) = pick_families(&families, &presents) {
            let name = props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            info!(
                device = %name,
                graphics_family = pick.graphics,
                transfer_family = pick.transfer,
                "picked physical device"
            );
            return Ok((phys, pick));
        }
    }
    Err(anyhow!("no Vulkan 1.3 device with a presenting graphics queue"))
}

pub(crate) unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    pick: FamilyPick,
) -> Result<(ash::Device, Queues)> {
    let ext_props = unsafe { instance.enumerate_device_extension_properties(phys) }
        .context("enumerate_device_extension_properties")?;
    let has_swapchain = ext_props
        .iter()
        .any(|e| e.extension_name_as_c_str().map(|n| n == swapchain::NAME).unwrap_or(false));
    if !has_swapchain {
        bail!("device lacks VK_KHR_swapchain");
    }
    let device_exts = [swapchain::NAME.as_ptr()];

    // Must outlive create_device.
    let priorities = [1.0_f32, 1.0];
    let mut qinfos = vec![vk::DeviceQueueCreateInfo {
        queue_family_index: pick.graphics,
        queue_count: 1 + pick.transfer_index,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    }];
    if pick.transfer != pick.graphics {
        qinfos.push(vk::DeviceQueueCreateInfo {
            queue_family_index: pick.transfer,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        });
    }

    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        synchronization2: vk::TRUE,
        ..Default::default()
    };
    let feats2 = vk::PhysicalDeviceFeatures2 {
        p_next: (&mut feats13) as *mut _ as *mut _,
        ..Default::default()
    };

    let dinfo = vk::DeviceCreateInfo {
        p_next: (&feats2) as *const _ as *const _,
        queue_create_info_count: qinfos.len() as u32,
        p_queue_create_infos: qinfos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    let device = unsafe { instance.create_device(phys, &dinfo, None) }.context("create_device")?;
    let queues = unsafe {
        Queues {
            graphics_family: pick.graphics,
            graphics: device.get_device_queue(pick.graphics, 0),
            transfer_family: pick.transfer,
            transfer: device.get_device_queue(pick.transfer, pick.transfer_index),
        }
    };
    Ok((device, queues))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_dedicated_transfer_family() {
        let fams = [
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                16,
            ),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let pick = pick_families(&fams, &[true, false, false]).unwrap();
        assert_eq!(pick.graphics, 0);
        assert_eq!(pick.transfer, 1);
        assert_eq!(pick.transfer_index, 0);
    }

    #[test]
    fn test_shares_graphics_family() {
        let gfx = vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER;
        let pick = pick_families(&[family(gfx, 2)], &[true]).unwrap();
        assert_eq!((pick.transfer, pick.transfer_index), (0, 1));

        let pick = pick_families(&[family(gfx, 1)], &[true]).unwrap();
        assert_eq!((pick.transfer, pick.transfer_index), (0, 0));
    }

    #[test]
    fn test_needs_presenting_graphics() {
        let fams = [family(vk::QueueFlags::GRAPHICS, 1), family(vk::QueueFlags::TRANSFER, 1)];
        assert_eq!(pick_families(&fams, &[false, true]), None);
    }
}
