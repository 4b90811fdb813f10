// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use cubic_render::{GpuError, GpuResult, PipelineStages};

/// Maps a raw `VkResult` onto the backend-neutral error.
pub fn map_vk(op: &'static str, r: vk::Result) -> GpuError {
    match r {
        vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GpuError::OutOfMemory(op)
        }
        vk::Result::ERROR_SURFACE_LOST_KHR => GpuError::SurfaceLost,
        vk::Result::TIMEOUT => GpuError::Timeout,
        other => GpuError::Backend {
            op,
            code: format!("{other:?}"),
        },
    }
}

pub trait VkResultExt<T> {
    fn gpu(self, op: &'static str) -> GpuResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[inline]
    fn gpu(self, op: &'static str) -> GpuResult<T> {
        self.map_err(|r| map_vk(op, r))
    }
}

pub fn stages_to_vk(stages: PipelineStages) -> vk::PipelineStageFlags {
    let table = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (
            PipelineStages::COMPUTE_SHADER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        (PipelineStages::ALL_GRAPHICS, vk::PipelineStageFlags::ALL_GRAPHICS),
        (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (
            PipelineStages::BOTTOM_OF_PIPE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        (PipelineStages::ALL_COMMANDS, vk::PipelineStageFlags::ALL_COMMANDS),
    ];
    table
        .into_iter()
        .filter(|(ours, _)| stages.contains(*ours))
        .fold(vk::PipelineStageFlags::empty(), |acc, (_, theirs)| acc | theirs)
}
