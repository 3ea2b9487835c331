//! Synchronization2 barriers lowered to classic pipeline barriers.
//!
//! Each non-empty barrier list in a dependency becomes one classic call.
//! Classic barriers carry one stage-mask pair per call rather than one per
//! barrier, so the first barrier's stage masks stand in for the whole list;
//! later barriers keep their access masks but lose their own stages.

use ash::vk;
use vkshim_types::barrier::{
    BufferMemoryBarrier, DependencyInfo, ImageMemoryBarrier, MemoryBarrier,
};

use crate::driver::DriverDispatch;

pub fn narrow_access_mask(mask: vk::AccessFlags2) -> vk::AccessFlags {
    vk::AccessFlags::from_raw(mask.as_raw() as u32)
}

pub fn narrow_stage_mask(mask: vk::PipelineStageFlags2) -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::from_raw(mask.as_raw() as u32)
}

pub fn lower_dependency(
    driver: &dyn DriverDispatch,
    device: vk::Device,
    command_buffer: vk::CommandBuffer,
    dep: &DependencyInfo,
) {
    if let Some(first) = dep.memory_barriers.first() {
        let barriers: Vec<MemoryBarrier> = dep
            .memory_barriers
            .iter()
            .map(|b| MemoryBarrier {
                src_access_mask: narrow_access_mask(b.src_access_mask),
                dst_access_mask: narrow_access_mask(b.dst_access_mask),
            })
            .collect();
        driver.cmd_pipeline_barrier(
            device,
            command_buffer,
            narrow_stage_mask(first.src_stage_mask),
            narrow_stage_mask(first.dst_stage_mask),
            dep.dependency_flags,
            &barriers,
            &[],
            &[],
        );
    }

    if let Some(first) = dep.buffer_memory_barriers.first() {
        let barriers: Vec<BufferMemoryBarrier> = dep
            .buffer_memory_barriers
            .iter()
            .map(|b| BufferMemoryBarrier {
                src_access_mask: narrow_access_mask(b.src_access_mask),
                dst_access_mask: narrow_access_mask(b.dst_access_mask),
                src_queue_family_index: b.src_queue_family_index,
                dst_queue_family_index: b.dst_queue_family_index,
                buffer: b.buffer,
                offset: b.offset,
                size: b.size,
            })
            .collect();
        driver.cmd_pipeline_barrier(
            device,
            command_buffer,
            narrow_stage_mask(first.src_stage_mask),
            narrow_stage_mask(first.dst_stage_mask),
            dep.dependency_flags,
            &[],
            &barriers,
            &[],
        );
    }

    if let Some(first) = dep.image_memory_barriers.first() {
        let barriers: Vec<ImageMemoryBarrier> = dep
            .image_memory_barriers
            .iter()
            .map(|b| ImageMemoryBarrier {
                src_access_mask: narrow_access_mask(b.src_access_mask),
                dst_access_mask: narrow_access_mask(b.dst_access_mask),
                old_layout: b.old_layout,
                new_layout: b.new_layout,
                src_queue_family_index: b.src_queue_family_index,
                dst_queue_family_index: b.dst_queue_family_index,
                image: b.image,
                subresource_range: b.subresource_range,
            })
            .collect();
        driver.cmd_pipeline_barrier(
            device,
            command_buffer,
            narrow_stage_mask(first.src_stage_mask),
            narrow_stage_mask(first.dst_stage_mask),
            dep.dependency_flags,
            &[],
            &[],
            &barriers,
        );
    }
}
