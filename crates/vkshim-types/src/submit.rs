//! Queue submission batches, legacy and `VkSubmitInfo2` shaped.

use ash::vk;

#[derive(Debug, Clone)]
pub enum SubmitExtension {
    /// Mirrors `VkTimelineSemaphoreSubmitInfo`: wait/signal values parallel
    /// to the batch's wait/signal semaphore lists.
    TimelineValues {
        wait_values: Vec<u64>,
        signal_values: Vec<u64>,
    },
    /// Mirrors `VkProtectedSubmitInfo`.
    Protected { protected: bool },
}

/// A legacy-shaped submission batch (`VkSubmitInfo`).
#[derive(Debug, Clone, Default)]
pub struct SubmitBatch {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_dst_stage_masks: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub chain: Vec<SubmitExtension>,
}

/// Mirrors `VkSemaphoreSubmitInfo`.
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreSubmit {
    pub semaphore: vk::Semaphore,
    /// Timeline payload; 0 for binary semaphores.
    pub value: u64,
    pub stage_mask: vk::PipelineStageFlags2,
    pub device_index: u32,
}

/// Mirrors `VkCommandBufferSubmitInfo`.
#[derive(Debug, Clone, Copy)]
pub struct CommandBufferSubmit {
    pub command_buffer: vk::CommandBuffer,
    pub device_mask: u32,
}

/// The newer submission shape (`VkSubmitInfo2`), normalized into
/// [`SubmitBatch`] before rewriting.
#[derive(Debug, Clone, Default)]
pub struct SubmitBatch2 {
    pub flags: vk::SubmitFlags,
    pub wait_semaphores: Vec<SemaphoreSubmit>,
    pub command_buffers: Vec<CommandBufferSubmit>,
    pub signal_semaphores: Vec<SemaphoreSubmit>,
}
