//! The narrow interface the emulation layer needs from the real driver.
//!
//! Everything the layer synthesizes (classic render passes, bound
//! framebuffers, pooled binary semaphores, completion fences) and everything
//! it forwards (submissions, command recording) goes through this trait, so
//! tests can substitute a recording mock and production wires up [`crate::AshDriver`].

use ash::vk;
use vkshim_types::barrier::{BufferMemoryBarrier, ImageMemoryBarrier, MemoryBarrier};
use vkshim_types::pipeline::GraphicsPipelineDescription;
use vkshim_types::render::{
    CommandBufferAllocateInfo, CommandPoolInfo, FramebufferInfo, ImageInfo, ImageViewInfo,
    RenderPassBeginInfo, RenderPassDescription,
};
use vkshim_types::submit::SubmitBatch;

pub trait DriverDispatch: Send + Sync {
    // Registry-tracked objects, created by the driver and bookkept by the
    // layer.
    fn create_command_pool(
        &self,
        device: vk::Device,
        info: &CommandPoolInfo,
    ) -> Result<vk::CommandPool, vk::Result>;
    fn destroy_command_pool(&self, device: vk::Device, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        device: vk::Device,
        info: &CommandBufferAllocateInfo,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result>;
    fn free_command_buffers(
        &self,
        device: vk::Device,
        pool: vk::CommandPool,
        buffers: &[vk::CommandBuffer],
    );
    fn create_image(&self, device: vk::Device, info: &ImageInfo) -> Result<vk::Image, vk::Result>;
    fn destroy_image(&self, device: vk::Device, image: vk::Image);
    fn create_image_view(
        &self,
        device: vk::Device,
        info: &ImageViewInfo,
    ) -> Result<vk::ImageView, vk::Result>;
    fn destroy_image_view(&self, device: vk::Device, view: vk::ImageView);

    // Objects the layer synthesizes on the application's behalf.
    fn create_render_pass(
        &self,
        device: vk::Device,
        desc: &RenderPassDescription,
    ) -> Result<vk::RenderPass, vk::Result>;
    fn destroy_render_pass(&self, device: vk::Device, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        device: vk::Device,
        info: &FramebufferInfo,
    ) -> Result<vk::Framebuffer, vk::Result>;
    fn destroy_framebuffer(&self, device: vk::Device, framebuffer: vk::Framebuffer);
    fn create_binary_semaphore(&self, device: vk::Device) -> Result<vk::Semaphore, vk::Result>;
    fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore);
    fn create_fence(&self, device: vk::Device) -> Result<vk::Fence, vk::Result>;
    fn wait_for_fences(
        &self,
        device: vk::Device,
        fences: &[vk::Fence],
        timeout_ns: u64,
    ) -> Result<(), vk::Result>;
    fn destroy_fence(&self, device: vk::Device, fence: vk::Fence);

    // Queue and command stream. Batches arrive with their extension chains
    // already consumed by the rewriter.
    fn queue_submit(
        &self,
        queue: vk::Queue,
        batches: &[SubmitBatch],
        fence: Option<vk::Fence>,
    ) -> Result<(), vk::Result>;
    fn cmd_begin_render_pass(
        &self,
        device: vk::Device,
        command_buffer: vk::CommandBuffer,
        begin: &RenderPassBeginInfo,
        contents: vk::SubpassContents,
    );
    fn cmd_end_render_pass(&self, device: vk::Device, command_buffer: vk::CommandBuffer);
    #[allow(clippy::too_many_arguments)]
    fn cmd_pipeline_barrier(
        &self,
        device: vk::Device,
        command_buffer: vk::CommandBuffer,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        dependency_flags: vk::DependencyFlags,
        memory_barriers: &[MemoryBarrier],
        buffer_barriers: &[BufferMemoryBarrier],
        image_barriers: &[ImageMemoryBarrier],
    );
    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        descs: &[GraphicsPipelineDescription],
    ) -> Result<Vec<vk::Pipeline>, vk::Result>;
    fn destroy_device(&self, device: vk::Device);
}
