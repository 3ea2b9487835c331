#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use vkshim_layer::driver::DriverDispatch;
use vkshim_types::barrier::{BufferMemoryBarrier, ImageMemoryBarrier, MemoryBarrier};
use vkshim_types::pipeline::GraphicsPipelineDescription;
use vkshim_types::render::{
    CommandBufferAllocateInfo, CommandPoolInfo, FramebufferInfo, ImageInfo, ImageViewInfo,
    RenderPassBeginInfo, RenderPassDescription,
};
use vkshim_types::submit::SubmitBatch;

pub fn device() -> vk::Device {
    vk::Device::from_raw(0xD0)
}

pub fn queue() -> vk::Queue {
    vk::Queue::from_raw(0xC0)
}

#[derive(Clone)]
pub struct RecordedSubmit {
    pub queue: vk::Queue,
    pub batches: Vec<SubmitBatch>,
    pub fence: Option<vk::Fence>,
}

#[derive(Clone, Copy)]
pub struct RecordedBegin {
    pub command_buffer: vk::CommandBuffer,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    pub clear_value_count: usize,
    pub contents: vk::SubpassContents,
}

#[derive(Clone, Copy)]
pub struct RecordedBarrier {
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub memory_count: usize,
    pub buffer_count: usize,
    pub image_count: usize,
}

/// Records every dispatch call and mints sequential handles, standing in
/// for a classic driver with no modern features.
#[derive(Default)]
pub struct MockDriver {
    next_handle: AtomicU64,
    pub fail_fence_creation: AtomicBool,
    pub created_render_passes: Mutex<Vec<(vk::RenderPass, RenderPassDescription)>>,
    pub destroyed_render_passes: Mutex<Vec<vk::RenderPass>>,
    pub created_framebuffers: Mutex<Vec<(vk::Framebuffer, FramebufferInfo)>>,
    pub destroyed_framebuffers: Mutex<Vec<vk::Framebuffer>>,
    pub created_semaphores: Mutex<Vec<vk::Semaphore>>,
    pub destroyed_semaphores: Mutex<Vec<vk::Semaphore>>,
    pub created_fences: Mutex<Vec<vk::Fence>>,
    pub destroyed_fences: Mutex<Vec<vk::Fence>>,
    pub fence_waits: Mutex<Vec<vk::Fence>>,
    pub submits: Mutex<Vec<RecordedSubmit>>,
    pub begun_passes: Mutex<Vec<RecordedBegin>>,
    pub ended_passes: Mutex<Vec<vk::CommandBuffer>>,
    pub barriers: Mutex<Vec<RecordedBarrier>>,
    pub pipeline_descs: Mutex<Vec<GraphicsPipelineDescription>>,
    pub destroyed_devices: Mutex<Vec<vk::Device>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            ..Self::default()
        }
    }

    fn next_raw(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().len()
    }

    pub fn render_pass_count(&self) -> usize {
        self.created_render_passes.lock().len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.created_framebuffers.lock().len()
    }
}

/// A layer over a fresh mock, with default configuration.
pub fn mock_layer() -> (std::sync::Arc<MockDriver>, vkshim_layer::CompatLayer) {
    let driver = std::sync::Arc::new(MockDriver::new());
    let layer = vkshim_layer::CompatLayer::new(driver.clone(), vkshim_layer::ShimConfig::default());
    (driver, layer)
}

/// Allocates one command buffer so device resolution works.
pub fn one_command_buffer(layer: &vkshim_layer::CompatLayer) -> vk::CommandBuffer {
    let pool = layer
        .create_command_pool(
            device(),
            &CommandPoolInfo {
                flags: vk::CommandPoolCreateFlags::empty(),
                queue_family_index: 0,
            },
        )
        .expect("mock command pool");
    let buffers = layer
        .allocate_command_buffers(
            device(),
            &CommandBufferAllocateInfo {
                command_pool: pool,
                level: vk::CommandBufferLevel::PRIMARY,
                count: 1,
            },
        )
        .expect("mock command buffers");
    buffers[0]
}

/// Creates an image of the given format and extent plus a view of it, so
/// the registry can answer format and extent queries.
pub fn image_view(
    layer: &vkshim_layer::CompatLayer,
    format: vk::Format,
    width: u32,
    height: u32,
) -> vk::ImageView {
    let image = layer
        .create_image(
            device(),
            &ImageInfo {
                format,
                extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                ..ImageInfo::default()
            },
        )
        .expect("mock image");
    layer
        .create_image_view(
            device(),
            &ImageViewInfo {
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
            },
        )
        .expect("mock image view")
}

impl DriverDispatch for MockDriver {
    fn create_command_pool(
        &self,
        _device: vk::Device,
        _info: &CommandPoolInfo,
    ) -> Result<vk::CommandPool, vk::Result> {
        Ok(vk::CommandPool::from_raw(self.next_raw()))
    }

    fn destroy_command_pool(&self, _device: vk::Device, _pool: vk::CommandPool) {}

    fn allocate_command_buffers(
        &self,
        _device: vk::Device,
        info: &CommandBufferAllocateInfo,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        Ok((0..info.count)
            .map(|_| vk::CommandBuffer::from_raw(self.next_raw()))
            .collect())
    }

    fn free_command_buffers(
        &self,
        _device: vk::Device,
        _pool: vk::CommandPool,
        _buffers: &[vk::CommandBuffer],
    ) {
    }

    fn create_image(&self, _device: vk::Device, _info: &ImageInfo) -> Result<vk::Image, vk::Result> {
        Ok(vk::Image::from_raw(self.next_raw()))
    }

    fn destroy_image(&self, _device: vk::Device, _image: vk::Image) {}

    fn create_image_view(
        &self,
        _device: vk::Device,
        _info: &ImageViewInfo,
    ) -> Result<vk::ImageView, vk::Result> {
        Ok(vk::ImageView::from_raw(self.next_raw()))
    }

    fn destroy_image_view(&self, _device: vk::Device, _view: vk::ImageView) {}

    fn create_render_pass(
        &self,
        _device: vk::Device,
        desc: &RenderPassDescription,
    ) -> Result<vk::RenderPass, vk::Result> {
        let pass = vk::RenderPass::from_raw(self.next_raw());
        self.created_render_passes.lock().push((pass, desc.clone()));
        Ok(pass)
    }

    fn destroy_render_pass(&self, _device: vk::Device, render_pass: vk::RenderPass) {
        self.destroyed_render_passes.lock().push(render_pass);
    }

    fn create_framebuffer(
        &self,
        _device: vk::Device,
        info: &FramebufferInfo,
    ) -> Result<vk::Framebuffer, vk::Result> {
        let framebuffer = vk::Framebuffer::from_raw(self.next_raw());
        self.created_framebuffers.lock().push((framebuffer, info.clone()));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, _device: vk::Device, framebuffer: vk::Framebuffer) {
        self.destroyed_framebuffers.lock().push(framebuffer);
    }

    fn create_binary_semaphore(&self, _device: vk::Device) -> Result<vk::Semaphore, vk::Result> {
        let semaphore = vk::Semaphore::from_raw(self.next_raw());
        self.created_semaphores.lock().push(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, _device: vk::Device, semaphore: vk::Semaphore) {
        self.destroyed_semaphores.lock().push(semaphore);
    }

    fn create_fence(&self, _device: vk::Device) -> Result<vk::Fence, vk::Result> {
        if self.fail_fence_creation.load(Ordering::Relaxed) {
            return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
        let fence = vk::Fence::from_raw(self.next_raw());
        self.created_fences.lock().push(fence);
        Ok(fence)
    }

    fn wait_for_fences(
        &self,
        _device: vk::Device,
        fences: &[vk::Fence],
        _timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        self.fence_waits.lock().extend_from_slice(fences);
        Ok(())
    }

    fn destroy_fence(&self, _device: vk::Device, fence: vk::Fence) {
        self.destroyed_fences.lock().push(fence);
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        batches: &[SubmitBatch],
        fence: Option<vk::Fence>,
    ) -> Result<(), vk::Result> {
        self.submits.lock().push(RecordedSubmit {
            queue,
            batches: batches.to_vec(),
            fence,
        });
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _device: vk::Device,
        command_buffer: vk::CommandBuffer,
        begin: &RenderPassBeginInfo,
        contents: vk::SubpassContents,
    ) {
        self.begun_passes.lock().push(RecordedBegin {
            command_buffer,
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            render_area: begin.render_area,
            clear_value_count: begin.clear_values.len(),
            contents,
        });
    }

    fn cmd_end_render_pass(&self, _device: vk::Device, command_buffer: vk::CommandBuffer) {
        self.ended_passes.lock().push(command_buffer);
    }

    fn cmd_pipeline_barrier(
        &self,
        _device: vk::Device,
        _command_buffer: vk::CommandBuffer,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        _dependency_flags: vk::DependencyFlags,
        memory_barriers: &[MemoryBarrier],
        buffer_barriers: &[BufferMemoryBarrier],
        image_barriers: &[ImageMemoryBarrier],
    ) {
        self.barriers.lock().push(RecordedBarrier {
            src_stage_mask,
            dst_stage_mask,
            memory_count: memory_barriers.len(),
            buffer_count: buffer_barriers.len(),
            image_count: image_barriers.len(),
        });
    }

    fn create_graphics_pipelines(
        &self,
        _device: vk::Device,
        descs: &[GraphicsPipelineDescription],
    ) -> Result<Vec<vk::Pipeline>, vk::Result> {
        self.pipeline_descs.lock().extend(descs.iter().cloned());
        Ok(descs
            .iter()
            .map(|_| vk::Pipeline::from_raw(self.next_raw()))
            .collect())
    }

    fn destroy_device(&self, device: vk::Device) {
        self.destroyed_devices.lock().push(device);
    }
}
