//! [`DriverDispatch`] backed by real `ash` device function tables.
//!
//! Owned descriptions are rebuilt into borrowing `ash::vk` create infos in
//! phases: owned arrays (entry-point strings, attachment references, blend
//! states) are materialized first, then the create infos that point into
//! them, so every pointer the driver sees stays alive across the call.

use std::ffi::CString;

use ash::vk;
use dashmap::DashMap;
use tracing::warn;
use vkshim_types::barrier::{BufferMemoryBarrier, ImageMemoryBarrier, MemoryBarrier};
use vkshim_types::pipeline::GraphicsPipelineDescription;
use vkshim_types::render::{
    CommandBufferAllocateInfo, CommandPoolInfo, FramebufferInfo, ImageInfo, ImageViewInfo,
    RenderPassBeginInfo, RenderPassDescription,
};
use vkshim_types::submit::{SubmitBatch, SubmitExtension};

use crate::driver::DriverDispatch;

/// Routes dispatch through per-device `ash::Device` tables. Devices and
/// their queues are registered as the application obtains them.
#[derive(Default)]
pub struct AshDriver {
    devices: DashMap<vk::Device, ash::Device>,
    queue_owner: DashMap<vk::Queue, vk::Device>,
}

impl AshDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_device(&self, handle: vk::Device, device: ash::Device) {
        self.devices.insert(handle, device);
    }

    /// Records which device a queue came from, so submissions can be routed
    /// without a device parameter.
    pub fn register_queue(&self, queue: vk::Queue, device: vk::Device) {
        self.queue_owner.insert(queue, device);
    }

    fn device(
        &self,
        handle: vk::Device,
    ) -> Result<dashmap::mapref::one::Ref<'_, vk::Device, ash::Device>, vk::Result> {
        self.devices.get(&handle).ok_or(vk::Result::ERROR_DEVICE_LOST)
    }

    fn device_for_queue(&self, queue: vk::Queue) -> Result<vk::Device, vk::Result> {
        if let Some(owner) = self.queue_owner.get(&queue) {
            return Ok(*owner);
        }
        // A single registered device is unambiguous even without a queue
        // registration.
        let mut iter = self.devices.iter();
        match (iter.next(), iter.next()) {
            (Some(only), None) => Ok(*only.key()),
            _ => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }
}

impl DriverDispatch for AshDriver {
    fn create_command_pool(
        &self,
        device: vk::Device,
        info: &CommandPoolInfo,
    ) -> Result<vk::CommandPool, vk::Result> {
        let device = self.device(device)?;
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(info.flags)
            .queue_family_index(info.queue_family_index);
        unsafe { device.create_command_pool(&create_info, None) }
    }

    fn destroy_command_pool(&self, device: vk::Device, pool: vk::CommandPool) {
        if let Ok(device) = self.device(device) {
            unsafe { device.destroy_command_pool(pool, None) };
        }
    }

    fn allocate_command_buffers(
        &self,
        device: vk::Device,
        info: &CommandBufferAllocateInfo,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        let device = self.device(device)?;
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(info.command_pool)
            .level(info.level)
            .command_buffer_count(info.count);
        unsafe { device.allocate_command_buffers(&allocate_info) }
    }

    fn free_command_buffers(
        &self,
        device: vk::Device,
        pool: vk::CommandPool,
        buffers: &[vk::CommandBuffer],
    ) {
        if let Ok(device) = self.device(device) {
            unsafe { device.free_command_buffers(pool, buffers) };
        }
    }

    fn create_image(&self, device: vk::Device, info: &ImageInfo) -> Result<vk::Image, vk::Result> {
        let device = self.device(device)?;
        let create_info = vk::ImageCreateInfo::default()
            .image_type(info.image_type)
            .format(info.format)
            .extent(info.extent)
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(info.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        unsafe { device.create_image(&create_info, None) }
    }

    fn destroy_image(&self, device: vk::Device, image: vk::Image) {
        if let Ok(device) = self.device(device) {
            unsafe { device.destroy_image(image, None) };
        }
    }

    fn create_image_view(
        &self,
        device: vk::Device,
        info: &ImageViewInfo,
    ) -> Result<vk::ImageView, vk::Result> {
        let device = self.device(device)?;
        let create_info = vk::ImageViewCreateInfo::default()
            .image(info.image)
            .view_type(info.view_type)
            .format(info.format)
            .subresource_range(info.subresource_range);
        unsafe { device.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&self, device: vk::Device, view: vk::ImageView) {
        if let Ok(device) = self.device(device) {
            unsafe { device.destroy_image_view(view, None) };
        }
    }

    fn create_render_pass(
        &self,
        device: vk::Device,
        desc: &RenderPassDescription,
    ) -> Result<vk::RenderPass, vk::Result> {
        let device = self.device(device)?;

        let attachments: Vec<vk::AttachmentDescription> = desc
            .attachments
            .iter()
            .map(|a| vk::AttachmentDescription {
                flags: vk::AttachmentDescriptionFlags::empty(),
                format: a.format,
                samples: a.samples,
                load_op: a.load_op,
                store_op: a.store_op,
                stencil_load_op: a.stencil_load_op,
                stencil_store_op: a.stencil_store_op,
                initial_layout: a.initial_layout,
                final_layout: a.final_layout,
            })
            .collect();

        let color_refs: Vec<Vec<vk::AttachmentReference>> = desc
            .subpasses
            .iter()
            .map(|s| {
                s.color_attachments
                    .iter()
                    .map(|r| vk::AttachmentReference {
                        attachment: r.attachment,
                        layout: r.layout,
                    })
                    .collect()
            })
            .collect();
        let depth_refs: Vec<Option<vk::AttachmentReference>> = desc
            .subpasses
            .iter()
            .map(|s| {
                s.depth_stencil_attachment.map(|r| vk::AttachmentReference {
                    attachment: r.attachment,
                    layout: r.layout,
                })
            })
            .collect();
        let subpasses: Vec<vk::SubpassDescription> = desc
            .subpasses
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let mut subpass = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs[i]);
                if let Some(depth) = &depth_refs[i] {
                    subpass = subpass.depth_stencil_attachment(depth);
                }
                subpass
            })
            .collect();

        let dependencies: Vec<vk::SubpassDependency> = desc
            .dependencies
            .iter()
            .map(|d| vk::SubpassDependency {
                src_subpass: d.src_subpass,
                dst_subpass: d.dst_subpass,
                src_stage_mask: d.src_stage_mask,
                dst_stage_mask: d.dst_stage_mask,
                src_access_mask: d.src_access_mask,
                dst_access_mask: d.dst_access_mask,
                dependency_flags: vk::DependencyFlags::empty(),
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { device.create_render_pass(&create_info, None) }
    }

    fn destroy_render_pass(&self, device: vk::Device, render_pass: vk::RenderPass) {
        if let Ok(device) = self.device(device) {
            unsafe { device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(
        &self,
        device: vk::Device,
        info: &FramebufferInfo,
    ) -> Result<vk::Framebuffer, vk::Result> {
        let device = self.device(device)?;
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(info.render_pass)
            .attachments(&info.attachments)
            .width(info.width)
            .height(info.height)
            .layers(info.layers);
        unsafe { device.create_framebuffer(&create_info, None) }
    }

    fn destroy_framebuffer(&self, device: vk::Device, framebuffer: vk::Framebuffer) {
        if let Ok(device) = self.device(device) {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_binary_semaphore(&self, device: vk::Device) -> Result<vk::Semaphore, vk::Result> {
        let device = self.device(device)?;
        unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
    }

    fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore) {
        if let Ok(device) = self.device(device) {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&self, device: vk::Device) -> Result<vk::Fence, vk::Result> {
        let device = self.device(device)?;
        unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
    }

    fn wait_for_fences(
        &self,
        device: vk::Device,
        fences: &[vk::Fence],
        timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        let device = self.device(device)?;
        unsafe { device.wait_for_fences(fences, true, timeout_ns) }
    }

    fn destroy_fence(&self, device: vk::Device, fence: vk::Fence) {
        if let Ok(device) = self.device(device) {
            unsafe { device.destroy_fence(fence, None) };
        }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        batches: &[SubmitBatch],
        fence: Option<vk::Fence>,
    ) -> Result<(), vk::Result> {
        let owner = self.device_for_queue(queue)?;
        let device = self.device(owner)?;

        let mut protected_infos: Vec<Option<vk::ProtectedSubmitInfo>> = batches
            .iter()
            .map(|batch| {
                batch.chain.iter().find_map(|member| match member {
                    SubmitExtension::Protected { protected } => {
                        Some(vk::ProtectedSubmitInfo::default().protected_submit(*protected))
                    }
                    SubmitExtension::TimelineValues { .. } => {
                        warn!("timeline values reached the driver unconsumed");
                        None
                    }
                })
            })
            .collect();
        let submits: Vec<vk::SubmitInfo> = batches
            .iter()
            .zip(protected_infos.iter_mut())
            .map(|(batch, protected)| {
                let mut info = vk::SubmitInfo::default()
                    .wait_semaphores(&batch.wait_semaphores)
                    .wait_dst_stage_mask(&batch.wait_dst_stage_masks)
                    .command_buffers(&batch.command_buffers)
                    .signal_semaphores(&batch.signal_semaphores);
                if let Some(protected) = protected {
                    info = info.push_next(protected);
                }
                info
            })
            .collect();
        unsafe { device.queue_submit(queue, &submits, fence.unwrap_or_else(vk::Fence::null)) }
    }

    fn cmd_begin_render_pass(
        &self,
        device: vk::Device,
        command_buffer: vk::CommandBuffer,
        begin: &RenderPassBeginInfo,
        contents: vk::SubpassContents,
    ) {
        let Ok(device) = self.device(device) else {
            return;
        };
        if !begin.chain.is_empty() {
            warn!("render pass begin reached the driver with unconsumed chain members");
        }
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(begin.render_area)
            .clear_values(&begin.clear_values);
        unsafe { device.cmd_begin_render_pass(command_buffer, &begin_info, contents) };
    }

    fn cmd_end_render_pass(&self, device: vk::Device, command_buffer: vk::CommandBuffer) {
        if let Ok(device) = self.device(device) {
            unsafe { device.cmd_end_render_pass(command_buffer) };
        }
    }

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
    ) {
        let Ok(device) = self.device(device) else {
            return;
        };
        let memory: Vec<vk::MemoryBarrier> = memory_barriers
            .iter()
            .map(|b| {
                vk::MemoryBarrier::default()
                    .src_access_mask(b.src_access_mask)
                    .dst_access_mask(b.dst_access_mask)
            })
            .collect();
        let buffer: Vec<vk::BufferMemoryBarrier> = buffer_barriers
            .iter()
            .map(|b| {
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(b.src_access_mask)
                    .dst_access_mask(b.dst_access_mask)
                    .src_queue_family_index(b.src_queue_family_index)
                    .dst_queue_family_index(b.dst_queue_family_index)
                    .buffer(b.buffer)
                    .offset(b.offset)
                    .size(b.size)
            })
            .collect();
        let image: Vec<vk::ImageMemoryBarrier> = image_barriers
            .iter()
            .map(|b| {
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(b.src_access_mask)
                    .dst_access_mask(b.dst_access_mask)
                    .old_layout(b.old_layout)
                    .new_layout(b.new_layout)
                    .src_queue_family_index(b.src_queue_family_index)
                    .dst_queue_family_index(b.dst_queue_family_index)
                    .image(b.image)
                    .subresource_range(b.subresource_range)
            })
            .collect();
        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                src_stage_mask,
                dst_stage_mask,
                dependency_flags,
                &memory,
                &buffer,
                &image,
            )
        };
    }

    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        descs: &[GraphicsPipelineDescription],
    ) -> Result<Vec<vk::Pipeline>, vk::Result> {
        let device = self.device(device)?;

        // Phase 1: owned arrays every create info will point into.
        let entry_points: Vec<Vec<CString>> = descs
            .iter()
            .map(|desc| {
                desc.stages
                    .iter()
                    .map(|s| {
                        CString::new(s.entry_point.as_str()).unwrap_or_else(|_| c"main".to_owned())
                    })
                    .collect()
            })
            .collect();

        // Phase 2: per-pipeline state create infos.
        let stage_infos: Vec<Vec<vk::PipelineShaderStageCreateInfo>> = descs
            .iter()
            .zip(&entry_points)
            .map(|(desc, names)| {
                desc.stages
                    .iter()
                    .zip(names)
                    .map(|(stage, name)| {
                        vk::PipelineShaderStageCreateInfo::default()
                            .stage(stage.stage)
                            .module(stage.module)
                            .name(name)
                    })
                    .collect()
            })
            .collect();
        let vertex_inputs: Vec<vk::PipelineVertexInputStateCreateInfo> = descs
            .iter()
            .map(|desc| {
                vk::PipelineVertexInputStateCreateInfo::default()
                    .vertex_binding_descriptions(&desc.vertex_input_state.bindings)
                    .vertex_attribute_descriptions(&desc.vertex_input_state.attributes)
            })
            .collect();
        let input_assemblies: Vec<vk::PipelineInputAssemblyStateCreateInfo> = descs
            .iter()
            .map(|desc| {
                vk::PipelineInputAssemblyStateCreateInfo::default()
                    .topology(desc.input_assembly_state.topology)
                    .primitive_restart_enable(desc.input_assembly_state.primitive_restart_enable)
            })
            .collect();
        let viewport_states: Vec<vk::PipelineViewportStateCreateInfo> = descs
            .iter()
            .map(|desc| match &desc.viewport_state {
                Some(state) => vk::PipelineViewportStateCreateInfo::default()
                    .viewports(&state.viewports)
                    .scissors(&state.scissors),
                // Dynamic viewport/scissor still need nonzero counts.
                None => vk::PipelineViewportStateCreateInfo::default()
                    .viewport_count(1)
                    .scissor_count(1),
            })
            .collect();
        let rasterizations: Vec<vk::PipelineRasterizationStateCreateInfo> = descs
            .iter()
            .map(|desc| {
                let r = &desc.rasterization_state;
                vk::PipelineRasterizationStateCreateInfo::default()
                    .depth_clamp_enable(r.depth_clamp_enable)
                    .rasterizer_discard_enable(r.rasterizer_discard_enable)
                    .polygon_mode(r.polygon_mode)
                    .cull_mode(r.cull_mode)
                    .front_face(r.front_face)
                    .depth_bias_enable(r.depth_bias_enable)
                    .depth_bias_constant_factor(r.depth_bias_constant_factor)
                    .depth_bias_clamp(r.depth_bias_clamp)
                    .depth_bias_slope_factor(r.depth_bias_slope_factor)
                    .line_width(r.line_width)
            })
            .collect();
        let multisamples: Vec<vk::PipelineMultisampleStateCreateInfo> = descs
            .iter()
            .map(|desc| match &desc.multisample_state {
                Some(state) => vk::PipelineMultisampleStateCreateInfo::default()
                    .rasterization_samples(state.rasterization_samples)
                    .sample_shading_enable(state.sample_shading_enable)
                    .min_sample_shading(state.min_sample_shading)
                    .alpha_to_coverage_enable(state.alpha_to_coverage_enable)
                    .alpha_to_one_enable(state.alpha_to_one_enable),
                None => vk::PipelineMultisampleStateCreateInfo::default()
                    .rasterization_samples(vk::SampleCountFlags::TYPE_1),
            })
            .collect();
        let depth_stencils: Vec<Option<vk::PipelineDepthStencilStateCreateInfo>> = descs
            .iter()
            .map(|desc| {
                desc.depth_stencil_state.as_ref().map(|state| {
                    vk::PipelineDepthStencilStateCreateInfo::default()
                        .depth_test_enable(state.depth_test_enable)
                        .depth_write_enable(state.depth_write_enable)
                        .depth_compare_op(state.depth_compare_op)
                        .depth_bounds_test_enable(state.depth_bounds_test_enable)
                        .stencil_test_enable(state.stencil_test_enable)
                        .front(state.front)
                        .back(state.back)
                        .min_depth_bounds(state.min_depth_bounds)
                        .max_depth_bounds(state.max_depth_bounds)
                })
            })
            .collect();
        let color_blends: Vec<Option<vk::PipelineColorBlendStateCreateInfo>> = descs
            .iter()
            .map(|desc| {
                desc.color_blend_state.as_ref().map(|state| {
                    vk::PipelineColorBlendStateCreateInfo::default()
                        .logic_op_enable(state.logic_op_enable)
                        .logic_op(state.logic_op)
                        .attachments(&state.attachments)
                        .blend_constants(state.blend_constants)
                })
            })
            .collect();
        let dynamic_states: Vec<Option<vk::PipelineDynamicStateCreateInfo>> = descs
            .iter()
            .map(|desc| {
                desc.dynamic_state.as_ref().map(|state| {
                    vk::PipelineDynamicStateCreateInfo::default()
                        .dynamic_states(&state.dynamic_states)
                })
            })
            .collect();

        // Phase 3: the create infos themselves.
        let create_infos: Vec<vk::GraphicsPipelineCreateInfo> = descs
            .iter()
            .enumerate()
            .map(|(i, desc)| {
                let mut info = vk::GraphicsPipelineCreateInfo::default()
                    .flags(desc.flags)
                    .stages(&stage_infos[i])
                    .vertex_input_state(&vertex_inputs[i])
                    .input_assembly_state(&input_assemblies[i])
                    .viewport_state(&viewport_states[i])
                    .rasterization_state(&rasterizations[i])
                    .multisample_state(&multisamples[i])
                    .layout(desc.layout)
                    .render_pass(desc.render_pass)
                    .subpass(desc.subpass);
                if let Some(depth_stencil) = &depth_stencils[i] {
                    info = info.depth_stencil_state(depth_stencil);
                }
                if let Some(color_blend) = &color_blends[i] {
                    info = info.color_blend_state(color_blend);
                }
                if let Some(dynamic) = &dynamic_states[i] {
                    info = info.dynamic_state(dynamic);
                }
                info
            })
            .collect();

        unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &create_infos, None)
                .map_err(|(_, result)| result)
        }
    }

    fn destroy_device(&self, device: vk::Device) {
        self.queue_owner.retain(|_, owner| *owner != device);
        if let Some((_, device)) = self.devices.remove(&device) {
            unsafe { device.destroy_device(None) };
        }
    }
}
