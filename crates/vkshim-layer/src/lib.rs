//! Compatibility layer emulating modern Vulkan features on drivers that
//! only speak classic render passes and binary semaphores.
//!
//! Dynamic rendering, timeline semaphores, imageless framebuffers, and
//! synchronization2 entry points are intercepted, translated to their
//! classic equivalents, and forwarded through a [`DriverDispatch`]
//! implementation. All state lives in an explicit [`CompatLayer`] context;
//! there are no globals, so independent instances coexist freely.

pub mod ash_driver;
pub mod barrier;
pub mod cache;
pub mod chain;
pub mod config;
pub mod driver;
pub mod error;
pub mod imageless;
pub mod pipeline;
pub mod registry;
pub mod rendering;
pub mod submit;
pub mod timeline;

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, warn};
use vkshim_types::barrier::DependencyInfo;
use vkshim_types::pipeline::GraphicsPipelineDescription;
use vkshim_types::render::{
    CommandBufferAllocateInfo, CommandPoolInfo, FramebufferDescription, FramebufferExtension,
    FramebufferInfo, ImageInfo, ImageViewInfo, RenderPassBeginExtension, RenderPassBeginInfo,
    RenderingInfo,
};
use vkshim_types::submit::{SubmitBatch, SubmitBatch2};
use vkshim_types::sync::{
    SemaphoreDescription, SemaphoreExtension, SemaphoreSignalInfo, SemaphoreWaitInfo,
};

pub use crate::ash_driver::AshDriver;
pub use crate::config::ShimConfig;
pub use crate::driver::DriverDispatch;
pub use crate::error::{ShimError, ShimResult};

use crate::cache::PassCache;
use crate::imageless::ImagelessFramebuffers;
use crate::registry::HandleRegistry;
use crate::rendering::RenderingTranslator;
use crate::submit::{BinarySemaphorePool, CompletionWatcher};
use crate::timeline::TimelineSemaphores;

/// The emulation context. One instance owns every cache, registry, and
/// worker the layer needs; dropping it shuts the completion watcher down.
pub struct CompatLayer {
    driver: Arc<dyn DriverDispatch>,
    config: ShimConfig,
    registry: HandleRegistry,
    cache: PassCache,
    timelines: TimelineSemaphores,
    imageless: ImagelessFramebuffers,
    rendering: RenderingTranslator,
    semaphore_pool: Arc<BinarySemaphorePool>,
    watcher: CompletionWatcher,
}

impl CompatLayer {
    pub fn new(driver: Arc<dyn DriverDispatch>, config: ShimConfig) -> Self {
        let semaphore_pool = Arc::new(BinarySemaphorePool::new(config.binary_semaphore_pool_cap));
        let watcher = CompletionWatcher::spawn(driver.clone(), semaphore_pool.clone());
        Self {
            driver,
            config,
            registry: HandleRegistry::new(),
            cache: PassCache::new(),
            timelines: TimelineSemaphores::new(),
            imageless: ImagelessFramebuffers::new(),
            rendering: RenderingTranslator::new(),
            semaphore_pool,
            watcher,
        }
    }

    /// Environment-driven constructor for production use: sets up logging
    /// and reads `VKSHIM_CONFIG`.
    pub fn with_default_config(driver: Arc<dyn DriverDispatch>) -> Self {
        vkshim_common::logging::init_logging();
        Self::new(driver, ShimConfig::load())
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn semaphore_pool(&self) -> &BinarySemaphorePool {
        &self.semaphore_pool
    }

    // ── Registry-tracked object lifecycle ────────────────────

    pub fn create_command_pool(
        &self,
        device: vk::Device,
        info: &CommandPoolInfo,
    ) -> ShimResult<vk::CommandPool> {
        let pool = self.driver.create_command_pool(device, info)?;
        self.registry.register_command_pool(pool, device);
        Ok(pool)
    }

    pub fn destroy_command_pool(&self, device: vk::Device, pool: vk::CommandPool) {
        self.registry.unregister_command_pool(pool);
        self.driver.destroy_command_pool(device, pool);
    }

    pub fn allocate_command_buffers(
        &self,
        device: vk::Device,
        info: &CommandBufferAllocateInfo,
    ) -> ShimResult<Vec<vk::CommandBuffer>> {
        let buffers = self.driver.allocate_command_buffers(device, info)?;
        for buffer in &buffers {
            self.registry.register_command_buffer(*buffer, info.command_pool);
        }
        Ok(buffers)
    }

    pub fn free_command_buffers(
        &self,
        device: vk::Device,
        pool: vk::CommandPool,
        buffers: &[vk::CommandBuffer],
    ) {
        for buffer in buffers {
            self.registry.unregister_command_buffer(*buffer);
            self.rendering.forget(*buffer);
        }
        self.driver.free_command_buffers(device, pool, buffers);
    }

    pub fn create_image(&self, device: vk::Device, info: &ImageInfo) -> ShimResult<vk::Image> {
        let image = self.driver.create_image(device, info)?;
        self.registry.register_image(image, *info);
        Ok(image)
    }

    pub fn destroy_image(&self, device: vk::Device, image: vk::Image) {
        self.registry.unregister_image(image);
        self.driver.destroy_image(device, image);
    }

    pub fn create_image_view(
        &self,
        device: vk::Device,
        info: &ImageViewInfo,
    ) -> ShimResult<vk::ImageView> {
        let view = self.driver.create_image_view(device, info)?;
        self.registry.register_image_view(view, info.image);
        Ok(view)
    }

    pub fn destroy_image_view(&self, device: vk::Device, view: vk::ImageView) {
        self.registry.unregister_image_view(view);
        self.driver.destroy_image_view(device, view);
    }

    // ── Semaphores ───────────────────────────────────────────

    /// Creates a semaphore. A `TIMELINE` type in the chain registers a
    /// host-side payload against the driver's binary semaphore handle.
    pub fn create_semaphore(
        &self,
        device: vk::Device,
        desc: &SemaphoreDescription,
    ) -> ShimResult<vk::Semaphore> {
        let mut chain = desc.chain.clone();
        let type_info = chain::extract_one(
            &mut chain,
            |m| match m {
                SemaphoreExtension::TypeInfo {
                    semaphore_type,
                    initial_value,
                } => Some((*semaphore_type, *initial_value)),
            },
            "semaphore type info",
        );

        let semaphore = self.driver.create_binary_semaphore(device)?;
        if let Some((vk::SemaphoreType::TIMELINE, initial_value)) = type_info {
            if self.config.emulate_timeline_semaphores {
                self.timelines.register(semaphore, initial_value);
            } else {
                warn!("timeline emulation disabled, created a plain binary semaphore");
            }
        }
        Ok(semaphore)
    }

    pub fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore) {
        self.timelines.unregister(semaphore);
        self.driver.destroy_semaphore(device, semaphore);
    }

    pub fn get_semaphore_counter_value(&self, semaphore: vk::Semaphore) -> ShimResult<u64> {
        self.timelines.query(semaphore)
    }

    /// Host wait. `timeout_ns` of `u64::MAX` waits forever.
    pub fn wait_semaphores(&self, info: &SemaphoreWaitInfo, timeout_ns: u64) -> ShimResult<()> {
        let timeout = if timeout_ns == u64::MAX {
            None
        } else {
            Some(Duration::from_nanos(timeout_ns))
        };
        self.timelines.wait(info, timeout)
    }

    pub fn signal_semaphore(&self, info: &SemaphoreSignalInfo) -> ShimResult<()> {
        self.timelines.signal(info)
    }

    // ── Queue submission ─────────────────────────────────────

    pub fn queue_submit(
        &self,
        queue: vk::Queue,
        batches: Vec<SubmitBatch>,
        fence: Option<vk::Fence>,
    ) -> ShimResult<()> {
        submit::rewrite_and_submit(
            self.driver.as_ref(),
            &self.registry,
            &self.timelines,
            &self.semaphore_pool,
            &self.watcher,
            queue,
            batches,
            fence,
        )
    }

    pub fn queue_submit2(
        &self,
        queue: vk::Queue,
        batches: Vec<SubmitBatch2>,
        fence: Option<vk::Fence>,
    ) -> ShimResult<()> {
        self.queue_submit(queue, submit::normalize_submit2(batches), fence)
    }

    // ── Dynamic rendering ────────────────────────────────────

    pub fn cmd_begin_rendering(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &RenderingInfo,
    ) -> ShimResult<()> {
        if !self.config.emulate_dynamic_rendering {
            return Err(ShimError::Initialization(
                "dynamic rendering emulation is disabled",
            ));
        }
        self.rendering
            .begin(self.driver.as_ref(), &self.registry, &self.cache, command_buffer, info)
    }

    pub fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer) -> ShimResult<()> {
        if !self.config.emulate_dynamic_rendering {
            return Err(ShimError::Initialization(
                "dynamic rendering emulation is disabled",
            ));
        }
        self.rendering
            .end(self.driver.as_ref(), &self.registry, command_buffer)
    }

    // ── Pipelines ────────────────────────────────────────────

    pub fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        descs: Vec<GraphicsPipelineDescription>,
    ) -> ShimResult<Vec<vk::Pipeline>> {
        pipeline::adapt_and_create(self.driver.as_ref(), &self.cache, device, descs)
    }

    // ── Framebuffers ─────────────────────────────────────────

    pub fn create_framebuffer(
        &self,
        device: vk::Device,
        desc: &FramebufferDescription,
    ) -> ShimResult<vk::Framebuffer> {
        let mut chain = desc.chain.clone();
        let attachment_images = chain::extract_one(
            &mut chain,
            |m| match m {
                FramebufferExtension::AttachmentImages(images) => Some(images.clone()),
            },
            "framebuffer attachment images",
        );

        let imageless = desc.flags.contains(vk::FramebufferCreateFlags::IMAGELESS);
        if imageless && !self.config.emulate_imageless_framebuffers {
            // The dispatch surface carries no imageless description, so a
            // pass-through would hand the driver an empty attachment list.
            return Err(ShimError::Initialization(
                "imageless framebuffer emulation is disabled",
            ));
        }
        let framebuffer = if imageless {
            self.imageless.create(
                desc,
                &attachment_images.unwrap_or_default(),
                self.config.fallback_color_format(),
                self.config.fallback_depth_format(),
            )
        } else {
            self.driver.create_framebuffer(
                device,
                &FramebufferInfo {
                    render_pass: desc.render_pass,
                    attachments: desc.attachments.clone(),
                    width: desc.width,
                    height: desc.height,
                    layers: desc.layers,
                },
            )?
        };
        self.registry.register_framebuffer(framebuffer, device);
        Ok(framebuffer)
    }

    pub fn destroy_framebuffer(&self, device: vk::Device, framebuffer: vk::Framebuffer) {
        self.registry.unregister_framebuffer(framebuffer);
        if !self.imageless.destroy(self.driver.as_ref(), device, framebuffer) {
            self.driver.destroy_framebuffer(device, framebuffer);
        }
    }

    // ── Classic render pass begin, with imageless routing ────

    pub fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin: &RenderPassBeginInfo,
        contents: vk::SubpassContents,
    ) -> ShimResult<()> {
        let device = self
            .registry
            .device_for_command_buffer(command_buffer)
            .ok_or(ShimError::Initialization(
                "render pass begin on a command buffer with no known device",
            ))?;

        if !self.imageless.contains(begin.framebuffer) {
            self.driver
                .cmd_begin_render_pass(device, command_buffer, begin, contents);
            return Ok(());
        }

        let mut chain = begin.chain.clone();
        let views = chain::extract_one(
            &mut chain,
            |m| match m {
                RenderPassBeginExtension::AttachmentViews(views) => Some(views.clone()),
            },
            "render pass attachment views",
        )
        .ok_or(ShimError::Validation(
            "imageless framebuffer begun without attachment views",
        ))?;
        let real =
            self.imageless
                .bind(self.driver.as_ref(), device, begin.framebuffer, &views)?;
        debug!(?begin.framebuffer, ?real, "bound imageless framebuffer");
        let forwarded = RenderPassBeginInfo {
            render_pass: begin.render_pass,
            framebuffer: real,
            render_area: begin.render_area,
            clear_values: begin.clear_values.clone(),
            chain,
        };
        self.driver
            .cmd_begin_render_pass(device, command_buffer, &forwarded, contents);
        Ok(())
    }

    pub fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) -> ShimResult<()> {
        let device = self
            .registry
            .device_for_command_buffer(command_buffer)
            .ok_or(ShimError::Initialization(
                "render pass end on a command buffer with no known device",
            ))?;
        self.driver.cmd_end_render_pass(device, command_buffer);
        Ok(())
    }

    // ── Synchronization2 ─────────────────────────────────────

    pub fn cmd_pipeline_barrier2(
        &self,
        command_buffer: vk::CommandBuffer,
        dep: &DependencyInfo,
    ) -> ShimResult<()> {
        let device = self
            .registry
            .device_for_command_buffer(command_buffer)
            .ok_or(ShimError::Initialization(
                "barrier on a command buffer with no known device",
            ))?;
        barrier::lower_dependency(self.driver.as_ref(), device, command_buffer, dep);
        Ok(())
    }

    // ── Device teardown ──────────────────────────────────────

    /// Destroys everything the layer created on behalf of `device`, then
    /// hands the device itself to the driver.
    pub fn destroy_device(&self, device: vk::Device) {
        self.cache.cleanup_device(self.driver.as_ref(), device);
        self.imageless
            .cleanup_device(self.driver.as_ref(), device, |framebuffer| {
                self.registry.device_for_framebuffer(framebuffer) == Some(device)
            });
        self.semaphore_pool.cleanup_device(self.driver.as_ref(), device);
        self.registry.cleanup_device(device);
        self.driver.destroy_device(device);
    }
}
