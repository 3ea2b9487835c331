//! Handle bookkeeping the classic API never asks the driver for.
//!
//! The layer records ownership and description facts at creation time so
//! later emulation paths (attachment signatures, framebuffer extents, device
//! resolution for a command buffer) can answer queries without driver
//! round-trips. Lookups are lenient: a miss yields a neutral default, not a
//! failure, matching how a layer must tolerate handles it never saw.

use ash::vk;
use dashmap::DashMap;
use vkshim_types::render::ImageInfo;

#[derive(Default)]
pub struct HandleRegistry {
    command_pool_device: DashMap<vk::CommandPool, vk::Device>,
    command_buffer_pool: DashMap<vk::CommandBuffer, vk::CommandPool>,
    image_view_image: DashMap<vk::ImageView, vk::Image>,
    image_info: DashMap<vk::Image, ImageInfo>,
    framebuffer_device: DashMap<vk::Framebuffer, vk::Device>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command_pool(&self, pool: vk::CommandPool, device: vk::Device) {
        self.command_pool_device.insert(pool, device);
    }

    pub fn unregister_command_pool(&self, pool: vk::CommandPool) {
        self.command_pool_device.remove(&pool);
        self.command_buffer_pool.retain(|_, p| *p != pool);
    }

    pub fn register_command_buffer(&self, buffer: vk::CommandBuffer, pool: vk::CommandPool) {
        self.command_buffer_pool.insert(buffer, pool);
    }

    pub fn unregister_command_buffer(&self, buffer: vk::CommandBuffer) {
        self.command_buffer_pool.remove(&buffer);
    }

    pub fn register_image(&self, image: vk::Image, info: ImageInfo) {
        self.image_info.insert(image, info);
    }

    pub fn unregister_image(&self, image: vk::Image) {
        self.image_info.remove(&image);
    }

    pub fn register_image_view(&self, view: vk::ImageView, image: vk::Image) {
        self.image_view_image.insert(view, image);
    }

    pub fn unregister_image_view(&self, view: vk::ImageView) {
        self.image_view_image.remove(&view);
    }

    pub fn register_framebuffer(&self, framebuffer: vk::Framebuffer, device: vk::Device) {
        self.framebuffer_device.insert(framebuffer, device);
    }

    pub fn unregister_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.framebuffer_device.remove(&framebuffer);
    }

    /// The device that owns a command buffer, walked through its pool.
    pub fn device_for_command_buffer(&self, buffer: vk::CommandBuffer) -> Option<vk::Device> {
        let pool = *self.command_buffer_pool.get(&buffer)?;
        self.command_pool_device.get(&pool).map(|d| *d)
    }

    pub fn device_for_framebuffer(&self, framebuffer: vk::Framebuffer) -> Option<vk::Device> {
        self.framebuffer_device.get(&framebuffer).map(|d| *d)
    }

    pub fn image_for_view(&self, view: vk::ImageView) -> Option<vk::Image> {
        self.image_view_image.get(&view).map(|i| *i)
    }

    /// The creation description of an image, or a default (undefined format,
    /// 1x1x1) description when the image was never registered.
    pub fn image_info(&self, image: vk::Image) -> ImageInfo {
        self.image_info
            .get(&image)
            .map(|i| i.clone())
            .unwrap_or_default()
    }

    /// Format of the image backing a view, `UNDEFINED` on any miss.
    pub fn format_for_view(&self, view: vk::ImageView) -> vk::Format {
        match self.image_for_view(view) {
            Some(image) => self.image_info(image).format,
            None => vk::Format::UNDEFINED,
        }
    }

    /// Extent and layer count of the image backing a view, zeros on a miss.
    /// 3D images report their depth as the layer count.
    pub fn view_extent(&self, view: vk::ImageView) -> (u32, u32, u32) {
        let Some(image) = self.image_for_view(view) else {
            return (0, 0, 0);
        };
        let Some(info) = self.image_info.get(&image) else {
            return (0, 0, 0);
        };
        let layers = if info.image_type == vk::ImageType::TYPE_3D {
            info.extent.depth
        } else {
            info.array_layers
        };
        (info.extent.width, info.extent.height, layers)
    }

    /// Drops every entry owned by `device`. Images and views are not
    /// device-scoped here and survive until their own destroy calls.
    pub fn cleanup_device(&self, device: vk::Device) {
        let pools: Vec<vk::CommandPool> = self
            .command_pool_device
            .iter()
            .filter(|entry| *entry.value() == device)
            .map(|entry| *entry.key())
            .collect();
        for pool in &pools {
            self.command_pool_device.remove(pool);
        }
        self.command_buffer_pool.retain(|_, p| !pools.contains(p));
        self.framebuffer_device.retain(|_, d| *d != device);
    }
}
