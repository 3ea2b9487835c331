//! Imageless framebuffer emulation.
//!
//! An imageless creation returns a synthetic handle minted from a counter
//! biased far above anything the driver allocates; the descriptor is stored
//! and no driver object exists yet. The real framebuffer is built lazily
//! when a render pass begins with the concrete attachment views, and rebuilt
//! whenever a later begin supplies different ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk::{self, Handle};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use vkshim_types::render::{FramebufferAttachmentImage, FramebufferDescription, FramebufferInfo};

use crate::driver::DriverDispatch;
use crate::error::{ShimError, ShimResult};

const SYNTHETIC_HANDLE_BASE: u64 = 1 << 63;

/// Resolved per-attachment description, with fallback formats already
/// applied to empty view-format lists.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentImage {
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
}

struct ImagelessEntry {
    render_pass: vk::RenderPass,
    width: u32,
    height: u32,
    layers: u32,
    attachment_images: Vec<AttachmentImage>,
    real: Option<vk::Framebuffer>,
    bound_views: Vec<vk::ImageView>,
}

#[derive(Default)]
pub struct ImagelessFramebuffers {
    entries: DashMap<vk::Framebuffer, Arc<Mutex<ImagelessEntry>>>,
    next_handle: AtomicU64,
}

impl ImagelessFramebuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the descriptor and mints a synthetic handle; no driver call.
    pub fn create(
        &self,
        desc: &FramebufferDescription,
        attachment_images: &[FramebufferAttachmentImage],
        fallback_color: vk::Format,
        fallback_depth: vk::Format,
    ) -> vk::Framebuffer {
        let resolved = attachment_images
            .iter()
            .map(|image| {
                let format = match image.view_formats.first() {
                    Some(format) if *format != vk::Format::UNDEFINED => *format,
                    _ => {
                        if image.usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
                            fallback_depth
                        } else {
                            fallback_color
                        }
                    }
                };
                AttachmentImage {
                    format,
                    usage: image.usage,
                    width: image.width,
                    height: image.height,
                    layer_count: image.layer_count,
                }
            })
            .collect();

        let raw = SYNTHETIC_HANDLE_BASE | self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = vk::Framebuffer::from_raw(raw);
        self.entries.insert(
            handle,
            Arc::new(Mutex::new(ImagelessEntry {
                render_pass: desc.render_pass,
                width: desc.width,
                height: desc.height,
                layers: desc.layers,
                attachment_images: resolved,
                real: None,
                bound_views: Vec::new(),
            })),
        );
        debug!(?handle, attachments = attachment_images.len(), "created imageless framebuffer");
        handle
    }

    pub fn contains(&self, framebuffer: vk::Framebuffer) -> bool {
        self.entries.contains_key(&framebuffer)
    }

    pub fn attachment_images(&self, framebuffer: vk::Framebuffer) -> Option<Vec<AttachmentImage>> {
        self.entries
            .get(&framebuffer)
            .map(|e| e.lock().attachment_images.clone())
    }

    /// Binds concrete views, building the real framebuffer. A repeat bind
    /// with identical views reuses the existing one; different views replace
    /// it and the stale framebuffer is destroyed.
    pub fn bind(
        &self,
        driver: &dyn DriverDispatch,
        device: vk::Device,
        framebuffer: vk::Framebuffer,
        views: &[vk::ImageView],
    ) -> ShimResult<vk::Framebuffer> {
        let entry = self
            .entries
            .get(&framebuffer)
            .map(|e| e.clone())
            .ok_or(ShimError::Initialization(
                "attachment bind on an unknown imageless framebuffer",
            ))?;
        let mut entry = entry.lock();
        if views.len() != entry.attachment_images.len() {
            return Err(ShimError::Validation(
                "attachment view count does not match the imageless descriptor",
            ));
        }
        if let Some(real) = entry.real {
            if entry.bound_views == views {
                return Ok(real);
            }
        }

        let real = driver
            .create_framebuffer(
                device,
                &FramebufferInfo {
                    render_pass: entry.render_pass,
                    attachments: views.to_vec(),
                    width: entry.width,
                    height: entry.height,
                    layers: entry.layers,
                },
            )
            .map_err(ShimError::from)?;
        if let Some(stale) = entry.real.replace(real) {
            driver.destroy_framebuffer(device, stale);
        }
        entry.bound_views = views.to_vec();
        Ok(real)
    }

    /// Destroys the entry if `framebuffer` is one of ours, returning whether
    /// it was. The caller forwards to the driver when it was not.
    pub fn destroy(
        &self,
        driver: &dyn DriverDispatch,
        device: vk::Device,
        framebuffer: vk::Framebuffer,
    ) -> bool {
        match self.entries.remove(&framebuffer) {
            Some((_, entry)) => {
                if let Some(real) = entry.lock().real.take() {
                    driver.destroy_framebuffer(device, real);
                }
                true
            }
            None => false,
        }
    }

    /// Tears down entries owned by `device`, as decided by the supplied
    /// ownership check.
    pub fn cleanup_device(
        &self,
        driver: &dyn DriverDispatch,
        device: vk::Device,
        owned_by_device: impl Fn(vk::Framebuffer) -> bool,
    ) {
        let owned: Vec<vk::Framebuffer> = self
            .entries
            .iter()
            .map(|e| *e.key())
            .filter(|h| owned_by_device(*h))
            .collect();
        for handle in owned {
            self.destroy(driver, device, handle);
        }
    }
}
