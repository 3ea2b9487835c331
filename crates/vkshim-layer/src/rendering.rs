//! Dynamic rendering translated onto classic render passes.
//!
//! `begin` derives an [`AttachmentSignature`] from the registered formats of
//! the attachment views, pulls a compatible render pass from the cache,
//! builds a single-use framebuffer under a freshly minted cache id, and
//! records a classic begin. Per-attachment load/store ops and clear values
//! are not carried into the synthesized pass; the pass loads and stores
//! everything, so callers needing a clear must record one themselves.

use ash::vk;
use dashmap::DashMap;
use tracing::{debug, warn};
use vkshim_types::render::{
    AttachmentSignature, RenderPassBeginInfo, RenderingAttachment, RenderingInfo,
};

use crate::cache::PassCache;
use crate::driver::DriverDispatch;
use crate::error::{ShimError, ShimResult};
use crate::registry::HandleRegistry;

struct ActivePass {
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
}

#[derive(Default)]
pub struct RenderingTranslator {
    active: DashMap<vk::CommandBuffer, ActivePass>,
}

impl RenderingTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(
        &self,
        driver: &dyn DriverDispatch,
        registry: &HandleRegistry,
        cache: &PassCache,
        command_buffer: vk::CommandBuffer,
        info: &RenderingInfo,
    ) -> ShimResult<()> {
        let device = registry
            .device_for_command_buffer(command_buffer)
            .ok_or(ShimError::Initialization(
                "rendering on a command buffer with no known device",
            ))?;
        if self.active.contains_key(&command_buffer) {
            return Err(ShimError::Validation(
                "rendering already active on this command buffer",
            ));
        }
        if info.flags.contains(vk::RenderingFlags::SUSPENDING)
            || info.flags.contains(vk::RenderingFlags::RESUMING)
        {
            warn!("suspend/resume rendering flags are ignored");
        }

        let signature = AttachmentSignature {
            view_mask: info.view_mask,
            color_formats: info
                .color_attachments
                .iter()
                .map(|a| registry.format_for_view(a.image_view))
                .collect(),
            depth_format: attachment_format(registry, &info.depth_attachment),
            stencil_format: attachment_format(registry, &info.stencil_attachment),
        };
        let render_pass = cache.get_or_create_render_pass(driver, device, &signature)?;

        // The first resolvable attachment image decides the framebuffer
        // geometry, with a 3D image's depth as the layer count; the render
        // area is only consulted when no attachment resolves.
        let mut views = Vec::new();
        let mut width = 0;
        let mut height = 0;
        let mut layers = 0;
        let attachments = info
            .color_attachments
            .iter()
            .chain(&info.depth_attachment)
            .chain(&info.stencil_attachment);
        for attachment in attachments {
            if attachment.image_view == vk::ImageView::null() {
                continue;
            }
            views.push(attachment.image_view);
            if width == 0 || height == 0 {
                let (w, h, l) = registry.view_extent(attachment.image_view);
                width = w;
                height = h;
                layers = l;
            }
        }
        if width == 0 || height == 0 {
            width = info.render_area.extent.width;
            height = info.render_area.extent.height;
            layers = info.layer_count;
        }
        if width == 0 || height == 0 {
            return Err(ShimError::Validation(
                "could not resolve an extent for the rendering framebuffer",
            ));
        }
        let layers = layers.max(1);

        // Fresh id every begin: this framebuffer is never shared or reused
        // across passes.
        let id = cache.next_framebuffer_id();
        let framebuffer =
            cache.get_or_create_framebuffer(driver, registry, device, id, &views, width, height, layers)?;

        let begin = RenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width, height },
            },
            clear_values: vec![vk::ClearValue::default(); views.len()],
            chain: Vec::new(),
        };
        driver.cmd_begin_render_pass(device, command_buffer, &begin, vk::SubpassContents::INLINE);
        debug!(?command_buffer, ?render_pass, "began translated rendering");
        self.active.insert(
            command_buffer,
            ActivePass {
                render_pass,
                framebuffer,
            },
        );
        Ok(())
    }

    pub fn end(
        &self,
        driver: &dyn DriverDispatch,
        registry: &HandleRegistry,
        command_buffer: vk::CommandBuffer,
    ) -> ShimResult<()> {
        let device = registry
            .device_for_command_buffer(command_buffer)
            .ok_or(ShimError::Initialization(
                "rendering on a command buffer with no known device",
            ))?;
        self.active
            .remove(&command_buffer)
            .ok_or(ShimError::Validation(
                "no rendering is active on this command buffer",
            ))?;
        driver.cmd_end_render_pass(device, command_buffer);
        Ok(())
    }

    /// Drops tracking for a command buffer being freed mid-pass.
    pub fn forget(&self, command_buffer: vk::CommandBuffer) {
        if self.active.remove(&command_buffer).is_some() {
            warn!(?command_buffer, "command buffer freed with rendering still active");
        }
    }
}

fn attachment_format(
    registry: &HandleRegistry,
    attachment: &Option<RenderingAttachment>,
) -> vk::Format {
    match attachment {
        Some(a) if a.image_view != vk::ImageView::null() => registry.format_for_view(a.image_view),
        _ => vk::Format::UNDEFINED,
    }
}
