//! Device-scoped caches for synthesized render passes and framebuffers.
//!
//! Render passes are keyed structurally by [`AttachmentSignature`], so a
//! pipeline built for a format tuple and a dynamic rendering pass begun with
//! the same tuple land on the same `vk::RenderPass`. Framebuffers are keyed
//! by a caller-supplied id, never by content: two ids with identical
//! attachments still get distinct framebuffers.
//!
//! Driver calls happen outside the cache locks; a lost creation race is
//! resolved by destroying the extra object and returning the winner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use parking_lot::Mutex;
use tracing::debug;
use vkshim_types::render::{
    AttachmentDescription, AttachmentReference, AttachmentSignature, FramebufferInfo,
    RenderPassDescription, SubpassDependency, SubpassDescription,
};

use crate::driver::DriverDispatch;
use crate::error::{ShimError, ShimResult};
use crate::registry::HandleRegistry;

pub fn is_depth_stencil_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

#[derive(Default)]
pub struct PassCache {
    render_passes: Mutex<HashMap<vk::Device, HashMap<AttachmentSignature, vk::RenderPass>>>,
    framebuffers: Mutex<HashMap<vk::Device, HashMap<u64, vk::Framebuffer>>>,
    next_framebuffer_id: AtomicU64,
}

impl PassCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a framebuffer cache id no caller has used before. A fresh id
    /// per dynamic rendering pass guarantees that path never cache-hits.
    pub fn next_framebuffer_id(&self) -> u64 {
        self.next_framebuffer_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get_or_create_render_pass(
        &self,
        driver: &dyn DriverDispatch,
        device: vk::Device,
        signature: &AttachmentSignature,
    ) -> ShimResult<vk::RenderPass> {
        if let Some(pass) = self
            .render_passes
            .lock()
            .get(&device)
            .and_then(|m| m.get(signature))
        {
            return Ok(*pass);
        }

        let desc = render_pass_for_signature(signature);
        let pass = driver
            .create_render_pass(device, &desc)
            .map_err(ShimError::from)?;

        let mut passes = self.render_passes.lock();
        let per_device = passes.entry(device).or_default();
        match per_device.get(signature) {
            Some(existing) => {
                // Lost the race; keep the first one inserted.
                let existing = *existing;
                drop(passes);
                driver.destroy_render_pass(device, pass);
                Ok(existing)
            }
            None => {
                debug!(?signature, "cached new render pass");
                per_device.insert(signature.clone(), pass);
                Ok(pass)
            }
        }
    }

    /// Returns the framebuffer cached under `id`, creating it from the given
    /// attachments on a miss. A hit returns immediately without comparing
    /// attachments: the id is the identity.
    #[allow(clippy::too_many_arguments)]
    pub fn get_or_create_framebuffer(
        &self,
        driver: &dyn DriverDispatch,
        registry: &HandleRegistry,
        device: vk::Device,
        id: u64,
        attachments: &[vk::ImageView],
        width: u32,
        height: u32,
        layers: u32,
    ) -> ShimResult<vk::Framebuffer> {
        if let Some(fb) = self.framebuffers.lock().get(&device).and_then(|m| m.get(&id)) {
            return Ok(*fb);
        }
        if attachments.is_empty() {
            return Err(ShimError::Validation(
                "framebuffer creation needs at least one attachment",
            ));
        }

        // A throwaway compatible render pass scopes the framebuffer; the
        // framebuffer only needs pass compatibility, not the pass itself.
        let desc = render_pass_for_views(registry, attachments);
        let pass = driver
            .create_render_pass(device, &desc)
            .map_err(ShimError::from)?;
        let created = driver.create_framebuffer(
            device,
            &FramebufferInfo {
                render_pass: pass,
                attachments: attachments.to_vec(),
                width,
                height,
                layers,
            },
        );
        driver.destroy_render_pass(device, pass);
        let framebuffer = created.map_err(ShimError::from)?;

        let mut framebuffers = self.framebuffers.lock();
        let per_device = framebuffers.entry(device).or_default();
        match per_device.get(&id) {
            Some(existing) => {
                let existing = *existing;
                drop(framebuffers);
                driver.destroy_framebuffer(device, framebuffer);
                Ok(existing)
            }
            None => {
                per_device.insert(id, framebuffer);
                Ok(framebuffer)
            }
        }
    }

    /// Destroys and forgets everything cached for one device, leaving other
    /// devices' entries alone.
    pub fn cleanup_device(&self, driver: &dyn DriverDispatch, device: vk::Device) {
        let passes = self.render_passes.lock().remove(&device);
        if let Some(passes) = passes {
            for (_, pass) in passes {
                driver.destroy_render_pass(device, pass);
            }
        }
        let framebuffers = self.framebuffers.lock().remove(&device);
        if let Some(framebuffers) = framebuffers {
            for (_, fb) in framebuffers {
                driver.destroy_framebuffer(device, fb);
            }
        }
    }
}

/// One color attachment per signature entry (undefined formats included, so
/// attachment indices stay aligned with the signature), plus an appended
/// depth/stencil attachment when either format is set.
fn render_pass_for_signature(signature: &AttachmentSignature) -> RenderPassDescription {
    let mut attachments = Vec::with_capacity(signature.color_formats.len() + 1);
    let mut subpass = SubpassDescription::default();

    for (index, format) in signature.color_formats.iter().enumerate() {
        attachments.push(color_attachment(*format));
        subpass.color_attachments.push(AttachmentReference {
            attachment: index as u32,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
    }

    let depth_format = if signature.depth_format != vk::Format::UNDEFINED {
        signature.depth_format
    } else {
        signature.stencil_format
    };
    if depth_format != vk::Format::UNDEFINED {
        subpass.depth_stencil_attachment = Some(AttachmentReference {
            attachment: attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });
        attachments.push(depth_attachment(depth_format));
    }

    RenderPassDescription {
        attachments,
        subpasses: vec![subpass],
        dependencies: vec![external_dependency()],
    }
}

/// Builds a pass shape from live attachment views, classifying each view by
/// its registered format. Views with unknown formats are skipped.
fn render_pass_for_views(
    registry: &HandleRegistry,
    views: &[vk::ImageView],
) -> RenderPassDescription {
    let mut attachments = Vec::with_capacity(views.len());
    let mut subpass = SubpassDescription::default();

    for view in views {
        let format = registry.format_for_view(*view);
        if format == vk::Format::UNDEFINED {
            continue;
        }
        let index = attachments.len() as u32;
        if is_depth_stencil_format(format) {
            subpass.depth_stencil_attachment = Some(AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
            attachments.push(depth_attachment(format));
        } else {
            subpass.color_attachments.push(AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            attachments.push(color_attachment(format));
        }
    }

    RenderPassDescription {
        attachments,
        subpasses: vec![subpass],
        dependencies: vec![external_dependency()],
    }
}

fn color_attachment(format: vk::Format) -> AttachmentDescription {
    AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::LOAD,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }
}

fn depth_attachment(format: vk::Format) -> AttachmentDescription {
    AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::LOAD,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::LOAD,
        stencil_store_op: vk::AttachmentStoreOp::STORE,
        initial_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    }
}

fn external_dependency() -> SubpassDependency {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_pass_appends_depth_after_colors() {
        let desc = render_pass_for_signature(&AttachmentSignature {
            view_mask: 0,
            color_formats: vec![vk::Format::R8G8B8A8_UNORM, vk::Format::UNDEFINED],
            depth_format: vk::Format::D32_SFLOAT,
            stencil_format: vk::Format::UNDEFINED,
        });
        assert_eq!(desc.attachments.len(), 3);
        assert_eq!(desc.subpasses[0].color_attachments.len(), 2);
        assert_eq!(
            desc.subpasses[0].depth_stencil_attachment.map(|r| r.attachment),
            Some(2)
        );
    }

    #[test]
    fn stencil_only_signature_still_gets_depth_attachment() {
        let desc = render_pass_for_signature(&AttachmentSignature {
            stencil_format: vk::Format::S8_UINT,
            ..Default::default()
        });
        assert_eq!(desc.attachments.len(), 1);
        assert_eq!(desc.attachments[0].format, vk::Format::S8_UINT);
    }

    #[test]
    fn depth_formats_are_classified() {
        assert!(is_depth_stencil_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(!is_depth_stencil_format(vk::Format::B8G8R8A8_SRGB));
    }
}
