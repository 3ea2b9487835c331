//! Image, render pass, framebuffer, and dynamic rendering types.

use ash::vk;

/// Image creation parameters retained by the layer, since the driver offers
/// no query to recover them from an opaque `vk::Image` later.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::UNDEFINED,
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewInfo {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub subresource_range: vk::ImageSubresourceRange,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandPoolInfo {
    pub flags: vk::CommandPoolCreateFlags,
    pub queue_family_index: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandBufferAllocateInfo {
    pub command_pool: vk::CommandPool,
    pub level: vk::CommandBufferLevel,
    pub count: u32,
}

/// The tuple of attachment formats and view mask that decides whether two
/// render passes are interchangeable for a pipeline. Structural equality is
/// the cache key: equal signatures must resolve to the same render pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentSignature {
    pub view_mask: u32,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: vk::Format,
    pub stencil_format: vk::Format,
}

impl Default for AttachmentSignature {
    fn default() -> Self {
        Self {
            view_mask: 0,
            color_formats: Vec::new(),
            depth_format: vk::Format::UNDEFINED,
            stencil_format: vk::Format::UNDEFINED,
        }
    }
}

// ── Driver-facing render pass / framebuffer descriptions ─────

#[derive(Debug, Clone, Copy)]
pub struct AttachmentDescription {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct AttachmentReference {
    pub attachment: u32,
    pub layout: vk::ImageLayout,
}

#[derive(Debug, Clone, Default)]
pub struct SubpassDescription {
    pub color_attachments: Vec<AttachmentReference>,
    pub depth_stencil_attachment: Option<AttachmentReference>,
}

#[derive(Debug, Clone, Copy)]
pub struct SubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
}

#[derive(Debug, Clone, Default)]
pub struct RenderPassDescription {
    pub attachments: Vec<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
    pub dependencies: Vec<SubpassDependency>,
}

/// What the real driver needs to build a framebuffer.
#[derive(Debug, Clone)]
pub struct FramebufferInfo {
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

// ── Application-facing framebuffer creation ──────────────────

/// Per-attachment image description of an imageless framebuffer.
#[derive(Debug, Clone)]
pub struct FramebufferAttachmentImage {
    pub usage: vk::ImageUsageFlags,
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    pub view_formats: Vec<vk::Format>,
}

#[derive(Debug, Clone)]
pub enum FramebufferExtension {
    /// Mirrors `VkFramebufferAttachmentsCreateInfo`.
    AttachmentImages(Vec<FramebufferAttachmentImage>),
}

#[derive(Debug, Clone, Default)]
pub struct FramebufferDescription {
    pub flags: vk::FramebufferCreateFlags,
    pub render_pass: vk::RenderPass,
    /// Empty for imageless framebuffers.
    pub attachments: Vec<vk::ImageView>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub chain: Vec<FramebufferExtension>,
}

// ── Render pass begin ────────────────────────────────────────

#[derive(Clone)]
pub enum RenderPassBeginExtension {
    /// Mirrors `VkRenderPassAttachmentBeginInfo`: the concrete views bound
    /// to an imageless framebuffer at begin time.
    AttachmentViews(Vec<vk::ImageView>),
}

#[derive(Clone, Default)]
pub struct RenderPassBeginInfo {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    pub clear_values: Vec<vk::ClearValue>,
    pub chain: Vec<RenderPassBeginExtension>,
}

// ── Dynamic rendering ────────────────────────────────────────

#[derive(Clone, Copy)]
pub struct RenderingAttachment {
    pub image_view: vk::ImageView,
    pub image_layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: vk::ClearValue,
}

impl Default for RenderingAttachment {
    fn default() -> Self {
        Self {
            image_view: vk::ImageView::null(),
            image_layout: vk::ImageLayout::UNDEFINED,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue::default(),
        }
    }
}

/// Mirrors `VkRenderingInfo` for `vkCmdBeginRendering`.
#[derive(Clone, Default)]
pub struct RenderingInfo {
    pub flags: vk::RenderingFlags,
    pub render_area: vk::Rect2D,
    pub layer_count: u32,
    pub view_mask: u32,
    pub color_attachments: Vec<RenderingAttachment>,
    pub depth_attachment: Option<RenderingAttachment>,
    pub stencil_attachment: Option<RenderingAttachment>,
}
