//! Graphics pipeline adaptation for dynamic rendering.
//!
//! A pipeline created with rendering formats instead of a render pass is
//! rewritten to target the cached render pass for that format signature.
//! Because the synthesized pass knows nothing about the eventual viewport or
//! depth/stencil configuration, a pipeline that declared no dynamic state
//! gets a default set so those can be set at record time.

use ash::vk;
use vkshim_types::pipeline::{
    ColorBlendState, DynamicStateList, GraphicsPipelineDescription, PipelineExtension,
};
use vkshim_types::render::AttachmentSignature;

use crate::cache::PassCache;
use crate::chain;
use crate::driver::DriverDispatch;
use crate::error::{ShimError, ShimResult};

const DEFAULT_DYNAMIC_STATES: [vk::DynamicState; 7] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::DEPTH_TEST_ENABLE,
    vk::DynamicState::DEPTH_WRITE_ENABLE,
    vk::DynamicState::DEPTH_COMPARE_OP,
    vk::DynamicState::STENCIL_TEST_ENABLE,
    vk::DynamicState::STENCIL_OP,
];

pub fn adapt_and_create(
    driver: &dyn DriverDispatch,
    cache: &PassCache,
    device: vk::Device,
    mut descs: Vec<GraphicsPipelineDescription>,
) -> ShimResult<Vec<vk::Pipeline>> {
    for desc in &mut descs {
        let rendering = chain::extract_one(
            &mut desc.chain,
            |m| match m {
                PipelineExtension::RenderingFormats(info) => Some(info.clone()),
            },
            "pipeline rendering formats",
        );
        let Some(rendering) = rendering else {
            continue;
        };

        let signature = AttachmentSignature {
            view_mask: rendering.view_mask,
            color_formats: rendering.color_attachment_formats.clone(),
            depth_format: rendering.depth_attachment_format,
            stencil_format: rendering.stencil_attachment_format,
        };
        desc.render_pass = cache.get_or_create_render_pass(driver, device, &signature)?;
        desc.subpass = 0;

        let color_count = rendering.color_attachment_formats.len();
        if color_count > 0 {
            let blend = desc.color_blend_state.get_or_insert_with(ColorBlendState::default);
            blend
                .attachments
                .resize(color_count, default_blend_attachment());
        }
        if desc.dynamic_state.is_none() {
            desc.dynamic_state = Some(DynamicStateList {
                dynamic_states: DEFAULT_DYNAMIC_STATES.to_vec(),
            });
        }
    }

    driver
        .create_graphics_pipelines(device, &descs)
        .map_err(ShimError::from)
}

fn default_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        src_color_blend_factor: vk::BlendFactor::ONE,
        dst_color_blend_factor: vk::BlendFactor::ZERO,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    }
}
