use std::path::Path;

use ash::vk;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Runtime tuning for the layer, loadable from a TOML file named by the
/// `VKSHIM_CONFIG` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Intercept timeline-type semaphore creation and emulate the timeline
    /// on the host. When off, timeline chain members are ignored and the
    /// timeline entry points report an initialization error.
    pub emulate_timeline_semaphores: bool,
    /// Translate `CmdBeginRendering`/`CmdEndRendering` onto classic render
    /// passes. When off, those entry points report an initialization error.
    pub emulate_dynamic_rendering: bool,
    /// Intercept imageless framebuffer creation and defer the real
    /// framebuffer until attachments are known. When off, imageless creation
    /// reports an initialization error.
    pub emulate_imageless_framebuffers: bool,
    /// Per-device cap on recycled binary semaphores held by the submission
    /// rewriter; extras are destroyed on retirement.
    pub binary_semaphore_pool_cap: usize,
    /// Raw `VkFormat` assumed for an imageless color attachment whose view
    /// format list is empty.
    pub fallback_color_format: i32,
    /// Raw `VkFormat` assumed for an imageless depth/stencil attachment
    /// whose view format list is empty.
    pub fallback_depth_format: i32,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            emulate_timeline_semaphores: true,
            emulate_dynamic_rendering: true,
            emulate_imageless_framebuffers: true,
            binary_semaphore_pool_cap: 32,
            fallback_color_format: vk::Format::R8G8B8A8_UNORM.as_raw(),
            fallback_depth_format: vk::Format::D32_SFLOAT_S8_UINT.as_raw(),
        }
    }
}

impl ShimConfig {
    /// Loads configuration from `VKSHIM_CONFIG` if set, falling back to
    /// defaults when the variable is unset or the file is unusable.
    pub fn load() -> Self {
        match std::env::var("VKSHIM_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => Self::default(),
        }
    }

    pub fn from_file(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                return Self::default();
            }
        };
        match toml::from_str(&text) {
            Ok(config) => {
                info!(path = %path.display(), "loaded layer config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                Self::default()
            }
        }
    }

    pub fn fallback_color_format(&self) -> vk::Format {
        vk::Format::from_raw(self.fallback_color_format)
    }

    pub fn fallback_depth_format(&self) -> vk::Format {
        vk::Format::from_raw(self.fallback_depth_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = ShimConfig::default();
        assert!(config.emulate_timeline_semaphores);
        assert!(config.emulate_imageless_framebuffers);
        assert_eq!(config.fallback_color_format(), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(config.fallback_depth_format(), vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ShimConfig = toml::from_str("binary_semaphore_pool_cap = 4").unwrap();
        assert_eq!(config.binary_semaphore_pool_cap, 4);
        assert!(config.emulate_timeline_semaphores);
    }
}
