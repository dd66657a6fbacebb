//! Shader program variants.
//!
//! The resolve shader has three compile-time branches: whether it samples
//! the scene color directly (blur disabled), whether the atlas stores float
//! channels, and whether six slices are packed. Each combination is an
//! explicit variant resolved once at pipeline build, communicated to the
//! WGSL source as module-scope constants.

use viscube_core::{AtlasFormat, VisibilityCubeSettings};

/// A resolved shader program variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderVariant {
    /// Blur disabled: the resolve pass samples scene color and composites
    /// in a single pass.
    pub sample_scene_color: bool,
    /// The atlas format stores float channels (no 8-bit pack/unpack).
    pub float_atlas: bool,
    /// Six cube faces are packed into the atlas instead of four.
    pub six_slices: bool,
}

impl ShaderVariant {
    /// Derives the variant from the current settings and the chosen atlas
    /// format.
    #[must_use]
    pub fn from_settings(settings: &VisibilityCubeSettings, format: AtlasFormat) -> Self {
        Self {
            sample_scene_color: !settings.blur,
            float_atlas: format.is_float(),
            six_slices: settings.slice_count == viscube_core::SliceCount::Six,
        }
    }

    /// Prepends the variant constants to a WGSL source.
    #[must_use]
    pub fn apply(&self, source: &str) -> String {
        format!(
            "const SAMPLE_SCENE_COLOR: bool = {};\n\
             const FLOAT_ATLAS: bool = {};\n\
             const SIX_SLICES: bool = {};\n\n{source}",
            self.sample_scene_color, self.float_atlas, self.six_slices
        )
    }
}
