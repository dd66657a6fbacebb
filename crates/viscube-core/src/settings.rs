//! Configuration model for the visibility cube pipeline.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Resolution of a single cube face slice, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SliceResolution {
    /// 128 px.
    Tiny,
    /// 256 px.
    Small,
    /// 512 px.
    #[default]
    Normal,
    /// 1024 px.
    High,
}

impl SliceResolution {
    /// Slice edge length in pixels.
    #[must_use]
    pub fn pixels(self) -> u32 {
        match self {
            SliceResolution::Tiny => 128,
            SliceResolution::Small => 256,
            SliceResolution::Normal => 512,
            SliceResolution::High => 1024,
        }
    }
}

/// Number of cube faces packed into the atlas.
///
/// Four covers the horizontal ring only; six adds the up/down faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SliceCount {
    /// The four yaw faces (+Z, +X, -Z, -X).
    #[default]
    Four,
    /// All six cube faces.
    Six,
}

impl SliceCount {
    /// Face count as an integer.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            SliceCount::Four => 4,
            SliceCount::Six => 6,
        }
    }

    /// Face count as a usize, for indexing the orientation table.
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }
}

/// Depth buffer precision for the atlas render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DepthBits {
    /// 8-bit depth.
    B8,
    /// 16-bit depth.
    #[default]
    B16,
    /// 24-bit depth.
    B24,
    /// 32-bit depth.
    B32,
}

impl DepthBits {
    /// Requested precision in bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        match self {
            DepthBits::B8 => 8,
            DepthBits::B16 => 16,
            DepthBits::B24 => 24,
            DepthBits::B32 => 32,
        }
    }
}

/// Color format of the cube atlas, in auto-detect preference order.
///
/// The 8-bit fallback needs different encode/decode math in the resolve
/// shader, so consumers must know whether a float format was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AtlasFormat {
    /// Two-channel half float (preferred).
    #[default]
    RgHalf,
    /// Four-channel half float.
    RgbaHalf,
    /// 8-bit RGBA fallback.
    Rgba8,
}

impl AtlasFormat {
    /// Whether the format stores floating-point channels.
    #[must_use]
    pub fn is_float(self) -> bool {
        !matches!(self, AtlasFormat::Rgba8)
    }
}

/// Picks the first supported atlas format in preference order, falling back
/// to 8-bit RGBA which is always renderable.
pub fn choose_atlas_format(supported: impl Fn(AtlasFormat) -> bool) -> AtlasFormat {
    if supported(AtlasFormat::RgHalf) {
        AtlasFormat::RgHalf
    } else if supported(AtlasFormat::RgbaHalf) {
        AtlasFormat::RgbaHalf
    } else {
        AtlasFormat::Rgba8
    }
}

/// Immutable-per-frame configuration for both passes.
///
/// Both passes hold a shared reference to one instance; mutations take
/// effect on the next frame without reconstructing the passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityCubeSettings {
    /// Edge length of one cube face slice.
    pub resolution: SliceResolution,

    /// Number of faces packed into the atlas.
    pub slice_count: SliceCount,

    /// Depth precision of the atlas target.
    pub depth_bits: DepthBits,

    /// Bias vector: x = depth-bias scale, y = capture range, z = extra z
    /// offset applied in the resolve shader.
    pub bias_offset: Vec3,

    /// Cull occluders against each face's own frustum instead of reusing the
    /// main camera's visible set. More accurate at slice boundaries, more
    /// expensive.
    pub cull_each_side: bool,

    /// Run the separable blur over the resolved mask.
    pub blur: bool,

    /// Resolution divider for the blur intermediates, 1..=4.
    pub downsample_divider: u32,

    /// Probe the device for the best supported atlas format on activation.
    pub auto_detect_format: bool,

    /// Atlas color format; overwritten by detection when
    /// [`auto_detect_format`](Self::auto_detect_format) is set.
    pub format: AtlasFormat,
}

impl Default for VisibilityCubeSettings {
    fn default() -> Self {
        Self {
            resolution: SliceResolution::default(),
            slice_count: SliceCount::default(),
            depth_bits: DepthBits::default(),
            bias_offset: Vec3::new(1.0, 10.0, 0.0),
            cull_each_side: false,
            blur: false,
            downsample_divider: 1,
            auto_detect_format: true,
            format: AtlasFormat::default(),
        }
    }
}

impl VisibilityCubeSettings {
    /// Atlas width: one slice per face, side by side.
    #[must_use]
    pub fn atlas_width(&self) -> u32 {
        self.resolution.pixels() * self.slice_count.as_u32()
    }

    /// Atlas height: one slice tall.
    #[must_use]
    pub fn atlas_height(&self) -> u32 {
        self.resolution.pixels()
    }

    /// Checks range constraints that the enums cannot encode.
    pub fn validate(&self) -> Result<()> {
        if !(1..=4).contains(&self.downsample_divider) {
            return Err(CoreError::InvalidDownsampleDivider(self.downsample_divider));
        }
        Ok(())
    }
}
