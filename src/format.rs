//! Texture format capabilities.
//!
//! The engine never hardcodes per-format facts; it asks a
//! [`FormatCapabilities`] table. [`StaticFormatTable`] carries the WebGPU
//! core values for the uncompressed formats, and hosts exposing optional
//! features can provide a richer table.

use wgt::{TextureFormat, TextureSampleType};

/// Capabilities of a color format that can be sampled or stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorInfo {
    pub sample_type: TextureSampleType,
    /// Bytes per texel.
    pub bytes: u32,
    pub storage: bool,
    pub read_write_storage: bool,
}

/// Capabilities of a color format that can be a render attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorRenderInfo {
    pub blend: bool,
    pub resolve: bool,
    /// Render target pixel byte cost, counted against
    /// `max_color_attachment_bytes_per_sample`.
    pub byte_cost: u32,
    /// Render target component alignment.
    pub alignment: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AspectInfo {
    /// Bytes per texel when the aspect is copyable.
    pub bytes: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatInfo {
    pub block_width: u32,
    pub block_height: u32,
    pub bytes_per_block: Option<u32>,
    pub multisample: bool,
    pub color: Option<ColorInfo>,
    pub color_render: Option<ColorRenderInfo>,
    pub depth: Option<AspectInfo>,
    pub stencil: Option<AspectInfo>,
    /// The non-sRGB format this one is a view-compatible variant of.
    pub base_format: Option<TextureFormat>,
    /// Name of the device feature the format requires, if any.
    pub feature: Option<&'static str>,
}

impl FormatInfo {
    pub fn is_depth_stencil(&self) -> bool {
        self.depth.is_some() || self.stencil.is_some()
    }

    pub fn is_color_renderable(&self) -> bool {
        self.color_render.is_some()
    }
}

/// Read-only lookup of per-format capabilities.
pub trait FormatCapabilities {
    /// Returns `None` for formats the table knows nothing about; such
    /// formats are treated as neither renderable nor multisampled.
    fn info(&self, format: TextureFormat) -> Option<FormatInfo>;
}

/// The WebGPU core format table for uncompressed formats.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticFormatTable;

const FLOAT: TextureSampleType = TextureSampleType::Float { filterable: true };
const UNFILTERABLE_FLOAT: TextureSampleType = TextureSampleType::Float { filterable: false };
const UINT: TextureSampleType = TextureSampleType::Uint;
const SINT: TextureSampleType = TextureSampleType::Sint;

fn color(
    sample_type: TextureSampleType,
    bytes: u32,
    storage: bool,
    render: Option<(bool, bool, u32, u32)>,
    multisample: bool,
) -> FormatInfo {
    FormatInfo {
        block_width: 1,
        block_height: 1,
        bytes_per_block: Some(bytes),
        multisample,
        color: Some(ColorInfo {
            sample_type,
            bytes,
            storage,
            read_write_storage: false,
        }),
        color_render: render.map(|(blend, resolve, byte_cost, alignment)| ColorRenderInfo {
            blend,
            resolve,
            byte_cost,
            alignment,
        }),
        depth: None,
        stencil: None,
        base_format: None,
        feature: None,
    }
}

fn depth_stencil(depth: Option<Option<u32>>, stencil: bool, feature: Option<&'static str>) -> FormatInfo {
    FormatInfo {
        block_width: 1,
        block_height: 1,
        bytes_per_block: None,
        multisample: true,
        color: None,
        color_render: None,
        depth: depth.map(|bytes| AspectInfo { bytes }),
        stencil: stencil.then_some(AspectInfo { bytes: Some(1) }),
        base_format: None,
        feature,
    }
}

impl FormatCapabilities for StaticFormatTable {
    fn info(&self, format: TextureFormat) -> Option<FormatInfo> {
        use TextureFormat as Tf;

        // (blend, resolve, byte cost, alignment)
        let info = match format {
            Tf::R8Unorm => color(FLOAT, 1, false, Some((true, true, 1, 1)), true),
            Tf::R8Snorm => color(FLOAT, 1, false, None, false),
            Tf::R8Uint => color(UINT, 1, false, Some((false, false, 1, 1)), true),
            Tf::R8Sint => color(SINT, 1, false, Some((false, false, 1, 1)), true),
            Tf::R16Uint => color(UINT, 2, false, Some((false, false, 2, 2)), true),
            Tf::R16Sint => color(SINT, 2, false, Some((false, false, 2, 2)), true),
            Tf::R16Float => color(FLOAT, 2, false, Some((true, true, 2, 2)), true),
            Tf::Rg8Unorm => color(FLOAT, 2, false, Some((true, true, 2, 1)), true),
            Tf::Rg8Snorm => color(FLOAT, 2, false, None, false),
            Tf::Rg8Uint => color(UINT, 2, false, Some((false, false, 2, 1)), true),
            Tf::Rg8Sint => color(SINT, 2, false, Some((false, false, 2, 1)), true),
            Tf::R32Uint => {
                let mut info = color(UINT, 4, true, Some((false, false, 4, 4)), false);
                if let Some(ref mut c) = info.color {
                    c.read_write_storage = true;
                }
                info
            }
            Tf::R32Sint => {
                let mut info = color(SINT, 4, true, Some((false, false, 4, 4)), false);
                if let Some(ref mut c) = info.color {
                    c.read_write_storage = true;
                }
                info
            }
            Tf::R32Float => {
                let mut info = color(UNFILTERABLE_FLOAT, 4, true, Some((false, false, 4, 4)), true);
                if let Some(ref mut c) = info.color {
                    c.read_write_storage = true;
                }
                info
            }
            Tf::Rg16Uint => color(UINT, 4, false, Some((false, false, 4, 2)), true),
            Tf::Rg16Sint => color(SINT, 4, false, Some((false, false, 4, 2)), true),
            Tf::Rg16Float => color(FLOAT, 4, false, Some((true, true, 4, 2)), true),
            Tf::Rgba8Unorm => color(FLOAT, 4, true, Some((true, true, 8, 1)), true),
            Tf::Rgba8UnormSrgb => FormatInfo {
                base_format: Some(Tf::Rgba8Unorm),
                ..color(FLOAT, 4, false, Some((true, true, 8, 1)), true)
            },
            Tf::Rgba8Snorm => color(FLOAT, 4, true, None, false),
            Tf::Rgba8Uint => color(UINT, 4, true, Some((false, false, 4, 1)), true),
            Tf::Rgba8Sint => color(SINT, 4, true, Some((false, false, 4, 1)), true),
            Tf::Bgra8Unorm => color(FLOAT, 4, false, Some((true, true, 8, 1)), true),
            Tf::Bgra8UnormSrgb => FormatInfo {
                base_format: Some(Tf::Bgra8Unorm),
                ..color(FLOAT, 4, false, Some((true, true, 8, 1)), true)
            },
            Tf::Rgb10a2Unorm => color(FLOAT, 4, false, Some((true, true, 8, 4)), true),
            Tf::Rgb9e5Ufloat => color(FLOAT, 4, false, None, false),
            Tf::Rg32Uint => color(UINT, 8, true, Some((false, false, 8, 4)), false),
            Tf::Rg32Sint => color(SINT, 8, true, Some((false, false, 8, 4)), false),
            Tf::Rg32Float => color(UNFILTERABLE_FLOAT, 8, true, Some((false, false, 8, 4)), false),
            Tf::Rgba16Uint => color(UINT, 8, true, Some((false, false, 8, 2)), true),
            Tf::Rgba16Sint => color(SINT, 8, true, Some((false, false, 8, 2)), true),
            Tf::Rgba16Float => color(FLOAT, 8, true, Some((true, true, 8, 2)), true),
            Tf::Rgba32Uint => color(UINT, 16, true, Some((false, false, 16, 4)), false),
            Tf::Rgba32Sint => color(SINT, 16, true, Some((false, false, 16, 4)), false),
            Tf::Rgba32Float => color(UNFILTERABLE_FLOAT, 16, true, Some((false, false, 16, 4)), false),
            Tf::Stencil8 => depth_stencil(None, true, None),
            Tf::Depth16Unorm => depth_stencil(Some(Some(2)), false, None),
            Tf::Depth24Plus => depth_stencil(Some(None), false, None),
            Tf::Depth24PlusStencil8 => depth_stencil(Some(None), true, None),
            Tf::Depth32Float => depth_stencil(Some(Some(4)), false, None),
            Tf::Depth32FloatStencil8 => {
                depth_stencil(Some(Some(4)), true, Some("depth32float-stencil8"))
            }
            _ => return None,
        };
        Some(info)
    }
}

/// Round `value` up to the next multiple of `alignment`.
pub(crate) fn round_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_costs() {
        let table = StaticFormatTable;
        let rgba8 = table.info(TextureFormat::Rgba8Unorm).unwrap();
        assert_eq!(rgba8.color_render.unwrap().byte_cost, 8);
        assert!(rgba8.multisample);
        let rgba32 = table.info(TextureFormat::Rgba32Float).unwrap();
        assert!(!rgba32.multisample);
        assert_eq!(rgba32.color_render.unwrap().alignment, 4);
        assert!(!table.info(TextureFormat::R8Snorm).unwrap().is_color_renderable());
    }

    #[test]
    fn depth_formats() {
        let table = StaticFormatTable;
        let d24s8 = table.info(TextureFormat::Depth24PlusStencil8).unwrap();
        assert!(d24s8.is_depth_stencil());
        assert!(d24s8.stencil.is_some());
        assert!(!d24s8.is_color_renderable());
        assert!(!table.info(TextureFormat::Rgba8Unorm).unwrap().is_depth_stencil());
    }

    #[test]
    fn rounding() {
        assert_eq!(round_up(1, 4), 4);
        assert_eq!(round_up(8, 4), 8);
        assert_eq!(round_up(3, 1), 3);
        assert_eq!(round_up(0, 2), 0);
    }
}
