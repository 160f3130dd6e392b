//! Portable pixel format model. Each backend maps these to its native
//! enums in both directions; depth and typeless formats get a compatible
//! typed view format for SRV/UAV creation.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    R16Float,
    R16Uint,
    R32Float,
    R32Uint,
    Rg16Float,
    Rg32Float,
    Rgba8Unorm,
    Srgba8Unorm,
    Bgra8Unorm,
    Sbgra8Unorm,
    Rgb10A2Unorm,
    Rg11B10Float,
    Rgba16Float,
    Rgba16Unorm,
    Rgba32Float,
    // Depth / stencil family
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8X24Uint,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Unknown => "unknown",
            Format::R8Unorm => "r8un",
            Format::R16Float => "r16f",
            Format::R16Uint => "r16ui",
            Format::R32Float => "r32f",
            Format::R32Uint => "r32ui",
            Format::Rg16Float => "rg16f",
            Format::Rg32Float => "rg32f",
            Format::Rgba8Unorm => "rgba8un",
            Format::Srgba8Unorm => "srgba8un",
            Format::Bgra8Unorm => "bgra8un",
            Format::Sbgra8Unorm => "sbgra8un",
            Format::Rgb10A2Unorm => "rgb10a2un",
            Format::Rg11B10Float => "rg11b10f",
            Format::Rgba16Float => "rgba16f",
            Format::Rgba16Unorm => "rgba16un",
            Format::Rgba32Float => "rgba32f",
            Format::D16Unorm => "d16un",
            Format::D24UnormS8Uint => "d24uns8ui",
            Format::D32Float => "d32f",
            Format::D32FloatS8X24Uint => "d32fs8ui",
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm => 1,
            Format::R16Float | Format::R16Uint | Format::D16Unorm => 2,
            Format::R32Float
            | Format::R32Uint
            | Format::Rg16Float
            | Format::Rgba8Unorm
            | Format::Srgba8Unorm
            | Format::Bgra8Unorm
            | Format::Sbgra8Unorm
            | Format::Rgb10A2Unorm
            | Format::Rg11B10Float
            | Format::D24UnormS8Uint
            | Format::D32Float => 4,
            Format::Rg32Float | Format::Rgba16Float | Format::Rgba16Unorm
            | Format::D32FloatS8X24Uint => 8,
            Format::Rgba32Float => 16,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            Format::D16Unorm
                | Format::D24UnormS8Uint
                | Format::D32Float
                | Format::D32FloatS8X24Uint
        )
    }

    /// Typed view format compatible with SRV/UAV creation. Depth formats
    /// map to the color format reading their depth plane; everything else
    /// is already typed.
    pub fn correct_format(&self) -> Format {
        match self {
            Format::D16Unorm => Format::R16Uint,
            Format::D24UnormS8Uint => Format::R32Uint,
            Format::D32Float | Format::D32FloatS8X24Uint => Format::R32Float,
            other => *other,
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_resolve_to_typed_views() {
        assert_eq!(Format::D32Float.correct_format(), Format::R32Float);
        assert_eq!(Format::D24UnormS8Uint.correct_format(), Format::R32Uint);
        assert!(Format::D32Float.is_depth());
        assert!(!Format::R32Float.is_depth());
        assert_eq!(Format::Rgba16Float.correct_format(), Format::Rgba16Float);
    }

    #[test]
    fn pixel_sizes_match_layout() {
        assert_eq!(Format::Rgba8Unorm.bytes_per_pixel(), 4);
        assert_eq!(Format::Rgba32Float.bytes_per_pixel(), 16);
        assert_eq!(Format::D16Unorm.bytes_per_pixel(), 2);
        assert_eq!(Format::Unknown.bytes_per_pixel(), 0);
    }
}
