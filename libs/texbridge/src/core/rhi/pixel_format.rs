// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pixel formats understood by the exchange layer.

/// Texel layout of a texture, independent of its sRGB transfer function.
///
/// sRGB is carried separately on [`TextureDescriptor`](super::TextureDescriptor)
/// so pool fit-checks compare (size, format, sRGB) as three plain fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgb10A2Unorm,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    /// NV12 YUV (video decode). Planar, never shareable as a single image.
    Nv12,
    /// A native format code this layer has no mapping for.
    Unknown(u32),
}

impl PixelFormat {
    /// Formats a shared image can be created with on any backend.
    pub const EXCHANGEABLE: [PixelFormat; 11] = [
        Self::R8Unorm,
        Self::Rg8Unorm,
        Self::Rgba8Unorm,
        Self::Bgra8Unorm,
        Self::Rgb10A2Unorm,
        Self::R16Float,
        Self::Rg16Float,
        Self::Rgba16Float,
        Self::R32Float,
        Self::Rg32Float,
        Self::Rgba32Float,
    ];

    /// Bytes per pixel, `None` for planar or unknown formats.
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match self {
            Self::R8Unorm => Some(1),
            Self::Rg8Unorm | Self::R16Float => Some(2),
            Self::Rgba8Unorm
            | Self::Bgra8Unorm
            | Self::Rgb10A2Unorm
            | Self::Rg16Float
            | Self::R32Float => Some(4),
            Self::Rgba16Float | Self::Rg32Float => Some(8),
            Self::Rgba32Float => Some(16),
            Self::Nv12 | Self::Unknown(_) => None,
        }
    }

    /// Whether an sRGB view of this format exists.
    pub fn supports_srgb(&self) -> bool {
        matches!(self, Self::Rgba8Unorm | Self::Bgra8Unorm)
    }

    pub fn is_exchangeable(&self) -> bool {
        Self::EXCHANGEABLE.contains(self)
    }

    /// Size in bytes of a tightly packed `width` x `height` image.
    pub fn image_size(&self, width: u32, height: u32) -> Option<u64> {
        self.bytes_per_pixel()
            .map(|bpp| u64::from(width) * u64::from(height) * u64::from(bpp))
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown({code:#x})"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::R8Unorm.bytes_per_pixel(), Some(1));
        assert_eq!(PixelFormat::Rgba8Unorm.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Rgba32Float.bytes_per_pixel(), Some(16));
        assert_eq!(PixelFormat::Nv12.bytes_per_pixel(), None);
        assert_eq!(PixelFormat::Rgba8Unorm.image_size(256, 256), Some(262_144));
    }

    #[test]
    fn test_exchangeable() {
        assert!(PixelFormat::Rgba16Float.is_exchangeable());
        assert!(!PixelFormat::Nv12.is_exchangeable());
        assert!(!PixelFormat::Unknown(7).is_exchangeable());
        assert!(PixelFormat::Bgra8Unorm.supports_srgb());
        assert!(!PixelFormat::R32Float.supports_srgb());
    }
}
