// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Texture descriptors, shareable handles and the host texture object.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::device::NativeTexture;
use super::PixelFormat;

/// Vertical origin of the image rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureOrigin {
    #[default]
    TopLeft,
    BottomLeft,
}

/// Image layout tracked by the explicit backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    TransferSrc,
    TransferDst,
    ShaderRead,
    ColorAttachment,
}

impl ImageLayout {
    pub fn is_copy_source(&self) -> bool {
        matches!(self, Self::TransferSrc | Self::General)
    }

    pub fn is_copy_destination(&self) -> bool {
        matches!(self, Self::TransferDst | Self::General)
    }
}

/// Size and format of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub srgb: bool,
    pub origin: TextureOrigin,
}

impl TextureDescriptor {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            srgb: false,
            origin: TextureOrigin::TopLeft,
        }
    }

    pub fn with_srgb(mut self, srgb: bool) -> Self {
        self.srgb = srgb;
        self
    }

    pub fn with_origin(mut self, origin: TextureOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Two textures are interchangeable for pooling when size, format and sRGB match.
    pub fn fits(&self, other: &TextureDescriptor) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.srgb == other.srgb
    }

    pub fn byte_size(&self) -> Option<u64> {
        self.format.image_size(self.width, self.height)
    }
}

/// Opaque OS-level handle to shareable GPU memory or a sync primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OsHandle(pub u64);

impl std::fmt::Display for OsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// How a shared handle may be used by the opening side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HandleType {
    /// Cross-process handle. The table entry holds a reference until closed.
    #[default]
    Duplicate,
    /// Same-process handle. Does not keep the allocation alive.
    SameProcess,
}

/// Exportable/importable texture memory plus the metadata needed to open it.
///
/// Immutable once created; whichever engine currently has write access owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedTextureDescriptor {
    pub desc: TextureDescriptor,
    pub handle: OsHandle,
    pub handle_type: HandleType,
}

impl SharedTextureDescriptor {
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }
}

/// Identity of a logical host texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostTextureId(u64);

static NEXT_HOST_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// A logical host texture.
///
/// The object identity is stable while its backing resource may be replaced
/// (resize, format change), mirroring how a host engine re-creates the GPU
/// resource under an unchanged texture asset.
#[derive(Clone)]
pub struct HostTexture {
    inner: Arc<HostTextureInner>,
}

struct HostTextureInner {
    id: HostTextureId,
    label: String,
    resource: RwLock<Option<Arc<NativeTexture>>>,
}

impl HostTexture {
    pub fn new(label: impl Into<String>, resource: Arc<NativeTexture>) -> Self {
        Self::from_resource(label, Some(resource))
    }

    /// A texture object whose GPU resource has not been created yet.
    pub fn unallocated(label: impl Into<String>) -> Self {
        Self::from_resource(label, None)
    }

    fn from_resource(label: impl Into<String>, resource: Option<Arc<NativeTexture>>) -> Self {
        Self {
            inner: Arc::new(HostTextureInner {
                id: HostTextureId(NEXT_HOST_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)),
                label: label.into(),
                resource: RwLock::new(resource),
            }),
        }
    }

    pub fn id(&self) -> HostTextureId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Backend-native resource currently backing this texture.
    pub fn resource(&self) -> Option<Arc<NativeTexture>> {
        self.inner.resource.read().clone()
    }

    pub fn descriptor(&self) -> Option<TextureDescriptor> {
        self.inner.resource.read().as_ref().map(|r| *r.descriptor())
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.descriptor().map(|d| d.format)
    }

    pub fn width(&self) -> u32 {
        self.descriptor().map(|d| d.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.descriptor().map(|d| d.height).unwrap_or(0)
    }

    /// Swap the backing resource, keeping the object identity.
    pub fn replace_resource(&self, resource: Arc<NativeTexture>) {
        *self.inner.resource.write() = Some(resource);
    }

    pub fn ptr_eq(&self, other: &HostTexture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for HostTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTexture")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("descriptor", &self.descriptor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_fits() {
        let a = TextureDescriptor::new(256, 256, PixelFormat::Rgba8Unorm);
        assert!(a.fits(&a.with_origin(TextureOrigin::BottomLeft)));
        assert!(!a.fits(&a.with_srgb(true)));
        assert!(!a.fits(&TextureDescriptor::new(512, 256, PixelFormat::Rgba8Unorm)));
        assert!(!a.fits(&TextureDescriptor::new(256, 256, PixelFormat::Bgra8Unorm)));
    }

    #[test]
    fn test_layout_copy_roles() {
        assert!(ImageLayout::TransferSrc.is_copy_source());
        assert!(ImageLayout::General.is_copy_destination());
        assert!(!ImageLayout::ShaderRead.is_copy_source());
        assert!(!ImageLayout::Undefined.is_copy_destination());
    }

    #[test]
    fn test_unallocated_host_texture() {
        let texture = HostTexture::unallocated("pending");
        assert!(texture.resource().is_none());
        assert_eq!(texture.width(), 0);
        assert!(texture.ptr_eq(&texture.clone()));
    }
}
