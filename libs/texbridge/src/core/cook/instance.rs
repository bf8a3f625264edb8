// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The cook engine as seen from the host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::core::rhi::{
    ImageLayout, OsHandle, PixelFormat, RhiBackend, SharedTextureDescriptor, TextureDescriptor,
};
use crate::core::Result;

use super::{TransferRecord, TransferStatus};

/// Identity of a texture handle known to the cook engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CookTextureId(u64);

static NEXT_COOK_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// A shared texture as exchanged with the cook engine. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CookTexture {
    id: CookTextureId,
    shared: SharedTextureDescriptor,
}

impl CookTexture {
    pub fn new(shared: SharedTextureDescriptor) -> Self {
        Self {
            id: CookTextureId(NEXT_COOK_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)),
            shared,
        }
    }

    pub fn id(&self) -> CookTextureId {
        self.id
    }

    pub fn shared(&self) -> &SharedTextureDescriptor {
        &self.shared
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.shared.desc
    }

    pub fn handle(&self) -> OsHandle {
        self.shared.handle
    }

    pub fn format(&self) -> PixelFormat {
        self.shared.desc.format
    }
}

/// Lifetime notifications the cook engine sends for a texture it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureEvent {
    BeginUse,
    EndUse,
    /// The engine no longer references the texture at all.
    Released,
}

pub type TextureCallback = Arc<dyn Fn(TextureEvent) + Send + Sync>;

/// Host-facing surface of a cook engine instance.
///
/// Implementations are shared between the calling thread and the render
/// queue, so every method takes `&self`.
pub trait CookInstance: Send + Sync {
    /// Device the instance's graphics context is bound to, once created.
    fn device_uuid(&self) -> Option<Uuid>;

    /// Bind the instance's graphics context to the host's physical device.
    fn create_context(&self, backend: RhiBackend, device_uuid: Uuid) -> Result<()>;

    /// Formats the instance accepts for shared textures on `backend`.
    fn supported_formats(&self, backend: RhiBackend) -> Vec<PixelFormat>;

    /// Layout the instance expects shared images to be handed over in.
    fn required_layout(&self) -> ImageLayout;

    fn set_required_layout(&self, layout: ImageLayout);

    /// Take the pending handoff for `texture`, if any.
    fn texture_transfer(&self, texture: &CookTexture) -> TransferStatus;

    fn has_pending_transfer(&self, texture: &CookTexture) -> bool;

    /// Hand `texture` to the cook engine.
    fn add_texture_transfer(&self, texture: &CookTexture, record: TransferRecord) -> Result<()>;

    /// Bind (or clear, with `None`) a texture input parameter.
    fn set_texture_input(&self, param: &str, texture: Option<CookTexture>) -> Result<()>;

    /// Current texture of an output parameter.
    fn texture_output(&self, param: &str) -> Option<CookTexture>;

    /// Register the lifetime callback for a texture given to the engine.
    /// Replaces any previous callback for the same texture.
    fn set_texture_callback(&self, texture: &CookTexture, callback: TextureCallback);

    /// Unregister the callback. Must be called before the texture is freed.
    fn clear_texture_callback(&self, texture: &CookTexture);
}
