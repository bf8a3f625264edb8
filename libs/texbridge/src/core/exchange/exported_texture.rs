// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! A host-created shared texture handed to the cook engine.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::cook::{CookInstance, CookTexture, TextureEvent};
use crate::core::provider::{ResourceProvider, SyncState};
use crate::core::rhi::{GpuDevice, NativeTexture, TextureDescriptor};
use crate::core::{BridgeError, Result};

/// Flags the cook engine's lifetime callback writes.
#[derive(Debug, Default)]
struct CookUse {
    bound: AtomicBool,
    in_use: AtomicBool,
    released: AtomicBool,
}

/// Shared texture exported to the cook engine.
///
/// Owns the backing allocation. Render-queue jobs hold an `Arc` to it, so the
/// allocation outlives a concurrent eviction from the cache. On drop the
/// lifetime callback is unregistered before the handle is closed.
pub struct ExportedTexture {
    shared: Arc<NativeTexture>,
    cook_texture: CookTexture,
    sync: SyncState,
    cook_use: Arc<CookUse>,
    poisoned: AtomicBool,
    params: Mutex<BTreeSet<String>>,
    instance: Arc<dyn CookInstance>,
    device: GpuDevice,
}

impl ExportedTexture {
    pub fn create(
        provider: &dyn ResourceProvider,
        instance: Arc<dyn CookInstance>,
        desc: &TextureDescriptor,
    ) -> Result<Arc<Self>> {
        let shared = provider.create_shared_texture(desc)?;
        let descriptor = *shared.shared_descriptor().ok_or_else(|| {
            BridgeError::Gpu("Shared texture was created without a handle".into())
        })?;
        let cook_texture = CookTexture::new(descriptor);

        let cook_use = Arc::new(CookUse::default());
        let flags = Arc::clone(&cook_use);
        instance.set_texture_callback(
            &cook_texture,
            Arc::new(move |event| match event {
                TextureEvent::BeginUse => {
                    flags.in_use.store(true, Ordering::Release);
                    flags.released.store(false, Ordering::Release);
                }
                TextureEvent::EndUse => flags.in_use.store(false, Ordering::Release),
                TextureEvent::Released => {
                    flags.in_use.store(false, Ordering::Release);
                    flags.released.store(true, Ordering::Release);
                }
            }),
        );

        tracing::debug!(
            handle = %cook_texture.handle(),
            width = desc.width,
            height = desc.height,
            format = %desc.format,
            "[ExportedTexture] Created exported texture"
        );
        Ok(Arc::new(Self {
            shared,
            cook_texture,
            sync: SyncState::new(Arc::clone(provider.semaphores())),
            cook_use,
            poisoned: AtomicBool::new(false),
            params: Mutex::new(BTreeSet::new()),
            instance,
            device: provider.device().clone(),
        }))
    }

    pub fn shared(&self) -> &Arc<NativeTexture> {
        &self.shared
    }

    pub fn cook_texture(&self) -> &CookTexture {
        &self.cook_texture
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        self.shared.descriptor()
    }

    pub fn sync(&self) -> &SyncState {
        &self.sync
    }

    /// Healthy textures may be handed out again.
    pub fn is_healthy(&self) -> bool {
        self.shared.is_valid() && !self.poisoned.load(Ordering::Acquire)
    }

    /// Mark the texture unusable after a failed handshake.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    /// The cook engine is between `BeginUse` and `EndUse`.
    pub fn in_use_by_cook(&self) -> bool {
        self.cook_use.in_use.load(Ordering::Acquire)
    }

    /// The cook engine reported it no longer references this texture.
    pub fn received_release_event(&self) -> bool {
        self.cook_use.released.load(Ordering::Acquire)
    }

    /// Record that the texture was bound to a cook engine input.
    pub fn mark_bound(&self) {
        self.cook_use.bound.store(true, Ordering::Release);
        self.cook_use.released.store(false, Ordering::Release);
    }

    /// Nothing on the cook side can still reference the texture.
    pub fn is_released_by_cook(&self) -> bool {
        !self.cook_use.bound.load(Ordering::Acquire) || self.received_release_event()
    }

    pub fn add_param(&self, param: &str) {
        self.params.lock().insert(param.to_string());
    }

    pub fn remove_param(&self, param: &str) -> bool {
        self.params.lock().remove(param)
    }

    pub fn clear_params(&self) {
        self.params.lock().clear();
    }

    pub fn has_params(&self) -> bool {
        !self.params.lock().is_empty()
    }

    pub fn params(&self) -> Vec<String> {
        self.params.lock().iter().cloned().collect()
    }
}

impl Drop for ExportedTexture {
    fn drop(&mut self) {
        self.instance.clear_texture_callback(&self.cook_texture);
        self.device.close_handle(self.cook_texture.handle());
        tracing::trace!(handle = %self.cook_texture.handle(), "[ExportedTexture] Exported texture freed");
    }
}

impl std::fmt::Debug for ExportedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedTexture")
            .field("handle", &self.cook_texture.handle())
            .field("desc", self.descriptor())
            .field("healthy", &self.is_healthy())
            .field("params", &*self.params.lock())
            .finish()
    }
}
