// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The host's view of one cook engine output.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::cook::{CookTexture, CookTextureId};
use crate::core::provider::{ResourceProvider, SemaphoreCache, SyncState};
use crate::core::rhi::{NativeTexture, TextureDescriptor};
use crate::core::Result;

struct SourceBinding {
    texture: CookTexture,
    view: Arc<NativeTexture>,
    sync: Arc<SyncState>,
}

/// Tracks the cook engine texture currently published on an output
/// parameter. The host opens it but does not own it; its destinations live
/// in the [`ImportPool`](super::ImportPool).
pub struct ImportedTexture {
    param: String,
    semaphores: Arc<SemaphoreCache>,
    source: Mutex<Option<SourceBinding>>,
}

impl ImportedTexture {
    pub fn new(param: impl Into<String>, semaphores: Arc<SemaphoreCache>) -> Self {
        Self {
            param: param.into(),
            semaphores,
            source: Mutex::new(None),
        }
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    /// Host view and signaling state for `texture`. Reopened, with fresh
    /// signaling state, whenever the cook engine publishes a different texture.
    pub fn bind(
        &self,
        provider: &dyn ResourceProvider,
        texture: &CookTexture,
    ) -> Result<(Arc<NativeTexture>, Arc<SyncState>)> {
        let mut source = self.source.lock();
        if let Some(binding) = source.as_ref() {
            if binding.texture.id() == texture.id() && binding.view.is_valid() {
                return Ok((Arc::clone(&binding.view), Arc::clone(&binding.sync)));
            }
        }

        let view = provider.open_cook_texture(texture)?;
        let sync = Arc::new(SyncState::new(Arc::clone(&self.semaphores)));
        if let Some(previous) = source.replace(SourceBinding {
            texture: texture.clone(),
            view: Arc::clone(&view),
            sync: Arc::clone(&sync),
        }) {
            tracing::debug!(
                param = %self.param,
                old = %previous.texture.handle(),
                new = %texture.handle(),
                "[ImportedTexture] Cook engine output changed, reopened shared texture"
            );
        }
        Ok((view, sync))
    }

    pub fn source_id(&self) -> Option<CookTextureId> {
        self.source.lock().as_ref().map(|binding| binding.texture.id())
    }

    /// Metadata of the current source, used for fit checks.
    pub fn descriptor(&self) -> Option<TextureDescriptor> {
        self.source.lock().as_ref().map(|binding| *binding.texture.descriptor())
    }
}

impl std::fmt::Debug for ImportedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedTexture")
            .field("param", &self.param)
            .field("source", &self.source_id())
            .finish()
    }
}
