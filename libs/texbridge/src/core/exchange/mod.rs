// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Export and import orchestration: caches, pools and per-parameter ordering.

mod export_cache;
mod exported_texture;
mod exporter;
mod frame_updates;
mod import_pool;
mod imported_texture;
mod importer;
mod link;

use crate::core::cook::{CookInstance, CookTexture, TransferRecord};

pub use export_cache::{CacheLookup, ExportCacheStats, ExportedTextureCache};
pub use exported_texture::ExportedTexture;
pub use exporter::{ExportOutput, ExportParams, TextureExporter};
pub use frame_updates::{FrameUpdateTracker, InputUpdate, InputUpdateId};
pub use import_pool::{ImportPool, ImportPoolStats, PoolEntry};
pub use imported_texture::ImportedTexture;
pub use importer::{ImportOutput, ImportParams, TextureImporter};
pub use link::{LinkCompletion, LinkJob, LinkSubmit, ParameterLinks};

/// Give the cook engine back a texture whose copy failed after its pending
/// handoff was consumed. The engine's own record is returned unchanged.
pub(crate) fn hand_back(instance: &dyn CookInstance, texture: &CookTexture, record: TransferRecord, param: &str) {
    match instance.add_texture_transfer(texture, record) {
        Ok(()) => tracing::debug!(
            param,
            handle = %texture.handle(),
            "[Exchange] Returned texture to the cook engine after a failed copy"
        ),
        Err(e) => tracing::warn!(param, "[Exchange] Failed to return texture to the cook engine: {}", e),
    }
}
