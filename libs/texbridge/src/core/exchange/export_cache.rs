// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cache of exported textures, keyed by host texture object.
//!
//! Entries move through three sets:
//! - `active`: bound to a host texture, looked up by its identity.
//! - `retiring`: detached from their host texture (it was resized, removed
//!   or its handshake failed) and waiting for the cook engine to let go.
//!   Unhealthy entries are freed from here, never handed out again.
//! - `idle`: free for any request of the same size, format and sRGB flag.
//!   Capped; the oldest entries are released first.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::cook::CookInstance;
use crate::core::future::ExchangeFuture;
use crate::core::provider::ResourceProvider;
use crate::core::rhi::{HostTexture, HostTextureId, TextureDescriptor, TextureId};
use crate::core::suspender::SuspendOutcome;
use crate::core::{BridgeError, Result};

use super::ExportedTexture;

/// Result of [`ExportedTextureCache::get_or_create`].
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub texture: Arc<ExportedTexture>,
    pub needs_copy: bool,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportCacheStats {
    pub active: usize,
    pub retiring: usize,
    pub idle: usize,
    pub created: u64,
    pub reused: u64,
    pub hits: u64,
    pub released: u64,
    pub dropped_unhealthy: u64,
}

struct ActiveEntry {
    texture: Arc<ExportedTexture>,
    /// Host resource last copied into the shared texture.
    resource: Option<TextureId>,
    idle_ticks: u32,
}

#[derive(Default)]
struct CacheState {
    active: HashMap<HostTextureId, ActiveEntry>,
    retiring: Vec<Arc<ExportedTexture>>,
    idle: VecDeque<Arc<ExportedTexture>>,
    bindings: HashMap<String, HostTextureId>,
    released: bool,
    stats: ExportCacheStats,
}

impl CacheState {
    fn counts(&self) -> ExportCacheStats {
        ExportCacheStats {
            active: self.active.len(),
            retiring: self.retiring.len(),
            idle: self.idle.len(),
            ..self.stats
        }
    }

    /// Drop `param`'s claim on whatever host texture it was bound to.
    fn unbind(&mut self, param: &str) -> Option<HostTextureId> {
        let previous = self.bindings.remove(param)?;
        if let Some(entry) = self.active.get(&previous) {
            entry.texture.remove_param(param);
        }
        Some(previous)
    }

    /// Take a healthy idle texture matching `desc`, dropping unhealthy ones found on the way.
    fn take_idle(
        &mut self,
        desc: &TextureDescriptor,
        graveyard: &mut Vec<Arc<ExportedTexture>>,
    ) -> Option<Arc<ExportedTexture>> {
        let mut index = 0;
        while index < self.idle.len() {
            if !self.idle[index].is_healthy() {
                if let Some(broken) = self.idle.remove(index) {
                    tracing::warn!(?broken, "[ExportCache] Dropping invalidated texture from the idle export pool");
                    self.stats.dropped_unhealthy += 1;
                    graveyard.push(broken);
                }
                continue;
            }
            if self.idle[index].descriptor().fits(desc) {
                return self.idle.remove(index);
            }
            index += 1;
        }
        None
    }
}

pub struct ExportedTextureCache {
    provider: Arc<dyn ResourceProvider>,
    instance: Arc<dyn CookInstance>,
    capacity: usize,
    keep_alive_ticks: u32,
    state: Mutex<CacheState>,
}

impl ExportedTextureCache {
    pub fn new(
        provider: Arc<dyn ResourceProvider>,
        instance: Arc<dyn CookInstance>,
        capacity: usize,
        keep_alive_ticks: u32,
    ) -> Self {
        Self {
            provider,
            instance,
            capacity,
            keep_alive_ticks,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Find or create the shared texture for `host`, recording `param` as a user.
    pub fn get_or_create(&self, host: &HostTexture, param: &str) -> Result<CacheLookup> {
        let resource = host.resource().ok_or_else(|| {
            BridgeError::InvalidTexture(format!("Host texture '{}' has no GPU resource", host.label()))
        })?;
        let desc = *resource.descriptor();

        let mut graveyard = Vec::new();
        let result = {
            let mut state = self.state.lock();
            if state.released {
                return Err(BridgeError::Cancelled);
            }
            if state.bindings.get(param) != Some(&host.id()) {
                state.unbind(param);
            }
            self.lookup_locked(&mut state, host, resource.id(), &desc, param, &mut graveyard)
        };
        drop(graveyard);
        result
    }

    fn lookup_locked(
        &self,
        state: &mut CacheState,
        host: &HostTexture,
        resource: TextureId,
        desc: &TextureDescriptor,
        param: &str,
        graveyard: &mut Vec<Arc<ExportedTexture>>,
    ) -> Result<CacheLookup> {
        if let Some(entry) = state.active.get_mut(&host.id()) {
            if entry.texture.is_healthy() && entry.texture.descriptor().fits(desc) {
                let needs_copy = entry.resource != Some(resource);
                entry.resource = Some(resource);
                entry.idle_ticks = 0;
                entry.texture.add_param(param);
                let texture = Arc::clone(&entry.texture);
                state.bindings.insert(param.to_string(), host.id());
                state.stats.hits += 1;
                return Ok(CacheLookup {
                    texture,
                    needs_copy,
                    is_new: false,
                });
            }
        }

        if let Some(stale) = state.active.remove(&host.id()) {
            let params = stale.texture.params();
            stale.texture.clear_params();
            if stale.texture.is_healthy() {
                tracing::debug!(host = host.label(), "[ExportCache] Host texture changed shape, retiring its exported texture");
            } else {
                tracing::warn!(
                    host = host.label(),
                    texture = ?stale.texture,
                    "[ExportCache] Exported texture is unusable, retiring it until the cook engine lets go"
                );
            }
            state.retiring.push(stale.texture);
            for other in params.iter().filter(|p| p.as_str() != param) {
                state.bindings.remove(other);
            }
        }

        let (texture, is_new) = match state.take_idle(desc, graveyard) {
            Some(texture) => {
                state.stats.reused += 1;
                (texture, false)
            }
            None => {
                let texture = ExportedTexture::create(self.provider.as_ref(), Arc::clone(&self.instance), desc)?;
                state.stats.created += 1;
                (texture, true)
            }
        };

        texture.add_param(param);
        state.active.insert(
            host.id(),
            ActiveEntry {
                texture: Arc::clone(&texture),
                resource: Some(resource),
                idle_ticks: 0,
            },
        );
        state.bindings.insert(param.to_string(), host.id());
        Ok(CacheLookup {
            texture,
            needs_copy: true,
            is_new,
        })
    }

    /// Forget which texture `param` uses. Returns false if it had none.
    pub fn unbind_param(&self, param: &str) -> bool {
        self.state.lock().unbind(param).is_some()
    }

    /// Per-tick maintenance: move textures nobody uses into the idle pool
    /// once the cook engine let go of them, and trim the pool to capacity.
    pub fn pool_maintenance(&self) {
        let mut graveyard = Vec::new();
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            let keep_alive_ticks = self.keep_alive_ticks;
            let mut to_idle = Vec::new();
            let mut to_retire = Vec::new();
            let mut unhealthy = 0u64;

            state.active.retain(|_, entry| {
                if entry.texture.has_params() {
                    return true;
                }
                if !entry.texture.is_healthy() {
                    tracing::warn!(texture = ?entry.texture, "[ExportCache] Retiring invalidated exported texture");
                    to_retire.push(Arc::clone(&entry.texture));
                    return false;
                }
                if !entry.texture.is_released_by_cook() {
                    return true;
                }
                entry.idle_ticks += 1;
                if entry.idle_ticks <= keep_alive_ticks {
                    return true;
                }
                to_idle.push(Arc::clone(&entry.texture));
                false
            });

            state.retiring.extend(to_retire);
            let mut still_retiring = Vec::new();
            for texture in state.retiring.drain(..) {
                if texture.has_params() || !texture.is_released_by_cook() {
                    still_retiring.push(texture);
                } else if texture.is_healthy() {
                    to_idle.push(texture);
                } else {
                    unhealthy += 1;
                    graveyard.push(texture);
                }
            }
            state.retiring = still_retiring;
            state.stats.dropped_unhealthy += unhealthy;

            state.idle.extend(to_idle);
            while state.idle.len() > self.capacity {
                if let Some(oldest) = state.idle.pop_front() {
                    state.stats.released += 1;
                    graveyard.push(oldest);
                }
            }
        }
        drop(graveyard);
    }

    /// Drop the cache's hold on `host`'s exported texture and unbind it from
    /// the cook engine. The texture is freed once the engine releases it.
    pub fn remove(&self, host: &HostTexture) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.active.remove(&host.id());
            if let Some(entry) = &removed {
                for param in entry.texture.params() {
                    state.bindings.remove(&param);
                }
                state.stats.released += 1;
            }
            removed
        };
        let Some(entry) = removed else {
            return false;
        };

        for param in entry.texture.params() {
            if let Err(e) = self.instance.set_texture_input(&param, None) {
                tracing::warn!(param = %param, "[ExportCache] Failed to unbind removed texture: {}", e);
            }
        }
        entry.texture.clear_params();

        if !entry.texture.is_released_by_cook() {
            let mut state = self.state.lock();
            if !state.released {
                tracing::debug!(texture = ?entry.texture, "[ExportCache] Removed texture still held by the cook engine");
                state.retiring.push(entry.texture);
            }
        }
        true
    }

    /// Release every exported texture. Waits (bounded) for in-flight work
    /// signaled through `drained`, then unbinds the cook engine inputs and
    /// frees the textures. Idempotent.
    pub fn release_all(&self, drained: ExchangeFuture<SuspendOutcome>, timeout: Duration) -> usize {
        let textures: Vec<Arc<ExportedTexture>> = {
            let mut state = self.state.lock();
            if state.released {
                return 0;
            }
            state.released = true;
            state.bindings.clear();
            let mut textures: Vec<_> = state.active.drain().map(|(_, entry)| entry.texture).collect();
            textures.extend(state.retiring.drain(..));
            textures.extend(state.idle.drain(..));
            state.stats.released += textures.len() as u64;
            textures
        };

        match drained.wait_timeout(timeout) {
            Ok(Ok(outcome)) => {
                tracing::debug!(drained = outcome.drained_tasks, "[ExportCache] In-flight exports drained");
            }
            Ok(Err(e)) => tracing::warn!("[ExportCache] Export drain ended early: {}", e),
            Err(_) => tracing::warn!(
                ?timeout,
                "[ExportCache] Timed out waiting for in-flight exports, releasing cached textures anyway"
            ),
        }

        // In-flight exports may have rebound inputs while draining.
        for texture in &textures {
            for param in texture.params() {
                if let Err(e) = self.instance.set_texture_input(&param, None) {
                    tracing::warn!(param = %param, "[ExportCache] Failed to unbind texture input during release: {}", e);
                }
            }
            texture.clear_params();
        }

        let count = textures.len();
        drop(textures);
        tracing::info!(count, "[ExportCache] Released exported textures");
        count
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn stats(&self) -> ExportCacheStats {
        self.state.lock().counts()
    }
}

impl std::fmt::Debug for ExportedTextureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedTextureCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
