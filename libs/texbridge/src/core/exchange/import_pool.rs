// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pool of host-owned import destinations.
//!
//! Each output parameter has a current destination: the texture last handed
//! to the host. When a newer import for the parameter lands in a different
//! destination, the previous one returns to the idle pool stamped with the
//! frame it was returned at. A pooled entry is only handed out again to a
//! request for a strictly later frame.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::frame::FrameData;
use crate::core::provider::ResourceProvider;
use crate::core::rhi::{HostTexture, TextureDescriptor};
use crate::core::{BridgeError, Result};

static NEXT_DESTINATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportPoolStats {
    pub idle: usize,
    pub current: usize,
    pub created: u64,
    pub reused: u64,
    pub released: u64,
}

/// A destination waiting in the pool.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub texture: HostTexture,
    /// Frame at which the entry was returned.
    pub frame: FrameData,
}

impl PoolEntry {
    fn is_reusable_for(&self, desc: &TextureDescriptor, request: FrameData) -> bool {
        self.frame.allows_reuse_at(request)
            && self.texture.descriptor().is_some_and(|current| current.fits(desc))
    }

    fn is_valid(&self) -> bool {
        self.texture.resource().is_some_and(|resource| resource.is_valid())
    }
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<PoolEntry>,
    current: HashMap<String, HostTexture>,
    released: bool,
    stats: ImportPoolStats,
}

impl PoolState {
    fn push_idle(&mut self, texture: HostTexture, frame: FrameData) {
        if self.idle.iter().any(|entry| entry.texture.ptr_eq(&texture)) {
            return;
        }
        self.idle.push_back(PoolEntry { texture, frame });
    }

    fn is_current(&self, texture: &HostTexture) -> bool {
        self.current.values().any(|current| current.ptr_eq(texture))
    }
}

pub struct ImportPool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl ImportPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Take a pooled destination matching `desc` exactly, or allocate one.
    /// Returns the texture and whether it came from the pool.
    pub fn acquire(
        &self,
        provider: &dyn ResourceProvider,
        param: &str,
        desc: &TextureDescriptor,
        frame: FrameData,
    ) -> Result<(HostTexture, bool)> {
        let mut dropped = Vec::new();
        {
            let mut state = self.state.lock();
            if state.released {
                return Err(BridgeError::Cancelled);
            }
            let mut index = 0;
            while index < state.idle.len() {
                if !state.idle[index].is_valid() {
                    if let Some(entry) = state.idle.remove(index) {
                        tracing::warn!(texture = ?entry.texture, "[ImportPool] Dropping invalidated import destination");
                        dropped.push(entry);
                    }
                    continue;
                }
                if state.idle[index].is_reusable_for(desc, frame) {
                    if let Some(entry) = state.idle.remove(index) {
                        state.stats.reused += 1;
                        return Ok((entry.texture, true));
                    }
                }
                index += 1;
            }
        }
        drop(dropped);

        let resource = provider.create_host_texture(desc)?;
        let label = format!("{}-import-{}", param, NEXT_DESTINATION.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            param,
            %frame,
            width = desc.width,
            height = desc.height,
            format = %desc.format,
            "[ImportPool] Allocated import destination"
        );
        self.state.lock().stats.created += 1;
        Ok((HostTexture::new(label, resource), false))
    }

    /// Settle an import into `destination` for `param` at `frame`.
    ///
    /// On success `destination` becomes the parameter's current texture and
    /// the previous one returns to the pool. On failure `destination` itself
    /// goes back unless it already is the current texture.
    pub fn settle(&self, param: &str, destination: &HostTexture, frame: FrameData, succeeded: bool) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        if succeeded {
            let previous = state.current.insert(param.to_string(), destination.clone());
            if let Some(previous) = previous {
                if !previous.ptr_eq(destination) && !state.is_current(&previous) {
                    state.push_idle(previous, frame);
                }
            }
        } else if !state.is_current(destination) {
            state.push_idle(destination.clone(), frame);
        }
    }

    pub fn current(&self, param: &str) -> Option<HostTexture> {
        self.state.lock().current.get(param).cloned()
    }

    /// Take `texture` out of the pool for good; the caller keeps it. The
    /// parameter it was current for gets a fresh destination next import.
    pub fn remove(&self, texture: &HostTexture) -> bool {
        let mut state = self.state.lock();
        let before = state.idle.len() + state.current.len();
        state.idle.retain(|entry| !entry.texture.ptr_eq(texture));
        state.current.retain(|_, current| !current.ptr_eq(texture));
        before != state.idle.len() + state.current.len()
    }

    /// Drop invalid entries and trim the idle pool to capacity, oldest first.
    pub fn maintenance(&self) -> usize {
        let dropped: Vec<PoolEntry> = {
            let mut state = self.state.lock();
            let (valid, mut dropped): (Vec<PoolEntry>, Vec<PoolEntry>) =
                state.idle.drain(..).partition(|entry| entry.is_valid());
            state.idle = valid.into();
            while state.idle.len() > self.capacity {
                if let Some(oldest) = state.idle.pop_front() {
                    dropped.push(oldest);
                }
            }
            state.stats.released += dropped.len() as u64;
            dropped
        };
        dropped.len()
    }

    /// Forget every destination. Idempotent.
    pub fn release_all(&self) -> usize {
        let mut state = self.state.lock();
        if state.released {
            return 0;
        }
        state.released = true;
        let count = state.idle.len() + state.current.len();
        state.idle.clear();
        state.current.clear();
        state.stats.released += count as u64;
        tracing::info!(count, "[ImportPool] Released import destinations");
        count
    }

    pub fn stats(&self) -> ImportPoolStats {
        let state = self.state.lock();
        ImportPoolStats {
            idle: state.idle.len(),
            current: state.current.len(),
            ..state.stats
        }
    }
}

impl std::fmt::Debug for ImportPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportPool")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
