// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Semaphore bridge between the host and the OS handle domain.
//!
//! Signal semaphores the host exports are pooled per kind and handed out
//! again once the texture that used them is freed. Semaphores the cook
//! engine exports are imported once per handle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::rhi::{GpuDevice, OsHandle, Semaphore, SemaphoreKind};
use crate::core::Result;

/// Counters for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemaphoreCacheStats {
    pub created: u64,
    pub reused: u64,
    pub imported: u64,
    pub import_hits: u64,
}

#[derive(Default)]
struct CacheState {
    free: HashMap<SemaphoreKind, Vec<Arc<Semaphore>>>,
    imported: HashMap<OsHandle, Arc<Semaphore>>,
    stats: SemaphoreCacheStats,
}

pub struct SemaphoreCache {
    device: GpuDevice,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl SemaphoreCache {
    pub fn new(device: GpuDevice, capacity: usize) -> Self {
        Self {
            device,
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// An exportable semaphore for signaling the cook engine.
    pub fn acquire_signal(&self, kind: SemaphoreKind) -> Arc<Semaphore> {
        let mut state = self.state.lock();
        if let Some(semaphore) = state.free.get_mut(&kind).and_then(Vec::pop) {
            state.stats.reused += 1;
            return semaphore;
        }
        state.stats.created += 1;
        drop(state);
        self.device.create_semaphore(kind, true)
    }

    /// Return a signal semaphore the cook engine no longer references.
    ///
    /// A binary semaphore still carrying an unconsumed signal is retired
    /// instead of pooled.
    pub fn recycle(&self, semaphore: Arc<Semaphore>) {
        if semaphore.kind() == SemaphoreKind::Binary && semaphore.is_signaled() {
            self.retire(&semaphore);
            return;
        }
        let mut state = self.state.lock();
        let free = state.free.entry(semaphore.kind()).or_default();
        if free.len() < self.capacity {
            free.push(semaphore);
        } else {
            drop(state);
            self.retire(&semaphore);
        }
    }

    fn retire(&self, semaphore: &Semaphore) {
        if let Some(handle) = semaphore.os_handle() {
            self.device.close_handle(handle);
        }
    }

    /// Import a semaphore exported by the cook engine, reusing the previous
    /// import for an unchanged handle.
    pub fn import(&self, handle: OsHandle) -> Result<Arc<Semaphore>> {
        let mut state = self.state.lock();
        if let Some(semaphore) = state.imported.get(&handle) {
            let semaphore = Arc::clone(semaphore);
            state.stats.import_hits += 1;
            return Ok(semaphore);
        }
        let semaphore = self.device.import_semaphore(handle)?;
        state.imported.insert(handle, Arc::clone(&semaphore));
        state.stats.imported += 1;
        tracing::trace!(%handle, kind = ?semaphore.kind(), "[SemaphoreCache] Imported semaphore");
        Ok(semaphore)
    }

    /// Drop the import for a handle the cook engine closed.
    pub fn forget(&self, handle: OsHandle) -> bool {
        self.state.lock().imported.remove(&handle).is_some()
    }

    /// Drop every pooled and imported semaphore.
    pub fn clear(&self) {
        let free: Vec<Arc<Semaphore>> = {
            let mut state = self.state.lock();
            state.imported.clear();
            state.free.drain().flat_map(|(_, list)| list).collect()
        };
        for semaphore in free {
            self.retire(&semaphore);
        }
    }

    pub fn stats(&self) -> SemaphoreCacheStats {
        self.state.lock().stats
    }
}

impl std::fmt::Debug for SemaphoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphoreCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_semaphores_are_pooled_per_kind() {
        let cache = SemaphoreCache::new(GpuDevice::new(), 4);
        let timeline = cache.acquire_signal(SemaphoreKind::Timeline);
        let id = timeline.id();
        cache.recycle(timeline);

        assert_ne!(cache.acquire_signal(SemaphoreKind::Binary).id(), id);
        assert_eq!(cache.acquire_signal(SemaphoreKind::Timeline).id(), id);
        let stats = cache.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_signaled_binary_is_retired() {
        let device = GpuDevice::new();
        let cache = SemaphoreCache::new(device.clone(), 4);
        let binary = cache.acquire_signal(SemaphoreKind::Binary);
        let handle = binary.os_handle().unwrap();
        binary.signal(0).unwrap();
        cache.recycle(binary);
        assert!(device.import_semaphore(handle).is_err());
        assert_eq!(cache.stats().reused, 0);
    }

    #[test]
    fn test_import_cached_by_handle() {
        let device = GpuDevice::new();
        let cache = SemaphoreCache::new(device.clone(), 4);
        let exported = device.create_semaphore(SemaphoreKind::Timeline, true);
        let handle = exported.os_handle().unwrap();

        let first = cache.import(handle).unwrap();
        let second = cache.import(handle).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().imported, 1);
        assert_eq!(cache.stats().import_hits, 1);

        assert!(cache.forget(handle));
        assert!(!cache.forget(handle));
    }
}
