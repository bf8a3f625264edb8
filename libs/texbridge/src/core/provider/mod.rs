// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-backend resource providers.
//!
//! A provider creates the host's shared textures, opens the cook engine's
//! textures, and performs the ownership-transfer handshake around each copy
//! in whatever way its graphics backend synchronizes: keyed mutexes with CPU
//! waits ([`ImmediateProvider`]), shared timeline fences waited on the queue
//! ([`QueuedProvider`]), or layout barriers plus binary/timeline semaphores
//! ([`ExplicitProvider`]). The backend is chosen once, at bridge
//! construction, through [`create_resource_provider`].

mod explicit;
mod immediate;
mod queued;
mod semaphore_cache;

pub use explicit::ExplicitProvider;
pub use immediate::ImmediateProvider;
pub use queued::QueuedProvider;
pub use semaphore_cache::{SemaphoreCache, SemaphoreCacheStats};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::cook::{CookInstance, CookTexture, TransferRecord};
use crate::core::rhi::{
    GpuDevice, HandleType, NativeTexture, PixelFormat, RhiBackend, Semaphore, SemaphoreKind,
    TextureDescriptor,
};
use crate::core::{BridgeError, Result};

/// Direction of one copy across the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Host texture → shared texture the cook engine reads.
    ToCook,
    /// Cook engine's shared texture → host-owned destination.
    FromCook,
}

/// Host-side signaling state of one shared texture.
///
/// Owned by the exported/imported texture wrapper. The signal semaphore is
/// created lazily and goes back to the [`SemaphoreCache`] when this is dropped.
pub struct SyncState {
    cache: Arc<SemaphoreCache>,
    inner: Mutex<SyncInner>,
}

#[derive(Default)]
struct SyncInner {
    semaphore: Option<Arc<Semaphore>>,
    value: u64,
    key: u64,
}

impl SyncState {
    pub fn new(cache: Arc<SemaphoreCache>) -> Self {
        Self {
            cache,
            inner: Mutex::new(SyncInner::default()),
        }
    }

    /// Signal semaphore of `kind`, swapping a pooled one in if the kind changed.
    pub fn signal_semaphore(&self, kind: SemaphoreKind) -> Arc<Semaphore> {
        let mut inner = self.inner.lock();
        match &inner.semaphore {
            Some(semaphore) if semaphore.kind() == kind => Arc::clone(semaphore),
            _ => {
                let semaphore = self.cache.acquire_signal(kind);
                if let Some(previous) = inner.semaphore.replace(Arc::clone(&semaphore)) {
                    self.cache.recycle(previous);
                }
                semaphore
            }
        }
    }

    /// Next timeline value to signal on `semaphore`.
    pub fn next_value(&self, semaphore: &Semaphore) -> u64 {
        let mut inner = self.inner.lock();
        inner.value = inner.value.max(semaphore.value()) + 1;
        inner.value
    }

    pub fn value(&self) -> u64 {
        self.inner.lock().value
    }

    /// Key the host last released the keyed mutex with.
    pub fn key(&self) -> u64 {
        self.inner.lock().key
    }

    pub fn set_key(&self, key: u64) {
        self.inner.lock().key = key;
    }

    pub fn has_semaphore(&self) -> bool {
        self.inner.lock().semaphore.is_some()
    }
}

impl Drop for SyncState {
    fn drop(&mut self) {
        if let Some(semaphore) = self.inner.get_mut().semaphore.take() {
            self.cache.recycle(semaphore);
        }
    }
}

impl std::fmt::Debug for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SyncState")
            .field("semaphore", &inner.semaphore.as_ref().map(|s| s.id()))
            .field("value", &inner.value)
            .field("key", &inner.key)
            .finish()
    }
}

/// Everything one handshake-wrapped copy needs. Runs on the render queue.
pub struct TransferJob<'a> {
    pub direction: CopyDirection,
    /// Host-side texture: copy source for `ToCook`, destination for `FromCook`.
    pub host: &'a Arc<NativeTexture>,
    /// The host's view of the shared allocation.
    pub shared: &'a Arc<NativeTexture>,
    /// Handoff returned by the cook engine's transfer query, if any.
    pub incoming: Option<TransferRecord>,
    pub sync: &'a SyncState,
    pub label: &'a str,
}

/// Capability interface implemented once per graphics backend.
pub trait ResourceProvider: Send + Sync {
    fn backend(&self) -> RhiBackend;

    fn device(&self) -> &GpuDevice;

    fn semaphores(&self) -> &Arc<SemaphoreCache>;

    /// Formats both this backend and the cook engine can share.
    fn exchangeable_formats(&self) -> &[PixelFormat];

    fn is_exportable(&self, format: PixelFormat) -> bool {
        self.exchangeable_formats().contains(&format)
    }

    fn is_importable(&self, format: PixelFormat) -> bool {
        self.exchangeable_formats().contains(&format)
    }

    /// Allocate a shared texture the cook engine can open.
    fn create_shared_texture(&self, desc: &TextureDescriptor) -> Result<Arc<NativeTexture>>;

    /// Open the host's view of a texture shared by the cook engine.
    fn open_cook_texture(&self, texture: &CookTexture) -> Result<Arc<NativeTexture>>;

    /// Allocate a host-owned texture (import destination).
    fn create_host_texture(&self, desc: &TextureDescriptor) -> Result<Arc<NativeTexture>>;

    /// Acquire the shared texture per `job.incoming`, copy, and release it
    /// again. Returns the record to hand to the cook engine.
    fn transfer_copy(&self, job: TransferJob<'_>) -> Result<TransferRecord>;
}

/// State every backend provider carries.
pub(crate) struct ProviderCore {
    pub backend: RhiBackend,
    pub device: GpuDevice,
    pub instance: Arc<dyn CookInstance>,
    pub semaphores: Arc<SemaphoreCache>,
    pub handle_type: HandleType,
    pub wait_timeout: Duration,
    pub formats: Vec<PixelFormat>,
}

impl ProviderCore {
    /// Bind the cook engine's context to the host device and negotiate formats.
    pub fn new(
        backend: RhiBackend,
        backend_formats: &[PixelFormat],
        settings: ProviderSettings,
        device: GpuDevice,
        instance: Arc<dyn CookInstance>,
    ) -> Result<Self> {
        instance.create_context(backend, device.uuid())?;

        let cook_formats = instance.supported_formats(backend);
        let formats: Vec<PixelFormat> = backend_formats
            .iter()
            .copied()
            .filter(|format| cook_formats.contains(format))
            .collect();
        if formats.is_empty() {
            tracing::warn!(%backend, "No pixel format is exchangeable with the cook engine");
        }

        tracing::info!(
            %backend,
            device = %device.uuid(),
            formats = formats.len(),
            "Resource provider ready"
        );
        Ok(Self {
            backend,
            semaphores: Arc::new(SemaphoreCache::new(device.clone(), settings.semaphore_pool_capacity)),
            device,
            instance,
            handle_type: settings.handle_type,
            wait_timeout: settings.wait_timeout,
            formats,
        })
    }

    pub fn open_cook_texture(&self, texture: &CookTexture, tracks_layout: bool) -> Result<Arc<NativeTexture>> {
        if !texture.format().is_exchangeable() {
            return Err(BridgeError::UnsupportedFormat {
                format: texture.format(),
                backend: self.backend.as_str(),
            });
        }
        self.device.open_shared_texture(texture.shared(), tracks_layout)
    }

    /// Reject formats the cook engine cannot share on this backend.
    pub fn check_format(&self, desc: &TextureDescriptor) -> Result<()> {
        if !self.formats.contains(&desc.format) {
            return Err(BridgeError::UnsupportedFormat {
                format: desc.format,
                backend: self.backend.as_str(),
            });
        }
        Ok(())
    }
}

/// Construction settings shared by every provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSettings {
    pub handle_type: HandleType,
    pub wait_timeout: Duration,
    pub semaphore_pool_capacity: usize,
    /// Semaphore flavor the explicit backend signals with.
    pub semaphore_kind: SemaphoreKind,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            handle_type: HandleType::Duplicate,
            wait_timeout: Duration::from_secs(5),
            semaphore_pool_capacity: 20,
            semaphore_kind: SemaphoreKind::Timeline,
        }
    }
}

/// Create the provider for the host's active backend.
pub fn create_resource_provider(
    backend: RhiBackend,
    settings: ProviderSettings,
    device: GpuDevice,
    instance: Arc<dyn CookInstance>,
) -> Result<Arc<dyn ResourceProvider>> {
    let provider: Arc<dyn ResourceProvider> = match backend {
        RhiBackend::Immediate => Arc::new(ImmediateProvider::new(settings, device, instance)?),
        RhiBackend::Queued => Arc::new(QueuedProvider::new(settings, device, instance)?),
        RhiBackend::Explicit => Arc::new(ExplicitProvider::new(settings, device, instance)?),
    };
    Ok(provider)
}

/// Create the provider for a backend given by name (`d3d11`, `vulkan`, ...).
pub fn create_resource_provider_by_name(
    backend_name: &str,
    settings: ProviderSettings,
    device: GpuDevice,
    instance: Arc<dyn CookInstance>,
) -> Result<Arc<dyn ResourceProvider>> {
    let backend = backend_name
        .parse::<RhiBackend>()
        .map_err(BridgeError::UnsupportedOperation)?;
    create_resource_provider(backend, settings, device, instance)
}
