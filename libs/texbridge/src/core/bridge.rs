// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! [`TextureBridge`]: the subsystem's entry point.
//!
//! Construction binds the cook engine to the host device through the
//! backend's resource provider and starts the render queue. [`shutdown`]
//! (also run on drop) refuses new work, drains in-flight exchanges, releases
//! every pooled resource and stops the queue, in that order.
//!
//! [`shutdown`]: TextureBridge::shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::config::BridgeConfig;
use crate::core::cook::CookInstance;
use crate::core::exchange::{
    ExportCacheStats, ExportOutput, ExportParams, ExportedTextureCache, ImportOutput, ImportParams,
    ImportPool, ImportPoolStats, TextureExporter, TextureImporter,
};
use crate::core::frame::FrameData;
use crate::core::future::ExchangeFuture;
use crate::core::provider::{
    create_resource_provider, ProviderSettings, ResourceProvider, SemaphoreCacheStats,
};
use crate::core::rhi::{DeviceStats, GpuDevice, HostTexture, RenderQueue, RhiBackend};
use crate::core::suspender::{SuspendOutcome, TaskSuspender};
use crate::core::Result;

/// Snapshot of the bridge's resource bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub backend: RhiBackend,
    pub export: ExportCacheStats,
    pub import: ImportPoolStats,
    pub semaphores: SemaphoreCacheStats,
    pub device: DeviceStats,
    pub active_tasks: usize,
    pub suspended: bool,
}

pub struct TextureBridge {
    config: BridgeConfig,
    provider: Arc<dyn ResourceProvider>,
    instance: Arc<dyn CookInstance>,
    queue: Arc<RenderQueue>,
    suspender: TaskSuspender,
    exporter: TextureExporter,
    importer: TextureImporter,
    shut_down: AtomicBool,
}

impl TextureBridge {
    /// Bridge on the backend the configuration resolves to.
    pub fn new(config: BridgeConfig, device: GpuDevice, instance: Arc<dyn CookInstance>) -> Result<Self> {
        let backend = config.resolve_backend();
        let settings = config.provider_settings();
        Self::with_backend(config, backend, settings, device, instance)
    }

    pub fn with_backend(
        config: BridgeConfig,
        backend: RhiBackend,
        settings: ProviderSettings,
        device: GpuDevice,
        instance: Arc<dyn CookInstance>,
    ) -> Result<Self> {
        config.validate()?;
        let provider = create_resource_provider(backend, settings, device, Arc::clone(&instance))?;
        let queue = Arc::new(RenderQueue::new(format!("texbridge-{}", backend))?);
        let suspender = TaskSuspender::new();

        let cache = Arc::new(ExportedTextureCache::new(
            Arc::clone(&provider),
            Arc::clone(&instance),
            config.export_pool_capacity,
            config.keep_alive_ticks,
        ));
        let exporter = TextureExporter::new(
            Arc::clone(&provider),
            Arc::clone(&instance),
            Arc::clone(&queue),
            cache,
            suspender.clone(),
        );
        let importer = TextureImporter::new(
            Arc::clone(&provider),
            Arc::clone(&instance),
            Arc::clone(&queue),
            Arc::new(ImportPool::new(config.import_pool_capacity)),
            suspender.clone(),
        );

        tracing::info!(%backend, "[TextureBridge] Ready");
        Ok(Self {
            config,
            provider,
            instance,
            queue,
            suspender,
            exporter,
            importer,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn backend(&self) -> RhiBackend {
        self.provider.backend()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn ResourceProvider> {
        &self.provider
    }

    pub fn instance(&self) -> &Arc<dyn CookInstance> {
        &self.instance
    }

    pub fn render_queue(&self) -> &Arc<RenderQueue> {
        &self.queue
    }

    /// Send a host texture to a cook engine input.
    pub fn export_texture(&self, params: ExportParams) -> ExchangeFuture<ExportOutput> {
        self.exporter.export(params)
    }

    /// Copy a cook engine output into a host texture.
    pub fn import_texture(&self, params: ImportParams) -> ExchangeFuture<ImportOutput> {
        self.importer.import(params)
    }

    /// Refuse new exchanges and drop queued ones. Resolves once every
    /// exchange already started has submitted its GPU work.
    pub fn suspend_async_tasks(&self) -> ExchangeFuture<SuspendOutcome> {
        let drained = self.suspender.suspend();
        let cancelled = self.exporter.cancel_queued() + self.importer.cancel_queued();
        if cancelled > 0 {
            tracing::debug!(cancelled, "[TextureBridge] Dropped queued exchanges");
        }
        drained
    }

    pub fn is_suspended(&self) -> bool {
        self.suspender.is_suspended()
    }

    /// Per-tick pool upkeep.
    pub fn texture_pool_maintenance(&self, frame: FrameData) {
        self.exporter.cache().pool_maintenance();
        let trimmed = self.importer.pool().maintenance();
        tracing::trace!(%frame, trimmed, "[TextureBridge] Pool maintenance");
    }

    /// Stop pooling `texture`. Returns false if no pool knew it.
    pub fn remove_from_pool(&self, texture: &HostTexture) -> bool {
        let exported = self.exporter.cache().remove(texture);
        let imported = self.importer.pool().remove(texture);
        exported || imported
    }

    /// Resolves once every texture input update for `frame` and earlier
    /// frames is terminal.
    pub fn frame_finished(&self, frame: FrameData) -> ExchangeFuture<FrameData> {
        self.exporter.on_updates_finished(frame)
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            backend: self.backend(),
            export: self.exporter.cache().stats(),
            import: self.importer.pool().stats(),
            semaphores: self.provider.semaphores().stats(),
            device: self.provider.device().stats(),
            active_tasks: self.suspender.active_tasks(),
            suspended: self.suspender.is_suspended(),
        }
    }

    /// Tear down in order. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(backend = %self.backend(), "[TextureBridge] Shutting down");

        let drained = self.suspend_async_tasks();
        let exported = self
            .exporter
            .cache()
            .release_all(drained, self.config.suspend_timeout());
        let imported = self.importer.pool().release_all();
        self.importer.clear_sources();
        self.queue.shutdown();
        self.provider.semaphores().clear();

        tracing::info!(exported, imported, "[TextureBridge] Shut down");
    }
}

impl Drop for TextureBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TextureBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureBridge")
            .field("backend", &self.backend())
            .field("suspended", &self.is_suspended())
            .field("shut_down", &self.shut_down.load(Ordering::Acquire))
            .finish()
    }
}
