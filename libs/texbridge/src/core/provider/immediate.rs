// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Legacy immediate-mode backend: keyed mutexes with CPU-side waits.

use std::sync::Arc;

use crate::core::cook::{CookInstance, CookTexture, TransferRecord, TransferSync};
use crate::core::rhi::{
    CommandBuffer, GpuDevice, ImageLayout, KeyedMutex, NativeTexture, PixelFormat, RhiBackend,
    TextureDescriptor,
};
use crate::core::{BridgeError, Result};

use super::{
    CopyDirection, ProviderCore, ProviderSettings, ResourceProvider, SemaphoreCache, TransferJob,
};

/// Shared resources on the legacy API cannot use two-channel formats.
const IMMEDIATE_FORMATS: [PixelFormat; 8] = [
    PixelFormat::R8Unorm,
    PixelFormat::Rgba8Unorm,
    PixelFormat::Bgra8Unorm,
    PixelFormat::Rgb10A2Unorm,
    PixelFormat::R16Float,
    PixelFormat::Rgba16Float,
    PixelFormat::R32Float,
    PixelFormat::Rgba32Float,
];

pub struct ImmediateProvider {
    core: ProviderCore,
}

impl ImmediateProvider {
    pub fn new(
        settings: ProviderSettings,
        device: GpuDevice,
        instance: Arc<dyn CookInstance>,
    ) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::new(RhiBackend::Immediate, &IMMEDIATE_FORMATS, settings, device, instance)?,
        })
    }

    fn keyed_mutex<'a>(&self, shared: &'a NativeTexture) -> Result<&'a KeyedMutex> {
        shared.keyed_mutex().ok_or_else(|| {
            BridgeError::TransferFailure(format!(
                "Shared texture {:?} was created without a keyed mutex",
                shared.id()
            ))
        })
    }
}

impl ResourceProvider for ImmediateProvider {
    fn backend(&self) -> RhiBackend {
        RhiBackend::Immediate
    }

    fn device(&self) -> &GpuDevice {
        &self.core.device
    }

    fn semaphores(&self) -> &Arc<SemaphoreCache> {
        &self.core.semaphores
    }

    fn exchangeable_formats(&self) -> &[PixelFormat] {
        &self.core.formats
    }

    fn create_shared_texture(&self, desc: &TextureDescriptor) -> Result<Arc<NativeTexture>> {
        self.core.check_format(desc)?;
        self.core
            .device
            .create_shared_texture(desc, self.core.handle_type, true, false)
    }

    fn open_cook_texture(&self, texture: &CookTexture) -> Result<Arc<NativeTexture>> {
        self.core.open_cook_texture(texture, false)
    }

    fn create_host_texture(&self, desc: &TextureDescriptor) -> Result<Arc<NativeTexture>> {
        self.core.device.create_texture(desc, false)
    }

    fn transfer_copy(&self, job: TransferJob<'_>) -> Result<TransferRecord> {
        let mutex = self.keyed_mutex(job.shared)?;
        let key = match job.incoming {
            Some(TransferRecord {
                sync: TransferSync::KeyedMutex,
                value,
                ..
            }) => value,
            Some(record) => {
                return Err(BridgeError::TransferFailure(format!(
                    "[{}] immediate backend cannot wait on {:?}",
                    job.label, record.sync
                )));
            }
            None => job.sync.key(),
        };

        // CPU wait: the legacy API has no queue-side wait on a keyed mutex.
        mutex.acquire(key, self.core.wait_timeout)?;

        let mut cmd = CommandBuffer::new(job.label, self.core.wait_timeout);
        match job.direction {
            CopyDirection::ToCook => cmd.copy_texture(job.host, job.shared),
            CopyDirection::FromCook => cmd.copy_texture(job.shared, job.host),
        }
        if let Err(e) = cmd.submit() {
            // Nothing was written; hand the mutex back under the same key.
            mutex.release(key)?;
            job.sync.set_key(key);
            return Err(e);
        }

        let next = key + 1;
        mutex.release(next)?;
        job.sync.set_key(next);

        Ok(TransferRecord {
            old_layout: ImageLayout::General,
            new_layout: self.core.instance.required_layout(),
            sync: TransferSync::KeyedMutex,
            value: next,
        })
    }
}
