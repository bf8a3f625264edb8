// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Command-queue backend: shared timeline fences waited on the queue.

use std::sync::Arc;

use crate::core::cook::{CookInstance, CookTexture, TransferRecord, TransferSync};
use crate::core::rhi::{
    CommandBuffer, GpuDevice, ImageLayout, NativeTexture, PixelFormat, RhiBackend, SemaphoreKind,
    TextureDescriptor,
};
use crate::core::{BridgeError, Result};

use super::{
    CopyDirection, ProviderCore, ProviderSettings, ResourceProvider, SemaphoreCache, TransferJob,
};

pub struct QueuedProvider {
    core: ProviderCore,
}

impl QueuedProvider {
    pub fn new(
        settings: ProviderSettings,
        device: GpuDevice,
        instance: Arc<dyn CookInstance>,
    ) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::new(
                RhiBackend::Queued,
                &PixelFormat::EXCHANGEABLE,
                settings,
                device,
                instance,
            )?,
        })
    }
}

impl ResourceProvider for QueuedProvider {
    fn backend(&self) -> RhiBackend {
        RhiBackend::Queued
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
            .create_shared_texture(desc, self.core.handle_type, false, false)
    }

    fn open_cook_texture(&self, texture: &CookTexture) -> Result<Arc<NativeTexture>> {
        self.core.open_cook_texture(texture, false)
    }

    fn create_host_texture(&self, desc: &TextureDescriptor) -> Result<Arc<NativeTexture>> {
        self.core.device.create_texture(desc, false)
    }

    fn transfer_copy(&self, job: TransferJob<'_>) -> Result<TransferRecord> {
        let mut cmd = CommandBuffer::new(job.label, self.core.wait_timeout);

        if let Some(record) = job.incoming {
            match record.sync {
                TransferSync::Semaphore {
                    handle,
                    kind: SemaphoreKind::Timeline,
                } => {
                    let fence = self.core.semaphores.import(handle)?;
                    cmd.wait_semaphore(&fence, record.value);
                }
                other => {
                    return Err(BridgeError::TransferFailure(format!(
                        "[{}] queued backend only waits on shared timeline fences, got {:?}",
                        job.label, other
                    )));
                }
            }
        }

        match job.direction {
            CopyDirection::ToCook => cmd.copy_texture(job.host, job.shared),
            CopyDirection::FromCook => cmd.copy_texture(job.shared, job.host),
        }

        let fence = job.sync.signal_semaphore(SemaphoreKind::Timeline);
        let handle = fence.os_handle().ok_or_else(|| {
            BridgeError::TransferFailure("Signal fence has no shareable handle".into())
        })?;
        let value = job.sync.next_value(&fence);
        cmd.signal_semaphore(&fence, value);
        cmd.submit()?;

        Ok(TransferRecord {
            old_layout: ImageLayout::General,
            new_layout: self.core.instance.required_layout(),
            sync: TransferSync::Semaphore {
                handle,
                kind: SemaphoreKind::Timeline,
            },
            value,
        })
    }
}
