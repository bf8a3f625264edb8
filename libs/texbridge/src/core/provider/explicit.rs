// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Low-level explicit backend: image layout barriers plus binary or timeline
//! semaphores.
//!
//! Every image is layout-tracked. The host moves the shared image into a
//! transfer layout for the copy and back into the cook engine's required
//! layout before handing it over. Binary semaphores carry a single pending
//! signal: a wait consumes it, and the host re-arms its own semaphore on each
//! release unless the previous signal was never consumed.

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

pub struct ExplicitProvider {
    core: ProviderCore,
    semaphore_kind: SemaphoreKind,
}

impl ExplicitProvider {
    pub fn new(
        settings: ProviderSettings,
        device: GpuDevice,
        instance: Arc<dyn CookInstance>,
    ) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::new(
                RhiBackend::Explicit,
                &PixelFormat::EXCHANGEABLE,
                settings,
                device,
                instance,
            )?,
            semaphore_kind: settings.semaphore_kind,
        })
    }
}

/// Layout to put a host image back into after it served as a copy operand.
fn restored(layout: ImageLayout) -> ImageLayout {
    match layout {
        ImageLayout::Undefined => ImageLayout::ShaderRead,
        other => other,
    }
}

impl ResourceProvider for ExplicitProvider {
    fn backend(&self) -> RhiBackend {
        RhiBackend::Explicit
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
            .create_shared_texture(desc, self.core.handle_type, false, true)
    }

    fn open_cook_texture(&self, texture: &CookTexture) -> Result<Arc<NativeTexture>> {
        self.core.open_cook_texture(texture, true)
    }

    fn create_host_texture(&self, desc: &TextureDescriptor) -> Result<Arc<NativeTexture>> {
        let texture = self.core.device.create_texture(desc, true)?;
        // Initialize before any queued command references it.
        let mut cmd = CommandBuffer::new("init-host-texture", self.core.wait_timeout);
        cmd.transition(&texture, ImageLayout::Undefined, ImageLayout::ShaderRead);
        cmd.submit()?;
        Ok(texture)
    }

    fn transfer_copy(&self, job: TransferJob<'_>) -> Result<TransferRecord> {
        let mut cmd = CommandBuffer::new(job.label, self.core.wait_timeout);
        let required = self.core.instance.required_layout();

        let kind = match job.incoming {
            Some(record) => match record.sync {
                TransferSync::Semaphore { handle, kind } => {
                    let semaphore = self.core.semaphores.import(handle)?;
                    cmd.wait_semaphore(&semaphore, record.value);
                    kind
                }
                TransferSync::KeyedMutex => {
                    return Err(BridgeError::TransferFailure(format!(
                        "[{}] explicit backend cannot wait on a keyed mutex",
                        job.label
                    )));
                }
            },
            None => self.semaphore_kind,
        };

        let host_layout = job.host.layout();
        match job.direction {
            CopyDirection::ToCook => {
                // Contents are overwritten, so the shared image's previous layout is discarded.
                cmd.transition(job.shared, ImageLayout::Undefined, ImageLayout::TransferDst);
                cmd.transition(job.host, host_layout, ImageLayout::TransferSrc);
                cmd.copy_texture(job.host, job.shared);
                cmd.transition(job.host, ImageLayout::TransferSrc, restored(host_layout));
                cmd.transition(job.shared, ImageLayout::TransferDst, required);
            }
            CopyDirection::FromCook => {
                cmd.transition(job.shared, job.shared.layout(), ImageLayout::TransferSrc);
                cmd.transition(job.host, ImageLayout::Undefined, ImageLayout::TransferDst);
                cmd.copy_texture(job.shared, job.host);
                cmd.transition(job.host, ImageLayout::TransferDst, ImageLayout::ShaderRead);
                cmd.transition(job.shared, ImageLayout::TransferSrc, required);
            }
        }

        let semaphore = job.sync.signal_semaphore(kind);
        let handle = semaphore.os_handle().ok_or_else(|| {
            BridgeError::TransferFailure("Signal semaphore has no shareable handle".into())
        })?;
        let value = match kind {
            SemaphoreKind::Timeline => {
                let value = job.sync.next_value(&semaphore);
                cmd.signal_semaphore(&semaphore, value);
                value
            }
            SemaphoreKind::Binary => {
                if semaphore.is_signaled() {
                    tracing::debug!(label = job.label, "Previous binary signal still pending, not re-arming");
                } else {
                    cmd.signal_semaphore(&semaphore, 0);
                }
                0
            }
        };
        cmd.submit()?;

        Ok(TransferRecord {
            old_layout: required,
            new_layout: required,
            sync: TransferSync::Semaphore { handle, kind },
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cook::LoopbackInstance;
    use crate::core::provider::SyncState;
    use std::time::Duration;

    fn provider(kind: SemaphoreKind) -> ExplicitProvider {
        let device = GpuDevice::new();
        let instance = Arc::new(LoopbackInstance::new(device.clone()));
        let settings = ProviderSettings {
            wait_timeout: Duration::from_millis(50),
            semaphore_kind: kind,
            ..Default::default()
        };
        ExplicitProvider::new(settings, device, instance).unwrap()
    }

    fn export(provider: &ExplicitProvider, host: &Arc<NativeTexture>, shared: &Arc<NativeTexture>, sync: &SyncState) -> Result<TransferRecord> {
        provider.transfer_copy(TransferJob {
            direction: CopyDirection::ToCook,
            host,
            shared,
            incoming: None,
            sync,
            label: "export",
        })
    }

    #[test]
    fn test_export_leaves_required_layout() {
        let provider = provider(SemaphoreKind::Timeline);
        let desc = TextureDescriptor::new(2, 1, PixelFormat::Rg8Unorm);
        let host = provider.create_host_texture(&desc).unwrap();
        let shared = provider.create_shared_texture(&desc).unwrap();
        host.write_pixels(&[1, 2, 3, 4]).unwrap();
        let sync = SyncState::new(Arc::clone(provider.semaphores()));

        let record = export(&provider, &host, &shared, &sync).unwrap();
        assert_eq!(record.new_layout, ImageLayout::ShaderRead);
        assert_eq!(shared.layout(), ImageLayout::ShaderRead);
        assert_eq!(host.layout(), ImageLayout::ShaderRead);
        assert_eq!(shared.read_pixels(), vec![1, 2, 3, 4]);
        assert_eq!(record.semaphore_kind(), Some(SemaphoreKind::Timeline));
    }

    #[test]
    fn test_binary_signal_not_doubled() {
        let provider = provider(SemaphoreKind::Binary);
        let desc = TextureDescriptor::new(1, 1, PixelFormat::R8Unorm);
        let host = provider.create_host_texture(&desc).unwrap();
        let shared = provider.create_shared_texture(&desc).unwrap();
        let sync = SyncState::new(Arc::clone(provider.semaphores()));

        let first = export(&provider, &host, &shared, &sync).unwrap();
        // The cook engine skipped this texture, so the signal was never consumed.
        let second = export(&provider, &host, &shared, &sync).unwrap();
        assert_eq!(first.sync, second.sync);
        let semaphore = sync.signal_semaphore(SemaphoreKind::Binary);
        assert!(semaphore.is_signaled());
    }

    #[test]
    fn test_import_waits_on_cook_semaphore() {
        let provider = provider(SemaphoreKind::Timeline);
        let desc = TextureDescriptor::new(1, 1, PixelFormat::R8Unorm);
        let host = provider.create_host_texture(&desc).unwrap();
        let shared = provider.create_shared_texture(&desc).unwrap();
        shared.write_pixels(&[9]).unwrap();
        let sync = SyncState::new(Arc::clone(provider.semaphores()));

        let cook_semaphore = provider.device().create_semaphore(SemaphoreKind::Binary, true);
        cook_semaphore.signal(0).unwrap();
        let incoming = TransferRecord {
            old_layout: ImageLayout::ColorAttachment,
            new_layout: ImageLayout::TransferSrc,
            sync: TransferSync::Semaphore {
                handle: cook_semaphore.os_handle().unwrap(),
                kind: SemaphoreKind::Binary,
            },
            value: 0,
        };

        let record = provider
            .transfer_copy(TransferJob {
                direction: CopyDirection::FromCook,
                host: &host,
                shared: &shared,
                incoming: Some(incoming),
                sync: &sync,
                label: "import",
            })
            .unwrap();
        assert!(!cook_semaphore.is_signaled());
        assert_eq!(record.semaphore_kind(), Some(SemaphoreKind::Binary));
        assert_eq!(host.read_pixels(), vec![9]);
        assert_eq!(host.layout(), ImageLayout::ShaderRead);
    }
}
