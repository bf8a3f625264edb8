// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures: a bridge wired to an in-process loopback cook engine.

#![allow(dead_code)]

use std::sync::Arc;

use texbridge::core::cook::CookInstance;
use texbridge::core::rhi::RenderQueue;
use texbridge::{
    BridgeConfig, GpuDevice, HostTexture, LoopbackInstance, PixelFormat, ProviderSettings,
    RhiBackend, SemaphoreKind, TextureBridge, TextureDescriptor,
};

pub struct Fixture {
    pub device: GpuDevice,
    pub instance: Arc<LoopbackInstance>,
    pub bridge: TextureBridge,
}

pub fn fixture(backend: RhiBackend) -> Fixture {
    fixture_with(backend, SemaphoreKind::Timeline, BridgeConfig::default())
}

pub fn fixture_with(backend: RhiBackend, kind: SemaphoreKind, config: BridgeConfig) -> Fixture {
    let device = GpuDevice::new();
    let instance = Arc::new(LoopbackInstance::new(device.clone()).with_semaphore_kind(kind));
    fixture_on(device, instance, backend, kind, config)
}

pub fn fixture_on(
    device: GpuDevice,
    instance: Arc<LoopbackInstance>,
    backend: RhiBackend,
    kind: SemaphoreKind,
    config: BridgeConfig,
) -> Fixture {
    let settings = ProviderSettings {
        semaphore_kind: kind,
        ..config.provider_settings()
    };
    let bridge = TextureBridge::with_backend(
        config,
        backend,
        settings,
        device.clone(),
        Arc::clone(&instance) as Arc<dyn CookInstance>,
    )
    .expect("bridge");
    Fixture {
        device,
        instance,
        bridge,
    }
}

pub fn rgba(width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor::new(width, height, PixelFormat::Rgba8Unorm)
}

/// Host texture filled with `fill`.
pub fn host_texture(bridge: &TextureBridge, label: &str, desc: TextureDescriptor, fill: u8) -> HostTexture {
    let resource = bridge.provider().create_host_texture(&desc).expect("host texture");
    let size = desc.byte_size().expect("packed format") as usize;
    resource.write_pixels(&vec![fill; size]).expect("upload");
    HostTexture::new(label, resource)
}

/// Park the render queue until the returned sender is dropped or sent to.
pub fn block_queue(queue: &RenderQueue) -> crossbeam_channel::Sender<()> {
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    queue
        .enqueue("test-blocker", move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        })
        .expect("queue open");
    started_rx.recv().expect("blocker started");
    release_tx
}
