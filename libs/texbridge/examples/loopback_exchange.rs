// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Loopback Exchange Example
//!
//! Runs a few frames of host → cook engine → host texture exchange against
//! the in-process loopback engine. The backend comes from
//! `TEXBRIDGE_RHI_BACKEND` or `texbridge.yaml` in the working directory.
//!
//! Run with `TEXBRIDGE_LOG=texbridge=debug` to watch pooling decisions.

use std::sync::Arc;

use texbridge::{
    init_tracing, BridgeConfig, CookInstance, ExportParams, FrameData, HostTexture, ImportParams,
    LoopbackInstance, PixelFormat, Result, TextureBridge, TextureDescriptor,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = BridgeConfig::load_or_default(&std::env::current_dir()?);
    let device = config.create_device();
    let instance = Arc::new(LoopbackInstance::new(device.clone()));
    let desc = TextureDescriptor::new(128, 128, PixelFormat::Rgba8Unorm);

    // The cook engine publishes one frame-dependent output.
    instance.add_output(
        "inverted",
        desc,
        Box::new(|frame, desc| {
            let size = desc.byte_size().unwrap_or(0) as usize;
            vec![255 - (frame.frame_id as u8); size]
        }),
    );

    let bridge = TextureBridge::new(config, device, Arc::clone(&instance) as Arc<dyn CookInstance>)?;
    let source = HostTexture::new("scene-color", bridge.provider().create_host_texture(&desc)?);

    for frame_id in 1..=5 {
        let frame = FrameData::new(frame_id);
        if let Some(resource) = source.resource() {
            resource.write_pixels(&vec![frame_id as u8; desc.byte_size().unwrap_or(0) as usize])?;
        }

        let exported = bridge
            .export_texture(ExportParams::new("scene", Some(source.clone()), frame).with_force_copy(true))
            .await?;
        let report = instance.cook(frame)?;
        let imported = bridge.import_texture(ImportParams::new("inverted", frame)).await?;
        bridge.texture_pool_maintenance(frame);

        tracing::info!(
            frame = frame_id,
            exported_new = exported.is_new,
            inputs_read = report.inputs_read,
            destination = imported.texture.as_ref().map(|t| t.label().to_string()),
            reused = imported.reused,
            "Frame exchanged"
        );
    }

    bridge.suspend_async_tasks().await?;
    tracing::info!(stats = ?bridge.stats(), "Exchange finished");
    bridge.shutdown();
    Ok(())
}
