// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end export/import flows against the loopback cook engine.

mod common;

use std::time::Duration;

use common::{block_queue, fixture, fixture_on, host_texture, rgba};
use texbridge::core::cook::{CookInstance, OwnershipState, Side};
use texbridge::{
    BridgeConfig, ExportParams, FrameData, GpuDevice, ImportParams, LoopbackInstance, PixelFormat,
    RhiBackend, SemaphoreKind, TextureDescriptor,
};

#[test]
fn test_repeated_export_reuses_shared_texture() {
    let f = fixture(RhiBackend::Explicit);
    let host = host_texture(&f.bridge, "albedo", rgba(256, 256), 7);

    let first = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host.clone()), FrameData::new(10)))
        .wait()
        .unwrap();
    assert!(first.is_new);
    assert!(first.copied);
    f.instance.cook(FrameData::new(10)).unwrap();

    let second = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(11)))
        .wait()
        .unwrap();
    assert!(!second.is_new);
    assert!(!second.copied);
    assert_eq!(
        first.texture.as_ref().map(|t| t.id()),
        second.texture.as_ref().map(|t| t.id())
    );

    let stats = f.bridge.stats().export;
    assert_eq!(stats.created, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_resized_host_texture_gets_new_export() {
    let f = fixture(RhiBackend::Explicit);
    let host = host_texture(&f.bridge, "albedo", rgba(256, 256), 1);

    let first = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host.clone()), FrameData::new(1)))
        .wait()
        .unwrap();
    f.instance.cook(FrameData::new(1)).unwrap();

    let resized = f.bridge.provider().create_host_texture(&rgba(512, 512)).unwrap();
    resized.write_pixels(&vec![2; 512 * 512 * 4]).unwrap();
    host.replace_resource(resized);

    let second = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(2)))
        .wait()
        .unwrap();
    assert!(second.is_new);
    assert!(second.copied);
    assert_ne!(
        first.texture.as_ref().map(|t| t.id()),
        second.texture.as_ref().map(|t| t.id())
    );
    assert_eq!(second.texture.unwrap().descriptor().width, 512);

    // The old texture waits out the cook engine before it is pooled.
    let stats = f.bridge.stats().export;
    assert_eq!(stats.retiring, 1);
    assert_eq!(stats.idle, 0);

    f.bridge.texture_pool_maintenance(FrameData::new(2));
    let stats = f.bridge.stats().export;
    assert_eq!(stats.retiring, 0);
    assert_eq!(stats.idle, 1);

    f.instance.cook(FrameData::new(2)).unwrap();
    assert_eq!(f.instance.last_input("in").unwrap().len(), 512 * 512 * 4);
}

#[test]
fn test_import_reuses_destination_from_earlier_frame() {
    let f = fixture(RhiBackend::Queued);
    f.instance.add_output(
        "out",
        rgba(4, 4),
        Box::new(|frame, desc| vec![frame.frame_id as u8; desc.byte_size().unwrap_or(0) as usize]),
    );

    let mut destinations = Vec::new();
    for frame in 10..=12 {
        let frame = FrameData::new(frame);
        f.instance.cook(frame).unwrap();
        let output = f
            .bridge
            .import_texture(ImportParams::new("out", frame))
            .wait()
            .unwrap();
        let texture = output.texture.unwrap();
        assert_eq!(texture.resource().unwrap().read_pixels()[0], frame.frame_id as u8);
        destinations.push((texture, output.reused));
    }

    let (frame10, reused10) = &destinations[0];
    let (frame11, reused11) = &destinations[1];
    let (frame12, reused12) = &destinations[2];
    assert!(!reused10);
    assert!(!reused11);
    assert!(!frame11.ptr_eq(frame10));
    // Returned to the pool at frame 11, handed out again at frame 12.
    assert!(reused12);
    assert!(frame12.ptr_eq(frame10));
    assert_eq!(f.bridge.stats().import.created, 2);
}

#[test]
fn test_suspend_waits_for_in_flight_exports() {
    let f = fixture(RhiBackend::Explicit);
    let release = block_queue(f.bridge.render_queue());

    let pending: Vec<_> = (0..3)
        .map(|i| {
            let host = host_texture(&f.bridge, &format!("t{}", i), rgba(8, 8), i as u8);
            f.bridge
                .export_texture(ExportParams::new(format!("in{}", i), Some(host), FrameData::new(1)))
        })
        .collect();
    assert_eq!(f.bridge.stats().active_tasks, 3);

    let suspended = f.bridge.suspend_async_tasks();
    std::thread::sleep(Duration::from_millis(20));
    assert!(!suspended.is_ready());

    let late = host_texture(&f.bridge, "late", rgba(8, 8), 9);
    let refused = f
        .bridge
        .export_texture(ExportParams::new("in3", Some(late), FrameData::new(1)))
        .wait()
        .unwrap_err();
    assert!(refused.is_cancelled());

    drop(release);
    let outcome = suspended.wait().unwrap();
    assert_eq!(outcome.drained_tasks, 3);
    for export in pending {
        assert!(export.wait().unwrap().copied);
    }
    assert_eq!(f.bridge.stats().active_tasks, 0);
}

#[test]
fn test_first_export_without_prior_transfer() {
    let f = fixture(RhiBackend::Explicit);
    let host = host_texture(&f.bridge, "fresh", rgba(16, 16), 3);

    let output = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(1)))
        .wait()
        .unwrap();
    let shared = output.texture.unwrap();
    assert_eq!(
        f.instance.ownership(&shared),
        Some(OwnershipState::TransferRequested { to: Side::Cook })
    );
    assert!(f.instance.has_pending_transfer(&shared));

    f.instance.cook(FrameData::new(1)).unwrap();
    assert_eq!(f.instance.last_input("in"), Some(vec![3; 16 * 16 * 4]));
}

#[test]
fn test_clearing_input_unbinds() {
    let f = fixture(RhiBackend::Queued);
    let host = host_texture(&f.bridge, "t", rgba(4, 4), 5);
    f.bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(1)))
        .wait()
        .unwrap();

    let cleared = f
        .bridge
        .export_texture(ExportParams::new("in", None, FrameData::new(2)))
        .wait()
        .unwrap();
    assert!(cleared.texture.is_none());
    assert!(!cleared.copied);

    let report = f.instance.cook(FrameData::new(2)).unwrap();
    assert_eq!(report.inputs_read + report.inputs_skipped, 0);
}

#[test]
fn test_force_copy_refreshes_contents() {
    let f = fixture(RhiBackend::Immediate);
    let host = host_texture(&f.bridge, "t", rgba(2, 2), 1);
    f.bridge
        .export_texture(ExportParams::new("in", Some(host.clone()), FrameData::new(1)))
        .wait()
        .unwrap();
    f.instance.cook(FrameData::new(1)).unwrap();

    host.resource().unwrap().write_pixels(&[9; 16]).unwrap();
    let output = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(2)).with_force_copy(true))
        .wait()
        .unwrap();
    assert!(output.copied);
    assert!(!output.is_new);

    f.instance.cook(FrameData::new(2)).unwrap();
    assert_eq!(f.instance.last_input("in"), Some(vec![9; 16]));
}

#[test]
fn test_unsupported_format_rejected() {
    let device = GpuDevice::new();
    let instance = std::sync::Arc::new(
        LoopbackInstance::new(device.clone()).with_formats(vec![PixelFormat::Rgba8Unorm]),
    );
    let f = fixture_on(
        device,
        instance,
        RhiBackend::Explicit,
        SemaphoreKind::Timeline,
        BridgeConfig::default(),
    );
    let host = host_texture(&f.bridge, "mask", TextureDescriptor::new(4, 4, PixelFormat::R8Unorm), 0);

    let err = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(1)))
        .wait()
        .unwrap_err();
    assert!(matches!(err, texbridge::BridgeError::UnsupportedFormat { .. }));
    assert_eq!(f.bridge.stats().export.created, 0);
}

#[test]
fn test_import_before_first_cook_is_empty() {
    let f = fixture(RhiBackend::Explicit);
    f.instance.add_output("out", rgba(4, 4), Box::new(|_, _| vec![0; 64]));

    let output = f
        .bridge
        .import_texture(ImportParams::new("out", FrameData::new(1)))
        .wait()
        .unwrap();
    assert!(output.texture.is_none());
    assert!(!output.copied);
}

#[test]
fn test_transfer_failure_surfaces_on_import() {
    let f = fixture(RhiBackend::Queued);
    f.instance.add_output("out", rgba(2, 2), Box::new(|_, _| vec![4; 16]));
    f.instance.cook(FrameData::new(1)).unwrap();
    f.instance.fail_transfers(Some(-3));

    let err = f
        .bridge
        .import_texture(ImportParams::new("out", FrameData::new(1)))
        .wait()
        .unwrap_err();
    assert!(matches!(err, texbridge::BridgeError::TransferFailure(_)));

    // The abandoned destination went back to the pool.
    f.instance.fail_transfers(None);
    let output = f
        .bridge
        .import_texture(ImportParams::new("out", FrameData::new(2)))
        .wait()
        .unwrap();
    assert!(output.reused);
    assert_eq!(output.texture.unwrap().resource().unwrap().read_pixels(), vec![4; 16]);
}

#[test]
fn test_failed_export_handshake_replaces_shared_texture() {
    let f = fixture(RhiBackend::Queued);
    let host = host_texture(&f.bridge, "t", rgba(2, 2), 1);
    let original = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host.clone()), FrameData::new(1)))
        .wait()
        .unwrap()
        .texture
        .unwrap();
    f.instance.cook(FrameData::new(1)).unwrap();

    f.instance.fail_transfers(Some(-1));
    let err = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host.clone()), FrameData::new(2)).with_force_copy(true))
        .wait()
        .unwrap_err();
    assert!(matches!(err, texbridge::BridgeError::TransferFailure(_)));
    f.instance.fail_transfers(None);

    host.resource().unwrap().write_pixels(&[5; 16]).unwrap();
    let release = block_queue(f.bridge.render_queue());
    let pending = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(3)).with_force_copy(true));

    // The cook engine still has the broken texture bound and keeps reading it.
    assert!(f.device.open_shared_texture(original.shared(), false).is_ok());
    assert_eq!(f.instance.cook(FrameData::new(3)).unwrap().inputs_read, 1);
    f.bridge.texture_pool_maintenance(FrameData::new(3));
    assert!(f.device.open_shared_texture(original.shared(), false).is_ok());

    drop(release);
    let replacement = pending.wait().unwrap();
    assert!(replacement.is_new);
    assert!(replacement.copied);
    assert_ne!(replacement.texture.as_ref().map(|t| t.id()), Some(original.id()));

    // Rebinding released the broken texture; maintenance frees it.
    f.bridge.texture_pool_maintenance(FrameData::new(3));
    assert!(f.device.open_shared_texture(original.shared(), false).is_err());
    let stats = f.bridge.stats().export;
    assert_eq!(stats.dropped_unhealthy, 1);
    assert_eq!(stats.retiring, 0);
    assert_eq!(stats.idle, 0);

    f.instance.cook(FrameData::new(4)).unwrap();
    assert_eq!(f.instance.last_input("in"), Some(vec![5; 16]));
}

#[test]
fn test_frame_finished_waits_for_input_updates() {
    let f = fixture(RhiBackend::Explicit);
    let release = block_queue(f.bridge.render_queue());
    let host = host_texture(&f.bridge, "t", rgba(4, 4), 1);

    let export = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(5)));
    let finished = f.bridge.frame_finished(FrameData::new(5));
    std::thread::sleep(Duration::from_millis(20));
    assert!(!finished.is_ready());

    drop(release);
    export.wait().unwrap();
    assert_eq!(finished.wait().unwrap(), FrameData::new(5));
}

#[tokio::test]
async fn test_exchange_futures_are_awaitable() {
    let f = fixture(RhiBackend::Queued);
    f.instance.add_output("out", rgba(2, 2), Box::new(|_, _| vec![8; 16]));
    let host = host_texture(&f.bridge, "t", rgba(2, 2), 6);

    let exported = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(1)))
        .await
        .unwrap();
    assert!(exported.copied);

    f.instance.cook(FrameData::new(1)).unwrap();
    let imported = f
        .bridge
        .import_texture(ImportParams::new("out", FrameData::new(1)))
        .await
        .unwrap();
    assert_eq!(imported.texture.unwrap().resource().unwrap().read_pixels(), vec![8; 16]);
}
