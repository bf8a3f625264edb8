// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Export and import across every backend and semaphore flavor.

mod common;

use std::sync::Arc;

use common::{block_queue, fixture_with, host_texture, rgba};
use serial_test::serial;
use texbridge::core::cook::CookInstance;
use texbridge::{
    BridgeConfig, ExportParams, FrameData, ImportParams, LoopbackInstance, RhiBackend,
    SemaphoreKind, TextureBridge,
};

const COMBINATIONS: [(RhiBackend, SemaphoreKind); 4] = [
    (RhiBackend::Immediate, SemaphoreKind::Timeline),
    (RhiBackend::Queued, SemaphoreKind::Timeline),
    (RhiBackend::Explicit, SemaphoreKind::Timeline),
    (RhiBackend::Explicit, SemaphoreKind::Binary),
];

fn output_bytes(frame: FrameData) -> Vec<u8> {
    (0..64).map(|i| (frame.frame_id as u8).wrapping_mul(17).wrapping_add(i)).collect()
}

#[test]
fn test_round_trip_every_backend() {
    for (backend, kind) in COMBINATIONS {
        let f = fixture_with(backend, kind, BridgeConfig::default());
        assert_eq!(f.instance.backend(), Some(backend));
        f.instance
            .add_output("out", rgba(4, 4), Box::new(|frame, _| output_bytes(frame)));
        let host = host_texture(&f.bridge, "source", rgba(4, 4), 0);

        for frame in 1..=4u64 {
            let frame = FrameData::new(frame);
            host.resource()
                .unwrap()
                .write_pixels(&vec![frame.frame_id as u8; 64])
                .unwrap();
            let exported = f
                .bridge
                .export_texture(ExportParams::new("in", Some(host.clone()), frame).with_force_copy(true))
                .wait()
                .unwrap_or_else(|e| panic!("{} {:?} export failed: {}", backend, kind, e));
            assert!(exported.copied);

            let report = f.instance.cook(frame).unwrap();
            assert_eq!(report.inputs_read, 1, "{} {:?}", backend, kind);
            assert_eq!(f.instance.last_input("in"), Some(vec![frame.frame_id as u8; 64]));

            let imported = f
                .bridge
                .import_texture(ImportParams::new("out", frame))
                .wait()
                .unwrap_or_else(|e| panic!("{} {:?} import failed: {}", backend, kind, e));
            let texture = imported.texture.unwrap();
            assert_eq!(texture.resource().unwrap().read_pixels(), output_bytes(frame));
        }

        let stats = f.bridge.stats();
        assert_eq!(stats.backend, backend);
        assert_eq!(stats.export.created, 1);
        assert_eq!(stats.import.created, 2, "{} {:?}", backend, kind);
    }
}

#[test]
fn test_cook_output_resumes_after_failed_import() {
    for (backend, kind) in COMBINATIONS {
        let f = fixture_with(backend, kind, BridgeConfig::default());
        f.instance
            .add_output("out", rgba(4, 4), Box::new(|frame, _| output_bytes(frame)));

        let mut first = None;
        for frame in 1..=2u64 {
            let frame = FrameData::new(frame);
            f.instance.cook(frame).unwrap();
            let imported = f
                .bridge
                .import_texture(ImportParams::new("out", frame))
                .wait()
                .unwrap();
            if first.is_none() {
                first = imported.texture;
            }
        }
        let first = first.unwrap();

        // Frame 3 lands in the frame 1 destination, which dies while the copy is queued.
        let frame = FrameData::new(3);
        assert_eq!(f.instance.cook(frame).unwrap().outputs_written, 1);
        let release = block_queue(f.bridge.render_queue());
        let pending = f.bridge.import_texture(ImportParams::new("out", frame));
        first.resource().unwrap().invalidate();
        drop(release);
        assert!(pending.wait().is_err(), "{} {:?}", backend, kind);

        for frame in 4..=5u64 {
            let frame = FrameData::new(frame);
            let report = f.instance.cook(frame).unwrap();
            assert_eq!(report.outputs_written, 1, "{} {:?} frame {}", backend, kind, frame.frame_id);
            let imported = f
                .bridge
                .import_texture(ImportParams::new("out", frame))
                .wait()
                .unwrap_or_else(|e| panic!("{} {:?} import failed: {}", backend, kind, e));
            assert_eq!(imported.texture.unwrap().resource().unwrap().read_pixels(), output_bytes(frame));
        }
    }
}

#[test]
fn test_output_resize_reopens_source() {
    for (backend, kind) in COMBINATIONS {
        let f = fixture_with(backend, kind, BridgeConfig::default());
        f.instance.add_output(
            "out",
            rgba(2, 2),
            Box::new(|frame, desc| vec![frame.frame_id as u8; desc.byte_size().unwrap_or(0) as usize]),
        );

        f.instance.cook(FrameData::new(1)).unwrap();
        let small = f
            .bridge
            .import_texture(ImportParams::new("out", FrameData::new(1)))
            .wait()
            .unwrap();
        assert_eq!(small.texture.unwrap().width(), 2);

        f.instance.set_output_descriptor("out", rgba(8, 8));
        f.instance.cook(FrameData::new(2)).unwrap();
        let large = f
            .bridge
            .import_texture(ImportParams::new("out", FrameData::new(2)))
            .wait()
            .unwrap();
        assert!(!large.reused);
        let texture = large.texture.unwrap();
        assert_eq!(texture.width(), 8);
        assert_eq!(texture.resource().unwrap().read_pixels(), vec![2; 256]);
    }
}

#[test]
#[serial]
fn test_backend_from_environment() {
    unsafe { std::env::set_var(RhiBackend::ENV_VAR, "d3d12") };
    let config = BridgeConfig {
        backend: Some("immediate".into()),
        ..BridgeConfig::default()
    };
    let device = config.create_device();
    let instance = Arc::new(LoopbackInstance::new(device.clone()));
    let bridge = TextureBridge::new(config, device, Arc::clone(&instance) as Arc<dyn CookInstance>);
    unsafe { std::env::remove_var(RhiBackend::ENV_VAR) };

    let bridge = bridge.unwrap();
    assert_eq!(bridge.backend(), RhiBackend::Queued);
    assert_eq!(instance.backend(), Some(RhiBackend::Queued));
}

#[test]
#[serial]
fn test_backend_from_config_file() {
    unsafe { std::env::remove_var(RhiBackend::ENV_VAR) };
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(BridgeConfig::FILE_NAME),
        "backend: vulkan\nimport_pool_capacity: 2\nmemory_budget_bytes: 1048576\n",
    )
    .unwrap();

    let config = BridgeConfig::load(dir.path()).unwrap();
    let device = config.create_device();
    let instance = Arc::new(LoopbackInstance::new(device.clone()));
    let bridge = TextureBridge::new(config, device, instance as Arc<dyn CookInstance>).unwrap();
    assert_eq!(bridge.backend(), RhiBackend::Explicit);
    assert_eq!(bridge.config().import_pool_capacity, 2);
}

#[test]
fn test_memory_budget_failure_is_reported() {
    let config = BridgeConfig {
        memory_budget_bytes: Some(1024),
        ..BridgeConfig::default()
    };
    let device = config.create_device();
    let instance = Arc::new(LoopbackInstance::new(device.clone()));
    let f = common::fixture_on(
        device,
        instance,
        RhiBackend::Explicit,
        SemaphoreKind::Timeline,
        config,
    );
    // 16x16 RGBA host texture plus its shared copy exceed the budget.
    let host = host_texture(&f.bridge, "big", rgba(16, 16), 1);
    let err = f
        .bridge
        .export_texture(ExportParams::new("in", Some(host), FrameData::new(1)))
        .wait()
        .unwrap_err();
    assert!(matches!(err, texbridge::BridgeError::AllocationFailure(_)));
    assert!(f.bridge.stats().device.bytes_in_use <= 1024);
}
