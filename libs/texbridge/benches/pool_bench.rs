// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use texbridge::core::cook::CookInstance;
use texbridge::core::exchange::{ExportedTextureCache, ImportPool};
use texbridge::{
    create_resource_provider, FrameData, GpuDevice, HostTexture, LoopbackInstance, PixelFormat,
    ProviderSettings, ResourceProvider, RhiBackend, TextureDescriptor,
};

fn provider() -> (Arc<dyn CookInstance>, Arc<dyn ResourceProvider>) {
    let device = GpuDevice::new();
    let instance: Arc<dyn CookInstance> = Arc::new(LoopbackInstance::new(device.clone()));
    let provider = create_resource_provider(
        RhiBackend::Explicit,
        ProviderSettings::default(),
        device,
        Arc::clone(&instance),
    )
    .unwrap();
    (instance, provider)
}

// Benchmark: cache hits with a growing number of bound host textures
fn bench_export_cache_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("export_cache_hit");

    for bound in [1usize, 16, 64].iter() {
        group.throughput(Throughput::Elements(*bound as u64));
        group.bench_with_input(BenchmarkId::from_parameter(bound), bound, |b, &bound| {
            let (instance, provider) = provider();
            let cache = ExportedTextureCache::new(Arc::clone(&provider), instance, 20, 1);
            let desc = TextureDescriptor::new(64, 64, PixelFormat::Rgba8Unorm);
            let hosts: Vec<(String, HostTexture)> = (0..bound)
                .map(|i| {
                    let resource = provider.create_host_texture(&desc).unwrap();
                    (format!("in{}", i), HostTexture::new(format!("host{}", i), resource))
                })
                .collect();
            for (param, host) in &hosts {
                cache.get_or_create(host, param).unwrap();
            }

            b.iter(|| {
                for (param, host) in &hosts {
                    black_box(cache.get_or_create(black_box(host), param).unwrap());
                }
            });
        });
    }

    group.finish();
}

// Benchmark: steady-state import destination turnover
fn bench_import_pool_reuse(c: &mut Criterion) {
    let (_instance, provider) = provider();
    let pool = ImportPool::new(20);
    let desc = TextureDescriptor::new(256, 256, PixelFormat::Rgba8Unorm);
    let mut frame = FrameData::new(1);

    c.bench_function("import_pool_reuse", |b| {
        b.iter(|| {
            let (destination, _) = pool
                .acquire(provider.as_ref(), "out", black_box(&desc), frame)
                .unwrap();
            pool.settle("out", &destination, frame, true);
            frame = frame.next();
        });
    });
}

criterion_group!(benches, bench_export_cache_hit, bench_import_pool_reuse);
criterion_main!(benches);
