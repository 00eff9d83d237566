//! # Sync Benchmark
//!
//! Full repack versus dirty-chunk patching of the external buffer.
//!
//! Target: uploading a 1% dirty set costs a small fraction of a full pack.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_core::sync::{BufferDescriptor, ExternalBufferSink, ExternalHandle};
use strata_core::{BuiltinIds, EntityId, FragmentData, StoreConfig, World};

/// Sink that keeps one byte vector per buffer.
#[derive(Default)]
struct VecSink {
    buffers: Vec<Vec<u8>>,
}

impl ExternalBufferSink for VecSink {
    fn create_buffer(&mut self, descriptor: &BufferDescriptor, bytes: &[u8]) -> ExternalHandle {
        let mut buffer = vec![0; descriptor.capacity];
        buffer[..bytes.len()].copy_from_slice(bytes);
        self.buffers.push(buffer);
        ExternalHandle(self.buffers.len() as u64 - 1)
    }

    fn update_buffer(&mut self, handle: ExternalHandle, offset: usize, bytes: &[u8]) {
        self.buffers[handle.0 as usize][offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

fn setup(count: usize) -> (World, BuiltinIds, Vec<EntityId>, VecSink) {
    let mut world = World::new(StoreConfig {
        max_chunks_per_archetype: 1 << 16,
        ..StoreConfig::default()
    })
    .unwrap();
    let ids = world.register_builtins().unwrap();
    let entities = (0..count)
        .map(|i| {
            world
                .spawn(&[FragmentData::new(ids.transform).with("position", [i as f32, 0.0, 0.0])])
                .unwrap()
        })
        .collect();
    let mut sink = VecSink::default();
    world.to_external_data(ids.transform, &mut sink).unwrap();
    (world, ids, entities, sink)
}

fn bench_full_repack(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_full_repack");

    for count in [10_000, 100_000] {
        let (mut world, ids, entities, mut sink) = setup(count);
        group.throughput(Throughput::Bytes((count * 40) as u64));
        group.bench_with_input(BenchmarkId::new("transform", count), &count, |b, _| {
            b.iter(|| {
                // A delete + respawn marks the fragment stale.
                world.delete_entity(entities[0]).unwrap_or(());
                world.spawn(&[FragmentData::new(ids.transform)]).unwrap();
                black_box(world.to_external_data(ids.transform, &mut sink).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_dirty_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_dirty_patch");
    let count = 100_000;

    for dirty_pct in [1, 10, 50] {
        let (mut world, ids, entities, mut sink) = setup(count);
        let step = 100 / dirty_pct;
        let data = FragmentData::new(ids.transform).with("position", [1.0f32, 2.0, 3.0]);

        group.bench_with_input(BenchmarkId::new("percent", dirty_pct), &dirty_pct, |b, _| {
            b.iter(|| {
                for &e in entities.iter().step_by(step) {
                    world.update_entity_data(e, &data).unwrap();
                }
                black_box(world.to_external_data(ids.transform, &mut sink).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_full_repack, bench_dirty_patch);
criterion_main!(benches);
