//! Benchmark tests for sable-core operations
//!
//! Run with: cargo bench -p sable-core

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use url::Url;

use sable_core::abr::{AbrContext, AbrController};
use sable_core::buffer::BufferManager;
use sable_core::config::{AbrConfig, PlayerConfig};
use sable_core::engine::{Command, Effect, Engine, Signal};
use sable_core::manifest::{SegmentIndex, SegmentRef, SourceManifest, Variant};
use sable_core::quality::{AnyDevice, QualityCatalog};
use sable_core::transport::TimelineSink;
use sable_core::types::Quality;

// ============================================================================
// Helpers
// ============================================================================

fn ladder() -> Vec<Quality> {
    vec![
        Quality::new("240p", "avc1.4d4015", 400_000, 426, 240),
        Quality::new("360p", "avc1.4d401e", 800_000, 640, 360),
        Quality::new("480p", "avc1.4d401f", 1_400_000, 854, 480),
        Quality::new("720p", "avc1.4d401f", 2_800_000, 1280, 720),
        Quality::new("1080p", "avc1.640028", 5_000_000, 1920, 1080),
    ]
}

fn manifest(segments: u64) -> SourceManifest {
    let variants = ladder()
        .into_iter()
        .enumerate()
        .map(|(idx, quality)| Variant {
            quality,
            segments: (0..segments)
                .map(|sequence| SegmentRef {
                    sequence,
                    start: sequence as f64 * 4.0,
                    duration: 4.0,
                    uri: Url::parse(&format!("memory://segments/{idx}/{sequence}")).unwrap(),
                })
                .collect(),
        })
        .collect();
    SourceManifest {
        variants,
        is_live: false,
        low_latency_supported: false,
        target_duration: 4.0,
    }
}

// ============================================================================
// Buffer Benchmarks
// ============================================================================

fn bench_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer");

    for ranges in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("add_range", ranges), &ranges, |b, &n| {
            b.iter(|| {
                let mut buffer = BufferManager::new();
                // Every other slot, then fill the gaps to force merges
                for i in (0..n).step_by(2).chain((1..n).step_by(2)) {
                    buffer.add_range(i as f64 * 2.0, i as f64 * 2.0 + 2.0);
                }
                black_box(buffer.total_buffered())
            })
        });
    }

    let mut fragmented = BufferManager::new();
    for i in 0..500 {
        fragmented.add_range(i as f64 * 3.0, i as f64 * 3.0 + 2.0);
    }
    group.bench_function("buffer_duration_fragmented", |b| {
        b.iter(|| black_box(fragmented.buffer_duration(black_box(751.5))))
    });

    group.finish();
}

// ============================================================================
// ABR Benchmarks
// ============================================================================

fn bench_abr(c: &mut Criterion) {
    let mut group = c.benchmark_group("abr");
    let catalog = QualityCatalog::new(ladder(), &AnyDevice);
    let candidates = catalog.candidates();
    let current = &ladder()[2];

    let mut abr = AbrController::new(AbrConfig::default());
    for _ in 0..20 {
        abr.record(1_000_000, Duration::from_millis(400));
    }

    group.bench_function("decide", |b| {
        b.iter(|| {
            black_box(abr.decide(
                &candidates,
                AbrContext {
                    current: Some(current),
                    buffer_ahead: 12.0,
                },
            ))
        })
    });

    group.bench_function("record", |b| {
        let mut abr = AbrController::new(AbrConfig::default());
        b.iter(|| abr.record(black_box(750_000), Duration::from_millis(300)))
    });

    group.finish();
}

// ============================================================================
// Engine Benchmarks
// ============================================================================

fn bench_segment_index(c: &mut Criterion) {
    let index = SegmentIndex::new(&manifest(1800));
    let quality = &ladder()[3];
    c.bench_function("segment_after_2h", |b| {
        b.iter(|| black_box(index.segment_after(quality, black_box(3_601.0))))
    });
}

fn bench_engine_load(c: &mut Criterion) {
    let source = manifest(450);
    c.bench_function("engine_load_to_ready", |b| {
        b.iter(|| {
            let mut engine = Engine::new(
                PlayerConfig::external_clock(),
                Box::new(TimelineSink::new()),
                Box::new(AnyDevice),
            );
            engine.handle_command(Command::Load {
                path: "memory://bench/master.m3u8".into(),
                media_type: None,
            });
            let mut pending = engine.drain();
            while let Some(effect) = pending.pop() {
                match effect {
                    Effect::FetchManifest { request, .. } => {
                        engine.handle_signal(Signal::ManifestLoaded {
                            request,
                            result: Ok(source.clone()),
                        });
                    }
                    Effect::FetchSegment { request, .. } => {
                        engine.handle_signal(Signal::SegmentLoaded {
                            request,
                            result: Ok(Bytes::from_static(&[0u8; 32])),
                            elapsed: Duration::from_millis(20),
                        });
                    }
                    _ => continue,
                }
                pending.extend(engine.drain());
            }
            black_box(engine.state())
        })
    });
}

criterion_group!(
    benches,
    bench_buffer,
    bench_abr,
    bench_segment_index,
    bench_engine_load
);
criterion_main!(benches);
