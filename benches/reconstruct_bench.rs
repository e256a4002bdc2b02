// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Benchmarks for depth to point cloud reconstruction.
//!
//! Measures:
//! - Reconstruction at the common depth modes
//! - Cost of the optional erosion and greenscreen filters
//! - Binary PLY encoding of a merged frame
//!
//! Run with: cargo bench --bench reconstruct_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use orbbec_capture::{
    Frame, Frameset, Intrinsics, SourceKind,
    config::{CameraConfig, FilteringConfig, ProcessingConfig},
    formats,
    processing::CameraProcessor,
};

/// A slanted wall 1-3m away with a green band across the middle.
fn generate_frameset(width: u32, height: u32) -> Frameset {
    let n = (width * height) as usize;
    let mut depth = Vec::with_capacity(n);
    let mut color = Vec::with_capacity(n * 4);
    for v in 0..height {
        for u in 0..width {
            // leave a sprinkling of invalid pixels like a real sensor
            let hole = (u * 7 + v * 13) % 97 == 0;
            depth.push(if hole { 0 } else { 1000 + (2000 * u / width) as u16 });
            let green = v > height / 3 && v < 2 * height / 3;
            if green {
                color.extend_from_slice(&[30, 200, 40, 255]);
            } else {
                color.extend_from_slice(&[(u % 256) as u8, (v % 256) as u8, 128, 255]);
            }
        }
    }
    Frameset {
        timestamp: 0,
        width,
        height,
        depth,
        color,
    }
}

fn processor(width: u32, height: u32, processing: &ProcessingConfig) -> CameraProcessor {
    CameraProcessor::new(
        &CameraConfig::new(SourceKind::Grabber, "BENCH"),
        Intrinsics::from_fov(width, height, 75.0),
        &FilteringConfig::default(),
        processing,
        1,
    )
    .expect("processor")
}

/// Benchmark reconstruction at the usual depth resolutions.
fn bench_resolutions(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct");

    for &(width, height) in &[(320, 288), (640, 576), (1024, 1024)] {
        let frameset = generate_frameset(width, height);
        group.throughput(Throughput::Elements((width * height) as u64));
        group.bench_with_input(
            BenchmarkId::new("pixels", format!("{}x{}", width, height)),
            &frameset,
            |b, frameset| {
                let mut processor = processor(width, height, &ProcessingConfig::default());
                // Warmup: one call to size the scratch buffers
                let _ = processor.process(frameset);
                b.iter(|| processor.process(frameset));
            },
        );
    }

    group.finish();
}

/// Benchmark the optional filters on a 640x576 frameset.
fn bench_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct_filters");
    let (width, height) = (640, 576);
    let frameset = generate_frameset(width, height);
    group.throughput(Throughput::Elements((width * height) as u64));

    let variants = [
        ("none", ProcessingConfig::default()),
        (
            "erosion",
            ProcessingConfig {
                depth_x_erosion: 2,
                depth_y_erosion: 2,
                ..Default::default()
            },
        ),
        (
            "greenscreen",
            ProcessingConfig {
                greenscreen_removal: true,
                ..Default::default()
            },
        ),
    ];
    for (name, processing) in variants {
        group.bench_function(name, |b| {
            let mut processor = processor(width, height, &processing);
            let _ = processor.process(&frameset);
            b.iter(|| processor.process(&frameset));
        });
    }

    group.finish();
}

/// Benchmark PLY encoding of a two-camera frame.
fn bench_ply(c: &mut Criterion) {
    let mut group = c.benchmark_group("ply_encode");
    let frameset = generate_frameset(640, 576);
    let mut processor = processor(640, 576, &ProcessingConfig::default());
    let points = processor.process(&frameset).expect("points");

    let mut frame = Frame::with_capacity(0, points.len() * 2);
    frame.extend_from_slice(&points);
    frame.extend_from_slice(&points);

    group.throughput(Throughput::Elements(frame.len() as u64));
    group.bench_function("binary_le", |b| b.iter(|| formats::encode_ply(&frame)));
    group.finish();
}

criterion_group!(benches, bench_resolutions, bench_filters, bench_ply);
criterion_main!(benches);
