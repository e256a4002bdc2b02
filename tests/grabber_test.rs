// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Integration tests for live capture against emulated cameras.
//!
//! Every test injects its own synthetic backend, so the process-wide backend
//! is never touched.

#![cfg(feature = "synthetic")]

use orbbec_capture::{
    API_VERSION, CaptureConfig, ConfigSource, Error, Outcome, Source, SourceKind,
    config::CameraConfig, open_grabber_with, synthetic::SyntheticContext,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn context(cameras: usize) -> SyntheticContext {
    SyntheticContext::new(cameras)
        .expect("synthetic backend")
        .without_pacing()
}

fn serial(index: usize) -> String {
    format!("SYN{:04}", index)
}

/// Small-image configuration for `cameras` synthetic cameras.
fn config(cameras: usize) -> CaptureConfig {
    let mut config = CaptureConfig::new(SourceKind::Grabber);
    config.hardware.depth_width = WIDTH;
    config.hardware.depth_height = HEIGHT;
    config.cameras = (0..cameras)
        .map(|i| CameraConfig::new(SourceKind::Grabber, &serial(i)))
        .collect();
    config
}

fn inline(config: &CaptureConfig) -> ConfigSource {
    ConfigSource::Inline(config.to_json_string(false))
}

fn open(ctx: &SyntheticContext, config: &CaptureConfig) -> Source {
    open_grabber_with(ctx, inline(config), API_VERSION)
        .into_result()
        .expect("open grabber")
}

#[test]
fn test_auto_config_tiles() {
    let ctx = context(2);
    let source = match open_grabber_with(&ctx, ConfigSource::Auto, API_VERSION) {
        Outcome::Ok(source) => source,
        Outcome::Warning(_, msg) => panic!("unexpected warning: {}", msg),
        Outcome::Err(err) => panic!("open failed: {}", err),
    };

    assert_eq!(source.kind(), SourceKind::Grabber);
    assert_eq!(source.camera_count().unwrap(), 2);
    assert_eq!(source.maxtile().unwrap(), 4);

    let t0 = source.tileinfo(0).unwrap();
    assert_eq!(t0.normal, None);
    assert_eq!(t0.camera_name, None);
    assert_eq!(t0.camera_mask, 0);
    assert_eq!(t0.ncamera, 2);

    for i in 0..2 {
        let t = source.tileinfo(1 << i).unwrap();
        assert_eq!(t.camera_name, Some(serial(i)));
        assert_eq!(t.normal, Some([0.0, 0.0, 1.0]));
        assert_eq!(t.camera_mask, 1 << i);
        assert_eq!(t.ncamera, 1);
    }

    let t3 = source.tileinfo(3).unwrap();
    assert_eq!(t3.camera_name, None);
    assert_eq!(t3.ncamera, 2);
    assert_eq!(t3.normal, Some([0.0, 0.0, 1.0]));

    assert!(matches!(source.tileinfo(4), Err(Error::OutOfRange(_))));
}

#[test]
fn test_first_frame_empty_then_points() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));
    source.start().unwrap();

    let first = source.get().unwrap().expect("first frame");
    assert!(first.is_empty());

    let frame = source.get().unwrap().expect("second frame");
    assert!(!frame.is_empty());
    assert!(!frame.is_degenerate());
    assert!(frame.points().iter().all(|p| p.tile == 1));
    assert!(frame.timestamp() > first.timestamp());
    assert!(frame.cellsize() > 0.0);
    assert!(frame.points().iter().all(|p| p.z > 1.0 && p.z < 1.6));
    source.stop();
}

#[test]
fn test_get_nonempty_retries_once() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));
    source.start().unwrap();
    let frame = source.get_nonempty().unwrap().expect("frame");
    assert!(!frame.is_empty());
    assert!(source.cellsize().unwrap() > 0.0);
}

#[test]
fn test_two_cameras_merge() {
    let ctx = context(2);
    let source = open(&ctx, &config(2));
    source.start().unwrap();

    let frame = source.get_nonempty().unwrap().expect("frame");
    let from_first = frame.count_in_tile(1);
    let from_second = frame.count_in_tile(2);
    assert!(from_first > 0);
    assert!(from_second > 0);
    assert_eq!(from_first + from_second, frame.len());
    source.stop();
}

#[test]
fn test_available_then_get() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));
    source.start().unwrap();
    assert!(source.available(true).unwrap());
    assert!(source.get().unwrap().is_some());
    assert!(!source.eof());
}

#[test]
fn test_not_started() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));
    assert!(matches!(source.get(), Err(Error::NotStarted)));
    assert!(matches!(source.available(false), Err(Error::NotStarted)));
    assert!(matches!(source.mapcolordepth(1, 0, 0), Err(Error::NotStarted)));
    // tiles are known before start
    assert_eq!(source.maxtile().unwrap(), 2);
}

#[test]
fn test_stop_is_idempotent_and_closes() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));
    source.start().unwrap();
    let _ = source.get().unwrap();

    source.stop();
    source.stop();

    assert!(source.eof());
    assert!(matches!(source.get(), Err(Error::UseAfterClose)));
    assert!(matches!(source.available(false), Err(Error::UseAfterClose)));
    assert!(matches!(source.maxtile(), Err(Error::UseAfterClose)));
    assert!(matches!(source.tileinfo(0), Err(Error::UseAfterClose)));
    assert!(matches!(source.start(), Err(Error::UseAfterClose)));
    assert!(matches!(source.seek(0), Err(Error::UseAfterClose)));
    assert!(matches!(source.config_json(), Err(Error::UseAfterClose)));
}

#[test]
fn test_stop_without_start() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));
    source.stop();
    assert!(matches!(source.start(), Err(Error::UseAfterClose)));
}

#[test]
fn test_stop_unblocks_get() {
    // one frame per second so the second get() blocks
    let ctx = SyntheticContext::new(1).unwrap();
    let mut cfg = config(1);
    cfg.hardware.fps = 1;
    let source = Arc::new(open(&ctx, &cfg));
    source.start().unwrap();
    let _ = source.get().unwrap();

    let getter = {
        let source = source.clone();
        std::thread::spawn(move || source.get())
    };
    std::thread::sleep(Duration::from_millis(100));
    let start = Instant::now();
    source.stop();

    match getter.join().unwrap() {
        Ok(None) | Err(Error::UseAfterClose) => {}
        Ok(Some(_)) => {
            // the frame was already in flight when stop() came in
        }
        Err(err) => panic!("unexpected error: {}", err),
    }
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_api_version_mismatch() {
    let ctx = context(1);
    let outcome = open_grabber_with(&ctx, inline(&config(1)), API_VERSION ^ 1);
    match outcome {
        Outcome::Err(Error::ApiVersionMismatch { expected, got }) => {
            assert_eq!(expected, API_VERSION);
            assert_eq!(got, API_VERSION ^ 1);
        }
        _ => panic!("expected api version mismatch"),
    }
}

#[test]
fn test_unconfigured_camera_is_advisory() {
    let ctx = context(2);
    let outcome = open_grabber_with(&ctx, inline(&config(1)), API_VERSION);
    let msg = outcome.warning().expect("warning").to_string();
    assert!(msg.contains("SYN0001"));
    let source = outcome.into_result().unwrap();
    assert_eq!(source.camera_count().unwrap(), 1);
}

#[test]
fn test_configured_camera_missing() {
    let ctx = context(1);
    let err = open_grabber_with(&ctx, inline(&config(2)), API_VERSION)
        .into_result()
        .err()
        .expect("open must fail");
    assert!(matches!(err, Error::NotFound(_)));
    assert!(err.to_string().contains("SYN0001"));
    assert!(err.is_recoverable());
}

#[test]
fn test_missing_config_file() {
    let ctx = context(1);
    let err = open_grabber_with(
        &ctx,
        ConfigSource::Path("/nonexistent/cameraconfig.json".into()),
        API_VERSION,
    )
    .into_result()
    .err()
    .expect("open must fail");
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_single_tile() {
    let ctx = context(2);
    let mut cfg = config(2);
    cfg.system.single_tile = 0;
    let source = open(&ctx, &cfg);
    assert_eq!(source.maxtile().unwrap(), 1);
    source.start().unwrap();
    let frame = source.get_nonempty().unwrap().expect("frame");
    assert!(frame.points().iter().all(|p| p.tile == 0));
    source.stop();

    cfg.system.single_tile = 4;
    let err = open_grabber_with(&ctx, inline(&cfg), API_VERSION)
        .into_result()
        .err()
        .expect("single_tile out of range");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_auxiliary_data() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));
    source.request_auxiliary_data(true, true).unwrap();
    source.start().unwrap();

    let frame = source.get_nonempty().unwrap().expect("frame");
    let rgb = frame.auxiliary_by_name("rgb.SYN0000").expect("rgb image");
    assert_eq!(rgb.data.len(), (WIDTH * HEIGHT * 4) as usize);
    assert!(rgb.description.contains("format=BGRA"));
    let depth = frame.auxiliary_by_name("depth.SYN0000").expect("depth image");
    assert_eq!(depth.data.len(), (WIDTH * HEIGHT * 2) as usize);
    assert!(depth.description.contains("format=Z16"));

    source.request_auxiliary_data(false, false).unwrap();
    let frame = source.get().unwrap().expect("frame");
    assert!(frame.auxiliary().is_empty());
}

#[test]
fn test_grabber_cannot_seek() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));
    assert!(!source.seek(0).unwrap());
    source.start().unwrap();
    assert!(!source.seek(0).unwrap());
}

#[test]
fn test_config_json() {
    let ctx = context(2);
    let source = open(&ctx, &config(2));
    let json: serde_json::Value = serde_json::from_str(&source.config_json().unwrap()).unwrap();
    assert_eq!(json["type"], "orbbec");
    assert_eq!(json["version"], 5);
    assert_eq!(json["camera"].as_array().unwrap().len(), 2);
    assert_eq!(json["hardware"]["depth_width"], WIDTH);
}

#[test]
fn test_coordinate_mapping() {
    let ctx = context(1);
    let source = open(&ctx, &config(1));

    // principal point maps onto the optical axis
    let p = source
        .map2d3d(1, WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0, 1000.0)
        .unwrap();
    assert!(p[0].abs() < 1e-6 && p[1].abs() < 1e-6);
    assert!((p[2] - 1.0).abs() < 1e-6);
    assert!(matches!(
        source.map2d3d(0, 0.0, 0.0, 1000.0),
        Err(Error::OutOfRange(_))
    ));
    assert!(matches!(
        source.map2d3d(2, 0.0, 0.0, 1000.0),
        Err(Error::OutOfRange(_))
    ));

    source.start().unwrap();
    let _ = source.get().unwrap();
    assert_eq!(source.mapcolordepth(1, 5, 7).unwrap(), (5, 7));
    assert!(matches!(
        source.mapcolordepth(1, WIDTH as i32, 0),
        Err(Error::OutOfRange(_))
    ));
}
