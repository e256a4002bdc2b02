// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Start and stop behaviour against stub devices.
//!
//! The stub devices record whether they were started and stopped, and can
//! block in `wait_for_frameset` either cooperatively or not at all.

use orbbec_capture::{
    API_VERSION, CameraDevice, CaptureConfig, ConfigSource, DeviceContext, DeviceInfo, Error,
    Frameset, Intrinsics, Source, SourceKind, StopToken,
    config::{CameraConfig, HardwareConfig},
    open_grabber_with,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

const BLOCK: Duration = Duration::from_secs(4);
const STOP_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy)]
enum Wait {
    Immediate,
    UntilStopped,
    IgnoreStop,
}

#[derive(Default)]
struct Flags {
    started: AtomicBool,
    stopped: AtomicBool,
}

struct StubCamera {
    serial: String,
    wait: Wait,
    fail_start: bool,
    flags: Arc<Flags>,
    timestamp: u64,
}

impl CameraDevice for StubCamera {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn intrinsics(&self) -> Intrinsics {
        Intrinsics::from_fov(2, 2, 75.0)
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.fail_start {
            return Err(Error::Fatal(format!("{} refused to start", self.serial)));
        }
        self.flags.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn wait_for_frameset(&mut self, stop: &StopToken) -> Result<Option<Frameset>, Error> {
        match self.wait {
            Wait::Immediate => {}
            Wait::UntilStopped => {
                if !stop.sleep(BLOCK) {
                    return Ok(None);
                }
            }
            Wait::IgnoreStop => std::thread::sleep(BLOCK),
        }
        self.timestamp += 1000;
        Ok(Some(Frameset {
            timestamp: self.timestamp,
            width: 2,
            height: 2,
            depth: vec![1000; 4],
            color: vec![128; 16],
        }))
    }

    fn stop(&mut self) {
        self.flags.stopped.store(true, Ordering::SeqCst);
    }
}

struct StubContext {
    wait: Wait,
    fail_start: Option<usize>,
    flags: Vec<Arc<Flags>>,
}

impl StubContext {
    fn new(cameras: usize, wait: Wait) -> Self {
        Self {
            wait,
            fail_start: None,
            flags: (0..cameras).map(|_| Arc::default()).collect(),
        }
    }

    fn serial(index: usize) -> String {
        format!("STUB{}", index)
    }

    fn config(&self) -> CaptureConfig {
        let mut config = CaptureConfig::new(SourceKind::Grabber);
        config.cameras = (0..self.flags.len())
            .map(|i| CameraConfig::new(SourceKind::Grabber, &Self::serial(i)))
            .collect();
        config
    }

    fn open_source(&self, config: &CaptureConfig) -> Source {
        open_grabber_with(
            self,
            ConfigSource::Inline(config.to_json_string(false)),
            API_VERSION,
        )
        .into_result()
        .expect("open grabber")
    }

    fn all_stopped(&self) -> bool {
        self.flags.iter().all(|f| f.stopped.load(Ordering::SeqCst))
    }
}

impl DeviceContext for StubContext {
    fn name(&self) -> &str {
        "stub"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error> {
        Ok((0..self.flags.len())
            .map(|i| DeviceInfo {
                serial: Self::serial(i),
                name: "Stub".to_string(),
            })
            .collect())
    }

    fn open(&self, serial: &str, _hardware: &HardwareConfig) -> Result<Box<dyn CameraDevice>, Error> {
        let index = (0..self.flags.len())
            .find(|&i| Self::serial(i) == serial)
            .ok_or_else(|| Error::NotFound(serial.to_string()))?;
        Ok(Box::new(StubCamera {
            serial: serial.to_string(),
            wait: self.wait,
            fail_start: self.fail_start == Some(index),
            flags: self.flags[index].clone(),
            timestamp: 0,
        }))
    }
}

/// Start `source`, ask for a frame and give the control thread time to
/// block in the device.
fn start_and_block(source: &Source) {
    source.start().unwrap();
    assert!(!source.available(false).unwrap());
    std::thread::sleep(Duration::from_millis(100));
}

#[test]
fn test_stop_releases_devices() {
    let ctx = StubContext::new(2, Wait::Immediate);
    let source = ctx.open_source(&ctx.config());
    source.start().unwrap();
    assert_eq!(source.get().unwrap().unwrap().timestamp(), 1000);
    source.stop();
    assert!(ctx.all_stopped());
}

#[test]
fn test_stop_interrupts_blocked_device() {
    let ctx = StubContext::new(1, Wait::UntilStopped);
    let source = ctx.open_source(&ctx.config());
    start_and_block(&source);

    let start = Instant::now();
    source.stop();
    assert!(start.elapsed() < STOP_DEADLINE);
    assert!(ctx.all_stopped());
    assert!(matches!(source.get(), Err(Error::UseAfterClose)));
}

#[test]
fn test_stop_detaches_unresponsive_device() {
    let ctx = StubContext::new(1, Wait::IgnoreStop);
    let source = ctx.open_source(&ctx.config());
    start_and_block(&source);

    let start = Instant::now();
    source.stop();
    assert!(start.elapsed() < STOP_DEADLINE);
    assert!(source.eof());
}

#[test]
fn test_blocked_get_returns_on_stop() {
    let ctx = StubContext::new(1, Wait::UntilStopped);
    let source = Arc::new(ctx.open_source(&ctx.config()));
    source.start().unwrap();

    let waiter = {
        let source = source.clone();
        std::thread::spawn(move || source.get())
    };
    std::thread::sleep(Duration::from_millis(100));
    let start = Instant::now();
    source.stop();
    assert!(waiter.join().unwrap().unwrap().is_none());
    assert!(start.elapsed() < STOP_DEADLINE);
}

#[test]
fn test_recording_error_stops_cameras() {
    let ctx = StubContext::new(2, Wait::Immediate);
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut config = ctx.config();
    config.system.record_to_directory = file.path().join("sub").display().to_string();

    let source = ctx.open_source(&config);
    assert!(matches!(source.start(), Err(Error::Io(_))));
    assert!(ctx.all_stopped());
    source.stop();
}

#[test]
fn test_camera_start_failure_stops_others() {
    let mut ctx = StubContext::new(2, Wait::Immediate);
    ctx.fail_start = Some(1);
    let source = ctx.open_source(&ctx.config());

    assert!(source.start().is_err());
    assert!(ctx.flags[0].started.load(Ordering::SeqCst));
    assert!(!ctx.flags[1].started.load(Ordering::SeqCst));
    assert!(ctx.all_stopped());
    source.stop();
}
