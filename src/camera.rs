// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common camera types, device traits and error handling.
//!
//! This module provides the backend-agnostic seam between the capture engine
//! and whatever produces depth/color framesets: live hardware, the synthetic
//! emulator or a recording on disk.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// API version a caller must present when opening a source.
///
/// Bumped whenever the layout of [`crate::Frame`], [`crate::TileInfo`] or the
/// [`crate::Source`] contract changes incompatibly.
pub const API_VERSION: u64 = 0x2024_0501;

/// Maximum number of physical cameras a single source can drive.
///
/// Tile masks are 8 bits wide, one bit per camera.
pub const MAX_CAMERAS: usize = 8;

/// Common error type for capture operations.
#[derive(Debug)]
pub enum Error {
    /// The requested device backend is not known
    BackendNotFound(String),
    /// The device backend exists but could not be initialised
    BackendLoad(String),
    /// A backend was installed after the process-wide one was already chosen
    BackendAlreadyInitialised(String),
    /// Caller and engine disagree on [`API_VERSION`]
    ApiVersionMismatch { expected: u64, got: u64 },
    /// No matching hardware, configuration or recording
    NotFound(String),
    /// Tile index or seek position outside the valid range
    OutOfRange(String),
    /// Frame was empty twice in a row
    TransientEmpty,
    /// Internal engine failure; the source should be stopped
    Fatal(String),
    /// Call on a source after `stop()`
    UseAfterClose,
    /// `available()`/`get()` before `start()`
    NotStarted,
    /// Configuration error
    Config(String),
    /// Malformed recording file
    InvalidRecording(String),
    /// I/O error (file operations)
    Io(std::io::Error),
    /// JSON error from configuration parsing
    Json(serde_json::Error),
    /// Shape error from ndarray operations
    Shape(ndarray::ShapeError),
    /// System time error
    SystemTime(std::time::SystemTimeError),
}

/// How a caller is expected to react to an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stop the source and do not reuse the handle.
    Fatal,
    /// Adjust the input, skip or defer.
    Recoverable,
    /// Try the same call once more.
    Retry,
}

impl Error {
    /// Classify this error for the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) | Error::OutOfRange(_) => ErrorKind::Recoverable,
            Error::TransientEmpty => ErrorKind::Retry,
            _ => ErrorKind::Fatal,
        }
    }

    /// True if the caller may skip or adjust input rather than abort.
    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Fatal
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BackendNotFound(name) => write!(f, "device backend not found: {}", name),
            Error::BackendLoad(msg) => write!(f, "device backend cannot be loaded: {}", msg),
            Error::BackendAlreadyInitialised(name) => {
                write!(f, "device backend already initialised as {}", name)
            }
            Error::ApiVersionMismatch { expected, got } => write!(
                f,
                "api version mismatch: engine is {:#x}, caller passed {:#x}",
                expected, got
            ),
            Error::NotFound(msg) => write!(f, "{}", msg),
            Error::OutOfRange(msg) => write!(f, "out of range: {}", msg),
            Error::TransientEmpty => write!(f, "empty point cloud after retry"),
            Error::Fatal(msg) => write!(f, "fatal: {}", msg),
            Error::UseAfterClose => write!(f, "source used after stop()"),
            Error::NotStarted => write!(f, "source not started"),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::InvalidRecording(msg) => write!(f, "invalid recording: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "json error: {}", err),
            Error::Shape(err) => write!(f, "shape error: {}", err),
            Error::SystemTime(err) => write!(f, "system time error: {}", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err)
    }
}

impl From<std::time::SystemTimeError> for Error {
    fn from(err: std::time::SystemTimeError) -> Self {
        Error::SystemTime(err)
    }
}

/// Result of a call that may succeed with an advisory message.
///
/// - `Ok(value)` - success, nothing to report
/// - `Warning(value, message)` - success, surface `message` as a warning
/// - `Err(error)` - failure, `value` is unusable
#[derive(Debug)]
#[must_use]
pub enum Outcome<T> {
    Ok(T),
    Warning(T, String),
    Err(Error),
}

impl<T> Outcome<T> {
    /// Build an outcome from a value and any advisories gathered on the way.
    pub fn with_advisories(value: T, advisories: Vec<String>) -> Self {
        if advisories.is_empty() {
            Outcome::Ok(value)
        } else {
            Outcome::Warning(value, advisories.join("; "))
        }
    }

    /// The advisory message, if any.
    pub fn warning(&self) -> Option<&str> {
        match self {
            Outcome::Warning(_, msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Outcome::Err(_))
    }

    /// Drop the advisory and convert to a plain `Result`.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Outcome::Ok(value) | Outcome::Warning(value, _) => Ok(value),
            Outcome::Err(err) => Err(err),
        }
    }

    /// Split into a `Result` and the advisory message.
    pub fn into_parts(self) -> (Result<T, Error>, Option<String>) {
        match self {
            Outcome::Ok(value) => (Ok(value), None),
            Outcome::Warning(value, msg) => (Ok(value), Some(msg)),
            Outcome::Err(err) => (Err(err), None),
        }
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(err) => Outcome::Err(err),
        }
    }
}

/// Kind of source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceKind {
    /// Live cameras
    #[default]
    Grabber,
    /// Previously recorded session
    Playback,
}

impl SourceKind {
    /// The `type` string used in camera configuration files.
    pub fn config_type(&self) -> &'static str {
        match self {
            SourceKind::Grabber => "orbbec",
            SourceKind::Playback => "orbbec_playback",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceKind::Grabber => write!(f, "grabber"),
            SourceKind::Playback => write!(f, "playback"),
        }
    }
}

/// Pinhole intrinsics of the (color-aligned) depth stream.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
}

impl Intrinsics {
    /// Intrinsics for a sensor with the given resolution and horizontal
    /// field of view in degrees, principal point at the image centre.
    pub fn from_fov(width: u32, height: u32, hfov_deg: f32) -> Self {
        let f = (width as f32 / 2.0) / (hfov_deg.to_radians() / 2.0).tan();
        Self {
            fx: f,
            fy: f,
            ppx: width as f32 / 2.0,
            ppy: height as f32 / 2.0,
        }
    }
}

/// One synchronized depth + color capture from a single camera.
///
/// The depth image is in millimetres and aligned to the color image, so both
/// share `width` x `height`. Color is BGRA, four bytes per pixel.
#[derive(Clone, Debug)]
pub struct Frameset {
    /// Depth frame timestamp in microseconds
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub depth: Vec<u16>,
    pub color: Vec<u8>,
}

impl Frameset {
    /// Number of pixels in the frameset.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Check that image buffers match the declared size.
    pub fn validate(&self) -> Result<(), Error> {
        let n = self.pixel_count();
        if self.depth.len() != n || self.color.len() != n * 4 {
            return Err(Error::Fatal(format!(
                "frameset {}x{} has {} depth and {} color bytes",
                self.width,
                self.height,
                self.depth.len(),
                self.color.len()
            )));
        }
        Ok(())
    }
}

/// A camera as reported by a [`DeviceContext`] before it is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub name: String,
}

/// Cancellation flag shared between a source and the devices it drives.
///
/// Tripped by `stop()` before the engine joins its threads. Devices that
/// block in [`CameraDevice::wait_for_frameset`] poll it and return `Ok(None)`
/// once it is set.
#[derive(Clone, Debug, Default)]
pub struct StopToken(Arc<AtomicBool>);

/// Polling interval of [`StopToken::sleep`].
const STOP_POLL: Duration = Duration::from_millis(10);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless stopped first. Returns `false` if the
    /// sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

/// Trait for a single opened camera.
///
/// The capture engine drives every camera from its own control thread, so
/// implementations must be `Send`. Calls are never concurrent for one device.
pub trait CameraDevice: Send {
    /// Serial number (or recording name) identifying this camera.
    fn serial(&self) -> &str;

    /// Intrinsics of the depth stream after alignment to color.
    fn intrinsics(&self) -> Intrinsics;

    /// Start streaming.
    fn start(&mut self) -> Result<(), Error>;

    /// Block until the next frameset is available or `stop` is tripped.
    ///
    /// # Returns
    /// - `Ok(Some(frameset))` for every captured frameset
    /// - `Ok(None)` once the stream has ended, the device was stopped or
    ///   `stop` was tripped
    /// - `Err` on device failure
    fn wait_for_frameset(&mut self, stop: &StopToken) -> Result<Option<Frameset>, Error>;

    /// Stop streaming. Must be idempotent.
    fn stop(&mut self);

    /// True once no further framesets will be produced.
    fn eof(&self) -> bool {
        false
    }

    /// Reposition to the first frameset at or after `timestamp`.
    ///
    /// Returns `Ok(false)` without moving if `timestamp` lies beyond the last
    /// frameset, or if the device cannot seek (live hardware).
    fn seek(&mut self, _timestamp: u64) -> Result<bool, Error> {
        Ok(false)
    }
}

/// Trait for a device backend that can enumerate and open cameras.
pub trait DeviceContext: Send + Sync {
    /// Backend name, e.g. `"synthetic"`.
    fn name(&self) -> &str;

    /// List connected cameras.
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error>;

    /// Open the camera with the given serial number.
    fn open(
        &self,
        serial: &str,
        hardware: &crate::config::HardwareConfig,
    ) -> Result<Box<dyn CameraDevice>, Error>;
}

/// Get current wall-clock timestamp in microseconds.
///
/// On Linux, uses `CLOCK_REALTIME` via `clock_gettime`.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn timestamp() -> Result<u64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as u64 * 1_000_000 + tp.tv_nsec as u64 / 1_000)
}

#[cfg(not(target_os = "linux"))]
pub fn timestamp() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_micros() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::Recoverable);
        assert_eq!(Error::OutOfRange("x".into()).kind(), ErrorKind::Recoverable);
        assert_eq!(Error::TransientEmpty.kind(), ErrorKind::Retry);
        assert_eq!(Error::Fatal("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(
            Error::ApiVersionMismatch {
                expected: 1,
                got: 2
            }
            .kind(),
            ErrorKind::Fatal
        );
        assert!(!Error::UseAfterClose.is_recoverable());
    }

    #[test]
    fn test_outcome_channels() {
        let ok: Outcome<u32> = Outcome::with_advisories(1, vec![]);
        assert!(ok.warning().is_none());
        assert_eq!(ok.into_result().unwrap(), 1);

        let warned = Outcome::with_advisories(2, vec!["a".into(), "b".into()]);
        assert_eq!(warned.warning(), Some("a; b"));
        let (result, msg) = warned.into_parts();
        assert_eq!(result.unwrap(), 2);
        assert_eq!(msg.as_deref(), Some("a; b"));

        let failed: Outcome<u32> = Err(Error::NotFound("no orbbec cameras found".into())).into();
        assert!(failed.is_err());
        let err = failed.into_result().unwrap_err();
        assert_eq!(err.to_string(), "no orbbec cameras found");
    }

    #[test]
    fn test_source_kind_config_type() {
        assert_eq!(SourceKind::Grabber.config_type(), "orbbec");
        assert_eq!(SourceKind::Playback.config_type(), "orbbec_playback");
        assert_eq!(SourceKind::Playback.to_string(), "playback");
    }

    #[test]
    fn test_intrinsics_from_fov() {
        let i = Intrinsics::from_fov(640, 480, 90.0);
        assert!((i.fx - 320.0).abs() < 1e-3);
        assert_eq!(i.ppx, 320.0);
        assert_eq!(i.ppy, 240.0);
    }

    #[test]
    fn test_frameset_validate() {
        let mut fs = Frameset {
            timestamp: 0,
            width: 2,
            height: 2,
            depth: vec![0; 4],
            color: vec![0; 16],
        };
        assert!(fs.validate().is_ok());
        fs.color.pop();
        assert!(fs.validate().is_err());
    }

    #[test]
    fn test_stop_token_cuts_sleep() {
        let token = StopToken::new();
        assert!(token.sleep(Duration::from_millis(5)));

        let remote = token.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.stop();
        });
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(token.is_stopped());
        stopper.join().unwrap();
    }

    #[test]
    fn test_timestamp_monotonic_enough() {
        let a = timestamp().unwrap();
        let b = timestamp().unwrap();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000_000);
    }
}
