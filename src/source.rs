// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point cloud source handle.
//!
//! A [`Source`] moves through `Opened -> Started -> Stopped`:
//!
//! 1. [`open_grabber`] / [`open_playback`] load the configuration, open all
//!    cameras and build the tile directory. Anything that can fail on
//!    resource acquisition fails here.
//! 2. [`Source::start`] starts streaming.
//! 3. [`Source::available`] / [`Source::get`] hand out frames.
//! 4. [`Source::stop`] (or drop) joins all threads. A device that ignores
//!    the stop request is detached after a short grace period. Every later
//!    call returns [`Error::UseAfterClose`].
//!
//! `Source` is `Send + Sync`: `stop()` may be called from another thread
//! while `get()` is blocked, which then returns promptly.

use crate::{
    backend,
    camera::{API_VERSION, DeviceContext, Error, Outcome, SourceKind},
    capture::{ControlHandle, Engine, STOP_GRACE, Shared, descriptor_in},
    config::{CameraConfig, CaptureConfig, ConfigSource, DEFAULT_CONFIG_FILE},
    frame::Frame,
    playback::PlaybackContext,
    processing::CameraProcessor,
    tiles::{TileDirectory, TileInfo},
};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, info, instrument};

enum Phase {
    Opened(Engine),
    Running(ControlHandle),
    Stopped,
}

/// A live or recorded point cloud source.
pub struct Source {
    kind: SourceKind,
    config: CaptureConfig,
    tiles: TileDirectory,
    /// Reconstruction parameters per camera, for coordinate mapping
    geometry: Vec<CameraProcessor>,
    shared: Arc<Shared>,
    phase: Mutex<Phase>,
    closed: AtomicBool,
}

/// Fail with [`Error::ApiVersionMismatch`] unless `api_version` is
/// [`API_VERSION`].
pub fn check_api_version(api_version: u64) -> Result<(), Error> {
    if api_version != API_VERSION {
        return Err(Error::ApiVersionMismatch {
            expected: API_VERSION,
            got: api_version,
        });
    }
    Ok(())
}

/// Open live cameras through the process-wide backend.
///
/// `config` may be [`ConfigSource::Auto`] to use every connected camera with
/// an identity pose. Fails with `NotFound("no orbbec cameras found")` when
/// there are none.
pub fn open_grabber(config: ConfigSource, api_version: u64) -> Outcome<Source> {
    if let Err(err) = check_api_version(api_version) {
        return Outcome::Err(err);
    }
    match backend::context() {
        Ok(context) => open_grabber_with(context.as_ref(), config, api_version),
        Err(err) => Outcome::Err(err),
    }
}

/// Open live cameras through an explicit device backend.
pub fn open_grabber_with(
    context: &dyn DeviceContext,
    config: ConfigSource,
    api_version: u64,
) -> Outcome<Source> {
    into_outcome(check_api_version(api_version).and_then(|_| {
        let (config, _) = load_config(SourceKind::Grabber, &config, Some(context))?;
        Source::open(SourceKind::Grabber, config, context)
    }))
}

/// Open a recorded session.
///
/// `config` names the recording descriptor (`cameraconfig.json` of type
/// `orbbec_playback`) or the directory containing it.
pub fn open_playback(config: ConfigSource, api_version: u64) -> Outcome<Source> {
    into_outcome(check_api_version(api_version).and_then(|_| {
        let (config, base_dir) = load_config(SourceKind::Playback, &config, None)?;
        let context = PlaybackContext::new(&config, &base_dir);
        Source::open(SourceKind::Playback, config, &context)
    }))
}

fn into_outcome(result: Result<(Source, Vec<String>), Error>) -> Outcome<Source> {
    match result {
        Ok((source, advisories)) => Outcome::with_advisories(source, advisories),
        Err(err) => Outcome::Err(err),
    }
}

/// Resolve a configuration source into a configuration and the directory
/// relative recording paths are taken from.
fn load_config(
    kind: SourceKind,
    source: &ConfigSource,
    context: Option<&dyn DeviceContext>,
) -> Result<(CaptureConfig, PathBuf), Error> {
    let here = PathBuf::from(".");
    match source {
        ConfigSource::Auto => match (kind, context) {
            (SourceKind::Grabber, Some(context)) => Ok((auto_config(context)?, here)),
            _ => Err(Error::NotFound(
                "auto configuration needs connected cameras".to_string(),
            )),
        },
        ConfigSource::Default => Ok((CaptureConfig::from_file(DEFAULT_CONFIG_FILE, kind)?, here)),
        ConfigSource::Path(path) => {
            let path = if path.is_dir() {
                descriptor_in(path)
            } else {
                path.clone()
            };
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or(here);
            Ok((CaptureConfig::from_file(&path, kind)?, base))
        }
        ConfigSource::Inline(json) => Ok((CaptureConfig::from_json_str(json, kind)?, here)),
    }
}

/// Configuration with every connected camera at the origin.
fn auto_config(context: &dyn DeviceContext) -> Result<CaptureConfig, Error> {
    let devices = context.enumerate()?;
    if devices.is_empty() {
        return Err(Error::NotFound("no orbbec cameras found".to_string()));
    }
    let mut config = CaptureConfig::new(SourceKind::Grabber);
    config.cameras = devices
        .iter()
        .map(|d| CameraConfig::new(SourceKind::Grabber, &d.serial))
        .collect();
    Ok(config)
}

impl Source {
    #[instrument(skip_all, fields(kind = %kind))]
    fn open(
        kind: SourceKind,
        mut config: CaptureConfig,
        context: &dyn DeviceContext,
    ) -> Result<(Self, Vec<String>), Error> {
        let mut advisories = Vec::new();
        let engine = Engine::open(kind, &mut config, context, &mut advisories)?;
        let geometry: Vec<CameraProcessor> = engine.processors().cloned().collect();
        let cameras: Vec<(String, [f32; 3])> = geometry
            .iter()
            .map(|p| (p.serial().to_string(), p.view_direction()))
            .collect();
        let tiles = TileDirectory::new(&cameras, config.system.single_tile);
        info!(
            cameras = engine.camera_count(),
            maxtile = tiles.maxtile(),
            "source opened"
        );

        Ok((
            Self {
                kind,
                config,
                tiles,
                geometry,
                shared: Arc::new(Shared::default()),
                phase: Mutex::new(Phase::Opened(engine)),
                closed: AtomicBool::new(false),
            },
            advisories,
        ))
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::UseAfterClose);
        }
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), Error> {
        self.ensure_open()?;
        if !self.shared.lock().started {
            return Err(Error::NotStarted);
        }
        Ok(())
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Start streaming. Starting a running source does nothing.
    pub fn start(&self) -> Result<(), Error> {
        self.ensure_open()?;
        let mut phase = self.lock_phase();
        match std::mem::replace(&mut *phase, Phase::Stopped) {
            Phase::Opened(engine) => {
                let handle = engine.start(self.shared.clone())?;
                *phase = Phase::Running(handle);
                info!(kind = %self.kind, "source started");
                Ok(())
            }
            Phase::Running(handle) => {
                *phase = Phase::Running(handle);
                Ok(())
            }
            Phase::Stopped => Err(Error::Fatal("source failed to start".to_string())),
        }
    }

    /// Release all resources. Idempotent, and safe to call while another
    /// thread is blocked in [`Self::get`] or [`Self::available`].
    pub fn stop(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.signal_stop();
        let phase = std::mem::replace(&mut *self.lock_phase(), Phase::Stopped);
        match phase {
            Phase::Opened(engine) => drop(engine),
            Phase::Running(handle) => {
                handle.join(STOP_GRACE);
            }
            Phase::Stopped => {}
        }
        info!(kind = %self.kind, "source stopped");
    }

    /// True if a frame is ready; with `wait`, block until one is, the stream
    /// ends or the source is stopped.
    pub fn available(&self, wait: bool) -> Result<bool, Error> {
        self.ensure_started()?;
        self.shared.available(wait)
    }

    /// True once a playback has delivered its last frame. Also true after
    /// [`Self::stop`].
    pub fn eof(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shared.eof()
    }

    /// Next frame, blocking until it is ready.
    ///
    /// # Returns
    /// - `Ok(Some(frame))` - a frame, possibly empty
    /// - `Ok(None)` - end of stream, or stopped while waiting
    /// - `Err(Error::Fatal)` - the engine failed
    pub fn get(&self) -> Result<Option<Frame>, Error> {
        self.ensure_started()?;
        self.shared.get()
    }

    /// Like [`Self::get`] but retries once on an empty frame. A second empty
    /// frame is [`Error::TransientEmpty`].
    pub fn get_nonempty(&self) -> Result<Option<Frame>, Error> {
        for attempt in 0..2 {
            match self.get()? {
                None => return Ok(None),
                Some(frame) if !frame.is_empty() => return Ok(Some(frame)),
                Some(_) => debug!(attempt, "empty frame"),
            }
        }
        Err(Error::TransientEmpty)
    }

    /// Number of tile slots, fixed for the lifetime of the source.
    pub fn maxtile(&self) -> Result<usize, Error> {
        self.ensure_open()?;
        Ok(self.tiles.maxtile())
    }

    pub fn tileinfo(&self, index: usize) -> Result<TileInfo, Error> {
        self.ensure_open()?;
        self.tiles.get(index).cloned()
    }

    /// Reposition a playback to the first frame at or after `timestamp`.
    ///
    /// Returns `Ok(false)` for grabbers and when `timestamp` lies beyond the
    /// end of the recording, in which case the position is unchanged.
    pub fn seek(&self, timestamp: u64) -> Result<bool, Error> {
        self.ensure_open()?;
        if self.kind == SourceKind::Grabber {
            return Ok(false);
        }
        let mut phase = self.lock_phase();
        if let Phase::Opened(engine) = &mut *phase {
            return engine.seek(timestamp);
        }
        let running = matches!(*phase, Phase::Running(_));
        drop(phase);
        if running {
            self.shared.seek(timestamp)
        } else {
            Err(Error::UseAfterClose)
        }
    }

    /// Current configuration as JSON.
    pub fn config_json(&self) -> Result<String, Error> {
        self.ensure_open()?;
        Ok(self.config.to_json_string(false))
    }

    /// Attach raw color and/or depth images to subsequent frames.
    pub fn request_auxiliary_data(&self, rgb: bool, depth: bool) -> Result<(), Error> {
        self.ensure_open()?;
        let mut st = self.shared.lock();
        st.want_rgb = rgb;
        st.want_depth = depth;
        Ok(())
    }

    pub fn camera_count(&self) -> Result<usize, Error> {
        self.ensure_open()?;
        Ok(self.geometry.len())
    }

    /// Point size of the most recent frame, in metres.
    pub fn cellsize(&self) -> Result<f32, Error> {
        self.ensure_open()?;
        Ok(self.shared.lock().cellsize)
    }

    fn camera_for_tile(&self, tile: usize) -> Result<usize, Error> {
        (0..self.geometry.len())
            .find(|i| tile == 1 << i)
            .ok_or_else(|| Error::OutOfRange(format!("tile {} is not a single camera", tile)))
    }

    /// Map a depth pixel of the camera of `tile` to world coordinates.
    pub fn map2d3d(&self, tile: usize, x: f32, y: f32, depth_mm: f32) -> Result<[f32; 3], Error> {
        self.ensure_open()?;
        let index = self.camera_for_tile(tile)?;
        Ok(self.geometry[index].map2d3d(x, y, depth_mm))
    }

    /// Map a color pixel of the camera of `tile` to its depth pixel.
    pub fn mapcolordepth(&self, tile: usize, u: i32, v: i32) -> Result<(i32, i32), Error> {
        self.ensure_started()?;
        let index = self.camera_for_tile(tile)?;
        let (width, height) = self
            .shared
            .lock()
            .sizes
            .get(index)
            .copied()
            .unwrap_or((0, 0));
        if width == 0 {
            return Err(Error::OutOfRange(format!(
                "no frame captured yet for tile {}",
                tile
            )));
        }
        self.geometry[index].map_color_depth(u, v, width, height)
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.stop();
    }
}
