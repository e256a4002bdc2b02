// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Recorded session replay.
//!
//! A recording is a directory holding a `cameraconfig.json` of type
//! `orbbec_playback` plus one `.obrec` file per camera. [`PlaybackContext`]
//! exposes the recorded cameras through the same [`DeviceContext`] seam as
//! live hardware, so the capture engine does not care where framesets come
//! from.

use crate::{
    camera::{CameraDevice, DeviceContext, DeviceInfo, Error, Frameset, Intrinsics, StopToken},
    config::{CaptureConfig, HardwareConfig, recording_filename},
    recording::ObrecReader,
};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Device context serving cameras from recording files.
pub struct PlaybackContext {
    /// (serial, recording path) of every enabled camera
    cameras: Vec<(String, PathBuf)>,
}

impl PlaybackContext {
    /// Resolve the recording files of a playback configuration.
    ///
    /// Relative filenames are taken relative to `base_dir`, which is the
    /// directory of the descriptor (or the current directory for inline
    /// configurations). A camera without a filename uses `<serial>.obrec`.
    pub fn new(config: &CaptureConfig, base_dir: &Path) -> Self {
        let cameras = config
            .enabled_cameras()
            .map(|camera| {
                let filename = if camera.filename.is_empty() {
                    recording_filename(&camera.serial)
                } else {
                    camera.filename.clone()
                };
                let path = Path::new(&filename);
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    base_dir.join(path)
                };
                (camera.serial.clone(), path)
            })
            .collect();
        Self { cameras }
    }

    /// Recording path of a camera.
    pub fn recording_path(&self, serial: &str) -> Option<&Path> {
        self.cameras
            .iter()
            .find(|(s, _)| s == serial)
            .map(|(_, p)| p.as_path())
    }
}

impl DeviceContext for PlaybackContext {
    fn name(&self) -> &str {
        "playback"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error> {
        Ok(self
            .cameras
            .iter()
            .filter(|(_, path)| path.exists())
            .map(|(serial, path)| DeviceInfo {
                serial: serial.clone(),
                name: path.display().to_string(),
            })
            .collect())
    }

    fn open(&self, serial: &str, _hardware: &HardwareConfig) -> Result<Box<dyn CameraDevice>, Error> {
        let path = self
            .recording_path(serial)
            .ok_or_else(|| Error::NotFound(format!("no recording for camera {}", serial)))?;
        Ok(Box::new(PlaybackCamera::open(serial, path)?))
    }
}

/// A camera replaying one `.obrec` file.
pub struct PlaybackCamera {
    serial: String,
    reader: ObrecReader<BufReader<File>>,
    started: bool,
    stopped: bool,
}

impl PlaybackCamera {
    pub fn open<P: AsRef<Path>>(serial: &str, path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let reader = ObrecReader::open_file(path)?;
        info!(
            serial,
            path = %path.display(),
            frames = reader.frame_count(),
            "opened recording"
        );
        Ok(Self {
            serial: serial.to_string(),
            reader,
            started: false,
            stopped: false,
        })
    }

    /// Number of framesets in the recording.
    pub fn frame_count(&self) -> usize {
        self.reader.frame_count()
    }
}

impl CameraDevice for PlaybackCamera {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn intrinsics(&self) -> Intrinsics {
        self.reader.header().intrinsics
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.stopped {
            return Err(Error::UseAfterClose);
        }
        self.started = true;
        Ok(())
    }

    fn wait_for_frameset(&mut self, stop: &StopToken) -> Result<Option<Frameset>, Error> {
        if !self.started || self.stopped || stop.is_stopped() {
            return Ok(None);
        }
        let frameset = self.reader.read_frameset()?;
        if frameset.is_none() {
            debug!(serial = %self.serial, "end of recording");
        }
        Ok(frameset)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn eof(&self) -> bool {
        self.reader.eof()
    }

    fn seek(&mut self, timestamp: u64) -> Result<bool, Error> {
        let moved = self.reader.seek_to_timestamp(timestamp);
        debug!(serial = %self.serial, timestamp, moved, "seek");
        Ok(moved)
    }
}
