// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Camera configuration (`cameraconfig.json`).
//!
//! A configuration describes every camera of a rig (serial, pose, optional
//! recording filename) plus capture-wide hardware, filtering and processing
//! parameters. The same file format is used for live capture (`type` is
//! `"orbbec"`) and for recordings (`type` is `"orbbec_playback"`).
//!
//! ```json
//! {
//!   "version": 5,
//!   "type": "orbbec",
//!   "system": { "single_tile": -1, "record_to_directory": "" },
//!   "camera": [
//!     { "type": "orbbec", "serial": "CL8H1234", "trafo": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]] }
//!   ]
//! }
//! ```

use crate::camera::{Error, Intrinsics, SourceKind};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Only configuration files with this version are accepted.
pub const CONFIG_VERSION: u32 = 5;

/// File name used when no configuration is given, and for recordings.
pub const DEFAULT_CONFIG_FILE: &str = "cameraconfig.json";

/// Sentinel asking the grabber to configure itself from connected hardware.
pub const AUTO_CONFIG: &str = "auto";

/// Where a source takes its configuration from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Detect connected cameras (grabber only)
    Auto,
    /// `cameraconfig.json` in the current directory
    Default,
    /// Path to a `.json` configuration or recording descriptor
    Path(PathBuf),
    /// Inline JSON document
    Inline(String),
}

impl ConfigSource {
    /// Interpret a configuration string the way command line tools pass it:
    /// empty means default, `"auto"` means auto-detect, a leading `{` means
    /// inline JSON, anything else is a path.
    pub fn parse(config: &str) -> Self {
        match config {
            "" => ConfigSource::Default,
            AUTO_CONFIG => ConfigSource::Auto,
            s if s.starts_with('{') => ConfigSource::Inline(s.to_string()),
            s => ConfigSource::Path(PathBuf::from(s)),
        }
    }
}

impl From<Option<&str>> for ConfigSource {
    fn from(config: Option<&str>) -> Self {
        config.map_or(ConfigSource::Default, ConfigSource::parse)
    }
}

/// System-wide settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// If >= 0 every point is assigned this tile number
    pub single_tile: i32,
    /// If non-empty all camera streams are recorded into this directory
    pub record_to_directory: String,
    /// Stamp frames with the wall clock instead of the capture time
    pub new_timestamps: bool,
    pub debug: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            single_tile: -1,
            record_to_directory: String::new(),
            new_timestamps: false,
            debug: false,
        }
    }
}

/// Inter-camera synchronization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Serial of the sync master. Empty runs without hardware sync.
    pub sync_master_serial: String,
    pub ignore_sync: bool,
}

/// Stream and color sensor settings shared by all cameras.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub color_width: u32,
    pub color_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    pub fps: u32,
    pub color_exposure_time: i32,
    pub color_whitebalance: i32,
    pub color_backlight_compensation: i32,
    pub color_brightness: i32,
    pub color_contrast: i32,
    pub color_saturation: i32,
    pub color_sharpness: i32,
    pub color_gain: i32,
    pub color_powerline_frequency: i32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            color_width: 1280,
            color_height: 720,
            depth_width: 640,
            depth_height: 576,
            fps: 30,
            color_exposure_time: -1,
            color_whitebalance: -1,
            color_backlight_compensation: 0,
            color_brightness: 128,
            color_contrast: 5,
            color_saturation: 32,
            color_sharpness: 2,
            color_gain: 0,
            color_powerline_frequency: 2,
        }
    }
}

/// Point cloud post-processing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    #[serde(rename = "greenscreenremoval")]
    pub greenscreen_removal: bool,
    /// Valid depth pixels to remove next to invalid ones, camera x direction
    pub depth_x_erosion: u32,
    /// Valid depth pixels to remove next to invalid ones, camera y direction
    pub depth_y_erosion: u32,
    /// Height filtering is done when `height_min < height_max`
    pub height_min: f64,
    pub height_max: f64,
    /// If > 0, remove points further than this from the (0,1,0) axis
    pub radius_filter: f64,
}

/// Depth filtering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilteringConfig {
    pub do_threshold: bool,
    /// Near distance threshold in metres
    pub threshold_near: f64,
    /// Far distance threshold in metres
    pub threshold_far: f64,
    pub map_color_to_depth: bool,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            do_threshold: true,
            threshold_near: 0.15,
            threshold_far: 6.0,
            map_color_to_depth: false,
        }
    }
}

fn identity_trafo() -> Vec<Vec<f64>> {
    (0..4)
        .map(|r| (0..4).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// Per-camera configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub serial: String,
    /// Recording filename (playback), relative to the descriptor directory
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default)]
    pub disabled: bool,
    /// Camera-to-world transform, 4x4 row major
    #[serde(default = "identity_trafo")]
    pub trafo: Vec<Vec<f64>>,
    /// Overrides the intrinsics reported by the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<Intrinsics>,
    /// Set at runtime once the camera has been found
    #[serde(skip)]
    pub connected: bool,
}

impl CameraConfig {
    /// A camera with an identity transform.
    pub fn new(kind: SourceKind, serial: &str) -> Self {
        Self {
            kind: kind.config_type().to_string(),
            serial: serial.to_string(),
            filename: String::new(),
            disabled: false,
            trafo: identity_trafo(),
            intrinsics: None,
            connected: false,
        }
    }

    /// Camera-to-world transform as a 4x4 matrix.
    pub fn transform(&self) -> Result<Array2<f64>, Error> {
        if self.trafo.iter().any(|row| row.len() != 4) {
            return Err(Error::Config(format!(
                "camera {}: trafo rows must have 4 elements",
                self.serial
            )));
        }
        let flat: Vec<f64> = self.trafo.iter().flatten().copied().collect();
        Ok(Array2::from_shape_vec((4, 4), flat)?)
    }
}

/// Complete capture configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub filtering: FilteringConfig,
    #[serde(rename = "camera", default)]
    pub cameras: Vec<CameraConfig>,
}

impl CaptureConfig {
    /// An empty configuration of the given kind with default parameters.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            version: CONFIG_VERSION,
            kind: kind.config_type().to_string(),
            system: SystemConfig::default(),
            sync: SyncConfig::default(),
            hardware: HardwareConfig::default(),
            processing: ProcessingConfig::default(),
            filtering: FilteringConfig::default(),
            cameras: Vec::new(),
        }
    }

    /// Load a configuration file, checking version and type.
    pub fn from_file<P: AsRef<Path>>(path: P, kind: SourceKind) -> Result<Self, Error> {
        let path = path.as_ref();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if !is_json {
            return Err(Error::Config(format!(
                "unknown configuration file type: '{}'",
                path.display()
            )));
        }
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "camera config {} not found",
                    path.display()
                )));
            }
            Err(err) => return Err(Error::Io(err)),
        };
        Self::from_json_str(&text, kind)
            .map_err(|err| Error::Config(format!("camera config {}: {}", path.display(), err)))
    }

    /// Parse an inline JSON document, checking version and type.
    pub fn from_json_str(text: &str, kind: SourceKind) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(text)?;
        let version = value.get("version").and_then(Value::as_u64).unwrap_or(0);
        if version != CONFIG_VERSION as u64 {
            return Err(Error::Config(format!(
                "ignored, is version {} not {}",
                version, CONFIG_VERSION
            )));
        }
        let wanted = kind.config_type();
        let found = value.get("type").and_then(Value::as_str).unwrap_or("");
        if found != wanted {
            return Err(Error::Config(format!(
                "ignored, is not {} but {}",
                wanted, found
            )));
        }
        let config: CaptureConfig = serde_json::from_value(value)?;
        for camera in &config.cameras {
            camera.transform()?;
        }
        Ok(config)
    }

    /// Serialize the configuration.
    ///
    /// With `for_recording` the result describes the recording that a
    /// grabber with `record_to_directory` produces: every type becomes
    /// `orbbec_playback`, recording filenames are filled in and
    /// `record_to_directory` is cleared.
    pub fn to_json(&self, for_recording: bool) -> Value {
        let mut config = self.clone();
        if for_recording {
            let playback = SourceKind::Playback.config_type().to_string();
            config.kind = playback.clone();
            config.system.record_to_directory.clear();
            for camera in &mut config.cameras {
                camera.kind = playback.clone();
                if camera.filename.is_empty() {
                    camera.filename = recording_filename(&camera.serial);
                }
            }
        }
        serde_json::to_value(&config).unwrap_or(Value::Null)
    }

    /// Pretty-printed JSON, see [`Self::to_json`].
    pub fn to_json_string(&self, for_recording: bool) -> String {
        serde_json::to_string_pretty(&self.to_json(for_recording)).unwrap_or_default()
    }

    /// Cameras that are not disabled.
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.iter().filter(|c| !c.disabled)
    }

    /// Look up a camera by serial number.
    pub fn camera(&self, serial: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.serial == serial)
    }

    pub fn camera_mut(&mut self, serial: &str) -> Option<&mut CameraConfig> {
        self.cameras.iter_mut().find(|c| c.serial == serial)
    }
}

/// Default recording filename for a camera serial.
pub fn recording_filename(serial: &str) -> String {
    format!("{}.{}", serial, crate::recording::RECORDING_EXTENSION)
}
