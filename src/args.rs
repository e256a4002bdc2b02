// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use tracing::level_filters::LevelFilter;

/// Environment variable that turns an open failure into a clean exit, for
/// test runs on machines without cameras.
pub const TESTING_ENV: &str = "ORBBEC_CAPTURE_TESTING";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of frames to grab, 0 to grab until the end of the stream.
    pub count: u64,

    /// Directory for the pointcloud-<timestamp>.ply files, or "-" to drop
    /// frames after capture.
    pub directory: String,

    /// Camera configuration file or recording descriptor.  Live capture
    /// accepts "auto" to use every connected camera.
    #[arg(default_value = "")]
    pub configfile: String,

    /// Play back a recording instead of grabbing from cameras.
    #[arg(long, env)]
    pub playback: bool,

    /// Attach the color image of every camera to each frame.
    #[arg(long, env)]
    pub rgb: bool,

    /// Attach the depth image of every camera to each frame.
    #[arg(long, env)]
    pub depth: bool,

    /// Print the effective camera configuration before grabbing.
    #[arg(long, env)]
    pub dump_config: bool,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}

impl Args {
    /// Whether frames are written to disk.
    pub fn writes_files(&self) -> bool {
        self.directory != "-"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positional() {
        let args = Args::try_parse_from(["orbbec-grab", "10", "/tmp/out"]).unwrap();
        assert_eq!(args.count, 10);
        assert_eq!(args.directory, "/tmp/out");
        assert_eq!(args.configfile, "");
        assert!(args.writes_files());
        assert!(!args.playback);
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "orbbec-grab",
            "0",
            "-",
            "rec/cameraconfig.json",
            "--playback",
            "--rgb",
            "--rust-log",
            "debug",
        ])
        .unwrap();
        assert!(!args.writes_files());
        assert!(args.playback && args.rgb && !args.depth);
        assert_eq!(args.configfile, "rec/cameraconfig.json");
        assert_eq!(args.rust_log, LevelFilter::DEBUG);
    }

    #[test]
    fn test_missing_directory() {
        assert!(Args::try_parse_from(["orbbec-grab", "10"]).is_err());
    }
}
