// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, TESTING_ENV};
use clap::Parser;
use orbbec_capture::{
    API_VERSION, ConfigSource, Error, Frame, Source, formats, open_grabber, open_playback,
};
use std::{path::Path, time::Instant};
use tracing::{debug, error, info, warn};

/// Consecutive empty frames tolerated before giving up.
const MAX_EMPTY_RETRIES: usize = 10;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.rust_log)
        .init();

    let config = ConfigSource::parse(&args.configfile);
    let outcome = if args.playback {
        open_playback(config, API_VERSION)
    } else {
        open_grabber(config, API_VERSION)
    };
    let source = match outcome.into_parts() {
        (Ok(source), warning) => {
            if let Some(msg) = warning {
                warn!("{}", msg);
            }
            source
        }
        (Err(err), _) => {
            error!("cannot open source: {}", err);
            if std::env::var_os(TESTING_ENV).is_some() {
                info!("{} is set, treating open failure as success", TESTING_ENV);
                return Ok(());
            }
            return Err(err.into());
        }
    };

    if args.dump_config {
        println!("{}", source.config_json()?);
    }
    if args.rgb || args.depth {
        source.request_auxiliary_data(args.rgb, args.depth)?;
    }
    if args.writes_files() {
        std::fs::create_dir_all(&args.directory)?;
    }

    source.start()?;
    let result = grab(&source, &args);
    source.stop();
    result
}

fn grab(source: &Source, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut grabbed = 0u64;
    let mut empty = 0;

    while args.count == 0 || grabbed < args.count {
        let frame = match source.get_nonempty() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("end of stream after {} frames", grabbed);
                break;
            }
            Err(Error::TransientEmpty) if empty < MAX_EMPTY_RETRIES => {
                empty += 1;
                warn!("empty point cloud, retrying");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        empty = 0;
        grabbed += 1;
        debug!(
            timestamp = frame.timestamp(),
            points = frame.len(),
            cellsize = frame.cellsize(),
            "grabbed frame {}",
            grabbed
        );
        if args.writes_files() {
            save(Path::new(&args.directory), &frame)?;
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        info!(
            "grabbed {} frames in {:.2}s ({:.1} fps)",
            grabbed,
            elapsed,
            grabbed as f64 / elapsed
        );
    }
    Ok(())
}

/// Write a frame as PLY, plus any auxiliary images as raw files.
fn save(dir: &Path, frame: &Frame) -> Result<(), Error> {
    let path = dir.join(format!("pointcloud-{}.ply", frame.timestamp()));
    formats::write_ply(&path, frame)?;
    for aux in frame.auxiliary() {
        let raw = dir.join(format!("{}-{}.raw", aux.name, frame.timestamp()));
        std::fs::write(&raw, &aux.data)?;
        debug!(path = %raw.display(), "{}", aux.description);
    }
    Ok(())
}
