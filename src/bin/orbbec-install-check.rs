// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Verify that the capture library loads and can talk to the device backend.
//!
//! Succeeds when cameras are found, and also when the backend works but no
//! camera is connected.

use clap::Parser;
use orbbec_capture::{API_VERSION, ConfigSource, Error, open_grabber, version};
use tracing::{info, level_filters::LevelFilter, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Application log level
    #[arg(long, env, default_value = "warn")]
    rust_log: LevelFilter,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.rust_log)
        .init();
    info!("orbbec-capture {}", version());

    let (result, warning) = open_grabber(ConfigSource::Auto, API_VERSION).into_parts();
    if let Some(msg) = warning {
        warn!("{}", msg);
    }
    match result {
        Ok(source) => {
            println!(
                "orbbec-install-check: ok, {} camera(s)",
                source.camera_count()?
            );
            source.stop();
            Ok(())
        }
        Err(Error::NotFound(msg)) if msg == "no orbbec cameras found" => {
            println!("orbbec-install-check: ok, {}", msg);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
