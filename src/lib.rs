// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Orbbec Capture Library
//!
//! This library turns one or more depth cameras, live or recorded, into a
//! stream of merged, colored point cloud frames.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────┐     ┌─────────────────┐
//! │  DeviceContext  │ ──► │  Capture      │ ──► │  Frame          │
//! │  (synthetic /   │     │  engine       │     │  (caller-owned) │
//! │   playback)     │     │  + workers    │     └─────────────────┘
//! └─────────────────┘     └───────────────┘              │
//!                                                         ▼
//!                                ┌─────────────────────────────────────┐
//!                                │  formats::write_ply                 │
//!                                └─────────────────────────────────────┘
//! ```
//!
//! A [`Source`] moves through `Opened -> Started -> Stopped`. Once a frame is
//! returned the caller owns it; the source keeps no reference.
//!
//! # Modules
//!
//! - [`camera`]: Common types, device traits, and error handling
//! - [`config`]: `cameraconfig.json` loading and writing
//! - [`source`]: The public source handle
//! - [`tiles`]: Tile directory
//! - [`processing`]: Depth to point cloud reconstruction
//! - [`recording`]: `.obrec` recording format
//! - [`playback`]: Recording playback backend
//! - [`synthetic`]: Emulated cameras (feature `synthetic`)
//! - [`backend`]: Process-wide device backend
//! - [`formats`]: PLY output
//!
//! # Example
//!
//! ```ignore
//! use orbbec_capture::{API_VERSION, ConfigSource, open_grabber};
//!
//! let source = open_grabber(ConfigSource::Auto, API_VERSION).into_result()?;
//! source.start()?;
//! while let Some(frame) = source.get_nonempty()? {
//!     println!("{} points at {}", frame.len(), frame.timestamp());
//! }
//! source.stop();
//! ```

pub mod backend;
pub mod camera;
mod capture;
pub mod config;
pub mod formats;
pub mod frame;
pub mod playback;
pub mod processing;
pub mod recording;
pub mod source;
#[cfg(feature = "synthetic")]
pub mod synthetic;
pub mod tiles;
mod worker;

// Re-exports for convenience
pub use camera::{
    API_VERSION, CameraDevice, DeviceContext, DeviceInfo, Error, ErrorKind, Frameset, Intrinsics,
    MAX_CAMERAS, Outcome, SourceKind, StopToken,
};
pub use config::{CaptureConfig, ConfigSource};
pub use frame::{AuxiliaryData, Frame, Point};
pub use source::{Source, open_grabber, open_grabber_with, open_playback};
pub use tiles::TileInfo;

/// Version of this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
