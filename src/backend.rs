// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Process-wide device backend.
//!
//! The backend that live grabbers use is chosen once per process, either by
//! an explicit [`install`] before first use or from the
//! `ORBBEC_CAPTURE_BACKEND` environment variable on first use:
//!
//! | value            | backend                                     |
//! |------------------|---------------------------------------------|
//! | unset / `none`   | no hardware, enumeration finds no cameras   |
//! | `synthetic`      | one emulated camera                         |
//! | `synthetic:N`    | `N` emulated cameras                        |
//!
//! Once chosen the backend lives until the process exits. Playback sources
//! never touch this state.

use crate::{
    camera::{CameraDevice, DeviceContext, DeviceInfo, Error},
    config::HardwareConfig,
};
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Environment variable selecting the device backend.
pub const BACKEND_ENV: &str = "ORBBEC_CAPTURE_BACKEND";

static BACKEND: OnceLock<Arc<dyn DeviceContext>> = OnceLock::new();

/// Backend used when no camera hardware support is available.
pub struct NoHardwareContext;

impl DeviceContext for NoHardwareContext {
    fn name(&self) -> &str {
        "none"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error> {
        Ok(Vec::new())
    }

    fn open(&self, serial: &str, _hardware: &HardwareConfig) -> Result<Box<dyn CameraDevice>, Error> {
        Err(Error::NotFound(format!("camera {} not found", serial)))
    }
}

/// Construct a backend by name.
pub fn from_name(name: &str) -> Result<Arc<dyn DeviceContext>, Error> {
    let (kind, arg) = match name.split_once(':') {
        Some((kind, arg)) => (kind, Some(arg)),
        None => (name, None),
    };
    match kind {
        "" | "none" => Ok(Arc::new(NoHardwareContext)),
        "synthetic" => synthetic(arg),
        _ => Err(Error::BackendNotFound(name.to_string())),
    }
}

#[cfg(feature = "synthetic")]
fn synthetic(arg: Option<&str>) -> Result<Arc<dyn DeviceContext>, Error> {
    let count = match arg {
        None => 1,
        Some(n) => n
            .parse::<usize>()
            .map_err(|_| Error::BackendLoad(format!("invalid synthetic camera count '{}'", n)))?,
    };
    Ok(Arc::new(crate::synthetic::SyntheticContext::new(count)?))
}

#[cfg(not(feature = "synthetic"))]
fn synthetic(_arg: Option<&str>) -> Result<Arc<dyn DeviceContext>, Error> {
    Err(Error::BackendLoad(
        "built without the synthetic feature".to_string(),
    ))
}

/// Install the process-wide backend.
///
/// Fails with [`Error::BackendAlreadyInitialised`] once a backend has been
/// installed or selected by first use.
pub fn install(context: Arc<dyn DeviceContext>) -> Result<(), Error> {
    let name = context.name().to_string();
    BACKEND.set(context).map_err(|_| {
        Error::BackendAlreadyInitialised(
            BACKEND
                .get()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
        )
    })?;
    info!(backend = %name, "device backend installed");
    Ok(())
}

/// The process-wide backend, selecting it from the environment on first use.
pub fn context() -> Result<Arc<dyn DeviceContext>, Error> {
    if let Some(context) = BACKEND.get() {
        return Ok(context.clone());
    }
    let name = std::env::var(BACKEND_ENV).unwrap_or_default();
    let context = from_name(&name)?;
    if BACKEND.set(context).is_ok() {
        info!(backend = %name, "device backend selected from environment");
    }
    BACKEND
        .get()
        .cloned()
        .ok_or_else(|| Error::BackendLoad("backend initialisation raced".to_string()))
}

/// Name of the installed backend, if one has been chosen.
pub fn installed() -> Option<String> {
    BACKEND.get().map(|c| c.name().to_string())
}
