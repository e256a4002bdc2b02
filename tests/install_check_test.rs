// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Process-wide backend behaviour without camera hardware.
//!
//! This test binary installs the no-hardware backend before anything else
//! touches the process-wide state.

use orbbec_capture::{API_VERSION, ConfigSource, Error, backend, open_grabber};
use std::sync::{Arc, Once};

static INSTALL: Once = Once::new();

fn no_hardware() {
    INSTALL.call_once(|| {
        backend::install(Arc::new(backend::NoHardwareContext)).expect("first install");
    });
}

#[test]
fn test_auto_finds_no_cameras() {
    no_hardware();
    let err = open_grabber(ConfigSource::Auto, API_VERSION)
        .into_result()
        .err()
        .expect("no cameras");
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(err.to_string(), "no orbbec cameras found");
}

#[test]
fn test_second_install_fails() {
    no_hardware();
    let err = backend::install(Arc::new(backend::NoHardwareContext)).unwrap_err();
    assert!(matches!(err, Error::BackendAlreadyInitialised(_)));
    assert_eq!(backend::installed().as_deref(), Some("none"));
}

#[test]
fn test_api_version_checked_before_backend() {
    no_hardware();
    assert!(matches!(
        open_grabber(ConfigSource::Auto, 0).into_result(),
        Err(Error::ApiVersionMismatch { .. })
    ));
}
