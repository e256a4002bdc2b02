// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Emulated cameras for running without hardware.
//!
//! Every synthetic camera renders a striped "watermelon" sphere that rotates
//! around the vertical axis, 1.5m in front of the camera. Like real devices
//! the very first frameset after `start()` carries no depth data.

use crate::{
    camera::{
        CameraDevice, DeviceContext, DeviceInfo, Error, Frameset, Intrinsics, MAX_CAMERAS, StopToken,
    },
    config::HardwareConfig,
};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Serial number prefix of emulated cameras.
pub const SYNTHETIC_SERIAL_PREFIX: &str = "SYN";

/// Horizontal field of view of the emulated depth sensor (degrees).
const HFOV_DEG: f32 = 75.0;
/// Sphere centre distance from the camera (metres).
const SPHERE_DISTANCE: f32 = 1.5;
/// Sphere radius (metres).
const SPHERE_RADIUS: f32 = 0.4;
/// Number of stripes around the sphere.
const STRIPES: f32 = 12.0;
/// Rotation speed (radians per second).
const ANGULAR_VELOCITY: f32 = 0.8;

/// Backend with `count` emulated cameras.
pub struct SyntheticContext {
    count: usize,
    /// Sleep between framesets to emulate the configured frame rate
    realtime: bool,
}

impl SyntheticContext {
    pub fn new(count: usize) -> Result<Self, Error> {
        if count == 0 || count > MAX_CAMERAS {
            return Err(Error::BackendLoad(format!(
                "synthetic camera count must be 1..={}, got {}",
                MAX_CAMERAS, count
            )));
        }
        Ok(Self {
            count,
            realtime: true,
        })
    }

    /// Produce framesets as fast as they are consumed.
    pub fn without_pacing(mut self) -> Self {
        self.realtime = false;
        self
    }

    fn serial(index: usize) -> String {
        format!("{}{:04}", SYNTHETIC_SERIAL_PREFIX, index)
    }
}

impl DeviceContext for SyntheticContext {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, Error> {
        Ok((0..self.count)
            .map(|i| DeviceInfo {
                serial: Self::serial(i),
                name: "Synthetic Femto".to_string(),
            })
            .collect())
    }

    fn open(&self, serial: &str, hardware: &HardwareConfig) -> Result<Box<dyn CameraDevice>, Error> {
        let index = (0..self.count)
            .find(|&i| Self::serial(i) == serial)
            .ok_or_else(|| Error::NotFound(format!("no synthetic camera {}", serial)))?;
        Ok(Box::new(SyntheticCamera::new(
            serial,
            index,
            hardware,
            self.realtime,
        )))
    }
}

/// One emulated camera.
pub struct SyntheticCamera {
    serial: String,
    width: u32,
    height: u32,
    intrinsics: Intrinsics,
    frame_interval: Duration,
    realtime: bool,
    /// Phase offset so cameras do not render identical images
    phase: f32,
    started_at: Option<(Instant, u64)>,
    frame_number: u64,
    stopped: bool,
}

impl SyntheticCamera {
    pub fn new(serial: &str, index: usize, hardware: &HardwareConfig, realtime: bool) -> Self {
        let width = hardware.depth_width.max(1);
        let height = hardware.depth_height.max(1);
        let fps = hardware.fps.max(1);
        Self {
            serial: serial.to_string(),
            width,
            height,
            intrinsics: Intrinsics::from_fov(width, height, HFOV_DEG),
            frame_interval: Duration::from_micros(1_000_000 / fps as u64),
            realtime,
            phase: index as f32 * 0.5,
            started_at: None,
            frame_number: 0,
            stopped: false,
        }
    }

    /// Render the sphere at rotation `angle`.
    fn render(&self, timestamp: u64, angle: f32) -> Frameset {
        let n = self.width as usize * self.height as usize;
        let mut depth = vec![0u16; n];
        let mut color = vec![0u8; n * 4];
        let Intrinsics { fx, fy, ppx, ppy } = self.intrinsics;
        let r2 = SPHERE_RADIUS * SPHERE_RADIUS;

        for v in 0..self.height as usize {
            for u in 0..self.width as usize {
                // Ray (dx, dy, 1) against sphere centred at (0, 0, D)
                let dx = (u as f32 - ppx) / fx;
                let dy = (v as f32 - ppy) / fy;
                let a = dx * dx + dy * dy + 1.0;
                let b = -2.0 * SPHERE_DISTANCE;
                let c = SPHERE_DISTANCE * SPHERE_DISTANCE - r2;
                let disc = b * b - 4.0 * a * c;
                if disc < 0.0 {
                    continue;
                }
                let t = (-b - disc.sqrt()) / (2.0 * a);
                let idx = v * self.width as usize + u;
                depth[idx] = (t * 1000.0).round() as u16;

                // Longitude on the sphere surface decides the stripe
                let px = dx * t;
                let pz = t - SPHERE_DISTANCE;
                let py = dy * t;
                let longitude = px.atan2(pz) + angle;
                let stripe = (longitude * STRIPES / std::f32::consts::TAU).rem_euclid(1.0);
                let shade = (0.6 + 0.4 * (-py / SPHERE_RADIUS)).clamp(0.2, 1.0);
                let (r, g, b) = if stripe < 0.5 {
                    (40.0, 150.0, 40.0)
                } else {
                    (200.0, 60.0, 70.0)
                };
                let pixel = &mut color[idx * 4..idx * 4 + 4];
                pixel[0] = (b * shade) as u8;
                pixel[1] = (g * shade) as u8;
                pixel[2] = (r * shade) as u8;
                pixel[3] = 255;
            }
        }

        Frameset {
            timestamp,
            width: self.width,
            height: self.height,
            depth,
            color,
        }
    }
}

impl CameraDevice for SyntheticCamera {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.stopped {
            return Err(Error::UseAfterClose);
        }
        self.started_at = Some((Instant::now(), crate::camera::timestamp()?));
        self.frame_number = 0;
        debug!(serial = %self.serial, "synthetic camera started");
        Ok(())
    }

    fn wait_for_frameset(&mut self, stop: &StopToken) -> Result<Option<Frameset>, Error> {
        if self.stopped || stop.is_stopped() {
            return Ok(None);
        }
        let Some((started, base)) = self.started_at else {
            return Ok(None);
        };

        let offset = self.frame_interval * self.frame_number as u32;
        if self.realtime {
            let due = started + offset;
            let now = Instant::now();
            if due > now && !stop.sleep(due - now) {
                return Ok(None);
            }
        }
        let timestamp = base + offset.as_micros() as u64;
        let angle = self.phase + ANGULAR_VELOCITY * offset.as_secs_f32();
        let first = self.frame_number == 0;
        self.frame_number += 1;

        let mut frameset = self.render(timestamp, angle);
        if first {
            // warmup frame carries no depth
            frameset.depth.fill(0);
        }
        trace!(serial = %self.serial, timestamp, "synthetic frameset");
        Ok(Some(frameset))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
