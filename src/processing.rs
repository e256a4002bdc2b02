// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Depth + color to point cloud reconstruction.
//!
//! Every camera owns a [`CameraProcessor`] that turns framesets into world
//! coordinate points. Filters run in this order:
//!
//! 1. **Threshold** - drop pixels outside `[threshold_near, threshold_far]`.
//! 2. **Erosion** - drop valid pixels within `depth_x_erosion` columns or
//!    `depth_y_erosion` rows of an invalid pixel. Cleans up flying pixels at
//!    object edges.
//! 3. **Transform** - camera to world with the configured 4x4 `trafo`.
//! 4. **Height** - keep `height_min <= y <= height_max` (world Y is up).
//! 5. **Radius** - keep points within `radius_filter` of the world Y axis.
//! 6. **Greenscreen** - drop saturated green points.

use crate::{
    camera::{Error, Frameset, Intrinsics},
    config::{CameraConfig, FilteringConfig, ProcessingConfig},
    frame::Point,
};
use itertools::izip;
use ndarray::{Array1, Array2};

/// Depth values are delivered in millimetres.
const DEPTH_SCALE: f32 = 0.001;

/// Minimum saturation for a pixel to count as greenscreen.
const GREEN_MIN_SATURATION: f32 = 0.25;
/// Minimum value (brightness) for a pixel to count as greenscreen.
const GREEN_MIN_VALUE: f32 = 0.15;
/// Hue band (degrees) treated as greenscreen.
const GREEN_HUE_RANGE: (f32, f32) = (60.0, 150.0);

/// Per-camera reconstruction state.
#[derive(Clone)]
pub struct CameraProcessor {
    serial: String,
    intrinsics: Intrinsics,
    /// Rows 0..3 of the camera-to-world transform
    trafo: [[f32; 4]; 3],
    filtering: FilteringConfig,
    processing: ProcessingConfig,
    /// Tile byte stamped on every point
    tile: u8,
    /// Scratch validity mask, reused between framesets
    valid: Vec<bool>,
    eroded: Vec<bool>,
    cellsize: f32,
}

impl CameraProcessor {
    /// Build a processor for one camera.
    ///
    /// `intrinsics` come from the device unless the configuration overrides
    /// them.
    pub fn new(
        camera: &CameraConfig,
        intrinsics: Intrinsics,
        filtering: &FilteringConfig,
        processing: &ProcessingConfig,
        tile: u8,
    ) -> Result<Self, Error> {
        let t = camera.transform()?;
        let mut trafo = [[0.0f32; 4]; 3];
        for (r, row) in trafo.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = t[[r, c]] as f32;
            }
        }
        Ok(Self {
            serial: camera.serial.clone(),
            intrinsics: camera.intrinsics.unwrap_or(intrinsics),
            trafo,
            filtering: filtering.clone(),
            processing: processing.clone(),
            tile,
            valid: Vec::new(),
            eroded: Vec::new(),
            cellsize: 0.0,
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    /// Approximate point spacing of the most recent cloud, in metres.
    pub fn cellsize(&self) -> f32 {
        self.cellsize
    }

    /// Viewing direction of the camera in world coordinates (unit vector).
    pub fn view_direction(&self) -> [f32; 3] {
        let v = [self.trafo[0][2], self.trafo[1][2], self.trafo[2][2]];
        normalize(v).unwrap_or([0.0, 0.0, 1.0])
    }

    /// Convert one frameset into points.
    pub fn process(&mut self, frameset: &Frameset) -> Result<Vec<Point>, Error> {
        frameset.validate()?;
        let width = frameset.width as usize;
        let height = frameset.height as usize;
        let n = frameset.pixel_count();

        // ── Threshold ───────────────────────────────────────────────────
        let near = self.filtering.threshold_near as f32;
        let far = self.filtering.threshold_far as f32;
        let do_threshold = self.filtering.do_threshold;
        self.valid.clear();
        self.valid.extend(frameset.depth.iter().map(|&d| {
            let z = d as f32 * DEPTH_SCALE;
            d > 0 && (!do_threshold || (z >= near && z <= far))
        }));

        // ── Erosion ─────────────────────────────────────────────────────
        let x_erosion = self.processing.depth_x_erosion as usize;
        let y_erosion = self.processing.depth_y_erosion as usize;
        let mask: &[bool] = if x_erosion > 0 || y_erosion > 0 {
            erode(&self.valid, &mut self.eroded, width, height, x_erosion, y_erosion);
            &self.eroded
        } else {
            &self.valid
        };

        let height_min = self.processing.height_min as f32;
        let height_max = self.processing.height_max as f32;
        let do_height = height_min < height_max;
        let radius = self.processing.radius_filter as f32;
        let do_radius = radius > 0.0;
        let do_greenscreen = self.processing.greenscreen_removal;

        let Intrinsics { fx, fy, ppx, ppy } = self.intrinsics;
        let t = &self.trafo;
        let mut points = Vec::with_capacity(n / 2);
        let mut depth_sum = 0.0f64;

        for (idx, &depth, &ok, bgra) in izip!(
            0..n,
            frameset.depth.iter(),
            mask.iter(),
            frameset.color.chunks_exact(4)
        ) {
            if !ok {
                continue;
            }
            let u = (idx % width) as f32;
            let v = (idx / width) as f32;
            let zc = depth as f32 * DEPTH_SCALE;
            let xc = (u - ppx) * zc / fx;
            let yc = (v - ppy) * zc / fy;

            let x = t[0][0] * xc + t[0][1] * yc + t[0][2] * zc + t[0][3];
            let y = t[1][0] * xc + t[1][1] * yc + t[1][2] * zc + t[1][3];
            let z = t[2][0] * xc + t[2][1] * yc + t[2][2] * zc + t[2][3];

            if do_height && (y < height_min || y > height_max) {
                continue;
            }
            if do_radius && x * x + z * z > radius * radius {
                continue;
            }
            let (b, g, r) = (bgra[0], bgra[1], bgra[2]);
            if do_greenscreen && is_green(r, g, b) {
                continue;
            }
            depth_sum += zc as f64;
            points.push(Point::new(x, y, z, r, g, b, self.tile));
        }

        if points.is_empty() {
            tracing::warn!(serial = %self.serial, "captured empty point cloud from camera");
        } else {
            let mean_depth = (depth_sum / points.len() as f64) as f32;
            self.cellsize = mean_depth / fx.max(fy);
        }
        Ok(points)
    }

    /// Map a depth image pixel with a depth in millimetres to world
    /// coordinates.
    pub fn map2d3d(&self, x: f32, y: f32, depth_mm: f32) -> [f32; 3] {
        let Intrinsics { fx, fy, ppx, ppy } = self.intrinsics;
        let zc = depth_mm * DEPTH_SCALE;
        let camera = Array1::from(vec![(x - ppx) * zc / fx, (y - ppy) * zc / fy, zc, 1.0]);
        let trafo = Array2::from_shape_fn((3, 4), |(r, c)| self.trafo[r][c]);
        let world = trafo.dot(&camera);
        [world[0], world[1], world[2]]
    }

    /// Map a color image pixel to the corresponding depth image pixel.
    ///
    /// Depth is aligned to color, so the mapping is the identity inside the
    /// image and an error outside it.
    pub fn map_color_depth(
        &self,
        u: i32,
        v: i32,
        width: u32,
        height: u32,
    ) -> Result<(i32, i32), Error> {
        if u < 0 || v < 0 || u >= width as i32 || v >= height as i32 {
            return Err(Error::OutOfRange(format!(
                "pixel ({}, {}) outside {}x{} image of camera {}",
                u, v, width, height, self.serial
            )));
        }
        Ok((u, v))
    }
}

/// Unit vector in the direction of `v`, or `None` for a zero vector.
pub fn normalize(v: [f32; 3]) -> Option<[f32; 3]> {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len < 1e-6 {
        return None;
    }
    Some([v[0] / len, v[1] / len, v[2] / len])
}

/// Erode `valid` into `out`: a pixel survives only if every pixel within
/// `dx` columns and `dy` rows (in its row and column) is valid.
fn erode(valid: &[bool], out: &mut Vec<bool>, width: usize, height: usize, dx: usize, dy: usize) {
    out.clear();
    out.extend_from_slice(valid);
    let grid = match Array2::from_shape_vec((height, width), valid.to_vec()) {
        Ok(grid) => grid,
        Err(_) => return,
    };
    for ((row, col), &ok) in grid.indexed_iter() {
        if ok {
            continue;
        }
        let c0 = col.saturating_sub(dx);
        let c1 = (col + dx).min(width - 1);
        for c in c0..=c1 {
            out[row * width + c] = false;
        }
        let r0 = row.saturating_sub(dy);
        let r1 = (row + dy).min(height - 1);
        for r in r0..=r1 {
            out[r * width + col] = false;
        }
    }
}

/// HSV test for greenscreen pixels.
fn is_green(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max != g || max - min <= f32::EPSILON {
        return false;
    }
    let saturation = (max - min) / max;
    let hue = 60.0 * ((b - r) / (max - min) + 2.0);
    saturation > GREEN_MIN_SATURATION
        && max > GREEN_MIN_VALUE
        && hue >= GREEN_HUE_RANGE.0
        && hue <= GREEN_HUE_RANGE.1
}
