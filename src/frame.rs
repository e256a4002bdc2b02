// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point cloud frames handed to the caller.
//!
//! A [`Frame`] is produced by the capture engine and then owned exclusively
//! by whoever called [`crate::Source::get`]. The engine keeps no reference to
//! it, so frames can be moved to other threads or kept as long as needed.
//!
//! ```
//! use orbbec_capture::frame::{Frame, Point};
//!
//! let mut frame = Frame::with_capacity(1_000_000, 2);
//! frame.push(Point::new(0.1, 0.2, 1.5, 255, 0, 0, 1));
//! frame.push(Point::new(0.1, 0.3, 1.5, 0, 255, 0, 1));
//! assert_eq!(frame.len(), 2);
//! assert_eq!(frame.timestamp(), 1_000_000);
//! ```

/// A single 3D sample in world coordinates (metres) with its color.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Tile bit of the originating camera (`1 << camera_index`)
    pub tile: u8,
}

impl Point {
    #[inline]
    pub fn new(x: f32, y: f32, z: f32, r: u8, g: u8, b: u8, tile: u8) -> Self {
        Self {
            x,
            y,
            z,
            r,
            g,
            b,
            tile,
        }
    }

    /// Bit-for-bit equality of position and color, ignoring the tile.
    pub fn same_sample(&self, other: &Point) -> bool {
        self.x.to_bits() == other.x.to_bits()
            && self.y.to_bits() == other.y.to_bits()
            && self.z.to_bits() == other.z.to_bits()
            && self.r == other.r
            && self.g == other.g
            && self.b == other.b
    }
}

/// An auxiliary image attached to a frame (raw RGB or depth of one camera).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxiliaryData {
    /// e.g. `rgb.<serial>` or `depth.<serial>`
    pub name: String,
    /// e.g. `width=640,height=576,stride=2560,bpp=4,format=BGRA`
    pub description: String,
    pub data: Vec<u8>,
}

/// A timestamped point cloud.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    timestamp: u64,
    cellsize: f32,
    points: Vec<Point>,
    auxiliary: Vec<AuxiliaryData>,
}

impl Frame {
    /// Create an empty frame with the given timestamp (microseconds).
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Create an empty frame with room for `capacity` points.
    pub fn with_capacity(timestamp: u64, capacity: usize) -> Self {
        Self {
            timestamp,
            points: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Capture timestamp in microseconds.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Approximate distance between neighbouring points, in metres.
    #[inline]
    pub fn cellsize(&self) -> f32 {
        self.cellsize
    }

    pub fn set_cellsize(&mut self, cellsize: f32) {
        self.cellsize = cellsize;
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[inline]
    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Append all points of another cloud.
    pub fn extend_from_slice(&mut self, points: &[Point]) {
        self.points.extend_from_slice(points);
    }

    /// Number of points originating from cameras in `tile_mask`.
    pub fn count_in_tile(&self, tile_mask: u8) -> usize {
        self.points
            .iter()
            .filter(|p| p.tile & tile_mask != 0)
            .count()
    }

    /// Auxiliary images attached by the capture engine.
    pub fn auxiliary(&self) -> &[AuxiliaryData] {
        &self.auxiliary
    }

    /// Look up an auxiliary image by name.
    pub fn auxiliary_by_name(&self, name: &str) -> Option<&AuxiliaryData> {
        self.auxiliary.iter().find(|a| a.name == name)
    }

    pub fn add_auxiliary(&mut self, aux: AuxiliaryData) {
        self.auxiliary.push(aux);
    }

    /// Detect a constant-fill cloud: with more than one point, the first
    /// point and the one halfway must differ.
    pub fn is_degenerate(&self) -> bool {
        let n = self.points.len();
        if n <= 1 {
            return true;
        }
        let halfway = n.div_ceil(2).min(n - 1);
        self.points[0].same_sample(&self.points[halfway])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_push_and_counts() {
        let mut frame = Frame::with_capacity(42, 4);
        assert!(frame.is_empty());
        frame.push(Point::new(1.0, 2.0, 3.0, 1, 2, 3, 1));
        frame.push(Point::new(4.0, 5.0, 6.0, 4, 5, 6, 2));
        frame.push(Point::new(7.0, 8.0, 9.0, 7, 8, 9, 2));

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.timestamp(), 42);
        assert_eq!(frame.count_in_tile(1), 1);
        assert_eq!(frame.count_in_tile(2), 2);
        assert_eq!(frame.count_in_tile(3), 3);
    }

    #[test]
    fn test_same_sample_ignores_tile() {
        let a = Point::new(1.0, 2.0, 3.0, 10, 20, 30, 1);
        let b = Point::new(1.0, 2.0, 3.0, 10, 20, 30, 2);
        let c = Point::new(1.0, 2.0, 3.0, 10, 20, 31, 1);
        assert!(a.same_sample(&b));
        assert!(!a.same_sample(&c));
    }

    #[test]
    fn test_degenerate_detection() {
        let mut frame = Frame::new(0);
        assert!(frame.is_degenerate());

        for _ in 0..5 {
            frame.push(Point::new(1.0, 1.0, 1.0, 9, 9, 9, 1));
        }
        assert!(frame.is_degenerate());

        let mut frame = Frame::new(0);
        for i in 0..5 {
            frame.push(Point::new(i as f32, 1.0, 1.0, 9, 9, 9, 1));
        }
        assert!(!frame.is_degenerate());
    }

    #[test]
    fn test_auxiliary_lookup() {
        let mut frame = Frame::new(0);
        frame.add_auxiliary(AuxiliaryData {
            name: "rgb.CL123".into(),
            description: "width=1,height=1,stride=4,bpp=4,format=BGRA".into(),
            data: vec![1, 2, 3, 4],
        });
        assert!(frame.auxiliary_by_name("rgb.CL123").is_some());
        assert!(frame.auxiliary_by_name("depth.CL123").is_none());
    }
}
