// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point cloud file output.
//!
//! Frames are written as binary little-endian PLY with one 16-byte record per
//! point:
//!
//! ```text
//! ┌───────┬───────┬───────┬─────┬───────┬──────┬──────────┐
//! │ x:f32 │ y:f32 │ z:f32 │ red │ green │ blue │ tile:u8  │
//! │ 4B    │ 4B    │ 4B    │ 1B  │ 1B    │ 1B   │ 1B       │
//! └───────┴───────┴───────┴─────┴───────┴──────┴──────────┘
//! ```

use crate::{
    camera::Error,
    frame::{Frame, Point},
};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
};

/// Bytes per point in the binary body.
pub const PLY_POINT_STRIDE: usize = 16;

/// Build the PLY header for `n_points` points.
pub fn ply_header(n_points: usize, timestamp: u64) -> String {
    format!(
        "ply\n\
         format binary_little_endian 1.0\n\
         comment timestamp {}\n\
         element vertex {}\n\
         property float x\n\
         property float y\n\
         property float z\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         property uchar tile\n\
         end_header\n",
        timestamp, n_points
    )
}

/// Pack points into the 16-byte binary record format.
#[inline(never)]
pub fn format_points_into(points: &[Point], out: &mut [u8]) {
    assert!(out.len() >= PLY_POINT_STRIDE * points.len());

    for (p, rec) in points.iter().zip(out.chunks_exact_mut(PLY_POINT_STRIDE)) {
        rec[0..4].copy_from_slice(&p.x.to_le_bytes());
        rec[4..8].copy_from_slice(&p.y.to_le_bytes());
        rec[8..12].copy_from_slice(&p.z.to_le_bytes());
        rec[12] = p.r;
        rec[13] = p.g;
        rec[14] = p.b;
        rec[15] = p.tile;
    }
}

/// Encode a complete PLY file in memory.
pub fn encode_ply(frame: &Frame) -> Vec<u8> {
    let header = ply_header(frame.len(), frame.timestamp());
    let mut data = vec![0u8; header.len() + PLY_POINT_STRIDE * frame.len()];
    data[..header.len()].copy_from_slice(header.as_bytes());
    format_points_into(frame.points(), &mut data[header.len()..]);
    data
}

/// Write a frame as a binary PLY file.
pub fn write_ply<P: AsRef<Path>>(path: P, frame: &Frame) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&encode_ply(frame))?;
    writer.flush()?;
    Ok(())
}

/// Read a PLY file written by [`write_ply`].
pub fn read_ply<P: AsRef<Path>>(path: P) -> Result<Frame, Error> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut n_points = None;
    let mut timestamp = 0;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "PLY header not terminated",
            )));
        }
        let trimmed = line.trim_end();
        if trimmed == "end_header" {
            break;
        }
        if let Some(n) = trimmed.strip_prefix("element vertex ") {
            n_points = n.parse::<usize>().ok();
        } else if let Some(ts) = trimmed.strip_prefix("comment timestamp ") {
            timestamp = ts.parse::<u64>().unwrap_or(0);
        } else if trimmed.starts_with("format ") && trimmed != "format binary_little_endian 1.0" {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported PLY {}", trimmed),
            )));
        }
    }

    let n_points = n_points.ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "PLY header has no vertex element",
        ))
    })?;
    let mut body = vec![0u8; n_points * PLY_POINT_STRIDE];
    reader.read_exact(&mut body)?;

    let mut frame = Frame::with_capacity(timestamp, n_points);
    for rec in body.chunks_exact(PLY_POINT_STRIDE) {
        let f = |o: usize| f32::from_le_bytes([rec[o], rec[o + 1], rec[o + 2], rec[o + 3]]);
        frame.push(Point::new(
            f(0),
            f(4),
            f(8),
            rec[12],
            rec[13],
            rec[14],
            rec[15],
        ));
    }
    Ok(frame)
}
