// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Tile directory.
//!
//! Every point carries a tile byte naming the camera(s) it came from. Tile
//! indices are camera bitmasks:
//!
//! ```text
//!   tile 0        no tiling, all cameras
//!   tile 1 << i   camera i alone
//!   other         fused subset of cameras (bitwise OR of the above)
//! ```

use crate::{camera::Error, processing::normalize};

/// Description of one tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileInfo {
    /// Viewing direction in world coordinates, `None` for tile 0 or when
    /// the contributing cameras cancel out
    pub normal: Option<[f32; 3]>,
    /// Serial of the single contributing camera
    pub camera_name: Option<String>,
    /// Bitmask of contributing cameras
    pub camera_mask: u8,
    /// Number of contributing cameras
    pub ncamera: u8,
}

/// Per-source table of [`TileInfo`], fixed for the lifetime of the source.
#[derive(Clone, Debug)]
pub struct TileDirectory {
    tiles: Vec<TileInfo>,
}

impl TileDirectory {
    /// Build the directory from `(serial, view direction)` of every camera,
    /// in camera index order.
    ///
    /// With `single_tile >= 0` every point is stamped with that tile, and
    /// only tiles up to and including it are exposed. Callers validate
    /// `single_tile` against the camera count first.
    pub fn new(cameras: &[(String, [f32; 3])], single_tile: i32) -> Self {
        let n = cameras.len().min(crate::camera::MAX_CAMERAS);
        let maxtile = if single_tile >= 0 {
            single_tile as usize + 1
        } else {
            1usize << n
        };

        let tiles = (0..maxtile)
            .map(|index| {
                if index == 0 {
                    return TileInfo {
                        normal: None,
                        camera_name: None,
                        camera_mask: 0,
                        ncamera: n as u8,
                    };
                }
                let mask = index as u8;
                let members: Vec<_> = (0..n).filter(|i| mask & (1 << i) != 0).collect();
                let sum = members.iter().fold([0.0f32; 3], |acc, &i| {
                    let v = cameras[i].1;
                    [acc[0] + v[0], acc[1] + v[1], acc[2] + v[2]]
                });
                TileInfo {
                    normal: if members.is_empty() {
                        None
                    } else {
                        normalize(sum)
                    },
                    camera_name: match members.as_slice() {
                        [only] => Some(cameras[*only].0.clone()),
                        _ => None,
                    },
                    camera_mask: mask,
                    ncamera: members.len() as u8,
                }
            })
            .collect();
        Self { tiles }
    }

    /// Number of tile slots, at least 1.
    pub fn maxtile(&self) -> usize {
        self.tiles.len()
    }

    pub fn get(&self, index: usize) -> Result<&TileInfo, Error> {
        self.tiles.get(index).ok_or_else(|| {
            Error::OutOfRange(format!(
                "tile {} not in [0, {})",
                index,
                self.tiles.len()
            ))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileInfo> {
        self.tiles.iter()
    }
}

/// Check a configured `single_tile` against the number of cameras.
pub fn validate_single_tile(single_tile: i32, ncameras: usize) -> Result<(), Error> {
    if single_tile < 0 {
        return Ok(());
    }
    let limit = 1i64 << ncameras.min(crate::camera::MAX_CAMERAS);
    if single_tile as i64 >= limit {
        return Err(Error::Config(format!(
            "single_tile {} out of range for {} cameras",
            single_tile, ncameras
        )));
    }
    Ok(())
}
