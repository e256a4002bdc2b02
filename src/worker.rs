// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-camera processing threads.
//!
//! The control thread hands each camera's frameset to that camera's worker
//! over a bounded channel and collects the resulting point clouds from a
//! shared results channel, so reconstruction of all cameras runs in
//! parallel.

use crate::{
    camera::{Error, Frameset},
    frame::{AuxiliaryData, Point},
    processing::CameraProcessor,
};
use kanal::{Receiver, Sender};
use std::thread::JoinHandle;
use tracing::{error, info_span, trace};

/// Work item for a camera worker.
pub struct Job {
    pub frameset: Frameset,
    pub want_rgb: bool,
    pub want_depth: bool,
}

/// Point cloud of one camera for one capture round.
pub struct CameraCloud {
    /// Camera index in the source
    pub camera: usize,
    pub timestamp: u64,
    pub points: Vec<Point>,
    pub cellsize: f32,
    pub auxiliary: Vec<AuxiliaryData>,
}

pub type WorkerResult = Result<CameraCloud, Error>;

/// Handle to a running camera worker.
pub struct Worker {
    tx: Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the processing thread for camera `index`.
    pub fn spawn(
        index: usize,
        processor: CameraProcessor,
        results: Sender<WorkerResult>,
    ) -> Result<Self, Error> {
        let (tx, rx) = kanal::bounded(1);
        let name = format!("orbbec-proc-{}", processor.serial());
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || worker_thread(index, processor, rx, results))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Queue a frameset for processing.
    pub fn submit(&self, job: Job) -> Result<(), Error> {
        self.tx
            .send(job)
            .map_err(|_| Error::Fatal("camera worker exited".to_string()))
    }

    /// Close the job channel and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        let _ = self.tx.close();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("camera worker panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_thread(
    index: usize,
    mut processor: CameraProcessor,
    rx: Receiver<Job>,
    results: Sender<WorkerResult>,
) {
    while let Ok(job) = rx.recv() {
        let result = info_span!("reconstruct", camera = index)
            .in_scope(|| processor.process(&job.frameset))
            .map(|points| {
                trace!(camera = index, points = points.len(), "processed frameset");
                CameraCloud {
                    camera: index,
                    timestamp: job.frameset.timestamp,
                    points,
                    cellsize: processor.cellsize(),
                    auxiliary: auxiliary_images(processor.serial(), &job),
                }
            });
        if results.send(result).is_err() {
            return;
        }
    }
}

/// Raw images attached to a frame when the caller asked for them.
fn auxiliary_images(serial: &str, job: &Job) -> Vec<AuxiliaryData> {
    let fs = &job.frameset;
    let mut aux = Vec::new();
    if job.want_rgb {
        aux.push(AuxiliaryData {
            name: format!("rgb.{}", serial),
            description: format!(
                "width={},height={},stride={},bpp=4,format=BGRA",
                fs.width,
                fs.height,
                fs.width * 4
            ),
            data: fs.color.clone(),
        });
    }
    if job.want_depth {
        aux.push(AuxiliaryData {
            name: format!("depth.{}", serial),
            description: format!(
                "width={},height={},stride={},bpp=2,format=Z16",
                fs.width,
                fs.height,
                fs.width * 2
            ),
            data: fs.depth.iter().flat_map(|d| d.to_le_bytes()).collect(),
        });
    }
    aux
}
