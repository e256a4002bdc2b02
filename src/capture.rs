// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture engine: camera setup, control thread and frame hand-off.
//!
//! ```text
//!                    ┌──────────────┐ Job  ┌──────────────┐
//!  CameraDevice 0 ─► │              │ ───► │ worker 0     │ ─┐
//!  CameraDevice 1 ─► │ control      │ ───► │ worker 1     │ ─┤ CameraCloud
//!       ...          │ thread       │      └──────────────┘  │
//!                    │              │ ◄──────────────────────┘
//!                    └──────┬───────┘
//!                           │ merged Frame (fresh)
//!                           ▼
//!                     Shared state  ◄── available() / get() / seek()
//! ```
//!
//! The control thread only captures when a consumer asked for a frame
//! (`want_new`). A frame that is never collected is replaced by the next
//! one. Seek requests are executed by the control thread between capture
//! rounds. A round that overlaps a seek is published first; a successful
//! seek then drops it, a failed seek leaves it for the consumer.
//!
//! Stopping trips a [`StopToken`] that devices poll while waiting. A control
//! thread still stuck in a device after [`STOP_GRACE`] is detached.

use crate::{
    camera::{CameraDevice, DeviceContext, Error, Frameset, MAX_CAMERAS, SourceKind, StopToken},
    config::{CaptureConfig, DEFAULT_CONFIG_FILE},
    frame::Frame,
    processing::CameraProcessor,
    recording::ObrecWriter,
    worker::{CameraCloud, Job, Worker, WorkerResult},
};
use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
    time::Duration,
};
use tracing::{debug, error, info, info_span, instrument, trace, warn};

/// Frames from non-reference cameras older than the reference frame are
/// dropped, at most this many times per capture round.
const MAX_STALE_DROPS: usize = 10;

/// How long `stop()` waits for the control thread before detaching it.
pub(crate) const STOP_GRACE: Duration = Duration::from_millis(500);

/// Frame hand-off state shared by the source handle and the control thread.
#[derive(Default)]
pub(crate) struct State {
    pub started: bool,
    pub stopped: bool,
    pub want_new: bool,
    pub fresh: Option<Frame>,
    pub eof: bool,
    pub error: Option<String>,
    pub seek_request: Option<u64>,
    pub seek_result: Option<Result<bool, String>>,
    pub want_rgb: bool,
    pub want_depth: bool,
    pub cellsize: f32,
    /// Most recent frameset size per camera
    pub sizes: Vec<(u32, u32)>,
}

#[derive(Default)]
pub(crate) struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    stop: StopToken,
}

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.cond
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.cond.notify_all();
    }

    /// True if a frame is ready. With `wait`, blocks until a frame is ready,
    /// the stream ended or the source was stopped.
    pub fn available(&self, wait: bool) -> Result<bool, Error> {
        let mut st = self.lock();
        loop {
            if st.fresh.is_some() {
                return Ok(true);
            }
            if let Some(msg) = &st.error {
                return Err(Error::Fatal(msg.clone()));
            }
            if st.eof || st.stopped {
                return Ok(false);
            }
            if !st.want_new {
                st.want_new = true;
                self.notify();
            }
            if !wait {
                return Ok(false);
            }
            st = self.wait(st);
        }
    }

    /// Take the fresh frame, requesting and waiting for one if needed.
    pub fn get(&self) -> Result<Option<Frame>, Error> {
        let mut st = self.lock();
        loop {
            if let Some(frame) = st.fresh.take() {
                return Ok(Some(frame));
            }
            if let Some(msg) = &st.error {
                return Err(Error::Fatal(msg.clone()));
            }
            if st.eof || st.stopped {
                return Ok(None);
            }
            if !st.want_new {
                st.want_new = true;
                self.notify();
            }
            st = self.wait(st);
        }
    }

    pub fn eof(&self) -> bool {
        let st = self.lock();
        st.eof && st.fresh.is_none()
    }

    /// Ask the control thread to seek and wait for the result.
    pub fn seek(&self, timestamp: u64) -> Result<bool, Error> {
        let mut st = self.lock();
        st.seek_result = None;
        st.seek_request = Some(timestamp);
        self.notify();
        loop {
            if let Some(result) = st.seek_result.take() {
                return result.map_err(Error::Fatal);
            }
            if let Some(msg) = &st.error {
                return Err(Error::Fatal(msg.clone()));
            }
            if st.stopped {
                return Err(Error::UseAfterClose);
            }
            st = self.wait(st);
        }
    }

    pub fn signal_stop(&self) {
        self.stop.stop();
        let mut st = self.lock();
        st.stopped = true;
        self.notify();
    }
}

/// An opened camera with its reconstruction state.
pub(crate) struct CameraSlot {
    pub device: Box<dyn CameraDevice>,
    pub processor: CameraProcessor,
    pub sync_master: bool,
}

/// Cameras opened but not yet streaming.
pub(crate) struct Engine {
    kind: SourceKind,
    config: CaptureConfig,
    cameras: Vec<CameraSlot>,
}

impl Engine {
    /// Open every enabled camera of `config` through `context`.
    ///
    /// Non-fatal findings (connected cameras missing from the configuration)
    /// are appended to `advisories`.
    #[instrument(skip_all, fields(kind = %kind, backend = context.name()))]
    pub fn open(
        kind: SourceKind,
        config: &mut CaptureConfig,
        context: &dyn DeviceContext,
        advisories: &mut Vec<String>,
    ) -> Result<Self, Error> {
        let connected = context.enumerate()?;
        debug!(count = connected.len(), "enumerated cameras");

        for device in &connected {
            if config.camera(&device.serial).is_none() {
                let msg = format!(
                    "camera {} is connected but not in configuration, ignored",
                    device.serial
                );
                warn!("{}", msg);
                advisories.push(msg);
            }
        }

        let wanted = kind.config_type();
        for camera in config.enabled_cameras() {
            if camera.kind != wanted {
                return Err(Error::Config(format!(
                    "camera {} is type {} instead of {}",
                    camera.serial, camera.kind, wanted
                )));
            }
        }

        let enabled = config.enabled_cameras().count();
        if enabled == 0 {
            return Err(Error::NotFound("no orbbec cameras found".to_string()));
        }
        if enabled > MAX_CAMERAS {
            return Err(Error::Config(format!(
                "{} cameras configured, at most {} supported",
                enabled, MAX_CAMERAS
            )));
        }
        crate::tiles::validate_single_tile(config.system.single_tile, enabled)?;

        let single_tile = u8::try_from(config.system.single_tile).ok();
        let master = config.sync.sync_master_serial.clone();
        let serials: Vec<String> = config
            .enabled_cameras()
            .map(|c| c.serial.clone())
            .collect();

        let mut cameras = Vec::with_capacity(serials.len());
        for (index, serial) in serials.iter().enumerate() {
            if !connected.iter().any(|d| &d.serial == serial) {
                return Err(Error::NotFound(match kind {
                    SourceKind::Grabber => format!("camera {} is not connected", serial),
                    SourceKind::Playback => format!("recording for camera {} not found", serial),
                }));
            }
            let device = context.open(serial, &config.hardware)?;
            let tile = single_tile.unwrap_or(1 << index);
            if let Some(camera) = config.camera_mut(serial) {
                camera.connected = true;
            }
            let camera_config = config
                .camera(serial)
                .ok_or_else(|| Error::Config(format!("camera {} vanished", serial)))?;
            let processor = CameraProcessor::new(
                camera_config,
                device.intrinsics(),
                &config.filtering,
                &config.processing,
                tile,
            )?;
            info!(serial = %serial, index, tile, "opened camera");
            cameras.push(CameraSlot {
                device,
                processor,
                sync_master: !master.is_empty() && *serial == master && !config.sync.ignore_sync,
            });
        }

        Ok(Self {
            kind,
            config: config.clone(),
            cameras,
        })
    }

    pub fn processors(&self) -> impl Iterator<Item = &CameraProcessor> {
        self.cameras.iter().map(|c| &c.processor)
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    /// Seek every camera before streaming has started.
    pub fn seek(&mut self, timestamp: u64) -> Result<bool, Error> {
        seek_cameras(self.cameras.iter_mut().map(|c| &mut c.device), timestamp)
    }

    /// Start streaming: recorder, workers, cameras (sync master last),
    /// control thread. On error every camera opened so far is stopped.
    pub fn start(mut self, shared: Arc<Shared>) -> Result<ControlHandle, Error> {
        let recorder = match self.config.system.record_to_directory.as_str() {
            "" => None,
            dir if self.kind == SourceKind::Grabber => Some(Recorder::new(
                PathBuf::from(dir),
                &self.config,
                self.cameras.len(),
            )?),
            _ => {
                warn!("record_to_directory ignored for playback");
                None
            }
        };

        let (results_tx, results_rx) = kanal::unbounded();
        let mut workers = Vec::with_capacity(self.cameras.len());
        for (index, slot) in self.cameras.iter().enumerate() {
            workers.push(Worker::spawn(index, slot.processor.clone(), results_tx.clone())?);
        }

        let mut order: Vec<usize> = (0..self.cameras.len()).collect();
        order.sort_by_key(|&i| self.cameras[i].sync_master);
        for &i in &order {
            let device = &mut self.cameras[i].device;
            if let Err(err) = device.start() {
                error!(serial = %device.serial(), "camera failed to start: {}", err);
                return Err(err);
            }
        }

        let devices: Vec<Box<dyn CameraDevice>> = std::mem::take(&mut self.cameras)
            .into_iter()
            .map(|slot| slot.device)
            .collect();
        {
            let mut st = shared.lock();
            st.started = true;
            st.sizes = vec![(0, 0); devices.len()];
        }

        let control = Control {
            devices,
            workers,
            results: results_rx,
            recorder,
            new_timestamps: self.config.system.new_timestamps,
            stop: shared.stop.clone(),
        };
        let (done_tx, done) = kanal::bounded(1);
        let handle = std::thread::Builder::new()
            .name("orbbec-control".to_string())
            .spawn(move || {
                control_thread(control, shared);
                let _ = done_tx.send(());
            })?;
        Ok(ControlHandle { handle, done })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for slot in &mut self.cameras {
            slot.device.stop();
        }
    }
}

/// The running control thread.
pub(crate) struct ControlHandle {
    handle: JoinHandle<()>,
    done: kanal::Receiver<()>,
}

impl ControlHandle {
    /// Wait up to `grace` for the control thread to finish and join it.
    ///
    /// Returns `false` if the thread was still busy and has been detached.
    pub fn join(self, grace: Duration) -> bool {
        if let Err(kanal::ReceiveErrorTimeout::Timeout) = self.done.recv_timeout(grace) {
            warn!(?grace, "control thread did not exit, detaching");
            return false;
        }
        if self.handle.join().is_err() {
            error!("control thread panicked");
        }
        true
    }
}

/// Seek all cameras. The first camera decides: if it cannot reach
/// `timestamp` nothing moves.
fn seek_cameras<'a, I>(devices: I, timestamp: u64) -> Result<bool, Error>
where
    I: IntoIterator<Item = &'a mut Box<dyn CameraDevice>>,
{
    let mut devices = devices.into_iter();
    let Some(first) = devices.next() else {
        return Ok(false);
    };
    if !first.seek(timestamp)? {
        return Ok(false);
    }
    for device in devices {
        if !device.seek(timestamp)? {
            warn!(serial = %device.serial(), timestamp, "camera cannot seek, recording ends early");
        }
    }
    Ok(true)
}

/// Writes every captured frameset to `<dir>/<serial>.obrec`.
struct Recorder {
    dir: PathBuf,
    config: CaptureConfig,
    writers: Vec<Option<ObrecWriter<BufWriter<File>>>>,
}

impl Recorder {
    fn new(dir: PathBuf, config: &CaptureConfig, count: usize) -> Result<Self, Error> {
        std::fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "recording enabled");
        Ok(Self {
            dir,
            config: config.clone(),
            writers: (0..count).map(|_| None).collect(),
        })
    }

    fn record(
        &mut self,
        index: usize,
        device: &dyn CameraDevice,
        frameset: &Frameset,
    ) -> Result<(), Error> {
        if self.writers[index].is_none() {
            let path = self
                .dir
                .join(crate::config::recording_filename(device.serial()));
            debug!(path = %path.display(), "creating recording");
            let writer =
                ObrecWriter::create(path, frameset.width, frameset.height, device.intrinsics())?;
            self.writers[index] = Some(writer);
        }
        match self.writers[index].as_mut() {
            Some(writer) => writer.write_frameset(frameset),
            None => Err(Error::Fatal(format!("no recording for camera {}", index))),
        }
    }

    fn finish(self) -> Result<(), Error> {
        for writer in self.writers.into_iter().flatten() {
            writer.finish()?;
        }
        let path = self.dir.join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, self.config.to_json_string(true))?;
        info!(path = %path.display(), "recording finished");
        Ok(())
    }
}

/// Everything the control thread owns.
struct Control {
    devices: Vec<Box<dyn CameraDevice>>,
    workers: Vec<Worker>,
    results: kanal::Receiver<WorkerResult>,
    recorder: Option<Recorder>,
    new_timestamps: bool,
    stop: StopToken,
}

impl Control {
    /// Capture one frameset per camera, reconstruct and merge.
    ///
    /// Returns `Ok(None)` at end of stream.
    fn capture_round(
        &mut self,
        want_rgb: bool,
        want_depth: bool,
    ) -> Result<Option<(Frame, Vec<(u32, u32)>)>, Error> {
        if self.devices.iter().any(|d| d.eof()) {
            return Ok(None);
        }

        let mut framesets: Vec<Frameset> = Vec::with_capacity(self.devices.len());
        for device in self.devices.iter_mut() {
            if self.stop.is_stopped() {
                return Ok(None);
            }
            let Some(mut frameset) = device.wait_for_frameset(&self.stop)? else {
                debug!(serial = %device.serial(), "no frameset, end of stream");
                return Ok(None);
            };
            if let Some(reference) = framesets.first().map(|f| f.timestamp) {
                let mut drops = 0;
                while frameset.timestamp < reference && drops < MAX_STALE_DROPS {
                    trace!(serial = %device.serial(), ts = frameset.timestamp, reference, "dropping stale frameset");
                    match device.wait_for_frameset(&self.stop)? {
                        Some(next) => frameset = next,
                        None => return Ok(None),
                    }
                    drops += 1;
                }
            }
            framesets.push(frameset);
        }

        let timestamp = if self.new_timestamps {
            crate::camera::timestamp()?
        } else {
            framesets[0].timestamp
        };

        if let Some(recorder) = &mut self.recorder {
            for (index, (device, frameset)) in self.devices.iter().zip(&framesets).enumerate() {
                recorder.record(index, device.as_ref(), frameset)?;
            }
        }

        let sizes: Vec<(u32, u32)> = framesets.iter().map(|f| (f.width, f.height)).collect();
        for (worker, frameset) in self.workers.iter().zip(framesets) {
            worker.submit(Job {
                frameset,
                want_rgb,
                want_depth,
            })?;
        }

        let mut clouds: Vec<CameraCloud> = Vec::with_capacity(self.workers.len());
        for _ in 0..self.workers.len() {
            let result = self
                .results
                .recv()
                .map_err(|_| Error::Fatal("camera workers exited".to_string()))?;
            clouds.push(result?);
        }
        clouds.sort_by_key(|c| c.camera);

        let total = clouds.iter().map(|c| c.points.len()).sum();
        let mut frame = Frame::with_capacity(timestamp, total);
        let mut cellsize = 0.0f32;
        for cloud in clouds {
            trace!(camera = cloud.camera, ts = cloud.timestamp, points = cloud.points.len(), "merging");
            frame.extend_from_slice(&cloud.points);
            cellsize = cellsize.max(cloud.cellsize);
            for aux in cloud.auxiliary {
                frame.add_auxiliary(aux);
            }
        }
        frame.set_cellsize(cellsize);
        if frame.is_empty() {
            warn!(timestamp, "merged point cloud is empty");
        }
        Ok(Some((frame, sizes)))
    }

    fn seek(&mut self, timestamp: u64) -> Result<bool, Error> {
        seek_cameras(self.devices.iter_mut(), timestamp)
    }

    /// Stop the cameras and workers and close the recording. Idempotent.
    fn release(&mut self) -> Result<(), Error> {
        for device in &mut self.devices {
            device.stop();
        }
        for worker in &mut self.workers {
            worker.shutdown();
        }
        match self.recorder.take() {
            Some(recorder) => recorder.finish(),
            None => Ok(()),
        }
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            error!("release failed: {}", err);
        }
    }
}

fn control_thread(mut control: Control, shared: Arc<Shared>) {
    debug!("control thread started");
    loop {
        let (want_rgb, want_depth) = {
            let mut st = shared.lock();
            while !st.stopped && st.seek_request.is_none() && (!st.want_new || st.eof) {
                st = shared.wait(st);
            }
            if st.stopped {
                break;
            }
            if let Some(timestamp) = st.seek_request.take() {
                drop(st);
                let result = control.seek(timestamp);
                let mut st = shared.lock();
                if let Ok(true) = result {
                    st.fresh = None;
                    st.eof = false;
                }
                st.seek_result = Some(result.map_err(|e| e.to_string()));
                shared.notify();
                continue;
            }
            (st.want_rgb, st.want_depth)
        };

        let result = info_span!("capture_round").in_scope(|| control.capture_round(want_rgb, want_depth));

        let mut st = shared.lock();
        if st.stopped {
            continue;
        }
        let fatal = match result {
            Ok(Some((frame, sizes))) => {
                trace!(timestamp = frame.timestamp(), points = frame.len(), "frame ready");
                st.cellsize = frame.cellsize();
                st.sizes = sizes;
                st.fresh = Some(frame);
                st.want_new = false;
                false
            }
            Ok(None) => {
                info!("end of stream");
                st.eof = true;
                false
            }
            Err(err) => {
                error!("capture failed: {}", err);
                st.error = Some(err.to_string());
                true
            }
        };
        shared.notify();
        drop(st);
        if fatal {
            break;
        }
    }

    if let Err(err) = control.release() {
        error!("shutdown failed: {}", err);
        let mut st = shared.lock();
        st.error.get_or_insert_with(|| err.to_string());
        shared.notify();
    }
    debug!("control thread exiting");
}

/// Default descriptor location for a recording directory.
pub(crate) fn descriptor_in(dir: &std::path::Path) -> PathBuf {
    dir.join(DEFAULT_CONFIG_FILE)
}
