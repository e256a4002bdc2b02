// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! `.obrec` camera recording format.
//!
//! One file per camera. All integers are little-endian.
//!
//! ```text
//! ┌──────────────────┐ 0
//! │ header (64 B)    │ magic "OBRC", version, size, intrinsics
//! ├──────────────────┤ frames_offset
//! │ frame record 0   │ timestamp_us:u64, depth_len:u32, color_len:u32,
//! │ frame record 1   │ depth (u16 mm), color (BGRA)
//! │ ...              │
//! ├──────────────────┤ index_offset
//! │ index entries    │ timestamp_us:u64, file_offset:u64 (one per frame)
//! ├──────────────────┤
//! │ footer (32 B)    │ magic "OBRF", index_offset, counts, duration
//! └──────────────────┘
//! ```

use crate::camera::{Error, Frameset, Intrinsics};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::Path,
};

/// Magic bytes for the file header.
pub const OBREC_MAGIC: [u8; 4] = *b"OBRC";

/// Magic bytes for the file footer.
pub const OBREC_FOOTER_MAGIC: [u8; 4] = *b"OBRF";

/// Current format version.
pub const OBREC_VERSION: u16 = 1;

/// File extension of camera recordings.
pub const RECORDING_EXTENSION: &str = "obrec";

/// Header size in bytes (fixed).
pub const HEADER_SIZE: usize = 64;

/// Footer size in bytes (fixed).
pub const FOOTER_SIZE: usize = 32;

/// Index entry size in bytes.
pub const INDEX_ENTRY_SIZE: usize = 16;

/// Frame record header: timestamp + two lengths.
const RECORD_HEADER_SIZE: usize = 16;

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidRecording(msg.into())
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

fn le_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_bits(le_u32(buf, at))
}

/// File header (64 bytes fixed size)
#[derive(Clone, Debug, PartialEq)]
pub struct ObrecHeader {
    pub version: u16,
    pub flags: u16,
    pub width: u32,
    pub height: u32,
    pub intrinsics: Intrinsics,
    /// Recording start time, microseconds since the epoch
    pub start_time_us: u64,
    pub frames_offset: u64,
}

impl ObrecHeader {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&OBREC_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.width.to_le_bytes());
        buf[12..16].copy_from_slice(&self.height.to_le_bytes());
        buf[16..20].copy_from_slice(&self.intrinsics.fx.to_le_bytes());
        buf[20..24].copy_from_slice(&self.intrinsics.fy.to_le_bytes());
        buf[24..28].copy_from_slice(&self.intrinsics.ppx.to_le_bytes());
        buf[28..32].copy_from_slice(&self.intrinsics.ppy.to_le_bytes());
        buf[32..40].copy_from_slice(&self.start_time_us.to_le_bytes());
        buf[40..48].copy_from_slice(&self.frames_offset.to_le_bytes());
        // Remaining 16 bytes are reserved
        writer.write_all(&buf)
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut buf = [0u8; HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|_| invalid("file too short for header"))?;

        if buf[0..4] != OBREC_MAGIC {
            return Err(invalid("bad magic bytes"));
        }
        let version = le_u16(&buf, 4);
        if version > OBREC_VERSION {
            return Err(invalid(format!("unsupported version {}", version)));
        }

        Ok(Self {
            version,
            flags: le_u16(&buf, 6),
            width: le_u32(&buf, 8),
            height: le_u32(&buf, 12),
            intrinsics: Intrinsics {
                fx: le_f32(&buf, 16),
                fy: le_f32(&buf, 20),
                ppx: le_f32(&buf, 24),
                ppy: le_f32(&buf, 28),
            },
            start_time_us: le_u64(&buf, 32),
            frames_offset: le_u64(&buf, 40),
        })
    }
}

/// File footer (32 bytes fixed size)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObrecFooter {
    pub index_offset: u64,
    pub index_count: u32,
    pub frame_count: u32,
    /// Last minus first frame timestamp, microseconds
    pub duration_us: u64,
}

impl ObrecFooter {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..4].copy_from_slice(&OBREC_FOOTER_MAGIC);
        buf[4..12].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.index_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.frame_count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.duration_us.to_le_bytes());
        writer.write_all(&buf)
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut buf = [0u8; FOOTER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|_| invalid("file too short for footer"))?;
        if buf[0..4] != OBREC_FOOTER_MAGIC {
            return Err(invalid("bad footer magic, recording was not finished"));
        }
        Ok(Self {
            index_offset: le_u64(&buf, 4),
            index_count: le_u32(&buf, 12),
            frame_count: le_u32(&buf, 16),
            duration_us: le_u64(&buf, 20),
        })
    }
}

/// Seek index entry (16 bytes)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp_us: u64,
    pub file_offset: u64,
}

impl IndexEntry {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.timestamp_us.to_le_bytes())?;
        writer.write_all(&self.file_offset.to_le_bytes())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|_| invalid("truncated seek index"))?;
        Ok(Self {
            timestamp_us: le_u64(&buf, 0),
            file_offset: le_u64(&buf, 8),
        })
    }
}

/// Writer for `.obrec` files.
pub struct ObrecWriter<W: Write + Seek> {
    writer: W,
    header: ObrecHeader,
    index: Vec<IndexEntry>,
    scratch: Vec<u8>,
}

impl ObrecWriter<BufWriter<File>> {
    /// Create a recording file.
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        intrinsics: Intrinsics,
    ) -> Result<Self, Error> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), width, height, intrinsics)
    }
}

impl<W: Write + Seek> ObrecWriter<W> {
    pub fn new(mut writer: W, width: u32, height: u32, intrinsics: Intrinsics) -> Result<Self, Error> {
        let header = ObrecHeader {
            version: OBREC_VERSION,
            flags: 0,
            width,
            height,
            intrinsics,
            start_time_us: crate::camera::timestamp()?,
            frames_offset: HEADER_SIZE as u64,
        };
        header.write(&mut writer)?;
        Ok(Self {
            writer,
            header,
            index: Vec::new(),
            scratch: Vec::new(),
        })
    }

    /// Number of framesets written so far.
    pub fn frame_count(&self) -> usize {
        self.index.len()
    }

    /// Append one frameset. Its size must match the header.
    pub fn write_frameset(&mut self, frameset: &Frameset) -> Result<(), Error> {
        if frameset.width != self.header.width || frameset.height != self.header.height {
            return Err(invalid(format!(
                "frameset is {}x{}, recording is {}x{}",
                frameset.width, frameset.height, self.header.width, self.header.height
            )));
        }
        frameset.validate()?;
        if let Some(last) = self.index.last()
            && frameset.timestamp < last.timestamp_us
        {
            return Err(invalid(format!(
                "timestamp {} before previous {}",
                frameset.timestamp, last.timestamp_us
            )));
        }

        let offset = self.writer.stream_position()?;
        let depth_len = frameset.depth.len() * 2;
        self.scratch.clear();
        self.scratch.reserve(RECORD_HEADER_SIZE + depth_len);
        self.scratch.extend_from_slice(&frameset.timestamp.to_le_bytes());
        self.scratch.extend_from_slice(&(depth_len as u32).to_le_bytes());
        self.scratch.extend_from_slice(&(frameset.color.len() as u32).to_le_bytes());
        for d in &frameset.depth {
            self.scratch.extend_from_slice(&d.to_le_bytes());
        }
        self.writer.write_all(&self.scratch)?;
        self.writer.write_all(&frameset.color)?;

        self.index.push(IndexEntry {
            timestamp_us: frameset.timestamp,
            file_offset: offset,
        });
        Ok(())
    }

    /// Write the seek index and footer.
    pub fn finish(mut self) -> Result<W, Error> {
        let index_offset = self.writer.stream_position()?;
        for entry in &self.index {
            entry.write(&mut self.writer)?;
        }
        let duration_us = match (self.index.first(), self.index.last()) {
            (Some(first), Some(last)) => last.timestamp_us - first.timestamp_us,
            _ => 0,
        };
        let footer = ObrecFooter {
            index_offset,
            index_count: self.index.len() as u32,
            frame_count: self.index.len() as u32,
            duration_us,
        };
        footer.write(&mut self.writer)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reader for `.obrec` files.
pub struct ObrecReader<R: Read + Seek> {
    reader: R,
    header: ObrecHeader,
    footer: ObrecFooter,
    index: Vec<IndexEntry>,
    /// Index of the next frameset `read_frameset` returns
    cursor: usize,
}

impl ObrecReader<BufReader<File>> {
    /// Open a recording file.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                Error::NotFound(format!("recording {} not found", path.display()))
            }
            _ => Error::Io(err),
        })?;
        Self::open(BufReader::new(file))
    }
}

impl<R: Read + Seek> ObrecReader<R> {
    pub fn open(mut reader: R) -> Result<Self, Error> {
        let header = ObrecHeader::read(&mut reader)?;

        let end = reader.seek(SeekFrom::End(0))?;
        if end < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(invalid("file too short"));
        }
        reader.seek(SeekFrom::Start(end - FOOTER_SIZE as u64))?;
        let footer = ObrecFooter::read(&mut reader)?;

        // The index sits right before the footer and the frame records
        // right before the index. Sizes are checked against the file
        // length before anything is allocated from them.
        let index_end = footer
            .index_offset
            .checked_add(footer.index_count as u64 * INDEX_ENTRY_SIZE as u64)
            .and_then(|n| n.checked_add(FOOTER_SIZE as u64));
        if index_end != Some(end) {
            return Err(invalid("seek index does not match file size"));
        }
        if header.frames_offset < HEADER_SIZE as u64 || header.frames_offset > footer.index_offset {
            return Err(invalid("frame data outside of file"));
        }
        let record_len = (header.width as u64)
            .checked_mul(header.height as u64)
            .and_then(|n| n.checked_mul(6))
            .and_then(|n| n.checked_add(RECORD_HEADER_SIZE as u64))
            .filter(|&n| n <= footer.index_offset - header.frames_offset)
            .or_else(|| (footer.index_count == 0).then_some(0))
            .ok_or_else(|| invalid("frame size does not fit in file"))?;

        reader.seek(SeekFrom::Start(footer.index_offset))?;
        let mut index = Vec::with_capacity(footer.index_count as usize);
        for _ in 0..footer.index_count {
            let entry = IndexEntry::read(&mut reader)?;
            let in_bounds = entry.file_offset >= header.frames_offset
                && entry
                    .file_offset
                    .checked_add(record_len)
                    .is_some_and(|n| n <= footer.index_offset);
            if !in_bounds {
                return Err(invalid(format!("index entry {} outside of frame data", index.len())));
            }
            index.push(entry);
        }
        if index.windows(2).any(|w| w[1].timestamp_us < w[0].timestamp_us) {
            return Err(invalid("seek index is not sorted"));
        }

        reader.seek(SeekFrom::Start(header.frames_offset))?;
        Ok(Self {
            reader,
            header,
            footer,
            index,
            cursor: 0,
        })
    }

    pub fn header(&self) -> &ObrecHeader {
        &self.header
    }

    pub fn footer(&self) -> &ObrecFooter {
        &self.footer
    }

    pub fn frame_count(&self) -> usize {
        self.index.len()
    }

    /// Position of the next frameset.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn eof(&self) -> bool {
        self.cursor >= self.index.len()
    }

    /// Timestamps of the first and last frameset.
    pub fn time_range(&self) -> Option<(u64, u64)> {
        Some((self.index.first()?.timestamp_us, self.index.last()?.timestamp_us))
    }

    /// Read the next frameset, `None` at end of file.
    pub fn read_frameset(&mut self) -> Result<Option<Frameset>, Error> {
        let Some(entry) = self.index.get(self.cursor).copied() else {
            return Ok(None);
        };
        self.reader.seek(SeekFrom::Start(entry.file_offset))?;

        let mut rec = [0u8; RECORD_HEADER_SIZE];
        self.reader.read_exact(&mut rec)?;
        let timestamp = le_u64(&rec, 0);
        let depth_len = le_u32(&rec, 8) as usize;
        let color_len = le_u32(&rec, 12) as usize;
        let n = self.header.width as usize * self.header.height as usize;
        if timestamp != entry.timestamp_us || depth_len != n * 2 || color_len != n * 4 {
            return Err(invalid(format!("corrupt frame record {}", self.cursor)));
        }

        let mut depth_bytes = vec![0u8; depth_len];
        self.reader.read_exact(&mut depth_bytes)?;
        let mut color = vec![0u8; color_len];
        self.reader.read_exact(&mut color)?;

        self.cursor += 1;
        Ok(Some(Frameset {
            timestamp,
            width: self.header.width,
            height: self.header.height,
            depth: depth_bytes
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect(),
            color,
        }))
    }

    /// Move to the first frameset with a timestamp at or after
    /// `timestamp_us`.
    ///
    /// Returns `false` and leaves the position unchanged when `timestamp_us`
    /// lies beyond the last frameset.
    pub fn seek_to_timestamp(&mut self, timestamp_us: u64) -> bool {
        let target = self.index.partition_point(|e| e.timestamp_us < timestamp_us);
        if target >= self.index.len() {
            return false;
        }
        self.cursor = target;
        true
    }
}
