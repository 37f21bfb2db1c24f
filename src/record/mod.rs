// src/record/mod.rs
//! Record decoding for the three archive families.
//!
//! Every decoder works against a [`RecordSource`]: a forward reader that
//! knows its logical position and can skip or reposition cheaply. The
//! chunked container stream, the slow inflating fallback and a plain file
//! all implement it, so the same decode functions serve both catalog
//! building and lazy full loads.
//!
//! Decoders run at one of two depths. [`DecodeDepth::Descriptor`] reads
//! only what a catalog needs (position, time, device, geometry) and skips
//! the payload; [`DecodeDepth::Full`] also materialises the amplitude grid.

pub mod aris;
pub mod ecd;
pub mod glf;
pub mod header;
pub mod payload;

use crate::container::ReadSeek;
use crate::error::Result;
use std::fs::File;
use std::io::{self, BufReader, Read, SeekFrom};
use std::path::Path;
use std::time::Duration;

pub use glf::StatusRecord;
pub use header::{GenericHeader, HeaderRead};
pub use payload::{ImageGeometry, ImagePayload, LoadedImage};

/// A positioned, forward-reading byte source for record decoders.
pub trait RecordSource: Read {
    /// Logical offset of the next byte to be read.
    fn position(&self) -> u64;

    /// Skip up to `n` bytes, returning how many were actually skipped.
    fn skip_bytes(&mut self, n: u64) -> Result<u64>;

    /// Reposition to an absolute logical offset.
    fn seek_to(&mut self, position: u64) -> Result<()>;
}

/// How much of a record to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeDepth {
    /// Header fields only; payload bytes are skipped.
    Descriptor,
    /// Header fields plus decoded amplitudes and bearing table.
    Full,
}

/// One decoded image record.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    /// Logical offset the record starts at; seeking here and decoding again
    /// yields the same record.
    pub position: u64,
    pub time_millis: i64,
    pub device_id: u32,
    pub geometry: ImageGeometry,
    /// Present only for [`DecodeDepth::Full`].
    pub payload: Option<ImagePayload>,
}

impl DecodedImage {
    /// Split off the payload as a [`LoadedImage`]. `None` for descriptor-depth decodes.
    pub fn into_loaded(self, load_time: Duration) -> Option<LoadedImage> {
        let geometry = self.geometry;
        self.payload.map(|payload| LoadedImage {
            geometry,
            payload,
            load_time,
        })
    }
}

/// A decoded record of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    Image(DecodedImage),
    Status(StatusRecord),
    /// A record type that is recognised but not decoded; its bytes were skipped.
    Other { data_type: u8, position: u64 },
}

/// [`RecordSource`] over an uncompressed file, used for bare `.dat`, ECD
/// and ARIS files.
pub struct PlainSource<R: ReadSeek> {
    reader: R,
    position: u64,
    len: u64,
}

impl PlainSource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, buffer_capacity: usize) -> Result<Self> {
        let file = File::open(path)?;
        PlainSource::new(BufReader::with_capacity(buffer_capacity, file))
    }
}

impl<R: ReadSeek> PlainSource<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(PlainSource {
            reader,
            position: 0,
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<R: ReadSeek> Read for PlainSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: ReadSeek> RecordSource for PlainSource<R> {
    fn position(&self) -> u64 {
        self.position
    }

    /// Skips are clamped at end of file so a truncated record is visible
    /// to the caller as a short skip.
    fn skip_bytes(&mut self, n: u64) -> Result<u64> {
        let skipped = n.min(self.len.saturating_sub(self.position));
        if skipped > 0 {
            self.reader.seek(SeekFrom::Current(skipped as i64))?;
            self.position += skipped;
        }
        Ok(skipped)
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        let target = position.min(self.len);
        self.reader.seek(SeekFrom::Start(target))?;
        self.position = target;
        Ok(())
    }
}

/// Skip exactly `n` bytes or fail with `UnexpectedEof`.
pub(crate) fn skip_exact<S: RecordSource + ?Sized>(source: &mut S, n: u64) -> Result<()> {
    let skipped = source.skip_bytes(n)?;
    if skipped < n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("record truncated: skipped {} of {} bytes", skipped, n),
        )
        .into());
    }
    Ok(())
}
