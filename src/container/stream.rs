// src/container/stream.rs
use crate::config::CatalogConfig;
use crate::container::header::ChunkHeader;
use crate::container::index::{ChunkDescriptor, FastIndex};
use crate::container::ReadSeek;
use crate::error::{Result, SonarError};
use crate::record::RecordSource;
use crate::utils::is_eof;
use bytes::BytesMut;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, Instant};

#[cfg(feature = "mmap")]
use memmap2::Mmap;
#[cfg(feature = "mmap")]
use std::io::Cursor;

/// Counters describing the physical work a stream has done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetrics {
    pub chunk_loads: u64,
    pub bytes_loaded: u64,
    /// Repositionings of the physical file.
    pub physical_seeks: u64,
    /// Skips satisfied inside the resident chunk without I/O.
    pub arithmetic_skips: u64,
    /// Skips that needed a chunk-table lookup.
    pub indexed_skips: u64,
    pub load_time: Duration,
}

/// Seekable byte stream over the data entry of a chunked archive.
///
/// Only one chunk is resident at a time. Skips inside that chunk are pure
/// arithmetic; skips beyond it look up the target chunk in the index and
/// reposition the physical file once, so jumping ahead costs a single seek
/// and one chunk read no matter how many bytes are passed over.
///
/// # Example
///
/// ```no_run
/// use sonar_archive::container::VirtualChunkStream;
/// use sonar_archive::config::CatalogConfig;
/// use std::io::Read;
///
/// let mut stream = VirtualChunkStream::open("log_2024-05-01.glf", &CatalogConfig::default()).unwrap();
/// stream.skip(1_000_000).unwrap();
/// let mut header = [0u8; 21];
/// stream.read_exact(&mut header).unwrap();
/// ```
pub struct VirtualChunkStream<R: ReadSeek> {
    source: R,
    index: FastIndex,
    label: String,
    loaded_chunk: Option<usize>,
    chunk_start: u64,
    chunk_end: u64,
    position: u64,
    physical_position: Option<u64>,
    buffer: BytesMut,
    metrics: StreamMetrics,
}

impl VirtualChunkStream<BufReader<File>> {
    /// Open an archive, reusing or building its fast index.
    pub fn open(path: impl AsRef<Path>, config: &CatalogConfig) -> Result<Self> {
        let path = path.as_ref();
        let index = FastIndex::load_or_build(path, config)?;
        Self::with_index(path, index, config.buffer_capacity)
    }

    pub fn with_index(path: impl AsRef<Path>, index: FastIndex, buffer_capacity: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let live_len = file.metadata()?.len();
        if live_len < index.archive_len() {
            return Err(SonarError::StaleIndex {
                path: path.display().to_string(),
                reason: format!("archive is {} bytes, index expects {}", live_len, index.archive_len()),
            });
        }
        VirtualChunkStream::new(
            BufReader::with_capacity(buffer_capacity, file),
            index,
            path.display().to_string(),
        )
    }
}

#[cfg(feature = "mmap")]
impl VirtualChunkStream<Cursor<Mmap>> {
    /// Open an archive through a memory map.
    pub fn open_mmap(path: impl AsRef<Path>, config: &CatalogConfig) -> Result<Self> {
        let path = path.as_ref();
        let index = FastIndex::load_or_build(path, config)?;
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        VirtualChunkStream::new(Cursor::new(mmap), index, path.display().to_string())
    }
}

impl<R: ReadSeek> VirtualChunkStream<R> {
    /// Wrap a physical source. `label` names the archive in error messages.
    pub fn new(source: R, index: FastIndex, label: impl Into<String>) -> Result<Self> {
        let mut stream = VirtualChunkStream {
            source,
            index,
            label: label.into(),
            loaded_chunk: None,
            chunk_start: 0,
            chunk_end: 0,
            position: 0,
            physical_position: None,
            buffer: BytesMut::new(),
            metrics: StreamMetrics::default(),
        };
        stream.reset_to_start()?;
        Ok(stream)
    }

    pub fn index(&self) -> &FastIndex {
        &self.index
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Length of the logical data entry.
    pub fn len(&self) -> u64 {
        self.index.data_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes remaining before the end of the data entry.
    pub fn available(&self) -> u64 {
        self.len().saturating_sub(self.position)
    }

    pub fn loaded_chunk(&self) -> Option<usize> {
        self.loaded_chunk
    }

    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    /// Return to logical offset 0 with the first chunk resident.
    pub fn reset_to_start(&mut self) -> Result<()> {
        self.jump_to(0)
    }

    /// Advance `n` bytes without copying, clamped to the end of the entry.
    ///
    /// # Returns
    ///
    /// The number of bytes actually skipped.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        let n = n.min(self.available());
        if n == 0 {
            return Ok(0);
        }
        let target = self.position + n;
        if self.loaded_chunk.is_some() && target < self.chunk_end {
            self.position = target;
            self.metrics.arithmetic_skips += 1;
        } else {
            self.metrics.indexed_skips += 1;
            self.jump_to(target)?;
        }
        Ok(n)
    }

    /// Move to an absolute logical offset (clamped to the entry length).
    pub fn seek_to_position(&mut self, target: u64) -> Result<()> {
        let target = target.min(self.len());
        if self.loaded_chunk.is_some() && target >= self.chunk_start && target < self.chunk_end {
            self.position = target;
            return Ok(());
        }
        self.jump_to(target)
    }

    fn jump_to(&mut self, target: u64) -> Result<()> {
        self.position = target;
        match self.index.chunk_containing(target) {
            Some(i) => self.load_chunk(i),
            None => {
                self.unload();
                Ok(())
            }
        }
    }

    fn unload(&mut self) {
        self.loaded_chunk = None;
        self.chunk_start = self.position;
        self.chunk_end = self.position;
    }

    fn load_chunk(&mut self, i: usize) -> Result<()> {
        let started = Instant::now();
        let chunk: ChunkDescriptor = *self.index.chunk(i).ok_or_else(|| SonarError::StaleIndex {
            path: self.label.clone(),
            reason: format!("chunk {} is not in the index", i),
        })?;

        if self.physical_position != Some(chunk.physical_offset) {
            self.seek_physical(chunk.physical_offset)?;
        }
        // Unknown until the reads below succeed.
        self.physical_position = None;

        let header = ChunkHeader::read(&mut self.source).map_err(|e| self.stale_on_eof(e, &chunk))?;
        if header.flags != chunk.flags || header.length as u32 != chunk.length {
            return Err(self.stale(format!(
                "chunk {} at {} reads flags {:#04x} length {}, index has flags {:#04x} length {}",
                i, chunk.physical_offset, header.flags, header.length, chunk.flags, chunk.length
            )));
        }

        // the buffer no longer holds the previous chunk
        self.loaded_chunk = None;
        self.buffer.clear();
        self.buffer.resize(chunk.length as usize, 0);
        if let Err(e) = self.source.read_exact(&mut self.buffer[..]) {
            return Err(self.stale_on_eof(e.into(), &chunk));
        }

        self.physical_position = Some(chunk.payload_offset() + chunk.length as u64);
        self.loaded_chunk = Some(i);
        self.chunk_start = chunk.virtual_start;
        self.chunk_end = chunk.virtual_end();

        self.metrics.chunk_loads += 1;
        self.metrics.bytes_loaded += chunk.length as u64;
        self.metrics.load_time += started.elapsed();
        Ok(())
    }

    /// One physical repositioning, relative to the current physical offset
    /// when it is known.
    fn seek_physical(&mut self, target: u64) -> Result<()> {
        match self.physical_position {
            Some(current) => {
                let delta = target as i64 - current as i64;
                self.source.seek(SeekFrom::Current(delta))?;
            }
            None => {
                self.source.seek(SeekFrom::Start(target))?;
            }
        }
        self.metrics.physical_seeks += 1;
        Ok(())
    }

    fn stale(&self, reason: String) -> SonarError {
        SonarError::StaleIndex {
            path: self.label.clone(),
            reason,
        }
    }

    fn stale_on_eof(&self, err: SonarError, chunk: &ChunkDescriptor) -> SonarError {
        match err {
            SonarError::Io(e) if is_eof(&e) => self.stale(format!(
                "short read of chunk at physical offset {}",
                chunk.physical_offset
            )),
            other => other,
        }
    }
}

impl<R: ReadSeek> Read for VirtualChunkStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.len() {
            return Ok(0);
        }
        let resident = self.loaded_chunk.is_some()
            && self.position >= self.chunk_start
            && self.position < self.chunk_end;
        if !resident {
            match self.index.chunk_containing(self.position) {
                Some(i) => self.load_chunk(i)?,
                None => return Ok(0),
            }
        }

        let offset = (self.position - self.chunk_start) as usize;
        let n = buf.len().min((self.chunk_end - self.position) as usize);
        buf[..n].copy_from_slice(&self.buffer[offset..offset + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: ReadSeek> Seek for VirtualChunkStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => self.len() as i128 + delta as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of data entry",
            ));
        }
        self.seek_to_position(target as u64)?;
        Ok(self.position)
    }
}

impl<R: ReadSeek> RecordSource for VirtualChunkStream<R> {
    fn position(&self) -> u64 {
        self.position
    }

    fn skip_bytes(&mut self, n: u64) -> Result<u64> {
        self.skip(n)
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        self.seek_to_position(position)
    }
}
