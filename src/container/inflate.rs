// src/container/inflate.rs
use crate::container::header::{signature, EntryKind, LocalFileHeader};
use crate::container::ReadSeek;
use crate::error::{Result, SonarError};
use crate::record::RecordSource;
use crate::utils::{discard, read_exact_or_eof};
use flate2::read::DeflateDecoder;
use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};

/// Where an entry's compressed bytes live in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub data_offset: u64,
    pub compressed_size: u64,
}

/// Find an entry by walking local file headers from the start of the
/// archive, hopping over each entry by its declared compressed size.
pub fn locate_entry<R: ReadSeek>(reader: &mut R, kind: EntryKind) -> Result<EntryLocation> {
    reader.seek(SeekFrom::Start(0))?;
    let mut offset = 0u64;
    loop {
        let mut sig = [0u8; 4];
        if !read_exact_or_eof(reader, &mut sig)? || u32::from_le_bytes(sig) != signature::LOCAL_FILE {
            return Err(SonarError::structure(offset, format!("no {:?} entry found", kind)));
        }
        let header = LocalFileHeader::read_after_signature(reader)?;
        let data_offset = offset + header.encoded_len();
        let compressed_size = header.compressed_size as u64;
        if header.kind() == Some(kind) {
            return Ok(EntryLocation {
                data_offset,
                compressed_size,
            });
        }
        if compressed_size == 0 {
            return Err(SonarError::structure(
                offset,
                format!("entry {} has no declared size to skip", header.display_name()),
            ));
        }
        offset = data_offset + compressed_size;
        reader.seek(SeekFrom::Start(offset))?;
    }
}

/// Sequential DEFLATE decode of one archive entry.
///
/// This is the slow path used when no fast index can be built. It handles
/// compressed chunks too, but can only move forward; seeking backwards
/// reopens the entry and decodes again from its start.
pub struct EntryInflater {
    path: PathBuf,
    location: EntryLocation,
    buffer_capacity: usize,
    decoder: DeflateDecoder<Take<BufReader<File>>>,
    position: u64,
}

impl EntryInflater {
    pub fn open(path: impl AsRef<Path>, kind: EntryKind, buffer_capacity: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = BufReader::with_capacity(buffer_capacity, File::open(&path)?);
        let location = locate_entry(&mut reader, kind)?;
        debug!(
            "inflating {:?} entry of {} from offset {}",
            kind,
            path.display(),
            location.data_offset
        );
        let decoder = Self::decoder(reader, location)?;
        Ok(EntryInflater {
            path,
            location,
            buffer_capacity,
            decoder,
            position: 0,
        })
    }

    fn decoder(mut reader: BufReader<File>, location: EntryLocation) -> Result<DeflateDecoder<Take<BufReader<File>>>> {
        reader.seek(SeekFrom::Start(location.data_offset))?;
        let limit = if location.compressed_size == 0 {
            u64::MAX
        } else {
            location.compressed_size
        };
        Ok(DeflateDecoder::new(reader.take(limit)))
    }

    pub fn location(&self) -> EntryLocation {
        self.location
    }

    /// Restart decoding from the first byte of the entry.
    pub fn rewind(&mut self) -> Result<()> {
        let reader = BufReader::with_capacity(self.buffer_capacity, File::open(&self.path)?);
        self.decoder = Self::decoder(reader, self.location)?;
        self.position = 0;
        Ok(())
    }
}

impl Read for EntryInflater {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.decoder.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl RecordSource for EntryInflater {
    fn position(&self) -> u64 {
        self.position
    }

    fn skip_bytes(&mut self, n: u64) -> Result<u64> {
        let skipped = discard(self, n)?;
        Ok(skipped)
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        if position < self.position {
            self.rewind()?;
        }
        let gap = position - self.position;
        discard(self, gap)?;
        Ok(())
    }
}

/// Decode an entry in full. Reads the whole entry into memory, so this is
/// meant for small entries and for verification.
pub fn extract_entry(path: impl AsRef<Path>, kind: EntryKind) -> Result<Vec<u8>> {
    let mut inflater = EntryInflater::open(path, kind, crate::config::DEFAULT_BUFFER_CAPACITY)?;
    let mut out = Vec::with_capacity(inflater.location().compressed_size as usize);
    inflater.read_to_end(&mut out)?;
    Ok(out)
}
