// src/catalog/source.rs
use crate::config::CatalogConfig;
use crate::container::{EntryInflater, EntryKind, FastIndex, StreamMetrics, VirtualChunkStream};
use crate::error::Result;
use crate::record::{PlainSource, RecordSource};
use crate::types::ArchiveFormat;
use log::warn;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// The logical record stream of one archive, however it is physically read.
pub enum DataSource {
    /// Indexed random access through the chunk table.
    Chunked(VirtualChunkStream<BufReader<File>>),
    /// Sequential decode, used when the container cannot be indexed.
    Inflated(EntryInflater),
    /// An uncompressed file read directly.
    Plain(PlainSource<BufReader<File>>),
}

impl DataSource {
    /// Open the record stream for `path`. Container archives that fail to
    /// index fall back to sequential inflation rather than failing.
    pub fn open(path: &Path, format: ArchiveFormat, config: &CatalogConfig) -> Result<Self> {
        match format {
            ArchiveFormat::Glf => {
                let indexed = FastIndex::load_or_build(path, config)
                    .and_then(|index| VirtualChunkStream::with_index(path, index, config.buffer_capacity));
                match indexed {
                    Ok(stream) => Ok(DataSource::Chunked(stream)),
                    Err(e) if e.is_stale_index() => {
                        warn!("{}; rebuilding fast index for {}", e, path.display());
                        Self::reindex(path, config)
                    }
                    Err(e) if e.is_container_structure() => {
                        warn!(
                            "no fast index for {} ({}), falling back to sequential extraction",
                            path.display(),
                            e
                        );
                        Ok(DataSource::Inflated(EntryInflater::open(
                            path,
                            EntryKind::Data,
                            config.buffer_capacity,
                        )?))
                    }
                    Err(e) => Err(e),
                }
            }
            ArchiveFormat::GlfData | ArchiveFormat::Ecd | ArchiveFormat::Aris => {
                Ok(DataSource::Plain(PlainSource::open(path, config.buffer_capacity)?))
            }
        }
    }

    /// Discard the persisted fast index, rescan the container and reopen.
    pub fn reindex(path: &Path, config: &CatalogConfig) -> Result<Self> {
        let index = FastIndex::rebuild(path, config)?;
        Ok(DataSource::Chunked(VirtualChunkStream::with_index(
            path,
            index,
            config.buffer_capacity,
        )?))
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, DataSource::Chunked(_))
    }

    pub fn metrics(&self) -> Option<&StreamMetrics> {
        match self {
            DataSource::Chunked(stream) => Some(stream.metrics()),
            _ => None,
        }
    }

    fn inner(&mut self) -> &mut dyn RecordSource {
        match self {
            DataSource::Chunked(s) => s,
            DataSource::Inflated(s) => s,
            DataSource::Plain(s) => s,
        }
    }
}

impl Read for DataSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner().read(buf)
    }
}

impl RecordSource for DataSource {
    fn position(&self) -> u64 {
        match self {
            DataSource::Chunked(s) => s.position(),
            DataSource::Inflated(s) => RecordSource::position(s),
            DataSource::Plain(s) => s.position(),
        }
    }

    fn skip_bytes(&mut self, n: u64) -> Result<u64> {
        self.inner().skip_bytes(n)
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        self.inner().seek_to(position)
    }
}
