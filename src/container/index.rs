// src/container/index.rs
use crate::config::CatalogConfig;
use crate::container::header::{ChunkHeader, EntryKind};
use crate::container::scanner::ChunkedContainerScanner;
use crate::error::{Result, SonarError};
use crate::utils::{read_sidecar, remove_sidecar, sidecar_path, write_sidecar};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::path::{Path, PathBuf};

/// Location of one chunk of the data entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub flags: u8,
    /// Offset of the chunk's first byte in the logical entry.
    pub virtual_start: u64,
    pub length: u32,
    /// Offset of the chunk header in the archive file.
    pub physical_offset: u64,
}

impl ChunkDescriptor {
    pub fn virtual_end(&self) -> u64 {
        self.virtual_start + self.length as u64
    }

    pub fn is_terminal(&self) -> bool {
        self.flags & ChunkHeader::TERMINAL != 0
    }

    pub fn scheme(&self) -> u8 {
        (self.flags & ChunkHeader::SCHEME_MASK) >> 1
    }

    /// Physical offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.physical_offset + ChunkHeader::SIZE
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.virtual_start && position < self.virtual_end()
    }
}

/// One named entry found in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub kind: EntryKind,
    pub name: String,
    /// Offset of the entry's first chunk header.
    pub physical_offset: u64,
    /// Sum of the entry's chunk lengths.
    pub logical_length: u64,
    /// Uncompressed size declared in the local file header.
    pub declared_length: u64,
}

/// Chunk table for the data entry of one archive, plus the entry directory.
///
/// Built once by [`ChunkedContainerScanner`] and immutable afterwards. The
/// chunk table is contiguous in virtual space and ends with a terminal chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastIndex {
    entries: SmallVec<[ContainerEntry; 3]>,
    chunks: Vec<ChunkDescriptor>,
    archive_len: u64,
}

impl FastIndex {
    pub const SIDECAR_SUFFIX: &'static str = ".ind";
    const MAGIC: &'static [u8; 4] = b"SAIX";
    const FORMAT_VERSION: u32 = 1;

    pub(crate) fn new(
        entries: SmallVec<[ContainerEntry; 3]>,
        chunks: Vec<ChunkDescriptor>,
        archive_len: u64,
    ) -> Result<Self> {
        let index = FastIndex { entries, chunks, archive_len };
        index.validate()?;
        Ok(index)
    }

    /// Check the chunk-table invariants.
    pub fn validate(&self) -> Result<()> {
        let data = self
            .data_entry()
            .ok_or_else(|| SonarError::structure(0, "archive has no data entry"))?;

        let mut expected_start = 0u64;
        for chunk in &self.chunks {
            if chunk.virtual_start != expected_start {
                return Err(SonarError::structure(
                    chunk.physical_offset,
                    format!(
                        "chunk starts at logical offset {} but {} was expected",
                        chunk.virtual_start, expected_start
                    ),
                ));
            }
            expected_start = chunk.virtual_end();
        }

        match self.chunks.last() {
            Some(last) if last.is_terminal() => {}
            _ => {
                return Err(SonarError::structure(
                    data.physical_offset,
                    "data entry does not end with a terminal chunk",
                ))
            }
        }

        if expected_start != data.logical_length {
            return Err(SonarError::structure(
                data.physical_offset,
                format!(
                    "chunk total {} disagrees with entry length {}",
                    expected_start, data.logical_length
                ),
            ));
        }
        Ok(())
    }

    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    pub fn entry(&self, kind: EntryKind) -> Option<&ContainerEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    pub fn data_entry(&self) -> Option<&ContainerEntry> {
        self.entry(EntryKind::Data)
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    pub fn chunk(&self, index: usize) -> Option<&ChunkDescriptor> {
        self.chunks.get(index)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Length of the logical data entry.
    pub fn data_len(&self) -> u64 {
        self.chunks.last().map_or(0, |c| c.virtual_end())
    }

    /// Size of the archive file when the index was built.
    pub fn archive_len(&self) -> u64 {
        self.archive_len
    }

    /// Index of the chunk holding logical byte `position`, skipping empty
    /// chunks. `None` at or past the end of the entry.
    pub fn chunk_containing(&self, position: u64) -> Option<usize> {
        let i = self.chunks.partition_point(|c| c.virtual_end() <= position);
        if i < self.chunks.len() {
            Some(i)
        } else {
            None
        }
    }

    pub fn sidecar_path(archive: &Path) -> PathBuf {
        sidecar_path(archive, Self::SIDECAR_SUFFIX)
    }

    /// Load a persisted index. A sidecar whose recorded archive length
    /// differs from the file on disk is reported as stale.
    pub fn load(archive: &Path) -> Result<Option<Self>> {
        let index: FastIndex = match read_sidecar(&Self::sidecar_path(archive), Self::MAGIC, Self::FORMAT_VERSION)? {
            Some(index) => index,
            None => return Ok(None),
        };
        let live_len = std::fs::metadata(archive)?.len();
        if live_len != index.archive_len {
            return Err(SonarError::StaleIndex {
                path: archive.display().to_string(),
                reason: format!("archive is {} bytes, index expects {}", live_len, index.archive_len),
            });
        }
        index.validate()?;
        Ok(Some(index))
    }

    pub fn save(&self, archive: &Path) -> Result<()> {
        write_sidecar(&Self::sidecar_path(archive), Self::MAGIC, Self::FORMAT_VERSION, self)
    }

    /// Reuse the `.ind` sidecar when it is valid, otherwise scan the archive
    /// and persist the fresh index.
    pub fn load_or_build(archive: &Path, config: &CatalogConfig) -> Result<Self> {
        if config.use_sidecars {
            match Self::load(archive) {
                Ok(Some(index)) => {
                    debug!("reusing fast index for {}", archive.display());
                    return Ok(index);
                }
                Ok(None) => {}
                Err(e) => warn!("discarding fast index for {}: {}", archive.display(), e),
            }
        }
        Self::build(archive, config)
    }

    /// Scan the archive from scratch, replacing any persisted index only
    /// once the scan has fully succeeded.
    pub fn build(archive: &Path, config: &CatalogConfig) -> Result<Self> {
        let index = ChunkedContainerScanner::open(archive, config)?.scan()?;
        info!(
            "indexed {}: {} chunks, {} logical bytes",
            archive.display(),
            index.chunk_count(),
            index.data_len()
        );
        if config.use_sidecars {
            if let Err(e) = index.save(archive) {
                warn!("could not persist fast index for {}: {}", archive.display(), e);
            }
        }
        Ok(index)
    }

    /// Delete any persisted index and build a new one.
    pub fn rebuild(archive: &Path, config: &CatalogConfig) -> Result<Self> {
        remove_sidecar(&Self::sidecar_path(archive))?;
        Self::build(archive, config)
    }
}
