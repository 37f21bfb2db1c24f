// src/container/scanner.rs
use crate::config::{CatalogConfig, ScanPolicy};
use crate::container::header::{signature, ChunkHeader, EntryKind, LocalFileHeader};
use crate::container::index::{ChunkDescriptor, ContainerEntry, FastIndex};
use crate::container::ReadSeek;
use crate::error::{Result, SonarError};
use crate::utils::{is_eof, read_exact_or_eof, LeSlice};
use log::{debug, warn};
use smallvec::SmallVec;
use std::fs::File;
use std::io::{BufReader, Read, SeekFrom};
use std::path::Path;

/// One-pass parser of the chunked container.
///
/// Reads only structural fields and seeks over payload bytes, so a scan
/// touches a few bytes per chunk regardless of archive size.
pub struct ChunkedContainerScanner<R: ReadSeek> {
    reader: R,
    position: u64,
    archive_len: u64,
    policy: ScanPolicy,
}

impl ChunkedContainerScanner<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, config: &CatalogConfig) -> Result<Self> {
        let file = File::open(path)?;
        let archive_len = file.metadata()?.len();
        Ok(ChunkedContainerScanner::new(
            BufReader::with_capacity(config.buffer_capacity, file),
            archive_len,
            config.scan_policy,
        ))
    }
}

impl<R: ReadSeek> ChunkedContainerScanner<R> {
    /// # Arguments
    ///
    /// * `reader` - Source positioned at offset 0 of the archive
    /// * `archive_len` - Total archive size, used to detect truncation
    /// * `policy` - How to treat size mismatches and unknown entries
    pub fn new(reader: R, archive_len: u64, policy: ScanPolicy) -> Self {
        ChunkedContainerScanner {
            reader,
            position: 0,
            archive_len,
            policy,
        }
    }

    /// Walk the whole container and produce its fast index.
    pub fn scan(mut self) -> Result<FastIndex> {
        let mut entries: SmallVec<[ContainerEntry; 3]> = SmallVec::new();
        let mut chunks = Vec::new();

        loop {
            let record_offset = self.position;
            let mut sig = [0u8; 4];
            match read_exact_or_eof(&mut self.reader, &mut sig) {
                Ok(true) => self.position += 4,
                Ok(false) => break,
                Err(e) if is_eof(&e) => {
                    return Err(SonarError::structure(record_offset, "truncated signature"))
                }
                Err(e) => return Err(e.into()),
            }

            match u32::from_le_bytes(sig) {
                signature::LOCAL_FILE => {
                    self.scan_entry(record_offset, &mut entries, &mut chunks)?;
                }
                signature::CENTRAL_DIRECTORY => {
                    debug!("central directory record at {}", record_offset);
                    self.skip_central_record(record_offset)?;
                }
                signature::DATA_DESCRIPTOR => {
                    self.skip(12, record_offset)?;
                }
                signature::END_OF_CENTRAL_DIRECTORY => {
                    debug!("end of central directory at {}", record_offset);
                    self.skip_end_record(record_offset)?;
                }
                other => {
                    let has_data = entries.iter().any(|e| e.kind == EntryKind::Data);
                    if self.policy == ScanPolicy::Strict || !has_data {
                        return Err(SonarError::structure(
                            record_offset,
                            format!("unrecognised signature 0x{:08x}", other),
                        ));
                    }
                    warn!(
                        "unrecognised signature 0x{:08x} at {}, ending container scan",
                        other, record_offset
                    );
                    break;
                }
            }
        }

        FastIndex::new(entries, chunks, self.archive_len)
    }

    fn scan_entry(
        &mut self,
        header_offset: u64,
        entries: &mut SmallVec<[ContainerEntry; 3]>,
        chunks: &mut Vec<ChunkDescriptor>,
    ) -> Result<()> {
        let header = LocalFileHeader::read_after_signature(&mut self.reader)
            .map_err(|e| self.truncation(e, header_offset))?;
        self.position += header.encoded_len() - 4;

        let kind = header.kind();
        let duplicate = kind.map_or(false, |k| entries.iter().any(|e| e.kind == k));
        if kind.is_none() || duplicate {
            let reason = if duplicate {
                format!("duplicate entry {}", header.display_name())
            } else {
                format!("unrecognised entry {}", header.display_name())
            };
            if self.policy == ScanPolicy::Strict {
                return Err(SonarError::structure(header_offset, reason));
            }
            warn!("{} at {}, skipping its chunks", reason, header_offset);
        }
        let record_chunks = kind == Some(EntryKind::Data) && !duplicate;

        let entry_start = self.position;
        let mut total = 0u64;
        loop {
            let chunk_offset = self.position;
            let chunk = ChunkHeader::read(&mut self.reader).map_err(|e| self.truncation(e, chunk_offset))?;
            self.position += ChunkHeader::SIZE;

            if !chunk.is_raw() {
                return Err(SonarError::UnsupportedCompression {
                    scheme: chunk.scheme(),
                    offset: chunk_offset,
                });
            }
            self.skip(chunk.length as u64, chunk_offset)?;

            if record_chunks {
                chunks.push(ChunkDescriptor {
                    flags: chunk.flags,
                    virtual_start: total,
                    length: chunk.length as u32,
                    physical_offset: chunk_offset,
                });
            }
            total += chunk.length as u64;

            if chunk.is_terminal() {
                break;
            }
        }

        let declared = header.uncompressed_size as u64;
        if declared != 0 && declared != total {
            let reason = format!(
                "entry {} holds {} bytes in chunks but declares {}",
                header.display_name(),
                total,
                declared
            );
            match self.policy {
                ScanPolicy::Strict => return Err(SonarError::structure(header_offset, reason)),
                ScanPolicy::Permissive => warn!("{}", reason),
            }
        }

        if let (Some(kind), false) = (kind, duplicate) {
            entries.push(ContainerEntry {
                kind,
                name: header.display_name().into_owned(),
                physical_offset: entry_start,
                logical_length: total,
                declared_length: declared,
            });
        }
        Ok(())
    }

    fn skip_central_record(&mut self, offset: u64) -> Result<()> {
        let mut fixed = [0u8; 42];
        self.reader
            .read_exact(&mut fixed)
            .map_err(|e| self.truncation(e.into(), offset))?;
        self.position += fixed.len() as u64;
        let view = LeSlice::new(&fixed);
        let variable = view.u16_at(24) as u64 + view.u16_at(26) as u64 + view.u16_at(28) as u64;
        self.skip(variable, offset)
    }

    fn skip_end_record(&mut self, offset: u64) -> Result<()> {
        let mut fixed = [0u8; 18];
        self.reader
            .read_exact(&mut fixed)
            .map_err(|e| self.truncation(e.into(), offset))?;
        self.position += fixed.len() as u64;
        let comment_len = LeSlice::new(&fixed).u16_at(16) as u64;
        self.skip(comment_len, offset)
    }

    fn skip(&mut self, n: u64, record_offset: u64) -> Result<()> {
        if self.position + n > self.archive_len {
            return Err(SonarError::structure(
                record_offset,
                format!(
                    "record extends to {} beyond archive end {}",
                    self.position + n,
                    self.archive_len
                ),
            ));
        }
        if n > 0 {
            self.reader.seek(SeekFrom::Current(n as i64))?;
            self.position += n;
        }
        Ok(())
    }

    fn truncation(&self, err: SonarError, offset: u64) -> SonarError {
        match err {
            SonarError::Io(e) if is_eof(&e) => SonarError::structure(offset, "archive truncated"),
            other => other,
        }
    }
}
