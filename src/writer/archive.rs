// src/writer/archive.rs
use crate::container::{signature, ChunkHeader, EntryKind, LocalFileHeader};
use crate::error::{Result, SonarError};
use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Crc;
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Central directory bookkeeping for one written entry.
struct WrittenEntry {
    name: String,
    header_offset: u32,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

/// Writes the uncompressed pseudo-zip container used by GLF archives.
///
/// Entries are split into stored DEFLATE blocks of at most
/// [`ChunkHeader::MAX_WRITE_LENGTH`] bytes followed by an empty final block,
/// so any zip reader can inflate them while the fast index can seek
/// straight into them.
///
/// ```no_run
/// use sonar_archive::writer::{GlfArchiveWriter, GlfRecordWriter};
///
/// let records = GlfRecordWriter::new();
/// let mut archive = GlfArchiveWriter::create("session.glf")?;
/// archive.write_session("session", b"<cfg/>", &records.finish(), b"<xml/>")?;
/// archive.finish()?;
/// # Ok::<(), sonar_archive::SonarError>(())
/// ```
pub struct GlfArchiveWriter {
    file: BufWriter<File>,
    position: u64,
    entries: Vec<WrittenEntry>,
    comment: String,
    dos_date: u16,
    dos_time: u16,
}

impl GlfArchiveWriter {
    pub const DEFAULT_COMMENT: &'static str = "sonar-archive writer";

    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        let (dos_date, dos_time) = dos_timestamp(SystemTime::now());
        Ok(GlfArchiveWriter {
            file: BufWriter::new(file),
            position: 0,
            entries: Vec::new(),
            comment: Self::DEFAULT_COMMENT.to_string(),
            dos_date,
            dos_time,
        })
    }

    /// Comment stored with each central directory record.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_dos_timestamp(mut self, date: u16, time: u16) -> Self {
        self.dos_date = date;
        self.dos_time = time;
        self
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Write the three entries of a sonar session: `<stem>.cfg`, `<stem>.dat`, `<stem>.xml`.
    pub fn write_session(&mut self, stem: &str, config: &[u8], data: &[u8], metadata: &[u8]) -> Result<()> {
        self.write_entry(&format!("{}.cfg", stem), config)?;
        self.write_entry(&format!("{}.dat", stem), data)?;
        self.write_entry(&format!("{}.xml", stem), metadata)
    }

    /// Append one entry as stored chunks.
    pub fn write_entry(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if EntryKind::from_name(name).is_none() {
            debug!("writing entry {} that readers will not recognise", name);
        }
        let compressed = stored_size(data.len());
        let (compressed_size, uncompressed_size) = match (u32::try_from(compressed), u32::try_from(data.len())) {
            (Ok(c), Ok(u)) => (c, u),
            _ => {
                return Err(SonarError::structure(
                    self.position,
                    format!("entry {} of {} bytes exceeds the 4 GiB zip limit", name, data.len()),
                ))
            }
        };
        let header_offset = u32::try_from(self.position)
            .map_err(|_| SonarError::structure(self.position, "archive exceeds the 4 GiB zip limit"))?;

        let mut crc = Crc::new();
        crc.update(data);
        let header = LocalFileHeader {
            version: LocalFileHeader::ZIP_VERSION,
            flags: 0,
            method: LocalFileHeader::METHOD_DEFLATE,
            mod_time: self.dos_time,
            mod_date: self.dos_date,
            crc32: crc.sum(),
            compressed_size,
            uncompressed_size,
            name: name.as_bytes().to_vec(),
            extra: Vec::new(),
        };
        header.write(&mut self.file)?;
        self.position += header.encoded_len();

        for block in data.chunks(ChunkHeader::MAX_WRITE_LENGTH) {
            ChunkHeader::stored(block.len() as u16, false).write(&mut self.file)?;
            self.file.write_all(block)?;
        }
        ChunkHeader::stored(0, true).write(&mut self.file)?;
        self.position += compressed;

        self.entries.push(WrittenEntry {
            name: name.to_string(),
            header_offset,
            crc32: header.crc32,
            compressed_size,
            uncompressed_size,
        });
        Ok(())
    }

    /// Write the central directory and end record, then flush. Returns the archive length.
    pub fn finish(mut self) -> Result<u64> {
        let directory_start = self.position;
        for entry in &self.entries {
            let w = &mut self.file;
            w.write_u32::<LittleEndian>(signature::CENTRAL_DIRECTORY)?;
            w.write_u16::<LittleEndian>(0)?;
            w.write_u16::<LittleEndian>(LocalFileHeader::ZIP_VERSION)?;
            w.write_u16::<LittleEndian>(0)?;
            w.write_u16::<LittleEndian>(LocalFileHeader::METHOD_DEFLATE)?;
            w.write_u16::<LittleEndian>(self.dos_time)?;
            w.write_u16::<LittleEndian>(self.dos_date)?;
            w.write_u32::<LittleEndian>(entry.crc32)?;
            w.write_u32::<LittleEndian>(entry.compressed_size)?;
            w.write_u32::<LittleEndian>(entry.uncompressed_size)?;
            w.write_u16::<LittleEndian>(entry.name.len() as u16)?;
            w.write_u16::<LittleEndian>(0)?;
            w.write_u16::<LittleEndian>(self.comment.len() as u16)?;
            w.write_u16::<LittleEndian>(0)?;
            w.write_u16::<LittleEndian>(0)?;
            w.write_u32::<LittleEndian>(0)?;
            w.write_u32::<LittleEndian>(entry.header_offset)?;
            w.write_all(entry.name.as_bytes())?;
            w.write_all(self.comment.as_bytes())?;
            self.position += 46 + entry.name.len() as u64 + self.comment.len() as u64;
        }
        let directory_len = self.position - directory_start;

        let count = self.entries.len() as u16;
        self.file.write_u32::<LittleEndian>(signature::END_OF_CENTRAL_DIRECTORY)?;
        self.file.write_u16::<LittleEndian>(0)?;
        self.file.write_u16::<LittleEndian>(0)?;
        self.file.write_u16::<LittleEndian>(count)?;
        self.file.write_u16::<LittleEndian>(count)?;
        self.file.write_u32::<LittleEndian>(directory_len as u32)?;
        self.file.write_u32::<LittleEndian>(directory_start as u32)?;
        self.file.write_u16::<LittleEndian>(0)?;
        self.position += 22;

        self.file.flush()?;
        Ok(self.position)
    }
}

/// On-disk size of `len` bytes written as stored chunks plus the final empty chunk.
pub fn stored_size(len: usize) -> u64 {
    let blocks = len.div_ceil(ChunkHeader::MAX_WRITE_LENGTH) as u64;
    (blocks + 1) * ChunkHeader::SIZE + len as u64
}

/// MS-DOS date and time words for a UTC instant.
fn dos_timestamp(time: SystemTime) -> (u16, u16) {
    let secs = time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs()) as i64;
    let days = secs.div_euclid(86_400);
    let of_day = secs.rem_euclid(86_400);

    // civil-from-days, proleptic Gregorian
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    let year = (year - 1980).clamp(0, 127);
    let date = (year << 9 | month << 5 | day) as u16;
    let time = ((of_day / 3600) << 11 | (of_day % 3600 / 60) << 5 | (of_day % 60) / 2) as u16;
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::container::{extract_entry, ChunkedContainerScanner};
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_stored_size() {
        assert_eq!(stored_size(0), 5);
        assert_eq!(stored_size(10), 20);
        assert_eq!(stored_size(ChunkHeader::MAX_WRITE_LENGTH), 65531 + 10);
        assert_eq!(stored_size(ChunkHeader::MAX_WRITE_LENGTH + 1), 65532 + 15);
    }

    #[test]
    fn test_dos_timestamp() {
        // 2024-05-01 12:30:10 UTC
        let t = UNIX_EPOCH + Duration::from_secs(1_714_566_610);
        let (date, time) = dos_timestamp(t);
        assert_eq!(date >> 9, 44);
        assert_eq!((date >> 5) & 0x0F, 5);
        assert_eq!(date & 0x1F, 1);
        assert_eq!(time >> 11, 12);
        assert_eq!((time >> 5) & 0x3F, 30);
        assert_eq!(time & 0x1F, 5);
    }

    #[test]
    fn test_archive_scans_and_inflates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.glf");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let mut writer = GlfArchiveWriter::create(&path).unwrap();
        writer.write_session("session", b"cfg", &data, b"<xml/>").unwrap();
        let len = writer.finish().unwrap();
        assert_eq!(len, std::fs::metadata(&path).unwrap().len());

        let index = ChunkedContainerScanner::open(&path, &CatalogConfig::default())
            .unwrap()
            .scan()
            .unwrap();
        assert_eq!(index.data_len(), data.len() as u64);
        assert_eq!(index.chunk_count(), 5);
        assert_eq!(extract_entry(&path, EntryKind::Data).unwrap(), data);
        assert_eq!(extract_entry(&path, EntryKind::Metadata).unwrap(), b"<xml/>");
    }
}
