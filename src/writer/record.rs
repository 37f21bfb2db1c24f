// src/writer/record.rs
use crate::error::{CorruptionKind, Result, SonarError};
use crate::record::glf::{
    IMAGE_RECORD_TYPE, LEADING_GUARD, MAX_BEARINGS, MAX_RANGES, STATUS_RECORD_SIZE, TRAILING_GUARD,
};
use crate::record::{GenericHeader, StatusRecord};
use crate::types::CDate;
use bytes::{BufMut, Bytes, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::Path;

/// One image ping to encode.
#[derive(Debug, Clone, PartialEq)]
pub struct GlfImage {
    pub time_millis: i64,
    pub device_id: u16,
    pub start_range: i32,
    /// Bearing-major amplitudes, `bearing_table.len() * n_ranges` bytes.
    pub amplitudes: Vec<u8>,
    pub bearing_table: Vec<f64>,
    pub n_ranges: u32,
    pub sound_speed: f32,
    /// Store the grid zlib-compressed. Falls back to raw when compression
    /// would not shrink it.
    pub compress: bool,
}

impl GlfImage {
    /// A flat `n_bearings` by `n_ranges` image filled with `fill`.
    pub fn filled(time_millis: i64, device_id: u16, n_bearings: usize, n_ranges: u32, fill: u8) -> Self {
        let half = n_bearings as f64 / 2.0;
        GlfImage {
            time_millis,
            device_id,
            start_range: 0,
            amplitudes: vec![fill; n_bearings * n_ranges as usize],
            bearing_table: (0..n_bearings).map(|i| (i as f64 - half) / half.max(1.0)).collect(),
            n_ranges,
            sound_speed: 1500.0,
            compress: false,
        }
    }
}

/// Encodes a GLF `.dat` record stream in memory.
///
/// Record times are given in UTC milliseconds and stored as C dates shifted
/// by the writer's UTC offset, the inverse of what the reader applies.
#[derive(Debug, Default)]
pub struct GlfRecordWriter {
    buf: BytesMut,
    utc_offset_millis: i64,
    node_id: u16,
    records: usize,
}

impl GlfRecordWriter {
    pub fn new() -> Self {
        GlfRecordWriter::default()
    }

    pub fn with_utc_offset_millis(mut self, offset: i64) -> Self {
        self.utc_offset_millis = offset;
        self
    }

    pub fn with_node_id(mut self, node_id: u16) -> Self {
        self.node_id = node_id;
        self
    }

    /// Logical offset the next record will start at.
    pub fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn record_count(&self) -> usize {
        self.records
    }

    fn header(&self, data_type: u8, device_id: u16, time_millis: i64, length: usize) -> GenericHeader {
        GenericHeader {
            id: GenericHeader::ID,
            version: 2,
            length: length as i32,
            timestamp: CDate::from_millis(time_millis, self.utc_offset_millis),
            data_type,
            device_id,
            node_id: self.node_id,
            spare: 0,
        }
    }

    /// Append an image record. Returns the offset it was written at.
    pub fn write_image(&mut self, image: &GlfImage) -> Result<u64> {
        let n_bearings = image.bearing_table.len();
        let grid_len = n_bearings * image.n_ranges as usize;
        if n_bearings as i32 > MAX_BEARINGS || image.n_ranges > MAX_RANGES as u32 || image.amplitudes.len() != grid_len {
            return Err(SonarError::corrupt(
                self.position(),
                CorruptionKind::Geometry,
                format!(
                    "{} bearings by {} ranges needs {} bytes, got {}",
                    n_bearings,
                    image.n_ranges,
                    grid_len,
                    image.amplitudes.len()
                ),
            ));
        }

        let stored = if image.compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&image.amplitudes)?;
            let packed = encoder.finish()?;
            // a packed grid the same length as the raw one would be read back as raw
            if packed.len() < grid_len {
                packed
            } else {
                image.amplitudes.clone()
            }
        } else {
            image.amplitudes.clone()
        };

        let position = self.position();
        let body_len = 62 + stored.len() + n_bearings * 8;
        let tx_time = CDate::from_millis(image.time_millis, self.utc_offset_millis);
        self.header(GenericHeader::TYPE_IMAGE, image.device_id, image.time_millis, body_len)
            .encode(&mut self.buf);

        let b = &mut self.buf;
        b.put_u16_le(IMAGE_RECORD_TYPE);
        b.put_u16_le(LEADING_GUARD);
        b.put_u16_le(0);
        b.put_i32_le(image.start_range);
        b.put_i32_le(image.start_range + image.n_ranges as i32);
        b.put_u16_le(0);
        b.put_i32_le(0);
        b.put_i32_le(n_bearings as i32);
        b.put_i32_le(stored.len() as i32);
        b.put_slice(&stored);
        for bearing in &image.bearing_table {
            b.put_f64_le(*bearing);
        }
        b.put_i32_le(0);
        b.put_i32_le(720_000);
        b.put_f32_le(120.0);
        b.put_f64_le(tx_time.0);
        b.put_u16_le(0);
        b.put_f32_le(image.sound_speed);
        b.put_u16_le(100);
        b.put_u8(0);
        b.put_u8(0);
        b.put_u8(0);
        b.put_i8(0);
        b.put_u16_le(TRAILING_GUARD);

        self.records += 1;
        Ok(position)
    }

    /// Append a status record stamped with `time_millis`.
    pub fn write_status(&mut self, device_id: u16, time_millis: i64, status: &StatusRecord) -> u64 {
        let position = self.position();
        self.header(GenericHeader::TYPE_STATUS, device_id, time_millis, STATUS_RECORD_SIZE)
            .encode(&mut self.buf);
        status.encode(&mut self.buf);
        self.records += 1;
        position
    }

    /// Append a record of another type whose body readers skip by length.
    pub fn write_other(&mut self, data_type: u8, device_id: u16, time_millis: i64, body: &[u8]) -> u64 {
        let position = self.position();
        self.header(data_type, device_id, time_millis, body.len())
            .encode(&mut self.buf);
        self.buf.put_slice(body);
        self.records += 1;
        position
    }

    /// Append bytes verbatim, for streams that need deliberate damage.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Append the `0xDE 0xDE` end-of-data sentinel.
    pub fn write_end_sentinel(&mut self) {
        self.buf.put_u8(GenericHeader::END_SENTINEL);
        self.buf.put_u8(GenericHeader::END_SENTINEL);
    }

    /// The encoded stream.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Write the stream as a bare `.dat` file.
    pub fn write_to_file(self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.finish())?;
        Ok(())
    }
}
