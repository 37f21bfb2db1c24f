// src/record/ecd.rs
use crate::error::{CorruptionKind, Result, SonarError};
use crate::record::payload::{read_f64_table, read_stored, rle_decode, ImageGeometry, ImagePayload};
use crate::record::{skip_exact, DecodeDepth, DecodedImage, RecordSource};
use crate::types::CDate;
use crate::utils::{decode_utf16le_lossy, encode_utf16le, is_eof, read_exact_or_eof, skip_past_marker_pair};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::BufMut;
use log::warn;
use std::io::Read;

/// Record type codes and the version word each must carry.
pub mod record_type {
    pub const SENSOR: u16 = 1;
    pub const TARGET: u16 = 2;
    pub const TARGET_IMAGE: u16 = 3;
    pub const PING_TAIL: u16 = 4;
    pub const ACOUSTIC_ZOOM: u16 = 5;

    /// Type word marking the end of the file.
    pub const END_TAG: u16 = 0xDEDE;

    pub fn expected_version(record_type: u16) -> Option<u16> {
        match record_type {
            SENSOR => Some(0xEFEF),
            TARGET => Some(0xDFDF),
            TARGET_IMAGE => Some(0xCFCF),
            PING_TAIL => Some(0xBFBF),
            ACOUSTIC_ZOOM => Some(0xAFAF),
            _ => None,
        }
    }
}

/// Byte closing every ECD record, written twice.
pub const HALF_END_TAG: u8 = 0xDE;

/// Plausible speed of sound bounds in m/s.
pub const SOUND_SPEED_RANGE: std::ops::RangeInclusive<f64> = 1000.0..=2000.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdFileHeader {
    pub head_version: i32,
    pub end_info: i32,
    pub message: String,
}

impl EcdFileHeader {
    pub const SIZE: u64 = 26;
    const MESSAGE_CHARS: usize = 9;
    pub const HEAD_VERSION: i32 = 0x0F0F;

    pub fn read<S: RecordSource + ?Sized>(source: &mut S) -> Result<Self> {
        let head_version = source.read_i32::<LittleEndian>()?;
        let end_info = source.read_i32::<LittleEndian>()?;
        let mut message = [0u8; Self::MESSAGE_CHARS * 2];
        source.read_exact(&mut message)?;
        Ok(EcdFileHeader {
            head_version,
            end_info,
            message: decode_utf16le_lossy(&message).trim_end_matches('\0').to_string(),
        })
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.head_version);
        buf.put_i32_le(self.end_info);
        let mut message = encode_utf16le(&self.message);
        message.resize(Self::MESSAGE_CHARS * 2, 0);
        buf.put_slice(&message);
    }
}

impl Default for EcdFileHeader {
    fn default() -> Self {
        EcdFileHeader {
            head_version: Self::HEAD_VERSION,
            end_info: 0,
            message: "Main Data".into(),
        }
    }
}

/// One step through an ECD record stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EcdItem {
    Image(DecodedImage),
    /// A non-image record that was skipped up to its end tag.
    Skipped { record_type: u16, position: u64 },
    End,
}

/// Read the next record.
///
/// An invalid type/version pair is reported as [`CorruptionKind::UnknownType`]
/// and means the rest of the file cannot be interpreted. An implausible
/// target image is reported as [`CorruptionKind::Implausible`] with the
/// source positioned after it, so the caller can drop just that record.
pub fn read_item<S: RecordSource + ?Sized>(source: &mut S, depth: DecodeDepth, utc_offset_millis: i64) -> Result<EcdItem> {
    let position = source.position();
    let mut word = [0u8; 2];
    match read_exact_or_eof(source, &mut word) {
        Ok(true) => {}
        Ok(false) => return Ok(EcdItem::End),
        Err(e) if is_eof(&e) => return Ok(EcdItem::End),
        Err(e) => return Err(e.into()),
    }
    let record_type = u16::from_le_bytes(word);
    if record_type == record_type::END_TAG {
        return Ok(EcdItem::End);
    }

    let outcome = read_after_type(source, record_type, position, depth, utc_offset_millis);
    match outcome {
        Err(SonarError::Io(e)) if is_eof(&e) => {
            warn!("ECD record at {} truncated by end of file", position);
            Ok(EcdItem::End)
        }
        other => other,
    }
}

fn read_after_type<S: RecordSource + ?Sized>(
    source: &mut S,
    record_type: u16,
    position: u64,
    depth: DecodeDepth,
    utc_offset_millis: i64,
) -> Result<EcdItem> {
    let version = source.read_u16::<LittleEndian>()?;
    if record_type::expected_version(record_type) != Some(version) {
        return Err(SonarError::corrupt(
            position,
            CorruptionKind::UnknownType,
            format!("type {} with version 0x{:04X}", record_type, version),
        ));
    }

    if record_type != record_type::TARGET_IMAGE {
        return match skip_past_marker_pair(source, HALF_END_TAG)? {
            Some(_) => Ok(EcdItem::Skipped { record_type, position }),
            None => Ok(EcdItem::End),
        };
    }
    read_target_image(source, position, depth, utc_offset_millis).map(EcdItem::Image)
}

fn read_target_image<S: RecordSource + ?Sized>(
    source: &mut S,
    position: u64,
    depth: DecodeDepth,
    utc_offset_millis: i64,
) -> Result<DecodedImage> {
    // ping settings: version, pid, half array, tx length, scan rate, sos, six gains,
    // focus, bf gain, aperture, tx start/len/radius/range, modulation frequency
    skip_exact(source, 2 + 1 + 4 + 1 + 1 + 4 + 12 + 4 + 2 + 4 + 2 + 2 + 4 + 4 + 4)?;
    let num_beams = source.read_i16::<LittleEndian>()?;
    let _sos_at_xd = source.read_f32::<LittleEndian>()?;
    let rx1 = source.read_i16::<LittleEndian>()?;
    // rx2, tx1, ping flags, four array ids, tid, pid2
    skip_exact(source, 2 + 2 + 2 + 4 + 2 + 2)?;
    let tx_time = source.read_f64::<LittleEndian>()?;
    let _end_time = source.read_f64::<LittleEndian>()?;
    let _tx_angle = source.read_f64::<LittleEndian>()?;
    let sos_avg = source.read_f64::<LittleEndian>()?;
    let _mask = source.read_i32::<LittleEndian>()?;
    let bpp = source.read_u8()?;
    let n_ranges = source.read_i32::<LittleEndian>()?;
    let _b0 = source.read_i32::<LittleEndian>()?;
    let _b1 = source.read_i32::<LittleEndian>()?;
    let r0 = source.read_i32::<LittleEndian>()?;
    let _r1 = source.read_i32::<LittleEndian>()?;
    let _dual = source.read_i32::<LittleEndian>()?;
    let n_bearings = source.read_i32::<LittleEndian>()?;

    if num_beams < 0 {
        return Err(SonarError::corrupt(
            position,
            CorruptionKind::Geometry,
            format!("negative beam count {}", num_beams),
        ));
    }
    let bearing_table = match depth {
        DecodeDepth::Full => Some(read_f64_table(source, num_beams as usize)?),
        DecodeDepth::Descriptor => {
            skip_exact(source, num_beams as u64 * 8)?;
            None
        }
    };

    let _brgs_2 = source.read_i32::<LittleEndian>()?;
    let c_size = source.read_i32::<LittleEndian>()?;
    if c_size < 0 {
        return Err(SonarError::corrupt(
            position,
            CorruptionKind::Geometry,
            format!("negative payload size {}", c_size),
        ));
    }
    let compressed = match depth {
        DecodeDepth::Full => {
            Some(read_stored(source, c_size as u64)?)
        }
        DecodeDepth::Descriptor => {
            skip_exact(source, c_size as u64)?;
            None
        }
    };
    let _s_count = source.read_i32::<LittleEndian>()?;
    let _tag = source.read_u16::<LittleEndian>()?;

    if n_bearings <= 0 || n_ranges <= 0 || !SOUND_SPEED_RANGE.contains(&sos_avg) {
        return Err(SonarError::corrupt(
            position,
            CorruptionKind::Implausible,
            format!("{} bearings, {} ranges, sound speed {}", n_bearings, n_ranges, sos_avg),
        ));
    }

    let geometry = ImageGeometry {
        n_bearings: n_bearings as u32,
        n_ranges: n_ranges as u32,
        first_range: r0.max(0) as u32,
        bytes_per_sample: bpp.max(1),
        sound_speed: sos_avg,
    };
    // the record is fully consumed, so an unusable grid size only drops this record
    let Some(grid_len) = geometry.checked_grid_len() else {
        return Err(SonarError::corrupt(
            position,
            CorruptionKind::Implausible,
            format!("{} bearings x {} ranges x {} bytes per sample", n_bearings, n_ranges, bpp),
        ));
    };
    let payload = match (compressed, bearing_table) {
        (Some(compressed), Some(bearing_table)) => Some(ImagePayload {
            amplitudes: rle_decode(&compressed, grid_len),
            bearing_table,
        }),
        _ => None,
    };

    Ok(DecodedImage {
        position,
        time_millis: CDate(tx_time).to_millis(utc_offset_millis),
        device_id: rx1 as u16 as u32,
        geometry,
        payload,
    })
}
