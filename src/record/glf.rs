// src/record/glf.rs
use crate::error::{CorruptionKind, Result, SonarError};
use crate::record::header::{GenericHeader, HeaderRead};
use crate::record::payload::{inflate_zlib, read_f64_table, read_stored, ImageGeometry, ImagePayload, MAX_GRID_LEN};
use crate::record::{skip_exact, DecodeDepth, DecodedImage, RecordKind, RecordSource};
use crate::types::CDate;
use crate::utils::is_eof;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, Bytes};
use log::warn;
use std::io::Read;

/// Guard word following the image record type.
pub const LEADING_GUARD: u16 = 0xEFEF;
/// Guard word closing every image record.
pub const TRAILING_GUARD: u16 = 0xDEDE;
/// Upper bound on beams per ping accepted before a record is called corrupt.
pub const MAX_BEARINGS: i32 = 4096;
/// Upper bound on range samples per beam.
pub const MAX_RANGES: i32 = 16384;
/// Body length of an offline status record.
pub const STATUS_RECORD_SIZE: usize = 218;
/// Image record type written by Gemini software.
pub const IMAGE_RECORD_TYPE: u16 = 1;

/// Read one record from a GLF data stream.
///
/// Returns `Ok(None)` at the end sentinel, at end of stream, and when the
/// stream ends part way through a record. Corrupt image records surface as
/// [`SonarError::RecordCorruption`] with the source left where decoding
/// stopped; the caller decides whether to resynchronise or abort.
pub fn read_record<S: RecordSource + ?Sized>(
    source: &mut S,
    depth: DecodeDepth,
    utc_offset_millis: i64,
) -> Result<Option<RecordKind>> {
    let position = source.position();
    let header = match GenericHeader::read(source)? {
        HeaderRead::Header(header) => header,
        HeaderRead::EndOfData => return Ok(None),
    };

    let outcome = match header.data_type {
        GenericHeader::TYPE_IMAGE => {
            read_image_body(source, &header, position, depth, utc_offset_millis).map(RecordKind::Image)
        }
        GenericHeader::TYPE_STATUS => {
            read_status_body(source, &header, position, utc_offset_millis).map(RecordKind::Status)
        }
        data_type => {
            if data_type != GenericHeader::TYPE_V4 {
                warn!("unknown record type {} at position {}", data_type, position);
            }
            skip_body(source, &header, position).map(|_| RecordKind::Other { data_type, position })
        }
    };

    match outcome {
        Ok(record) => Ok(Some(record)),
        Err(SonarError::Io(e)) if is_eof(&e) => {
            warn!("record at position {} truncated by end of stream", position);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn skip_body<S: RecordSource + ?Sized>(source: &mut S, header: &GenericHeader, position: u64) -> Result<()> {
    if header.length < 0 {
        return Err(SonarError::corrupt(
            position,
            CorruptionKind::Geometry,
            format!("negative record length {}", header.length),
        ));
    }
    skip_exact(source, header.length as u64)
}

fn read_image_body<S: RecordSource + ?Sized>(
    source: &mut S,
    header: &GenericHeader,
    position: u64,
    depth: DecodeDepth,
    utc_offset_millis: i64,
) -> Result<DecodedImage> {
    let _record_type = source.read_u16::<LittleEndian>()?;
    let guard = source.read_u16::<LittleEndian>()?;
    if guard != LEADING_GUARD {
        return Err(SonarError::corrupt(
            position,
            CorruptionKind::LeadingGuard,
            format!("found 0x{:04X}", guard),
        ));
    }

    let image_version = source.read_u16::<LittleEndian>()?;
    let start_range = source.read_i32::<LittleEndian>()?;
    let end_range = source.read_i32::<LittleEndian>()?;
    let _range_compression = source.read_u16::<LittleEndian>()?;
    let start_bearing = source.read_i32::<LittleEndian>()?;
    let end_bearing = source.read_i32::<LittleEndian>()?;
    if image_version == 3 {
        source.read_i16::<LittleEndian>()?;
    }
    let data_size = source.read_i32::<LittleEndian>()?;

    let n_bearings = end_bearing.wrapping_sub(start_bearing);
    let n_ranges = end_range.wrapping_sub(start_range);
    let grid_len = (n_bearings as usize)
        .checked_mul(n_ranges as usize)
        .filter(|&len| len <= MAX_GRID_LEN);
    let grid_len = match grid_len {
        Some(len)
            if n_bearings >= 0
                && n_ranges >= 0
                && data_size >= 0
                && n_bearings <= MAX_BEARINGS
                && n_ranges <= MAX_RANGES
                && start_range >= 0 =>
        {
            len
        }
        _ => {
            return Err(SonarError::corrupt(
                position,
                CorruptionKind::Geometry,
                format!(
                    "bearings {}..{}, ranges {}..{}, data size {}",
                    start_bearing, end_bearing, start_range, end_range, data_size
                ),
            ))
        }
    };

    let payload = match depth {
        DecodeDepth::Full => {
            let stored = read_stored(source, data_size as u64)?;
            let amplitudes = if data_size as usize == grid_len {
                Bytes::from(stored)
            } else {
                inflate_zlib(&stored, grid_len)?
            };
            let bearing_table = read_f64_table(source, n_bearings as usize)?;
            Some(ImagePayload {
                amplitudes,
                bearing_table,
            })
        }
        DecodeDepth::Descriptor => {
            skip_exact(source, data_size as u64 + n_bearings as u64 * 8)?;
            None
        }
    };

    let _state_flags = source.read_i32::<LittleEndian>()?;
    let _modulation_frequency = source.read_i32::<LittleEndian>()?;
    let _beamform_aperture = source.read_f32::<LittleEndian>()?;
    let tx_time = source.read_f64::<LittleEndian>()?;
    let _ping_flags = source.read_u16::<LittleEndian>()?;
    let sos_at_xd = source.read_f32::<LittleEndian>()?;
    let _percent_gain = source.read_u16::<LittleEndian>()?;
    let mut trailer = [0u8; 4];
    source.read_exact(&mut trailer)?;
    let guard = source.read_u16::<LittleEndian>()?;
    if guard != TRAILING_GUARD {
        return Err(SonarError::corrupt(
            position,
            CorruptionKind::TrailingGuard,
            format!("found 0x{:04X}", guard),
        ));
    }

    Ok(DecodedImage {
        position,
        time_millis: CDate(tx_time).to_millis(utc_offset_millis),
        device_id: header.device_id as u32,
        geometry: ImageGeometry {
            n_bearings: n_bearings as u32,
            n_ranges: n_ranges as u32,
            first_range: start_range as u32,
            bytes_per_sample: 1,
            sound_speed: sos_at_xd as f64,
        },
        payload,
    })
}

/// Device status message, in the layout written to offline GLF files.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusRecord {
    pub position: u64,
    pub time_millis: i64,
    pub device_id: u32,
    pub bf_version: i16,
    pub da_version: i16,
    pub flags: i16,
    pub sonar_id: i16,
    pub xd_selected: u8,
    pub vga_temps: [f64; 4],
    pub psu_temp: f64,
    pub die_temp: f64,
    pub tx_temp: f64,
    /// Top and bottom temperature for each of four front ends.
    pub afe_temps: [f64; 8],
    pub link_type: i16,
    pub uplink_mbps: f64,
    pub downlink_mbps: f64,
    pub link_quality: i16,
    /// Packet, receive error, resent, dropped, unknown, lost line and general counts.
    pub counters: [i32; 7],
    pub alt_ip: u32,
    pub surface_ip: u32,
    pub subnet_mask: u32,
    pub mac_address: [u16; 3],
    pub boot_status: [i32; 2],
    pub fpga_time: i64,
    pub dip_switch: i16,
    pub shutdown_status: i16,
    pub network_adaptor_found: bool,
}

impl StatusRecord {
    pub fn decode(mut body: &[u8]) -> std::io::Result<Self> {
        let r = &mut body;
        let mut status = StatusRecord::default();
        r.read_i16::<LittleEndian>()?;
        status.bf_version = r.read_i16::<LittleEndian>()?;
        status.da_version = r.read_i16::<LittleEndian>()?;
        status.flags = r.read_i16::<LittleEndian>()?;
        status.sonar_id = r.read_i16::<LittleEndian>()?;
        status.xd_selected = r.read_u8()?;
        r.read_f64_into::<LittleEndian>(&mut status.vga_temps)?;
        status.psu_temp = r.read_f64::<LittleEndian>()?;
        status.die_temp = r.read_f64::<LittleEndian>()?;
        status.tx_temp = r.read_f64::<LittleEndian>()?;
        r.read_f64_into::<LittleEndian>(&mut status.afe_temps)?;
        status.link_type = r.read_i16::<LittleEndian>()?;
        status.uplink_mbps = r.read_f64::<LittleEndian>()?;
        status.downlink_mbps = r.read_f64::<LittleEndian>()?;
        status.link_quality = r.read_i16::<LittleEndian>()?;
        r.read_i32_into::<LittleEndian>(&mut status.counters)?;
        status.alt_ip = r.read_u32::<LittleEndian>()?;
        status.surface_ip = r.read_u32::<LittleEndian>()?;
        status.subnet_mask = r.read_u32::<LittleEndian>()?;
        r.read_u16_into::<LittleEndian>(&mut status.mac_address)?;
        r.read_i32_into::<LittleEndian>(&mut status.boot_status)?;
        status.fpga_time = r.read_i64::<LittleEndian>()?;
        status.dip_switch = r.read_i16::<LittleEndian>()?;
        status.shutdown_status = r.read_i16::<LittleEndian>()?;
        status.network_adaptor_found = r.read_u8()? != 0;
        Ok(status)
    }

    /// Append the 218-byte body. The generic header is written separately.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_i16_le(0);
        buf.put_i16_le(self.bf_version);
        buf.put_i16_le(self.da_version);
        buf.put_i16_le(self.flags);
        buf.put_i16_le(self.sonar_id);
        buf.put_u8(self.xd_selected);
        for t in self.vga_temps {
            buf.put_f64_le(t);
        }
        buf.put_f64_le(self.psu_temp);
        buf.put_f64_le(self.die_temp);
        buf.put_f64_le(self.tx_temp);
        for t in self.afe_temps {
            buf.put_f64_le(t);
        }
        buf.put_i16_le(self.link_type);
        buf.put_f64_le(self.uplink_mbps);
        buf.put_f64_le(self.downlink_mbps);
        buf.put_i16_le(self.link_quality);
        for c in self.counters {
            buf.put_i32_le(c);
        }
        buf.put_u32_le(self.alt_ip);
        buf.put_u32_le(self.surface_ip);
        buf.put_u32_le(self.subnet_mask);
        for m in self.mac_address {
            buf.put_u16_le(m);
        }
        for b in self.boot_status {
            buf.put_i32_le(b);
        }
        buf.put_i64_le(self.fpga_time);
        buf.put_i16_le(self.dip_switch);
        buf.put_i16_le(self.shutdown_status);
        buf.put_u8(self.network_adaptor_found as u8);
    }
}

fn read_status_body<S: RecordSource + ?Sized>(
    source: &mut S,
    header: &GenericHeader,
    position: u64,
    utc_offset_millis: i64,
) -> Result<StatusRecord> {
    let mut body = [0u8; STATUS_RECORD_SIZE];
    source.read_exact(&mut body)?;
    let mut status = StatusRecord::decode(&body)?;
    status.position = position;
    status.time_millis = header.timestamp.to_millis(utc_offset_millis);
    status.device_id = header.device_id as u32;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PlainSource;
    use std::io::Cursor;

    fn generic(data_type: u8, device_id: u16, length: i32) -> GenericHeader {
        GenericHeader {
            id: GenericHeader::ID,
            version: 2,
            length,
            timestamp: CDate(1.3e9),
            data_type,
            device_id,
            node_id: 100,
            spare: 0,
        }
    }

    /// Hand-encoded image record with a raw 3x2 grid.
    fn image_bytes(leading: u16, trailing: u16, tx_time: f64) -> Vec<u8> {
        let mut buf = Vec::new();
        generic(0, 12, 168).encode(&mut buf);
        buf.put_u16_le(IMAGE_RECORD_TYPE);
        buf.put_u16_le(leading);
        buf.put_u16_le(0);
        buf.put_i32_le(10);
        buf.put_i32_le(12);
        buf.put_u16_le(0);
        buf.put_i32_le(0);
        buf.put_i32_le(3);
        buf.put_i32_le(6);
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        for b in [-0.5f64, 0.0, 0.5] {
            buf.put_f64_le(b);
        }
        buf.put_i32_le(0);
        buf.put_i32_le(720);
        buf.put_f32_le(120.0);
        buf.put_f64_le(tx_time);
        buf.put_u16_le(0);
        buf.put_f32_le(1480.0);
        buf.put_u16_le(50);
        buf.extend_from_slice(&[0, 1, 3, 0]);
        buf.put_u16_le(trailing);
        buf
    }

    fn source(bytes: Vec<u8>) -> PlainSource<Cursor<Vec<u8>>> {
        PlainSource::new(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn test_image_descriptor_and_full() {
        let bytes = image_bytes(LEADING_GUARD, TRAILING_GUARD, 1.0e9);
        let len = bytes.len() as u64;

        let mut src = source(bytes.clone());
        let record = read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap().unwrap();
        assert_eq!(src.position(), len);
        let RecordKind::Image(image) = record else { panic!("expected image") };
        assert_eq!(image.device_id, 12);
        assert_eq!(image.geometry.n_bearings, 3);
        assert_eq!(image.geometry.n_ranges, 2);
        assert_eq!(image.geometry.first_range, 10);
        assert_eq!(image.time_millis, CDate(1.0e9).to_millis(0));
        assert!(image.payload.is_none());

        let mut src = source(bytes);
        let Some(RecordKind::Image(full)) = read_record(&mut src, DecodeDepth::Full, 0).unwrap() else {
            panic!("expected image")
        };
        let payload = full.payload.unwrap();
        assert_eq!(&payload.amplitudes[..], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(payload.bearing_table, vec![-0.5, 0.0, 0.5]);
    }

    #[test]
    fn test_guard_failures() {
        let mut src = source(image_bytes(0x1234, TRAILING_GUARD, 0.0));
        let err = read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap_err();
        assert_eq!(err.corruption_kind(), Some(CorruptionKind::LeadingGuard));
        assert_eq!(src.position(), 25);

        let bytes = image_bytes(LEADING_GUARD, 0xBEEF, 0.0);
        let len = bytes.len() as u64;
        let mut src = source(bytes);
        let err = read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap_err();
        assert_eq!(err.corruption_kind(), Some(CorruptionKind::TrailingGuard));
        assert_eq!(src.position(), len);
    }

    #[test]
    fn test_status_record() {
        let status = StatusRecord {
            bf_version: 5,
            sonar_id: 851,
            vga_temps: [20.0, 21.0, 22.0, 23.0],
            afe_temps: [30.0; 8],
            counters: [1, 2, 3, 4, 5, 6, 7],
            mac_address: [0x0011, 0x2233, 0x4455],
            fpga_time: 123456789,
            network_adaptor_found: true,
            ..Default::default()
        };
        let mut body = Vec::new();
        status.encode(&mut body);
        assert_eq!(body.len(), STATUS_RECORD_SIZE);

        let mut buf = Vec::new();
        generic(3, 851, STATUS_RECORD_SIZE as i32).encode(&mut buf);
        buf.extend_from_slice(&body);
        let mut src = source(buf);
        let Some(RecordKind::Status(decoded)) = read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap() else {
            panic!("expected status")
        };
        assert_eq!(decoded.device_id, 851);
        assert_eq!(decoded.counters, status.counters);
        assert_eq!(decoded.mac_address, status.mac_address);
        assert!(decoded.network_adaptor_found);
        assert_eq!(decoded.time_millis, CDate(1.3e9).to_millis(0));
    }

    #[test]
    fn test_other_records_skipped() {
        let mut buf = Vec::new();
        generic(1, 2, 5).encode(&mut buf);
        buf.extend_from_slice(&[9; 5]);
        generic(7, 2, 3).encode(&mut buf);
        buf.extend_from_slice(&[9; 3]);
        buf.extend_from_slice(&[0xDE, 0xDE]);

        let mut src = source(buf);
        assert_eq!(
            read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap(),
            Some(RecordKind::Other { data_type: 1, position: 0 })
        );
        assert_eq!(
            read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap(),
            Some(RecordKind::Other { data_type: 7, position: 26 })
        );
        assert_eq!(read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap(), None);
    }

    #[test]
    fn test_truncated_record_ends_stream() {
        let mut bytes = image_bytes(LEADING_GUARD, TRAILING_GUARD, 0.0);
        bytes.truncate(40);
        let mut src = source(bytes);
        assert_eq!(read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap(), None);
    }

    #[test]
    fn test_negative_geometry() {
        let mut bytes = image_bytes(LEADING_GUARD, TRAILING_GUARD, 0.0);
        // end_bearing below start_bearing
        bytes[21 + 20..21 + 24].copy_from_slice(&(-4i32).to_le_bytes());
        let mut src = source(bytes);
        let err = read_record(&mut src, DecodeDepth::Descriptor, 0).unwrap_err();
        assert_eq!(err.corruption_kind(), Some(CorruptionKind::Geometry));
    }

    #[test]
    fn test_oversized_range_count_is_geometry_error() {
        let mut bytes = image_bytes(LEADING_GUARD, TRAILING_GUARD, 0.0);
        // end_range pushed to i32::MAX with a 4 byte payload
        bytes[21 + 10..21 + 14].copy_from_slice(&i32::MAX.to_le_bytes());
        for depth in [DecodeDepth::Descriptor, DecodeDepth::Full] {
            let mut src = source(bytes.clone());
            let err = read_record(&mut src, depth, 0).unwrap_err();
            assert_eq!(err.corruption_kind(), Some(CorruptionKind::Geometry));
        }
    }

    #[test]
    fn test_oversized_data_size_reads_as_truncation() {
        let mut bytes = image_bytes(LEADING_GUARD, TRAILING_GUARD, 0.0);
        bytes[21 + 24..21 + 28].copy_from_slice(&i32::MAX.to_le_bytes());
        let mut src = source(bytes);
        assert_eq!(read_record(&mut src, DecodeDepth::Full, 0).unwrap(), None);
    }
}
