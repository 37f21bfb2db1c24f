// src/record/aris.rs
use crate::error::{Result, SonarError};
use crate::record::payload::{read_stored, ImageGeometry, ImagePayload};
use crate::record::{skip_exact, DecodeDepth, DecodedImage, RecordSource};
use crate::types::micros_to_millis;
use crate::utils::{is_eof, read_exact_or_eof, LeSlice};
use bytes::{BufMut, Bytes};
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Size of both the file header and each frame header.
pub const HEADER_SIZE: usize = 1024;

/// Fields of the ARIS file header needed to walk frames.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArisFileHeader {
    pub version: u32,
    pub frame_count: u32,
    pub frame_rate: u32,
    pub high_resolution: u32,
    pub num_raw_beams: u32,
    pub serial_number: u32,
}

impl ArisFileHeader {
    pub fn read<S: RecordSource + ?Sized>(source: &mut S) -> Result<Self> {
        let mut buf = vec![0u8; HEADER_SIZE];
        source.read_exact(&mut buf)?;
        let view = LeSlice::new(&buf);
        Ok(ArisFileHeader {
            version: view.u32_at(0),
            frame_count: view.u32_at(4),
            frame_rate: view.u32_at(8),
            high_resolution: view.u32_at(12),
            num_raw_beams: view.u32_at(16),
            serial_number: view.u32_at(44),
        })
    }

    /// Write a full 1024-byte header with unused fields zeroed.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut block = [0u8; HEADER_SIZE];
        block[0..4].copy_from_slice(&self.version.to_le_bytes());
        block[4..8].copy_from_slice(&self.frame_count.to_le_bytes());
        block[8..12].copy_from_slice(&self.frame_rate.to_le_bytes());
        block[12..16].copy_from_slice(&self.high_resolution.to_le_bytes());
        block[16..20].copy_from_slice(&self.num_raw_beams.to_le_bytes());
        block[44..48].copy_from_slice(&self.serial_number.to_le_bytes());
        buf.put_slice(&block);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ArisFrameHeader {
    pub frame_index: i32,
    /// Microseconds since 1970-01-01 UTC.
    pub frame_time: u64,
    /// Metres from the transducer to the first sample.
    pub window_start: f32,
    pub window_length: f32,
    pub sound_speed: f32,
    pub samples_per_beam: i32,
}

impl ArisFrameHeader {
    pub fn from_bytes(buf: &[u8]) -> Self {
        let view = LeSlice::new(buf);
        ArisFrameHeader {
            frame_index: view.i32_at(0),
            frame_time: view.u64_at(4),
            window_start: view.f32_at(52),
            window_length: view.f32_at(56),
            sound_speed: view.f32_at(464),
            samples_per_beam: view.i32_at(468),
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut block = [0u8; HEADER_SIZE];
        block[0..4].copy_from_slice(&self.frame_index.to_le_bytes());
        block[4..12].copy_from_slice(&self.frame_time.to_le_bytes());
        block[52..56].copy_from_slice(&self.window_start.to_le_bytes());
        block[56..60].copy_from_slice(&self.window_length.to_le_bytes());
        block[464..468].copy_from_slice(&self.sound_speed.to_le_bytes());
        block[468..472].copy_from_slice(&self.samples_per_beam.to_le_bytes());
        buf.put_slice(&block);
    }

    /// Range samples between the transducer and the start of the window.
    pub fn extra_ranges(&self) -> u32 {
        if self.window_length <= 0.0 {
            return 0;
        }
        let per_metre = self.samples_per_beam as f64 / self.window_length as f64;
        (self.window_start as f64 * per_metre).max(0.0) as u32
    }
}

/// Read one frame. Returns `Ok(None)` at end of file, including a frame cut
/// short by truncation.
pub fn read_frame<S: RecordSource + ?Sized>(
    source: &mut S,
    file_header: &ArisFileHeader,
    depth: DecodeDepth,
) -> Result<Option<DecodedImage>> {
    let position = source.position();
    let mut buf = vec![0u8; HEADER_SIZE];
    match read_exact_or_eof(source, &mut buf) {
        Ok(true) => {}
        Ok(false) => return Ok(None),
        Err(e) if is_eof(&e) => {
            warn!("ARIS frame header at {} truncated", position);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }
    let frame = ArisFrameHeader::from_bytes(&buf);
    let samples = frame.samples_per_beam.max(0) as u32;
    let data_size = samples as u64 * file_header.num_raw_beams as u64;

    let payload = match depth {
        DecodeDepth::Full => {
            let data = match read_stored(source, data_size) {
                Ok(data) => data,
                Err(e) if is_eof(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            Some(ImagePayload {
                amplitudes: Bytes::from(data),
                bearing_table: Vec::new(),
            })
        }
        DecodeDepth::Descriptor => match skip_exact(source, data_size) {
            Ok(()) => None,
            Err(SonarError::Io(e)) if is_eof(&e) => {
                warn!("ARIS frame at {} truncated", position);
                return Ok(None);
            }
            Err(e) => return Err(e),
        },
    };

    Ok(Some(DecodedImage {
        position,
        time_millis: micros_to_millis(frame.frame_time),
        device_id: file_header.serial_number,
        geometry: ImageGeometry {
            n_bearings: file_header.num_raw_beams,
            n_ranges: samples,
            first_range: frame.extra_ranges(),
            bytes_per_sample: 1,
            sound_speed: frame.sound_speed as f64,
        },
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PlainSource;
    use std::io::Cursor;

    fn file_header() -> ArisFileHeader {
        ArisFileHeader {
            version: 0x05464444,
            frame_count: 2,
            frame_rate: 10,
            high_resolution: 1,
            num_raw_beams: 4,
            serial_number: 1234,
        }
    }

    fn frame(index: i32, micros: u64) -> ArisFrameHeader {
        ArisFrameHeader {
            frame_index: index,
            frame_time: micros,
            window_start: 1.0,
            window_length: 2.0,
            sound_speed: 1475.0,
            samples_per_beam: 8,
        }
    }

    fn archive() -> Vec<u8> {
        let mut buf = Vec::new();
        file_header().encode(&mut buf);
        for (i, t) in [(0, 1_700_000_000_000_000u64), (1, 1_700_000_000_100_000)] {
            frame(i, t).encode(&mut buf);
            buf.extend((0..32).map(|b| b as u8 + i as u8));
        }
        buf
    }

    #[test]
    fn test_headers() {
        let mut src = PlainSource::new(Cursor::new(archive())).unwrap();
        assert_eq!(ArisFileHeader::read(&mut src).unwrap(), file_header());
        assert_eq!(frame(0, 0).extra_ranges(), 4);
    }

    #[test]
    fn test_frames() {
        let mut src = PlainSource::new(Cursor::new(archive())).unwrap();
        let header = ArisFileHeader::read(&mut src).unwrap();

        let first = read_frame(&mut src, &header, DecodeDepth::Descriptor).unwrap().unwrap();
        assert_eq!(first.position, 1024);
        assert_eq!(first.time_millis, 1_700_000_000_000);
        assert_eq!(first.device_id, 1234);
        assert_eq!(first.geometry.grid_len(), 32);
        assert_eq!(first.geometry.first_range, 4);

        let second = read_frame(&mut src, &header, DecodeDepth::Descriptor).unwrap().unwrap();
        assert_eq!(second.position, 1024 * 2 + 32);
        assert!(read_frame(&mut src, &header, DecodeDepth::Descriptor).unwrap().is_none());

        src.seek_to(second.position).unwrap();
        let full = read_frame(&mut src, &header, DecodeDepth::Full).unwrap().unwrap();
        let payload = full.payload.unwrap();
        assert_eq!(payload.amplitudes[0], 1);
        assert_eq!(payload.amplitudes.len(), 32);
    }

    #[test]
    fn test_truncated_frame_ends_scan() {
        let mut bytes = archive();
        bytes.truncate(bytes.len() - 5);
        let mut src = PlainSource::new(Cursor::new(bytes)).unwrap();
        let header = ArisFileHeader::read(&mut src).unwrap();
        assert!(read_frame(&mut src, &header, DecodeDepth::Descriptor).unwrap().is_some());
        assert!(read_frame(&mut src, &header, DecodeDepth::Descriptor).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_reads_as_truncation() {
        let mut buf = Vec::new();
        file_header().encode(&mut buf);
        ArisFrameHeader {
            samples_per_beam: i32::MAX,
            ..frame(0, 1_700_000_000_000_000)
        }
        .encode(&mut buf);
        buf.extend_from_slice(&[3; 32]);

        let mut src = PlainSource::new(Cursor::new(buf)).unwrap();
        let header = ArisFileHeader::read(&mut src).unwrap();
        assert!(read_frame(&mut src, &header, DecodeDepth::Full).unwrap().is_none());
    }
}
