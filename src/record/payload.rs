// src/record/payload.rs
use crate::error::{Result, SonarError};
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::time::Duration;

/// Largest decoded amplitude grid accepted from a record header, in bytes.
pub const MAX_GRID_LEN: usize = 256 << 20;

/// Size and acquisition parameters of one image, known without decoding
/// the amplitude grid.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageGeometry {
    pub n_bearings: u32,
    pub n_ranges: u32,
    /// Index of the first stored range sample.
    pub first_range: u32,
    pub bytes_per_sample: u8,
    /// Speed of sound in m/s used for beamforming.
    pub sound_speed: f64,
}

impl ImageGeometry {
    /// Byte length of the decoded amplitude grid.
    pub fn grid_len(&self) -> usize {
        self.n_bearings as usize * self.n_ranges as usize * self.bytes_per_sample.max(1) as usize
    }

    /// [`grid_len`](Self::grid_len) for geometry read from an untrusted
    /// header. `None` on overflow or above [`MAX_GRID_LEN`].
    pub fn checked_grid_len(&self) -> Option<usize> {
        (self.n_bearings as usize)
            .checked_mul(self.n_ranges as usize)?
            .checked_mul(self.bytes_per_sample.max(1) as usize)
            .filter(|&len| len <= MAX_GRID_LEN)
    }
}

/// Decoded amplitude grid and bearing table of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    /// Row-major by range, one row of `n_bearings` samples per range.
    pub amplitudes: Bytes,
    /// Beam angles in radians; empty when the format does not store them.
    pub bearing_table: Vec<f64>,
}

/// A fully loaded image: geometry, payload and how long the decode took.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedImage {
    pub geometry: ImageGeometry,
    pub payload: ImagePayload,
    pub load_time: Duration,
}

impl LoadedImage {
    pub fn amplitudes(&self) -> &[u8] {
        &self.payload.amplitudes
    }
}

/// Inflate a zlib-wrapped payload that should expand to exactly `expected` bytes.
pub fn inflate_zlib(compressed: &[u8], expected: usize) -> Result<Bytes> {
    let mut out = Vec::new();
    ZlibDecoder::new(compressed)
        .take(expected as u64)
        .read_to_end(&mut out)
        .map_err(|e| SonarError::Decompression(e.to_string()))?;
    if out.len() != expected {
        return Err(SonarError::Decompression(format!(
            "inflated {} bytes, expected {}",
            out.len(),
            expected
        )));
    }
    Ok(Bytes::from(out))
}

/// Read exactly `len` stored payload bytes.
///
/// The buffer grows with the bytes actually read, so a length field larger
/// than the data behind it fails with `UnexpectedEof` instead of allocating
/// the claimed size up front.
pub fn read_stored<R: Read + ?Sized>(reader: &mut R, len: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    (&mut *reader).take(len).read_to_end(&mut out)?;
    if (out.len() as u64) < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("payload truncated: read {} of {} bytes", out.len(), len),
        ));
    }
    Ok(out)
}

/// Expand the zero-run encoding used by ECD image payloads.
///
/// A `0` byte followed by a count `n` expands to `n` zeros, a `1` byte
/// expands to a single zero, and any other byte is a literal sample. A lone
/// `0` in the final position is kept as a literal. Output stops at
/// `capacity` bytes and any shortfall is left zero.
pub fn rle_decode(encoded: &[u8], capacity: usize) -> Bytes {
    let mut out = vec![0u8; capacity];
    let mut i = 0usize;
    let mut o = 0usize;
    while i < encoded.len() && o < capacity {
        match encoded[i] {
            0 if i + 1 < encoded.len() => {
                let run = encoded[i + 1] as usize;
                i += 2;
                o = (o + run).min(capacity);
            }
            1 => {
                i += 1;
                o += 1;
            }
            literal => {
                out[o] = literal;
                i += 1;
                o += 1;
            }
        }
    }
    Bytes::from(out)
}

/// Read `count` little-endian f64 values in one pass.
pub fn read_f64_table<R: Read + ?Sized>(reader: &mut R, count: usize) -> Result<Vec<f64>> {
    let mut bytes = vec![0u8; count * 8];
    reader.read_exact(&mut bytes)?;
    let mut table = vec![0f64; count];
    LittleEndian::read_f64_into(&bytes, &mut table);
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use proptest::prelude::*;
    use std::io::Write;

    #[test]
    fn test_rle_runs_and_literals() {
        let encoded = [5u8, 0, 3, 7, 1, 9];
        let decoded = rle_decode(&encoded, 8);
        assert_eq!(&decoded[..], &[5, 0, 0, 0, 7, 0, 9, 0]);
    }

    #[test]
    fn test_rle_trailing_zero_is_literal() {
        let decoded = rle_decode(&[4, 0], 3);
        assert_eq!(&decoded[..], &[4, 0, 0]);
    }

    #[test]
    fn test_rle_truncates_at_capacity() {
        let decoded = rle_decode(&[0, 200, 8, 8], 4);
        assert_eq!(decoded.len(), 4);
        assert!(decoded.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zlib_payload() {
        let grid: Vec<u8> = (0..600).map(|i| (i % 17) as u8).collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&grid).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(&inflate_zlib(&compressed, 600).unwrap()[..], &grid[..]);
        assert!(matches!(inflate_zlib(&compressed, 700), Err(SonarError::Decompression(_))));
        assert!(inflate_zlib(b"not zlib", 10).is_err());
    }

    #[test]
    fn test_checked_grid_len() {
        let geometry = ImageGeometry {
            n_bearings: 512,
            n_ranges: 1500,
            bytes_per_sample: 2,
            ..Default::default()
        };
        assert_eq!(geometry.checked_grid_len(), Some(512 * 1500 * 2));

        let huge = ImageGeometry {
            n_bearings: u32::MAX,
            n_ranges: u32::MAX,
            bytes_per_sample: 255,
            ..Default::default()
        };
        assert_eq!(huge.checked_grid_len(), None);
        let large = ImageGeometry {
            n_bearings: 4096,
            n_ranges: i32::MAX as u32,
            ..Default::default()
        };
        assert_eq!(large.checked_grid_len(), None);
    }

    #[test]
    fn test_read_stored_stops_at_data_end() {
        let data = [1u8, 2, 3, 4, 5];
        assert_eq!(read_stored(&mut &data[..], 3).unwrap(), vec![1, 2, 3]);

        let err = read_stored(&mut &data[..], i32::MAX as u64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_f64_table() {
        let mut bytes = Vec::new();
        for v in [0.5f64, -1.25, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let table = read_f64_table(&mut &bytes[..], 3).unwrap();
        assert_eq!(table, vec![0.5, -1.25, 3.0]);
    }

    proptest! {
        #[test]
        fn prop_rle_output_has_capacity(encoded in proptest::collection::vec(any::<u8>(), 0..512), cap in 0usize..2048) {
            let decoded = rle_decode(&encoded, cap);
            prop_assert_eq!(decoded.len(), cap);
        }

        #[test]
        fn prop_rle_literals_pass_through(samples in proptest::collection::vec(2u8..=255, 0..256)) {
            let decoded = rle_decode(&samples, samples.len());
            prop_assert_eq!(&decoded[..], &samples[..]);
        }
    }
}
