// src/utils/codec.rs
use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read};

/// Fixed-offset little-endian view over a header buffer.
///
/// Offsets are compile-time layout constants, so callers size the buffer
/// to the full header before constructing a view.
pub struct LeSlice<'a> {
    bytes: &'a [u8],
}

impl<'a> LeSlice<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        LeSlice { bytes }
    }

    pub fn u8_at(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    pub fn u16_at(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.bytes[offset..])
    }

    pub fn i16_at(&self, offset: usize) -> i16 {
        LittleEndian::read_i16(&self.bytes[offset..])
    }

    pub fn u32_at(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.bytes[offset..])
    }

    pub fn i32_at(&self, offset: usize) -> i32 {
        LittleEndian::read_i32(&self.bytes[offset..])
    }

    pub fn u64_at(&self, offset: usize) -> u64 {
        LittleEndian::read_u64(&self.bytes[offset..])
    }

    pub fn f32_at(&self, offset: usize) -> f32 {
        LittleEndian::read_f32(&self.bytes[offset..])
    }

    pub fn f64_at(&self, offset: usize) -> f64 {
        LittleEndian::read_f64(&self.bytes[offset..])
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Fill `buf` completely. Returns `Ok(false)` if the stream was already
/// exhausted before the first byte; a partial fill is `UnexpectedEof`.
pub fn read_exact_or_eof<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} bytes", filled, buf.len()),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Read and drop `n` bytes from a stream that cannot seek.
pub fn discard<R: Read + ?Sized>(reader: &mut R, n: u64) -> io::Result<u64> {
    io::copy(&mut reader.take(n), &mut io::sink())
}

/// Consume bytes until two consecutive `marker` bytes have been read.
/// Returns the number of bytes consumed, or `None` if the stream ended first.
pub fn skip_past_marker_pair<R: Read + ?Sized>(reader: &mut R, marker: u8) -> io::Result<Option<u64>> {
    let mut previous: Option<u8> = None;
    let mut consumed = 0u64;
    let mut byte = [0u8; 1];
    loop {
        if !read_exact_or_eof(reader, &mut byte)? {
            return Ok(None);
        }
        consumed += 1;
        if byte[0] == marker && previous == Some(marker) {
            return Ok(Some(consumed));
        }
        previous = Some(byte[0]);
    }
}

pub fn is_eof(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}
