// src/record/header.rs
use crate::error::Result;
use crate::record::RecordSource;
use crate::types::CDate;
use crate::utils::{is_eof, read_exact_or_eof, LeSlice};
use bytes::BufMut;
use log::warn;

/// The 21-byte header that prefixes every record in a GLF data stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenericHeader {
    pub id: u8,
    pub version: u8,
    /// Declared body length. Reliable only for non-image records.
    pub length: i32,
    pub timestamp: CDate,
    pub data_type: u8,
    pub device_id: u16,
    pub node_id: u16,
    pub spare: i16,
}

/// Outcome of reading a generic header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaderRead {
    Header(GenericHeader),
    /// End sentinel or end of stream. Not an error.
    EndOfData,
}

impl GenericHeader {
    pub const SIZE: usize = 21;
    /// Expected value of the id byte (`'*'`).
    pub const ID: u8 = 42;
    /// Value of both id and version bytes in the end-of-data sentinel.
    pub const END_SENTINEL: u8 = 0xDE;

    pub const TYPE_IMAGE: u8 = 0;
    pub const TYPE_V4: u8 = 1;
    pub const TYPE_STATUS: u8 = 3;

    /// Read the next header.
    ///
    /// The `0xDE 0xDE` sentinel, a clean end of stream, and a stream that
    /// ends part way through a header all yield [`HeaderRead::EndOfData`].
    /// An id byte other than `'*'` is logged and the header is still returned.
    pub fn read<S: RecordSource + ?Sized>(source: &mut S) -> Result<HeaderRead> {
        let position = source.position();
        let mut buf = [0u8; Self::SIZE];

        match read_exact_or_eof(source, &mut buf[..2]) {
            Ok(true) => {}
            Ok(false) => return Ok(HeaderRead::EndOfData),
            Err(e) if is_eof(&e) => return Ok(HeaderRead::EndOfData),
            Err(e) => return Err(e.into()),
        }
        if buf[0] == Self::END_SENTINEL && buf[1] == Self::END_SENTINEL {
            return Ok(HeaderRead::EndOfData);
        }
        match read_exact_or_eof(source, &mut buf[2..]) {
            Ok(true) => {}
            Ok(false) => return Ok(HeaderRead::EndOfData),
            Err(e) if is_eof(&e) => return Ok(HeaderRead::EndOfData),
            Err(e) => return Err(e.into()),
        }

        let header = Self::from_bytes(&buf);
        if header.id != Self::ID {
            warn!("bad header id byte {} at position {}", header.id, position);
        }
        Ok(HeaderRead::Header(header))
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let view = LeSlice::new(bytes);
        GenericHeader {
            id: view.u8_at(0),
            version: view.u8_at(1),
            length: view.i32_at(2),
            timestamp: CDate(view.f64_at(6)),
            data_type: view.u8_at(14),
            device_id: view.u16_at(15),
            node_id: view.u16_at(17),
            spare: view.i16_at(19),
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.id);
        buf.put_u8(self.version);
        buf.put_i32_le(self.length);
        buf.put_f64_le(self.timestamp.0);
        buf.put_u8(self.data_type);
        buf.put_u16_le(self.device_id);
        buf.put_u16_le(self.node_id);
        buf.put_i16_le(self.spare);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PlainSource;
    use std::io::Cursor;

    fn header(data_type: u8, device_id: u16) -> GenericHeader {
        GenericHeader {
            id: GenericHeader::ID,
            version: 2,
            length: 168,
            timestamp: CDate(1.4e9),
            data_type,
            device_id,
            node_id: 100,
            spare: 0,
        }
    }

    #[test]
    fn test_header_layout() {
        let mut buf = Vec::new();
        header(GenericHeader::TYPE_STATUS, 851).encode(&mut buf);
        assert_eq!(buf.len(), GenericHeader::SIZE);
        assert_eq!(buf[14], 3);
        assert_eq!(u16::from_le_bytes([buf[15], buf[16]]), 851);

        let mut source = PlainSource::new(Cursor::new(buf)).unwrap();
        match GenericHeader::read(&mut source).unwrap() {
            HeaderRead::Header(h) => assert_eq!(h, header(3, 851)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(source.position(), 21);
    }

    #[test]
    fn test_end_conditions() {
        let mut empty = PlainSource::new(Cursor::new(Vec::new())).unwrap();
        assert_eq!(GenericHeader::read(&mut empty).unwrap(), HeaderRead::EndOfData);

        let mut sentinel = PlainSource::new(Cursor::new(vec![0xDE, 0xDE, 1, 2, 3])).unwrap();
        assert_eq!(GenericHeader::read(&mut sentinel).unwrap(), HeaderRead::EndOfData);

        let mut partial = Vec::new();
        header(0, 1).encode(&mut partial);
        partial.truncate(12);
        let mut partial = PlainSource::new(Cursor::new(partial)).unwrap();
        assert_eq!(GenericHeader::read(&mut partial).unwrap(), HeaderRead::EndOfData);
    }

    #[test]
    fn test_bad_id_still_decodes() {
        let mut h = header(0, 4);
        h.id = 7;
        let mut buf = Vec::new();
        h.encode(&mut buf);
        let mut source = PlainSource::new(Cursor::new(buf)).unwrap();
        assert!(matches!(
            GenericHeader::read(&mut source).unwrap(),
            HeaderRead::Header(GenericHeader { id: 7, .. })
        ));
    }
}
