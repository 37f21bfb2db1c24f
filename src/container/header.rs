// src/container/header.rs
use crate::error::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::{Read, Write};

/// Zip record signatures that appear in the container.
pub mod signature {
    pub const LOCAL_FILE: u32 = 0x0403_4b50;
    pub const CENTRAL_DIRECTORY: u32 = 0x0201_4b50;
    pub const DATA_DESCRIPTOR: u32 = 0x0807_4b50;
    pub const END_OF_CENTRAL_DIRECTORY: u32 = 0x0605_4b50;
}

/// The logical entries a sonar archive carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Config,
    Data,
    Metadata,
}

impl EntryKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".cfg") {
            Some(EntryKind::Config)
        } else if lower.ends_with(".dat") {
            Some(EntryKind::Data)
        } else if lower.ends_with(".xml") {
            Some(EntryKind::Metadata)
        } else {
            None
        }
    }
}

/// Fields of a zip local file header, excluding the signature.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFileHeader {
    pub version: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    /// Name bytes as stored. Zip names are often CP437 rather than UTF-8.
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Bytes between the signature and the variable-length name.
    pub const FIXED_SIZE: u64 = 26;
    pub const METHOD_DEFLATE: u16 = 8;
    pub const ZIP_VERSION: u16 = 20;

    /// Read the header that follows an already-consumed signature.
    pub fn read_after_signature<R: Read>(reader: &mut R) -> Result<Self> {
        let version = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let method = reader.read_u16::<LittleEndian>()?;
        let mod_time = reader.read_u16::<LittleEndian>()?;
        let mod_date = reader.read_u16::<LittleEndian>()?;
        let crc32 = reader.read_u32::<LittleEndian>()?;
        let compressed_size = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size = reader.read_u32::<LittleEndian>()?;
        let name_len = reader.read_u16::<LittleEndian>()? as usize;
        let extra_len = reader.read_u16::<LittleEndian>()? as usize;

        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        reader.read_exact(&mut extra)?;

        Ok(LocalFileHeader {
            version,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }

    /// Write the header including its signature.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(signature::LOCAL_FILE)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.mod_time)?;
        writer.write_u16::<LittleEndian>(self.mod_date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.name.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.extra)?;
        Ok(())
    }

    /// Total on-disk size including the signature.
    pub fn encoded_len(&self) -> u64 {
        4 + Self::FIXED_SIZE + self.name.len() as u64 + self.extra.len() as u64
    }

    /// The name for display and matching. Invalid UTF-8 is replaced, so
    /// never derive lengths from this.
    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    pub fn kind(&self) -> Option<EntryKind> {
        EntryKind::from_name(&self.display_name())
    }
}

/// The 5-byte header in front of every chunk. It has the layout of a
/// DEFLATE stored-block header: flags carry BFINAL in bit 0 and BTYPE in
/// bits 1-2, and `spare` is the one's complement of `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub flags: u8,
    pub length: u16,
    pub spare: u16,
}

impl ChunkHeader {
    pub const SIZE: u64 = 5;
    pub const TERMINAL: u8 = 0x01;
    pub const SCHEME_MASK: u8 = 0x06;
    /// Largest payload the archive writer places in one chunk.
    pub const MAX_WRITE_LENGTH: usize = 65531;

    pub fn stored(length: u16, terminal: bool) -> Self {
        ChunkHeader {
            flags: if terminal { Self::TERMINAL } else { 0 },
            length,
            spare: !length,
        }
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let flags = reader.read_u8()?;
        let length = reader.read_u16::<LittleEndian>()?;
        let spare = reader.read_u16::<LittleEndian>()?;
        Ok(ChunkHeader { flags, length, spare })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.flags)?;
        writer.write_u16::<LittleEndian>(self.length)?;
        writer.write_u16::<LittleEndian>(self.spare)?;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.flags & Self::TERMINAL != 0
    }

    pub fn scheme(&self) -> u8 {
        (self.flags & Self::SCHEME_MASK) >> 1
    }

    pub fn is_raw(&self) -> bool {
        self.scheme() == 0
    }
}
