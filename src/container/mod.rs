// src/container/mod.rs
//! The chunked pseudo-zip container used by GLF archives.
//!
//! A GLF file is laid out like a zip archive with three entries (`.cfg`,
//! `.dat`, `.xml`). Each entry's bytes are split into chunks, each preceded
//! by a 5-byte header. This module provides:
//!
//! - [`ChunkedContainerScanner`] - one-pass structural scan producing a [`FastIndex`]
//! - [`FastIndex`] - the persisted chunk table (`<archive>.ind`)
//! - [`VirtualChunkStream`] - seekable reads of the data entry, one chunk resident
//! - [`EntryInflater`] - sequential DEFLATE fallback when no index can be built
//!
//! # Example
//!
//! ```no_run
//! use sonar_archive::container::{FastIndex, VirtualChunkStream};
//! use sonar_archive::config::CatalogConfig;
//! use std::path::Path;
//!
//! let config = CatalogConfig::default();
//! let path = Path::new("log_2024-05-01-120000.glf");
//! let index = FastIndex::load_or_build(path, &config).unwrap();
//! println!("{} chunks, {} bytes", index.chunk_count(), index.data_len());
//!
//! let stream = VirtualChunkStream::with_index(path, index, config.buffer_capacity).unwrap();
//! assert_eq!(stream.position(), 0);
//! ```

mod header;
mod index;
mod inflate;
mod scanner;
mod stream;

use std::io::{Read, Seek};

pub use header::{signature, ChunkHeader, EntryKind, LocalFileHeader};
pub use index::{ChunkDescriptor, ContainerEntry, FastIndex};
pub use inflate::{extract_entry, locate_entry, EntryInflater, EntryLocation};
pub use scanner::ChunkedContainerScanner;
pub use stream::{StreamMetrics, VirtualChunkStream};

/// Trait alias for Read + Seek
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}
