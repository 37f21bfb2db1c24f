// src/writer/mod.rs
//! Writers for the GLF record stream and its container.
//!
//! These produce files the rest of the crate reads: test fixtures, sample
//! sessions, and re-packed `.dat` streams.

mod archive;
mod record;

pub use archive::{stored_size, GlfArchiveWriter};
pub use record::{GlfImage, GlfRecordWriter};
