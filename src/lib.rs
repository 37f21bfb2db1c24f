// src/lib.rs
//! # sonar-archive
//!
//! Indexing and random-access streaming for multibeam sonar archives: the
//! chunked GLF container, bare GLF `.dat` record streams, flat ECD files and
//! fixed-header ARIS files.
//!
//! ## Features
//!
//! - **Bounded memory**: one container chunk resident at a time, whatever the file size
//! - **Cheap seeks**: skipping into a container costs chunk hops, not bytes copied
//! - **Persisted caches**: fast indexes and catalogs are written beside the archive and reused
//! - **Corruption tolerant**: damaged records are dropped and the scan carries on
//! - **Multi-file timelines**: many files and sonars merged into one record space
//! - **Async streaming**: catalog streams delivered to tokio tasks (feature `async`)
//!
//! ## Quick Start
//!
//! ### Cataloguing one file
//!
//! ```rust,no_run
//! use sonar_archive::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let catalog = SingleFileCatalog::open("log_2024-05-01-120000.glf", CatalogConfig::default())?;
//!     println!("{} images from sonars {:?}", catalog.record_count(), catalog.device_ids());
//!
//!     let image = catalog.get_full_record(0)?;
//!     println!("{} beams x {} ranges", image.geometry.n_bearings, image.geometry.n_ranges);
//!     Ok(())
//! }
//! ```
//!
//! ### Merging a session
//!
//! ```rust,no_run
//! use sonar_archive::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let mut multi = MultiFileCatalog::new(CatalogConfig::default());
//!     multi.catalog_files(&["a.glf", "b.glf", "c.glf"]);
//!     for failed in multi.file_errors() {
//!         eprintln!("skipped {}: {}", failed.path.display(), failed.error);
//!     }
//!
//!     if let Some(i) = multi.find_record_for_time(801, 1_714_564_800_000)? {
//!         let record = multi.get_record(i, true)?;
//!         println!("closest ping at {}", record.time());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Streaming while cataloguing
//!
//! ```rust,no_run
//! use sonar_archive::prelude::*;
//! use sonar_archive::catalog::{ChannelStreamObserver, StreamEvent};
//!
//! fn main() -> Result<()> {
//!     let mut catalog = SingleFileCatalog::new("survey.ecd", CatalogConfig::default())?;
//!     let (mut observer, events) = ChannelStreamObserver::bounded(8);
//!     let consumer = std::thread::spawn(move || {
//!         events.iter().filter(|e| matches!(e, StreamEvent::Image(_))).count()
//!     });
//!
//!     let summary = catalog.stream_catalog(&mut observer)?;
//!     drop(observer);
//!     println!("{:?}: {} images", summary.end_reason, consumer.join().unwrap_or(0));
//!     Ok(())
//! }
//! ```

// Modules
pub mod catalog;
pub mod config;
pub mod container;
pub mod error;
pub mod record;
pub mod types;
pub mod writer;

mod utils;

// Re-export commonly used types at the crate root for convenience
pub use error::{CorruptionKind, Result, SonarError};

pub use config::{CatalogConfig, RecoveryPolicy, ScanPolicy};

pub use types::{ArchiveFormat, CDate};

pub use container::{ChunkedContainerScanner, FastIndex, StreamMetrics, VirtualChunkStream};

pub use record::{DecodeDepth, ImageGeometry, LoadedImage, StatusRecord};

pub use catalog::{
    CatalogCheck, CatalogRecord, CatalogStreamObserver, CatalogStreamSummary, EndReason, MultiFileCatalog,
    RecordDescriptor, SingleFileCatalog, StopHandle,
};

#[cfg(feature = "async")]
pub use catalog::AsyncCatalogStream;

pub use writer::{GlfArchiveWriter, GlfRecordWriter};

// Prelude module for glob imports
pub mod prelude {
    //! Convenient imports for common use cases.
    //!
    //! ```rust
    //! use sonar_archive::prelude::*;
    //! ```

    pub use crate::catalog::{CatalogStreamObserver, EndReason, MultiFileCatalog, SingleFileCatalog, StreamedImage};
    pub use crate::config::CatalogConfig;
    pub use crate::error::{Result, SonarError};
    pub use crate::record::LoadedImage;
    pub use crate::types::ArchiveFormat;

    #[cfg(feature = "async")]
    pub use crate::catalog::AsyncCatalogStream;
}

/// The library version
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!LIBRARY_VERSION.is_empty());
    }

    #[test]
    fn test_root_reexports() {
        let config = CatalogConfig::default().with_recovery(RecoveryPolicy::Strict);
        assert_eq!(config.recovery, RecoveryPolicy::Strict);
        assert!(ArchiveFormat::Glf.is_container());
        assert!(SingleFileCatalog::new("a.glf", config).is_ok());
    }
}
