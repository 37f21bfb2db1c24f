// src/catalog/mod.rs
//! Per-file and multi-file catalogs of image records.
//!
//! - [`SingleFileCatalog`] - one archive's time-ordered record index, persisted as `<archive>x`
//! - [`MultiFileCatalog`] - many catalogs merged into one timeline and per-device record space
//! - [`CatalogCheck`] - pre-builds missing sidecars for a batch of files
//! - [`AsyncCatalogStream`] - `stream_catalog` driven from a tokio runtime (feature `async`)

#[cfg(feature = "async")]
mod async_catalog;
mod check;
mod descriptor;
mod device;
mod multi;
mod observer;
mod single;
mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "async")]
pub use async_catalog::AsyncCatalogStream;
pub use check::{CatalogCheck, CheckOutcome};
pub use descriptor::{CatalogRecord, RecordDescriptor};
pub use device::CatalogDeviceInfo;
pub use multi::{FileError, MultiFileCatalog, MultiRecordRef};
pub use observer::{
    CatalogBuildStats, CatalogEvent, CatalogObserver, CatalogProgress, CatalogState, CatalogStreamObserver,
    CatalogStreamSummary, ChannelCatalogObserver, ChannelStreamObserver, EndReason, StreamEvent, StreamedImage,
};
pub use single::SingleFileCatalog;
pub use source::DataSource;

/// Cooperative cancellation flag shared between a scanning thread and its controller.
///
/// The scan polls the flag once per record, so a relaxed load is enough.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        StopHandle::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
