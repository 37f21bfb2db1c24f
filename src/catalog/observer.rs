// src/catalog/observer.rs
//! Callbacks and summaries for streamed catalog builds and multi-file progress.

use crate::catalog::descriptor::RecordDescriptor;
use crate::catalog::single::SingleFileCatalog;
use crate::record::{LoadedImage, StatusRecord};
use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A fully decoded image handed to a stream observer.
#[derive(Debug, Clone)]
pub struct StreamedImage {
    pub descriptor: RecordDescriptor,
    pub image: Arc<LoadedImage>,
}

/// Receives records as [`SingleFileCatalog::stream_catalog`] decodes them.
///
/// Returning `false` from either callback ends the stream after the
/// current record.
pub trait CatalogStreamObserver {
    fn on_image_record(&mut self, record: StreamedImage) -> bool;

    fn on_status_record(&mut self, _status: StatusRecord) -> bool {
        true
    }
}

impl<T: CatalogStreamObserver + ?Sized> CatalogStreamObserver for &mut T {
    fn on_image_record(&mut self, record: StreamedImage) -> bool {
        (**self).on_image_record(record)
    }

    fn on_status_record(&mut self, status: StatusRecord) -> bool {
        (**self).on_status_record(status)
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Image(StreamedImage),
    Status(StatusRecord),
}

/// Forwards streamed records to another thread over a channel. The stream
/// stops once the receiving side is dropped.
pub struct ChannelStreamObserver {
    sender: Sender<StreamEvent>,
}

impl ChannelStreamObserver {
    pub fn new(sender: Sender<StreamEvent>) -> Self {
        ChannelStreamObserver { sender }
    }

    /// A bounded channel applies backpressure to the decoding thread.
    pub fn bounded(capacity: usize) -> (Self, Receiver<StreamEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (ChannelStreamObserver::new(tx), rx)
    }

    pub fn unbounded() -> (Self, Receiver<StreamEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (ChannelStreamObserver::new(tx), rx)
    }
}

impl CatalogStreamObserver for ChannelStreamObserver {
    fn on_image_record(&mut self, record: StreamedImage) -> bool {
        self.sender.send(StreamEvent::Image(record)).is_ok()
    }

    fn on_status_record(&mut self, status: StatusRecord) -> bool {
        self.sender.send(StreamEvent::Status(status)).is_ok()
    }
}

/// Why a catalog stream finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Stopped through the catalog's stop handle.
    ProcessStop,
    /// Reached the end of the file.
    FileEnd,
    /// A read or decode error ended the stream.
    ReadError,
    /// The observer asked to stop.
    DataGap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogStreamSummary {
    pub records_streamed: usize,
    pub first_record_time: Option<i64>,
    pub last_record_time: Option<i64>,
    pub end_reason: EndReason,
}

/// Counters from one catalog build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogBuildStats {
    pub records: usize,
    pub corrupt_skipped: usize,
    pub status_records: usize,
    pub other_records: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    Building,
    Complete,
    Cleared,
}

/// Progress notification from a multi-file catalog build.
pub struct CatalogProgress<'a> {
    pub state: CatalogState,
    pub total_files: usize,
    /// Index of the file just processed.
    pub current_file: usize,
    pub last_file: Option<&'a Path>,
    /// The catalog just added, when the file built successfully.
    pub catalog: Option<&'a SingleFileCatalog>,
}

pub trait CatalogObserver: Send {
    fn catalog_changed(&mut self, progress: &CatalogProgress<'_>);
}

/// Owned snapshot of a [`CatalogProgress`], suitable for sending across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEvent {
    pub state: CatalogState,
    pub total_files: usize,
    pub current_file: usize,
    pub last_file: Option<PathBuf>,
    pub records: usize,
    /// Per-device frame counts of the catalog just added.
    pub device_frames: Vec<(u32, usize)>,
}

impl CatalogEvent {
    pub fn from_progress(progress: &CatalogProgress<'_>) -> Self {
        let (records, device_frames) = match progress.catalog {
            Some(catalog) => (
                catalog.record_count(),
                catalog
                    .device_infos()
                    .map(|info| (info.device_id, info.frame_count))
                    .collect(),
            ),
            None => (0, Vec::new()),
        };
        CatalogEvent {
            state: progress.state,
            total_files: progress.total_files,
            current_file: progress.current_file,
            last_file: progress.last_file.map(Path::to_path_buf),
            records,
            device_frames,
        }
    }
}

/// Sends a [`CatalogEvent`] for every progress notification.
pub struct ChannelCatalogObserver {
    sender: Sender<CatalogEvent>,
}

impl ChannelCatalogObserver {
    pub fn unbounded() -> (Self, Receiver<CatalogEvent>) {
        let (sender, rx) = crossbeam_channel::unbounded();
        (ChannelCatalogObserver { sender }, rx)
    }
}

impl CatalogObserver for ChannelCatalogObserver {
    fn catalog_changed(&mut self, progress: &CatalogProgress<'_>) {
        // A dropped receiver just means nobody is watching any more.
        let _ = self.sender.send(CatalogEvent::from_progress(progress));
    }
}
