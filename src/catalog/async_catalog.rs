// src/catalog/async_catalog.rs
use crate::catalog::observer::{CatalogStreamObserver, CatalogStreamSummary, StreamEvent, StreamedImage};
use crate::catalog::single::SingleFileCatalog;
use crate::catalog::StopHandle;
use crate::config::CatalogConfig;
use crate::error::{Result, SonarError};
use crate::record::StatusRecord;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task;

type StreamTask = task::JoinHandle<Result<(SingleFileCatalog, CatalogStreamSummary)>>;

/// Forwards records from the blocking scan into a tokio channel.
struct TokioStreamObserver {
    sender: mpsc::Sender<StreamEvent>,
}

impl CatalogStreamObserver for TokioStreamObserver {
    fn on_image_record(&mut self, record: StreamedImage) -> bool {
        self.sender.blocking_send(StreamEvent::Image(record)).is_ok()
    }

    fn on_status_record(&mut self, status: StatusRecord) -> bool {
        self.sender.blocking_send(StreamEvent::Status(status)).is_ok()
    }
}

/// [`SingleFileCatalog::stream_catalog`] on a blocking worker, with records
/// received asynchronously.
///
/// ```no_run
/// # async fn run() -> sonar_archive::Result<()> {
/// use sonar_archive::catalog::{AsyncCatalogStream, StreamEvent};
/// use sonar_archive::config::CatalogConfig;
///
/// let mut stream = AsyncCatalogStream::open("survey.ecd", CatalogConfig::default(), 16)?;
/// while let Some(event) = stream.next().await {
///     if let StreamEvent::Image(image) = event {
///         println!("{} at {}", image.descriptor.device_id, image.descriptor.timestamp_utc_millis);
///     }
/// }
/// let (catalog, summary) = stream.finish().await?;
/// println!("{} records, ended by {:?}", catalog.record_count(), summary.end_reason);
/// # Ok(())
/// # }
/// ```
pub struct AsyncCatalogStream {
    receiver: mpsc::Receiver<StreamEvent>,
    stop: StopHandle,
    handle: Arc<Mutex<Option<StreamTask>>>,
}

impl AsyncCatalogStream {
    /// Start streaming a fresh catalog of `path`. Must be called within a tokio runtime.
    pub fn open(path: impl AsRef<Path>, config: CatalogConfig, capacity: usize) -> Result<Self> {
        let catalog = SingleFileCatalog::new(path, config)?;
        Ok(Self::spawn(catalog, capacity))
    }

    /// Start streaming `catalog`. At most `capacity` records wait in the
    /// channel before the scan blocks.
    pub fn spawn(mut catalog: SingleFileCatalog, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stop = catalog.stop_handle();
        let handle = task::spawn_blocking(move || {
            let mut observer = TokioStreamObserver { sender };
            let summary = catalog.stream_catalog(&mut observer)?;
            Ok((catalog, summary))
        });

        AsyncCatalogStream {
            receiver,
            stop,
            handle: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// The next record, or `None` once the scan has ended.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Stop the scan after the record in progress. A stop issued before the
    /// worker starts ends the scan before its first record.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the scan to end and return the catalog it built. Records not
    /// yet received are discarded.
    pub async fn finish(mut self) -> Result<(SingleFileCatalog, CatalogStreamSummary)> {
        while self.receiver.recv().await.is_some() {}

        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.await.map_err(|e| SonarError::TaskFailed(e.to_string()))?,
            None => Err(SonarError::TaskFailed("stream already finished".into())),
        }
    }
}
