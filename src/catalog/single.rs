// src/catalog/single.rs
use crate::catalog::descriptor::{CatalogRecord, RecordDescriptor};
use crate::catalog::device::CatalogDeviceInfo;
use crate::catalog::observer::{CatalogBuildStats, CatalogStreamObserver, CatalogStreamSummary, EndReason, StreamedImage};
use crate::catalog::source::DataSource;
use crate::catalog::StopHandle;
use crate::config::{CatalogConfig, RecoveryPolicy};
use crate::container::StreamMetrics;
use crate::error::{CorruptionKind, Result, SonarError};
use crate::record::aris::{self, ArisFileHeader};
use crate::record::ecd::{self, EcdFileHeader, EcdItem, HALF_END_TAG};
use crate::record::{glf, DecodeDepth, DecodedImage, LoadedImage, RecordKind, RecordSource, StatusRecord};
use crate::types::ArchiveFormat;
use crate::utils::{read_sidecar, sidecar_path, skip_past_marker_pair, write_sidecar};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// On-disk form of a catalog.
#[derive(Serialize, Deserialize)]
struct PersistedCatalog {
    path: PathBuf,
    format: ArchiveFormat,
    archive_len: u64,
    utc_offset_millis: i64,
    records: Vec<RecordDescriptor>,
    devices: Vec<CatalogDeviceInfo>,
    aris_header: Option<ArisFileHeader>,
}

enum ScanItem {
    Image(DecodedImage),
    Status(StatusRecord),
    Other,
    Corrupt,
    End,
}

/// Records and device summaries accumulated during one scan.
#[derive(Default)]
struct CatalogBuilder {
    records: Vec<CatalogRecord>,
    devices: Vec<CatalogDeviceInfo>,
    stats: CatalogBuildStats,
}

impl CatalogBuilder {
    fn add(&mut self, image: &DecodedImage) -> RecordDescriptor {
        let ordinal = self.records.len() as u32;
        let slot = match self.devices.iter().position(|d| d.device_id == image.device_id) {
            Some(i) => i,
            None => {
                let device_index = self.devices.len() as u32 + 1;
                self.devices
                    .push(CatalogDeviceInfo::new(image.device_id, device_index, ordinal));
                self.devices.len() - 1
            }
        };
        self.devices[slot].add_frame();
        let descriptor = RecordDescriptor::detach(image, self.devices[slot].device_index, ordinal);
        self.records.push(CatalogRecord::new(descriptor));
        self.stats.records += 1;
        descriptor
    }
}

struct ScanOutcome {
    builder: CatalogBuilder,
    end: EndReason,
    error: Option<SonarError>,
}

/// Time-ordered index of the image records in one archive file.
///
/// A catalog is built once by scanning the file at descriptor depth, then
/// persisted beside the archive as `<archive>x` and reloaded on later opens.
/// Payloads are decoded on demand with [`get_full_record`](Self::get_full_record)
/// and can be released again with [`free_image_data`](Self::free_image_data).
///
/// # Example
///
/// ```no_run
/// use sonar_archive::catalog::SingleFileCatalog;
/// use sonar_archive::config::CatalogConfig;
///
/// let catalog = SingleFileCatalog::open("log_2024-05-01-120000.glf", CatalogConfig::default())?;
/// println!("{} records from {} sonars", catalog.record_count(), catalog.device_count());
///
/// if let Some(i) = catalog.find_record_index(1_714_564_800_000) {
///     let image = catalog.get_full_record(i)?;
///     println!("{} x {}", image.geometry.n_bearings, image.geometry.n_ranges);
/// }
/// # Ok::<(), sonar_archive::SonarError>(())
/// ```
pub struct SingleFileCatalog {
    path: PathBuf,
    format: ArchiveFormat,
    config: CatalogConfig,
    records: Vec<CatalogRecord>,
    devices: Vec<CatalogDeviceInfo>,
    aris_header: Option<ArisFileHeader>,
    stats: CatalogBuildStats,
    complete: bool,
    source: Mutex<Option<DataSource>>,
    stop: StopHandle,
}

impl SingleFileCatalog {
    const MAGIC: &'static [u8; 4] = b"SACT";
    const FORMAT_VERSION: u32 = 1;
    const SIDECAR_SUFFIX: &'static str = "x";

    /// An empty catalog for `path`. Nothing is read until it is built or streamed.
    pub fn new(path: impl AsRef<Path>, config: CatalogConfig) -> Result<Self> {
        let path = path.as_ref();
        let format = ArchiveFormat::from_path(path)
            .ok_or_else(|| SonarError::UnsupportedArchive(path.display().to_string()))?;
        Ok(SingleFileCatalog {
            path: path.to_path_buf(),
            format,
            config,
            records: Vec::new(),
            devices: Vec::new(),
            aris_header: None,
            stats: CatalogBuildStats::default(),
            complete: false,
            source: Mutex::new(None),
            stop: StopHandle::new(),
        })
    }

    /// Load the catalog sidecar when it is valid, otherwise scan the file
    /// and persist the result.
    pub fn open(path: impl AsRef<Path>, config: CatalogConfig) -> Result<Self> {
        let path = path.as_ref();
        if config.use_sidecars {
            match Self::load(path, config.clone()) {
                Ok(Some(catalog)) => return Ok(catalog),
                Ok(None) => {}
                Err(e) => warn!("discarding catalog for {}: {}", path.display(), e),
            }
        }
        let catalog = Self::build(path, config)?;
        if catalog.config.use_sidecars {
            if let Err(e) = catalog.save() {
                warn!("could not persist catalog for {}: {}", path.display(), e);
            }
        }
        Ok(catalog)
    }

    /// Scan the file from scratch without touching any sidecar.
    pub fn build(path: impl AsRef<Path>, config: CatalogConfig) -> Result<Self> {
        let mut catalog = Self::new(path, config)?;
        let outcome = catalog.scan(None, false)?;
        if let Some(e) = outcome.error {
            return Err(e);
        }
        catalog.commit(outcome.builder, true);
        info!(
            "catalogued {}: {} records, {} devices, {} corrupt skipped in {:?}",
            catalog.path.display(),
            catalog.stats.records,
            catalog.devices.len(),
            catalog.stats.corrupt_skipped,
            catalog.stats.elapsed
        );
        Ok(catalog)
    }

    pub fn sidecar_path(archive: &Path) -> PathBuf {
        sidecar_path(archive, Self::SIDECAR_SUFFIX)
    }

    /// Read a persisted catalog. The stored archive path is ignored and
    /// replaced by `path`, so an archive moved together with its sidecar
    /// still loads.
    pub fn load(path: impl AsRef<Path>, config: CatalogConfig) -> Result<Option<Self>> {
        let path = path.as_ref();
        let persisted: PersistedCatalog =
            match read_sidecar(&Self::sidecar_path(path), Self::MAGIC, Self::FORMAT_VERSION)? {
                Some(p) => p,
                None => return Ok(None),
            };
        let live_len = std::fs::metadata(path)?.len();
        let stale = |reason: String| SonarError::StaleIndex {
            path: path.display().to_string(),
            reason,
        };
        if persisted.archive_len != live_len {
            return Err(stale(format!(
                "archive is {} bytes, catalog expects {}",
                live_len, persisted.archive_len
            )));
        }
        if persisted.utc_offset_millis != config.utc_offset_millis {
            return Err(stale(format!(
                "catalog built with UTC offset {} ms, {} ms requested",
                persisted.utc_offset_millis, config.utc_offset_millis
            )));
        }

        let mut catalog = Self::new(path, config)?;
        if persisted.format != catalog.format {
            return Err(stale(format!("catalog describes a {:?} archive", persisted.format)));
        }
        debug!(
            "catalog sidecar for {} was written for {}",
            path.display(),
            persisted.path.display()
        );
        catalog.records = persisted.records.into_iter().map(CatalogRecord::new).collect();
        catalog.devices = persisted.devices;
        catalog.aris_header = persisted.aris_header;
        catalog.stats.records = catalog.records.len();
        catalog.complete = true;
        info!("loaded catalog for {}: {} records", path.display(), catalog.records.len());
        Ok(Some(catalog))
    }

    /// Persist the catalog beside the archive. Incomplete catalogs are refused.
    pub fn save(&self) -> Result<()> {
        if !self.complete {
            return Err(SonarError::Sidecar(format!(
                "catalog for {} is incomplete",
                self.path.display()
            )));
        }
        let persisted = PersistedCatalog {
            path: self.path.clone(),
            format: self.format,
            archive_len: std::fs::metadata(&self.path)?.len(),
            utc_offset_millis: self.config.utc_offset_millis,
            records: self.records.iter().map(|r| *r.descriptor()).collect(),
            devices: self.devices.clone(),
            aris_header: self.aris_header.clone(),
        };
        write_sidecar(&Self::sidecar_path(&self.path), Self::MAGIC, Self::FORMAT_VERSION, &persisted)
    }

    /// Decode every record in file order, handing each to `observer` while
    /// cataloguing it.
    ///
    /// The stop flag is checked before each record, so a stop requested
    /// before the stream starts ends it before the first record. The flag is
    /// cleared when the stream returns. A stream that is stopped, or whose
    /// observer declines a record, keeps the records seen so far in memory
    /// but is never persisted.
    pub fn stream_catalog<O>(&mut self, observer: &mut O) -> Result<CatalogStreamSummary>
    where
        O: CatalogStreamObserver + ?Sized,
    {
        let mut observer = observer;
        let outcome = self.scan(Some(&mut observer as &mut dyn CatalogStreamObserver), true);
        self.stop.reset();
        let outcome = outcome?;

        let records_streamed = outcome.builder.records.len();
        let first_record_time = outcome.builder.records.first().map(CatalogRecord::time);
        let last_record_time = outcome.builder.records.last().map(CatalogRecord::time);
        let end_reason = match outcome.error {
            Some(e) => {
                warn!("stream of {} ended by error: {}", self.path.display(), e);
                EndReason::ReadError
            }
            None => outcome.end,
        };

        let complete = end_reason == EndReason::FileEnd;
        self.commit(outcome.builder, complete);
        if complete && self.config.use_sidecars {
            if let Err(e) = self.save() {
                warn!("could not persist catalog for {}: {}", self.path.display(), e);
            }
        }
        Ok(CatalogStreamSummary {
            records_streamed,
            first_record_time,
            last_record_time,
            end_reason,
        })
    }

    /// Ask a running [`stream_catalog`](Self::stream_catalog) to stop after
    /// the current record.
    pub fn stop_catalog_stream(&self) {
        self.stop.stop();
    }

    /// A handle that can stop a stream from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn commit(&mut self, builder: CatalogBuilder, complete: bool) {
        self.records = builder.records;
        self.devices = builder.devices;
        self.stats = builder.stats;
        self.complete = complete;
    }

    fn scan(&mut self, mut observer: Option<&mut dyn CatalogStreamObserver>, check_stop: bool) -> Result<ScanOutcome> {
        let started = Instant::now();
        let mut source = match self.source.get_mut().take() {
            Some(source) => source,
            None => DataSource::open(&self.path, self.format, &self.config)?,
        };
        let depth = if observer.is_some() {
            DecodeDepth::Full
        } else {
            DecodeDepth::Descriptor
        };

        if let Err(e) = self.read_preamble(&mut source) {
            *self.source.get_mut() = Some(source);
            return Err(e);
        }

        let mut builder = CatalogBuilder::default();
        let mut reindexed = false;
        let (end, error) = loop {
            if check_stop && self.stop.is_stopped() {
                break (EndReason::ProcessStop, None);
            }
            let record_start = source.position();
            let decode_started = Instant::now();
            let item = match self.next_item(&mut source, depth) {
                Ok(item) => item,
                Err(e) if e.is_stale_index() && self.format.is_container() && !reindexed => {
                    warn!("{}; rebuilding fast index for {}", e, self.path.display());
                    reindexed = true;
                    let fresh = DataSource::reindex(&self.path, &self.config)
                        .and_then(|mut fresh| fresh.seek_to(record_start).map(|_| fresh));
                    match fresh {
                        Ok(fresh) => {
                            source = fresh;
                            continue;
                        }
                        Err(e) => break (EndReason::ReadError, Some(e)),
                    }
                }
                Err(e) => break (EndReason::ReadError, Some(e)),
            };

            match item {
                ScanItem::End => break (EndReason::FileEnd, None),
                ScanItem::Corrupt => builder.stats.corrupt_skipped += 1,
                ScanItem::Other => builder.stats.other_records += 1,
                ScanItem::Status(status) => {
                    builder.stats.status_records += 1;
                    if let Some(observer) = observer.as_mut() {
                        if !observer.on_status_record(status) {
                            break (EndReason::DataGap, None);
                        }
                    }
                }
                ScanItem::Image(image) => {
                    let descriptor = builder.add(&image);
                    let Some(observer) = observer.as_mut() else {
                        continue;
                    };
                    let Some(loaded) = image.into_loaded(decode_started.elapsed()) else {
                        continue;
                    };
                    let streamed = StreamedImage {
                        descriptor,
                        image: Arc::new(loaded),
                    };
                    if !observer.on_image_record(streamed) {
                        break (EndReason::DataGap, None);
                    }
                }
            }
        };
        *self.source.get_mut() = Some(source);

        builder.stats.elapsed = started.elapsed();
        Ok(ScanOutcome { builder, end, error })
    }

    fn read_preamble(&mut self, source: &mut DataSource) -> Result<()> {
        source.seek_to(0)?;
        match self.format {
            ArchiveFormat::Ecd => {
                let header = EcdFileHeader::read(source)?;
                debug!("ECD header version 0x{:X} '{}'", header.head_version, header.message);
            }
            ArchiveFormat::Aris => {
                self.aris_header = Some(ArisFileHeader::read(source)?);
            }
            ArchiveFormat::Glf | ArchiveFormat::GlfData => {}
        }
        Ok(())
    }

    fn next_item(&self, source: &mut DataSource, depth: DecodeDepth) -> Result<ScanItem> {
        let utc = self.config.utc_offset_millis;
        let lenient = self.config.recovery == RecoveryPolicy::Lenient;
        match self.format {
            ArchiveFormat::Glf | ArchiveFormat::GlfData => match glf::read_record(source, depth, utc) {
                Ok(None) => Ok(ScanItem::End),
                Ok(Some(RecordKind::Image(image))) => Ok(ScanItem::Image(image)),
                Ok(Some(RecordKind::Status(status))) => Ok(ScanItem::Status(status)),
                Ok(Some(RecordKind::Other { .. })) => Ok(ScanItem::Other),
                Err(e) if lenient && e.corruption_kind().is_some() => {
                    warn!("{}: {}", self.path.display(), e);
                    match e.corruption_kind() {
                        Some(CorruptionKind::LeadingGuard) | Some(CorruptionKind::Geometry) => {
                            source.skip_bytes(self.config.recovery_window)?;
                        }
                        _ => {}
                    }
                    Ok(ScanItem::Corrupt)
                }
                Err(e) => Err(e),
            },
            ArchiveFormat::Ecd => match ecd::read_item(source, depth, utc) {
                Ok(EcdItem::End) => Ok(ScanItem::End),
                Ok(EcdItem::Image(image)) => Ok(ScanItem::Image(image)),
                Ok(EcdItem::Skipped { .. }) => Ok(ScanItem::Other),
                Err(e) if lenient => match e.corruption_kind() {
                    Some(CorruptionKind::Implausible) => {
                        debug!("{}: discarding {}", self.path.display(), e);
                        Ok(ScanItem::Corrupt)
                    }
                    Some(CorruptionKind::Geometry) => {
                        warn!("{}: {}", self.path.display(), e);
                        match skip_past_marker_pair(source, HALF_END_TAG)? {
                            Some(_) => Ok(ScanItem::Corrupt),
                            None => Ok(ScanItem::End),
                        }
                    }
                    Some(_) => {
                        warn!("{}: {}, ending scan", self.path.display(), e);
                        Ok(ScanItem::End)
                    }
                    None => Err(e),
                },
                Err(e) => Err(e),
            },
            ArchiveFormat::Aris => {
                let header = self.aris_header()?;
                Ok(match aris::read_frame(source, header, depth)? {
                    Some(image) => ScanItem::Image(image),
                    None => ScanItem::End,
                })
            }
        }
    }

    fn aris_header(&self) -> Result<&ArisFileHeader> {
        self.aris_header
            .as_ref()
            .ok_or_else(|| SonarError::UnsupportedArchive(format!("{} has no ARIS file header", self.path.display())))
    }

    fn decode_full(&self, source: &mut DataSource, position: u64) -> Result<DecodedImage> {
        source.seek_to(position)?;
        let utc = self.config.utc_offset_millis;
        let image = match self.format {
            ArchiveFormat::Glf | ArchiveFormat::GlfData => match glf::read_record(source, DecodeDepth::Full, utc)? {
                Some(RecordKind::Image(image)) => Some(image),
                _ => None,
            },
            ArchiveFormat::Ecd => match ecd::read_item(source, DecodeDepth::Full, utc)? {
                EcdItem::Image(image) => Some(image),
                _ => None,
            },
            ArchiveFormat::Aris => aris::read_frame(source, self.aris_header()?, DecodeDepth::Full)?,
        };
        image.ok_or_else(|| {
            SonarError::corrupt(
                position,
                CorruptionKind::UnknownType,
                "no image record at catalogued position",
            )
        })
    }

    /// Decode a record's payload, attaching it to the catalog entry. Already
    /// loaded records are returned without touching the file.
    pub fn get_full_record(&self, index: usize) -> Result<Arc<LoadedImage>> {
        let record = self.records.get(index).ok_or(SonarError::RecordOutOfRange {
            index,
            count: self.records.len(),
        })?;
        if let Some(loaded) = record.loaded() {
            return Ok(loaded);
        }

        let started = Instant::now();
        let position = record.descriptor().file_position;
        let mut slot = self.source.lock();
        let source = match slot.take() {
            Some(source) => source,
            None => DataSource::open(&self.path, self.format, &self.config)?,
        };
        let source = slot.insert(source);

        let image = match self.decode_full(source, position) {
            Err(e) if e.is_stale_index() && self.format.is_container() => {
                warn!("{}; rebuilding fast index for {}", e, self.path.display());
                let fresh = slot.insert(DataSource::reindex(&self.path, &self.config)?);
                self.decode_full(fresh, position)?
            }
            other => other?,
        };
        drop(slot);

        let loaded = image.into_loaded(started.elapsed()).ok_or_else(|| {
            SonarError::corrupt(position, CorruptionKind::Geometry, "record decoded without payload")
        })?;
        let loaded = Arc::new(loaded);
        record.attach(Arc::clone(&loaded));
        Ok(loaded)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Whether the catalog covers the whole file. False after a stopped stream.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn build_stats(&self) -> &CatalogBuildStats {
        &self.stats
    }

    /// Physical I/O counters of the open data stream, for indexed archives.
    pub fn stream_metrics(&self) -> Option<StreamMetrics> {
        self.source.lock().as_ref().and_then(|s| s.metrics().cloned())
    }

    /// Close the underlying file. It is reopened on the next full load.
    pub fn close_source(&self) {
        *self.source.lock() = None;
    }

    pub fn aris_file_header(&self) -> Option<&ArisFileHeader> {
        self.aris_header.as_ref()
    }

    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&CatalogRecord> {
        self.records.get(index)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        self.records.get(index).map_or(false, CatalogRecord::is_loaded)
    }

    pub fn first_record_time(&self) -> Option<i64> {
        self.records.first().map(CatalogRecord::time)
    }

    pub fn last_record_time(&self) -> Option<i64> {
        self.records.last().map(CatalogRecord::time)
    }

    /// Index of the record closest to `time`. Ties go to the earlier record.
    pub fn find_record_index(&self, time: i64) -> Option<usize> {
        if self.records.is_empty() {
            return None;
        }
        let after = self.records.partition_point(|r| r.time() < time);
        if after == 0 {
            return Some(0);
        }
        if after == self.records.len() {
            return Some(after - 1);
        }
        let before_gap = time.saturating_sub(self.records[after - 1].time());
        let after_gap = self.records[after].time().saturating_sub(time);
        Some(if after_gap < before_gap { after } else { after - 1 })
    }

    /// The `n`th record (from 0) of one device.
    pub fn sonar_record(&self, device_id: u32, n: usize) -> Option<&CatalogRecord> {
        self.records.iter().filter(|r| r.device_id() == device_id).nth(n)
    }

    /// File-wide index of the `n`th record of one device.
    pub fn sonar_record_index(&self, device_id: u32, n: usize) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.device_id() == device_id)
            .nth(n)
            .map(|(i, _)| i)
    }

    pub fn device_ids(&self) -> Vec<u32> {
        self.devices.iter().map(|d| d.device_id).collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_info(&self, device_id: u32) -> Option<&CatalogDeviceInfo> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn device_infos(&self) -> impl Iterator<Item = &CatalogDeviceInfo> {
        self.devices.iter()
    }

    /// Largest number of frames recorded by any one device.
    pub fn max_device_records(&self) -> usize {
        self.devices.iter().map(|d| d.frame_count).max().unwrap_or(0)
    }

    /// Closest record of `device_id` to `time`, fully loaded.
    ///
    /// Records are walked in time order and the walk stops at the first
    /// record later than `time`.
    pub fn find_record_for_time(&self, device_id: u32, time: i64) -> Result<Option<usize>> {
        self.closest_loaded(time, |d| d.device_id == device_id)
    }

    /// As [`find_record_for_time`](Self::find_record_for_time), selecting
    /// the device by its index in this file.
    pub fn find_record_for_index_and_time(&self, sonar_index: u32, time: i64) -> Result<Option<usize>> {
        self.closest_loaded(time, |d| d.sonar_index == sonar_index)
    }

    fn closest_loaded(&self, time: i64, matches: impl Fn(&RecordDescriptor) -> bool) -> Result<Option<usize>> {
        let mut best: Option<(usize, u64)> = None;
        for (i, record) in self.records.iter().enumerate() {
            if !matches(record.descriptor()) {
                continue;
            }
            let dt = record.time().saturating_sub(time);
            if best.map_or(true, |(_, gap)| dt.unsigned_abs() < gap) {
                best = Some((i, dt.unsigned_abs()));
            }
            if dt > 0 {
                break;
            }
        }
        match best {
            Some((i, _)) => {
                self.get_full_record(i)?;
                Ok(Some(i))
            }
            None => Ok(None),
        }
    }

    /// Step `offset` records from `index`, clamped to the catalog.
    pub fn find_relative_record(&self, index: usize, offset: i64) -> Option<usize> {
        if self.records.is_empty() {
            return None;
        }
        let last = self.records.len() as i64 - 1;
        Some((index as i64).saturating_add(offset).clamp(0, last) as usize)
    }

    /// Release payloads of records outside the open interval
    /// `(current_time - window, current_time + window)`. Returns how many
    /// were released.
    pub fn free_image_data(&self, current_time: i64, window_millis: i64) -> usize {
        let (t1, t2) = (
            current_time.saturating_sub(window_millis),
            current_time.saturating_add(window_millis),
        );
        self.records
            .iter()
            .filter(|r| !(r.time() > t1 && r.time() < t2))
            .filter(|r| r.free())
            .count()
    }

    pub fn free_all_image_data(&self) -> usize {
        self.records.iter().filter(|r| r.free()).count()
    }
}

impl std::fmt::Debug for SingleFileCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFileCatalog")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("records", &self.records.len())
            .field("devices", &self.devices)
            .field("complete", &self.complete)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::write_aris;
    use tempfile::tempdir;

    fn aris_file(dir: &Path, times_micros: &[u64]) -> PathBuf {
        write_aris(dir, "sample.aris", 77, times_micros)
    }

    #[test]
    fn test_time_queries() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000, 2_000_000, 3_000_000, 4_000_000]);
        let catalog = SingleFileCatalog::build(&path, CatalogConfig::default()).unwrap();

        assert_eq!(catalog.record_count(), 4);
        assert_eq!(catalog.first_record_time(), Some(1000));
        assert_eq!(catalog.last_record_time(), Some(4000));
        assert_eq!(catalog.find_record_index(0), Some(0));
        assert_eq!(catalog.find_record_index(2400), Some(1));
        assert_eq!(catalog.find_record_index(2600), Some(2));
        assert_eq!(catalog.find_record_index(9000), Some(3));
        assert_eq!(catalog.find_relative_record(1, -5), Some(0));
        assert_eq!(catalog.find_relative_record(1, 2), Some(3));
        assert_eq!(catalog.find_relative_record(1, 9), Some(3));

        assert_eq!(catalog.find_record_for_time(77, 2900).unwrap(), Some(2));
        assert!(catalog.is_loaded(2));
        assert_eq!(catalog.find_record_for_time(5, 2900).unwrap(), None);
        assert_eq!(catalog.find_record_for_index_and_time(1, 1100).unwrap(), Some(0));
    }

    #[test]
    fn test_free_image_data_window() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000, 2_000_000, 3_000_000]);
        let catalog = SingleFileCatalog::build(&path, CatalogConfig::default()).unwrap();
        for i in 0..3 {
            let image = catalog.get_full_record(i).unwrap();
            assert_eq!(image.amplitudes(), &[i as u8; 6]);
        }

        assert_eq!(catalog.free_image_data(2000, 500), 2);
        assert!(!catalog.is_loaded(0));
        assert!(catalog.is_loaded(1));
        assert!(!catalog.is_loaded(2));
        assert_eq!(catalog.free_all_image_data(), 1);
    }

    #[test]
    fn test_extreme_offsets_saturate() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000, 2_000_000]);
        let catalog = SingleFileCatalog::build(&path, CatalogConfig::default()).unwrap();

        assert_eq!(catalog.find_relative_record(1, i64::MAX), Some(1));
        assert_eq!(catalog.find_relative_record(1, i64::MIN), Some(0));
        assert_eq!(catalog.find_record_index(i64::MIN), Some(0));
        assert_eq!(catalog.find_record_for_time(77, i64::MIN).unwrap(), Some(0));

        catalog.get_full_record(0).unwrap();
        catalog.get_full_record(1).unwrap();
        assert_eq!(catalog.free_image_data(1500, i64::MAX), 0);
        assert_eq!(catalog.free_image_data(i64::MIN, i64::MAX), 2);
    }

    #[test]
    fn test_out_of_range() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000]);
        let catalog = SingleFileCatalog::build(&path, CatalogConfig::default()).unwrap();
        assert!(matches!(
            catalog.get_full_record(3),
            Err(SonarError::RecordOutOfRange { index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            SingleFileCatalog::new("notes.txt", CatalogConfig::default()),
            Err(SonarError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn test_sidecar_rebinds_path() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000, 2_000_000]);
        let built = SingleFileCatalog::open(&path, CatalogConfig::default()).unwrap();
        assert!(SingleFileCatalog::sidecar_path(&path).exists());

        let moved = dir.path().join("moved.aris");
        std::fs::rename(&path, &moved).unwrap();
        std::fs::rename(SingleFileCatalog::sidecar_path(&path), SingleFileCatalog::sidecar_path(&moved)).unwrap();

        let loaded = SingleFileCatalog::load(&moved, CatalogConfig::default()).unwrap().unwrap();
        assert_eq!(loaded.path(), moved.as_path());
        assert_eq!(loaded.record_count(), built.record_count());
        assert_eq!(loaded.aris_file_header(), built.aris_file_header());
        assert_eq!(loaded.get_full_record(1).unwrap().amplitudes(), &[1u8; 6]);
    }

    #[test]
    fn test_utc_offset_mismatch_is_stale() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000]);
        SingleFileCatalog::open(&path, CatalogConfig::default()).unwrap();
        let shifted = CatalogConfig::default().with_utc_offset_millis(3_600_000);
        assert!(SingleFileCatalog::load(&path, shifted).unwrap_err().is_stale_index());
    }

    struct StopAfter {
        limit: usize,
        seen: Vec<StreamedImage>,
        stop: Option<StopHandle>,
    }

    impl CatalogStreamObserver for StopAfter {
        fn on_image_record(&mut self, record: StreamedImage) -> bool {
            self.seen.push(record);
            if self.seen.len() < self.limit {
                return true;
            }
            match &self.stop {
                Some(stop) => {
                    stop.stop();
                    true
                }
                None => false,
            }
        }
    }

    #[test]
    fn test_stream_to_end_persists() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000, 2_000_000, 3_000_000]);
        let mut catalog = SingleFileCatalog::new(&path, CatalogConfig::default()).unwrap();
        let mut observer = StopAfter {
            limit: usize::MAX,
            seen: Vec::new(),
            stop: None,
        };

        let summary = catalog.stream_catalog(&mut observer).unwrap();
        assert_eq!(summary.end_reason, EndReason::FileEnd);
        assert_eq!(summary.records_streamed, 3);
        assert_eq!(summary.first_record_time, Some(1000));
        assert_eq!(summary.last_record_time, Some(3000));
        assert_eq!(observer.seen[2].image.amplitudes(), &[2u8; 6]);
        assert!(catalog.is_complete());
        assert!(SingleFileCatalog::sidecar_path(&path).exists());
        // streamed payloads are not retained by the catalog
        assert!(!catalog.is_loaded(0));
    }

    #[test]
    fn test_stopped_stream_is_not_persisted() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000, 2_000_000, 3_000_000, 4_000_000]);
        let mut catalog = SingleFileCatalog::new(&path, CatalogConfig::default()).unwrap();
        let mut observer = StopAfter {
            limit: 2,
            seen: Vec::new(),
            stop: Some(catalog.stop_handle()),
        };

        let summary = catalog.stream_catalog(&mut observer).unwrap();
        assert_eq!(summary.end_reason, EndReason::ProcessStop);
        assert_eq!(summary.records_streamed, 2);
        assert_eq!(catalog.record_count(), 2);
        assert!(!catalog.is_complete());
        assert!(!SingleFileCatalog::sidecar_path(&path).exists());
        assert!(catalog.save().is_err());
    }

    #[test]
    fn test_stop_before_stream_is_honoured_once() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000, 2_000_000]);
        let mut catalog = SingleFileCatalog::new(&path, CatalogConfig::default()).unwrap();
        let mut observer = StopAfter {
            limit: usize::MAX,
            seen: Vec::new(),
            stop: None,
        };

        catalog.stop_catalog_stream();
        let summary = catalog.stream_catalog(&mut observer).unwrap();
        assert_eq!(summary.end_reason, EndReason::ProcessStop);
        assert_eq!(summary.records_streamed, 0);
        assert!(observer.seen.is_empty());

        let summary = catalog.stream_catalog(&mut observer).unwrap();
        assert_eq!(summary.end_reason, EndReason::FileEnd);
        assert_eq!(summary.records_streamed, 2);
        assert!(SingleFileCatalog::sidecar_path(&path).exists());
    }

    #[test]
    fn test_observer_decline_is_data_gap() {
        let dir = tempdir().unwrap();
        let path = aris_file(dir.path(), &[1_000_000, 2_000_000, 3_000_000]);
        let mut catalog = SingleFileCatalog::new(&path, CatalogConfig::default()).unwrap();
        let mut observer = StopAfter {
            limit: 1,
            seen: Vec::new(),
            stop: None,
        };

        let summary = catalog.stream_catalog(&mut observer).unwrap();
        assert_eq!(summary.end_reason, EndReason::DataGap);
        assert_eq!(summary.records_streamed, 1);
        assert!(!SingleFileCatalog::sidecar_path(&path).exists());
    }
}
