// src/catalog/multi.rs
use crate::catalog::descriptor::CatalogRecord;
use crate::catalog::device::CatalogDeviceInfo;
use crate::catalog::observer::{CatalogObserver, CatalogProgress, CatalogState};
use crate::catalog::single::SingleFileCatalog;
use crate::catalog::StopHandle;
use crate::config::CatalogConfig;
use crate::error::{Result, SonarError};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// A file that could not be catalogued, and why.
#[derive(Debug)]
pub struct FileError {
    pub path: PathBuf,
    pub error: SonarError,
}

/// A global record index resolved to its file.
#[derive(Debug, Clone, Copy)]
pub struct MultiRecordRef<'a> {
    pub file_index: usize,
    pub local_index: usize,
    pub catalog: &'a SingleFileCatalog,
}

impl<'a> MultiRecordRef<'a> {
    pub fn record(&self) -> &'a CatalogRecord {
        &self.catalog.records()[self.local_index]
    }
}

/// Many single-file catalogs presented as one record space.
///
/// Global record indices run through the files in the order they were
/// given, so they follow time order only when the files do. Device record
/// numbering runs through the same files counting only that device's records.
pub struct MultiFileCatalog {
    config: CatalogConfig,
    catalogs: Vec<SingleFileCatalog>,
    devices: Vec<CatalogDeviceInfo>,
    file_errors: Vec<FileError>,
    observers: Vec<Box<dyn CatalogObserver>>,
    stop: StopHandle,
    complete: bool,
}

fn notify(observers: &mut [Box<dyn CatalogObserver>], progress: &CatalogProgress<'_>) {
    for observer in observers.iter_mut() {
        observer.catalog_changed(progress);
    }
}

impl MultiFileCatalog {
    /// An empty catalog. Nothing is read until [`catalog_files`](Self::catalog_files).
    pub fn new(config: CatalogConfig) -> Self {
        MultiFileCatalog {
            config,
            catalogs: Vec::new(),
            devices: Vec::new(),
            file_errors: Vec::new(),
            observers: Vec::new(),
            stop: StopHandle::new(),
            complete: false,
        }
    }

    /// Replace the contents with catalogs of `paths`, in order.
    ///
    /// Each file reuses its catalog sidecar when valid and is scanned
    /// otherwise. A file that fails is recorded in
    /// [`file_errors`](Self::file_errors) and skipped. Observers hear a
    /// `Building` event per file and one `Complete` event at the end, unless
    /// [`stop_cataloging`](Self::stop_cataloging) cut the batch short.
    pub fn catalog_files<P: AsRef<Path>>(&mut self, paths: &[P]) {
        self.catalogs.clear();
        self.devices.clear();
        self.file_errors.clear();
        self.complete = false;
        self.stop.reset();

        let total_files = paths.len();
        for (i, path) in paths.iter().enumerate() {
            if self.stop.is_stopped() {
                info!("cataloguing stopped after {} of {} files", i, total_files);
                return;
            }
            let path = path.as_ref();
            match SingleFileCatalog::open(path, self.config.clone()) {
                Ok(catalog) => {
                    self.merge_devices(&catalog);
                    self.catalogs.push(catalog);
                    let progress = CatalogProgress {
                        state: CatalogState::Building,
                        total_files,
                        current_file: i + 1,
                        last_file: Some(path),
                        catalog: self.catalogs.last(),
                    };
                    notify(&mut self.observers, &progress);
                }
                Err(error) => {
                    warn!("could not catalogue {}: {}", path.display(), error);
                    self.file_errors.push(FileError {
                        path: path.to_path_buf(),
                        error,
                    });
                    let progress = CatalogProgress {
                        state: CatalogState::Building,
                        total_files,
                        current_file: i + 1,
                        last_file: Some(path),
                        catalog: None,
                    };
                    notify(&mut self.observers, &progress);
                }
            }
        }

        self.complete = true;
        let progress = CatalogProgress {
            state: CatalogState::Complete,
            total_files,
            current_file: self.catalogs.len(),
            last_file: None,
            catalog: None,
        };
        notify(&mut self.observers, &progress);
        info!(
            "catalogued {} files: {} records, {} devices, {} failures",
            self.catalogs.len(),
            self.total_records(),
            self.devices.len(),
            self.file_errors.len()
        );
    }

    fn merge_devices(&mut self, catalog: &SingleFileCatalog) {
        let offset = self.total_records() as u32;
        for info in catalog.device_infos() {
            match self.devices.iter_mut().find(|d| d.device_id == info.device_id) {
                Some(merged) => merged.add_frame_count(info.frame_count),
                None => {
                    let device_index = self.devices.len() as u32 + 1;
                    let mut merged =
                        CatalogDeviceInfo::new(info.device_id, device_index, offset + info.first_ordinal);
                    merged.add_frame_count(info.frame_count);
                    self.devices.push(merged);
                }
            }
        }
    }

    /// Ask a running [`catalog_files`](Self::catalog_files) to stop before the next file.
    pub fn stop_cataloging(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Drop every catalog and notify observers with `Cleared`.
    pub fn clear(&mut self) {
        self.catalogs.clear();
        self.devices.clear();
        self.file_errors.clear();
        self.complete = false;
        let progress = CatalogProgress {
            state: CatalogState::Cleared,
            total_files: 0,
            current_file: 0,
            last_file: None,
            catalog: None,
        };
        notify(&mut self.observers, &progress);
    }

    pub fn add_observer(&mut self, observer: Box<dyn CatalogObserver>) {
        self.observers.push(observer);
    }

    pub fn remove_observers(&mut self) {
        self.observers.clear();
    }

    /// Whether the last [`catalog_files`](Self::catalog_files) ran through every file.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn file_errors(&self) -> &[FileError] {
        &self.file_errors
    }

    pub fn catalogs(&self) -> &[SingleFileCatalog] {
        &self.catalogs
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn total_records(&self) -> usize {
        self.catalogs.iter().map(SingleFileCatalog::record_count).sum()
    }

    pub fn device_ids(&self) -> Vec<u32> {
        self.devices.iter().map(|d| d.device_id).collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Merged summary of one device across every file.
    pub fn device_info(&self, device_id: u32) -> Option<&CatalogDeviceInfo> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    /// Largest total frame count of any one device.
    pub fn max_device_records(&self) -> usize {
        self.devices.iter().map(|d| d.frame_count).max().unwrap_or(0)
    }

    pub fn first_record_time(&self) -> Option<i64> {
        self.catalogs.iter().find_map(SingleFileCatalog::first_record_time)
    }

    pub fn last_record_time(&self) -> Option<i64> {
        self.catalogs.iter().rev().find_map(SingleFileCatalog::last_record_time)
    }

    fn file_start(&self, file_index: usize) -> usize {
        self.catalogs[..file_index].iter().map(SingleFileCatalog::record_count).sum()
    }

    /// Resolve a global index to its file and local index.
    pub fn record_at(&self, global: usize) -> Option<MultiRecordRef<'_>> {
        let mut start = 0;
        for (file_index, catalog) in self.catalogs.iter().enumerate() {
            let count = catalog.record_count();
            if global < start + count {
                return Some(MultiRecordRef {
                    file_index,
                    local_index: global - start,
                    catalog,
                });
            }
            start += count;
        }
        None
    }

    /// The record at a global index, with its payload loaded when `load_fully` is set.
    pub fn get_record(&self, global: usize, load_fully: bool) -> Result<&CatalogRecord> {
        let found = self.record_at(global).ok_or(SonarError::RecordOutOfRange {
            index: global,
            count: self.total_records(),
        })?;
        if load_fully {
            found.catalog.get_full_record(found.local_index)?;
        }
        Ok(found.record())
    }

    /// The `n`th record (from 0) of one device across all files, loaded fully.
    pub fn get_sonar_record(&self, device_id: u32, n: usize) -> Result<&CatalogRecord> {
        let mut start = 0;
        for catalog in &self.catalogs {
            let Some(info) = catalog.device_info(device_id) else {
                continue;
            };
            if n < start + info.frame_count {
                if let Some(local) = catalog.sonar_record_index(device_id, n - start) {
                    catalog.get_full_record(local)?;
                    return Ok(&catalog.records()[local]);
                }
            }
            start += info.frame_count;
        }
        Err(SonarError::RecordOutOfRange { index: n, count: start })
    }

    /// Global index of the record `offset` steps from `base`, clamped to the
    /// whole timeline.
    ///
    /// `base` is located by finding the file whose time span holds its
    /// timestamp, so stepping crosses file boundaries.
    pub fn find_relative_record(&self, base: &CatalogRecord, offset: i64) -> Option<usize> {
        let total = self.total_records();
        if total == 0 {
            return None;
        }
        let time = base.time();
        let spans = |c: &SingleFileCatalog| match (c.first_record_time(), c.last_record_time()) {
            (Some(first), Some(last)) => time >= first && time <= last,
            _ => false,
        };

        let exact = self.catalogs.iter().enumerate().filter(|(_, c)| spans(*c)).find_map(|(i, c)| {
            c.records()
                .iter()
                .position(|r| r.descriptor() == base.descriptor())
                .map(|local| (i, local))
        });
        let (file_index, local) = match exact {
            Some(found) => found,
            None => {
                let (i, catalog) = self.catalogs.iter().enumerate().find(|(_, c)| spans(*c))?;
                (i, catalog.find_record_index(time)?)
            }
        };

        let global = (self.file_start(file_index) + local) as i64;
        Some(global.saturating_add(offset).clamp(0, total as i64 - 1) as usize)
    }

    /// Closest record of `device_id` to `time`, as a global index, fully loaded.
    ///
    /// Only the first file whose time span holds `time` is searched.
    pub fn find_record_for_time(&self, device_id: u32, time: i64) -> Result<Option<usize>> {
        let mut start = 0;
        for catalog in &self.catalogs {
            let within = match (catalog.first_record_time(), catalog.last_record_time()) {
                (Some(first), Some(last)) => time >= first && time <= last,
                _ => false,
            };
            if within {
                return Ok(catalog.find_record_for_time(device_id, time)?.map(|local| start + local));
            }
            start += catalog.record_count();
        }
        Ok(None)
    }

    /// Release payloads outside the window around `current_time` in every file.
    pub fn free_image_data(&self, current_time: i64, window_millis: i64) -> usize {
        self.catalogs
            .iter()
            .map(|c| c.free_image_data(current_time, window_millis))
            .sum()
    }

    pub fn free_all_image_data(&self) -> usize {
        self.catalogs.iter().map(SingleFileCatalog::free_all_image_data).sum()
    }
}

impl Default for MultiFileCatalog {
    fn default() -> Self {
        MultiFileCatalog::new(CatalogConfig::default())
    }
}
