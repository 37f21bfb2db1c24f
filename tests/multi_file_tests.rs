// tests/multi_file_tests.rs
mod common;

use common::*;
use sonar_archive::catalog::{CatalogEvent, CatalogObserver, CatalogProgress, CatalogState, ChannelCatalogObserver};
use sonar_archive::*;
use std::path::PathBuf;

fn session_files(name: &str, sizes: &[usize]) -> Vec<PathBuf> {
    let dir = output_dir(name);
    let mut start = base_time();
    sizes
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let path = glf_session(&dir, &format!("log_{}.glf", i), &device_run(start, 801, count));
            start += 60_000;
            path
        })
        .collect()
}

#[test]
fn test_global_index_translation() {
    let files = session_files("multi_translation", &[4, 7, 5]);
    let mut multi = MultiFileCatalog::default();
    multi.catalog_files(&files);

    assert!(multi.is_complete());
    assert_eq!(multi.total_records(), 16);
    assert_eq!(multi.catalogs().len(), 3);

    let found = multi.record_at(4 + 7 + 3).unwrap();
    assert_eq!(found.file_index, 2);
    assert_eq!(found.local_index, 3);

    let record = multi.get_record(4 + 7 + 3, true).unwrap();
    assert_eq!(record.time(), base_time() + 120_000 + 300);
    assert!(record.is_loaded());

    let first_of_second = multi.get_record(4, false).unwrap();
    assert_eq!(first_of_second.time(), base_time() + 60_000);
    assert!(!first_of_second.is_loaded());

    match multi.get_record(16, false) {
        Err(SonarError::RecordOutOfRange { index, count }) => assert_eq!((index, count), (16, 16)),
        other => panic!("expected out of range, got {:?}", other.map(|r| r.time())),
    }
    assert_eq!(multi.first_record_time(), Some(base_time()));
    assert_eq!(multi.last_record_time(), Some(base_time() + 120_400));
}

#[test]
fn test_device_records_merge_across_files() {
    let dir = output_dir("multi_device_merge");
    let t = base_time();
    let mut first = device_run(t, 7, 5);
    first.extend(device_run(t + 500, 9, 5));
    let a = glf_session(&dir, "a.glf", &first);
    let b = glf_session(&dir, "b.glf", &device_run(t + 10_000, 7, 10));

    let mut multi = MultiFileCatalog::default();
    multi.catalog_files(&[&a, &b]);

    assert_eq!(multi.device_ids(), vec![7, 9]);
    assert_eq!(multi.max_device_records(), 15);
    assert_eq!(multi.device_info(7).unwrap().frame_count, 15);
    assert_eq!(multi.device_info(9).unwrap().first_ordinal, 5);

    let last_of_a = multi.get_record(9, false).unwrap();
    assert_eq!(multi.find_relative_record(last_of_a, 1), Some(10));
    assert_eq!(multi.find_relative_record(last_of_a, -100), Some(0));
    assert_eq!(multi.find_relative_record(last_of_a, 100), Some(19));

    // the sixth record of device 7 is the first one in b
    let sixth = multi.get_sonar_record(7, 5).unwrap();
    assert_eq!(sixth.time(), t + 10_000);
    assert!(sixth.is_loaded());
    assert!(multi.get_sonar_record(9, 5).is_err());
}

#[test]
fn test_time_lookup_and_free_across_files() {
    let files = session_files("multi_time_lookup", &[10, 10]);
    let mut multi = MultiFileCatalog::new(CatalogConfig::default());
    multi.catalog_files(&files);

    let t = base_time() + 60_000;
    let global = multi.find_record_for_time(801, t + 240).unwrap().unwrap();
    assert_eq!(global, 12);
    assert!(multi.get_record(global, false).unwrap().is_loaded());
    assert_eq!(multi.find_record_for_time(801, base_time() + 30_000).unwrap(), None);

    for i in 0..multi.total_records() {
        multi.get_record(i, true).unwrap();
    }
    assert_eq!(multi.free_image_data(t + 500, 150), 17);
    assert_eq!(multi.free_all_image_data(), 3);
}

#[test]
fn test_mixed_formats_in_one_timeline() {
    let dir = output_dir("multi_mixed_formats");
    let t = base_time();
    let glf = glf_session(&dir, "a.glf", &device_run(t, 801, 3));
    let ecd = write_ecd(
        &dir,
        "b.ecd",
        &[ecd_target_image(t + 1000, 12, 1500.0), ecd_target_image(t + 1100, 12, 1500.0)],
    );
    let aris = write_aris(&dir, "c.aris", 1234, &[t + 2000, t + 2067]);

    let mut multi = MultiFileCatalog::default();
    multi.catalog_files(&[&glf, &ecd, &aris]);
    assert_eq!(multi.total_records(), 7);
    assert_eq!(multi.device_ids(), vec![801, 12, 1234]);

    let formats: Vec<ArchiveFormat> = multi.catalogs().iter().map(|c| c.format()).collect();
    assert_eq!(formats, vec![ArchiveFormat::Glf, ArchiveFormat::Ecd, ArchiveFormat::Aris]);
    assert_eq!(multi.get_record(6, true).unwrap().time(), t + 2067);
}

#[test]
fn test_failed_file_is_recorded_and_skipped() {
    let dir = output_dir("multi_failed_file");
    let good = glf_session(&dir, "good.glf", &device_run(base_time(), 801, 4));
    let missing = dir.join("missing.glf");
    let unknown = dir.join("notes.txt");
    std::fs::write(&unknown, b"not sonar").unwrap();

    let mut multi = MultiFileCatalog::default();
    let (observer, events) = ChannelCatalogObserver::unbounded();
    multi.add_observer(Box::new(observer));
    multi.catalog_files(&[&missing, &good, &unknown]);

    assert!(multi.is_complete());
    assert_eq!(multi.total_records(), 4);
    let failed: Vec<&PathBuf> = multi.file_errors().iter().map(|f| &f.path).collect();
    assert_eq!(failed, vec![&missing, &unknown]);
    assert!(matches!(multi.file_errors()[1].error, SonarError::UnsupportedArchive(_)));

    let events: Vec<CatalogEvent> = events.try_iter().collect();
    assert_eq!(events.len(), 4);
    assert_eq!(events[1].records, 4);
    assert_eq!(events[1].last_file.as_ref(), Some(&good));
    assert_eq!(events[3].state, CatalogState::Complete);

    multi.clear();
    assert_eq!(multi.total_records(), 0);
    assert!(multi.file_errors().is_empty());
}

struct StopAfterFirst {
    stop: StopHandle,
    seen: usize,
}

impl CatalogObserver for StopAfterFirst {
    fn catalog_changed(&mut self, progress: &CatalogProgress<'_>) {
        if progress.state == CatalogState::Building {
            self.seen += 1;
            self.stop.stop();
        }
    }
}

#[test]
fn test_stop_cataloging_between_files() {
    let files = session_files("multi_stop", &[3, 3, 3]);
    let mut multi = MultiFileCatalog::default();
    let stop = multi.stop_handle();
    multi.add_observer(Box::new(StopAfterFirst { stop, seen: 0 }));
    multi.catalog_files(&files);

    assert!(!multi.is_complete());
    assert_eq!(multi.catalogs().len(), 1);
    assert_eq!(multi.total_records(), 3);

    // a fresh batch starts from a cleared stop flag
    multi.remove_observers();
    multi.catalog_files(&files);
    assert!(multi.is_complete());
    assert_eq!(multi.total_records(), 9);
}
