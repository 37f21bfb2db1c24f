// tests/common/mod.rs
#![allow(dead_code)]

use bytes::BufMut;
use chrono::{TimeZone, Utc};
use sonar_archive::record::aris::{ArisFileHeader, ArisFrameHeader};
use sonar_archive::record::ecd::{record_type, EcdFileHeader};
use sonar_archive::types::CDate;
use sonar_archive::writer::{GlfArchiveWriter, GlfImage, GlfRecordWriter};
use std::fs;
use std::path::{Path, PathBuf};

/// 2024-05-01 12:00:00 UTC in milliseconds.
pub fn base_time() -> i64 {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap().timestamp_millis()
}

/// A fresh, empty directory under `test_output/`. Also routes library
/// logging to the test harness.
pub fn output_dir(name: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = Path::new("test_output").join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A 16 x 64 ping whose grid is filled with a byte derived from its time.
pub fn ping(time_millis: i64, device_id: u16) -> GlfImage {
    let mut image = GlfImage::filled(time_millis, device_id, 16, 64, (time_millis % 251) as u8);
    image.compress = time_millis % 2 == 0;
    image
}

/// Encode `(time, device)` pings as a GLF record stream.
pub fn glf_records(pings: &[(i64, u16)]) -> GlfRecordWriter {
    let mut writer = GlfRecordWriter::new();
    for &(time, device) in pings {
        writer.write_image(&ping(time, device)).unwrap();
    }
    writer
}

/// Wrap a record stream in a GLF archive.
pub fn write_glf(dir: &Path, name: &str, records: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let stem = name.trim_end_matches(".glf");
    let mut archive = GlfArchiveWriter::create(&path).unwrap();
    archive
        .write_session(stem, b"<config version=\"2\"/>", records, b"<logInfo/>")
        .unwrap();
    archive.finish().unwrap();
    path
}

/// A GLF archive holding one ping per `(time, device)`.
pub fn glf_session(dir: &Path, name: &str, pings: &[(i64, u16)]) -> PathBuf {
    let mut records = glf_records(pings);
    records.write_end_sentinel();
    write_glf(dir, name, &records.finish())
}

/// `count` pings from `device`, 100 ms apart, starting at `start`.
pub fn device_run(start: i64, device: u16, count: usize) -> Vec<(i64, u16)> {
    (0..count).map(|i| (start + i as i64 * 100, device)).collect()
}

/// One ECD target image record with a 2 x 3 grid.
pub fn ecd_target_image(time_millis: i64, rx1: i16, sos_avg: f64) -> Vec<u8> {
    let tx_time = CDate::from_millis(time_millis, 0).0;
    let mut buf = Vec::new();
    buf.put_u16_le(record_type::TARGET_IMAGE);
    buf.put_u16_le(0xCFCF);
    buf.put_bytes(0, 51);
    buf.put_i16_le(2);
    buf.put_f32_le(1500.0);
    buf.put_i16_le(rx1);
    buf.put_bytes(0, 14);
    buf.put_f64_le(tx_time);
    buf.put_f64_le(tx_time + 0.1);
    buf.put_f64_le(0.0);
    buf.put_f64_le(sos_avg);
    buf.put_i32_le(0x0C);
    buf.put_u8(1);
    buf.put_i32_le(3);
    buf.put_i32_le(0);
    buf.put_i32_le(2);
    buf.put_i32_le(0);
    buf.put_i32_le(3);
    buf.put_i32_le(0);
    buf.put_i32_le(2);
    buf.put_f64_le(-0.1);
    buf.put_f64_le(0.1);
    buf.put_i32_le(2);
    let rle = [7u8, 0, 3, 9, 1];
    buf.put_i32_le(rle.len() as i32);
    buf.put_slice(&rle);
    buf.put_i32_le(0);
    buf.put_u16_le(0xDEDE);
    buf
}

/// A sensor record, skipped by readers up to its end tag.
pub fn ecd_sensor() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u16_le(record_type::SENSOR);
    buf.put_u16_le(0xEFEF);
    buf.put_bytes(0x11, 24);
    buf.put_u16_le(0xDEDE);
    buf
}

pub fn write_ecd(dir: &Path, name: &str, records: &[Vec<u8>]) -> PathBuf {
    let mut buf = Vec::new();
    EcdFileHeader::default().encode(&mut buf);
    for record in records {
        buf.extend_from_slice(record);
    }
    buf.put_u16_le(record_type::END_TAG);
    let path = dir.join(name);
    fs::write(&path, buf).unwrap();
    path
}

/// An ARIS file with 4 beams by 8 samples per frame.
pub fn write_aris(dir: &Path, name: &str, serial_number: u32, times_millis: &[i64]) -> PathBuf {
    let mut buf = Vec::new();
    ArisFileHeader {
        version: 5,
        frame_count: times_millis.len() as u32,
        frame_rate: 15,
        high_resolution: 1,
        num_raw_beams: 4,
        serial_number,
    }
    .encode(&mut buf);
    for (i, &t) in times_millis.iter().enumerate() {
        ArisFrameHeader {
            frame_index: i as i32,
            frame_time: t as u64 * 1000,
            window_start: 1.0,
            window_length: 8.0,
            sound_speed: 1480.0,
            samples_per_beam: 8,
        }
        .encode(&mut buf);
        buf.put_bytes(i as u8, 32);
    }
    let path = dir.join(name);
    fs::write(&path, buf).unwrap();
    path
}
