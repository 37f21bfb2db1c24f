// src/types.rs
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Archive families understood by the catalog layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// Chunked pseudo-zip container holding `.cfg`, `.dat` and `.xml` entries.
    Glf,
    /// The GLF record stream stored as a bare file.
    GlfData,
    /// Flat ECD record stream.
    Ecd,
    /// Fixed-header ARIS frame file.
    Aris,
}

impl ArchiveFormat {
    /// Identify the format from a file extension (case-insensitive).
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "glf" => Some(ArchiveFormat::Glf),
            "dat" => Some(ArchiveFormat::GlfData),
            "ecd" => Some(ArchiveFormat::Ecd),
            "aris" => Some(ArchiveFormat::Aris),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Glf => "glf",
            ArchiveFormat::GlfData => "dat",
            ArchiveFormat::Ecd => "ecd",
            ArchiveFormat::Aris => "aris",
        }
    }

    /// Whether records are read through the chunked container layer.
    pub fn is_container(&self) -> bool {
        matches!(self, ArchiveFormat::Glf)
    }
}

/// A sonar "C date": seconds since 1980-01-01 as written by the Gemini
/// software, in the recording machine's local time.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct CDate(pub f64);

impl CDate {
    /// Seconds between the Unix epoch and the C date epoch (3652 days).
    pub const EPOCH_OFFSET_SECONDS: f64 = 3652.0 * 86400.0;

    /// Convert to Unix milliseconds, removing the given zone offset. Rounds
    /// to the nearest millisecond so written times read back unchanged.
    pub fn to_millis(self, utc_offset_millis: i64) -> i64 {
        ((self.0 + Self::EPOCH_OFFSET_SECONDS) * 1000.0).round() as i64 - utc_offset_millis
    }

    pub fn from_millis(millis: i64, utc_offset_millis: i64) -> Self {
        CDate((millis + utc_offset_millis) as f64 / 1000.0 - Self::EPOCH_OFFSET_SECONDS)
    }

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        CDate::from_millis(since_epoch.as_millis() as i64, 0)
    }
}

/// Convert ARIS frame time (microseconds since 1970) to milliseconds.
pub fn micros_to_millis(micros: u64) -> i64 {
    (micros / 1000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(ArchiveFormat::from_path("a/b/log_2024.GLF"), Some(ArchiveFormat::Glf));
        assert_eq!(ArchiveFormat::from_path("x.dat"), Some(ArchiveFormat::GlfData));
        assert_eq!(ArchiveFormat::from_path("x.ecd"), Some(ArchiveFormat::Ecd));
        assert_eq!(ArchiveFormat::from_path("x.aris"), Some(ArchiveFormat::Aris));
        assert_eq!(ArchiveFormat::from_path("x.txt"), None);
        assert_eq!(ArchiveFormat::from_path("noext"), None);
    }

    #[test]
    fn test_cdate_epoch() {
        // 1980-01-01T00:00:00Z
        assert_eq!(CDate(0.0).to_millis(0), 315_532_800_000);
        assert_eq!(CDate(1.5).to_millis(0), 315_532_801_500);
    }

    #[test]
    fn test_cdate_offset_round_trip() {
        let millis = 1_700_000_000_000;
        let cdate = CDate::from_millis(millis, 3_600_000);
        assert_eq!(cdate.to_millis(3_600_000), millis);

        for ms in [1_700_000_000_001, 1_700_000_000_100, 1_714_564_800_999] {
            assert_eq!(CDate::from_millis(ms, 0).to_millis(0), ms);
        }
    }
}
