// src/config.rs
//! Options controlling how archives are scanned, validated and cached.
//!
//! ```rust
//! use sonar_archive::config::{CatalogConfig, ScanPolicy};
//!
//! let config = CatalogConfig::default()
//!     .with_scan_policy(ScanPolicy::Strict)
//!     .with_utc_offset_millis(3_600_000)
//!     .with_sidecars(false);
//! assert_eq!(config.recovery_window, 214);
//! ```

/// How strictly the container scanner reconciles chunk totals with the
/// uncompressed size declared in a local file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPolicy {
    /// Log a mismatch and index the chunks that are actually present.
    #[default]
    Permissive,
    /// Treat a mismatch, or any unrecognised entry, as a structure error.
    Strict,
}

/// What a catalog build does with a record that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Drop the record and keep scanning, using the per-format recovery
    /// rules (window skip for GLF, single-record discard for ECD).
    #[default]
    Lenient,
    /// Abort the file's scan and surface the corruption error.
    Strict,
}

/// Default byte window skipped after a GLF record whose leading guard is bad.
pub const DEFAULT_RECOVERY_WINDOW: u64 = 214;

/// Default capacity of the buffered physical reader.
pub const DEFAULT_BUFFER_CAPACITY: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    pub scan_policy: ScanPolicy,
    pub recovery: RecoveryPolicy,
    /// Bytes skipped to resynchronise after a corrupt GLF record.
    pub recovery_window: u64,
    /// Subtracted from converted record times. Archives written in local
    /// time need the zone offset here to produce UTC.
    pub utc_offset_millis: i64,
    /// Read and write `.ind` and catalog sidecar files.
    pub use_sidecars: bool,
    pub buffer_capacity: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            scan_policy: ScanPolicy::Permissive,
            recovery: RecoveryPolicy::Lenient,
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            utc_offset_millis: 0,
            use_sidecars: true,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl CatalogConfig {
    pub fn with_scan_policy(mut self, policy: ScanPolicy) -> Self {
        self.scan_policy = policy;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_recovery_window(mut self, window: u64) -> Self {
        self.recovery_window = window;
        self
    }

    pub fn with_utc_offset_millis(mut self, offset: i64) -> Self {
        self.utc_offset_millis = offset;
        self
    }

    pub fn with_sidecars(mut self, enabled: bool) -> Self {
        self.use_sidecars = enabled;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(512);
        self
    }
}
