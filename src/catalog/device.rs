// src/catalog/device.rs
use serde::{Deserialize, Serialize};

/// Per-device summary accumulated while a catalog is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDeviceInfo {
    pub device_id: u32,
    /// Order in which the device first appeared.
    pub device_index: u32,
    pub frame_count: usize,
    /// Ordinal of the device's first record within its file.
    pub first_ordinal: u32,
}

impl CatalogDeviceInfo {
    pub fn new(device_id: u32, device_index: u32, first_ordinal: u32) -> Self {
        CatalogDeviceInfo {
            device_id,
            device_index,
            frame_count: 0,
            first_ordinal,
        }
    }

    pub fn add_frame(&mut self) {
        self.frame_count += 1;
    }

    pub fn add_frame_count(&mut self, n: usize) {
        self.frame_count += n;
    }
}
