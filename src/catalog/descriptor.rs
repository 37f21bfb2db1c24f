// src/catalog/descriptor.rs
use crate::record::{DecodedImage, LoadedImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where one image record lives and when it was taken. Holds no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDescriptor {
    /// Logical offset of the record in the archive's data stream.
    pub file_position: u64,
    pub timestamp_utc_millis: i64,
    pub device_id: u32,
    /// Position of the device among the devices seen in this file.
    pub sonar_index: u32,
    /// Image number within the file, counting from 0.
    pub ordinal: u32,
}

impl RecordDescriptor {
    /// Copy the cataloguing fields out of a decoded image, dropping any
    /// reference to its payload.
    pub fn detach(image: &DecodedImage, sonar_index: u32, ordinal: u32) -> Self {
        RecordDescriptor {
            file_position: image.position,
            timestamp_utc_millis: image.time_millis,
            device_id: image.device_id,
            sonar_index,
            ordinal,
        }
    }
}

/// A catalog entry: the descriptor plus a lazily attached payload.
#[derive(Debug)]
pub struct CatalogRecord {
    descriptor: RecordDescriptor,
    loaded: Mutex<Option<Arc<LoadedImage>>>,
}

impl CatalogRecord {
    pub fn new(descriptor: RecordDescriptor) -> Self {
        CatalogRecord {
            descriptor,
            loaded: Mutex::new(None),
        }
    }

    pub fn descriptor(&self) -> &RecordDescriptor {
        &self.descriptor
    }

    pub fn time(&self) -> i64 {
        self.descriptor.timestamp_utc_millis
    }

    pub fn device_id(&self) -> u32 {
        self.descriptor.device_id
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    pub fn loaded(&self) -> Option<Arc<LoadedImage>> {
        self.loaded.lock().clone()
    }

    pub(crate) fn attach(&self, image: Arc<LoadedImage>) {
        *self.loaded.lock() = Some(image);
    }

    /// Drop the attached payload. Returns whether one was attached.
    pub fn free(&self) -> bool {
        self.loaded.lock().take().is_some()
    }
}

impl Clone for CatalogRecord {
    /// Clones share the descriptor only; the payload slot starts empty.
    fn clone(&self) -> Self {
        CatalogRecord::new(self.descriptor)
    }
}
