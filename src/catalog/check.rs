// src/catalog/check.rs
use crate::catalog::single::SingleFileCatalog;
use crate::config::CatalogConfig;
use crate::container::FastIndex;
use crate::error::{Result, SonarError};
use crate::types::ArchiveFormat;
use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};

/// Which sidecars a check had to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckOutcome(u32);

impl CheckOutcome {
    pub const FAST_INDEX_ADDED: u32 = 1;
    pub const CATALOG_ADDED: u32 = 1 << 1;

    pub fn new(bits: u32) -> Self {
        CheckOutcome(bits)
    }

    pub fn empty() -> Self {
        CheckOutcome(0)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn fast_index_added(&self) -> bool {
        self.0 & Self::FAST_INDEX_ADDED != 0
    }

    pub fn catalog_added(&self) -> bool {
        self.0 & Self::CATALOG_ADDED != 0
    }

    /// Both sidecars were already present.
    pub fn is_unchanged(&self) -> bool {
        self.0 == 0
    }

    fn insert(&mut self, bits: u32) {
        self.0 |= bits;
    }
}

/// Pre-builds missing sidecars so later opens are instant.
pub struct CatalogCheck {
    config: CatalogConfig,
}

impl CatalogCheck {
    /// Sidecars are always written by a check, whatever `config` says.
    pub fn new(config: CatalogConfig) -> Self {
        CatalogCheck {
            config: config.with_sidecars(true),
        }
    }

    /// Check every file, keeping going past failures.
    pub fn check_catalogs<P: AsRef<Path>>(paths: &[P], config: CatalogConfig) -> Vec<(PathBuf, Result<CheckOutcome>)> {
        let check = CatalogCheck::new(config);
        paths
            .iter()
            .map(|p| (p.as_ref().to_path_buf(), check.check(p.as_ref())))
            .collect()
    }

    /// Create whichever of the fast index and catalog sidecars `path` lacks.
    pub fn check(&self, path: &Path) -> Result<CheckOutcome> {
        if !path.exists() {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} does not exist", path.display())).into());
        }
        let format =
            ArchiveFormat::from_path(path).ok_or_else(|| SonarError::UnsupportedArchive(path.display().to_string()))?;

        let mut outcome = CheckOutcome::empty();
        if format.is_container() && !FastIndex::sidecar_path(path).exists() {
            match FastIndex::build(path, &self.config) {
                Ok(_) => outcome.insert(CheckOutcome::FAST_INDEX_ADDED),
                Err(e) if e.is_container_structure() => {
                    warn!("{} cannot be fast indexed: {}", path.display(), e);
                }
                Err(e) => return Err(e),
            }
        }

        if !SingleFileCatalog::sidecar_path(path).exists() {
            SingleFileCatalog::build(path, self.config.clone())?.save()?;
            outcome.insert(CheckOutcome::CATALOG_ADDED);
        }
        debug!("checked {}: {:?}", path.display(), outcome);
        Ok(outcome)
    }
}
