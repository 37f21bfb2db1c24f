// src/utils/sidecar.rs
use crate::error::{Result, SonarError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Append `suffix` to the full file name, keeping any existing extension.
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Read a versioned sidecar. `Ok(None)` means no sidecar exists.
pub fn read_sidecar<T: DeserializeOwned>(path: &Path, magic: &[u8; 4], version: u32) -> Result<Option<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);

    let mut found = [0u8; 4];
    reader.read_exact(&mut found)?;
    if &found != magic {
        return Err(SonarError::Sidecar(format!(
            "{}: expected magic {:?}, found {:?}",
            path.display(),
            String::from_utf8_lossy(magic),
            String::from_utf8_lossy(&found)
        )));
    }
    let found_version = reader.read_u32::<LittleEndian>()?;
    if found_version != version {
        return Err(SonarError::Sidecar(format!(
            "{}: format version {} (expected {})",
            path.display(),
            found_version,
            version
        )));
    }
    let value = bincode::deserialize_from(&mut reader)?;
    Ok(Some(value))
}

/// Write a versioned sidecar atomically: the content goes to a temporary file
/// in the same directory which then replaces `path`.
pub fn write_sidecar<T: Serialize>(path: &Path, magic: &[u8; 4], version: u32, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        writer.write_all(magic)?;
        writer.write_u32::<LittleEndian>(version)?;
        bincode::serialize_into(&mut writer, value)?;
        writer.flush()?;
    }
    temp.persist(path).map_err(|e| SonarError::Io(e.error))?;
    Ok(())
}

/// Remove a sidecar, ignoring a missing file.
pub fn remove_sidecar(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        values: Vec<u32>,
        name: String,
    }

    #[test]
    fn test_sidecar_path_appends() {
        let p = sidecar_path(Path::new("/data/file.glf"), ".ind");
        assert_eq!(p, PathBuf::from("/data/file.glf.ind"));
        let c = sidecar_path(Path::new("file.ecd"), "x");
        assert_eq!(c, PathBuf::from("file.ecdx"));
    }

    #[test]
    fn test_round_trip_and_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        let value = Sample { values: vec![1, 2, 3], name: "x".into() };

        write_sidecar(&path, b"TEST", 2, &value).unwrap();
        let back: Option<Sample> = read_sidecar(&path, b"TEST", 2).unwrap();
        assert_eq!(back, Some(value));

        let wrong_version = read_sidecar::<Sample>(&path, b"TEST", 3);
        assert!(matches!(wrong_version, Err(SonarError::Sidecar(_))));
        let wrong_magic = read_sidecar::<Sample>(&path, b"NOPE", 2);
        assert!(matches!(wrong_magic, Err(SonarError::Sidecar(_))));
    }

    #[test]
    fn test_missing_sidecar_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<Sample> = read_sidecar(&dir.path().join("nope"), b"TEST", 1).unwrap();
        assert!(missing.is_none());
        remove_sidecar(&dir.path().join("nope")).unwrap();
    }
}
