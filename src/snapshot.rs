//! Snapshot file for dictd
//!
//! The whole store is written as one JSON object. Saves go to a sibling
//! temporary file that is renamed over the target once fully written, so a
//! crash mid-save leaves the previous snapshot intact.

use crate::error::{DictError, Result};
use crate::store::Dictionary;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// On-disk snapshot of the store
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot if it exists, otherwise write an empty one
    pub fn open_or_initialize(&self) -> Result<Dictionary> {
        match fs::metadata(&self.path) {
            Ok(_) => {
                info!(path = %self.path.display(), "snapshot exists, loading");
                self.load()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot found, initializing");
                self.initialize()?;
                Ok(Dictionary::new())
            }
            Err(e) => Err(DictError::Snapshot(format!(
                "cannot stat {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Write a snapshot holding an empty store
    pub fn initialize(&self) -> Result<()> {
        self.save(&Dictionary::new())
    }

    /// Decode the snapshot file
    pub fn load(&self) -> Result<Dictionary> {
        let file = File::open(&self.path)?;
        let data: Dictionary = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            DictError::Snapshot(format!("cannot decode {}: {}", self.path.display(), e))
        })?;
        Ok(normalize(data))
    }

    /// Replace the snapshot with the given contents
    pub fn save(&self, data: &Dictionary) -> Result<()> {
        let temp_path = self.temp_path();
        if let Err(e) = write_file(&temp_path, data) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

fn write_file<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, data)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Drop empty entries and repeated values so the loaded data upholds the
/// store's invariants.
fn normalize(data: Dictionary) -> Dictionary {
    data.into_iter()
        .filter_map(|(key, values)| {
            let mut unique: Vec<String> = Vec::with_capacity(values.len());
            for value in values {
                if !unique.contains(&value) {
                    unique.push(value);
                }
            }
            if unique.is_empty() {
                warn!(key = %key, "dropping snapshot entry without values");
                None
            } else {
                Some((key, unique))
            }
        })
        .collect()
}
