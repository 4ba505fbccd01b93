//! # Local Persisted State
//!
//! A tiny key-value store: each fixed key maps to one JSON document under
//! the data directory. Documents are read once at startup and rewritten in
//! full on every change, going through a temporary file and a rename so a
//! crash mid-write leaves the previous version intact.

pub mod journal;
pub mod models;

use crate::error::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub use journal::{AdherenceSummary, Journal};
pub use models::{Discomfort, Medication, SymptomLog, Urgency};

/// Key of the medication list.
pub const MEDICATIONS_KEY: &str = "prosterite_app_meds_v1";
/// Key of the symptom log list.
pub const SYMPTOM_LOGS_KEY: &str = "prosterite_app_logs_v1";

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::StorageError(format!("cannot create {}: {}", dir.display(), e))
        })?;
        debug!("Local store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Read the document stored under `key`, or `None` if it was never
    /// written.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_str(&raw).map_err(|e| {
            AppError::StorageError(format!("{} is not valid: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }

    /// Replace the document stored under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        trace!("Wrote {}", path.display());
        Ok(())
    }
}
