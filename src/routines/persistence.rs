use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MimcError;
use crate::routines::store::SampleStore;
use crate::structs::profile::IndexProfile;

/// Everything needed to continue a run after an interruption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub tag: String,
    /// Scalar configuration parameters the run was started with
    pub parameters: BTreeMap<String, f64>,
    pub iteration: usize,
    /// Position in the tolerance sequence
    pub stage: usize,
    pub total_cost: f64,
    pub profile: IndexProfile,
    pub samples: SampleStore,
    pub saved: DateTime<Utc>,
}

/// Storage for [RunRecord]s, keyed by run tag
pub trait Persistence {
    fn save(&mut self, record: &RunRecord) -> Result<(), MimcError>;
    fn load(&self, tag: &str) -> Result<RunRecord, MimcError>;
}

/// Stores every record as `<tag>.json` in a folder
#[derive(Debug, Clone)]
pub struct JsonStore {
    folder: PathBuf,
}

impl JsonStore {
    pub fn new(folder: impl AsRef<Path>) -> Self {
        JsonStore {
            folder: folder.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, tag: &str) -> PathBuf {
        self.folder.join(format!("{}.json", tag))
    }
}

impl Persistence for JsonStore {
    fn save(&mut self, record: &RunRecord) -> Result<(), MimcError> {
        fs::create_dir_all(&self.folder)?;
        let path = self.path(&record.tag);
        // Replace the record atomically
        let partial = path.with_extension("json.partial");
        fs::write(&partial, serde_json::to_vec(record)?)?;
        fs::rename(&partial, &path)?;
        tracing::debug!("Checkpoint written to {:?}", path);
        Ok(())
    }

    fn load(&self, tag: &str) -> Result<RunRecord, MimcError> {
        let path = self.path(tag);
        let contents = fs::read_to_string(&path)
            .map_err(|e| MimcError::Persistence(format!("Unable to read {:?}: {}", path, e)))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Keeps records in memory, clones share the same records
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<String, RunRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn tags(&self) -> Vec<String> {
        self.records
            .lock()
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Persistence for MemoryStore {
    fn save(&mut self, record: &RunRecord) -> Result<(), MimcError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| MimcError::Persistence(e.to_string()))?;
        records.insert(record.tag.clone(), record.clone());
        Ok(())
    }

    fn load(&self, tag: &str) -> Result<RunRecord, MimcError> {
        let records = self
            .records
            .lock()
            .map_err(|e| MimcError::Persistence(e.to_string()))?;
        records
            .get(tag)
            .cloned()
            .ok_or_else(|| MimcError::Persistence(format!("No record with tag '{}'", tag)))
    }
}
