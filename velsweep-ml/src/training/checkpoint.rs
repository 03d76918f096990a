//! Best-so-far checkpoint bookkeeping.
//!
//! Each run owns exactly one checkpoint path, derived from the model type
//! and the run name, which is overwritten every time validation loss
//! improves. A manifest in the model directory maps runs to their latest
//! checkpoint record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{MlError, Result};
use velsweep_core::persistence;

const MANIFEST_FILE: &str = "checkpoints.json";

/// Association between a run and its best-so-far weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub run: String,
    pub model: String,
    pub epoch: usize,
    pub validation_loss: f64,
    pub path: PathBuf,
    /// SHA-256 of the written file.
    pub hash: String,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
}

/// Checkpoint manager for one model directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    model_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Checkpoint location for a run, before any recorder extension.
    pub fn path_for(&self, model_name: &str, run_name: &str) -> PathBuf {
        self.model_dir.join(format!("model_{model_name}_{run_name}"))
    }

    /// Register a freshly written checkpoint file, replacing the run's previous record.
    pub fn record(
        &self,
        model_name: &str,
        run_name: &str,
        epoch: usize,
        validation_loss: f64,
        written: &Path,
    ) -> Result<CheckpointRecord> {
        let bytes = std::fs::read(written).map_err(|e| {
            MlError::checkpoint(format!("cannot read {}: {e}", written.display()))
        })?;
        let hash = format!("{:x}", Sha256::digest(&bytes));

        let record = CheckpointRecord {
            run: run_name.to_string(),
            model: model_name.to_string(),
            epoch,
            validation_loss,
            path: written.to_path_buf(),
            hash,
            size_bytes: bytes.len() as u64,
            saved_at: Utc::now(),
        };

        let mut manifest = self.load_manifest()?;
        manifest.insert(run_name.to_string(), record.clone());
        persistence::write_json_atomic(&self.manifest_path(), &manifest)?;

        Ok(record)
    }

    pub fn get(&self, run_name: &str) -> Result<Option<CheckpointRecord>> {
        Ok(self.load_manifest()?.remove(run_name))
    }

    pub fn list(&self) -> Result<Vec<CheckpointRecord>> {
        Ok(self.load_manifest()?.into_values().collect())
    }

    /// Lowest validation loss across all runs.
    pub fn best(&self) -> Result<Option<CheckpointRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .min_by(|a, b| a.validation_loss.total_cmp(&b.validation_loss)))
    }

    /// Whether the recorded hash still matches the file on disk.
    pub fn verify(&self, record: &CheckpointRecord) -> Result<bool> {
        let bytes = std::fs::read(&record.path)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)) == record.hash)
    }

    fn manifest_path(&self) -> PathBuf {
        self.model_dir.join(MANIFEST_FILE)
    }

    fn load_manifest(&self) -> Result<BTreeMap<String, CheckpointRecord>> {
        Ok(persistence::read_json(&self.manifest_path())?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(path: &Path, bytes: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_path_for_uses_model_and_run() {
        let manager = CheckpointManager::new("/models");
        assert_eq!(
            manager.path_for("SpectrogramCnn", "ab12cd34-3"),
            PathBuf::from("/models/model_SpectrogramCnn_ab12cd34-3")
        );
    }

    #[test]
    fn test_record_replaces_previous_entry() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let path = manager.path_for("Net", "r-0");

        write(&path, b"epoch0");
        manager.record("Net", "r-0", 0, 4.0, &path).unwrap();
        write(&path, b"epoch1");
        let latest = manager.record("Net", "r-0", 1, 2.0, &path).unwrap();

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], latest);
        assert_eq!(listed[0].epoch, 1);
        assert!(manager.verify(&latest).unwrap());
    }

    #[test]
    fn test_best_across_runs() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());
        for (run, loss) in [("a", 3.0), ("b", 1.5), ("c", 2.0)] {
            let path = manager.path_for("Net", run);
            write(&path, run.as_bytes());
            manager.record("Net", run, 0, loss, &path).unwrap();
        }
        assert_eq!(manager.best().unwrap().unwrap().run, "b");
        assert!(manager.get("c").unwrap().is_some());
        assert!(manager.get("zzz").unwrap().is_none());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let path = manager.path_for("Net", "r");
        write(&path, b"weights");
        let record = manager.record("Net", "r", 0, 1.0, &path).unwrap();
        write(&path, b"tampered");
        assert!(!manager.verify(&record).unwrap());
    }

    #[test]
    fn test_record_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let err = manager
            .record("Net", "r", 0, 1.0, &dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, MlError::Checkpoint(_)));
    }
}
