//! Spectrogram datasets backed by a split directory and the STMF target table.
//!
//! Layout under the data root:
//!
//! ```text
//! <data_root>/
//!   stmf_synthetic_data.csv   file,target
//!   train/<file>.json
//!   validation/<file>.json
//! ```

use burn::data::dataset::Dataset;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::data::spectrogram::Spectrogram;
use crate::data::transform::TransformPipeline;
use crate::error::{MlError, Result};

pub const TRAIN_SPLIT: &str = "train";
pub const VALIDATION_SPLIT: &str = "validation";

/// One preprocessed sample.
#[derive(Debug, Clone)]
pub struct SpectrogramItem {
    pub file: String,
    pub spectrogram: Spectrogram,
    /// Radial velocity.
    pub target: f32,
}

/// In-memory dataset. Clones share the same items.
#[derive(Debug, Clone, Default)]
pub struct SpectrogramDataset {
    items: Arc<Vec<SpectrogramItem>>,
}

impl SpectrogramDataset {
    pub fn from_items(items: Vec<SpectrogramItem>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    /// Load every `*.json` spectrogram of one split, in file-name order.
    ///
    /// Files without a row in `targets` are skipped with a warning.
    pub fn load_split(
        data_root: &Path,
        split: &str,
        targets: &BTreeMap<String, f32>,
        pipeline: &TransformPipeline,
    ) -> Result<Self> {
        let dir = data_root.join(split);
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| MlError::data(format!("cannot list {}: {e}", dir.display())))?;

        let mut files: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut items = Vec::with_capacity(files.len());
        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(&target) = targets.get(stem) else {
                tracing::warn!(file = %path.display(), "No STMF target for spectrogram, skipping");
                continue;
            };
            let spectrogram = pipeline.apply(Spectrogram::load(&path)?)?;
            items.push(SpectrogramItem {
                file: stem.to_string(),
                spectrogram,
                target,
            });
        }

        tracing::info!(split, samples = items.len(), dir = %dir.display(), "Loaded dataset split");
        Ok(Self::from_items(items))
    }

    pub fn items(&self) -> &[SpectrogramItem] {
        &self.items
    }
}

impl Dataset<SpectrogramItem> for SpectrogramDataset {
    fn get(&self, index: usize) -> Option<SpectrogramItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Parse the STMF table into `file -> target`.
///
/// The header must name a `file` and a `target` column; other columns are ignored.
pub fn read_stmf(path: &Path) -> Result<BTreeMap<String, f32>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| MlError::data(format!("cannot read {}: {e}", path.display())))?;
    parse_stmf(&content)
}

fn parse_stmf(content: &str) -> Result<BTreeMap<String, f32>> {
    let mut lines = content.lines();
    let columns: Vec<String> = lines
        .next()
        .ok_or_else(|| MlError::data("empty STMF file"))?
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .collect();

    let column = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| MlError::data(format!("STMF header has no '{name}' column")))
    };
    let file_idx = column("file")?;
    let target_idx = column("target")?;

    let mut targets = BTreeMap::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split(',').map(|s| s.trim().trim_matches('"')).collect();
        let (Some(file), Some(target)) = (cells.get(file_idx), cells.get(target_idx)) else {
            return Err(MlError::data(format!("STMF row {} is short", line_no + 2)));
        };
        let target: f32 = target.parse().map_err(|_| {
            MlError::data(format!("STMF row {}: bad target '{target}'", line_no + 2))
        })?;
        // Rows may name the file with or without its extension.
        let key = file.strip_suffix(".json").unwrap_or(file);
        targets.insert(key.to_string(), target);
    }
    Ok(targets)
}
