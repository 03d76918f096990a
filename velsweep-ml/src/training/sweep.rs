//! Grid sweep: cartesian enumeration of hyperparameter candidates.
//!
//! The driver performs no pruning of its own. Every grid point is handed to
//! the trial callback exactly once, in odometer order over the sorted
//! parameter names; validity filtering happens inside the callback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{MlError, Result};
use crate::training::runner::RunOutcome;

/// Candidate values per hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterGrid {
    params: BTreeMap<String, Vec<Value>>,
}

impl HyperparameterGrid {
    /// Build a grid. Every value list must be non-empty.
    pub fn new(params: BTreeMap<String, Vec<Value>>) -> Result<Self> {
        if params.is_empty() {
            return Err(MlError::config("grid has no parameters"));
        }
        if let Some((name, _)) = params.iter().find(|(_, values)| values.is_empty()) {
            return Err(MlError::config(format!(
                "hyperparameter '{name}' has no candidate values"
            )));
        }
        Ok(Self { params })
    }

    /// Fail unless every named parameter is present.
    pub fn require(&self, names: &[&str]) -> Result<()> {
        match names.iter().find(|n| !self.params.contains_key(**n)) {
            Some(missing) => Err(MlError::MissingParameter(missing.to_string())),
            None => Ok(()),
        }
    }

    pub fn values(&self, name: &str) -> Option<&[Value]> {
        self.params.get(name).map(Vec::as_slice)
    }

    /// Product of every candidate list length.
    pub fn size(&self) -> usize {
        self.params.values().map(Vec::len).product()
    }

    pub fn combinations(&self) -> Combinations<'_> {
        Combinations {
            grid: self,
            cursor: Some(vec![0; self.params.len()]),
        }
    }
}

/// Iterator over every grid point.
pub struct Combinations<'a> {
    grid: &'a HyperparameterGrid,
    cursor: Option<Vec<usize>>,
}

impl Iterator for Combinations<'_> {
    type Item = Combination;

    fn next(&mut self) -> Option<Combination> {
        let cursor = self.cursor.as_mut()?;
        let values = self
            .grid
            .params
            .iter()
            .zip(cursor.iter())
            .map(|((name, candidates), &i)| (name.clone(), candidates[i].clone()))
            .collect();

        // Advance the odometer, last parameter fastest.
        let mut exhausted = true;
        for (slot, candidates) in cursor.iter_mut().zip(self.grid.params.values()).rev() {
            *slot += 1;
            if *slot < candidates.len() {
                exhausted = false;
                break;
            }
            *slot = 0;
        }
        if exhausted {
            self.cursor = None;
        }

        Some(Combination { values })
    }
}

/// One concrete value per grid parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Combination {
    values: BTreeMap<String, Value>,
}

impl Combination {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Copy with one parameter replaced or added.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Copy with one parameter removed.
    pub fn without(mut self, name: &str) -> Self {
        self.values.remove(name);
        self
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Combination {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// What a trial callback reports back to the driver.
#[derive(Debug, Clone)]
pub enum TrialOutcome {
    /// Rejected by the run filter. Nothing was built, loaded, or tracked.
    Skipped { reason: String },
    Finished(RunOutcome),
}

/// Terminal status of one grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    StoppedEarly,
    Skipped,
    Failed,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::StoppedEarly => "stopped_early",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        })
    }
}

/// A single sweep trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepTrial {
    pub trial_number: usize,
    pub run_name: String,
    pub params: Combination,
    pub status: TrialStatus,
    pub epochs_run: usize,
    pub best_validation_rmse: Option<f64>,
    pub detail: Option<String>,
}

/// Record of a finished sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    pub sweep_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trials: Vec<SweepTrial>,
    /// Index into `trials` of the lowest validation RMSE.
    pub best_trial: Option<usize>,
}

impl SweepSummary {
    pub fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status == status).count()
    }

    pub fn best(&self) -> Option<&SweepTrial> {
        self.best_trial.map(|i| &self.trials[i])
    }

    /// Write the summary to `<runs_dir>/sweep_<id>.json`.
    pub fn save(&self, runs_dir: &Path) -> Result<PathBuf> {
        let path = runs_dir.join(format!("sweep_{}.json", self.sweep_id));
        velsweep_core::persistence::write_json_atomic(&path, self)?;
        Ok(path)
    }
}

/// Drives one trial per grid point.
pub struct SweepDriver {
    id: String,
    project: Option<String>,
    grid: HyperparameterGrid,
}

impl SweepDriver {
    pub fn new(grid: HyperparameterGrid) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            project: None,
            grid,
        }
    }

    /// Tag the summary with the project it belongs to.
    pub fn with_project(mut self, name: impl Into<String>) -> Self {
        self.project = Some(name.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn grid(&self) -> &HyperparameterGrid {
        &self.grid
    }

    /// Unique run name for a trial.
    pub fn run_name(&self, trial_number: usize) -> String {
        format!("{}-{}", &self.id[..8], trial_number)
    }

    /// Visit every combination. A failing trial is recorded and the sweep moves on.
    pub fn run<F>(&self, mut trial: F) -> SweepSummary
    where
        F: FnMut(&str, &Combination) -> Result<TrialOutcome>,
    {
        let started_at = Utc::now();
        let total = self.grid.size();
        tracing::info!(
            sweep = %self.id,
            project = self.project.as_deref().unwrap_or("-"),
            total,
            "Starting grid sweep"
        );

        let mut trials = Vec::with_capacity(total);
        for (trial_number, combination) in self.grid.combinations().enumerate() {
            let run_name = self.run_name(trial_number);
            let record = match trial(&run_name, &combination) {
                Ok(TrialOutcome::Skipped { reason }) => {
                    tracing::debug!(run = %run_name, %reason, "Skipping combination");
                    SweepTrial {
                        trial_number,
                        run_name,
                        params: combination,
                        status: TrialStatus::Skipped,
                        epochs_run: 0,
                        best_validation_rmse: None,
                        detail: Some(reason),
                    }
                }
                Ok(TrialOutcome::Finished(outcome)) => SweepTrial {
                    trial_number,
                    run_name,
                    params: combination,
                    status: outcome.trial_status(),
                    epochs_run: outcome.epochs_run,
                    best_validation_rmse: outcome.best_validation_rmse(),
                    detail: None,
                },
                Err(e) => {
                    tracing::warn!(run = %run_name, error = %e, "Trial failed");
                    SweepTrial {
                        trial_number,
                        run_name,
                        params: combination,
                        status: TrialStatus::Failed,
                        epochs_run: 0,
                        best_validation_rmse: None,
                        detail: Some(e.to_string()),
                    }
                }
            };
            trials.push(record);
        }

        let best_trial = trials
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.best_validation_rmse.map(|rmse| (i, rmse)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i);

        let summary = SweepSummary {
            sweep_id: self.id.clone(),
            project: self.project.clone(),
            started_at,
            finished_at: Utc::now(),
            trials,
            best_trial,
        };
        tracing::info!(
            sweep = %self.id,
            completed = summary.count(TrialStatus::Completed),
            stopped_early = summary.count(TrialStatus::StoppedEarly),
            skipped = summary.count(TrialStatus::Skipped),
            failed = summary.count(TrialStatus::Failed),
            "Sweep finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn grid(entries: &[(&str, Value)]) -> HyperparameterGrid {
        let params = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_array().unwrap().clone()))
            .collect();
        HyperparameterGrid::new(params).unwrap()
    }

    #[test]
    fn test_grid_enumerates_full_product() {
        let g = grid(&[
            ("a", json!([1, 2, 3])),
            ("b", json!(["x", "y"])),
            ("c", json!([true])),
        ]);
        assert_eq!(g.size(), 6);

        let combos: Vec<Combination> = g.combinations().collect();
        assert_eq!(combos.len(), 6);
        let distinct: HashSet<String> = combos.iter().map(|c| c.to_json().to_string()).collect();
        assert_eq!(distinct.len(), 6);
        assert_eq!(combos[0].get("a"), Some(&json!(1)));
        assert_eq!(combos[1].get("b"), Some(&json!("y")));
    }

    #[test]
    fn test_grid_rejects_empty_values() {
        let mut params = BTreeMap::new();
        params.insert("momentum".to_string(), vec![]);
        assert!(HyperparameterGrid::new(params).is_err());
        assert!(HyperparameterGrid::new(BTreeMap::new()).is_err());
    }

    #[test]
    fn test_require_reports_missing() {
        let g = grid(&[("a", json!([1]))]);
        assert!(g.require(&["a"]).is_ok());
        assert!(matches!(
            g.require(&["a", "optimizer"]),
            Err(MlError::MissingParameter(n)) if n == "optimizer"
        ));
    }

    #[test]
    fn test_driver_continues_after_failure() {
        let driver = SweepDriver::new(grid(&[("n", json!([0, 1, 2, 3]))]));
        let mut seen = Vec::new();
        let summary = driver.run(|name, combo| {
            seen.push(name.to_string());
            match combo.get("n").and_then(Value::as_u64) {
                Some(1) => Err(MlError::unrecognized("optimizer", "Lion")),
                Some(2) => Ok(TrialOutcome::Skipped {
                    reason: "filtered".into(),
                }),
                _ => Ok(TrialOutcome::Finished(RunOutcome::completed_for_test(3, 2.0))),
            }
        });

        assert_eq!(seen.len(), 4);
        assert_eq!(summary.trials.len(), 4);
        assert_eq!(summary.count(TrialStatus::Failed), 1);
        assert_eq!(summary.count(TrialStatus::Skipped), 1);
        assert_eq!(summary.count(TrialStatus::Completed), 2);
        assert!(summary.trials[1].detail.as_deref().unwrap().contains("Lion"));
        assert_eq!(summary.best().unwrap().best_validation_rmse, Some(2.0));
    }

    #[test]
    fn test_run_names_are_unique() {
        let driver = SweepDriver::new(grid(&[("n", json!([0, 1]))]));
        assert_ne!(driver.run_name(0), driver.run_name(1));
        assert!(driver.run_name(0).starts_with(&driver.id()[..8]));
    }

    #[test]
    fn test_summary_save() {
        let dir = tempfile::TempDir::new().unwrap();
        let driver = SweepDriver::new(grid(&[("n", json!([0]))])).with_project("velocity-cnn");
        let summary = driver.run(|_, _| {
            Ok(TrialOutcome::Skipped {
                reason: "x".into(),
            })
        });
        let path = summary.save(dir.path()).unwrap();
        let loaded: SweepSummary = velsweep_core::persistence::read_json(&path)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.trials.len(), 1);
        assert_eq!(loaded.project.as_deref(), Some("velocity-cnn"));
    }
}
