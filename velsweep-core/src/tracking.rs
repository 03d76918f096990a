//! Experiment tracking.
//!
//! Every accepted training run reports through a [`Tracker`]: one
//! `start_run`, a `log` call per epoch (plus one for the parameter count),
//! and a `finish_run` with the terminal status. Rejected combinations never
//! reach the tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::persistence;

/// Named scalar metrics for a single log call.
pub type Metrics = BTreeMap<String, f64>;

/// Terminal or in-flight state of a tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    StoppedEarly,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::StoppedEarly => "stopped_early",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Sink for run metrics.
pub trait Tracker: Send {
    fn start_run(&mut self, run_name: &str, config: &serde_json::Value) -> Result<()>;
    fn log(&mut self, metrics: &Metrics) -> Result<()>;
    fn finish_run(&mut self, status: RunStatus) -> Result<()>;
}

/// One line of `metrics.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEntry {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub metrics: Metrics,
}

/// Contents of `summary.json`, written when a run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: String,
    pub status: RunStatus,
    pub steps: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Latest value seen for every metric key.
    pub latest: Metrics,
}

struct ActiveRun {
    name: String,
    dir: PathBuf,
    step: usize,
    started_at: DateTime<Utc>,
    latest: Metrics,
}

/// File-backed tracker: one directory per run under `runs_dir`.
pub struct JsonlTracker {
    runs_dir: PathBuf,
    active: Option<ActiveRun>,
}

impl JsonlTracker {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            active: None,
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Load a finished run's summary, if one was written.
    pub fn load_summary(&self, run_name: &str) -> Result<Option<RunSummary>> {
        let path = self.runs_dir.join(run_name).join("summary.json");
        Ok(persistence::read_json(&path)?)
    }

    fn active_mut(&mut self) -> Result<&mut ActiveRun> {
        self.active
            .as_mut()
            .ok_or_else(|| CoreError::tracking("no active run"))
    }
}

impl Tracker for JsonlTracker {
    fn start_run(&mut self, run_name: &str, config: &serde_json::Value) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(CoreError::tracking(format!(
                "run '{}' is still active",
                active.name
            )));
        }
        let dir = self.runs_dir.join(run_name);
        persistence::write_json_atomic(&dir.join("config.json"), config)?;
        tracing::debug!(run = run_name, dir = %dir.display(), "Tracking run started");
        self.active = Some(ActiveRun {
            name: run_name.to_string(),
            dir,
            step: 0,
            started_at: Utc::now(),
            latest: Metrics::new(),
        });
        Ok(())
    }

    fn log(&mut self, metrics: &Metrics) -> Result<()> {
        let active = self.active_mut()?;
        let entry = MetricsEntry {
            step: active.step,
            timestamp: Utc::now(),
            metrics: metrics.clone(),
        };
        persistence::append_json_line(&active.dir.join("metrics.jsonl"), &entry)?;
        active.step += 1;
        active
            .latest
            .extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(())
    }

    fn finish_run(&mut self, status: RunStatus) -> Result<()> {
        let active = self
            .active
            .take()
            .ok_or_else(|| CoreError::tracking("no active run"))?;
        let summary = RunSummary {
            run: active.name,
            status,
            steps: active.step,
            started_at: active.started_at,
            finished_at: Utc::now(),
            latest: active.latest,
        };
        persistence::write_json_atomic(&active.dir.join("summary.json"), &summary)?;
        Ok(())
    }
}

/// A run captured by [`MemoryTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRun {
    pub name: String,
    pub config: serde_json::Value,
    pub logs: Vec<Metrics>,
    pub status: Option<RunStatus>,
}

impl TrackedRun {
    /// Every value logged under `key`, in order.
    pub fn series(&self, key: &str) -> Vec<f64> {
        self.logs.iter().filter_map(|m| m.get(key).copied()).collect()
    }
}

/// In-memory tracker for tests.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    pub runs: Vec<TrackedRun>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&mut self) -> Result<&mut TrackedRun> {
        match self.runs.last_mut() {
            Some(run) if run.status.is_none() => Ok(run),
            _ => Err(CoreError::tracking("no active run")),
        }
    }
}

impl Tracker for MemoryTracker {
    fn start_run(&mut self, run_name: &str, config: &serde_json::Value) -> Result<()> {
        self.runs.push(TrackedRun {
            name: run_name.to_string(),
            config: config.clone(),
            logs: Vec::new(),
            status: None,
        });
        Ok(())
    }

    fn log(&mut self, metrics: &Metrics) -> Result<()> {
        self.current()?.logs.push(metrics.clone());
        Ok(())
    }

    fn finish_run(&mut self, status: RunStatus) -> Result<()> {
        self.current()?.status = Some(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics(pairs: &[(&str, f64)]) -> Metrics {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_jsonl_tracker_writes_run_files() {
        let dir = TempDir::new().unwrap();
        let mut tracker = JsonlTracker::new(dir.path());

        tracker
            .start_run("sweep-0", &serde_json::json!({"optimizer": "SGD"}))
            .unwrap();
        tracker.log(&metrics(&[("total_parameters", 1234.0)])).unwrap();
        tracker
            .log(&metrics(&[("train_loss", 4.0), ("validation_rmse", 3.0)]))
            .unwrap();
        tracker.finish_run(RunStatus::Completed).unwrap();

        let run_dir = dir.path().join("sweep-0");
        assert!(run_dir.join("config.json").exists());
        let lines = std::fs::read_to_string(run_dir.join("metrics.jsonl")).unwrap();
        assert_eq!(lines.lines().count(), 2);

        let summary = tracker.load_summary("sweep-0").unwrap().unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.steps, 2);
        assert_eq!(summary.latest["total_parameters"], 1234.0);
        assert_eq!(summary.latest["validation_rmse"], 3.0);
    }

    #[test]
    fn test_jsonl_tracker_rejects_log_without_run() {
        let dir = TempDir::new().unwrap();
        let mut tracker = JsonlTracker::new(dir.path());
        assert!(tracker.log(&metrics(&[("x", 1.0)])).is_err());
        assert!(tracker.finish_run(RunStatus::Failed).is_err());
    }

    #[test]
    fn test_jsonl_tracker_rejects_overlapping_runs() {
        let dir = TempDir::new().unwrap();
        let mut tracker = JsonlTracker::new(dir.path());
        tracker.start_run("a", &serde_json::Value::Null).unwrap();
        assert!(tracker.start_run("b", &serde_json::Value::Null).is_err());
    }

    #[test]
    fn test_memory_tracker_series() {
        let mut tracker = MemoryTracker::new();
        tracker.start_run("r", &serde_json::Value::Null).unwrap();
        tracker.log(&metrics(&[("loss", 2.0)])).unwrap();
        tracker.log(&metrics(&[("loss", 1.0)])).unwrap();
        tracker.finish_run(RunStatus::StoppedEarly).unwrap();

        let run = &tracker.runs[0];
        assert_eq!(run.series("loss"), vec![2.0, 1.0]);
        assert_eq!(run.status, Some(RunStatus::StoppedEarly));
        assert!(tracker.log(&metrics(&[("loss", 0.5)])).is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RunStatus::StoppedEarly.to_string(), "stopped_early");
    }
}
