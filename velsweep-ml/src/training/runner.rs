//! Epoch loop shared by every training run.
//!
//! The loop owns the per-run state (epoch index, early-stop monitor, best
//! validation loss) and the side effects around it: metric logging and
//! best-so-far checkpointing. The numeric work lives behind [`Learner`].

use std::path::{Path, PathBuf};

use velsweep_core::{RunStatus, Tracker};

use crate::error::{MlError, Result};
use crate::training::callbacks::{EarlyStopMonitor, MonitorState};
use crate::training::checkpoint::{CheckpointManager, CheckpointRecord};
use crate::training::metrics::{EpochMetrics, LossAccumulator, TrainingMetrics};
use crate::training::sweep::TrialStatus;

/// One model plus its optimizer and data, driven epoch by epoch.
pub trait Learner {
    /// Model type name, used in checkpoint paths.
    fn model_name(&self) -> &str;

    /// One optimization pass over the training data.
    fn train_epoch(&mut self, epoch: usize) -> Result<LossAccumulator>;

    /// One pass over the validation data with gradients disabled.
    fn validate_epoch(&mut self, epoch: usize) -> Result<LossAccumulator>;

    /// Persist the current parameters at `path`, returning the file written.
    fn save_checkpoint(&self, path: &Path) -> Result<PathBuf>;
}

/// Mutable state of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub epoch: usize,
    pub monitor: EarlyStopMonitor,
    pub history: TrainingMetrics,
}

impl RunState {
    pub fn new(monitor: EarlyStopMonitor) -> Self {
        Self {
            epoch: 0,
            monitor,
            history: TrainingMetrics::default(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: MonitorState,
    pub epochs_run: usize,
    pub violations: usize,
    pub history: TrainingMetrics,
    pub checkpoint: Option<CheckpointRecord>,
}

impl RunOutcome {
    pub fn best_validation_rmse(&self) -> Option<f64> {
        self.history.best_validation_rmse()
    }

    pub fn trial_status(&self) -> TrialStatus {
        match self.state {
            MonitorState::StoppedEarly => TrialStatus::StoppedEarly,
            _ => TrialStatus::Completed,
        }
    }

    pub fn run_status(&self) -> RunStatus {
        match self.state {
            MonitorState::StoppedEarly => RunStatus::StoppedEarly,
            _ => RunStatus::Completed,
        }
    }

    #[cfg(test)]
    pub(crate) fn completed_for_test(epochs_run: usize, best_rmse: f64) -> Self {
        Self {
            state: MonitorState::Completed,
            epochs_run,
            violations: 0,
            history: TrainingMetrics {
                epochs: Vec::new(),
                best_epoch: Some(0),
                best_validation_loss: Some(best_rmse * best_rmse),
            },
            checkpoint: None,
        }
    }
}

/// Runs epochs until the configured count is reached or the monitor stops the run.
pub struct EpochLoop<'a> {
    checkpoints: &'a CheckpointManager,
    tracker: &'a mut dyn Tracker,
    monitor: EarlyStopMonitor,
}

impl<'a> EpochLoop<'a> {
    pub fn new(
        checkpoints: &'a CheckpointManager,
        tracker: &'a mut dyn Tracker,
        monitor: EarlyStopMonitor,
    ) -> Self {
        Self {
            checkpoints,
            tracker,
            monitor,
        }
    }

    pub fn run<L: Learner>(
        &mut self,
        learner: &mut L,
        run_name: &str,
        epochs: usize,
    ) -> Result<RunOutcome> {
        let mut state = RunState::new(self.monitor.clone());
        let checkpoint_path = self.checkpoints.path_for(learner.model_name(), run_name);
        let mut checkpoint = None;

        while state.epoch < epochs {
            let epoch = state.epoch;
            let train_loss = learner
                .train_epoch(epoch)?
                .mean()
                .ok_or_else(|| MlError::data("training data produced no batches"))?;
            let validation_loss = learner
                .validate_epoch(epoch)?
                .mean()
                .ok_or_else(|| MlError::data("validation data produced no batches"))?;

            let metrics = EpochMetrics::new(epoch, train_loss, validation_loss);
            tracing::info!(
                run = run_name,
                epoch = epoch + 1,
                train_loss,
                validation_loss,
                validation_rmse = metrics.validation_rmse,
                "Epoch finished"
            );
            self.tracker.log(&metrics.to_metrics())?;

            if state.history.record(metrics) {
                let written = learner.save_checkpoint(&checkpoint_path)?;
                let record = self.checkpoints.record(
                    learner.model_name(),
                    run_name,
                    epoch,
                    validation_loss,
                    &written,
                )?;
                tracing::debug!(run = run_name, path = %record.path.display(), "New best checkpoint");
                checkpoint = Some(record);
            }

            state.epoch += 1;
            if state.monitor.observe(metrics.validation_rmse) == MonitorState::StoppedEarly {
                tracing::info!(
                    run = run_name,
                    epoch = state.epoch,
                    violations = state.monitor.violations(),
                    "Validation RMSE stayed above threshold, ending run early"
                );
                break;
            }
        }

        let final_state = state.monitor.finish();
        Ok(RunOutcome {
            state: final_state,
            epochs_run: state.epoch,
            violations: state.monitor.violations(),
            history: state.history,
            checkpoint,
        })
    }
}
