//! Training infrastructure: sweep driver, run filter, epoch loop, checkpoints.

pub mod callbacks;
pub mod checkpoint;
pub mod filter;
pub mod metrics;
pub mod reproducibility;
pub mod runner;
pub mod sweep;
pub mod trainer;

pub use callbacks::{EarlyStopMonitor, MonitorState};
pub use checkpoint::{CheckpointManager, CheckpointRecord};
pub use filter::{CompatibilityTable, CompatibilityTables, Rejection, RunFilter, Verdict};
pub use metrics::{EpochMetrics, LossAccumulator, TrainingMetrics};
pub use reproducibility::SeedManager;
pub use runner::{EpochLoop, Learner, RunOutcome, RunState};
pub use sweep::{
    Combination, HyperparameterGrid, SweepDriver, SweepSummary, SweepTrial, TrialOutcome,
    TrialStatus,
};
pub use trainer::{SpectrogramData, Trainer, TrainerSettings};
