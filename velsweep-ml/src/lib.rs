//! # velsweep-ml
//!
//! Grid sweeps over a spectrogram-to-velocity CNN. The pieces, bottom up:
//!
//! - [`hyperparams`]: typed view of one grid point
//! - [`training::filter`]: compatibility tables that skip redundant combinations
//! - [`training::sweep`]: cartesian enumeration and the sweep summary
//! - [`training::runner`]: the epoch loop, early stopping, best-so-far checkpoints
//! - [`training::trainer`]: burn model, optimizer and data loaders behind the loop
//! - [`data`] and [`model`]: the dataset pipeline and the CNN itself

pub mod data;
pub mod error;
pub mod hyperparams;
pub mod model;
pub mod training;

pub use error::{MlError, Result};
pub use hyperparams::{ActivationFn, KernelSize, OptimizerKind, RunConfig, WeightInit};
pub use training::{
    Combination, HyperparameterGrid, RunFilter, SweepDriver, SweepSummary, Trainer, TrialOutcome,
    TrialStatus,
};
