//! Per-epoch loss accounting.

use serde::{Deserialize, Serialize};
use velsweep_core::Metrics;

/// Sums per-batch losses and divides by the batches actually seen, so a
/// trailing partial batch counts as one batch like any other.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossAccumulator {
    sum: f64,
    batches: usize,
}

impl LossAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch_loss: f64) {
        self.sum += batch_loss;
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Mean batch loss, `None` before the first batch.
    pub fn mean(&self) -> Option<f64> {
        (self.batches > 0).then(|| self.sum / self.batches as f64)
    }
}

impl FromIterator<f64> for LossAccumulator {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = Self::new();
        for loss in iter {
            acc.push(loss);
        }
        acc
    }
}

/// Metrics reported once per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_rmse: f64,
    pub validation_loss: f64,
    pub validation_rmse: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, validation_loss: f64) -> Self {
        Self {
            epoch,
            train_loss,
            train_rmse: train_loss.sqrt(),
            validation_loss,
            validation_rmse: validation_loss.sqrt(),
        }
    }

    pub fn to_metrics(&self) -> Metrics {
        [
            ("epoch", self.epoch as f64),
            ("train_loss", self.train_loss),
            ("train_rmse", self.train_rmse),
            ("validation_loss", self.validation_loss),
            ("validation_rmse", self.validation_rmse),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Loss history for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs: Vec<EpochMetrics>,
    pub best_epoch: Option<usize>,
    pub best_validation_loss: Option<f64>,
}

impl TrainingMetrics {
    /// Record an epoch. Returns `true` when validation loss strictly improved.
    pub fn record(&mut self, metrics: EpochMetrics) -> bool {
        self.epochs.push(metrics);
        let best = self.best_validation_loss.unwrap_or(f64::INFINITY);
        let improved = metrics.validation_loss < best;
        if improved {
            self.best_validation_loss = Some(metrics.validation_loss);
            self.best_epoch = Some(metrics.epoch);
        }
        improved
    }

    pub fn best_validation_rmse(&self) -> Option<f64> {
        self.best_validation_loss.map(f64::sqrt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_batch_counts_once() {
        // Three full batches and one partial batch.
        let acc: LossAccumulator = [4.0, 4.0, 4.0, 1.0].into_iter().collect();
        assert_eq!(acc.batches(), 4);
        assert_eq!(acc.mean(), Some(13.0 / 4.0));
    }

    #[test]
    fn test_empty_accumulator_has_no_mean() {
        assert_eq!(LossAccumulator::new().mean(), None);
    }

    #[test]
    fn test_epoch_metrics_rmse() {
        let m = EpochMetrics::new(0, 16.0, 81.0);
        assert_eq!(m.train_rmse, 4.0);
        assert_eq!(m.validation_rmse, 9.0);
        let map = m.to_metrics();
        for key in ["train_loss", "train_rmse", "validation_loss", "validation_rmse"] {
            assert!(map.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_record_tracks_strict_improvement() {
        let mut history = TrainingMetrics::default();
        assert!(history.record(EpochMetrics::new(0, 1.0, 0.5)));
        assert!(!history.record(EpochMetrics::new(1, 1.0, 0.5)));
        assert!(history.record(EpochMetrics::new(2, 1.0, 0.25)));
        assert_eq!(history.best_epoch, Some(2));
        assert_eq!(history.best_validation_rmse(), Some(0.5));
    }

    #[test]
    fn test_nan_never_improves() {
        let mut history = TrainingMetrics::default();
        assert!(!history.record(EpochMetrics::new(0, 1.0, f64::NAN)));
        assert!(history.record(EpochMetrics::new(1, 1.0, 0.5)));
        assert!(!history.record(EpochMetrics::new(2, 1.0, f64::NAN)));
        assert_eq!(history.best_epoch, Some(1));
    }
}
