//! Burn-backed trainer: one call per grid point.

use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::transform::ShuffledDataset},
    module::{AutodiffModule, Module},
    optim::{
        AdaGradConfig, AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig,
        decay::WeightDecayConfig, momentum::MomentumConfig,
    },
    tensor::{ElementConversion, backend::AutodiffBackend},
};
use std::path::{Path, PathBuf};

use velsweep_core::config::SweepConfig;
use velsweep_core::{Metrics, RunStatus, Tracker};

use crate::data::{
    SpectrogramBatcher, SpectrogramDataset, TRAIN_SPLIT, TransformPipeline, VALIDATION_SPLIT,
    read_stmf,
};
use crate::error::Result;
use crate::hyperparams::{OptimizerKind, RunConfig};
use crate::model::{MODEL_NAME, SpectrogramCnn, SpectrogramCnnConfig};
use crate::training::callbacks::EarlyStopMonitor;
use crate::training::checkpoint::CheckpointManager;
use crate::training::filter::{CompatibilityTables, RunFilter, Verdict};
use crate::training::metrics::LossAccumulator;
use crate::training::reproducibility::SeedManager;
use crate::training::runner::{EpochLoop, Learner, RunOutcome};
use crate::training::sweep::{Combination, HyperparameterGrid, TrialOutcome};

/// Settings shared by every run of a sweep.
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub height: usize,
    pub width: usize,
    pub validation_batch_size: usize,
    pub train_workers: usize,
    pub validation_workers: usize,
    pub seeds: SeedManager,
    pub early_stop_threshold: f64,
    pub early_stop_patience: usize,
}

impl TrainerSettings {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            height: config.data.height,
            width: config.data.width,
            validation_batch_size: config.data.validation_batch_size,
            train_workers: config.data.train_workers,
            validation_workers: config.data.validation_workers,
            seeds: SeedManager::new(config.training.seed),
            early_stop_threshold: config.training.early_stop_threshold,
            early_stop_patience: config.training.early_stop_patience,
        }
    }
}

/// Preprocessed train and validation splits.
#[derive(Debug, Clone)]
pub struct SpectrogramData {
    pub train: SpectrogramDataset,
    pub validation: SpectrogramDataset,
}

impl SpectrogramData {
    pub fn load(data_root: &Path, stmf_path: &Path, height: usize, width: usize) -> Result<Self> {
        let targets = read_stmf(stmf_path)?;
        let pipeline = TransformPipeline::standard(height, width);
        Ok(Self {
            train: SpectrogramDataset::load_split(data_root, TRAIN_SPLIT, &targets, &pipeline)?,
            validation: SpectrogramDataset::load_split(
                data_root,
                VALIDATION_SPLIT,
                &targets,
                &pipeline,
            )?,
        })
    }
}

/// Builds and trains one model per accepted combination.
pub struct Trainer<B: AutodiffBackend, T: Tracker> {
    settings: TrainerSettings,
    filter: RunFilter,
    data: SpectrogramData,
    checkpoints: CheckpointManager,
    tracker: T,
    device: B::Device,
}

impl<B: AutodiffBackend, T: Tracker> Trainer<B, T> {
    pub fn new(
        settings: TrainerSettings,
        filter: RunFilter,
        data: SpectrogramData,
        checkpoints: CheckpointManager,
        tracker: T,
        device: B::Device,
    ) -> Self {
        Self {
            settings,
            filter,
            data,
            checkpoints,
            tracker,
            device,
        }
    }

    /// Wire a trainer from a loaded configuration. Paths must already be resolved.
    pub fn from_config(
        config: &SweepConfig,
        grid: &HyperparameterGrid,
        tracker: T,
        device: B::Device,
    ) -> Result<Self> {
        let mut tables = CompatibilityTables::from_grid(grid)?;
        if let Some(overrides) = &config.compatibility {
            tables = tables.with_overrides(overrides)?;
        }
        let settings = TrainerSettings::from_config(config);
        let data = SpectrogramData::load(
            &config.paths.data_root,
            &config.paths.stmf_path(),
            settings.height,
            settings.width,
        )?;
        Ok(Self::new(
            settings,
            RunFilter::new(tables),
            data,
            CheckpointManager::new(&config.paths.model_dir),
            tracker,
            device,
        ))
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Parse and filter a combination without building anything.
    pub fn check(&self, combination: &Combination) -> Result<Verdict> {
        Ok(self.filter.check(&RunConfig::from_combination(combination)?))
    }

    /// Train one grid point.
    ///
    /// A rejected combination returns [`TrialOutcome::Skipped`] before any
    /// model, data loader, or tracked run exists.
    pub fn run(&mut self, run_name: &str, combination: &Combination) -> Result<TrialOutcome> {
        let config = RunConfig::from_combination(combination)?;
        if let Verdict::Reject(rejection) = self.filter.check(&config) {
            return Ok(TrialOutcome::Skipped {
                reason: rejection.to_string(),
            });
        }

        B::seed(self.settings.seeds.init_seed());
        let model = SpectrogramCnnConfig::from_run(&config, self.settings.height, self.settings.width)
            .init::<B>(&self.device)?;
        let total_parameters = model.num_params();

        self.tracker.start_run(run_name, &combination.to_json())?;
        tracing::info!(
            run = run_name,
            optimizer = %config.optimizer,
            activation = %config.activation_fn,
            init = %config.weights_init,
            total_parameters,
            "Starting run"
        );

        let result = self.log_and_fit(run_name, &config, model, total_parameters);
        let status = match &result {
            Ok(outcome) => outcome.run_status(),
            Err(_) => RunStatus::Failed,
        };
        let finished = self.tracker.finish_run(status);
        let outcome = match (result, finished) {
            (Ok(outcome), Ok(())) => outcome,
            (Ok(_), Err(e)) => return Err(e.into()),
            (Err(e), finished) => {
                if let Err(finish_err) = finished {
                    tracing::warn!(
                        run = run_name,
                        error = %finish_err,
                        "Could not close failed run"
                    );
                }
                return Err(e);
            }
        };
        tracing::info!(
            run = run_name,
            status = %status,
            epochs = outcome.epochs_run,
            best_validation_rmse = outcome.best_validation_rmse(),
            "Run finished"
        );
        Ok(TrialOutcome::Finished(outcome))
    }

    fn log_and_fit(
        &mut self,
        run_name: &str,
        config: &RunConfig,
        model: SpectrogramCnn<B>,
        total_parameters: usize,
    ) -> Result<RunOutcome> {
        let metrics = Metrics::from([("total_parameters".to_string(), total_parameters as f64)]);
        self.tracker.log(&metrics)?;

        match config.optimizer {
            OptimizerKind::Sgd => {
                let optimizer = SgdConfig::new()
                    .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)))
                    .with_momentum(Some(
                        MomentumConfig::new()
                            .with_momentum(config.momentum)
                            .with_dampening(0.0),
                    ))
                    .init::<B, SpectrogramCnn<B>>();
                self.fit(run_name, config, model, optimizer)
            }
            OptimizerKind::Adam => {
                let optimizer = AdamConfig::new().init::<B, SpectrogramCnn<B>>();
                self.fit(run_name, config, model, optimizer)
            }
            OptimizerKind::AdamW => {
                let optimizer = AdamWConfig::new()
                    .with_weight_decay(config.weight_decay as f32)
                    .init::<B, SpectrogramCnn<B>>();
                self.fit(run_name, config, model, optimizer)
            }
            OptimizerKind::AdaGrad => {
                let optimizer = AdaGradConfig::new().init::<B, SpectrogramCnn<B>>();
                self.fit(run_name, config, model, optimizer)
            }
        }
    }

    fn fit<O: Optimizer<SpectrogramCnn<B>, B>>(
        &mut self,
        run_name: &str,
        config: &RunConfig,
        model: SpectrogramCnn<B>,
        optimizer: O,
    ) -> Result<RunOutcome> {
        let Self {
            settings,
            data,
            checkpoints,
            tracker,
            device,
            ..
        } = self;

        let monitor =
            EarlyStopMonitor::new(settings.early_stop_threshold, settings.early_stop_patience);
        let mut learner = BurnLearner {
            model,
            optimizer,
            learning_rate: config.learning_rate,
            batch_size: config.batch_size,
            settings: &*settings,
            data: &*data,
            device: device.clone(),
        };
        EpochLoop::new(&*checkpoints, tracker, monitor).run(&mut learner, run_name, config.epochs)
    }
}

/// [`Learner`] over a burn model and optimizer.
struct BurnLearner<'a, B: AutodiffBackend, O> {
    model: SpectrogramCnn<B>,
    optimizer: O,
    learning_rate: f64,
    batch_size: usize,
    settings: &'a TrainerSettings,
    data: &'a SpectrogramData,
    device: B::Device,
}

impl<B, O> Learner for BurnLearner<'_, B, O>
where
    B: AutodiffBackend,
    O: Optimizer<SpectrogramCnn<B>, B>,
{
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn train_epoch(&mut self, epoch: usize) -> Result<LossAccumulator> {
        // Workers take contiguous slices and yield in completion order, so the
        // batch order is a pure function of the seed only with one worker.
        let shuffled = ShuffledDataset::with_seed(
            self.data.train.clone(),
            self.settings.seeds.shuffle_seed(epoch),
        );
        let loader = DataLoaderBuilder::<B, _, _>::new(SpectrogramBatcher)
            .batch_size(self.batch_size)
            .num_workers(self.settings.train_workers)
            .set_device(self.device.clone())
            .build(shuffled);

        let mut losses = LossAccumulator::new();
        for batch in loader.iter() {
            let prediction = self.model.forward(batch.spectrogram);
            let loss = self.model.loss(prediction, batch.target);
            losses.push(loss.clone().into_scalar().elem::<f64>());

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self
                .optimizer
                .step(self.learning_rate, self.model.clone(), grads);
        }
        tracing::debug!(epoch = epoch + 1, batches = losses.batches(), "Training pass done");
        Ok(losses)
    }

    fn validate_epoch(&mut self, epoch: usize) -> Result<LossAccumulator> {
        let model = self.model.valid();
        let loader = DataLoaderBuilder::<B::InnerBackend, _, _>::new(SpectrogramBatcher)
            .batch_size(self.settings.validation_batch_size)
            .num_workers(self.settings.validation_workers)
            .set_device(self.device.clone())
            .build(self.data.validation.clone());

        let mut losses = LossAccumulator::new();
        for batch in loader.iter() {
            let prediction = model.forward(batch.spectrogram);
            let loss = model.loss(prediction, batch.target);
            losses.push(loss.into_scalar().elem::<f64>());
        }
        tracing::debug!(epoch = epoch + 1, batches = losses.batches(), "Validation pass done");
        Ok(losses)
    }

    fn save_checkpoint(&self, path: &Path) -> Result<PathBuf> {
        self.model.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use serde_json::json;
    use velsweep_core::{CoreError, MemoryTracker};

    type TestBackend = Autodiff<NdArray>;

    /// Fails every metric write and every attempt to close a run.
    struct BrokenTracker(MemoryTracker);

    impl Tracker for BrokenTracker {
        fn start_run(
            &mut self,
            run_name: &str,
            config: &serde_json::Value,
        ) -> velsweep_core::Result<()> {
            self.0.start_run(run_name, config)
        }

        fn log(&mut self, _metrics: &Metrics) -> velsweep_core::Result<()> {
            Err(CoreError::tracking("disk full"))
        }

        fn finish_run(&mut self, _status: RunStatus) -> velsweep_core::Result<()> {
            Err(CoreError::tracking("run store closed"))
        }
    }

    #[test]
    fn test_failed_run_reports_training_error_over_finish_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = SweepConfig::default();
        config.data.height = 8;
        config.data.width = 12;
        config.grid.insert("kernel_size".into(), vec![json!("3x3")]);
        config.grid.insert("num_conv_layers".into(), vec![json!(1)]);
        config.grid.insert("stride".into(), vec![json!(1)]);
        config.grid.insert("padding".into(), vec![json!(1)]);

        let grid = HyperparameterGrid::new(config.grid.clone()).unwrap();
        let combination = grid.combinations().next().unwrap();
        let data = SpectrogramData {
            train: SpectrogramDataset::from_items(Vec::new()),
            validation: SpectrogramDataset::from_items(Vec::new()),
        };
        let mut trainer = Trainer::<TestBackend, _>::new(
            TrainerSettings::from_config(&config),
            RunFilter::new(CompatibilityTables::from_grid(&grid).unwrap()),
            data,
            CheckpointManager::new(dir.path()),
            BrokenTracker(MemoryTracker::new()),
            Default::default(),
        );

        let err = trainer.run("r-0", &combination).unwrap_err();
        assert!(err.to_string().contains("disk full"), "{err}");
        assert_eq!(trainer.tracker().0.runs.len(), 1);
    }
}
