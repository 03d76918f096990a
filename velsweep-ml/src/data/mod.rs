//! Data pipeline: spectrogram files, preprocessing, datasets, batching, synthesis.

pub mod batcher;
pub mod dataset;
pub mod spectrogram;
pub mod synthetic;
pub mod transform;

pub use batcher::{SpectrogramBatch, SpectrogramBatcher};
pub use dataset::{SpectrogramDataset, SpectrogramItem, TRAIN_SPLIT, VALIDATION_SPLIT, read_stmf};
pub use spectrogram::Spectrogram;
pub use synthetic::{SyntheticConfig, SyntheticSummary};
pub use transform::{InterpolateSpectrogram, NormalizeSpectrogram, Transform, TransformPipeline};
