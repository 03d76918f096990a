//! Synthetic spectrogram generator.
//!
//! Each sample is a noisy ridge across the time axis whose slope is
//! proportional to the velocity target, so a model can learn the mapping
//! from a few hundred samples.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::data::dataset::{TRAIN_SPLIT, VALIDATION_SPLIT};
use crate::data::spectrogram::Spectrogram;
use crate::error::Result;

/// Radial velocity range covered by the targets.
pub const VELOCITY_RANGE: (f32, f32) = (-60.0, 15.0);

pub const STMF_FILENAME: &str = "stmf_synthetic_data.csv";

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub height: usize,
    pub width: usize,
    pub seed: u64,
    /// Upper bound of the uniform background noise.
    pub noise: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            train_samples: 256,
            validation_samples: 64,
            height: 64,
            width: 128,
            seed: 42,
            noise: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyntheticSummary {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub stmf_path: PathBuf,
}

/// One spectrogram for `velocity`.
pub fn synthesize(
    rng: &mut impl Rng,
    height: usize,
    width: usize,
    velocity: f32,
    noise: f32,
) -> Spectrogram {
    let mut spectrogram = Spectrogram::zeros(height, width);
    let center = (height as f32 - 1.0) / 2.0;
    let slope = velocity / VELOCITY_RANGE.0.abs() * height as f32 / width as f32;
    let sigma = (height as f32 / 32.0).max(1.0);

    for col in 0..width {
        let ridge = center + slope * (col as f32 - width as f32 / 2.0);
        for row in 0..height {
            let d = row as f32 - ridge;
            let peak = (-(d * d) / (2.0 * sigma * sigma)).exp();
            let background = if noise > 0.0 { rng.gen_range(0.0..noise) } else { 0.0 };
            spectrogram.set(row, col, peak + background);
        }
    }
    spectrogram
}

/// Write `train/` and `validation/` splits plus the STMF table under `root`.
pub fn generate(root: &Path, config: &SyntheticConfig) -> Result<SyntheticSummary> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stmf = String::from("file,target\n");

    for (split, count) in [
        (TRAIN_SPLIT, config.train_samples),
        (VALIDATION_SPLIT, config.validation_samples),
    ] {
        for i in 0..count {
            let velocity = rng.gen_range(VELOCITY_RANGE.0..VELOCITY_RANGE.1);
            let spectrogram =
                synthesize(&mut rng, config.height, config.width, velocity, config.noise);
            let stem = format!("{split}_{i:05}");
            spectrogram.save(&root.join(split).join(format!("{stem}.json")))?;
            let _ = writeln!(stmf, "{stem},{velocity}");
        }
        tracing::debug!(split, count, "Wrote synthetic split");
    }

    let stmf_path = root.join(STMF_FILENAME);
    velsweep_core::persistence::write_atomic(&stmf_path, stmf.as_bytes())?;
    tracing::info!(
        root = %root.display(),
        train = config.train_samples,
        validation = config.validation_samples,
        "Generated synthetic dataset"
    );

    Ok(SyntheticSummary {
        train_samples: config.train_samples,
        validation_samples: config.validation_samples,
        stmf_path,
    })
}
