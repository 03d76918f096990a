//! Spectrogram preprocessing.
//!
//! Steps run in order on every sample as it is loaded. The standard
//! pipeline normalizes to zero mean and unit variance and then resizes
//! with bilinear interpolation to the model's input shape.

use std::fmt;

use crate::data::spectrogram::Spectrogram;
use crate::error::Result;

/// One preprocessing step.
pub trait Transform: Send + Sync + fmt::Debug {
    fn apply(&self, spectrogram: Spectrogram) -> Result<Spectrogram>;
}

/// Shift and scale to zero mean and unit variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeSpectrogram;

impl Transform for NormalizeSpectrogram {
    fn apply(&self, mut spectrogram: Spectrogram) -> Result<Spectrogram> {
        let n = spectrogram.len() as f64;
        let mean = spectrogram.values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = spectrogram
            .values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = variance.sqrt();

        for v in &mut spectrogram.values {
            // Constant input has no spread to scale by.
            *v = if std > f64::EPSILON {
                ((*v as f64 - mean) / std) as f32
            } else {
                0.0
            };
        }
        Ok(spectrogram)
    }
}

/// Bilinear resize to a fixed shape, corners aligned.
#[derive(Debug, Clone, Copy)]
pub struct InterpolateSpectrogram {
    pub height: usize,
    pub width: usize,
}

impl InterpolateSpectrogram {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }
}

/// Source coordinate for `index` when mapping `from` samples onto `to`.
fn source_coord(index: usize, from: usize, to: usize) -> f64 {
    if to <= 1 || from <= 1 {
        0.0
    } else {
        index as f64 * (from - 1) as f64 / (to - 1) as f64
    }
}

impl Transform for InterpolateSpectrogram {
    fn apply(&self, spectrogram: Spectrogram) -> Result<Spectrogram> {
        if spectrogram.height == self.height && spectrogram.width == self.width {
            return Ok(spectrogram);
        }

        let mut out = Spectrogram::zeros(self.height, self.width);
        for row in 0..self.height {
            let y = source_coord(row, spectrogram.height, self.height);
            let y0 = y.floor() as usize;
            let y1 = (y0 + 1).min(spectrogram.height - 1);
            let dy = (y - y0 as f64) as f32;

            for col in 0..self.width {
                let x = source_coord(col, spectrogram.width, self.width);
                let x0 = x.floor() as usize;
                let x1 = (x0 + 1).min(spectrogram.width - 1);
                let dx = (x - x0 as f64) as f32;

                let top = spectrogram.get(y0, x0) * (1.0 - dx) + spectrogram.get(y0, x1) * dx;
                let bottom = spectrogram.get(y1, x0) * (1.0 - dx) + spectrogram.get(y1, x1) * dx;
                out.set(row, col, top * (1.0 - dy) + bottom * dy);
            }
        }
        Ok(out)
    }
}

/// Ordered list of transforms.
#[derive(Debug, Default)]
pub struct TransformPipeline {
    steps: Vec<Box<dyn Transform>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Normalize, then interpolate to `height x width`.
    pub fn standard(height: usize, width: usize) -> Self {
        Self::new()
            .add_step(NormalizeSpectrogram)
            .add_step(InterpolateSpectrogram::new(height, width))
    }

    pub fn add_step(mut self, step: impl Transform + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(&self, mut spectrogram: Spectrogram) -> Result<Spectrogram> {
        for step in &self.steps {
            spectrogram = step.apply(spectrogram)?;
        }
        Ok(spectrogram)
    }
}
