//! Single-channel spectrogram images stored as row-major JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MlError, Result};

/// A `height x width` grid of power values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrogram {
    pub height: usize,
    pub width: usize,
    /// Row-major, `height * width` long.
    pub values: Vec<f32>,
}

impl Spectrogram {
    pub fn new(height: usize, width: usize, values: Vec<f32>) -> Result<Self> {
        let spectrogram = Self {
            height,
            width,
            values,
        };
        spectrogram.check_shape()?;
        Ok(spectrogram)
    }

    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            values: vec![0.0; height * width],
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.values[row * self.width + col] = value;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MlError::data(format!("cannot read {}: {e}", path.display())))?;
        let spectrogram: Self = serde_json::from_str(&raw)
            .map_err(|e| MlError::data(format!("malformed spectrogram {}: {e}", path.display())))?;
        spectrogram.check_shape()?;
        Ok(spectrogram)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        velsweep_core::persistence::write_json_atomic(path, self)?;
        Ok(())
    }

    fn check_shape(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(MlError::data(format!(
                "spectrogram has empty shape {}x{}",
                self.height, self.width
            )));
        }
        if self.values.len() != self.height * self.width {
            return Err(MlError::data(format!(
                "spectrogram declares {}x{} but holds {} values",
                self.height,
                self.width,
                self.values.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_shape_mismatch_rejected() {
        assert!(Spectrogram::new(2, 3, vec![0.0; 5]).is_err());
        assert!(Spectrogram::new(0, 3, vec![]).is_err());
        assert!(Spectrogram::new(2, 3, vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_row_major_indexing() {
        let s = Spectrogram::new(2, 3, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(s.get(1, 0), 3.0);
        assert_eq!(s.get(0, 2), 2.0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        let mut s = Spectrogram::zeros(3, 4);
        s.set(2, 3, 7.5);
        s.save(&path).unwrap();
        assert_eq!(Spectrogram::load(&path).unwrap(), s);
    }

    #[test]
    fn test_load_rejects_inconsistent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"height":2,"width":2,"values":[1.0]}"#).unwrap();
        assert!(matches!(Spectrogram::load(&path), Err(MlError::Data(_))));
    }
}
