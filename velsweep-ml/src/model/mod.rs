//! Model definitions.

pub mod cnn;

pub use cnn::{MODEL_NAME, SpectrogramCnn, SpectrogramCnnConfig};
