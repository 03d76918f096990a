//! Configuration system for velsweep.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment. Configuration is loaded from
//! `~/.config/velsweep/config.toml` and/or `velsweep.toml` in the workspace
//! directory, or from an explicit path passed on the command line.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Name of the workspace-level configuration file.
pub const WORKSPACE_CONFIG_FILE: &str = "velsweep.toml";

/// Top-level configuration for a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    /// Candidate values per hyperparameter. Every combination is visited.
    #[serde(default = "default_grid")]
    pub grid: BTreeMap<String, Vec<Value>>,
    /// Optional replacements for the derived compatibility tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<CompatibilityConfig>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            paths: PathsConfig::default(),
            data: DataConfig::default(),
            training: TrainingConfig::default(),
            grid: default_grid(),
            compatibility: None,
        }
    }
}

/// Sweep identity, recorded in the sweep summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "velocity-cnn".to_string(),
        }
    }
}

/// Filesystem locations, relative paths resolve against the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub data_root: PathBuf,
    pub model_dir: PathBuf,
    pub runs_dir: PathBuf,
    /// CSV at the data root mapping spectrogram files to target velocities.
    pub stmf_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("synthetic_data"),
            model_dir: PathBuf::from("models"),
            runs_dir: PathBuf::from("runs"),
            stmf_file: "stmf_synthetic_data.csv".to_string(),
        }
    }
}

impl PathsConfig {
    /// Anchor every relative path at `base`.
    pub fn resolve(&self, base: &Path) -> Self {
        let anchor = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        Self {
            data_root: anchor(&self.data_root),
            model_dir: anchor(&self.model_dir),
            runs_dir: anchor(&self.runs_dir),
            stmf_file: self.stmf_file.clone(),
        }
    }

    pub fn stmf_path(&self) -> PathBuf {
        self.data_root.join(&self.stmf_file)
    }
}

/// Data pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Spectrogram height after interpolation.
    pub height: usize,
    /// Spectrogram width after interpolation.
    pub width: usize,
    pub validation_batch_size: usize,
    /// Training loader threads. Batch order is reproducible from the seed
    /// only with a single worker.
    pub train_workers: usize,
    pub validation_workers: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            height: 64,
            width: 128,
            validation_batch_size: 500,
            train_workers: 4,
            validation_workers: 1,
        }
    }
}

/// Settings shared by every training run in the sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Seed for weight initialization and shuffling.
    pub seed: u64,
    /// Validation RMSE above which an epoch counts as a violation.
    pub early_stop_threshold: f64,
    /// Consecutive violations that end a run.
    pub early_stop_patience: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            early_stop_threshold: 8.0,
            early_stop_patience: 10,
        }
    }
}

/// Explicit compatibility tables. Any table left unset is derived from the grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_init: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer_weight_decay: Option<BTreeMap<String, Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer_momentum: Option<BTreeMap<String, Vec<f64>>>,
}

/// The reference single-point grid.
pub fn default_grid() -> BTreeMap<String, Vec<Value>> {
    let entries = [
        ("conv_dropout", json!([0])),
        ("linear_dropout", json!([0])),
        ("kernel_size", json!(["5x7"])),
        ("hidden_units", json!([64])),
        ("learning_rate", json!([1e-4])),
        ("epochs", json!([1])),
        ("batch_size", json!([32])),
        ("num_conv_layers", json!([3])),
        ("num_fc_layers", json!([3])),
        ("stride", json!([2])),
        ("padding", json!([0])),
        ("pooling_size", json!([1])),
        ("out_channels", json!([8])),
        ("activation_fn", json!(["ReLU"])),
        ("weights_init", json!(["Uniform"])),
        ("use_cnn_batchnorm", json!([true])),
        ("use_fc_batchnorm", json!([true])),
        ("optimizer", json!(["SGD"])),
        ("weight_decay", json!([1e-5])),
        ("momentum", json!([0.8])),
    ];
    entries
        .into_iter()
        .map(|(name, values)| {
            let values = match values {
                Value::Array(values) => values,
                other => vec![other],
            };
            (name.to_string(), values)
        })
        .collect()
}

impl SweepConfig {
    /// Reject grids with an empty candidate list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.is_empty() {
            return Err(ConfigError::Invalid {
                message: "grid has no parameters".into(),
            });
        }
        if let Some((name, _)) = self.grid.iter().find(|(_, values)| values.is_empty()) {
            return Err(ConfigError::EmptyParameter { name: name.clone() });
        }
        if self.training.early_stop_patience == 0 {
            return Err(ConfigError::Invalid {
                message: "training.early_stop_patience must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Number of grid points, the product of every candidate list length.
    pub fn grid_size(&self) -> usize {
        self.grid.values().map(Vec::len).product()
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// Load configuration from all layers.
///
/// `explicit` replaces the workspace file when given and must exist.
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<SweepConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(SweepConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "velsweep", "velsweep") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Box::new(figment::Error::from(format!(
                    "configuration file not found: {}",
                    path.display()
                ))));
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(&ws_config));
                }
            }
        }
    }

    // Environment variables (VELSWEEP_TRAINING__SEED, VELSWEEP_PATHS__DATA_ROOT, etc.)
    figment = figment.merge(Env::prefixed("VELSWEEP_").split("__"));

    figment.extract().map_err(Box::new)
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = directories::ProjectDirs::from("dev", "velsweep", "velsweep") {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    workspace.is_some_and(|ws| ws.join(WORKSPACE_CONFIG_FILE).exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_grid_is_single_point() {
        let config = SweepConfig::default();
        assert_eq!(config.grid.len(), 20);
        assert_eq!(config.grid_size(), 1);
        assert_eq!(config.grid["optimizer"], vec![json!("SGD")]);
    }

    #[test]
    fn test_default_training_settings() {
        let training = TrainingConfig::default();
        assert_eq!(training.early_stop_threshold, 8.0);
        assert_eq!(training.early_stop_patience, 10);
    }

    #[test]
    fn test_validate_rejects_empty_list() {
        let mut config = SweepConfig::default();
        config.grid.insert("momentum".into(), vec![]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyParameter { name } if name == "momentum"));
    }

    #[test]
    fn test_workspace_file_overrides_grid_entry() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"
[grid]
optimizer = ["SGD", "Adam"]
momentum = [0.7, 0.8, 0.9]

[training]
seed = 7
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.grid["optimizer"].len(), 2);
        assert_eq!(config.grid["momentum"].len(), 3);
        // Untouched entries keep their defaults.
        assert_eq!(config.grid["kernel_size"], vec![json!("5x7")]);
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.grid_size(), 6);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(load_config(None, Some(&missing)).is_err());
    }

    #[test]
    fn test_paths_resolve_relative_only() {
        let paths = PathsConfig {
            data_root: PathBuf::from("/abs/data"),
            ..Default::default()
        };
        let resolved = paths.resolve(Path::new("/ws"));
        assert_eq!(resolved.data_root, PathBuf::from("/abs/data"));
        assert_eq!(resolved.model_dir, PathBuf::from("/ws/models"));
        assert_eq!(
            resolved.stmf_path(),
            PathBuf::from("/abs/data/stmf_synthetic_data.csv")
        );
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SweepConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: SweepConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.grid, config.grid);
        assert_eq!(parsed.project.name, "velocity-cnn");
        assert_eq!(parsed.data.validation_batch_size, 500);
    }
}
