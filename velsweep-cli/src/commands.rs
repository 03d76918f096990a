//! Subcommand handlers.

use burn::backend::Autodiff;
use std::path::Path;

use velsweep_core::config::{SweepConfig, WORKSPACE_CONFIG_FILE};
use velsweep_core::JsonlTracker;
use velsweep_ml::data::synthetic::{self, SyntheticConfig};
use velsweep_ml::training::{
    CompatibilityTables, HyperparameterGrid, RunFilter, SweepDriver, SweepSummary, Trainer,
    TrialStatus, Verdict,
};
use velsweep_ml::RunConfig;

use crate::{Commands, ConfigAction};

#[cfg(feature = "wgpu")]
type TrainBackend = Autodiff<burn::backend::Wgpu>;
#[cfg(not(feature = "wgpu"))]
type TrainBackend = Autodiff<burn::backend::NdArray>;

/// Name of the compiled-in training backend.
fn backend_name() -> &'static str {
    if cfg!(feature = "wgpu") {
        "wgpu"
    } else {
        "ndarray"
    }
}

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Sweep { dry_run } => {
            let config = load(workspace, config_path)?;
            if dry_run {
                dry_run_sweep(&config)
            } else {
                run_sweep(config).await
            }
        }
        Commands::Synth {
            train,
            validation,
            out,
            seed,
        } => {
            let config = load(workspace, config_path)?;
            let root = match out {
                Some(out) if out.is_absolute() => out,
                Some(out) => workspace.join(out),
                None => config.paths.data_root.clone(),
            };
            let synth = SyntheticConfig {
                train_samples: train,
                validation_samples: validation,
                seed,
                ..Default::default()
            };
            let summary = tokio::task::spawn_blocking(move || synthetic::generate(&root, &synth))
                .await??;
            println!(
                "Wrote {} train and {} validation spectrograms, targets in {}",
                summary.train_samples,
                summary.validation_samples,
                summary.stmf_path.display()
            );
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_path),
    }
}

/// Load, validate, and anchor relative paths at the workspace.
fn load(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<SweepConfig> {
    if config_path.is_none() && !velsweep_core::config_exists(Some(workspace)) {
        tracing::info!("No configuration file found, using defaults");
    }
    let mut config = velsweep_core::load_config(Some(workspace), config_path)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.validate()?;
    config.paths = config.paths.resolve(workspace);
    Ok(config)
}

fn grid(config: &SweepConfig) -> anyhow::Result<HyperparameterGrid> {
    let grid = HyperparameterGrid::new(config.grid.clone())?;
    grid.require(&RunConfig::PARAMETERS)?;
    Ok(grid)
}

fn dry_run_sweep(config: &SweepConfig) -> anyhow::Result<()> {
    let grid = grid(config)?;
    let mut tables = CompatibilityTables::from_grid(&grid)?;
    if let Some(overrides) = &config.compatibility {
        tables = tables.with_overrides(overrides)?;
    }
    let filter = RunFilter::new(tables);

    let (mut accepted, mut skipped, mut invalid) = (0usize, 0usize, 0usize);
    for (n, combination) in grid.combinations().enumerate() {
        let verdict = match RunConfig::from_combination(&combination) {
            Ok(run) => match filter.check(&run) {
                Verdict::Accept => {
                    accepted += 1;
                    "run".to_string()
                }
                Verdict::Reject(rejection) => {
                    skipped += 1;
                    format!("skip ({rejection})")
                }
            },
            Err(e) => {
                invalid += 1;
                format!("error ({e})")
            }
        };
        println!("{n:>5}  {verdict:<48}  {}", combination.to_json());
    }
    println!(
        "\n{} combinations: {accepted} to run, {skipped} skipped, {invalid} invalid",
        grid.size()
    );
    Ok(())
}

async fn run_sweep(config: SweepConfig) -> anyhow::Result<()> {
    let summary = tokio::task::spawn_blocking(move || -> anyhow::Result<SweepSummary> {
        let grid = grid(&config)?;
        tracing::info!(backend = backend_name(), "Loading training data");
        let tracker = JsonlTracker::new(&config.paths.runs_dir);
        let mut trainer = Trainer::<TrainBackend, _>::from_config(
            &config,
            &grid,
            tracker,
            Default::default(),
        )?;

        let driver = SweepDriver::new(grid).with_project(config.project.name.clone());
        let summary = driver.run(|run_name, combination| trainer.run(run_name, combination));
        let path = summary.save(&config.paths.runs_dir)?;
        tracing::info!(path = %path.display(), "Saved sweep summary");
        Ok(summary)
    })
    .await??;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &SweepSummary) {
    match &summary.project {
        Some(project) => println!("Sweep {} ({project})", summary.sweep_id),
        None => println!("Sweep {}", summary.sweep_id),
    }
    for trial in &summary.trials {
        let rmse = trial
            .best_validation_rmse
            .map(|r| format!("{r:.4}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<12} {:<14} epochs {:>3}  best rmse {:>10}",
            trial.run_name, trial.status, trial.epochs_run, rmse
        );
        if let (TrialStatus::Failed, Some(detail)) = (trial.status, &trial.detail) {
            println!("      {detail}");
        }
    }
    match summary.best() {
        Some(best) => println!(
            "Best: {} (validation rmse {:.4})",
            best.run_name,
            best.best_validation_rmse.unwrap_or(f64::NAN)
        ),
        None => println!("No run finished an epoch."),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = workspace.join(WORKSPACE_CONFIG_FILE);
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            std::fs::write(&path, SweepConfig::default().to_toml()?)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = velsweep_core::load_config(Some(workspace), config_path)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_init_writes_loadable_defaults() {
        let dir = TempDir::new().unwrap();
        handle_config(ConfigAction::Init, dir.path(), None).unwrap();

        let path = dir.path().join(WORKSPACE_CONFIG_FILE);
        assert!(path.exists());
        let config = load(dir.path(), Some(&path)).unwrap();
        assert_eq!(config.grid, SweepConfig::default().grid);
        assert!(config.paths.data_root.starts_with(dir.path()));
    }

    #[test]
    fn test_config_init_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(WORKSPACE_CONFIG_FILE);
        std::fs::write(&path, "[training]\nseed = 7\n").unwrap();

        handle_config(ConfigAction::Init, dir.path(), None).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[training]\nseed = 7\n"
        );
    }

    #[test]
    fn test_dry_run_accepts_default_grid() {
        let dir = TempDir::new().unwrap();
        let config = load(dir.path(), None).unwrap();
        dry_run_sweep(&config).unwrap();
    }

    #[cfg(not(feature = "wgpu"))]
    #[test]
    fn test_default_build_trains_on_ndarray() {
        assert_eq!(backend_name(), "ndarray");
        assert_eq!(
            std::any::type_name::<TrainBackend>(),
            std::any::type_name::<Autodiff<burn::backend::NdArray>>()
        );
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load(dir.path(), Some(&missing)).is_err());
    }
}
