//! velsweep CLI: grid sweeps for the spectrogram velocity CNN.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// velsweep: hyperparameter grid sweeps for spectrogram velocity regression
#[derive(Parser, Debug)]
#[command(name = "velsweep", version, about, long_about = None)]
struct Cli {
    /// Workspace directory; relative paths in the config resolve against it
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces the workspace velsweep.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train every combination of the configured grid
    Sweep {
        /// Print each combination and its filter verdict without training
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate a synthetic spectrogram dataset
    Synth {
        /// Training samples
        #[arg(long, default_value_t = 256)]
        train: usize,
        /// Validation samples
        #[arg(long, default_value_t = 64)]
        validation: usize,
        /// Output directory (defaults to the configured data root)
        #[arg(long)]
        out: Option<PathBuf>,
        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to <workspace>/velsweep.toml
    Init,
    /// Print the merged configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "velsweep", "velsweep")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "velsweep.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sweep_dry_run() {
        let cli = Cli::try_parse_from(["velsweep", "sweep", "--dry-run", "-vv"]).unwrap();
        assert!(matches!(cli.command, Commands::Sweep { dry_run: true }));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_synth_defaults() {
        let cli = Cli::try_parse_from(["velsweep", "synth", "--train", "32"]).unwrap();
        match cli.command {
            Commands::Synth {
                train,
                validation,
                out,
                seed,
            } => {
                assert_eq!(train, 32);
                assert_eq!(validation, 64);
                assert!(out.is_none());
                assert_eq!(seed, 42);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
