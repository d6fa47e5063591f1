//! CLI argument definitions.

use crate::config::{InferenceDevice, RuntimeKind};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Wildfire image classification: HTTP service and local predictions.
#[derive(Debug, Parser)]
#[command(name = "firesight")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Path to the configuration file (default: platform config dir).
    #[arg(long, global = true, env = "FIRESIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v: debug, -vv: trace + runtime info, -vvv: everything).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP prediction service.
    Serve(ServeArgs),
    /// Classify local image files in-process.
    Predict(PredictArgs),
    /// Manage the local model cache.
    Model {
        /// Model action to perform.
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Manage configuration.
    Config {
        /// Configuration action to perform.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Runtime selection shared by `serve` and `predict`.
#[derive(Debug, Args)]
pub struct RuntimeArgs {
    /// Tensor runtime (overrides config).
    #[arg(long, value_enum, env = "FIRESIGHT_RUNTIME")]
    pub runtime: Option<RuntimeKind>,

    /// Inference device for the embedded runtime (overrides config).
    #[arg(long, value_enum, env = "FIRESIGHT_DEVICE")]
    pub device: Option<InferenceDevice>,

    /// Model manifest URL (overrides config).
    #[arg(long, env = "FIRESIGHT_MANIFEST_URL")]
    pub manifest_url: Option<String>,
}

/// Arguments for `serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides config).
    #[arg(long, env = "FIRESIGHT_BIND")]
    pub bind: Option<String>,

    /// Disable rate limiting.
    #[arg(long)]
    pub no_rate_limit: bool,

    /// Runtime options.
    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

/// Arguments for `predict`.
#[derive(Debug, Args)]
pub struct PredictArgs {
    /// Image files to classify.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,

    /// Runtime options.
    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

/// Config subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Create default configuration file.
    Init,
    /// Display current configuration.
    Show,
    /// Print configuration file path.
    Path,
}

/// Model subcommand actions.
#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Download the model into the local cache.
    Fetch {
        /// Manifest URL (overrides config).
        #[arg(long, env = "FIRESIGHT_MANIFEST_URL")]
        manifest_url: Option<String>,
    },
    /// Report whether the cached model is complete.
    Check,
    /// Print the model cache directory.
    Path,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "firesight",
            "-v",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "--runtime",
            "in-page",
        ])
        .unwrap();
        assert_eq!(cli.global.verbose, 1);
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.bind.as_deref(), Some("127.0.0.1:9000"));
                assert_eq!(args.runtime.runtime, Some(RuntimeKind::InPage));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_predict_requires_files() {
        assert!(Cli::try_parse_from(["firesight", "predict"]).is_err());
        let cli = Cli::try_parse_from(["firesight", "predict", "a.jpg", "b.png", "--json"]).unwrap();
        match cli.command {
            Command::Predict(args) => {
                assert_eq!(args.files.len(), 2);
                assert!(args.json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_device_values() {
        let cli = Cli::try_parse_from(["firesight", "predict", "a.jpg", "--device", "gpu"]).unwrap();
        match cli.command {
            Command::Predict(args) => assert_eq!(args.runtime.device, Some(InferenceDevice::Gpu)),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
