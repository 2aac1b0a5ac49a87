//! spiegel - provider registry mirror
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Keeps a filesystem or S3 mirror of registry provider packages in sync
//! with the upstream registry, following the network mirror layout:
//!
//! ```text
//! <root>/<hostname>/<owner>/<name>/
//! ├── index.json
//! ├── <version>.json
//! ├── terraform-provider-<name>_<version>_<os>_<arch>.zip
//! └── .etag-map.json   (S3 only)
//! ```

pub mod cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "spiegel")]
#[command(author, version, about = "spiegel - keep a provider registry mirror in sync")]
pub struct Cli {
    /// Path to the configuration file (YAML, JSON or TOML)
    #[arg(
        long,
        global = true,
        env = "SPIEGEL_CONFIG",
        default_value = "config.yaml"
    )]
    pub config_path: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Development)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Mirror every configured package
    Mirror {
        /// Keep mirroring, sleeping between passes
        #[arg(long = "loop")]
        looping: bool,
        /// Seconds to wait between passes in loop mode
        #[arg(long, default_value_t = 21_600)]
        wait_between_loops: u64,
    },
    /// Check the configuration and print the packages it selects
    Validate,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output, debug level
    Development,
    /// JSON lines, info level
    Production,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the level.
pub fn init_logging(format: LogFormat) {
    let default_level = match format {
        LogFormat::Development => "debug",
        LogFormat::Production => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Development => builder.init(),
        LogFormat::Production => builder.json().init(),
    }
}
