//! spiegel CLI

use anyhow::Result;
use clap::Parser;

use spiegel_cli::cmd;
use spiegel_cli::{Cli, Commands, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Mirror {
            looping,
            wait_between_loops,
        } => cmd::mirror::mirror(&cli.config_path, looping, wait_between_loops).await,
        Commands::Validate => cmd::validate::validate(&cli.config_path),
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
