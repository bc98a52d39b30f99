//! Command line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Entropy - resource orchestration control plane
#[derive(Parser, Debug)]
#[command(name = "entropy")]
#[command(version)]
#[command(
    long_about = "Entropy stores desired infrastructure as resources, plans changes through per-kind drivers and reconciles them asynchronously with sync workers."
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "ENTROPY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP API together with the sync workers
    Serve,

    /// Run the sync workers only
    Worker,

    /// Apply the database schema and exit
    Migrate,

    /// Print the effective configuration
    Config,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_parse_serve_with_config() {
        let cli = Cli::try_parse_from(["entropy", "serve", "--config", "entropy.toml"]).unwrap();
        assert_eq!(cli.command, Commands::Serve);
        assert_eq!(cli.config, Some(PathBuf::from("entropy.toml")));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["entropy"]).is_err());
    }
}
