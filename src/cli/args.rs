//! CLI argument definitions using clap
//!
//! Commands:
//! - rulesbrain serve [--config <path>] [--addr <addr>] [--rules <dir>]
//! - rulesbrain check --rules <dir>
//! - rulesbrain hash --rules <dir>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rules brain - deterministic rule evaluation over card facts
#[derive(Parser, Debug)]
#[command(name = "rulesbrain")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Start the HTTP service
    Serve {
        /// JSON configuration file; environment variables override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Listen address, overrides RULES_BRAIN_ADDR
        #[arg(long)]
        addr: Option<String>,

        /// Rules directory, overrides RULES_DIR
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Compile the rules directory and print its hash and strata
    Check {
        #[arg(long, default_value = "./rules")]
        rules: PathBuf,
    },

    /// Print the ruleset hash of the rules directory
    Hash {
        #[arg(long, default_value = "./rules")]
        rules: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_flags() {
        let cli = Cli::try_parse_from([
            "rulesbrain",
            "serve",
            "--addr",
            "127.0.0.1:9000",
            "--rules",
            "/srv/rules",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Serve {
                config: None,
                addr: Some("127.0.0.1:9000".into()),
                rules: Some(PathBuf::from("/srv/rules")),
            }
        );
    }

    #[test]
    fn test_rules_default() {
        let cli = Cli::try_parse_from(["rulesbrain", "hash"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Hash {
                rules: PathBuf::from("./rules")
            }
        );
    }

    #[test]
    fn test_unknown_command() {
        assert!(Cli::try_parse_from(["rulesbrain", "start"]).is_err());
    }
}
