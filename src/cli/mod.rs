//! CLI module
//!
//! - serve: run the HTTP service
//! - check: compile a rules directory and print hash and strata
//! - hash: print a rules directory's hash

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{check, hash, resolve_config, run, run_command, serve};
pub use errors::{CliError, CliErrorCode, CliResult};
