//! CLI command implementations
//!
//! - serve: load configuration, warm the program cache and run the HTTP server
//! - check: compile a rules directory and print its summary
//! - hash: print a rules directory's hash

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::args::Command;
use super::errors::{CliError, CliResult};
use crate::config::ServiceConfig;
use crate::domain::{check_contract, DomainPack};
use crate::http_server::HttpServer;
use crate::observability::{log_event, Event};
use crate::ruleset::{RulesetError, RulesetLoader};
use crate::service::RulesService;

/// Main CLI entry point. This is the only function main.rs calls.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve {
            config,
            addr,
            rules,
        } => serve(config.as_deref(), addr, rules),
        Command::Check { rules } => check(&rules, &mut io::stdout().lock()),
        Command::Hash { rules } => hash(&rules, &mut io::stdout().lock()),
    }
}

/// Builds the service configuration: file, then environment, then flags.
pub fn resolve_config(
    config_path: Option<&Path>,
    addr: Option<String>,
    rules: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> CliResult<ServiceConfig> {
    let mut config = match config_path {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    config.apply_env(env)?;
    if let Some(addr) = addr {
        config.http.addr = addr;
    }
    if let Some(rules) = rules {
        config.rules_dir = rules;
    }
    config.validate()?;
    Ok(config)
}

pub fn serve(config_path: Option<&Path>, addr: Option<String>, rules: Option<PathBuf>) -> CliResult<()> {
    log_event(Event::ServiceStart, &[]);
    let config = resolve_config(config_path, addr, rules, |key| std::env::var(key).ok())?;
    log_event(
        Event::ConfigLoaded,
        &[
            ("addr", &config.http.addr),
            ("enabled", if config.enabled { "true" } else { "false" }),
            ("rules_dir", &config.rules_dir.display().to_string()),
        ],
    );

    let service = Arc::new(RulesService::new(config));
    if service.is_enabled() {
        // Compile failures are reported per request as well; serving continues.
        let _ = service.program();
    }

    let server = HttpServer::new(service);
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server.start().await.map_err(|e| {
            let reason = e.to_string();
            log_event(Event::ServeFailed, &[("reason", &reason)]);
            CliError::boot_failed(format!("HTTP server failed: {}", reason))
        })
    })
}

/// Compiles `rules_dir` and writes its summary as JSON.
pub fn check<W: Write>(rules_dir: &Path, out: &mut W) -> CliResult<()> {
    let source = RulesetLoader::new(rules_dir).read()?;
    let program = source
        .compile(&DomainPack::compile_options())
        .and_then(|program| check_contract(&program).map(|_| program))
        .map_err(RulesetError::from)?;

    serde_json::to_writer_pretty(&mut *out, &program.summary())?;
    writeln!(out)?;
    Ok(())
}

pub fn hash<W: Write>(rules_dir: &Path, out: &mut W) -> CliResult<()> {
    let hash = RulesetLoader::new(rules_dir).current_hash()?;
    writeln!(out, "{}", hash)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::errors::CliErrorCode;
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PACK: &str = r#"
input ocr_field(card: id, field: string, confidence: number, captured_at: number).
output valid_card(card: id).
output duplicate_of(a: id, b: id).
output price_for(card: id, strategy: string, price: number).
valid_card(C) :- ocr_field(C, "title", Conf, _), Conf >= $ocr_title_min.
duplicate_of(A, B) :- ocr_field(A, "title", _, T), ocr_field(B, "title", _, T), A < B.
price_for(C, "weighted", P) :- ocr_field(C, "price", P, _).
"#;

    fn rules_dir(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pack.dl"), content).unwrap();
        dir
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_hash_prints_one_line() {
        let dir = rules_dir(PACK);
        let mut out = Vec::new();
        hash(dir.path(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.trim(), RulesetLoader::new(dir.path()).current_hash().unwrap());
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_check_prints_summary() {
        let dir = rules_dir(PACK);
        let mut out = Vec::new();
        check(dir.path(), &mut out).unwrap();

        let summary: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(summary["rules"], 3);
        assert!(summary["strata"].as_array().map_or(false, |s| !s.is_empty()));
    }

    #[test]
    fn test_check_reports_compile_error() {
        let dir = rules_dir("output p(x: id).\np(X) :- q(X).");
        let err = check(dir.path(), &mut Vec::new()).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::CompileError);
    }

    #[test]
    fn test_hash_missing_dir() {
        let err = hash(Path::new("/definitely/not/here"), &mut Vec::new()).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::IoError);
    }

    #[test]
    fn test_resolve_config_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rulesbrain.json");
        fs::write(&path, r#"{"rules_dir": "/from/file", "window_max_facts": 10}"#).unwrap();

        let env = |key: &str| match key {
            "RULES_DIR" => Some("/from/env".to_string()),
            "WINDOW_MAX_FACTS" => Some("20".to_string()),
            _ => None,
        };
        let config =
            resolve_config(Some(&path), Some("127.0.0.1:7000".into()), None, env).unwrap();
        assert_eq!(config.rules_dir, PathBuf::from("/from/env"));
        assert_eq!(config.window_max_facts, 20);
        assert_eq!(config.http.addr, "127.0.0.1:7000");

        let config = resolve_config(None, None, Some("/from/flag".into()), env).unwrap();
        assert_eq!(config.rules_dir, PathBuf::from("/from/flag"));
    }

    #[test]
    fn test_resolve_config_validates() {
        let err = resolve_config(None, Some("bogus".into()), None, no_env).unwrap_err();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
    }
}
