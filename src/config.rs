//! Service Configuration
//!
//! Principles:
//! - Every setting has a default; a JSON file and the environment override it
//! - Environment wins over the file
//! - Validated once at startup; a bad value stops the process before it binds

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::parse_vendor_weights;
use crate::http_server::HttpServerConfig;

pub const ENV_ENABLED: &str = "RULES_BRAIN_ENABLED";
pub const ENV_ADDR: &str = "RULES_BRAIN_ADDR";
pub const ENV_RULES_DIR: &str = "RULES_DIR";
pub const ENV_WINDOW_MAX_FACTS: &str = "WINDOW_MAX_FACTS";
pub const ENV_PHASH_HAMMING_MAX: &str = "PHASH_HAMMING_MAX";
pub const ENV_FRESH_DAYS: &str = "FRESH_DAYS";
pub const ENV_OCR_TITLE_MIN: &str = "OCR_TITLE_MIN";
pub const ENV_OCR_SET_MIN: &str = "OCR_SET_MIN";
pub const ENV_VENDOR_WEIGHTS: &str = "VENDOR_WEIGHTS";
pub const ENV_PRICE_HALF_LIFE_DAYS: &str = "PRICE_HALF_LIFE_DAYS";
pub const ENV_EVAL_BUDGET_MS: &str = "EVAL_BUDGET_MS";
pub const ENV_MAX_SESSIONS: &str = "MAX_SESSIONS";
pub const ENV_MAX_BODY_BYTES: &str = "MAX_BODY_BYTES";

const MAX_HAMMING: u32 = 64;
const MAX_FRESH_DAYS: u32 = 3650;

/// Request body allowance per client fact when no explicit limit is set
pub const BODY_BYTES_PER_FACT: usize = 512;
/// Room for the request envelope around the facts
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Runtime configuration of the rules service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Kill-switch; when off every endpoint except health refuses work
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub http: HttpServerConfig,

    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,

    /// Maximum client facts per load
    #[serde(default = "default_window_max_facts")]
    pub window_max_facts: usize,

    #[serde(default = "default_phash_hamming_max")]
    pub phash_hamming_max: u32,

    /// Observations older than this many days are stale
    #[serde(default = "default_fresh_days")]
    pub fresh_days: u32,

    #[serde(default = "default_ocr_title_min")]
    pub ocr_title_min: f64,

    #[serde(default = "default_ocr_set_min")]
    pub ocr_set_min: f64,

    /// Vendor name to weight; vendors not listed weigh 1.0
    #[serde(default)]
    pub vendor_weights: BTreeMap<String, f64>,

    /// Price observation half-life; 0 disables decay
    #[serde(default)]
    pub price_half_life_days: f64,

    /// Wall-clock budget for one load or query
    #[serde(default = "default_eval_budget_ms")]
    pub eval_budget_ms: u64,

    /// Sessions kept at once; loading a new one past this evicts the least
    /// recently loaded
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Request body limit in bytes; derived from `window_max_facts` when unset
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("./rules")
}

fn default_window_max_facts() -> usize {
    20_000
}

fn default_phash_hamming_max() -> u32 {
    5
}

fn default_fresh_days() -> u32 {
    7
}

fn default_ocr_title_min() -> f64 {
    0.93
}

fn default_ocr_set_min() -> f64 {
    0.90
}

fn default_eval_budget_ms() -> u64 {
    2_000
}

fn default_max_sessions() -> usize {
    64
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            http: HttpServerConfig::default(),
            rules_dir: default_rules_dir(),
            window_max_facts: default_window_max_facts(),
            phash_hamming_max: default_phash_hamming_max(),
            fresh_days: default_fresh_days(),
            ocr_title_min: default_ocr_title_min(),
            ocr_set_min: default_ocr_set_min(),
            vendor_weights: BTreeMap::new(),
            price_half_life_days: 0.0,
            eval_budget_ms: default_eval_budget_ms(),
            max_sessions: default_max_sessions(),
            max_body_bytes: None,
        }
    }
}

impl ServiceConfig {
    /// Reads a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overrides fields from `lookup`, which maps variable names to values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get(ENV_ENABLED) {
            self.enabled = parse_bool(ENV_ENABLED, &v)?;
        }
        if let Some(v) = get(ENV_ADDR) {
            self.http.addr = v;
        }
        if let Some(v) = get(ENV_RULES_DIR) {
            self.rules_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_WINDOW_MAX_FACTS) {
            self.window_max_facts = parse_num(ENV_WINDOW_MAX_FACTS, &v)?;
        }
        if let Some(v) = get(ENV_PHASH_HAMMING_MAX) {
            self.phash_hamming_max = parse_num(ENV_PHASH_HAMMING_MAX, &v)?;
        }
        if let Some(v) = get(ENV_FRESH_DAYS) {
            self.fresh_days = parse_num(ENV_FRESH_DAYS, &v)?;
        }
        if let Some(v) = get(ENV_OCR_TITLE_MIN) {
            self.ocr_title_min = parse_num(ENV_OCR_TITLE_MIN, &v)?;
        }
        if let Some(v) = get(ENV_OCR_SET_MIN) {
            self.ocr_set_min = parse_num(ENV_OCR_SET_MIN, &v)?;
        }
        if let Some(v) = get(ENV_VENDOR_WEIGHTS) {
            let parsed = parse_vendor_weights(&v)
                .map_err(|reason| ConfigError::invalid(ENV_VENDOR_WEIGHTS, reason))?;
            let mut weights = BTreeMap::new();
            for (vendor, weight) in parsed {
                let slot = weights.entry(vendor).or_insert(weight);
                *slot = f64::max(*slot, weight);
            }
            self.vendor_weights = weights;
        }
        if let Some(v) = get(ENV_PRICE_HALF_LIFE_DAYS) {
            self.price_half_life_days = parse_num(ENV_PRICE_HALF_LIFE_DAYS, &v)?;
        }
        if let Some(v) = get(ENV_EVAL_BUDGET_MS) {
            self.eval_budget_ms = parse_num(ENV_EVAL_BUDGET_MS, &v)?;
        }
        if let Some(v) = get(ENV_MAX_SESSIONS) {
            self.max_sessions = parse_num(ENV_MAX_SESSIONS, &v)?;
        }
        if let Some(v) = get(ENV_MAX_BODY_BYTES) {
            self.max_body_bytes = Some(parse_num(ENV_MAX_BODY_BYTES, &v)?);
        }
        Ok(())
    }

    /// Checks ranges and cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        self.http
            .socket_addr()
            .map_err(|e| ConfigError::invalid(ENV_ADDR, format!("'{}': {}", self.http.addr, e)))?;

        if self.window_max_facts == 0 {
            return Err(ConfigError::invalid(ENV_WINDOW_MAX_FACTS, "must be at least 1"));
        }
        if self.phash_hamming_max > MAX_HAMMING {
            return Err(ConfigError::invalid(
                ENV_PHASH_HAMMING_MAX,
                format!("{} is outside 0..={}", self.phash_hamming_max, MAX_HAMMING),
            ));
        }
        if self.fresh_days > MAX_FRESH_DAYS {
            return Err(ConfigError::invalid(
                ENV_FRESH_DAYS,
                format!("{} is outside 0..={}", self.fresh_days, MAX_FRESH_DAYS),
            ));
        }
        check_unit(ENV_OCR_TITLE_MIN, self.ocr_title_min)?;
        check_unit(ENV_OCR_SET_MIN, self.ocr_set_min)?;

        if !self.price_half_life_days.is_finite() || self.price_half_life_days < 0.0 {
            return Err(ConfigError::invalid(
                ENV_PRICE_HALF_LIFE_DAYS,
                "must be a non-negative number",
            ));
        }
        for (vendor, weight) in &self.vendor_weights {
            if vendor.is_empty() || !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::invalid(
                    ENV_VENDOR_WEIGHTS,
                    format!("bad entry '{}={}'", vendor, weight),
                ));
            }
        }
        if self.eval_budget_ms == 0 {
            return Err(ConfigError::invalid(ENV_EVAL_BUDGET_MS, "must be at least 1"));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::invalid(ENV_MAX_SESSIONS, "must be at least 1"));
        }
        if self.max_body_bytes == Some(0) {
            return Err(ConfigError::invalid(ENV_MAX_BODY_BYTES, "must be at least 1"));
        }
        Ok(())
    }

    pub fn eval_budget(&self) -> Duration {
        Duration::from_millis(self.eval_budget_ms)
    }

    /// Largest accepted request body. A full window must always fit.
    pub fn body_limit(&self) -> usize {
        self.max_body_bytes.unwrap_or_else(|| {
            self.window_max_facts
                .saturating_mul(BODY_BYTES_PER_FACT)
                .saturating_add(BODY_OVERHEAD_BYTES)
        })
    }
}

fn parse_bool(key: &'static str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{}' is not a boolean", value))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a valid number", value)))
}

fn check_unit(key: &'static str, value: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, format!("{} is outside [0, 1]", value)))
    }
}
