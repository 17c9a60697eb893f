//! Domain Rule Packs
//!
//! Principles:
//! - The rules decide; this module only binds parameters, injects configured
//!   facts and guards the values the rules depend on
//! - The service refuses a ruleset that does not export the expected outputs
//! - Strategy names form a closed registry

pub mod cards;
pub mod duplicates;
pub mod pricing;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::analysis::{CompileOptions, Program, QueryShape, ValidationError, Whitelist};
use crate::config::ServiceConfig;
use crate::eval::Params;
use crate::model::{Fact, Role, Value, ValueType};
use crate::ruleset::{CompileError, CompileResult};
use crate::store::FactPolicy;

pub use pricing::{parse_vendor_weights, Strategy};

pub const VALID_CARD: &str = "valid_card";
pub const DUPLICATE_OF: &str = "duplicate_of";
pub const PRICE_FOR: &str = "price_for";
pub const VENDOR_WEIGHT: &str = "vendor_weight";

/// Parameters every shipped rule may reference
pub const PARAM_NAMES: [&str; 6] = [
    "now",
    "fresh_cutoff",
    "ocr_title_min",
    "ocr_set_min",
    "phash_hamming_max",
    "price_half_life_days",
];

const SECONDS_PER_DAY: i64 = 86_400;

/// Outputs the service contract requires, with their column types
const CONTRACT: [(&str, &[ValueType]); 3] = [
    (VALID_CARD, &[ValueType::Id]),
    (DUPLICATE_OF, &[ValueType::Id, ValueType::Id]),
    (PRICE_FOR, &[ValueType::Id, ValueType::String, ValueType::Number]),
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("unknown pricing strategy '{0}'")]
    StrategyUnknown(String),
}

/// Thresholds and weights applied to every evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct DomainPack {
    fresh_days: u32,
    ocr_title_min: f64,
    ocr_set_min: f64,
    phash_hamming_max: u32,
    price_half_life_days: f64,
    vendor_weights: Vec<(String, f64)>,
}

impl DomainPack {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            fresh_days: config.fresh_days,
            ocr_title_min: config.ocr_title_min,
            ocr_set_min: config.ocr_set_min,
            phash_hamming_max: config.phash_hamming_max,
            price_half_life_days: config.price_half_life_days,
            vendor_weights: config
                .vendor_weights
                .iter()
                .map(|(v, w)| (v.clone(), *w))
                .collect(),
        }
    }

    /// Compile options declaring the parameters bound by `params`.
    pub fn compile_options() -> CompileOptions {
        CompileOptions::with_params(PARAM_NAMES)
    }

    /// Parameter bindings for an evaluation at `now`.
    pub fn params(&self, now: DateTime<Utc>) -> Params {
        let now_secs = now.timestamp();
        let cutoff = now_secs - i64::from(self.fresh_days) * SECONDS_PER_DAY;
        Params::new()
            .with("now", Value::Num(now_secs as f64))
            .with("fresh_cutoff", Value::Num(cutoff as f64))
            .with("ocr_title_min", Value::Num(self.ocr_title_min))
            .with("ocr_set_min", Value::Num(self.ocr_set_min))
            .with("phash_hamming_max", Value::Num(f64::from(self.phash_hamming_max)))
            .with("price_half_life_days", Value::Num(self.price_half_life_days))
    }

    /// Configured vendor weights as `vendor_weight` facts. Nothing is
    /// injected when the ruleset does not declare that input.
    pub fn ambient_facts(&self, program: &Program) -> Vec<Fact> {
        let declared = program
            .decl(VENDOR_WEIGHT)
            .map_or(false, |d| d.role == Role::Input);
        if !declared {
            return Vec::new();
        }

        let whitelist = Whitelist::new(program);
        self.vendor_weights
            .iter()
            .filter_map(|(vendor, weight)| {
                whitelist
                    .fact(VENDOR_WEIGHT, &[json!(vendor), json!(weight)])
                    .ok()
            })
            .collect()
    }

    /// Value checks for facts of `program`'s input predicates.
    pub fn policy(&self, program: &Program) -> CardPolicy {
        let column = |pred: &str, name: &str| {
            program
                .decl(pred)
                .filter(|d| d.role == Role::Input)
                .and_then(|d| d.columns.iter().position(|c| c.name == name))
        };
        CardPolicy {
            confidence: column(cards::OCR_FIELD, "confidence"),
            phash: column(duplicates::IMG_PHASH, "hash"),
        }
    }

    /// Rejects concrete strategy names outside the registry.
    pub fn check_query(&self, shape: &QueryShape) -> Result<(), DomainError> {
        if shape.predicate != PRICE_FOR {
            return Ok(());
        }
        match shape.args.get(1) {
            Some(Some(value)) => {
                let name = value.as_text().unwrap_or_default();
                Strategy::parse(name)
                    .map(|_| ())
                    .ok_or_else(|| DomainError::StrategyUnknown(name.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Checks that `program` exports the outputs the service answers for.
pub fn check_contract(program: &Program) -> CompileResult<()> {
    for (pred, signature) in CONTRACT {
        let decl = program
            .decl(pred)
            .ok_or_else(|| CompileError::contract(pred, "not declared"))?;
        if decl.role != Role::Output {
            return Err(CompileError::contract(pred, "must be declared as output"));
        }
        if decl.signature() != signature {
            let found: Vec<&str> = decl.signature().iter().map(|t| t.type_name()).collect();
            let expected: Vec<&str> = signature.iter().map(|t| t.type_name()).collect();
            return Err(CompileError::contract(
                pred,
                format!("expected ({}), found ({})", expected.join(", "), found.join(", ")),
            ));
        }
    }
    Ok(())
}

/// Guards OCR confidences and perceptual hashes
#[derive(Debug, Clone, Copy, Default)]
pub struct CardPolicy {
    confidence: Option<usize>,
    phash: Option<usize>,
}

impl FactPolicy for CardPolicy {
    fn check(&self, fact: &Fact) -> Result<(), ValidationError> {
        match (fact.pred.as_str(), self.confidence, self.phash) {
            (cards::OCR_FIELD, Some(col), _) => cards::check_confidence(fact, col, "confidence"),
            (duplicates::IMG_PHASH, _, Some(col)) => duplicates::check_phash(fact, col, "hash"),
            _ => Ok(()),
        }
    }
}
