//! Safety Analyzer
//!
//! Principles:
//! - Reject before running: every unsafe or unstratifiable rule is a compile error
//! - Strata are computed deterministically from sorted predicate names
//! - Join plans are fixed at compile time; evaluation never reorders a body
//! - Client data crosses into the engine only through the whitelist

mod graph;
mod program;
mod safety;
mod stratify;
mod whitelist;

pub use graph::{DependencyGraph, Edge};
pub use program::{
    compile, ArgMatch, AtomPlan, CExpr, CompileOptions, CompiledRule, HeadSlot, KeyPart, PredId,
    Predicate, Program, ProgramSummary, Step, StratumSummary,
};
pub use safety::{plan_rule, RulePlan};
pub use stratify::{stratify, RuleSummary, Stratum};
pub use whitelist::{json_type_name, QueryShape, ValidationError, Whitelist, WILDCARD};
