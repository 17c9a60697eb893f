//! Ruleset Loader, Hasher & Program Cache
//!
//! Principles:
//! - A ruleset is identified by the SHA-256 of its `*.dl` files, nothing else
//! - Parsing is all-or-nothing; the first error aborts with its position
//! - A hash is compiled at most once per process and the result is shared

mod cache;
mod errors;
mod hasher;
mod lexer;
mod loader;
mod parser;

pub use cache::{InMemoryProgramCache, ProgramCache};
pub use errors::{CompileError, CompileResult, RulesetError, RulesetResult};
pub use hasher::ruleset_hash;
pub use loader::{RuleFile, RulesetLoader, RulesetSource};
pub use parser::parse_unit;
