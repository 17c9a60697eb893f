//! Rules directory loader
//!
//! Only `*.dl` files directly inside the rules directory participate.
//! Files are kept sorted by name; that order is also the rule declaration
//! order used when breaking provenance ties.

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{CompileError, CompileResult, RulesetError, RulesetResult};
use super::hasher::ruleset_hash;
use super::parser::parse_unit;
use crate::analysis::{compile, CompileOptions, Program};
use crate::model::SourceUnit;

/// One rule file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFile {
    pub name: String,
    pub content: String,
}

impl RuleFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A snapshot of the rule files and their content hash.
#[derive(Debug, Clone)]
pub struct RulesetSource {
    hash: String,
    files: Vec<RuleFile>,
}

impl RulesetSource {
    /// Builds a source from in-memory files.
    pub fn from_files(mut files: Vec<RuleFile>) -> Self {
        files.sort_by(|a, b| a.name.cmp(&b.name));
        let hash = ruleset_hash(files.iter().map(|f| (f.name.as_str(), f.content.as_str())));
        Self { hash, files }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn files(&self) -> &[RuleFile] {
        &self.files
    }

    /// Parses every file, stopping at the first syntax error.
    pub fn parse(&self) -> CompileResult<Vec<SourceUnit>> {
        self.files
            .iter()
            .map(|f| parse_unit(&f.name, &f.content))
            .collect()
    }

    /// Parses and analyzes the whole ruleset.
    pub fn compile(&self, options: &CompileOptions) -> CompileResult<Program> {
        if self.files.is_empty() {
            return Err(CompileError::EmptyRuleset("(no files)".to_string()));
        }
        let units = self.parse()?;
        compile(&self.hash, &units, options)
    }
}

/// Reads rule files from disk.
#[derive(Debug, Clone)]
pub struct RulesetLoader {
    rules_dir: PathBuf,
}

impl RulesetLoader {
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
        }
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    /// Reads the current rule files.
    ///
    /// The directory is re-read on every call so edits show up as a new hash.
    pub fn read(&self) -> RulesetResult<RulesetSource> {
        let entries =
            fs::read_dir(&self.rules_dir).map_err(|e| RulesetError::io(&self.rules_dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RulesetError::io(&self.rules_dir, e))?;
            let path = entry.path();

            if path.extension().map_or(true, |ext| ext != "dl") || !path.is_file() {
                continue;
            }

            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let content = fs::read_to_string(&path).map_err(|e| RulesetError::io(&path, e))?;
            files.push(RuleFile { name, content });
        }

        if files.is_empty() {
            return Err(CompileError::EmptyRuleset(self.rules_dir.display().to_string()).into());
        }

        Ok(RulesetSource::from_files(files))
    }

    /// Current on-disk ruleset hash
    pub fn current_hash(&self) -> RulesetResult<String> {
        Ok(self.read()?.hash)
    }
}
