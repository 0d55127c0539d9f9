//! Configuration from `docsel.toml`.
//!
//! ```toml
//! database_url = "sqlite://family.db"
//! tables = ["person", "family", "event"]
//!
//! [constants.Person]
//! MALE = 1
//! FEMALE = 0
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::assembler::Compiler;
use crate::ast::Literal;
use crate::env::{Environment, Tables, GENEALOGY_TABLES};
use crate::error::{SelectError, SelectResult};

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "docsel.toml";

/// A constant value in `[constants.<Class>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstantValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&ConstantValue> for Literal {
    fn from(value: &ConstantValue) -> Self {
        match value {
            ConstantValue::Bool(b) => Literal::Bool(*b),
            ConstantValue::Int(n) => Literal::Int(*n),
            ConstantValue::Float(x) => Literal::Float(*x),
            ConstantValue::Str(s) => Literal::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store used by `docsel` when not given on the command line.
    pub database_url: Option<String>,
    /// Known table identifiers.
    pub tables: Vec<String>,
    /// Start from the built-in genealogy constants.
    pub builtin_constants: bool,
    /// Class name → constant name → value.
    pub constants: BTreeMap<String, BTreeMap<String, ConstantValue>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            tables: GENEALOGY_TABLES.iter().map(|t| t.to_string()).collect(),
            builtin_constants: true,
            constants: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> SelectResult<Self> {
        toml::from_str(content).map_err(|e| SelectError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> SelectResult<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SelectError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load the first configuration found: an explicit path, `./docsel.toml`,
    /// then the user config directory. Falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> SelectResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("docsel").join("config.toml"));
        }
        paths
    }

    pub fn environment(&self) -> Environment {
        let base = if self.builtin_constants {
            Environment::genealogy()
        } else {
            Environment::new()
        };
        self.constants.iter().fold(base, |env, (class, members)| {
            env.with_class(
                class,
                members.iter().map(|(name, value)| (name.as_str(), Literal::from(value))),
            )
        })
    }

    pub fn tables(&self) -> Tables {
        Tables::new(self.tables.iter().map(String::as_str))
    }

    pub fn compiler(&self) -> Compiler {
        Compiler::new(self.environment(), self.tables())
    }
}
