//! Working-directory and artifact maps owned by projects and samples.
//!
//! Both maps are persisted as JSON objects keyed by string. The legal keys
//! of a `paths` map are fixed:
//!
//! | Key               | Meaning                                         |
//! |-------------------|-------------------------------------------------|
//! | `root`            | The resource's root directory                   |
//! | `read`            | Raw read upload directory (projects only)       |
//! | `<analysis code>` | Working directory of that analysis step         |
//!
//! A `files` map is keyed by analysis code only; each entry maps an artifact
//! name (e.g. `sleuth`, `archive`) to the file it was written to.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const ROOT_KEY: &str = "root";
const READ_KEY: &str = "read";

/// A legal key of a resource `paths` map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKey {
    Root,
    Read,
    Analysis(String),
}

impl PathKey {
    /// Key for an analysis working directory, rejecting codes that collide
    /// with the reserved keys or contain characters unsafe in a path.
    pub fn analysis(code: &str) -> Result<Self, CoreError> {
        validate_analysis_code(code)?;
        Ok(Self::Analysis(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Root => ROOT_KEY,
            Self::Read => READ_KEY,
            Self::Analysis(code) => code,
        }
    }
}

/// Check that `code` may be used as an analysis key.
pub fn validate_analysis_code(code: &str) -> Result<(), CoreError> {
    if code == ROOT_KEY || code == READ_KEY {
        return Err(CoreError::Validation(format!(
            "analysis code '{code}' is reserved"
        )));
    }
    let legal = !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !legal {
        return Err(CoreError::Validation(format!(
            "analysis code '{code}' must be non-empty lowercase alphanumeric"
        )));
    }
    Ok(())
}

/// The `paths` map of a project or sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePaths(BTreeMap<String, String>);

impl ResourcePaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PathKey) -> Option<&str> {
        self.0.get(key.as_str()).map(String::as_str)
    }

    pub fn contains(&self, key: &PathKey) -> bool {
        self.0.contains_key(key.as_str())
    }

    pub fn insert(&mut self, key: PathKey, path: impl Into<String>) {
        self.0.insert(key.as_str().to_string(), path.into());
    }

    /// The root directory, required before any analysis directory can be
    /// derived.
    pub fn root(&self) -> Result<PathBuf, CoreError> {
        self.get(&PathKey::Root)
            .map(PathBuf::from)
            .ok_or_else(|| CoreError::Validation("resource has no root path".into()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// The `files` map of a project or sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceFiles(BTreeMap<String, BTreeMap<String, String>>);

impl ResourceFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of artifact `name` produced by analysis `code`.
    pub fn artifact(&self, code: &str, name: &str) -> Option<&str> {
        self.0.get(code)?.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, code: &str, name: &str, path: impl Into<String>) {
        self.0
            .entry(code.to_string())
            .or_default()
            .insert(name.to_string(), path.into());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
