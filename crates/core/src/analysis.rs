//! Analysis step vocabulary and sandbox invocation conventions.
//!
//! Every analysis script is invoked with the same positional convention:
//!
//! ```text
//! <entry-script> <resourceId> <analysisCode> [<requiredAnalysisCode>] [--archive]
//! ```
//!
//! and runs in a sandbox named `<analysisCode>-<resourceId>`, so at most one
//! sandbox per (analysis, resource) can exist on a host at any time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Flag appended to the command line when the job requests archival.
pub const ARCHIVE_FLAG: &str = "--archive";

/// Whether an analysis runs once per project or once per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Project,
    Sample,
}

impl AnalysisKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Sample => "sample",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "sample" => Ok(Self::Sample),
            other => Err(CoreError::Validation(format!(
                "unknown analysis kind '{other}'"
            ))),
        }
    }
}

/// Build the argument vector for an analysis sandbox.
///
/// `script` is the analysis entry command and may itself contain several
/// whitespace-separated words (e.g. `python3 -u run_qc.py`).
pub fn job_command(
    script: &str,
    resource_id: DbId,
    code: &str,
    requires: Option<&str>,
    archive: bool,
) -> Vec<String> {
    let mut args: Vec<String> = script.split_whitespace().map(str::to_string).collect();
    args.push(resource_id.to_string());
    args.push(code.to_string());
    if let Some(required) = requires {
        args.push(required.to_string());
    }
    if archive {
        args.push(ARCHIVE_FLAG.to_string());
    }
    args
}

/// Deterministic sandbox name for an analysis run against a resource.
pub fn sandbox_name(code: &str, resource_id: DbId) -> String {
    format!("{code}-{resource_id}")
}

/// File name of the durable log inside the analysis working directory.
pub fn output_file_name(code: &str) -> String {
    format!("{code}_output.txt")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
