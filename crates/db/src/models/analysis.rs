//! Analysis step definitions.

use std::str::FromStr;

use serde::Serialize;
use sqlx::FromRow;
use alaska_core::analysis::AnalysisKind;
use alaska_core::error::CoreError;
use alaska_core::types::{DbId, Timestamp};

/// A row from the `analyses` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Analysis {
    pub id: DbId,
    /// Unique short name, also the key of the analysis in `paths`/`files`.
    pub code: String,
    /// `project` or `sample`.
    pub kind: String,
    /// Sandbox image reference.
    pub image: String,
    /// Entry command, run inside the sandbox.
    pub script: String,
    /// Prerequisite analysis whose code is passed on the command line.
    pub requires_id: Option<DbId>,
    /// Ordering of the step within a project pipeline.
    pub step: i32,
    pub active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Analysis {
    pub fn kind(&self) -> Result<AnalysisKind, CoreError> {
        AnalysisKind::from_str(&self.kind)
    }
}

/// DTO for registering an analysis.
#[derive(Debug, Clone)]
pub struct CreateAnalysis {
    pub code: String,
    pub kind: AnalysisKind,
    pub image: String,
    pub script: String,
    pub requires_id: Option<DbId>,
    pub step: i32,
    pub active: bool,
}
