//! Project rows and their progress checkpoint.

use std::str::FromStr;

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use alaska_core::error::CoreError;
use alaska_core::paths::{ResourceFiles, ResourcePaths};
use alaska_core::progress::ProjectProgress;
use alaska_core::types::{DbId, Timestamp};

/// A row from the `projects` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: DbId,
    pub progress: String,
    /// Checkpoint saved when a transient `progress` value was entered.
    pub old_progress: Option<String>,
    pub paths: Json<ResourcePaths>,
    pub files: Json<ResourceFiles>,
    pub owner_email: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    pub fn progress(&self) -> Result<ProjectProgress, CoreError> {
        ProjectProgress::from_str(&self.progress)
    }

    /// The saved rollback checkpoint, ignoring unreadable values.
    pub fn saved_progress(&self) -> Option<ProjectProgress> {
        self.old_progress
            .as_deref()
            .and_then(|p| ProjectProgress::from_str(p).ok())
    }
}

/// DTO for creating a project.
#[derive(Debug, Clone, Default)]
pub struct CreateProject {
    pub paths: ResourcePaths,
    pub owner_email: Option<String>,
}
