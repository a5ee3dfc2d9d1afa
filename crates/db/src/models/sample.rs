//! Sample rows.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use alaska_core::paths::{ResourceFiles, ResourcePaths};
use alaska_core::types::{DbId, Timestamp};

/// A row from the `samples` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Sample {
    pub id: DbId,
    pub project_id: DbId,
    pub name: String,
    pub paths: Json<ResourcePaths>,
    pub files: Json<ResourceFiles>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
