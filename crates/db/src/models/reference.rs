//! Genome reference rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use alaska_core::types::{DbId, Timestamp};

/// A row from the `genome_references` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Reference {
    pub id: DbId,
    pub organism: String,
    pub version: String,
    /// Whether the alignment indexes exist.
    pub ready: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReference {
    pub organism: String,
    pub version: String,
}
