//! Repository for the `analyses` table.

use sqlx::PgPool;
use alaska_core::types::DbId;

use crate::models::analysis::{Analysis, CreateAnalysis};

const COLUMNS: &str =
    "id, code, kind, image, script, requires_id, step, active, created_at, updated_at";

pub struct AnalysisRepo;

impl AnalysisRepo {
    pub async fn create(pool: &PgPool, input: &CreateAnalysis) -> Result<Analysis, sqlx::Error> {
        let query = format!(
            "INSERT INTO analyses (code, kind, image, script, requires_id, step, active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Analysis>(&query)
            .bind(&input.code)
            .bind(input.kind.as_str())
            .bind(&input.image)
            .bind(&input.script)
            .bind(input.requires_id)
            .bind(input.step)
            .bind(input.active)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Analysis>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM analyses WHERE id = $1");
        sqlx::query_as::<_, Analysis>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Active analyses in pipeline order.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Analysis>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM analyses WHERE active ORDER BY step, id");
        sqlx::query_as::<_, Analysis>(&query).fetch_all(pool).await
    }
}
