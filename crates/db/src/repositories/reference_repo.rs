//! Repository for the `genome_references` table.

use sqlx::PgPool;
use alaska_core::types::DbId;

use crate::models::reference::{CreateReference, Reference};

const COLUMNS: &str = "id, organism, version, ready, created_at, updated_at";

pub struct ReferenceRepo;

impl ReferenceRepo {
    pub async fn create(pool: &PgPool, input: &CreateReference) -> Result<Reference, sqlx::Error> {
        let query = format!(
            "INSERT INTO genome_references (organism, version) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Reference>(&query)
            .bind(&input.organism)
            .bind(&input.version)
            .fetch_one(pool)
            .await
    }

    pub async fn list_unbuilt(pool: &PgPool) -> Result<Vec<Reference>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM genome_references WHERE NOT ready ORDER BY id");
        sqlx::query_as::<_, Reference>(&query).fetch_all(pool).await
    }

    pub async fn mark_ready(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE genome_references SET ready = TRUE WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
