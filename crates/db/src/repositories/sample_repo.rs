//! Repository for the `samples` table.

use sqlx::types::Json;
use sqlx::PgPool;
use alaska_core::paths::ResourcePaths;
use alaska_core::types::DbId;

use crate::models::sample::Sample;

const COLUMNS: &str = "id, project_id, name, paths, files, created_at, updated_at";

pub struct SampleRepo;

impl SampleRepo {
    pub async fn create(
        pool: &PgPool,
        project_id: DbId,
        name: &str,
        paths: &ResourcePaths,
    ) -> Result<Sample, sqlx::Error> {
        let query = format!(
            "INSERT INTO samples (project_id, name, paths) VALUES ($1, $2, $3) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Sample>(&query)
            .bind(project_id)
            .bind(name)
            .bind(Json(paths))
            .fetch_one(pool)
            .await
    }

    pub async fn list_by_project(
        pool: &PgPool,
        project_id: DbId,
    ) -> Result<Vec<Sample>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM samples WHERE project_id = $1 ORDER BY name");
        sqlx::query_as::<_, Sample>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    pub async fn set_path(
        pool: &PgPool,
        id: DbId,
        key: &str,
        path: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE samples SET paths = jsonb_set(paths, ARRAY[$2], to_jsonb($3::text)) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(key)
        .bind(path)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
