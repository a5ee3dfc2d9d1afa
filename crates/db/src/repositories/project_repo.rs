//! Repository for the `projects` table.
//!
//! Progress writes are always conditional on the expected current
//! checkpoint so that the dispatcher and the task supervisor can never
//! overwrite each other.

use sqlx::types::Json;
use sqlx::PgPool;
use alaska_core::types::DbId;

use crate::models::project::{CreateProject, Project};

const COLUMNS: &str =
    "id, progress, old_progress, paths, files, owner_email, created_at, updated_at";

pub struct ProjectRepo;

impl ProjectRepo {
    pub async fn create(pool: &PgPool, input: &CreateProject) -> Result<Project, sqlx::Error> {
        let query = format!(
            "INSERT INTO projects (paths, owner_email) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(Json(&input.paths))
            .bind(&input.owner_email)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1");
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_progress(
        pool: &PgPool,
        progress: &[String],
    ) -> Result<Vec<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE progress = ANY($1) ORDER BY id");
        sqlx::query_as::<_, Project>(&query)
            .bind(progress)
            .fetch_all(pool)
            .await
    }

    /// Set one key of the `paths` map.
    pub async fn set_path(
        pool: &PgPool,
        id: DbId,
        key: &str,
        path: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE projects SET paths = jsonb_set(paths, ARRAY[$2], to_jsonb($3::text)) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(key)
        .bind(path)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move `progress` to `to` if it is currently one of `from`.
    ///
    /// With `save_old` the previous checkpoint is kept in `old_progress`,
    /// otherwise `old_progress` is cleared.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        from: &[String],
        to: &str,
        save_old: bool,
    ) -> Result<Option<Project>, sqlx::Error> {
        let query = format!(
            "UPDATE projects \
             SET old_progress = CASE WHEN $4 THEN progress ELSE NULL END, progress = $2 \
             WHERE id = $1 AND progress = ANY($3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .bind(to)
            .bind(from)
            .bind(save_old)
            .fetch_optional(pool)
            .await
    }
}
