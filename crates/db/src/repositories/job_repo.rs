//! Repository for the `jobs` table.
//!
//! Uses the `JobStatus` enum from `models::status` for all status
//! transitions; no status literal appears in SQL.

use sqlx::PgPool;
use alaska_core::types::DbId;

use crate::models::job::Job;
use crate::models::status::JobStatus;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, project_id, analysis_id, status_id, queue_position, claimed_position, \
    claimed_by, commands, output_path, archive, runtime_secs, error_message, \
    started_at, finished_at, created_at, updated_at";

/// Next free queue position: one past the current tail, or 0.
const NEXT_POSITION: &str = "(SELECT COALESCE(MAX(queue_position) + 1, 0) FROM jobs)";

/// Provides queue and lifecycle operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Atomically claim the pending job with the lowest queue position.
    ///
    /// The inner `SELECT ... FOR UPDATE SKIP LOCKED` lets concurrent
    /// dispatchers pass over a row another transaction is claiming, and
    /// the outer `UPDATE` removes the row from the pending set in the same
    /// statement, so a job can never be handed to two workers. The
    /// right-hand sides of `SET` see the pre-update row, which is how the
    /// old position lands in `claimed_position`.
    ///
    /// Jobs whose project sits at one of the `busy` checkpoints are passed
    /// over and keep their position.
    pub async fn claim_next(
        pool: &PgPool,
        worker_id: &str,
        busy: &[String],
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET claimed_position = queue_position, queue_position = NULL, \
                 status_id = $2, claimed_by = $1, started_at = NOW(), finished_at = NULL \
             WHERE id = ( \
                 SELECT j.id FROM jobs j \
                 JOIN projects p ON p.id = j.project_id \
                 WHERE j.queue_position IS NOT NULL AND p.progress <> ALL($3) \
                 ORDER BY j.queue_position ASC, j.id ASC \
                 LIMIT 1 \
                 FOR UPDATE OF j SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(worker_id)
            .bind(JobStatus::Running.id())
            .bind(busy)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_project(pool: &PgPool, project_id: DbId) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE project_id = $1 ORDER BY id");
        sqlx::query_as::<_, Job>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// Jobs still `running` under the given owner.
    pub async fn list_running_by_worker(
        pool: &PgPool,
        worker_id: &str,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE claimed_by = $1 AND status_id = $2 ORDER BY id"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(worker_id)
            .bind(JobStatus::Running.id())
            .fetch_all(pool)
            .await
    }

    /// Create a job outside the queue.
    pub async fn create(
        pool: &PgPool,
        project_id: DbId,
        analysis_id: DbId,
    ) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (project_id, analysis_id, status_id) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(project_id)
            .bind(analysis_id)
            .bind(JobStatus::Queued.id())
            .fetch_one(pool)
            .await
    }

    /// Append a job to the tail of the queue.
    ///
    /// Refuses (returns `None`) while the job is running, so a claimed job
    /// can never be re-queued underneath its dispatcher.
    pub async fn enqueue(pool: &PgPool, id: DbId, archive: bool) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, archive = $3, queue_position = {NEXT_POSITION}, \
                 claimed_position = NULL, claimed_by = NULL, error_message = NULL, \
                 finished_at = NULL \
             WHERE id = $1 AND status_id <> $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Queued.id())
            .bind(archive)
            .bind(JobStatus::Running.id())
            .fetch_optional(pool)
            .await
    }

    pub async fn set_output_path(pool: &PgPool, id: DbId, path: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE jobs SET output_path = $2 WHERE id = $1")
            .bind(id)
            .bind(path)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append one control line to `commands`.
    pub async fn append_command(pool: &PgPool, id: DbId, command: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE jobs SET commands = array_append(commands, $2) WHERE id = $1")
                .bind(id)
                .bind(command)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job successful with its wall-clock runtime.
    pub async fn complete(pool: &PgPool, id: DbId, runtime_secs: f64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, runtime_secs = $3, queue_position = NULL, \
                 finished_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(JobStatus::Success.id())
        .bind(runtime_secs)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job failed. No automatic retry is performed; the job stays in
    /// `error` until the project is explicitly restarted.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, error_message = $3, queue_position = NULL, \
                 finished_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(JobStatus::Error.id())
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Return a running job to the queue at the position it was claimed from.
    pub async fn requeue(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, queue_position = COALESCE(claimed_position, {NEXT_POSITION}), \
                 claimed_position = NULL, claimed_by = NULL, started_at = NULL \
             WHERE id = $1 AND status_id = $3"
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(JobStatus::Queued.id())
            .bind(JobStatus::Running.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Take a project's queued jobs out of the queue, keeping them `queued`.
    pub async fn dequeue_project(pool: &PgPool, project_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET queue_position = NULL \
             WHERE project_id = $1 AND status_id = $2 AND queue_position IS NOT NULL",
        )
        .bind(project_id)
        .bind(JobStatus::Queued.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
