//! Job rows: one queued or executed analysis step for a project.

use serde::Serialize;
use sqlx::FromRow;
use alaska_core::types::{DbId, Timestamp};

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
///
/// `queue_position` is set only while the job is pending; the atomic claim
/// moves it into `claimed_position` so an interrupted run can be put back
/// exactly where it was.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub project_id: DbId,
    pub analysis_id: DbId,
    pub status_id: StatusId,
    pub queue_position: Option<i32>,
    pub claimed_position: Option<i32>,
    pub claimed_by: Option<String>,
    pub commands: Vec<String>,
    pub output_path: Option<String>,
    pub archive: bool,
    pub runtime_secs: Option<f64>,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }
}
