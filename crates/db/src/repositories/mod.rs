//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod analysis_repo;
pub mod event_repo;
pub mod job_repo;
pub mod project_repo;
pub mod reference_repo;
pub mod sample_repo;

pub use analysis_repo::AnalysisRepo;
pub use event_repo::EventRepo;
pub use job_repo::JobRepo;
pub use project_repo::ProjectRepo;
pub use reference_repo::ReferenceRepo;
pub use sample_repo::SampleRepo;
