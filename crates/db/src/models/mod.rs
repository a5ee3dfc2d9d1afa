pub mod analysis;
pub mod job;
pub mod project;
pub mod reference;
pub mod sample;
pub mod status;
