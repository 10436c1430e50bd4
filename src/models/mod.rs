//! Core data model: analysis jobs and extracted contract records.

mod contract;
mod job;

pub use contract::{ExtractedContract, SignatureStatus, CACHED_NOTE, COMPLETED_NOTE};
pub use job::{Job, JobStatus};
