//! Service layer: the extraction pipeline and its supporting logic.
//!
//! Domain logic lives here, separated from CLI concerns, so the same
//! pipeline can be driven by the CLI or an external task runner.

pub mod dates;
pub mod enrichment;
pub mod export;
pub mod feedback;
pub mod orchestrator;
pub mod postprocess;
pub mod processor;
pub mod validate;

pub use orchestrator::{collect_pdfs, JobOrchestrator, JobSummary};
pub use processor::{DocumentProcessor, ProcessDocument, ProcessError, ProcessOutcome};
pub use validate::{validate, ValidationInput, ValidationOutcome};
