//! Batch job orchestration.
//!
//! One orchestrator per job: it walks the folder, submits files in
//! fixed-size batches to a bounded worker pool, aggregates results
//! first-completed-first, and persists per batch. Cancellation is
//! cooperative: polled before each batch, with the in-flight batch
//! allowed to finish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::models::{ExtractedContract, JobStatus, CACHED_NOTE};
use crate::pdf::PdfCorruption;
use crate::repository::Database;
use crate::services::export;
use crate::services::processor::{ProcessDocument, ProcessError, ProcessOutcome};

/// Progress is written to the job record every this many files.
const PROGRESS_INTERVAL: usize = 5;

/// End-of-job tallies.
#[derive(Debug, Default, Clone)]
pub struct JobSummary {
    pub total_files: usize,
    pub extracted: usize,
    pub cached: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub corruption: HashMap<PdfCorruption, usize>,
    pub report_path: Option<PathBuf>,
}

impl JobSummary {
    fn message(&self) -> String {
        let mut msg = if self.cancelled {
            format!(
                "Cancelled after {} of {} files",
                self.extracted + self.cached + self.failed,
                self.total_files
            )
        } else {
            format!(
                "Processed {} files: {} extracted, {} from cache, {} failed",
                self.total_files, self.extracted, self.cached, self.failed
            )
        };
        if !self.corruption.is_empty() {
            let mut parts: Vec<String> = self
                .corruption
                .iter()
                .map(|(kind, count)| format!("{} x{}", kind.label(), count))
                .collect();
            parts.sort();
            msg.push_str(&format!(" (corrupt: {})", parts.join(", ")));
        }
        msg
    }
}

pub struct JobOrchestrator {
    db: Database,
    settings: Arc<Settings>,
    processor: Arc<dyn ProcessDocument>,
}

impl JobOrchestrator {
    pub fn new(db: Database, settings: Arc<Settings>, processor: Arc<dyn ProcessDocument>) -> Self {
        Self {
            db,
            settings,
            processor,
        }
    }

    /// Run one job to completion. The job record must already exist.
    /// Per-file errors are tallied and never abort the run; an error
    /// escaping here is orchestrator-level (unreadable folder, storage
    /// failure) and marks the whole job Failed.
    pub async fn run_job(&self, job_id: i64, folder: &Path) -> anyhow::Result<JobSummary> {
        match self.run_job_inner(job_id, folder).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!("Job {}: {:#}", job_id, e);
                if let Err(db_err) =
                    self.db.set_job_status(job_id, JobStatus::Failed, &format!("{:#}", e))
                {
                    error!("Job {}: could not record failure: {}", job_id, db_err);
                }
                Err(e)
            }
        }
    }

    async fn run_job_inner(&self, job_id: i64, folder: &Path) -> anyhow::Result<JobSummary> {
        let files = collect_pdfs(folder)?;
        let mut summary = JobSummary {
            total_files: files.len(),
            ..Default::default()
        };
        if files.is_empty() {
            self.db
                .set_job_status(job_id, JobStatus::Completed, "No PDF files found")?;
            return Ok(summary);
        }

        info!("Job {}: {} files in {}", job_id, files.len(), folder.display());
        self.db
            .set_job_status(job_id, JobStatus::Running, &format!("{} files queued", files.len()))?;

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut processed = 0usize;

        for batch in files.chunks(self.settings.batch_size.max(1)) {
            // Cancellation is honored at batch boundaries only.
            if self.db.job_is_cancelled(job_id).unwrap_or(false) {
                summary.cancelled = true;
                break;
            }

            let mut set: JoinSet<(PathBuf, Result<ProcessOutcome, ProcessError>)> =
                JoinSet::new();
            for file in batch {
                let processor = Arc::clone(&self.processor);
                let semaphore = Arc::clone(&semaphore);
                let root = folder.to_path_buf();
                let file = file.clone();
                set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let result = processor.process(&root, &file).await;
                    (file, result)
                });
            }

            // First-completed-first; results are an unordered set.
            let mut batch_results: Vec<ExtractedContract> = Vec::with_capacity(batch.len());
            while let Some(joined) = set.join_next().await {
                let (file, result) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("worker panicked: {}", e);
                        summary.failed += 1;
                        processed += 1;
                        continue;
                    }
                };
                match result {
                    Ok(outcome) => {
                        // Recovered-but-corrupt files count in the
                        // histogram alongside outright rejects.
                        if let Some(kind) = outcome.corruption {
                            *summary.corruption.entry(kind).or_insert(0) += 1;
                        }
                        if outcome.contract.status_note == CACHED_NOTE {
                            summary.cached += 1;
                        } else {
                            summary.extracted += 1;
                        }
                        batch_results.push(outcome.contract);
                    }
                    Err(ProcessError::Corrupt(kind, detail)) => {
                        warn!("{}: corrupt ({}): {}", file.display(), kind.label(), detail);
                        *summary.corruption.entry(kind).or_insert(0) += 1;
                        summary.failed += 1;
                    }
                    Err(ProcessError::Failed(reason)) => {
                        warn!("{}: failed: {}", file.display(), reason);
                        summary.failed += 1;
                    }
                }
                processed += 1;
                if processed % PROGRESS_INTERVAL == 0 || processed == files.len() {
                    self.write_progress(job_id, processed, files.len(), started)?;
                }
            }

            // Periodic persistence, one transaction per batch.
            if !batch_results.is_empty() {
                self.db.insert_contracts(job_id, &batch_results)?;
            }
        }

        if !summary.cancelled {
            match export::export_job(&self.db, job_id, &self.settings.data_dir) {
                Ok(path) => summary.report_path = Some(path),
                Err(e) => warn!("report export failed: {}", e),
            }
        }

        let status = if summary.cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        let message = summary.message();
        self.db.set_job_status(job_id, status, &message)?;
        info!("Job {}: {}", job_id, message);
        Ok(summary)
    }

    fn write_progress(
        &self,
        job_id: i64,
        processed: usize,
        total: usize,
        started: Instant,
    ) -> anyhow::Result<()> {
        let progress = ((processed * 100) / total.max(1)).min(100) as u8;
        let elapsed = started.elapsed().as_secs();
        let eta = if processed > 0 {
            (elapsed * (total - processed) as u64 / processed as u64) as i64
        } else {
            0
        };
        self.db.update_job_progress(
            job_id,
            progress,
            &format!("{}/{} files processed", processed, total),
            eta,
        )?;
        Ok(())
    }
}

/// All PDFs under the folder, recursive, sorted for deterministic
/// batch composition.
pub fn collect_pdfs(folder: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(folder, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else if path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false)
        {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_pdfs_recursively_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("sub/a.PDF"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = collect_pdfs(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("b.pdf") || files[0].ends_with("sub/a.PDF"));
    }

    #[test]
    fn summary_message_includes_corruption_histogram() {
        let mut summary = JobSummary {
            total_files: 3,
            extracted: 1,
            failed: 2,
            ..Default::default()
        };
        summary.corruption.insert(PdfCorruption::BrokenXref, 2);
        let msg = summary.message();
        assert!(msg.contains("3 files"));
        assert!(msg.contains("broken xref table x2"));
    }
}
