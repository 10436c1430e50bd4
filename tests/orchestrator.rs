//! End-to-end orchestration tests with a scripted document processor.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use contracts_ai::config::Settings;
use contracts_ai::models::{ExtractedContract, JobStatus, CACHED_NOTE, COMPLETED_NOTE};
use contracts_ai::pdf::PdfCorruption;
use contracts_ai::repository::Database;
use contracts_ai::services::{JobOrchestrator, ProcessDocument, ProcessError, ProcessOutcome};

/// Returns a canned record per file; duplicate contents come back with
/// the cache note, the way the real processor reports a dedup hit, and
/// "mangled" files succeed while carrying a corruption marker.
struct ScriptedProcessor {
    calls: AtomicUsize,
}

#[async_trait]
impl ProcessDocument for ScriptedProcessor {
    async fn process(
        &self,
        _job_root: &Path,
        path: &Path,
    ) -> Result<ProcessOutcome, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cached = filename.starts_with("dup");
        let corruption = filename
            .starts_with("mangled")
            .then_some(PdfCorruption::BrokenXref);
        Ok(ProcessOutcome {
            contract: ExtractedContract {
                filename,
                signing_party: "Acme Corp".to_string(),
                content_hash: "deadbeef".to_string(),
                confidence_score: 80,
                status_note: if cached { CACHED_NOTE } else { COMPLETED_NOTE }.to_string(),
                ..Default::default()
            },
            corruption,
        })
    }
}

/// Fails every file with a generic error.
struct FailingProcessor;

#[async_trait]
impl ProcessDocument for FailingProcessor {
    async fn process(
        &self,
        _job_root: &Path,
        _path: &Path,
    ) -> Result<ProcessOutcome, ProcessError> {
        Err(ProcessError::Failed("no text layer".to_string()))
    }
}

fn test_settings(dir: &Path) -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.data_dir = dir.to_path_buf();
    settings.workers = 2;
    settings.batch_size = 2;
    Arc::new(settings)
}

#[tokio::test]
async fn processes_folder_and_completes_job() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("contracts");
    std::fs::create_dir(&folder).unwrap();
    std::fs::write(folder.join("alpha.pdf"), b"one").unwrap();
    std::fs::write(folder.join("beta.pdf"), b"two").unwrap();
    std::fs::write(folder.join("dup_alpha.pdf"), b"one").unwrap();

    let db = Database::open_in_memory().unwrap();
    let job = db.create_job(&folder.to_string_lossy()).unwrap();
    let processor = Arc::new(ScriptedProcessor {
        calls: AtomicUsize::new(0),
    });
    let orchestrator =
        JobOrchestrator::new(db.clone(), test_settings(dir.path()), processor.clone());

    let summary = orchestrator.run_job(job.id, &folder).await.unwrap();

    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.extracted, 2);
    assert_eq!(summary.cached, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(processor.calls.load(Ordering::SeqCst), 3);
    assert!(summary.report_path.is_some());

    let job = db.get_job(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.message.contains('3'));

    let contracts = db.contracts_for_job(job.id).unwrap();
    assert_eq!(contracts.len(), 3);
}

#[tokio::test]
async fn empty_folder_completes_without_work() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_in_memory().unwrap();
    let job = db.create_job(&dir.path().to_string_lossy()).unwrap();
    let orchestrator = JobOrchestrator::new(
        db.clone(),
        test_settings(dir.path()),
        Arc::new(FailingProcessor),
    );

    let summary = orchestrator.run_job(job.id, dir.path()).await.unwrap();

    assert_eq!(summary.total_files, 0);
    let job = db.get_job(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.message, "No PDF files found");
}

#[tokio::test]
async fn failures_are_tallied_and_job_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("contracts");
    std::fs::create_dir(&folder).unwrap();
    std::fs::write(folder.join("one.pdf"), b"x").unwrap();
    std::fs::write(folder.join("two.pdf"), b"y").unwrap();

    let db = Database::open_in_memory().unwrap();
    let job = db.create_job(&folder.to_string_lossy()).unwrap();
    let orchestrator = JobOrchestrator::new(
        db.clone(),
        test_settings(dir.path()),
        Arc::new(FailingProcessor),
    );

    let summary = orchestrator.run_job(job.id, &folder).await.unwrap();

    assert_eq!(summary.failed, 2);
    assert_eq!(summary.extracted, 0);
    let job = db.get_job(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.message.contains("2 failed"));
    assert!(db.contracts_for_job(job.id).unwrap().is_empty());
}

#[tokio::test]
async fn recovered_corrupt_files_reach_the_histogram() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("contracts");
    std::fs::create_dir(&folder).unwrap();
    std::fs::write(folder.join("clean.pdf"), b"x").unwrap();
    std::fs::write(folder.join("mangled.pdf"), b"y").unwrap();

    let db = Database::open_in_memory().unwrap();
    let job = db.create_job(&folder.to_string_lossy()).unwrap();
    let orchestrator = JobOrchestrator::new(
        db.clone(),
        test_settings(dir.path()),
        Arc::new(ScriptedProcessor {
            calls: AtomicUsize::new(0),
        }),
    );

    let summary = orchestrator.run_job(job.id, &folder).await.unwrap();

    // The mangled file still extracted, but its corruption kind is
    // reported to the operator.
    assert_eq!(summary.extracted, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.corruption.get(&PdfCorruption::BrokenXref), Some(&1));
    let job = db.get_job(job.id).unwrap();
    assert!(job.message.contains("broken xref table x1"));
}

#[tokio::test]
async fn orchestrator_error_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_in_memory().unwrap();
    let job = db.create_job("/nope").unwrap();
    let orchestrator = JobOrchestrator::new(
        db.clone(),
        test_settings(dir.path()),
        Arc::new(FailingProcessor),
    );

    let missing = dir.path().join("does-not-exist");
    let result = orchestrator.run_job(job.id, &missing).await;

    assert!(result.is_err());
    let job = db.get_job(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(!job.message.is_empty());
}

#[tokio::test]
async fn cancellation_stops_at_batch_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("contracts");
    std::fs::create_dir(&folder).unwrap();
    for i in 0..6 {
        std::fs::write(folder.join(format!("file_{i}.pdf")), b"x").unwrap();
    }

    let db = Database::open_in_memory().unwrap();
    let job = db.create_job(&folder.to_string_lossy()).unwrap();
    // Cancelled before the run starts: the boundary check fires before
    // the first batch is submitted.
    db.set_job_status(job.id, JobStatus::Cancelled, "requested")
        .unwrap();

    let processor = Arc::new(ScriptedProcessor {
        calls: AtomicUsize::new(0),
    });
    let orchestrator =
        JobOrchestrator::new(db.clone(), test_settings(dir.path()), processor.clone());

    let summary = orchestrator.run_job(job.id, &folder).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
    assert!(summary.report_path.is_none());
    let job = db.get_job(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.message.contains("Cancelled after 0 of 6"));
}
