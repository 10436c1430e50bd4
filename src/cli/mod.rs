//! CLI commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cache::ContentCache;
use crate::config::Settings;
use crate::knowledge::KnowledgeBase;
use crate::llm::ChatClient;
use crate::models::JobStatus;
use crate::ocr::TesseractOcr;
use crate::pdf::PopplerTools;
use crate::repository::Database;
use crate::services::enrichment::WebEnrichment;
use crate::services::{collect_pdfs, export, feedback, DocumentProcessor, JobOrchestrator};

#[derive(Parser)]
#[command(name = "contracts-ai")]
#[command(about = "Contract document extraction pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = "contracts-ai.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Analyze a folder of contract PDFs
    Analyze {
        /// Folder containing the PDFs
        folder: PathBuf,
        /// Worker pool size
        #[arg(short, long)]
        workers: Option<usize>,
        /// Attach rendered pages to model requests
        #[arg(long)]
        vision: bool,
    },

    /// Show the status of a job
    Status {
        job_id: i64,
        /// Poll until the job reaches a terminal state
        #[arg(short, long)]
        watch: bool,
    },

    /// Request cancellation of a running job
    Cancel { job_id: i64 },

    /// Re-export the CSV report for a finished job
    Export { job_id: i64 },

    /// Check that the external tools and model backend are available
    Tools,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Init => init(&settings),
        Commands::Analyze {
            folder,
            workers,
            vision,
        } => {
            if let Some(workers) = workers {
                settings.workers = workers;
            }
            if vision {
                settings.use_vision = true;
            }
            analyze(settings, &folder).await
        }
        Commands::Status { job_id, watch } => status(&settings, job_id, watch).await,
        Commands::Cancel { job_id } => cancel(&settings, job_id),
        Commands::Export { job_id } => {
            let db = Database::open(&settings.database_path())?;
            let path = export::export_job(&db, job_id, &settings.data_dir)?;
            println!("Report written to {}", style(path.display()).green());
            Ok(())
        }
        Commands::Tools => tools(&settings).await,
    }
}

fn init(settings: &Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;
    Database::open(&settings.database_path())?;
    println!(
        "{} data directory at {}",
        style("Initialized").green(),
        settings.data_dir.display()
    );
    Ok(())
}

async fn analyze(settings: Settings, folder: &PathBuf) -> anyhow::Result<()> {
    anyhow::ensure!(folder.is_dir(), "{} is not a directory", folder.display());

    PopplerTools::check_binaries().context("poppler-utils missing")?;
    TesseractOcr::check_binary().context("tesseract missing")?;

    let file_count = collect_pdfs(folder)?.len();
    if file_count == 0 {
        println!("{}", style("No PDF files found").yellow());
        return Ok(());
    }

    let settings = Arc::new(settings);
    let db = Database::open(&settings.database_path())?;
    let llm = ChatClient::connect(
        &settings.backend,
        settings.doc_types.clone(),
        settings.company_types.clone(),
    )
    .await
    .context("no model backend reachable")?;
    println!(
        "Backend: {} ({})",
        style(llm.backend().label()).cyan(),
        llm.model()
    );

    let adaptive_hint = feedback::adaptive_hint(&db)?;
    let processor = Arc::new(DocumentProcessor {
        settings: Arc::clone(&settings),
        db: db.clone(),
        cache: Arc::new(ContentCache::new(Duration::from_secs(settings.cache_ttl_secs))),
        kb: Arc::new(KnowledgeBase::load(&settings.knowledge_base_path())),
        pdf: Arc::new(PopplerTools::new(settings.render_dpi)),
        ocr: Arc::new(TesseractOcr::new(&settings.tesseract_lang)),
        llm: Arc::new(llm),
        enrichment: Arc::new(WebEnrichment::new()),
        adaptive_hint,
    });

    let job = db.create_job(&folder.to_string_lossy())?;
    println!("Job {} started: {} files", style(job.id).cyan(), file_count);

    let bar = ProgressBar::new(file_count as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    // The progress bar follows the persisted job record, same view an
    // external poller would get.
    let orchestrator = JobOrchestrator::new(db.clone(), Arc::clone(&settings), processor);
    let run = orchestrator.run_job(job.id, folder);
    tokio::pin!(run);
    let summary = loop {
        tokio::select! {
            result = &mut run => break result?,
            _ = tokio::time::sleep(Duration::from_millis(400)) => {
                if let Ok(current) = db.get_job(job.id) {
                    bar.set_position((current.progress as u64 * file_count as u64) / 100);
                    bar.set_message(current.message);
                }
            }
        }
    };
    bar.finish_and_clear();

    let job = db.get_job(job.id)?;
    let styled_status = match job.status {
        JobStatus::Completed => style(job.status.as_str()).green(),
        JobStatus::Cancelled => style(job.status.as_str()).yellow(),
        _ => style(job.status.as_str()).red(),
    };
    println!("{}: {}", styled_status, job.message);
    if let Some(report) = summary.report_path {
        println!("Report: {}", style(report.display()).green());
    }
    if summary.failed > 0 {
        println!("{} {} files failed", style("!").red(), summary.failed);
    }
    Ok(())
}

async fn status(settings: &Settings, job_id: i64, watch: bool) -> anyhow::Result<()> {
    let db = Database::open(&settings.database_path())?;
    loop {
        let job = db.get_job(job_id)?;
        println!(
            "Job {}: {} {}% {} (eta {}s)",
            job.id,
            job.status.as_str(),
            job.progress,
            job.message,
            job.estimated_remaining_seconds
        );
        if !watch || job.status.is_terminal() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

fn cancel(settings: &Settings, job_id: i64) -> anyhow::Result<()> {
    let db = Database::open(&settings.database_path())?;
    let job = db.get_job(job_id)?;
    if job.status.is_terminal() {
        println!("Job {} already {}", job_id, job.status.as_str());
        return Ok(());
    }
    db.set_job_status(job_id, JobStatus::Cancelled, "Cancellation requested")?;
    println!(
        "{} job {} (current batch will finish)",
        style("Cancelling").yellow(),
        job_id
    );
    Ok(())
}

async fn tools(settings: &Settings) -> anyhow::Result<()> {
    let check = |name: &str, result: Result<(), String>| match result {
        Ok(()) => println!("{} {}", style("ok").green(), name),
        Err(e) => println!("{} {}: {}", style("missing").red(), name, e),
    };
    check("poppler-utils", PopplerTools::check_binaries().map_err(|e| e.to_string()));
    check("tesseract", TesseractOcr::check_binary().map_err(|e| e.to_string()));

    match ChatClient::connect(&settings.backend, Vec::new(), Vec::new()).await {
        Ok(client) => println!(
            "{} model backend: {} ({})",
            style("ok").green(),
            client.backend().label(),
            client.model()
        ),
        Err(e) => println!("{} model backend: {}", style("missing").red(), e),
    }
    Ok(())
}
