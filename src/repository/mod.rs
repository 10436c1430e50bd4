//! SQLite persistence for jobs, contract records and corrections.
//!
//! Workers share one connection behind a mutex; writes are batched by
//! the orchestrator (bulk insert at job end, progress updates every
//! few files) so lock contention stays negligible.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::info;

use crate::models::{ExtractedContract, Job, JobStatus};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Contract not found: {0}")]
    ContractNotFound(i64),

    #[error("Field not correctable: {0}")]
    UncorrectableField(String),

    #[error("Invalid stored status: {0}")]
    InvalidStatus(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL DEFAULT '',
    estimated_remaining_seconds INTEGER NOT NULL DEFAULT 0,
    folder TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contracts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    filename TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    contract_type TEXT NOT NULL DEFAULT '',
    company_type TEXT NOT NULL DEFAULT '',
    signing_party TEXT NOT NULL DEFAULT '',
    country TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL DEFAULT '',
    signed_date TEXT NOT NULL DEFAULT '',
    signature_status TEXT NOT NULL DEFAULT '',
    telenity_entity_code TEXT NOT NULL DEFAULT '',
    telenity_entity_name TEXT NOT NULL DEFAULT '',
    confidence_score INTEGER NOT NULL DEFAULT 0,
    needs_review INTEGER NOT NULL DEFAULT 0,
    review_reason TEXT NOT NULL DEFAULT '',
    validation_issue_count INTEGER NOT NULL DEFAULT 0,
    validation_warning_count INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL,
    status_note TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_contracts_hash ON contracts(content_hash);
CREATE INDEX IF NOT EXISTS idx_contracts_job ON contracts(job_id);

CREATE TABLE IF NOT EXISTS corrections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contract_id INTEGER NOT NULL REFERENCES contracts(id),
    field_name TEXT NOT NULL,
    old_value TEXT NOT NULL DEFAULT '',
    new_value TEXT NOT NULL DEFAULT '',
    corrected_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_corrections_field ON corrections(field_name);
"#;

/// Shared database handle.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, RepoError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        conn.execute_batch(SCHEMA)?;
        info!("Database ready at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, RepoError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Poisoning only happens if a holder panicked; the data is
        // plain SQLite state, safe to keep using.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- jobs ----

    pub fn create_job(&self, folder: &str) -> Result<Job, RepoError> {
        let now = Utc::now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO jobs (status, progress, message, estimated_remaining_seconds, folder, created_at, updated_at)
             VALUES (?1, 0, '', 0, ?2, ?3, ?3)",
            params![JobStatus::Pending.as_str(), folder, now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Job {
            id,
            status: JobStatus::Pending,
            progress: 0,
            message: String::new(),
            estimated_remaining_seconds: 0,
            folder: folder.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_job(&self, id: i64) -> Result<Job, RepoError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, status, progress, message, estimated_remaining_seconds, folder, created_at, updated_at
             FROM jobs WHERE id = ?1",
            params![id],
            job_from_row,
        )
        .optional()?
        .ok_or(RepoError::JobNotFound(id))
    }

    pub fn set_job_status(&self, id: i64, status: JobStatus, message: &str) -> Result<(), RepoError> {
        let updated = self.lock().execute(
            "UPDATE jobs SET status = ?1, message = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), message, Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(RepoError::JobNotFound(id));
        }
        Ok(())
    }

    pub fn update_job_progress(
        &self,
        id: i64,
        progress: u8,
        message: &str,
        eta_seconds: i64,
    ) -> Result<(), RepoError> {
        let updated = self.lock().execute(
            "UPDATE jobs SET progress = ?1, message = ?2, estimated_remaining_seconds = ?3, updated_at = ?4
             WHERE id = ?5",
            params![progress, message, eta_seconds, Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(RepoError::JobNotFound(id));
        }
        Ok(())
    }

    /// Cooperative cancellation check: readers poll the stored status.
    pub fn job_is_cancelled(&self, id: i64) -> Result<bool, RepoError> {
        Ok(self.get_job(id)?.status == JobStatus::Cancelled)
    }

    // ---- contracts ----

    pub fn find_contract_by_hash(&self, hash: &str) -> Result<Option<ExtractedContract>, RepoError> {
        let conn = self.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM contracts WHERE content_hash = ?1 LIMIT 1", CONTRACT_COLUMNS),
                params![hash],
                contract_from_row,
            )
            .optional()?)
    }

    /// Insert a batch of results in one transaction.
    pub fn insert_contracts(&self, job_id: i64, contracts: &[ExtractedContract]) -> Result<(), RepoError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO contracts (job_id, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                CONTRACT_COLUMNS
            ))?;
            for c in contracts {
                stmt.execute(params![
                    job_id,
                    c.filename,
                    c.title,
                    c.contract_type,
                    c.company_type,
                    c.signing_party,
                    c.country,
                    c.address,
                    c.signed_date,
                    c.signature_status,
                    c.telenity_entity_code,
                    c.telenity_entity_name,
                    c.confidence_score,
                    c.needs_review,
                    c.review_reason,
                    c.validation_issue_count,
                    c.validation_warning_count,
                    c.content_hash,
                    c.status_note,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn contracts_for_job(&self, job_id: i64) -> Result<Vec<ExtractedContract>, RepoError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM contracts WHERE job_id = ?1 ORDER BY id",
            CONTRACT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![job_id], contract_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- corrections ----

    /// Record a manual correction and apply it: the contract row takes
    /// the corrected value, and its confidence moves up a notch since a
    /// human has now vetted the field.
    pub fn record_correction(
        &self,
        contract_id: i64,
        field_name: &str,
        old_value: &str,
        new_value: &str,
    ) -> Result<(), RepoError> {
        let column = correctable_column(field_name)
            .ok_or_else(|| RepoError::UncorrectableField(field_name.to_string()))?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO corrections (contract_id, field_name, old_value, new_value, corrected_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![contract_id, field_name, old_value, new_value, Utc::now().to_rfc3339()],
        )?;
        let updated = tx.execute(
            &format!(
                "UPDATE contracts SET {} = ?1,
                 confidence_score = MIN(100, confidence_score + {})
                 WHERE id = ?2",
                column, CORRECTION_CONFIDENCE_BUMP
            ),
            params![new_value, contract_id],
        )?;
        if updated == 0 {
            return Err(RepoError::ContractNotFound(contract_id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Correction counts per field over the trailing window, most
    /// corrected first. Feeds the adaptive prompt hints.
    pub fn common_mistakes(&self, days: i64, limit: usize) -> Result<Vec<(String, u32)>, RepoError> {
        let since = (Utc::now() - Duration::days(days)).to_rfc3339();
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT field_name, COUNT(*) AS n FROM corrections
             WHERE corrected_at >= ?1
             GROUP BY field_name ORDER BY n DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![since, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// A corrected field is human-vetted; nudge the score toward trusted.
const CORRECTION_CONFIDENCE_BUMP: u8 = 10;

/// Columns a reviewer may correct. Field names arrive from user input,
/// never interpolated into SQL without this mapping.
fn correctable_column(field_name: &str) -> Option<&'static str> {
    match field_name {
        "title" => Some("title"),
        "contract_type" => Some("contract_type"),
        "company_type" => Some("company_type"),
        "signing_party" => Some("signing_party"),
        "country" => Some("country"),
        "address" => Some("address"),
        "signed_date" => Some("signed_date"),
        "signature_status" => Some("signature_status"),
        "telenity_entity_code" => Some("telenity_entity_code"),
        "telenity_entity_name" => Some("telenity_entity_name"),
        _ => None,
    }
}

const CONTRACT_COLUMNS: &str = "filename, title, contract_type, company_type, signing_party, country, address, signed_date, signature_status, telenity_entity_code, telenity_entity_name, confidence_score, needs_review, review_reason, validation_issue_count, validation_warning_count, content_hash, status_note";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status_raw: String = row.get(1)?;
    let status = JobStatus::parse(&status_raw).unwrap_or(JobStatus::Failed);
    Ok(Job {
        id: row.get(0)?,
        status,
        progress: row.get(2)?,
        message: row.get(3)?,
        estimated_remaining_seconds: row.get(4)?,
        folder: row.get(5)?,
        created_at: parse_timestamp(row.get::<_, String>(6)?),
        updated_at: parse_timestamp(row.get::<_, String>(7)?),
    })
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn contract_from_row(row: &Row<'_>) -> rusqlite::Result<ExtractedContract> {
    Ok(ExtractedContract {
        filename: row.get(0)?,
        title: row.get(1)?,
        contract_type: row.get(2)?,
        company_type: row.get(3)?,
        signing_party: row.get(4)?,
        country: row.get(5)?,
        address: row.get(6)?,
        signed_date: row.get(7)?,
        signature_status: row.get(8)?,
        telenity_entity_code: row.get(9)?,
        telenity_entity_name: row.get(10)?,
        confidence_score: row.get(11)?,
        needs_review: row.get(12)?,
        review_reason: row.get(13)?,
        validation_issue_count: row.get(14)?,
        validation_warning_count: row.get(15)?,
        content_hash: row.get(16)?,
        status_note: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_contract(hash: &str) -> ExtractedContract {
        ExtractedContract {
            filename: "a.pdf".to_string(),
            signing_party: "Acme OÜ".to_string(),
            country: "Estonia".to_string(),
            confidence_score: 88,
            content_hash: hash.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn job_lifecycle_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let job = db.create_job("/contracts/2024").unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        db.set_job_status(job.id, JobStatus::Running, "started").unwrap();
        db.update_job_progress(job.id, 40, "8/20 files", 120).unwrap();
        let loaded = db.get_job(job.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.progress, 40);
        assert_eq!(loaded.estimated_remaining_seconds, 120);

        db.set_job_status(job.id, JobStatus::Cancelled, "cancelled").unwrap();
        assert!(db.job_is_cancelled(job.id).unwrap());
    }

    #[test]
    fn missing_job_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_job(42), Err(RepoError::JobNotFound(42))));
    }

    #[test]
    fn hash_lookup_finds_inserted_contract() {
        let db = Database::open_in_memory().unwrap();
        let job = db.create_job("/x").unwrap();
        db.insert_contracts(job.id, &[sample_contract("abc123")]).unwrap();

        let found = db.find_contract_by_hash("abc123").unwrap().unwrap();
        assert_eq!(found.signing_party, "Acme OÜ");
        assert!(db.find_contract_by_hash("missing").unwrap().is_none());
        assert_eq!(db.contracts_for_job(job.id).unwrap().len(), 1);
    }

    #[test]
    fn correction_updates_contract_and_bumps_confidence() {
        let db = Database::open_in_memory().unwrap();
        let job = db.create_job("/x").unwrap();
        db.insert_contracts(job.id, &[sample_contract("h1")]).unwrap();

        db.record_correction(1, "country", "Estonia", "Latvia").unwrap();
        let contract = db.contracts_for_job(job.id).unwrap().remove(0);
        assert_eq!(contract.country, "Latvia");
        assert_eq!(contract.confidence_score, 98);

        // A second correction caps at 100.
        db.record_correction(1, "address", "", "Brivibas iela 1, Riga").unwrap();
        let contract = db.contracts_for_job(job.id).unwrap().remove(0);
        assert_eq!(contract.address, "Brivibas iela 1, Riga");
        assert_eq!(contract.confidence_score, 100);
    }

    #[test]
    fn corrections_reject_unknown_fields_and_missing_contracts() {
        let db = Database::open_in_memory().unwrap();
        let job = db.create_job("/x").unwrap();
        db.insert_contracts(job.id, &[sample_contract("h1")]).unwrap();

        assert!(matches!(
            db.record_correction(1, "content_hash", "a", "b"),
            Err(RepoError::UncorrectableField(_))
        ));
        assert!(matches!(
            db.record_correction(99, "country", "a", "b"),
            Err(RepoError::ContractNotFound(99))
        ));
    }

    #[test]
    fn common_mistakes_ranks_by_count() {
        let db = Database::open_in_memory().unwrap();
        let job = db.create_job("/x").unwrap();
        db.insert_contracts(job.id, &[sample_contract("h1")]).unwrap();
        for _ in 0..3 {
            db.record_correction(1, "address", "old", "new").unwrap();
        }
        db.record_correction(1, "country", "Turkei", "Turkey").unwrap();

        let mistakes = db.common_mistakes(30, 5).unwrap();
        assert_eq!(mistakes[0], ("address".to_string(), 3));
        assert_eq!(mistakes[1], ("country".to_string(), 1));
    }
}
