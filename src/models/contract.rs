//! Extracted contract record.

use serde::{Deserialize, Serialize};

/// Who has signed the document, merged from the model's textual answer
/// and the visual ink heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureStatus {
    FullySigned,
    CounterpartySigned,
    OperatorSigned,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::FullySigned => "Fully Signed",
            SignatureStatus::CounterpartySigned => "Counterparty Signed",
            SignatureStatus::OperatorSigned => "Telenity Signed",
        }
    }

}

/// One structured record per processed file.
///
/// Written once per (job, file) pair; later human corrections update
/// the affected field in place and leave an audit row in the
/// corrections table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedContract {
    pub filename: String,
    /// Formal document title ("Master Services Agreement").
    pub title: String,
    /// Category from the configured choice list ("NDA", "PO", ...).
    pub contract_type: String,
    /// Customer / Partner / Consultant / Other.
    pub company_type: String,
    pub signing_party: String,
    pub country: String,
    pub address: String,
    /// YYYY-MM-DD, empty when unknown.
    pub signed_date: String,
    pub signature_status: String,
    pub telenity_entity_code: String,
    pub telenity_entity_name: String,
    /// 0..=100 calibrated estimate of extraction correctness.
    pub confidence_score: u8,
    pub needs_review: bool,
    pub review_reason: String,
    pub validation_issue_count: u32,
    pub validation_warning_count: u32,
    /// SHA-256 of the file bytes, hex-encoded.
    pub content_hash: String,
    pub status_note: String,
}

/// Note used when a record is returned from the dedup/cache path
/// instead of a fresh extraction.
pub const CACHED_NOTE: &str = "Served from cache";
pub const COMPLETED_NOTE: &str = "Completed";
