//! Adaptive prompt hints from manual correction history.
//!
//! Reviewers correct extracted fields over time; when a field keeps
//! getting corrected, a short "common mistakes" note is appended to
//! the extraction prompt. Corrections ride in the corrections table
//! (see the repository module).

use tracing::debug;

use crate::repository::{Database, RepoError};

/// Corrections within this trailing window count toward hints.
const WINDOW_DAYS: i64 = 30;
/// A field needs at least this many corrections to earn a hint line.
const MIN_CORRECTIONS: u32 = 3;
const MAX_HINT_FIELDS: usize = 5;

/// Build the adaptive hint block, or `None` when the correction
/// history is too shallow to say anything useful.
pub fn adaptive_hint(db: &Database) -> Result<Option<String>, RepoError> {
    let mistakes = db.common_mistakes(WINDOW_DAYS, MAX_HINT_FIELDS)?;
    let lines: Vec<String> = mistakes
        .iter()
        .filter(|(_, count)| *count >= MIN_CORRECTIONS)
        .map(|(field, count)| hint_line(field, *count))
        .collect();
    if lines.is_empty() {
        return Ok(None);
    }
    debug!("adaptive hint active for {} fields", lines.len());
    Ok(Some(format!(
        "COMMON MISTAKES TO AVOID:\n{}",
        lines.join("\n")
    )))
}

fn hint_line(field: &str, count: u32) -> String {
    match field {
        "address" => format!(
            "- Address field: {} corrections made. Double-check that you exclude Telenity addresses (Maslak, Dubai, Monroe, Noida).",
            count
        ),
        "country" => format!(
            "- Country field: {} corrections made. Ensure country matches the address location.",
            count
        ),
        "signing_party" => format!(
            "- Signing party: {} corrections made. Verify you extract only the counterparty name, not Telenity.",
            count
        ),
        "signed_date" => format!(
            "- Signed date: {} corrections made. Look for date near signature blocks, format as YYYY-MM-DD.",
            count
        ),
        other => format!("- {}: {} corrections made. Review this field carefully.", other, count),
    }
}
