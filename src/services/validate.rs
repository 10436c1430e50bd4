//! Multi-stage validation and confidence scoring.
//!
//! Pure functions over the extracted fields: per-field checks, cross-
//! field consistency, anomaly detection, then a weighted confidence
//! score with flat penalties per issue and warning. The review flag is
//! the pipeline's only quality gate, so the rules here err toward
//! flagging.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;

static LONG_DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{5,}").unwrap());
static UNUSUAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-\.\,\&]").unwrap());

const REVIEW_THRESHOLD: f64 = 50.0;

const VALID_COUNTRIES: &[&str] = &[
    "Turkey", "Türkiye", "Germany", "USA", "United States", "UK", "United Kingdom", "France",
    "Italy", "Spain", "Netherlands", "Belgium", "Switzerland", "Austria", "Poland", "Sweden",
    "Norway", "Denmark", "Finland", "Greece", "Portugal", "China", "Japan", "South Korea",
    "India", "Singapore", "Malaysia", "Thailand", "UAE", "Saudi Arabia", "Qatar", "Egypt",
    "South Africa", "Canada", "Mexico", "Brazil", "Argentina", "Australia", "New Zealand",
    "Russia", "Ukraine", "Estonia", "Myanmar", "Nigeria",
];

/// Fields under validation.
#[derive(Debug, Default, Clone)]
pub struct ValidationInput<'a> {
    pub party: &'a str,
    pub contract_type: &'a str,
    pub signed_date: &'a str,
    pub start_date: &'a str,
    pub end_date: &'a str,
    pub address: &'a str,
    pub country: &'a str,
    pub ocr_quality: f64,
    pub llm_confidence: f64,
}

#[derive(Debug, Clone)]
struct FieldCheck {
    confidence: f64,
    issues: Vec<String>,
    warnings: Vec<String>,
}

impl FieldCheck {
    fn ok() -> Self {
        Self {
            confidence: 100.0,
            issues: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    fn issue(&mut self, confidence: f64, message: impl Into<String>) {
        self.issues.push(message.into());
        self.confidence = self.confidence.min(confidence);
    }

    fn warn(&mut self, confidence: f64, message: impl Into<String>) {
        self.warnings.push(message.into());
        self.confidence = self.confidence.min(confidence);
    }
}

/// Final verdict for one contract.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Overall confidence, 0..=100.
    pub score: u8,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub needs_review: bool,
    pub review_reason: String,
}

/// Run all validation stages and score the result.
pub fn validate(input: &ValidationInput<'_>) -> ValidationOutcome {
    let mut checks: HashMap<&'static str, FieldCheck> = HashMap::new();
    checks.insert("party", check_party(input.party));
    checks.insert("contract_type", check_contract_type(input.contract_type));
    checks.insert("signed_date", check_date(input.signed_date, "signed_date", true));
    checks.insert("start_date", check_date(input.start_date, "start_date", false));
    checks.insert("end_date", check_date(input.end_date, "end_date", false));
    checks.insert("address", check_address(input.address));
    checks.insert("country", check_country(input.country));
    checks.insert("cross_validation", check_cross_fields(input));
    checks.insert("ocr_quality", check_ocr_quality(input.ocr_quality));
    checks.insert("llm_confidence", check_llm_confidence(input.llm_confidence));
    checks.insert("anomaly_detection", check_anomalies(input));

    let score = overall_score(&checks);
    let issues: Vec<String> = checks.values().flat_map(|c| c.issues.clone()).collect();
    let warnings: Vec<String> = checks.values().flat_map(|c| c.warnings.clone()).collect();

    let (needs_review, review_reason) = review_verdict(score, &issues, &warnings, &checks);

    ValidationOutcome {
        score: score.round().clamp(0.0, 100.0) as u8,
        issues,
        warnings,
        needs_review,
        review_reason,
    }
}

fn check_party(party: &str) -> FieldCheck {
    let mut check = FieldCheck::ok();
    let trimmed = party.trim();
    if trimmed.len() < 2 {
        check.issue(0.0, "Party name is empty or too short");
    } else if trimmed.len() < 5 {
        check.warn(50.0, "Party name seems very short");
    } else if ["unknown", "n/a", "null", "none"].contains(&trimmed.to_lowercase().as_str()) {
        check.issue(10.0, "Party name is placeholder");
    } else if LONG_DIGIT_RUN.is_match(trimmed) {
        check.warn(70.0, "Party name contains long number sequence");
    }
    check
}

fn check_contract_type(contract_type: &str) -> FieldCheck {
    let mut check = FieldCheck::ok();
    let trimmed = contract_type.trim();
    if trimmed.len() < 3 {
        check.issue(0.0, "Contract type is empty or too short");
    } else if ["unknown", "n/a", "null", "other"].contains(&trimmed.to_lowercase().as_str()) {
        check.warn(40.0, "Contract type is generic/placeholder");
    }
    check
}

/// `required` distinguishes the signed date (empty is an issue) from
/// the optional start/end dates (empty is only a warning).
fn check_date(date: &str, name: &str, required: bool) -> FieldCheck {
    let mut check = FieldCheck::ok();
    if date.trim().is_empty() {
        if required {
            check.issue(0.0, format!("{} is empty", name));
        } else {
            check.warn(50.0, format!("{} is empty", name));
        }
        return check;
    }
    let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        check.issue(0.0, format!("{} has invalid format (expected YYYY-MM-DD)", name));
        return check;
    };

    let current_year = Utc::now().year();
    let year = parsed.year();
    if year < 1950 {
        check.issue(20.0, format!("{} year is too old ({})", name, year));
    } else if year < 1990 {
        check.warn(60.0, format!("{} year seems old ({})", name, year));
    } else if year > current_year + 10 {
        check.issue(30.0, format!("{} year is too far in future ({})", name, year));
    } else if year > current_year + 5 {
        check.warn(70.0, format!("{} year is far in future ({})", name, year));
    }

    if parsed.month() == 1 && parsed.day() == 1 {
        check.warn(80.0, format!("{} is Jan 1 (might be default/placeholder)", name));
    }
    check
}

fn check_address(address: &str) -> FieldCheck {
    let mut check = FieldCheck::ok();
    let trimmed = address.trim();
    if trimmed.len() < 5 {
        check.issue(0.0, "Address is empty or too short");
    } else if ["unknown", "n/a", "null"].contains(&trimmed.to_lowercase().as_str()) {
        check.issue(10.0, "Address is placeholder");
    } else if trimmed.len() < 15 {
        check.warn(60.0, "Address seems incomplete");
    }
    check
}

fn check_country(country: &str) -> FieldCheck {
    let mut check = FieldCheck::ok();
    let trimmed = country.trim();
    if trimmed.len() < 2 {
        check.issue(0.0, "Country is empty");
    } else if !VALID_COUNTRIES.contains(&trimmed) {
        check.warn(70.0, format!("Country '{}' not in known list", trimmed));
    }
    check
}

fn check_cross_fields(input: &ValidationInput<'_>) -> FieldCheck {
    let mut check = FieldCheck::ok();
    let parse = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok();

    if let (Some(signed), Some(start)) = (parse(input.signed_date), parse(input.start_date)) {
        if signed > start {
            check.warn(80.0, "Signed date is after start date");
        }
        if (start - signed).num_days() > 365 {
            check.warn(85.0, "Large gap between signed and start date");
        }
    }
    if let (Some(start), Some(end)) = (parse(input.start_date), parse(input.end_date)) {
        if end <= start {
            check.issue(40.0, "End date is before or equal to start date");
        } else {
            let duration_days = (end - start).num_days();
            if duration_days < 30 {
                check.warn(75.0, format!("Very short contract duration ({} days)", duration_days));
            } else if duration_days > 3650 {
                check.warn(80.0, format!("Very long contract duration ({} years)", duration_days / 365));
            }
        }
    }
    check
}

fn check_ocr_quality(quality: f64) -> FieldCheck {
    let mut check = FieldCheck::ok();
    check.confidence = quality;
    if quality < 60.0 {
        check.issues.push("Low OCR quality detected".to_string());
    } else if quality < 75.0 {
        check.warnings.push("OCR quality could be improved".to_string());
    }
    check
}

fn check_llm_confidence(confidence: f64) -> FieldCheck {
    let mut check = FieldCheck::ok();
    check.confidence = confidence;
    if confidence < 50.0 {
        check.issues.push("Low LLM confidence".to_string());
    } else if confidence < 70.0 {
        check.warnings.push("LLM confidence could be better".to_string());
    }
    check
}

fn check_anomalies(input: &ValidationInput<'_>) -> FieldCheck {
    let mut check = FieldCheck::ok();
    let party = input.party;
    if has_repeated_run(party, 5) {
        check.warn(70.0, "Party name has repeated characters");
    }
    if party.len() > 10 && party.chars().all(|c| !c.is_lowercase()) && party.chars().any(|c| c.is_alphabetic()) {
        check.warn(85.0, "Party name is all uppercase (possible OCR issue)");
    }
    if UNUSUAL_CHARS.is_match(party) {
        check.warn(80.0, "Party name contains unusual characters");
    }
    if input.contract_type.chars().any(|c| c.is_ascii_digit()) {
        check.warn(85.0, "Contract type contains numbers");
    }
    if !input.address.is_empty() && !input.country.is_empty() && input.address.len() < 20 {
        check.warn(75.0, "Address is very short despite having country");
    }
    check
}

fn has_repeated_run(s: &str, run: usize) -> bool {
    let mut count = 0;
    let mut previous = None;
    for c in s.chars() {
        if Some(c) == previous {
            count += 1;
            if count >= run {
                return true;
            }
        } else {
            previous = Some(c);
            count = 1;
        }
    }
    false
}

/// Weighted average of field confidences minus flat penalties.
fn overall_score(checks: &HashMap<&'static str, FieldCheck>) -> f64 {
    const WEIGHTS: &[(&str, f64)] = &[
        ("party", 0.20),
        ("contract_type", 0.15),
        ("signed_date", 0.15),
        ("start_date", 0.10),
        ("end_date", 0.10),
        ("address", 0.10),
        ("country", 0.10),
        ("cross_validation", 0.05),
        ("ocr_quality", 0.025),
        ("llm_confidence", 0.025),
    ];

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (field, weight) in WEIGHTS {
        if let Some(check) = checks.get(field) {
            weighted_sum += check.confidence * weight;
            total_weight += weight;
        }
    }
    let base = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 };

    let issue_count: usize = checks.values().map(|c| c.issues.len()).sum();
    let warning_count: usize = checks.values().map(|c| c.warnings.len()).sum();
    (base - (issue_count as f64 * 5.0) - (warning_count as f64 * 2.0)).clamp(0.0, 100.0)
}

fn review_verdict(
    score: f64,
    issues: &[String],
    warnings: &[String],
    checks: &HashMap<&'static str, FieldCheck>,
) -> (bool, String) {
    let mut reasons = Vec::new();
    if score < REVIEW_THRESHOLD {
        reasons.push(format!("Low confidence ({:.1}%)", score));
    }
    if !issues.is_empty() {
        reasons.push(format!("{} critical issues", issues.len()));
    }
    if warnings.len() >= 5 {
        reasons.push(format!("{} warnings", warnings.len()));
    }
    for field in ["party", "signed_date", "contract_type"] {
        if let Some(check) = checks.get(field) {
            if !check.is_valid() {
                reasons.push(format!("Invalid {}", field));
            } else if check.confidence < 50.0 {
                reasons.push(format!("Low confidence {}", field));
            }
        }
    }
    if reasons.is_empty() {
        (false, String::new())
    } else {
        (true, reasons.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_input() -> ValidationInput<'static> {
        ValidationInput {
            party: "Acme Mobile OÜ",
            contract_type: "Master Services Agreement",
            signed_date: "2023-06-15",
            start_date: "2023-07-01",
            end_date: "2025-06-30",
            address: "Peterburi tee 71-348, 11415 Tallinn, Estonia",
            country: "Estonia",
            ocr_quality: 90.0,
            llm_confidence: 85.0,
        }
    }

    #[test]
    fn clean_extraction_passes() {
        let outcome = validate(&good_input());
        assert!(outcome.score >= 80, "score was {}", outcome.score);
        assert!(!outcome.needs_review);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn empty_party_forces_review() {
        let mut input = good_input();
        input.party = "";
        let outcome = validate(&input);
        assert!(outcome.needs_review);
        assert!(outcome.review_reason.contains("party"));
    }

    #[test]
    fn bad_date_format_is_an_issue() {
        let mut input = good_input();
        input.signed_date = "15/06/2023";
        let outcome = validate(&input);
        assert!(outcome.needs_review);
        assert!(outcome.issues.iter().any(|i| i.contains("invalid format")));
    }

    #[test]
    fn ancient_year_rejected_jan_first_warned() {
        let mut input = good_input();
        input.signed_date = "1912-05-01";
        assert!(validate(&input).issues.iter().any(|i| i.contains("too old")));

        let mut input = good_input();
        input.signed_date = "2023-01-01";
        let outcome = validate(&input);
        assert!(outcome.warnings.iter().any(|w| w.contains("Jan 1")));
    }

    #[test]
    fn inverted_date_range_is_an_issue() {
        let mut input = good_input();
        input.start_date = "2024-01-01";
        input.end_date = "2023-01-02";
        let outcome = validate(&input);
        assert!(outcome.issues.iter().any(|i| i.contains("End date")));
    }

    #[test]
    fn decade_long_contract_only_warns() {
        let mut input = good_input();
        input.start_date = "2010-01-02";
        input.end_date = "2024-01-02";
        let outcome = validate(&input);
        assert!(outcome.warnings.iter().any(|w| w.contains("long contract duration")));
        assert!(!outcome.issues.iter().any(|i| i.contains("duration")));
    }

    #[test]
    fn anomalous_party_names_warn() {
        let mut input = good_input();
        input.party = "AAAAAAAA TELEKOM";
        let outcome = validate(&input);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.contains("repeated characters") || w.contains("uppercase")));
    }

    #[test]
    fn score_stays_in_bounds() {
        let input = ValidationInput {
            ocr_quality: 0.0,
            llm_confidence: 0.0,
            ..Default::default()
        };
        let outcome = validate(&input);
        assert_eq!(outcome.score, 0);
        assert!(outcome.needs_review);
    }
}
