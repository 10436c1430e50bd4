//! Date recovery from filenames.
//!
//! Contract filenames are the most reliable date source in this corpus
//! ("NDA_Acme_2023-06-15_signed.pdf") and take precedence over model
//! output. Patterns are tried strictest first; month names tolerate
//! the typos and Turkish names that show up in real folders.

use std::sync::LazyLock;

use regex::Regex;

static YMD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[-_.\s]+(\d{1,2})[-_.\s]+(\d{1,2})").unwrap());
static DMY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})[-_.\s]+(\d{1,2})[-_.\s]+(\d{4})").unwrap());
static YEAR_MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{4}).*?([a-zA-Z]+).*?(\d{1,2})").unwrap());
static DAY_MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,2}).*?([a-zA-Z]+).*?(\d{4})").unwrap());

/// Misspellings and Turkish month names normalized before matching.
const MONTH_CORRECTIONS: &[(&str, &str)] = &[
    ("juna", "june"),
    ("agust", "august"),
    ("sept", "september"),
    ("ocak", "january"),
    ("subat", "february"),
    ("nisan", "april"),
    ("haziran", "june"),
    ("temmuz", "july"),
    ("agustos", "august"),
    ("eylul", "september"),
    ("ekim", "october"),
    ("kasim", "november"),
    ("aralik", "december"),
];

/// Extract a `YYYY-MM-DD` date from a filename, or `None`.
pub fn extract_date_from_filename(filename: &str) -> Option<String> {
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
    let name = correct_month_typos(stem);

    if let Some(caps) = YMD.captures(&name) {
        return format_date(&caps[1], caps[2].parse().ok()?, caps[3].parse().ok()?);
    }
    if let Some(caps) = DMY.captures(&name) {
        return format_date(&caps[3], caps[2].parse().ok()?, caps[1].parse().ok()?);
    }
    if let Some(caps) = YEAR_MONTH_DAY.captures(&name) {
        if let Some(month) = month_number(&caps[2]) {
            if let Ok(day) = caps[3].parse::<u32>() {
                if let Some(date) = format_date(&caps[1], month, day) {
                    return Some(date);
                }
            }
        }
    }
    if let Some(caps) = DAY_MONTH_YEAR.captures(&name) {
        if let Some(month) = month_number(&caps[2]) {
            if let Ok(day) = caps[1].parse::<u32>() {
                if let Some(date) = format_date(&caps[3], month, day) {
                    return Some(date);
                }
            }
        }
    }
    None
}

fn correct_month_typos(name: &str) -> String {
    let mut out = name.to_string();
    for (wrong, right) in MONTH_CORRECTIONS {
        let lower = out.to_lowercase();
        if let Some(pos) = lower.find(wrong) {
            out.replace_range(pos..pos + wrong.len(), right);
        }
    }
    out
}

fn month_number(name: &str) -> Option<u32> {
    let key: String = name.to_lowercase().chars().take(3).collect();
    let months = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    months.iter().position(|m| key.starts_with(m)).map(|i| i as u32 + 1)
}

fn format_date(year: &str, month: u32, day: u32) -> Option<String> {
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(format!("{}-{:02}-{:02}", year, month, day))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_date_wins() {
        assert_eq!(
            extract_date_from_filename("Agreement_2023-06-15_signed.pdf"),
            Some("2023-06-15".to_string())
        );
    }

    #[test]
    fn day_month_year_form() {
        assert_eq!(
            extract_date_from_filename("Contract_11August2025.pdf"),
            Some("2025-08-11".to_string())
        );
    }

    #[test]
    fn numeric_dmy_form() {
        assert_eq!(
            extract_date_from_filename("nda 15.06.2023 clean.pdf"),
            Some("2023-06-15".to_string())
        );
    }

    #[test]
    fn month_typos_are_corrected() {
        assert_eq!(
            extract_date_from_filename("MSA_3 Juna 2024.pdf"),
            Some("2024-06-03".to_string())
        );
    }

    #[test]
    fn turkish_month_names() {
        assert_eq!(
            extract_date_from_filename("Sozlesme_12 Temmuz 2022.pdf"),
            Some("2022-07-12".to_string())
        );
    }

    #[test]
    fn no_date_yields_none() {
        assert_eq!(extract_date_from_filename("Acme_NDA_final.pdf"), None);
    }

    #[test]
    fn nonsense_numbers_rejected() {
        assert_eq!(extract_date_from_filename("report_2023-19-44.pdf"), None);
    }
}
