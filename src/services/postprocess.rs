//! Cleanup of raw model output into presentable contract fields.
//!
//! The model is good at finding values and bad at keeping the operator
//! out of them. Everything here is deterministic repair: blacklist
//! filtering, country inference, entity mapping, filename salvage and
//! title hygiene.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{EntityMapping, Settings};
use crate::models::SignatureStatus;
use crate::text;

/// Country keywords checked against the address, word-bounded and
/// lowercase. Address-derived country always beats the model's raw
/// country claim.
const COUNTRY_KEYWORDS: &[(&str, &str)] = &[
    ("estonia", "Estonia"),
    ("tallinn", "Estonia"),
    ("tartu", "Estonia"),
    ("myanmar", "Myanmar"),
    ("yangon", "Myanmar"),
    ("burma", "Myanmar"),
    ("uk", "United Kingdom"),
    ("london", "United Kingdom"),
    ("england", "United Kingdom"),
    ("germany", "Germany"),
    ("berlin", "Germany"),
    ("munich", "Germany"),
    ("gmbh", "Germany"),
    ("france", "France"),
    ("paris", "France"),
    ("cedex", "France"),
    ("uae", "UAE"),
    ("dubai", "UAE"),
    ("abu dhabi", "UAE"),
    ("singapore", "Singapore"),
    ("turkey", "Turkey"),
    ("istanbul", "Turkey"),
    ("ankara", "Turkey"),
    ("maslak", "Turkey"),
    ("usa", "USA"),
    ("malaysia", "Malaysia"),
    ("kuala lumpur", "Malaysia"),
    ("nigeria", "Nigeria"),
    ("lagos", "Nigeria"),
    ("abuja", "Nigeria"),
    ("india", "India"),
    ("noida", "India"),
    ("delhi", "India"),
];

static WORD_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_,]").unwrap());
static PARENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").unwrap());
static FOUR_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").unwrap());
static ANY_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{1,2}").unwrap());

/// Drop an address that belongs to the operator itself. When the
/// address mixes both parties (joined by a separator), keep the clean
/// parts instead of discarding everything.
pub fn filter_operator_address(address: &str, blacklist: &[String]) -> String {
    let address = address.trim();
    if address.is_empty() {
        return String::new();
    }
    let hit = |candidate: &str| {
        let folded = text::ascii_fold(&candidate.to_lowercase());
        blacklist
            .iter()
            .any(|kw| folded.contains(&text::ascii_fold(&kw.to_lowercase())))
    };
    if !hit(address) {
        return address.to_string();
    }
    for splitter in [";", " and ", " & ", " vs ", "\n"] {
        if address.contains(splitter) {
            let clean: Vec<&str> = address
                .split(splitter)
                .map(str::trim)
                .filter(|part| !part.is_empty() && !hit(part))
                .collect();
            if !clean.is_empty() {
                return clean.join(", ");
            }
        }
    }
    String::new()
}

/// Infer a country from the address text, word-bounded.
pub fn infer_country_from_address(address: &str) -> Option<&'static str> {
    if address.is_empty() {
        return None;
    }
    let lower = address.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    for (keyword, country) in COUNTRY_KEYWORDS {
        let found = if keyword.contains(' ') {
            lower.contains(keyword)
        } else {
            words.iter().any(|w| w == keyword)
        };
        if found {
            return Some(country);
        }
    }
    None
}

/// Title-case a raw country string.
pub fn normalize_country(country: &str) -> String {
    country
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Default operator entity when nothing else matches. Most of the
/// corpus is filed by the Europe entity.
pub fn default_entity() -> (String, String) {
    (
        "TE - Telenity Europe".to_string(),
        "Telenity İletişim Sistemleri Sanayi ve Ticaret A.Ş.".to_string(),
    )
}

/// Map text mentioning an operator entity onto its code and full name.
/// Matching is exact first, then alphanumeric-normalized. `None` means
/// no keyword matched; callers may fall back to visual detection and
/// finally to [`default_entity`].
pub fn determine_operator_entity(
    search_text: &str,
    entities: &[EntityMapping],
) -> Option<(String, String)> {
    let upper = search_text.to_uppercase();
    for entity in entities {
        if upper.contains(&entity.keyword.to_uppercase()) {
            return Some((entity.code.clone(), entity.full_name.clone()));
        }
    }
    let normalized: String = upper.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    for entity in entities {
        let keyword: String = entity
            .keyword
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if !keyword.is_empty() && normalized.contains(&keyword) {
            return Some((entity.code.clone(), entity.full_name.clone()));
        }
    }
    None
}

/// Map a vision model's entity reply onto the code/name pair.
pub fn map_visual_entity(reply: &str) -> Option<(String, String)> {
    let pair = |code: &str, name: &str| Some((code.to_string(), name.to_string()));
    if reply.contains("FZE") || reply.contains("Dubai") {
        pair("FzE - Telenity UAE", "Telenity FZE")
    } else if reply.contains("Inc") || reply.contains("Monroe") {
        pair("TU - Telenity USA", "Telenity Inc")
    } else if reply.contains("İletişim") || reply.contains("Turkey") || reply.contains("Istanbul") {
        pair(
            "TE - Telenity Europe",
            "Telenity İletişim Sistemleri Sanayi ve Ticaret A.Ş.",
        )
    } else if reply.contains("India") || reply.contains("Noida") {
        pair(
            "TI - Telenity India",
            "Telenity Systems Software India Private Limited",
        )
    } else {
        None
    }
}

/// Guess the counterparty name from the filename when the model finds
/// none: split on separators, drop dates, document-type words and
/// operator mentions, take the first survivor.
pub fn company_from_filename(filename: &str, settings: &Settings) -> Option<String> {
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
    let stem = PARENS.replace_all(stem, "");

    let mut ignore: Vec<String> = settings.doc_types.iter().map(|s| s.to_lowercase()).collect();
    ignore.extend(
        [
            "signed", "clean", "copy", "final", "draft", "contract", "agreement", "telenity",
            "v1", "v2", "rev", "eng", "tr", "tur", "executed", "scan", "mutual",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    for part in WORD_SPLIT.split(&stem) {
        let part = part.trim();
        let lower = part.to_lowercase();
        if part.len() < 2
            || FOUR_DIGITS.is_match(part)
            || ignore.contains(&lower)
            || ["signed", "draft", "copy", "version", "telenity"]
                .iter()
                .any(|w| lower.contains(w))
        {
            continue;
        }
        return Some(part.to_string());
    }
    None
}

/// Recover a contract title from the filename: strip dates, month
/// names and filing noise, title-case what remains.
pub fn title_from_filename(filename: &str) -> String {
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
    let mut name = WORD_SPLIT.replace_all(stem, " ").to_string();
    name = FOUR_DIGITS.replace_all(&name, "").to_string();
    name = ANY_DIGITS.replace_all(&name, "").to_string();

    let noise = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug",
        "sep", "oct", "nov", "dec", "ocak", "subat", "mart", "nisan", "mayis", "haziran",
        "temmuz", "agustos", "eylul", "ekim", "kasim", "aralik", "signed", "clean", "copy",
        "final", "draft", "v1", "v2", "rev", "scan", "executed", "telenity", "fze", "inc",
        "ltd", "pvt", "corp",
    ];
    let kept: Vec<String> = name
        .split_whitespace()
        .filter(|word| !noise.contains(&word.to_lowercase().as_str()))
        .map(title_case_word)
        .collect();
    let title = kept.join(" ");
    if title.len() < 3 {
        "Agreement".to_string()
    } else {
        title
    }
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}

/// Sanitize a model-reported title: drop placeholders, cap the length
/// with separator-split salvage, and discard boilerplate sentences or
/// address-looking fragments entirely.
pub fn clean_title(raw: &str) -> String {
    let mut title = raw.replace("<InsertDate>", "").trim().to_string();

    if title.len() > 80 {
        let first = title
            .split([':', ';', '-'])
            .next()
            .map(str::trim)
            .unwrap_or("");
        title = if !first.is_empty() && first.len() < 80 {
            first.to_string()
        } else {
            String::new()
        };
    }

    let lower = title.to_lowercase();
    let boilerplate = [
        "hereinafter",
        "by and between",
        "entered into",
        "agreement is made",
        "service partner agreement including",
    ];
    if boilerplate.iter().any(|kw| lower.contains(kw)) {
        return String::new();
    }

    let address_markers = ["sokak", "cadde", "mahallesi", "street", "avenue", "blok", "no.", "no:"];
    if address_markers.iter().any(|kw| lower.contains(kw)) || lower.chars().any(|c| c.is_ascii_digit())
    {
        return String::new();
    }

    title
}

/// Snap a free-text model value onto one of the allowed options:
/// exact match first, then substring, else the default.
pub fn map_choice(value: &str, options: &[String], default: &str) -> String {
    let val = value.trim().to_lowercase();
    if let Some(exact) = options.iter().find(|opt| opt.to_lowercase() == val) {
        return exact.clone();
    }
    if let Some(sub) = options.iter().find(|opt| val.contains(&opt.to_lowercase())) {
        return sub.clone();
    }
    default.to_string()
}

/// Merge the text-reported signature status with the visual ink count.
/// The text claim wins when present; ink count breaks ties.
pub fn map_signature(text_status: &str, visual_count: usize) -> SignatureStatus {
    let sig = text_status.to_lowercase();
    if sig.contains("fully") || sig.contains("both") {
        SignatureStatus::FullySigned
    } else if sig.contains("counter")
        || sig.contains("partner")
        || sig.contains("vendor")
        || sig.contains("customer")
    {
        SignatureStatus::CounterpartySigned
    } else if sig.contains("telenity") {
        SignatureStatus::OperatorSigned
    } else if visual_count >= 2 {
        SignatureStatus::FullySigned
    } else if visual_count == 1 {
        SignatureStatus::CounterpartySigned
    } else {
        SignatureStatus::OperatorSigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blacklist() -> Vec<String> {
        ["maslak", "büyükdere", "sarıyer", "telenity", "noida", "monroe", "dubai"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn operator_address_is_dropped() {
        let out = filter_operator_address("Büyükdere Cad. Maslak, Sarıyer, İstanbul", &blacklist());
        assert_eq!(out, "");
    }

    #[test]
    fn accent_insensitive_blacklist() {
        // ASCII-typed keyword still hits the accented address.
        assert_eq!(
            filter_operator_address("Sariyer Istanbul Ofisi", &blacklist()),
            ""
        );
    }

    #[test]
    fn mixed_address_keeps_clean_part() {
        let out = filter_operator_address(
            "Acme GmbH, Hauptstr. 5, Berlin; Telenity, Maslak, İstanbul",
            &blacklist(),
        );
        assert_eq!(out, "Acme GmbH, Hauptstr. 5, Berlin");
    }

    #[test]
    fn clean_address_passes_through() {
        let addr = "Peterburi tee 71, Tallinn, Estonia";
        assert_eq!(filter_operator_address(addr, &blacklist()), addr);
    }

    #[test]
    fn country_comes_from_address() {
        assert_eq!(infer_country_from_address("Peterburi tee, Tallinn"), Some("Estonia"));
        assert_eq!(infer_country_from_address("Hauptstr. 5, Berlin"), Some("Germany"));
        assert_eq!(infer_country_from_address("nowhere special"), None);
        // "uk" must be word-bounded, not a substring hit.
        assert_eq!(infer_country_from_address("Bukittinggi plaza"), None);
    }

    #[test]
    fn entity_mapping_with_fallback() {
        let settings = Settings::default();
        let (code, _) =
            determine_operator_entity("TELENITY FZE branch office", &settings.entities).unwrap();
        assert_eq!(code, "FzE - Telenity UAE");
        assert!(determine_operator_entity("completely unrelated", &settings.entities).is_none());
        assert_eq!(default_entity().0, "TE - Telenity Europe");
    }

    #[test]
    fn company_salvaged_from_filename() {
        let settings = Settings::default();
        let name = company_from_filename("NDA_AcmeSoft_signed_2023.pdf", &settings);
        assert_eq!(name.as_deref(), Some("AcmeSoft"));
        assert_eq!(company_from_filename("NDA_Telenity_2023.pdf", &settings), None);
    }

    #[test]
    fn title_hygiene() {
        assert_eq!(clean_title("Master Services Agreement"), "Master Services Agreement");
        assert_eq!(clean_title("This Agreement is made by and between X and Y"), "");
        assert_eq!(clean_title("Büyükdere Cadde No: 123"), "");
        let long = "Service Partner Agreement: with a very long trailing description that runs far past any reasonable title length for a contract";
        assert_eq!(clean_title(long), "Service Partner Agreement");
    }

    #[test]
    fn choice_mapping_is_forgiving() {
        let options = vec!["NDA".to_string(), "Master Services Agreement".to_string()];
        assert_eq!(map_choice("nda", &options, "Other"), "NDA");
        assert_eq!(map_choice("a master services agreement draft", &options, "Other"), "Master Services Agreement");
        assert_eq!(map_choice("lease", &options, "Other"), "Other");
    }

    #[test]
    fn signature_merge_rules() {
        assert_eq!(map_signature("Fully Signed", 0), SignatureStatus::FullySigned);
        assert_eq!(map_signature("countersigned by vendor", 0), SignatureStatus::CounterpartySigned);
        assert_eq!(map_signature("", 2), SignatureStatus::FullySigned);
        assert_eq!(map_signature("", 1), SignatureStatus::CounterpartySigned);
        assert_eq!(map_signature("", 0).as_str(), "Telenity Signed");
    }
}
