//! Best-effort web lookup for missing company facts.
//!
//! Last resort after extraction, verification and the knowledge base
//! all leave address/country empty. Uses the DuckDuckGo instant answer
//! API (keyless). Failures are silent, the pipeline just keeps the
//! empty fields.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use super::postprocess;

const TIMEOUT: Duration = Duration::from_secs(10);

static ADDRESS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)headquarters?\s+(?:in|at)\s+([^.,]+(?:,\s*[^.,]+){1,3})",
        r"(?i)located\s+(?:in|at)\s+([^.,]+(?:,\s*[^.,]+){1,3})",
        r"(?i)based\s+(?:in|at)\s+([^.,]+(?:,\s*[^.,]+){1,3})",
        r"(?i)office\s+(?:in|at)\s+([^.,]+(?:,\s*[^.,]+){1,3})",
        r"(?i)address:\s*([^.]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Enriched {
    pub address: String,
    pub country: String,
}

pub struct WebEnrichment {
    http: reqwest::Client,
}

impl WebEnrichment {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Look up missing address/country for a company. Returns `None`
    /// when nothing useful was found or the lookup failed.
    pub async fn enrich(&self, company_name: &str) -> Option<Enriched> {
        let name = company_name.trim();
        if name.is_empty() || name == "-" {
            return None;
        }
        info!("Web enrichment: searching for '{}'", name);
        match self.search_duckduckgo(name).await {
            Ok(result) if !result.address.is_empty() || !result.country.is_empty() => {
                info!("Web enrichment hit: '{}' -> {}", name, result.country);
                Some(result)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Web enrichment failed for '{}': {}", name, e);
                None
            }
        }
    }

    async fn search_duckduckgo(&self, name: &str) -> Result<Enriched, reqwest::Error> {
        let response = self
            .http
            .get("https://api.duckduckgo.com/")
            .query(&[
                ("q", format!("{} address headquarters", name).as_str()),
                ("format", "json"),
                ("no_redirect", "1"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;
        let data: Value = response.json().await?;
        Ok(parse_instant_answer(&data))
    }
}

impl Default for WebEnrichment {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull address/country out of an instant answer payload: abstract
/// text first, then infobox rows, then related topics.
fn parse_instant_answer(data: &Value) -> Enriched {
    let mut result = Enriched::default();

    if let Some(abstract_text) = data["Abstract"].as_str() {
        result.address = extract_address(abstract_text);
        result.country = extract_country(abstract_text);
    }

    if let Some(rows) = data["Infobox"]["content"].as_array() {
        for row in rows {
            let label = row["label"].as_str().unwrap_or("").to_lowercase();
            let value = row["value"].as_str().unwrap_or("");
            if value.is_empty() {
                continue;
            }
            if result.address.is_empty()
                && (label.contains("headquarters") || label.contains("location") || label.contains("address"))
            {
                result.address = crate::text::squash_whitespace(value);
            }
            if result.country.is_empty() && label.contains("country") {
                result.country = crate::text::squash_whitespace(value);
            }
        }
    }

    if result.address.is_empty() && result.country.is_empty() {
        if let Some(topics) = data["RelatedTopics"].as_array() {
            for topic in topics {
                let Some(text) = topic["Text"].as_str() else {
                    continue;
                };
                if result.address.is_empty() {
                    result.address = extract_address(text);
                }
                if result.country.is_empty() {
                    result.country = extract_country(text);
                }
                if !result.address.is_empty() && !result.country.is_empty() {
                    break;
                }
            }
        }
    }
    result
}

fn extract_address(text: &str) -> String {
    for pattern in ADDRESS_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let address = crate::text::squash_whitespace(&caps[1]);
            if address.len() > 15 {
                return address;
            }
        }
    }
    String::new()
}

fn extract_country(text: &str) -> String {
    postprocess::infer_country_from_address(text)
        .map(|c| c.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn abstract_text_yields_address_and_country() {
        let data = json!({
            "Abstract": "Acme Mobile is a telecom firm with headquarters in Tallinn, Harju County, Estonia.",
        });
        let result = parse_instant_answer(&data);
        assert!(result.address.contains("Tallinn"));
        assert_eq!(result.country, "Estonia");
    }

    #[test]
    fn infobox_rows_fill_gaps() {
        let data = json!({
            "Abstract": "",
            "Infobox": {"content": [
                {"label": "Headquarters", "value": "Hauptstr. 5,  Berlin"},
                {"label": "Country", "value": "Germany"},
            ]},
        });
        let result = parse_instant_answer(&data);
        assert_eq!(result.address, "Hauptstr. 5, Berlin");
        assert_eq!(result.country, "Germany");
    }

    #[test]
    fn empty_payload_yields_nothing() {
        assert_eq!(parse_instant_answer(&json!({})), Enriched::default());
    }
}
