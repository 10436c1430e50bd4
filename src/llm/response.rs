//! Model response parsing.
//!
//! Models wrap JSON in markdown fences, prepend prose or emit trailing
//! commentary. Parsing is forgiving: strip decoration, take the first
//! balanced object, and fall back to an empty result instead of
//! erroring so one bad completion never sinks a document.

use serde::{Deserialize, Serialize};

/// Raw structured fields as reported by the model. All fields default
/// to empty so a partial response still parses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmFields {
    pub contract_name: String,
    pub doc_type: String,
    pub company_type: String,
    pub text_signature_status: String,
    pub signing_party: String,
    pub country: String,
    pub address: String,
    pub signed_date: String,
    pub start_date: String,
    pub end_date: String,
    pub found_telenity_name: String,
}

impl LlmFields {
    /// True when the model produced nothing usable.
    pub fn is_empty(&self) -> bool {
        self.contract_name.is_empty()
            && self.signing_party.is_empty()
            && self.address.is_empty()
            && self.country.is_empty()
            && self.signed_date.is_empty()
    }

    /// Merge a verification reply into this result. Only non-empty
    /// corrections overwrite, dispatched per field name.
    pub fn apply_corrections(&mut self, corrections: &LlmFields) {
        fn merge(target: &mut String, correction: &str) {
            let correction = correction.trim();
            if !correction.is_empty() {
                *target = correction.to_string();
            }
        }
        merge(&mut self.contract_name, &corrections.contract_name);
        merge(&mut self.doc_type, &corrections.doc_type);
        merge(&mut self.company_type, &corrections.company_type);
        merge(&mut self.text_signature_status, &corrections.text_signature_status);
        merge(&mut self.signing_party, &corrections.signing_party);
        merge(&mut self.country, &corrections.country);
        merge(&mut self.address, &corrections.address);
        merge(&mut self.signed_date, &corrections.signed_date);
        merge(&mut self.start_date, &corrections.start_date);
        merge(&mut self.end_date, &corrections.end_date);
        merge(&mut self.found_telenity_name, &corrections.found_telenity_name);
    }
}

/// Parse a model completion into [`LlmFields`]. Malformed output
/// yields the empty default.
pub fn parse_response(raw: &str) -> LlmFields {
    let stripped = raw.replace("```json", "").replace("```", "");
    let Some(object) = first_balanced_object(&stripped) else {
        return LlmFields::default();
    };
    serde_json::from_str(object).unwrap_or_default()
}

/// Slice out the first balanced `{...}` object, respecting string
/// literals and escapes.
fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let raw = "Here you go:\n```json\n{\"signing_party\": \"Acme OÜ\", \"country\": \"Estonia\"}\n```\nDone.";
        let fields = parse_response(raw);
        assert_eq!(fields.signing_party, "Acme OÜ");
        assert_eq!(fields.country, "Estonia");
        assert!(fields.address.is_empty());
    }

    #[test]
    fn takes_first_balanced_object() {
        let raw = "{\"country\": \"Turkey\"} {\"country\": \"Germany\"}";
        assert_eq!(parse_response(raw).country, "Turkey");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse() {
        let raw = "{\"contract_name\": \"Agreement {draft}\", \"country\": \"UK\"}";
        let fields = parse_response(raw);
        assert_eq!(fields.contract_name, "Agreement {draft}");
    }

    #[test]
    fn garbage_yields_empty_fields() {
        assert!(parse_response("no json here").is_empty());
        assert!(parse_response("{\"signing_party\": ").is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let fields = parse_response("{\"signing_party\": \"X Ltd\", \"bogus\": 1}");
        assert_eq!(fields.signing_party, "X Ltd");
    }

    #[test]
    fn corrections_only_overwrite_non_empty() {
        let mut fields = LlmFields {
            signing_party: "Acme".to_string(),
            country: "Turkey".to_string(),
            ..Default::default()
        };
        let corrections = LlmFields {
            country: "Estonia".to_string(),
            ..Default::default()
        };
        fields.apply_corrections(&corrections);
        assert_eq!(fields.signing_party, "Acme");
        assert_eq!(fields.country, "Estonia");
    }
}
