//! Prompt construction for contract extraction.
//!
//! Few-shot examples are kept deliberately short; the token budget is
//! dominated by the document text itself, which is truncated head+tail
//! since parties live at the start and signature blocks at the end.

use serde_json::{json, Value};

use crate::llm::LlmFields;
use crate::pdf::QualityReport;

/// Character budget for document text in a single request.
pub const TEXT_BUDGET: usize = 14_000;

/// At most this many page images are attached to a vision request.
pub const MAX_IMAGES: usize = 4;

const SYSTEM_INSTRUCTIONS: &str = r#"You extract structured JSON from contract documents.
Rules:
1. signing_party: Only the counterparty (not Telenity). Remove 'Telenity' parts.
2. address: Full postal address of counterparty (street, city, country). If Telenity address appears (Maslak, Dubai, Monroe, Noida) exclude it.
3. country: Derive from the address; do not hallucinate.
4. signed_date: Prefer explicit date patterns (YYYY-MM-DD, DD Month YYYY). If multiple, choose the execution/signature block date.
5. contract_name: Concise formal title (e.g. 'Master Services Agreement', 'Non-Disclosure Agreement'). Strip parties and dates.
6. doc_type / company_type: pick the closest option from the allowed lists.
7. text_signature_status: Fully Signed | Telenity Signed | Counterparty Signed.
8. found_telenity_name: exact Telenity entity name appearing in the document.
9. Fix obvious OCR errors (lstanbul -> İstanbul). No placeholders like <InsertDate>.
10. Return ONLY JSON. No commentary."#;

const FEW_SHOT: &str = r#"### Example Input
FILE: msa_abc_2023-06-15.pdf
CONTRACT_TEXT: This MASTER SERVICES AGREEMENT ("Agreement") is made on 15 June 2023 between Telenity and ABC Mobile OÜ located at Peterburi tee 71-348, 11415 Tallinn, Estonia.
### Example Output
{"contract_name":"Master Services Agreement","signing_party":"ABC Mobile OÜ","address":"Peterburi tee 71-348, 11415 Tallinn, Estonia","country":"Estonia","signed_date":"2023-06-15","text_signature_status":"Fully Signed"}

### Example Input
FILE: nda_xyz_2024-01-10.pdf
CONTRACT_TEXT: BU GİZLİLİK SÖZLEŞMESİ (NDA) 10 Ocak 2024 tarihinde Telenity Europe ve XYZ Teknoloji Ltd. arasında imzalanmıştır. XYZ Teknoloji Ltd. adresi: Büyükdere Cad. No: 123 Maslak Sarıyer İstanbul Türkiye.
### Example Output
{"contract_name":"Non-Disclosure Agreement","signing_party":"XYZ Teknoloji Ltd.","address":"Büyükdere Cad. No: 123 Maslak, Sarıyer, İstanbul, Türkiye","country":"Turkey","signed_date":"2024-01-10","text_signature_status":"Fully Signed"}"#;

const OUTPUT_SKELETON: &str = r#"{"contract_name":"","doc_type":"","company_type":"","text_signature_status":"","signing_party":"","country":"","address":"","signed_date":"","start_date":"","end_date":"","found_telenity_name":""}"#;

/// Keep the head and tail of over-budget text, dropping the middle.
pub fn truncate_text(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let half = budget / 2;
    let head: String = text.chars().take(half).collect();
    let tail_start = text.chars().count() - half;
    let tail: String = text.chars().skip(tail_start).collect();
    format!("{}\n...[TRUNCATED]...\n{}", head, tail)
}

/// Everything that varies per request.
pub struct PromptInputs<'a> {
    pub text: &'a str,
    pub filename: &'a str,
    pub filename_date: Option<&'a str>,
    pub doc_types: &'a [String],
    pub company_types: &'a [String],
    pub quality: Option<&'a QualityReport>,
    pub adaptive_hint: Option<&'a str>,
}

/// Build OpenAI-style chat messages for an extraction request.
/// Base64 JPEG pages, when given, are attached to the user message.
pub fn extraction_messages(inputs: &PromptInputs<'_>, images_b64: &[String]) -> Vec<Value> {
    let mut system = format!(
        "{}\nAllowed doc_type: {}\nAllowed company_type: {}",
        SYSTEM_INSTRUCTIONS,
        inputs.doc_types.join(", "),
        inputs.company_types.join(", "),
    );
    if let Some(quality) = inputs.quality {
        if quality.is_scanned {
            system.push_str(
                "\nDocument seems scanned; rely more on visual layout for addresses and signatures.",
            );
        } else if quality.score < 70 {
            system.push_str("\nLow quality source: double-check extracted address and date.");
        }
    }
    if let Some(hint) = inputs.adaptive_hint {
        system.push('\n');
        system.push_str(hint);
    }

    let date_hint = inputs
        .filename_date
        .map(|d| format!("\nFILE DATE: {}", d))
        .unwrap_or_default();
    let user = format!(
        "{}\n\n### Task\nFILE: {}{}\nCONTRACT_TEXT:\n{}\n\nReturn JSON only: {}",
        FEW_SHOT,
        inputs.filename,
        date_hint,
        truncate_text(inputs.text, TEXT_BUDGET),
        OUTPUT_SKELETON,
    );

    let mut content = vec![json!({"type": "text", "text": user})];
    for b64 in images_b64.iter().take(MAX_IMAGES) {
        content.push(json!({
            "type": "image_url",
            "image_url": {"url": format!("data:image/jpeg;base64,{}", b64)},
        }));
    }

    vec![
        json!({"role": "system", "content": system}),
        json!({"role": "user", "content": content}),
    ]
}

/// Build the low-temperature audit request used by the verification
/// pass: the model reviews its own structured output against the raw
/// text and returns only the fields it wants to correct.
pub fn verification_messages(fields: &LlmFields, text: &str, filename: &str) -> Vec<Value> {
    let current = serde_json::to_string(fields).unwrap_or_else(|_| "{}".to_string());
    let user = format!(
        "FILE: {}\nEXTRACTED: {}\nCONTRACT_TEXT:\n{}\n\nAudit the extracted JSON against the text. \
         Return a JSON object containing ONLY the fields that are wrong, with corrected values. \
         Return {{}} if everything is correct.",
        filename,
        current,
        truncate_text(text, TEXT_BUDGET / 2),
    );
    vec![
        json!({"role": "system", "content": "You audit structured contract extractions. Return ONLY JSON."}),
        json!({"role": "user", "content": user}),
    ]
}

/// Prompt asking a vision model to identify the operator entity from a
/// page image (logo/letterhead).
pub fn entity_detection_messages(image_b64: &str) -> Vec<Value> {
    let prompt = "Look at this document image. Identify which Telenity company this document \
belongs to based on the logo, header, or letterhead.\n\nOptions:\n\
- Telenity FZE (UAE, Dubai)\n\
- Telenity Inc (USA, Monroe)\n\
- Telenity İletişim Sistemleri Sanayi ve Ticaret A.Ş. (Turkey, Istanbul)\n\
- Telenity Systems Software India Private Limited (India, Noida)\n\n\
Respond with ONLY the exact company name from the options above, or \"Unknown\".";
    vec![json!({
        "role": "user",
        "content": [
            {"type": "text", "text": prompt},
            {"type": "image_url", "image_url": {"url": format!("data:image/jpeg;base64,{}", image_b64)}},
        ],
    })]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through() {
        assert_eq!(truncate_text("hello", 100), "hello");
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text = format!("{}{}{}", "A".repeat(400), "B".repeat(400), "C".repeat(400));
        let out = truncate_text(&text, 200);
        assert!(out.starts_with(&"A".repeat(100)));
        assert!(out.ends_with(&"C".repeat(100)));
        assert!(out.contains("...[TRUNCATED]..."));
        assert!(!out.contains('B'));
    }

    #[test]
    fn vision_request_caps_images() {
        let inputs = PromptInputs {
            text: "some text",
            filename: "a.pdf",
            filename_date: None,
            doc_types: &["NDA".to_string()],
            company_types: &["Customer".to_string()],
            quality: None,
            adaptive_hint: None,
        };
        let images: Vec<String> = (0..6).map(|i| format!("img{}", i)).collect();
        let messages = extraction_messages(&inputs, &images);
        let content = messages[1]["content"].as_array().unwrap();
        // 1 text part + 4 images
        assert_eq!(content.len(), 1 + MAX_IMAGES);
    }

    #[test]
    fn filename_date_lands_in_prompt() {
        let inputs = PromptInputs {
            text: "text",
            filename: "contract_2023.pdf",
            filename_date: Some("2023-06-15"),
            doc_types: &[],
            company_types: &[],
            quality: None,
            adaptive_hint: Some("COMMON MISTAKES TO AVOID:\n- country mismatch"),
        };
        let messages = extraction_messages(&inputs, &[]);
        assert!(messages[0]["content"].as_str().unwrap().contains("COMMON MISTAKES"));
        let content = messages[1]["content"][0]["text"].as_str().unwrap();
        assert!(content.contains("FILE DATE: 2023-06-15"));
    }
}
