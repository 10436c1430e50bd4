//! Per-document processing pipeline.
//!
//! Hash, dedup, text extraction, quality gate, page selection, OCR
//! fallback, model extraction, post-processing, knowledge base,
//! verification, validation, enrichment. Each document runs this
//! whole ladder inside one worker task; any unexpected failure is
//! reported per-file and never sinks the batch.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::config::Settings;
use crate::knowledge::KnowledgeBase;
use crate::llm::{ExtractionRequest, Extractor, LlmFields};
use crate::models::{ExtractedContract, CACHED_NOTE, COMPLETED_NOTE};
use crate::ocr::{self, PageOcr, Preprocessing};
use crate::pdf::{PageSelector, PdfCorruption, PdfError, PdfTools, QualityReport};
use crate::repository::Database;
use crate::services::enrichment::WebEnrichment;
use crate::services::{dates, postprocess, validate};

/// Minimum usable characters before OCR kicks in.
const MIN_TEXT_CHARS: usize = 50;
/// Verification pass triggers below this validation score.
const VERIFY_THRESHOLD: u8 = 70;
/// Addresses shorter than this are not worth teaching the KB.
const KB_LEARN_MIN_ADDRESS: usize = 15;
/// Successful web enrichment nudges confidence by this much.
const ENRICH_BONUS: u8 = 5;
/// Model self-confidence is not reported, validation assumes middle.
const DEFAULT_LLM_CONFIDENCE: f64 = 50.0;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("corrupt document ({})", .0.label())]
    Corrupt(PdfCorruption, String),

    #[error("{0}")]
    Failed(String),
}

impl From<PdfError> for ProcessError {
    fn from(e: PdfError) -> Self {
        match e {
            PdfError::Corrupt { kind, detail } => Self::Corrupt(kind, detail),
            other => Self::Failed(other.to_string()),
        }
    }
}

/// One successfully processed file. `corruption` is set when the
/// document had malformed structure but extraction still recovered
/// (repaired text layer or OCR fallback); the orchestrator tallies it
/// into the end-of-job histogram.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub contract: ExtractedContract,
    pub corruption: Option<PdfCorruption>,
}

impl From<ExtractedContract> for ProcessOutcome {
    fn from(contract: ExtractedContract) -> Self {
        Self {
            contract,
            corruption: None,
        }
    }
}

/// Processing surface the orchestrator drives, behind a trait so the
/// batch logic is testable without poppler or a model.
#[async_trait]
pub trait ProcessDocument: Send + Sync {
    /// Process one document. `path` is absolute, `job_root` is the
    /// folder the job was started on (for the subfolder hint).
    async fn process(&self, job_root: &Path, path: &Path) -> Result<ProcessOutcome, ProcessError>;
}

/// Everything a worker needs, injected once at job start.
pub struct DocumentProcessor {
    pub settings: Arc<Settings>,
    pub db: Database,
    pub cache: Arc<ContentCache>,
    pub kb: Arc<KnowledgeBase>,
    pub pdf: Arc<dyn PdfTools>,
    pub ocr: Arc<dyn PageOcr>,
    pub llm: Arc<dyn Extractor>,
    pub enrichment: Arc<WebEnrichment>,
    /// Built once per job from correction history.
    pub adaptive_hint: Option<String>,
}

#[async_trait]
impl ProcessDocument for DocumentProcessor {
    async fn process(&self, job_root: &Path, path: &Path) -> Result<ProcessOutcome, ProcessError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ProcessError::Failed("path has no filename".to_string()))?;

        // 1. Content hash.
        let hash = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || hash_file(&path))
                .await
                .map_err(|_| ProcessError::Failed("hash task panicked".to_string()))?
                .map_err(|e| ProcessError::Failed(format!("could not read file: {}", e)))?
        };

        // 2. Dedup against stored records.
        if let Ok(Some(mut cached)) = self.db.find_contract_by_hash(&hash) {
            info!("hash hit, serving stored record for {}", filename);
            cached.filename = filename;
            cached.status_note = CACHED_NOTE.to_string();
            return Ok(cached.into());
        }

        // In-run dedup via the extraction cache.
        if let Some(fields) = self.cache.get_extraction(&hash) {
            debug!("extraction cache hit for {}", filename);
            let mut contract = self
                .assemble(job_root, path, &filename, &hash, fields, 100, 0, &[])
                .await?;
            contract.status_note = CACHED_NOTE.to_string();
            return Ok(contract.into());
        }

        // 3. Native text, tolerating corruption (scanned path covers it).
        let mut corruption: Option<PdfCorruption> = None;
        let mut text = match self.cache.get_ocr(&hash) {
            Some(cached_text) => cached_text,
            None => {
                let extracted = {
                    let pdf = Arc::clone(&self.pdf);
                    let path = path.to_path_buf();
                    tokio::task::spawn_blocking(move || pdf.extract_text(&path))
                        .await
                        .map_err(|_| ProcessError::Failed("extract task panicked".to_string()))?
                };
                match extracted {
                    Ok(layer) => {
                        if let Some(kind) = layer.corruption {
                            debug!("{}: poppler repaired a {} document", filename, kind.label());
                            corruption = Some(kind);
                        }
                        layer.text
                    }
                    Err(PdfError::Corrupt { kind, detail }) => {
                        warn!("{}: corrupt text layer ({}), trying OCR", filename, detail);
                        corruption = Some(kind);
                        String::new()
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        // 4. Quality gate.
        let quality = {
            let pdf = Arc::clone(&self.pdf);
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || QualityReport::analyze(pdf.as_ref(), &path))
                .await
                .map_err(|_| ProcessError::Failed("quality task panicked".to_string()))?
        };
        if quality.page_count == 0 {
            if let Some(kind) = corruption {
                return Err(ProcessError::Corrupt(kind, "document unreadable".to_string()));
            }
        }

        // 5. Page selection + render of only the selected pages.
        let (selection, rendered) = {
            let pdf = Arc::clone(&self.pdf);
            let path = path.to_path_buf();
            let dpi = self.settings.render_dpi;
            tokio::task::spawn_blocking(move || {
                let selection = PageSelector::new().select(pdf.as_ref(), &path);
                let rendered = pdf.render_pages(&path, &selection.pages, dpi);
                (selection, rendered)
            })
            .await
            .map_err(|_| ProcessError::Failed("render task panicked".to_string()))?
        };
        let (_render_dir, page_images): (Option<tempfile::TempDir>, Vec<PathBuf>) = match rendered {
            Ok((dir, paths)) => (Some(dir), paths),
            Err(e) => {
                warn!("{}: page render failed: {}", filename, e);
                (None, Vec::new())
            }
        };

        // 6. OCR fallback for scanned documents.
        if text.trim().chars().count() < MIN_TEXT_CHARS && !page_images.is_empty() {
            info!("{}: native text too short, running OCR", filename);
            let mode = Preprocessing::from_quality(quality.score);
            let ocr_text = ocr::ocr_pages(
                Arc::clone(&self.ocr),
                page_images.clone(),
                mode,
                self.settings.ocr_workers,
            )
            .await
            .map_err(|e| ProcessError::Failed(format!("OCR failed: {}", e)))?;
            text.push('\n');
            text.push_str(&ocr_text);
        }
        if text.trim().chars().count() < MIN_TEXT_CHARS {
            if let Some(kind) = corruption {
                return Err(ProcessError::Corrupt(kind, "no usable text".to_string()));
            }
        }
        self.cache.put_ocr(&hash, text.clone());

        // 7. Model extraction.
        let filename_date = dates::extract_date_from_filename(&filename);
        let images_b64 = if self.settings.use_vision {
            encode_pages_jpeg(&page_images)
        } else {
            Vec::new()
        };
        let fields = self
            .llm
            .extract(ExtractionRequest {
                text: &text,
                filename: &filename,
                filename_date: filename_date.as_deref(),
                images_b64: &images_b64,
                quality: Some(&quality),
                adaptive_hint: self.adaptive_hint.as_deref(),
            })
            .await
            .map_err(|e| ProcessError::Failed(format!("extraction failed: {}", e)))?;
        self.cache.put_extraction(&hash, fields.clone());

        let visual_count = selection.ink_pages.len();
        let contract = self
            .assemble(
                job_root,
                path,
                &filename,
                &hash,
                fields,
                quality.score,
                visual_count,
                &images_b64,
            )
            .await?;
        Ok(ProcessOutcome {
            contract,
            corruption,
        })
    }
}

impl DocumentProcessor {
    /// Steps 8-12: post-processing, knowledge base, verification,
    /// validation and enrichment, shared by the fresh and in-run
    /// cached paths.
    #[allow(clippy::too_many_arguments)]
    async fn assemble(
        &self,
        job_root: &Path,
        path: &Path,
        filename: &str,
        hash: &str,
        mut fields: LlmFields,
        ocr_quality: u8,
        visual_count: usize,
        images_b64: &[String],
    ) -> Result<ExtractedContract, ProcessError> {
        let settings = &self.settings;
        let filename_date = dates::extract_date_from_filename(filename);

        // 8. Deterministic cleanup of the model output. A subfolder
        // name under the job root is authoritative for the party and
        // overrides whatever the model extracted.
        let folder_party = folder_hint(job_root, path);
        let mut party = match &folder_party {
            Some(hint) => hint.clone(),
            None => {
                let extracted = crate::text::squash_whitespace(&fields.signing_party);
                if extracted.is_empty() {
                    postprocess::company_from_filename(filename, settings).unwrap_or_default()
                } else {
                    extracted
                }
            }
        };

        let cleaned = crate::text::clean_mojibake(&fields.address.replace("<InsertDate>", ""));
        let mut address = postprocess::filter_operator_address(&cleaned, &settings.address_blacklist);

        let mut country = postprocess::infer_country_from_address(&address)
            .map(|c| c.to_string())
            .unwrap_or_else(|| postprocess::normalize_country(&fields.country));

        let mut title = postprocess::clean_title(&fields.contract_name);
        if title.is_empty() {
            title = postprocess::title_from_filename(filename);
        }

        let entity_search = format!("{} {}", fields.found_telenity_name, party);
        let (entity_code, entity_name) =
            match postprocess::determine_operator_entity(&entity_search, &settings.entities) {
                Some(pair) => pair,
                None => self.detect_entity_visually(images_b64).await,
            };

        let contract_type =
            postprocess::map_choice(&fields.doc_type, &settings.doc_types, "Other");
        let company_type =
            postprocess::map_choice(&fields.company_type, &settings.company_types, "Other");
        let signature_status =
            postprocess::map_signature(&fields.text_signature_status, visual_count);
        let mut signed_date = filename_date.clone().unwrap_or_else(|| fields.signed_date.clone());

        // 9. Knowledge base: fill gaps, then learn.
        if (address.is_empty() || country.is_empty()) && !party.is_empty() {
            if let Some(entry) = self.kb.lookup(&party) {
                debug!("{}: knowledge base fills address/country", filename);
                if address.is_empty() {
                    address = entry.address;
                }
                if country.is_empty() {
                    country = entry.country;
                }
            }
        }
        if !party.is_empty() && address.len() >= KB_LEARN_MIN_ADDRESS {
            self.kb.learn(&party, &address, &country);
        }

        // 10. Verification pass on weak extractions.
        let mut outcome = validate::validate(&validate::ValidationInput {
            party: &party,
            contract_type: &contract_type,
            signed_date: &signed_date,
            start_date: &fields.start_date,
            end_date: &fields.end_date,
            address: &address,
            country: &country,
            ocr_quality: ocr_quality as f64,
            llm_confidence: DEFAULT_LLM_CONFIDENCE,
        });
        let weak = outcome.score < VERIFY_THRESHOLD
            || party.is_empty()
            || address.is_empty()
            || country.is_empty()
            || signed_date.is_empty();
        if weak {
            let text = self.cache.get_ocr(hash).unwrap_or_default();
            match self.llm.verify(&fields, &text, filename).await {
                Ok(corrections) if !corrections.is_empty() => {
                    info!("{}: verification pass corrected fields", filename);
                    fields.apply_corrections(&corrections);
                    // The folder name still outranks a verification
                    // correction for the party.
                    if folder_party.is_none() && !corrections.signing_party.is_empty() {
                        party = crate::text::squash_whitespace(&fields.signing_party);
                    }
                    if !corrections.address.is_empty() {
                        address = postprocess::filter_operator_address(
                            &crate::text::clean_mojibake(&fields.address),
                            &settings.address_blacklist,
                        );
                    }
                    if !corrections.country.is_empty() || !corrections.address.is_empty() {
                        country = postprocess::infer_country_from_address(&address)
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| postprocess::normalize_country(&fields.country));
                    }
                    if filename_date.is_none() && !corrections.signed_date.is_empty() {
                        signed_date = fields.signed_date.clone();
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("{}: verification pass failed: {}", filename, e),
            }
            // 11. Re-validate with the merged fields.
            outcome = validate::validate(&validate::ValidationInput {
                party: &party,
                contract_type: &contract_type,
                signed_date: &signed_date,
                start_date: &fields.start_date,
                end_date: &fields.end_date,
                address: &address,
                country: &country,
                ocr_quality: ocr_quality as f64,
                llm_confidence: DEFAULT_LLM_CONFIDENCE,
            });
        }
        let mut confidence = outcome.score;

        // 12. Web enrichment as the last resort.
        if (address.is_empty() || country.is_empty()) && !party.is_empty() {
            if let Some(enriched) = self.enrichment.enrich(&party).await {
                if address.is_empty() && !enriched.address.is_empty() {
                    address = enriched.address;
                }
                if country.is_empty() && !enriched.country.is_empty() {
                    country = enriched.country;
                }
                confidence = confidence.saturating_add(ENRICH_BONUS).min(100);
            }
        }

        Ok(ExtractedContract {
            filename: filename.to_string(),
            title,
            contract_type,
            company_type,
            signing_party: party,
            country,
            address,
            signed_date,
            signature_status: signature_status.as_str().to_string(),
            telenity_entity_code: entity_code,
            telenity_entity_name: entity_name,
            confidence_score: confidence,
            needs_review: outcome.needs_review,
            review_reason: outcome.review_reason,
            validation_issue_count: outcome.issues.len() as u32,
            validation_warning_count: outcome.warnings.len() as u32,
            content_hash: hash.to_string(),
            status_note: COMPLETED_NOTE.to_string(),
        })
    }

    /// Ask the vision model which entity owns the document; falls back
    /// to the default entity when vision is off or inconclusive.
    async fn detect_entity_visually(&self, images_b64: &[String]) -> (String, String) {
        if self.settings.use_vision {
            if let Some(first) = images_b64.first() {
                match self.llm.detect_entity_visual(first).await {
                    Ok(reply) => {
                        if let Some(pair) = postprocess::map_visual_entity(&reply) {
                            return pair;
                        }
                    }
                    Err(e) => debug!("visual entity detection failed: {}", e),
                }
            }
        }
        postprocess::default_entity()
    }
}

/// SHA-256 of the file contents, hex encoded.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// The immediate subfolder under the job root names the counterparty
/// ("contracts/AcmeSoft/nda.pdf"). Operators organize input folders
/// by company, so the name outranks model extraction.
fn folder_hint(job_root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(job_root).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    // Only a hint when the file actually sits in a subfolder.
    components.next()?;
    Some(first.as_os_str().to_string_lossy().to_string())
}

/// Re-encode rendered pages as base64 JPEG for vision requests.
fn encode_pages_jpeg(pages: &[PathBuf]) -> Vec<String> {
    pages
        .iter()
        .filter_map(|path| {
            let img = image::open(path).ok()?;
            let mut buffer = Cursor::new(Vec::new());
            img.write_to(&mut buffer, image::ImageFormat::Jpeg).ok()?;
            Some(BASE64.encode(buffer.into_inner()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());

        std::fs::write(&b, b"other bytes").unwrap();
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn folder_hint_requires_subfolder() {
        let root = Path::new("/jobs/2024");
        assert_eq!(
            folder_hint(root, Path::new("/jobs/2024/AcmeSoft/nda.pdf")),
            Some("AcmeSoft".to_string())
        );
        assert_eq!(folder_hint(root, Path::new("/jobs/2024/nda.pdf")), None);
        assert_eq!(folder_hint(root, Path::new("/elsewhere/nda.pdf")), None);
    }
}
