//! PDF quality assessment.
//!
//! A cheap pre-flight pass that estimates scan DPI, text density and
//! structural red flags, producing a 0-100 score and a processing
//! strategy for the rest of the pipeline.

use std::path::Path;

use tracing::{debug, warn};

use super::PdfTools;

const DPI_MIN: u32 = 150;
const DPI_OPTIMAL: u32 = 200;
const SCANNED_CHARS_PER_PAGE: f64 = 100.0;
const FILE_SIZE_MAX_MB: f64 = 50.0;
const A4_WIDTH_INCHES: f64 = 8.27;

/// How the rest of the pipeline should treat this document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStrategy {
    /// Embedded text layer is usable as-is.
    Standard,
    /// Scanned or mediocre input, OCR with preprocessing.
    EnhancedOcr,
    /// Too degraded for OCR alone, lean on page images.
    Vision,
}

/// Raw measurements feeding the score, separated out so the scoring
/// rules stay testable without poppler.
#[derive(Debug, Clone)]
pub struct QualitySignals {
    pub file_size_mb: f64,
    pub page_count: u32,
    /// Characters of embedded text across the sampled pages.
    pub sample_chars: usize,
    pub estimated_dpi: u32,
    pub has_rotated_pages: bool,
}

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub score: u8,
    pub issues: Vec<String>,
    pub is_scanned: bool,
    pub estimated_dpi: u32,
    /// Characters of embedded text per page.
    pub text_density: f64,
    pub page_count: u32,
    pub file_size_mb: f64,
    pub strategy: ProcessingStrategy,
}

impl QualityReport {
    /// Apply the scoring rules to pre-gathered measurements.
    pub fn from_signals(s: &QualitySignals) -> Self {
        let mut score: i32 = 100;
        let mut issues = Vec::new();

        let sampled_pages = s.page_count.min(5).max(1) as f64;
        let text_density = s.sample_chars as f64 / sampled_pages;
        let is_scanned = text_density < SCANNED_CHARS_PER_PAGE;

        if s.estimated_dpi < DPI_MIN {
            score -= 20;
            issues.push(format!("low DPI: {} (minimum {})", s.estimated_dpi, DPI_MIN));
        } else if s.estimated_dpi < DPI_OPTIMAL {
            score -= 10;
            issues.push(format!("mediocre DPI: {} (optimal {})", s.estimated_dpi, DPI_OPTIMAL));
        }

        if is_scanned {
            score -= 30;
            issues.push(format!("scanned document, OCR required ({:.1} chars/page)", text_density));
        } else if text_density < 500.0 {
            score -= 15;
            issues.push(format!("sparse text layer ({:.1} chars/page)", text_density));
        }

        if s.file_size_mb > FILE_SIZE_MAX_MB {
            score -= 15;
            issues.push(format!("large file: {:.1}MB", s.file_size_mb));
        }

        if s.page_count > 100 {
            score -= 10;
            issues.push(format!("long document: {} pages", s.page_count));
        }

        if s.has_rotated_pages {
            score -= 10;
            issues.push("rotated pages detected".to_string());
        }

        let score = score.clamp(0, 100) as u8;
        let strategy = if score < 50 {
            ProcessingStrategy::Vision
        } else if is_scanned || score < 80 {
            ProcessingStrategy::EnhancedOcr
        } else {
            ProcessingStrategy::Standard
        };

        Self {
            score,
            issues,
            is_scanned,
            estimated_dpi: s.estimated_dpi,
            text_density,
            page_count: s.page_count,
            file_size_mb: s.file_size_mb,
            strategy,
        }
    }

    /// Gather measurements from the document and score them. An
    /// unreadable document yields the zero report rather than an error.
    pub fn analyze(tools: &dyn PdfTools, pdf: &Path) -> Self {
        let file_size_mb = std::fs::metadata(pdf)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        let page_count = match tools.page_count(pdf) {
            Ok(n) => n,
            Err(e) => {
                warn!("quality check could not read {}: {}", pdf.display(), e);
                return Self {
                    score: 0,
                    issues: vec![format!("document unreadable: {}", e)],
                    is_scanned: true,
                    estimated_dpi: 0,
                    text_density: 0.0,
                    page_count: 0,
                    file_size_mb,
                    strategy: ProcessingStrategy::Vision,
                };
            }
        };

        let mut sample_chars = 0;
        for page in 0..page_count.min(5) {
            if let Ok(text) = tools.extract_page_text(pdf, page) {
                sample_chars += text.trim().chars().count();
            }
        }

        let estimated_dpi = estimate_dpi(tools, pdf);
        let has_rotated_pages = tools.first_page_rotation(pdf).map(|r| r % 360 != 0).unwrap_or(false);

        let report = Self::from_signals(&QualitySignals {
            file_size_mb,
            page_count,
            sample_chars,
            estimated_dpi,
            has_rotated_pages,
        });
        debug!(
            "quality {}: score {} strategy {:?}",
            pdf.display(),
            report.score,
            report.strategy
        );
        report
    }
}

/// Estimate the effective scan DPI by rendering page one at a 72-dpi
/// reference and comparing the pixel width against A4 paper.
fn estimate_dpi(tools: &dyn PdfTools, pdf: &Path) -> u32 {
    let (_temp, rendered) = match tools.render_pages(pdf, &[0], 72) {
        Ok(r) => r,
        Err(_) => return 150,
    };
    let Some(first) = rendered.first() else {
        return 150;
    };
    match image::image_dimensions(first) {
        Ok((width, _)) => {
            let estimated = (width as f64 / A4_WIDTH_INCHES * 72.0) as u32;
            if estimated < 50 {
                72
            } else if estimated > 600 {
                300
            } else {
                estimated
            }
        }
        Err(_) => 150,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> QualitySignals {
        QualitySignals {
            file_size_mb: 1.2,
            page_count: 10,
            sample_chars: 6_000,
            estimated_dpi: 300,
            has_rotated_pages: false,
        }
    }

    #[test]
    fn clean_native_pdf_is_standard() {
        let report = QualityReport::from_signals(&signals());
        assert_eq!(report.score, 100);
        assert_eq!(report.strategy, ProcessingStrategy::Standard);
        assert!(!report.is_scanned);
    }

    #[test]
    fn scanned_pdf_takes_enhanced_ocr_path() {
        let mut s = signals();
        s.sample_chars = 40;
        let report = QualityReport::from_signals(&s);
        assert!(report.is_scanned);
        assert_eq!(report.score, 70);
        assert_eq!(report.strategy, ProcessingStrategy::EnhancedOcr);
    }

    #[test]
    fn badly_degraded_pdf_forces_vision() {
        let s = QualitySignals {
            file_size_mb: 60.0,
            page_count: 150,
            sample_chars: 0,
            estimated_dpi: 96,
            has_rotated_pages: true,
        };
        let report = QualityReport::from_signals(&s);
        assert!(report.score < 50);
        assert_eq!(report.strategy, ProcessingStrategy::Vision);
    }

    #[test]
    fn worst_case_signals_hit_every_deduction() {
        let s = QualitySignals {
            file_size_mb: 500.0,
            page_count: 2_000,
            sample_chars: 0,
            estimated_dpi: 10,
            has_rotated_pages: true,
        };
        let report = QualityReport::from_signals(&s);
        assert_eq!(report.score, 15);
        assert_eq!(report.issues.len(), 5);
        assert_eq!(report.strategy, ProcessingStrategy::Vision);
    }
}
