//! Page selection for rendering.
//!
//! Rendering and OCR dominate per-document cost, so only pages likely
//! to carry parties, addresses or signatures are rendered at full
//! resolution. Page one and the last page are always kept; the rest
//! are flagged by keyword scan of the text layer and by a cheap ink
//! density heuristic on low-resolution renders.

use std::path::Path;

use image::GrayImage;
use tracing::debug;

use super::PdfTools;

/// Hard cap on rendered pages per document.
pub const MAX_SELECTED_PAGES: usize = 5;

/// Address and signature markers, English and Turkish.
const KEYWORDS: &[&str] = &[
    "address",
    "adres",
    "mukim",
    "signature",
    "imza",
    "signed",
    "witness",
    "on behalf of",
];

/// Grayscale threshold below which a pixel counts as ink.
const INK_THRESHOLD: u8 = 120;
/// Signature band as fractions of page height. The strip below 95%
/// is excluded, page numbers live there.
const BAND_TOP: f64 = 0.66;
const BAND_BOTTOM: f64 = 0.95;
/// Minimum dark-pixel ratio in the band to flag a page.
const INK_RATIO_MIN: f64 = 0.01;

/// On short documents every page gets the ink scan, on longer ones
/// only the last few (signature blocks cluster near the end).
const SHORT_DOC_PAGES: u32 = 10;
const TAIL_SCAN_PAGES: u32 = 3;

#[derive(Debug, Clone)]
pub struct PageSelection {
    /// Zero-based pages to render, ascending.
    pub pages: Vec<u32>,
    pub keyword_pages: Vec<u32>,
    pub ink_pages: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct PageSelector;

impl PageSelector {
    pub fn new() -> Self {
        Self
    }

    /// Pick the pages worth rendering. Scan failures degrade to the
    /// mandatory first/last pair instead of erroring.
    pub fn select(&self, tools: &dyn PdfTools, pdf: &Path) -> PageSelection {
        let page_count = tools.page_count(pdf).unwrap_or(1).max(1);

        let keyword_pages = self.keyword_scan(tools, pdf, page_count);
        let ink_pages = self.ink_scan(tools, pdf, page_count);

        let mut flagged: Vec<u32> = keyword_pages
            .iter()
            .chain(ink_pages.iter())
            .copied()
            .collect();
        flagged.sort_unstable();
        flagged.dedup();

        let pages = assemble(page_count, &flagged);
        debug!(
            "{}: selected pages {:?} (keywords {:?}, ink {:?})",
            pdf.display(),
            pages,
            keyword_pages,
            ink_pages
        );
        PageSelection {
            pages,
            keyword_pages,
            ink_pages,
        }
    }

    /// Check the text layer of the strategic pages (first two, last
    /// two) for address/signature keywords.
    fn keyword_scan(&self, tools: &dyn PdfTools, pdf: &Path, page_count: u32) -> Vec<u32> {
        let mut candidates: Vec<u32> = vec![0, 1, page_count.saturating_sub(2), page_count - 1];
        candidates.retain(|&p| p < page_count);
        candidates.sort_unstable();
        candidates.dedup();

        let mut hits = Vec::new();
        for page in candidates {
            let Ok(text) = tools.extract_page_text(pdf, page) else {
                continue;
            };
            let lower = text.to_lowercase();
            if KEYWORDS.iter().any(|k| lower.contains(k)) {
                hits.push(page);
            }
        }
        hits
    }

    /// Render candidate pages at low resolution and flag those with
    /// ink in the signature band.
    fn ink_scan(&self, tools: &dyn PdfTools, pdf: &Path, page_count: u32) -> Vec<u32> {
        let candidates: Vec<u32> = if page_count <= SHORT_DOC_PAGES {
            (0..page_count).collect()
        } else {
            (page_count - TAIL_SCAN_PAGES..page_count).collect()
        };

        let Ok((_temp, rendered)) = tools.render_pages(pdf, &candidates, 72) else {
            return Vec::new();
        };

        let mut hits = Vec::new();
        for (&page, path) in candidates.iter().zip(rendered.iter()) {
            let Ok(img) = image::open(path) else {
                continue;
            };
            if ink_ratio_in_band(&img.to_luma8()) > INK_RATIO_MIN {
                hits.push(page);
            }
        }
        hits
    }
}

/// Dark-pixel ratio inside the signature band of a grayscale page.
fn ink_ratio_in_band(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    let top = (height as f64 * BAND_TOP) as u32;
    let bottom = (height as f64 * BAND_BOTTOM) as u32;
    if width == 0 || bottom <= top {
        return 0.0;
    }
    let mut dark: u64 = 0;
    for y in top..bottom {
        for x in 0..width {
            if img.get_pixel(x, y)[0] < INK_THRESHOLD {
                dark += 1;
            }
        }
    }
    dark as f64 / ((bottom - top) as u64 * width as u64) as f64
}

/// Combine the mandatory first/last pages with flagged pages, keeping
/// at most [`MAX_SELECTED_PAGES`]. Truncation is deterministic: page
/// one, the last page, then the earliest flagged pages in order.
fn assemble(page_count: u32, flagged: &[u32]) -> Vec<u32> {
    let last = page_count - 1;
    let middle: Vec<u32> = flagged
        .iter()
        .copied()
        .filter(|&p| p != 0 && p != last && p < page_count)
        .take(MAX_SELECTED_PAGES - 2)
        .collect();

    let mut pages = Vec::with_capacity(MAX_SELECTED_PAGES);
    pages.push(0);
    pages.extend(middle);
    if last != 0 {
        pages.push(last);
    }
    pages.sort_unstable();
    pages.dedup();
    pages
}
