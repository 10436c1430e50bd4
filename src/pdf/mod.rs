//! Poppler tool wrappers: text extraction, page rendering and metadata.
//!
//! All PDF access goes through the [`PdfTools`] trait so processing
//! code can be tested without poppler installed.

mod pages;
mod quality;

pub use pages::{PageSelection, PageSelector, MAX_SELECTED_PAGES};
pub use quality::{ProcessingStrategy, QualityReport, QualitySignals};

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use thiserror::Error;

/// Errors from the external poppler tools.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("PDF is corrupt ({kind:?}): {detail}")]
    Corrupt { kind: PdfCorruption, detail: String },

    #[error("Tool failed: {0}")]
    ToolFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Corruption classes recognized in poppler stderr output. The class
/// drives both the per-file status note and the end-of-job histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdfCorruption {
    TokenOverflow,
    MissingEof,
    BrokenXref,
    MissingStartXref,
    CorruptObjects,
    Unknown,
}

impl PdfCorruption {
    /// Classify a stderr blob from pdfinfo/pdftotext. Returns `None`
    /// when the output carries no known corruption marker.
    pub fn classify(stderr: &str) -> Option<Self> {
        let lower = stderr.to_lowercase();
        if lower.contains("token too long") || lower.contains("integer overflow") {
            Some(Self::TokenOverflow)
        } else if lower.contains("couldn't find trailer") || lower.contains("end-of-file") {
            Some(Self::MissingEof)
        } else if lower.contains("xref table") || lower.contains("reconstruct xref") {
            Some(Self::BrokenXref)
        } else if lower.contains("startxref") {
            Some(Self::MissingStartXref)
        } else if lower.contains("object") && (lower.contains("damaged") || lower.contains("invalid"))
        {
            Some(Self::CorruptObjects)
        } else if lower.contains("syntax error") || lower.contains("may not be a pdf") {
            Some(Self::Unknown)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TokenOverflow => "token overflow",
            Self::MissingEof => "missing EOF marker",
            Self::BrokenXref => "broken xref table",
            Self::MissingStartXref => "missing startxref",
            Self::CorruptObjects => "damaged objects",
            Self::Unknown => "unrecognized structure",
        }
    }
}

/// Embedded text layer plus any corruption marker poppler printed
/// while repairing the document. A populated `corruption` with a
/// non-empty `text` means poppler recovered; the marker is kept for
/// the end-of-job histogram only.
#[derive(Debug, Clone)]
pub struct TextLayer {
    pub text: String,
    pub corruption: Option<PdfCorruption>,
}

/// Poppler access used by the document processor.
pub trait PdfTools: Send + Sync {
    /// Extract the embedded text layer of the whole document.
    fn extract_text(&self, pdf: &Path) -> Result<TextLayer, PdfError>;

    /// Extract the text layer of a single zero-based page.
    fn extract_page_text(&self, pdf: &Path, page: u32) -> Result<String, PdfError>;

    /// Number of pages reported by pdfinfo.
    fn page_count(&self, pdf: &Path) -> Result<u32, PdfError>;

    /// Rotation of the first page in degrees. Implementations without
    /// access to page metadata can report zero.
    fn first_page_rotation(&self, _pdf: &Path) -> Result<u32, PdfError> {
        Ok(0)
    }

    /// Render zero-based pages to PNG files in a fresh temp directory.
    /// Returned paths are ordered to match `pages`.
    fn render_pages(
        &self,
        pdf: &Path,
        pages: &[u32],
        dpi: u32,
    ) -> Result<(TempDir, Vec<PathBuf>), PdfError>;
}

/// Production implementation shelling out to poppler-utils.
pub struct PopplerTools {
    dpi: u32,
}

impl PopplerTools {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }

    /// Verify the poppler binaries are on PATH.
    pub fn check_binaries() -> Result<(), PdfError> {
        for tool in ["pdftotext", "pdftoppm", "pdfinfo"] {
            which::which(tool).map_err(|_| PdfError::ToolNotFound(tool.to_string()))?;
        }
        Ok(())
    }

    /// Run one poppler tool. Corruption markers in stderr become a
    /// hard error only when the tool also exited non-zero; poppler
    /// routinely repairs broken documents while warning on stderr, and
    /// those runs still carry full output. The marker rides along for
    /// reporting.
    fn run(
        &self,
        tool: &str,
        cmd: &mut Command,
    ) -> Result<(std::process::Output, Option<PdfCorruption>), PdfError> {
        match cmd.output() {
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let corruption = PdfCorruption::classify(&stderr);
                if !output.status.success() {
                    if let Some(kind) = corruption {
                        return Err(PdfError::Corrupt {
                            kind,
                            detail: stderr.lines().next().unwrap_or("").to_string(),
                        });
                    }
                    return Err(PdfError::ToolFailed(format!(
                        "{}: {}",
                        tool,
                        stderr.lines().next().unwrap_or("non-zero exit")
                    )));
                }
                Ok((output, corruption))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PdfError::ToolNotFound(tool.to_string()))
            }
            Err(e) => Err(PdfError::Io(e)),
        }
    }
}

impl PdfTools for PopplerTools {
    fn extract_text(&self, pdf: &Path) -> Result<TextLayer, PdfError> {
        let (output, corruption) = self.run(
            "pdftotext",
            Command::new("pdftotext").args(["-layout", "-enc", "UTF-8"]).arg(pdf).arg("-"),
        )?;
        Ok(TextLayer {
            text: String::from_utf8_lossy(&output.stdout).to_string(),
            corruption,
        })
    }

    fn extract_page_text(&self, pdf: &Path, page: u32) -> Result<String, PdfError> {
        let one_based = (page + 1).to_string();
        let (output, _) = self.run(
            "pdftotext",
            Command::new("pdftotext")
                .args(["-layout", "-enc", "UTF-8", "-f", &one_based, "-l", &one_based])
                .arg(pdf)
                .arg("-"),
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn page_count(&self, pdf: &Path) -> Result<u32, PdfError> {
        let (output, _) = self.run("pdfinfo", Command::new("pdfinfo").arg(pdf))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("Pages:") {
                if let Ok(n) = rest.trim().parse::<u32>() {
                    return Ok(n);
                }
            }
        }
        Err(PdfError::ToolFailed("pdfinfo: no page count".to_string()))
    }

    fn first_page_rotation(&self, pdf: &Path) -> Result<u32, PdfError> {
        let (output, _) = self.run("pdfinfo", Command::new("pdfinfo").arg(pdf))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("Page rot:") {
                return Ok(rest.trim().parse::<u32>().unwrap_or(0));
            }
        }
        Ok(0)
    }

    fn render_pages(
        &self,
        pdf: &Path,
        pages: &[u32],
        dpi: u32,
    ) -> Result<(TempDir, Vec<PathBuf>), PdfError> {
        let dpi = if dpi == 0 { self.dpi } else { dpi };
        let temp = TempDir::new()?;
        let mut rendered = Vec::with_capacity(pages.len());
        for &page in pages {
            let one_based = (page + 1).to_string();
            let prefix = temp.path().join(format!("page-{}", page));
            self.run(
                "pdftoppm",
                Command::new("pdftoppm")
                    .args(["-png", "-r", &dpi.to_string(), "-f", &one_based, "-l", &one_based])
                    .arg(pdf)
                    .arg(&prefix),
            )?;
            // pdftoppm appends its own page suffix with varying digit counts.
            let found = [1, 2, 3, 4].iter().find_map(|digits| {
                let candidate = temp
                    .path()
                    .join(format!("page-{}-{:0width$}.png", page, page + 1, width = digits));
                candidate.exists().then_some(candidate)
            });
            match found {
                Some(path) => rendered.push(path),
                None => {
                    return Err(PdfError::ToolFailed(format!(
                        "pdftoppm produced no image for page {}",
                        page + 1
                    )))
                }
            }
        }
        Ok((temp, rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_corruption_markers() {
        assert_eq!(
            PdfCorruption::classify("Syntax Error: Token too long"),
            Some(PdfCorruption::TokenOverflow)
        );
        assert_eq!(
            PdfCorruption::classify("Couldn't find trailer dictionary"),
            Some(PdfCorruption::MissingEof)
        );
        assert_eq!(
            PdfCorruption::classify("Syntax Warning: Bad xref table, reconstruct xref"),
            Some(PdfCorruption::BrokenXref)
        );
        assert_eq!(
            PdfCorruption::classify("couldn't read startxref"),
            Some(PdfCorruption::MissingStartXref)
        );
        assert_eq!(PdfCorruption::classify(""), None);
        assert_eq!(PdfCorruption::classify("Pages: 12"), None);
    }

    #[test]
    fn warning_on_successful_run_keeps_output() {
        let tools = PopplerTools::new(150);
        let (output, corruption) = tools
            .run(
                "sh",
                Command::new("sh").args([
                    "-c",
                    "echo 'Syntax Warning: Bad xref table, reconstruct xref' >&2; printf 'recovered text'",
                ]),
            )
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "recovered text");
        assert_eq!(corruption, Some(PdfCorruption::BrokenXref));
    }

    #[test]
    fn marker_on_failed_run_is_corrupt() {
        let tools = PopplerTools::new(150);
        let result = tools.run(
            "sh",
            Command::new("sh").args(["-c", "echo \"Couldn't find trailer dictionary\" >&2; exit 1"]),
        );
        assert!(matches!(
            result,
            Err(PdfError::Corrupt {
                kind: PdfCorruption::MissingEof,
                ..
            })
        ));
    }

    #[test]
    fn failed_run_without_marker_is_tool_failure() {
        let tools = PopplerTools::new(150);
        let result = tools.run(
            "sh",
            Command::new("sh").args(["-c", "echo 'something else went wrong' >&2; exit 2"]),
        );
        assert!(matches!(result, Err(PdfError::ToolFailed(_))));
    }
}
