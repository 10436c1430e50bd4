//! Tesseract OCR with quality-dependent image preprocessing.
//!
//! OCR only runs when a document has no usable text layer. Pages are
//! recognized in parallel with a small bounded pool and stitched back
//! together in page order.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use image::GrayImage;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker panicked")]
    WorkerPanicked,
}

/// Preprocessing intensity, derived from the document quality score.
/// Degraded scans get binarization and a dense page-segmentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preprocessing {
    Light,
    Aggressive,
}

impl Preprocessing {
    pub fn from_quality(score: u8) -> Self {
        if score < 50 {
            Self::Aggressive
        } else {
            Self::Light
        }
    }

    fn psm(&self) -> &'static str {
        match self {
            Self::Light => "4",
            Self::Aggressive => "6",
        }
    }
}

/// Single-page recognition, behind a trait for tests.
pub trait PageOcr: Send + Sync {
    fn recognize(&self, image: &Path, mode: Preprocessing) -> Result<String, OcrError>;
}

/// Production implementation shelling out to tesseract.
pub struct TesseractOcr {
    lang: String,
}

impl TesseractOcr {
    pub fn new(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
        }
    }

    pub fn check_binary() -> Result<(), OcrError> {
        which::which("tesseract").map_err(|_| OcrError::ToolNotFound("tesseract".to_string()))?;
        Ok(())
    }

    fn run_tesseract(&self, image: &Path, mode: Preprocessing) -> Result<String, OcrError> {
        let output = Command::new("tesseract")
            .arg(image)
            .arg("stdout")
            .args(["-l", &self.lang, "--psm", mode.psm()])
            .output();
        match output {
            Ok(out) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout).to_string()),
            Ok(out) => Err(OcrError::Failed(
                String::from_utf8_lossy(&out.stderr)
                    .lines()
                    .next()
                    .unwrap_or("non-zero exit")
                    .to_string(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OcrError::ToolNotFound("tesseract".to_string()))
            }
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl PageOcr for TesseractOcr {
    fn recognize(&self, image: &Path, mode: Preprocessing) -> Result<String, OcrError> {
        match mode {
            Preprocessing::Light => self.run_tesseract(image, mode),
            Preprocessing::Aggressive => {
                let temp = tempfile::Builder::new().suffix(".png").tempfile()?;
                match preprocess_aggressive(image, temp.path()) {
                    Ok(()) => self.run_tesseract(temp.path(), mode),
                    Err(e) => {
                        debug!("preprocessing failed ({}), using raw image", e);
                        self.run_tesseract(image, mode)
                    }
                }
            }
        }
    }
}

/// Grayscale, stretch contrast to the full range, then binarize.
fn preprocess_aggressive(input: &Path, output: &Path) -> Result<(), OcrError> {
    let img = image::open(input)
        .map_err(|e| OcrError::Failed(format!("unreadable image: {}", e)))?
        .to_luma8();
    let binarized = binarize(&stretch_contrast(&img), 160);
    binarized
        .save(output)
        .map_err(|e| OcrError::Failed(format!("image write: {}", e)))?;
    Ok(())
}

fn stretch_contrast(img: &GrayImage) -> GrayImage {
    let (min, max) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if max <= min {
        return img.clone();
    }
    let range = (max - min) as f32;
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = (((p[0] - min) as f32 / range) * 255.0) as u8;
    }
    out
}

fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p[0] = if p[0] < threshold { 0 } else { 255 };
    }
    out
}

/// Recognize a set of rendered pages concurrently, bounded by
/// `workers`, and concatenate the results in page order.
pub async fn ocr_pages(
    ocr: Arc<dyn PageOcr>,
    images: Vec<PathBuf>,
    mode: Preprocessing,
    workers: usize,
) -> Result<String, OcrError> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    for (index, image) in images.into_iter().enumerate() {
        let ocr = Arc::clone(&ocr);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| OcrError::Failed("OCR pool closed".to_string()))?;
            let text = tokio::task::spawn_blocking(move || ocr.recognize(&image, mode))
                .await
                .map_err(|_| OcrError::WorkerPanicked)??;
            Ok::<(usize, String), OcrError>((index, text))
        });
    }

    let mut pages: Vec<(usize, String)> = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined.map_err(|_| OcrError::WorkerPanicked)? {
            Ok(page) => pages.push(page),
            Err(e) => {
                // One bad page should not sink the document.
                warn!("page OCR failed: {}", e);
            }
        }
    }
    pages.sort_by_key(|(index, _)| *index);
    Ok(pages
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeOcr;

    impl PageOcr for FakeOcr {
        fn recognize(&self, image: &Path, _mode: Preprocessing) -> Result<String, OcrError> {
            let name = image.file_stem().unwrap().to_string_lossy().to_string();
            if name.contains("bad") {
                Err(OcrError::Failed("boom".to_string()))
            } else {
                Ok(format!("text-{}", name))
            }
        }
    }

    #[tokio::test]
    async fn pages_come_back_in_order() {
        let images = vec![
            PathBuf::from("p0.png"),
            PathBuf::from("p1.png"),
            PathBuf::from("p2.png"),
        ];
        let text = ocr_pages(Arc::new(FakeOcr), images, Preprocessing::Light, 4)
            .await
            .unwrap();
        assert_eq!(text, "text-p0\n\ntext-p1\n\ntext-p2");
    }

    #[tokio::test]
    async fn failed_page_is_skipped() {
        let images = vec![PathBuf::from("p0.png"), PathBuf::from("bad.png")];
        let text = ocr_pages(Arc::new(FakeOcr), images, Preprocessing::Light, 2)
            .await
            .unwrap();
        assert_eq!(text, "text-p0");
    }

    #[test]
    fn quality_score_picks_mode() {
        assert_eq!(Preprocessing::from_quality(30), Preprocessing::Aggressive);
        assert_eq!(Preprocessing::from_quality(80), Preprocessing::Light);
    }

    #[test]
    fn binarize_splits_at_threshold() {
        let img = GrayImage::from_fn(2, 1, |x, _| image::Luma([if x == 0 { 10 } else { 200 }]));
        let out = binarize(&img, 160);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(1, 0)[0], 255);
    }
}
