//! Configuration: TOML settings file with environment overrides.
//!
//! Operational knobs (worker counts, backend URLs, vision mode) follow
//! the environment first, then `settings.toml`, then built-in defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One operator legal entity recognized in document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Keyword matched against the document ("FZE", "Noida", ...).
    pub keyword: String,
    /// Short reporting code ("FzE - Telenity UAE").
    pub code: String,
    /// Full legal name.
    pub full_name: String,
}

/// Model backend endpoints and request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Local llama.cpp server (OpenAI-style API). Probed first.
    #[serde(default = "default_llama_server_url")]
    pub llama_server_url: String,
    /// LM Studio base URL (OpenAI-style API). Probed second.
    #[serde(default = "default_lmstudio_url")]
    pub lmstudio_url: String,
    /// Ollama base URL. Probed last.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_llama_server_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_lmstudio_url() -> String {
    "http://localhost:1234".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "qwen2.5-vl-7b-instruct".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    768
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            llama_server_url: default_llama_server_url(),
            lmstudio_url: default_lmstudio_url(),
            ollama_url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Full application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory for the database, knowledge base and exports.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Files processed concurrently within a batch.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Files per batch (bounds peak memory from rendered pages).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Nested per-document pool for page-level OCR.
    #[serde(default = "default_ocr_workers")]
    pub ocr_workers: usize,
    /// Resolution for the high-quality render of selected pages.
    #[serde(default = "default_render_dpi")]
    pub render_dpi: u32,
    /// Attach page images to extraction requests.
    #[serde(default)]
    pub use_vision: bool,
    /// Tesseract language spec.
    #[serde(default = "default_tesseract_lang")]
    pub tesseract_lang: String,
    /// Content cache TTL in seconds (default 30 days).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub backend: BackendSettings,
    /// Operator entities matched against document text.
    #[serde(default = "default_entity_map")]
    pub entities: Vec<EntityMapping>,
    /// Operator HQ keywords stripped out of counterparty addresses.
    #[serde(default = "default_address_blacklist")]
    pub address_blacklist: Vec<String>,
    /// Allowed document categories.
    #[serde(default = "default_doc_types")]
    pub doc_types: Vec<String>,
    /// Allowed counterparty categories.
    #[serde(default = "default_company_types")]
    pub company_types: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_workers() -> usize {
    8
}
fn default_batch_size() -> usize {
    20
}
fn default_ocr_workers() -> usize {
    4
}
fn default_render_dpi() -> u32 {
    200
}
fn default_tesseract_lang() -> String {
    "tur+eng".to_string()
}
fn default_cache_ttl() -> u64 {
    60 * 60 * 24 * 30
}

fn default_entity_map() -> Vec<EntityMapping> {
    let entry = |keyword: &str, code: &str, full_name: &str| EntityMapping {
        keyword: keyword.to_string(),
        code: code.to_string(),
        full_name: full_name.to_string(),
    };
    vec![
        entry("FZE", "FzE - Telenity UAE", "Telenity FZE"),
        entry("Telenity Inc", "TU - Telenity USA", "Telenity Inc"),
        entry("Monroe", "TU - Telenity USA", "Telenity Inc"),
        entry(
            "İletişim Sistemleri",
            "TE - Telenity Europe",
            "Telenity İletişim Sistemleri Sanayi ve Ticaret A.Ş.",
        ),
        entry(
            "Noida",
            "TI - Telenity India",
            "Telenity Systems Software India Private Limited",
        ),
        entry(
            "India Private",
            "TI - Telenity India",
            "Telenity Systems Software India Private Limited",
        ),
    ]
}

fn default_address_blacklist() -> Vec<String> {
    ["maslak", "büyükdere", "sarıyer", "telenity", "noida", "monroe", "dubai"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_doc_types() -> Vec<String> {
    [
        "Acceptance",
        "Agency Agreement",
        "Agency Agreement for Revenue Share",
        "Commercial Proposal",
        "Consultancy Agreement",
        "Data Processing Agreement",
        "Employee Contracts",
        "EULA - End User License Agreement",
        "Managed Services Agreement",
        "NDA",
        "Other",
        "PO",
        "Reseller Agreement",
        "Revenue Share Managed Services Agreement",
        "S&M Agreement",
        "Service Agent Agreement",
        "Service Partner Agreement",
        "Teaming Agreement",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_company_types() -> Vec<String> {
    ["Customer", "Partner", "Consultant", "Other"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        // Round-trips through serde so the default fns stay the single
        // source of truth.
        toml::from_str("").expect("empty settings must deserialize")
    }
}

impl Settings {
    /// Load settings from a TOML file, then apply environment overrides.
    /// A missing file yields defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut settings: Settings = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            Settings::default()
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Environment variables win over the settings file.
    fn apply_env(&mut self) {
        if let Some(v) = env_parse::<usize>("MAX_WORKERS") {
            self.workers = v;
        }
        if let Some(v) = env_parse::<usize>("BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Ok(v) = std::env::var("USE_VISION_MODEL") {
            self.use_vision = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Ok(v) = std::env::var("LLAMA_SERVER_URL") {
            self.backend.llama_server_url = v;
        }
        if let Ok(v) = std::env::var("LM_STUDIO_IP") {
            self.backend.lmstudio_url = v;
        }
        if let Ok(v) = std::env::var("OLLAMA_HOST") {
            self.backend.ollama_url = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.backend.model = v;
        }
        if let Ok(v) = std::env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("contracts_ai.db")
    }

    pub fn knowledge_base_path(&self) -> PathBuf {
        self.data_dir.join("company_kb.json")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.workers, 8);
        assert_eq!(s.batch_size, 20);
        assert_eq!(s.ocr_workers, 4);
        assert!(!s.use_vision);
        assert!(s.doc_types.iter().any(|t| t == "NDA"));
        assert!(s.address_blacklist.iter().any(|k| k == "maslak"));
    }

    #[test]
    fn partial_toml_fills_rest() {
        let s: Settings = toml::from_str("workers = 2\n[backend]\nmodel = \"llama3\"").unwrap();
        assert_eq!(s.workers, 2);
        assert_eq!(s.batch_size, 20);
        assert_eq!(s.backend.model, "llama3");
        assert_eq!(s.backend.temperature, 0.1);
    }
}
