//! TOML configuration.
//!
//! Every section except `[db]` and `[server]` may be omitted; missing fields
//! fall back to the free-tier defaults.
//!
//! ```toml
//! [db]
//! path = "./data/pdfchat.sqlite"
//!
//! [storage]
//! backend = "filesystem"
//! root = "./data/objects"
//! public_base_url = "http://127.0.0.1:7340/objects"
//!
//! [embedding]
//! provider = "gemini"
//! model = "text-embedding-004"
//! dims = 768
//!
//! [chat]
//! provider = "gemini"
//! model = "gemini-1.5-flash-latest"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `filesystem` or `s3`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_storage_root(),
            public_base_url: default_public_base_url(),
            s3: None,
        }
    }
}

fn default_storage_backend() -> String {
    "filesystem".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/objects")
}
fn default_public_base_url() -> String {
    "http://127.0.0.1:7340/objects".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Overrides the URL written into `pages.image_url`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    800
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    #[serde(default = "default_fallback_pages")]
    pub fallback_pages_per_document: i64,
    #[serde(default = "default_fallback_page_chars")]
    pub fallback_page_chars: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
            fallback_pages_per_document: default_fallback_pages(),
            fallback_page_chars: default_fallback_page_chars(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_match_threshold() -> f32 {
    0.7
}
fn default_match_count() -> usize {
    10
}
fn default_fallback_pages() -> i64 {
    3
}
fn default_fallback_page_chars() -> usize {
    2000
}
fn default_preview_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: None,
            max_retries: 0,
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            base_url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_chat_timeout_secs() -> u64 {
    120
}

/// Free-tier quotas.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_daily_api_calls")]
    pub daily_api_calls: i64,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: i64,
    #[serde(default = "default_max_pages")]
    pub max_pages_per_document: usize,
    #[serde(default = "default_max_documents")]
    pub max_documents_per_workspace: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily_api_calls: default_daily_api_calls(),
            max_document_bytes: default_max_document_bytes(),
            max_pages_per_document: default_max_pages(),
            max_documents_per_workspace: default_max_documents(),
        }
    }
}

fn default_daily_api_calls() -> i64 {
    100
}
fn default_max_document_bytes() -> i64 {
    10 * 1024 * 1024
}
fn default_max_pages() -> usize {
    50
}
fn default_max_documents() -> i64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// HMAC key for session tokens. `PDFCHAT_SESSION_SECRET` wins when set.
    #[serde(default)]
    pub session_secret: Option<String>,
}

impl ServerConfig {
    pub fn resolve_session_secret(&self) -> Result<String> {
        if let Ok(secret) = std::env::var("PDFCHAT_SESSION_SECRET") {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }
        self.session_secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "server.session_secret must be set (or PDFCHAT_SESSION_SECRET in the environment)"
                )
            })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_chars == 0 {
        bail!("chunking.chunk_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.chunk_chars {
        bail!("chunking.overlap_chars must be smaller than chunking.chunk_chars");
    }

    if !(-1.0..=1.0).contains(&config.retrieval.match_threshold) {
        bail!("retrieval.match_threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.match_count == 0 {
        bail!("retrieval.match_count must be >= 1");
    }
    if config.retrieval.fallback_pages_per_document < 1 {
        bail!("retrieval.fallback_pages_per_document must be >= 1");
    }

    if config.limits.daily_api_calls < 1 {
        bail!("limits.daily_api_calls must be >= 1");
    }
    if config.limits.max_pages_per_document == 0 {
        bail!("limits.max_pages_per_document must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }
    if config.embedding.provider == "openai"
        && (config.embedding.model.is_none() || config.embedding.dims.unwrap_or(0) == 0)
    {
        bail!("embedding.model and embedding.dims must be set when provider is 'openai'");
    }

    match config.chat.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => bail!(
            "Unknown chat provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }

    match config.storage.backend.as_str() {
        "filesystem" => {}
        "s3" => {
            if config.storage.s3.is_none() {
                bail!("storage.s3 section is required when storage.backend = 's3'");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be filesystem or s3.",
            other
        ),
    }

    Ok(())
}
