use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub vault: VaultConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Directory holding the binary freshness index, binary embedding
    /// store, and JSON suggestion cache.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".vaultlink")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            url: default_ollama_url(),
            dims: None,
            max_retries: default_embed_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embed_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Whether the reranking/keyword provider is consulted at all.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// How many of the top similarity candidates are sent for reranking.
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    #[serde(default = "default_llm_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_rerank_ttl_secs")]
    pub rerank_cache_ttl_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: None,
            url: default_ollama_url(),
            temperature: default_temperature(),
            candidate_count: default_candidate_count(),
            max_attempts: default_llm_max_attempts(),
            timeout_secs: default_llm_timeout_secs(),
            backoff_ms: default_backoff_ms(),
            rerank_cache_ttl_secs: default_rerank_ttl_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.3
}
fn default_candidate_count() -> usize {
    5
}
fn default_llm_max_attempts() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    45
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_rerank_ttl_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// Number of documents processed concurrently within a batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Persist caches after this many completed batches.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every_batches: usize,
    #[serde(default = "default_threshold")]
    pub suggestion_threshold: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on similarity candidates considered per document.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Quiet period after an edit before reprocessing fires.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Window in which repeated open events for one path are collapsed.
    #[serde(default = "default_opened_dedup_ms")]
    pub opened_dedup_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            checkpoint_every_batches: default_checkpoint_every(),
            suggestion_threshold: default_threshold(),
            top_k: default_top_k(),
            max_candidates: default_max_candidates(),
            debounce_ms: default_debounce_ms(),
            opened_dedup_ms: default_opened_dedup_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_checkpoint_every() -> usize {
    5
}
fn default_threshold() -> f32 {
    0.7
}
fn default_top_k() -> usize {
    10
}
fn default_max_candidates() -> usize {
    20
}
fn default_debounce_ms() -> u64 {
    2000
}
fn default_opened_dedup_ms() -> u64 {
    1000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// A bare-bones config for tooling paths that don't need a full vault setup.
    pub fn minimal(root: PathBuf) -> Self {
        Self {
            vault: VaultConfig {
                root,
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
                follow_symlinks: false,
            },
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate scan
    if config.scan.concurrency == 0 {
        anyhow::bail!("scan.concurrency must be > 0");
    }
    if config.scan.top_k == 0 {
        anyhow::bail!("scan.top_k must be > 0");
    }
    if !(0.0..=1.0).contains(&config.scan.suggestion_threshold) {
        anyhow::bail!("scan.suggestion_threshold must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    // Validate llm
    if config.llm.enabled {
        if config.llm.model.is_none() {
            anyhow::bail!("llm.model must be specified when llm.enabled = true");
        }
        if config.llm.max_attempts == 0 {
            anyhow::bail!("llm.max_attempts must be > 0");
        }
        if config.llm.candidate_count == 0 {
            anyhow::bail!("llm.candidate_count must be > 0");
        }
    }

    Ok(config)
}
