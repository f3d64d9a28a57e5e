//! Model provider boundary.
//!
//! Two seams: [`Embedder`] turns text into vectors, [`TextGenerator`]
//! answers free-form prompts. Everything above this module is provider
//! agnostic; tests substitute in-process stubs, production wires Ollama
//! or an OpenAI-compatible endpoint.
//!
//! HTTP failures are mapped into [`crate::error::Error`] at this boundary
//! so the retry combinator can classify them.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Human-readable provider identifier for logs and status output.
    fn id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn id(&self) -> &str;

    /// Run a single completion. When `json` is set the provider is asked
    /// for structured output, though callers must still parse defensively.
    async fn generate(&self, prompt: &str, json: bool) -> Result<String>;
}

fn map_reqwest(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else if err.is_decode() {
        Error::Parse(err.to_string())
    } else {
        Error::Network(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    let message = message.chars().take(200).collect();
    Err(Error::Http {
        status: status.as_u16(),
        message,
    })
}

/// Embeds via an Ollama server's `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone().unwrap_or_default(),
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.url))
            .json(&json!({
                "model": self.model,
                "prompt": text,
            }))
            .send()
            .await
            .map_err(|e| map_reqwest(e, self.timeout))?;
        let response = check_status(response).await?;

        let body: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        if body.embedding.is_empty() {
            return Err(Error::Parse("embedding response was empty".into()));
        }
        Ok(body.embedding)
    }
}

/// Embeds via an OpenAI-compatible `/v1/embeddings` endpoint. The API key
/// is taken from `OPENAI_API_KEY` at construction time.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Network("OPENAI_API_KEY is not set".into()))?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone().unwrap_or_default(),
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn id(&self) -> &str {
        "openai"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| map_reqwest(e, self.timeout))?;
        let response = check_status(response).await?;

        let body: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Parse("embeddings response had no data".into()))
    }
}

/// No-op embedder for installations that only want keyword and link
/// bookkeeping. Every call reports the provider as unavailable.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn id(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::NotFound("embedding provider is disabled".into()))
    }
}

/// Completion via an Ollama server's `/api/generate` endpoint,
/// non-streaming.
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone().unwrap_or_default(),
            temperature: config.temperature,
            timeout,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, json: bool) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "num_ctx": 4096,
                "num_predict": -1,
                "temperature": self.temperature,
            },
        });
        if json {
            body["format"] = json!("json");
        }

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest(e, self.timeout))?;
        let response = check_status(response).await?;

        let body: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(body.response)
    }
}

/// Construct the configured embedder.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        _ => Ok(Box::new(DisabledEmbedder)),
    }
}
