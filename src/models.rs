//! Core data types shared across the engine.

use serde::{Deserialize, Serialize};

/// A document in the vault, as reported by the corpus listing.
///
/// The engine never owns document content; it is read on demand during
/// processing. `mtime` is the host-supplied modification time in
/// milliseconds and is the sole freshness signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMeta {
    pub path: String,
    pub mtime: u64,
}

/// A cross-document link suggestion.
///
/// Entries with an `llm_score` were ranked by the reasoning provider;
/// entries without one are similarity-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub target_path: String,
    pub title: String,
    /// Cosine similarity (plus boosts), clamped to `[0, 1]`.
    pub similarity: f32,
    /// A short excerpt from the target document.
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_reason: Option<String>,
}

impl Suggestion {
    pub fn similarity_only(
        target_path: String,
        title: String,
        similarity: f32,
        context: String,
    ) -> Self {
        Self {
            target_path,
            title,
            similarity,
            context,
            llm_score: None,
            llm_reason: None,
        }
    }
}

/// Result of a suggestion computation, including rerank degradation state.
///
/// When the reranking provider fails, `suggestions` holds the
/// similarity-ordered fallback and `llm_failed` is set together with a
/// human-readable reason, so the caller can offer a retry affordance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerankOutcome {
    pub suggestions: Vec<Suggestion>,
    pub llm_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl RerankOutcome {
    pub fn similarity_only(suggestions: Vec<Suggestion>) -> Self {
        Self {
            suggestions,
            llm_failed: false,
            failure_reason: None,
        }
    }

    pub fn degraded(suggestions: Vec<Suggestion>, reason: String) -> Self {
        Self {
            suggestions,
            llm_failed: true,
            failure_reason: Some(reason),
        }
    }
}

/// An ignored `(source, target)` suggestion pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IgnoredLink {
    pub source_path: String,
    pub target_path: String,
    /// Milliseconds since the epoch at the time the pair was ignored.
    pub ignored_at: u64,
}

/// Cached result of an insertion-point query for `(document, link title)`.
///
/// Pure memoization of an expensive call. Not coupled to document mtime;
/// explicitly invalidated when the document is edited instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsertionHint {
    /// Exact phrase in the document to anchor the link to, if one exists.
    pub phrase: Option<String>,
    pub confidence: f32,
    pub reason: String,
}

/// One corpus document the planner decided to (re)process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedDocument {
    pub path: String,
    pub mtime: u64,
    pub needs_embedding: bool,
    pub needs_keywords: bool,
    pub needs_suggestions: bool,
}

/// Output of the scan planner: what to do and what to leave alone.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanPlan {
    pub to_process: Vec<PlannedDocument>,
    pub to_skip: Vec<String>,
    /// Position of the priority document inside `to_process`, if present.
    pub priority_index: Option<usize>,
}

/// Cumulative result of a batch scan.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub processed: usize,
    pub new_embeddings: usize,
    pub unchanged: usize,
    /// Per-document failures: `(path, reason)`. Never aborts the scan.
    pub errors: Vec<(String, String)>,
}

impl ScanSummary {
    /// Render the summary in the two-space report style used by the CLI.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("scan complete\n");
        out.push_str(&format!("  processed: {}\n", self.processed));
        out.push_str(&format!("  new embeddings: {}\n", self.new_embeddings));
        out.push_str(&format!("  unchanged: {}\n", self.unchanged));
        out.push_str(&format!("  errors: {}\n", self.errors.len()));
        for (path, reason) in &self.errors {
            out.push_str(&format!("    {}: {}\n", path, reason));
        }
        out
    }
}
