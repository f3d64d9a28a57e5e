//! In-memory vector store and similarity queries.
//!
//! Owns one embedding per document path, plus each document's extracted
//! keyword list (first entry is always the title-derived keyword) and a
//! short context excerpt used when rendering suggestions. Entries are
//! replaced atomically; readers racing a batch write may observe a
//! slightly stale snapshot but never a torn one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::Suggestion;
use crate::vault::title_from_path;

/// Serializable snapshot of the store for the binary embedding cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorSnapshot {
    pub embeddings: HashMap<String, Vec<f32>>,
    pub keywords: HashMap<String, Vec<String>>,
    pub contexts: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct VectorStore {
    embeddings: HashMap<String, Vec<f32>>,
    keywords: HashMap<String, Vec<String>>,
    contexts: HashMap<String, String>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, embedding: Vec<f32>) {
        self.embeddings.insert(path.to_string(), embedding);
    }

    pub fn remove(&mut self, path: &str) {
        self.embeddings.remove(path);
        self.keywords.remove(path);
        self.contexts.remove(path);
    }

    pub fn get(&self, path: &str) -> Option<&Vec<f32>> {
        self.embeddings.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.embeddings.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn set_keywords(&mut self, path: &str, keywords: Vec<String>) {
        self.keywords.insert(path.to_string(), keywords);
    }

    pub fn keywords(&self, path: &str) -> Option<&Vec<String>> {
        self.keywords.get(path)
    }

    pub fn set_context(&mut self, path: &str, context: String) {
        self.contexts.insert(path.to_string(), context);
    }

    pub fn clear(&mut self) {
        self.embeddings.clear();
        self.keywords.clear();
        self.contexts.clear();
    }

    pub fn snapshot(&self) -> VectorSnapshot {
        VectorSnapshot {
            embeddings: self.embeddings.clone(),
            keywords: self.keywords.clone(),
            contexts: self.contexts.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: VectorSnapshot) {
        self.embeddings = snapshot.embeddings;
        self.keywords = snapshot.keywords;
        self.contexts = snapshot.contexts;
    }

    /// Rank every stored document against `query_vector` and return link
    /// suggestions for `content`.
    ///
    /// Ranking combines cosine similarity with lexical signals:
    /// - exact title mentions in `content` force inclusion regardless of
    ///   score (single-word titles match on word boundaries, multi-word
    ///   titles as a phrase) and are pinned ahead of everything else;
    /// - keyword overlap adds up to +0.2 (+0.05 per matched keyword);
    /// - parent/child title containment adds +0.10 in each direction.
    ///
    /// Candidates already linked as `[[Title]]` in `content` are dropped,
    /// as is `exclude_path` itself. Scores are clamped to `[0, 1]`. Output
    /// is deterministic: forced entries first, then similarity descending,
    /// ties broken by path.
    pub fn query_similar(
        &self,
        content: &str,
        query_vector: &[f32],
        threshold: f32,
        exclude_path: &str,
        top_k: usize,
    ) -> Vec<Suggestion> {
        struct Ranked {
            suggestion: Suggestion,
            forced: bool,
        }

        let content_lower = content.to_lowercase();
        let source_title_lower = title_from_path(exclude_path).to_lowercase();
        // Slightly permissive floor so boosts can rescue near-threshold hits.
        let effective_threshold = threshold * 0.85;

        let mut ranked: Vec<Ranked> = Vec::new();

        for (path, embedding) in &self.embeddings {
            if path == exclude_path {
                continue;
            }

            let mut similarity = cosine_similarity(query_vector, embedding);
            let mut forced = false;

            let title = title_from_path(path);
            let title_lower = title.to_lowercase();

            let title_words: Vec<&str> = title_lower.split_whitespace().collect();
            if title_words.len() == 1 {
                if contains_word(&content_lower, title_words[0]) {
                    forced = true;
                    similarity += 0.50;
                }
            } else if !title_lower.is_empty() && content_lower.contains(&title_lower) {
                forced = true;
                similarity += 0.30;
            }

            if let Some(keywords) = self.keywords.get(path) {
                let matched = keywords
                    .iter()
                    .filter(|k| content_lower.contains(&k.to_lowercase()))
                    .count();
                if matched > 0 {
                    similarity += (matched as f32 * 0.05).min(0.2);
                }
            }

            // Parent/child topic relationship, e.g. "turbulence" and
            // "strong turbulence" point at each other.
            if title_lower != source_title_lower && !source_title_lower.is_empty() {
                if title_lower.contains(&source_title_lower) {
                    similarity += 0.10;
                }
                if source_title_lower.contains(&title_lower) {
                    similarity += 0.10;
                }
            }

            if !forced && similarity < effective_threshold {
                continue;
            }

            // A link that already exists needs no suggestion.
            let link_pattern = format!("[[{}]]", title);
            if content.contains(&link_pattern) {
                continue;
            }

            let context = self.contexts.get(path).cloned().unwrap_or_default();
            ranked.push(Ranked {
                suggestion: Suggestion::similarity_only(
                    path.clone(),
                    title,
                    similarity.clamp(0.0, 1.0),
                    context,
                ),
                forced,
            });
        }

        ranked.sort_by(|a, b| {
            b.forced
                .cmp(&a.forced)
                .then_with(|| {
                    b.suggestion
                        .similarity
                        .partial_cmp(&a.suggestion.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.suggestion.target_path.cmp(&b.suggestion.target_path))
        });
        ranked.truncate(top_k);

        ranked.into_iter().map(|r| r.suggestion).collect()
    }
}

/// Cosine similarity between two vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Whether `word` occurs in `text` delimited by non-alphanumeric
/// characters, so "number" does not match inside "Reynolds numbers".
fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let mut search_from = 0;
    while let Some(pos) = text[search_from..].find(word) {
        let start = search_from + pos;
        let end = start + word.len();
        let boundary_before = start == 0
            || !text[..start]
                .chars()
                .next_back()
                .map_or(false, |c| c.is_alphanumeric());
        let boundary_after = end >= text.len()
            || !text[end..]
                .chars()
                .next()
                .map_or(false, |c| c.is_alphanumeric());
        if boundary_before && boundary_after {
            return true;
        }
        search_from = start + 1;
    }
    false
}
