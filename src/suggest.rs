//! Suggestion pipeline.
//!
//! Similarity query, candidate capping, and reranking, in that order.
//! Ignored-pair filtering deliberately does NOT happen here: stored
//! suggestion sets always keep the full candidate list, and the ignore
//! set is applied at render time ([`filter_ignored`]), so un-ignoring a
//! pair restores it without recomputation.
//!
//! The store lock is held only for the synchronous query step, never
//! across the provider call.

use std::sync::{Arc, Mutex};

use crate::config::ScanConfig;
use crate::freshness::FreshnessIndex;
use crate::models::{RerankOutcome, Suggestion};
use crate::rerank::RerankCoordinator;
use crate::vector::VectorStore;

/// Drop suggestions whose `(source, target)` pair the user has ignored.
/// Applied at render time only.
pub fn filter_ignored(
    source_path: &str,
    suggestions: Vec<Suggestion>,
    index: &FreshnessIndex,
) -> Vec<Suggestion> {
    suggestions
        .into_iter()
        .filter(|s| !index.is_ignored(source_path, &s.target_path))
        .collect()
}

pub struct SuggestionPipeline {
    store: Arc<Mutex<VectorStore>>,
    coordinator: Arc<RerankCoordinator>,
    config: ScanConfig,
}

impl SuggestionPipeline {
    pub fn new(
        store: Arc<Mutex<VectorStore>>,
        coordinator: Arc<RerankCoordinator>,
        config: ScanConfig,
    ) -> Self {
        Self {
            store,
            coordinator,
            config,
        }
    }

    pub async fn suggest(
        &self,
        path: &str,
        title: &str,
        content: &str,
        query_vector: &[f32],
    ) -> RerankOutcome {
        self.suggest_opts(path, title, content, query_vector, false, false)
            .await
    }

    /// Produce the suggestion list for one document.
    ///
    /// The top `candidate_count` candidates go to the reranker; anything
    /// beyond that keeps its similarity rank and is appended after the
    /// reranked block. The result is truncated to `top_k`.
    ///
    /// `skip_llm` never triggers a provider call: a still-valid cached
    /// rerank is reused if present, otherwise the similarity order is
    /// returned as-is, so identical inputs give identical outputs.
    /// `force_refresh` bypasses the rerank TTL cache read (it still
    /// coalesces with an in-flight computation).
    pub async fn suggest_opts(
        &self,
        path: &str,
        title: &str,
        content: &str,
        query_vector: &[f32],
        skip_llm: bool,
        force_refresh: bool,
    ) -> RerankOutcome {
        let mut candidates = {
            let store = match self.store.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            store.query_similar(
                content,
                query_vector,
                self.config.suggestion_threshold,
                path,
                self.config.max_candidates,
            )
        };

        let overflow = candidates.split_off(candidates.len().min(self.rerank_cap()));

        let outcome = if skip_llm {
            match self.coordinator.get_cached(path, &candidates) {
                Some(cached) => cached,
                None => Arc::new(RerankOutcome::similarity_only(candidates)),
            }
        } else {
            self.coordinator
                .rerank_opts(path, title, content, candidates, force_refresh)
                .await
        };

        let mut suggestions = outcome.suggestions.clone();
        suggestions.extend(overflow);
        suggestions.truncate(self.config.top_k);

        RerankOutcome {
            suggestions,
            llm_failed: outcome.llm_failed,
            failure_reason: outcome.failure_reason.clone(),
        }
    }

    pub fn coordinator(&self) -> &RerankCoordinator {
        &self.coordinator
    }

    fn rerank_cap(&self) -> usize {
        if self.coordinator.is_enabled() {
            self.config.max_candidates.min(self.coordinator.candidate_count())
        } else {
            self.config.max_candidates
        }
    }
}
