//! Rerank coordination: caching, coalescing, and degradation around the
//! reasoning provider.
//!
//! Provider calls are expensive (seconds, not milliseconds), so this
//! module guarantees three things for reranking:
//!
//! 1. identical requests within the TTL window are served from cache;
//! 2. concurrent identical requests share one provider call: a single
//!    leader computes, followers subscribe to its result;
//! 3. provider failure degrades to the similarity-ordered candidates with
//!    `llm_failed` set, and is never cached, so the next request retries.
//!
//! The coordinator is also the facade for the other provider-backed
//! calls (keyword extraction, insertion hints), so retry policy lives in
//! exactly one place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::LlmConfig;
use crate::error::Result;
use crate::llm;
use crate::models::{InsertionHint, RerankOutcome, Suggestion};
use crate::provider::TextGenerator;
use crate::retry::with_retry;

/// Identity of a rerank request: the source document plus the exact
/// candidate set. Candidate order does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RerankKey {
    doc_path: String,
    candidates: String,
}

impl RerankKey {
    fn new(doc_path: &str, candidates: &[Suggestion]) -> Self {
        let mut paths: Vec<&str> = candidates.iter().map(|s| s.target_path.as_str()).collect();
        paths.sort_unstable();
        Self {
            doc_path: doc_path.to_string(),
            candidates: paths.join("\n"),
        }
    }

    fn involves(&self, path: &str) -> bool {
        self.doc_path == path || self.candidates.split('\n').any(|c| c == path)
    }
}

struct CacheEntry {
    outcome: Arc<RerankOutcome>,
    inserted_at: Instant,
}

type ResultSlot = Option<Arc<RerankOutcome>>;

pub struct RerankCoordinator {
    generator: Arc<dyn TextGenerator>,
    config: LlmConfig,
    cache: Mutex<HashMap<RerankKey, CacheEntry>>,
    in_flight: Mutex<HashMap<RerankKey, watch::Receiver<ResultSlot>>>,
    // Bumped on every invalidation. A leader snapshots it when it
    // registers and refuses to cache if it moved, so a rerank computed
    // from pre-edit content never lands in the cache.
    epoch: AtomicU64,
}

impl RerankCoordinator {
    pub fn new(generator: Arc<dyn TextGenerator>, config: LlmConfig) -> Self {
        Self {
            generator,
            config,
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.rerank_cache_ttl_secs)
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.config.backoff_ms)
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Rerank `candidates` against the source document.
    ///
    /// With the provider disabled (or nothing to rank) this returns the
    /// similarity-only outcome immediately and touches no shared state.
    pub async fn rerank(
        &self,
        doc_path: &str,
        doc_title: &str,
        doc_content: &str,
        candidates: Vec<Suggestion>,
    ) -> Arc<RerankOutcome> {
        self.rerank_opts(doc_path, doc_title, doc_content, candidates, false)
            .await
    }

    /// Like [`Self::rerank`], but `force_refresh` skips the TTL cache
    /// read. A forced request still coalesces with an in-flight
    /// computation for the same key, and its result still populates the
    /// cache.
    pub async fn rerank_opts(
        &self,
        doc_path: &str,
        doc_title: &str,
        doc_content: &str,
        candidates: Vec<Suggestion>,
        force_refresh: bool,
    ) -> Arc<RerankOutcome> {
        if !self.config.enabled || candidates.is_empty() {
            return Arc::new(RerankOutcome::similarity_only(candidates));
        }

        let key = RerankKey::new(doc_path, &candidates);

        enum Role {
            Leader(watch::Sender<ResultSlot>),
            Follower(watch::Receiver<ResultSlot>),
        }

        let (role, epoch) = {
            // Cache check and in-flight registration under one ordering:
            // cache first so an expired leader result is never raced past.
            if !force_refresh {
                if let Some(hit) = self.cached(&key) {
                    return hit;
                }
            }
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let epoch = self.epoch.load(Ordering::SeqCst);
            if let Some(rx) = in_flight.get(&key) {
                (Role::Follower(rx.clone()), epoch)
            } else {
                let (tx, rx) = watch::channel(None);
                in_flight.insert(key.clone(), rx);
                (Role::Leader(tx), epoch)
            }
        };

        match role {
            Role::Follower(mut rx) => {
                loop {
                    if let Some(outcome) = rx.borrow().clone() {
                        return outcome;
                    }
                    if rx.changed().await.is_err() {
                        // Leader dropped without publishing (task aborted).
                        return Arc::new(RerankOutcome::degraded(
                            candidates,
                            "rerank computation was aborted".into(),
                        ));
                    }
                }
            }
            Role::Leader(tx) => {
                let outcome = Arc::new(self.compute(doc_title, doc_content, candidates).await);

                // An invalidation while we computed means this outcome
                // reflects pre-edit content: waiting followers still get
                // it, but it must not be cached.
                let invalidated = self.epoch.load(Ordering::SeqCst) != epoch;
                if !outcome.llm_failed && !invalidated {
                    let mut cache = match self.cache.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    cache.insert(
                        key.clone(),
                        CacheEntry {
                            outcome: outcome.clone(),
                            inserted_at: Instant::now(),
                        },
                    );
                }

                {
                    let mut in_flight = match self.in_flight.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    // Only deregister our own entry. An invalidation may
                    // have already dropped it and a newer leader may have
                    // registered the same key since.
                    if let Some(existing) = in_flight.get(&key) {
                        if existing.same_channel(&tx.subscribe()) {
                            in_flight.remove(&key);
                        }
                    }
                }
                // Publish after deregistering, so a late subscriber either
                // saw this value or starts a fresh computation.
                let _ = tx.send(Some(outcome.clone()));

                outcome
            }
        }
    }

    async fn compute(
        &self,
        doc_title: &str,
        doc_content: &str,
        candidates: Vec<Suggestion>,
    ) -> RerankOutcome {
        let prompt = llm::build_rerank_prompt(doc_title, doc_content, &candidates);

        let result = with_retry(
            || async {
                let response = self.generator.generate(&prompt, false).await?;
                llm::parse_rankings(&response)
            },
            self.config.max_attempts,
            self.backoff(),
            self.attempt_timeout(),
        )
        .await;

        match result {
            Ok(rankings) => RerankOutcome {
                suggestions: llm::merge_rankings(&candidates, rankings),
                llm_failed: false,
                failure_reason: None,
            },
            Err(err) => {
                tracing::warn!(error = %err, "rerank failed, serving similarity order");
                RerankOutcome::degraded(candidates, err.to_string())
            }
        }
    }

    fn cached(&self, key: &RerankKey) -> Option<Arc<RerankOutcome>> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match cache.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl() => {
                Some(entry.outcome.clone())
            }
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    /// TTL-aware read-only cache lookup. Never computes.
    pub fn get_cached(
        &self,
        doc_path: &str,
        candidates: &[Suggestion],
    ) -> Option<Arc<RerankOutcome>> {
        self.cached(&RerankKey::new(doc_path, candidates))
    }

    /// Drop every expired cache entry.
    pub fn purge_expired(&self) {
        let ttl = self.ttl();
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }

    /// Drop every cached outcome and in-flight computation that involves
    /// `path`, whether as the source document or as one of the
    /// candidates. Called when a document is edited. A leader whose key
    /// is dropped here still answers its current followers, but its
    /// result is not cached and new requests start a fresh computation.
    pub fn clear_for_document(&self, path: &str) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut cache = match self.cache.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            cache.retain(|key, _| !key.involves(path));
        }
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.retain(|key, _| !key.involves(path));
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut cache = match self.cache.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            cache.clear();
        }
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.clear();
    }

    // --- Other provider-backed calls ---

    /// Extract keywords for a document. Uses the same retry policy as
    /// reranking; callers decide the fallback (typically title-only).
    pub async fn extract_keywords(&self, doc_title: &str, doc_content: &str) -> Result<Vec<String>> {
        let prompt = llm::build_keyword_prompt(doc_title, doc_content);
        with_retry(
            || async {
                let response = self.generator.generate(&prompt, true).await?;
                llm::parse_keywords(&response)
            },
            self.config.max_attempts,
            self.backoff(),
            self.attempt_timeout(),
        )
        .await
    }

    /// Ask where a link to `link_title` fits inside a document.
    pub async fn insertion_hint(
        &self,
        doc_content: &str,
        link_title: &str,
        link_context: &str,
    ) -> Result<InsertionHint> {
        let prompt = llm::build_insertion_prompt(link_title, doc_content, link_context);
        with_retry(
            || async {
                let response = self.generator.generate(&prompt, true).await?;
                llm::parse_insertion(&response)
            },
            self.config.max_attempts,
            self.backoff(),
            self.attempt_timeout(),
        )
        .await
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// How many top candidates the configuration sends for reranking.
    pub fn candidate_count(&self) -> usize {
        self.config.candidate_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedGenerator {
        responses: Mutex<Vec<Result<String>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _prompt: &str, _json: bool) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(Error::Network("script exhausted".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn config(enabled: bool) -> LlmConfig {
        LlmConfig {
            enabled,
            model: Some("test".into()),
            backoff_ms: 1,
            timeout_secs: 5,
            ..LlmConfig::default()
        }
    }

    fn candidates() -> Vec<Suggestion> {
        vec![
            Suggestion::similarity_only("a.md".into(), "A".into(), 0.9, "ctx a".into()),
            Suggestion::similarity_only("b.md".into(), "B".into(), 0.8, "ctx b".into()),
        ]
    }

    #[tokio::test]
    async fn test_disabled_provider_returns_similarity_order() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let coordinator = RerankCoordinator::new(generator.clone(), config(false));

        let outcome = coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert!(!outcome.llm_failed);
        assert!(outcome.suggestions.iter().all(|s| s.llm_score.is_none()));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_successful_rerank_is_cached() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(
            "Document 1: 3.0 - weak\nDocument 2: 9.0 - strong".into(),
        )]));
        let coordinator = RerankCoordinator::new(generator.clone(), config(true));

        let first = coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert_eq!(first.suggestions[0].title, "B");
        assert_eq!(first.suggestions[0].llm_score, Some(9.0));

        // Second identical call must be answered from cache.
        let second = coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert_eq!(second.suggestions, first.suggestions);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_degrades_and_is_not_cached() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(Error::Network("down".into())),
            Err(Error::Network("down".into())),
            Ok("Document 1: 8.0 - recovered\nDocument 2: 1.0 - weak".into()),
        ]));
        let coordinator = RerankCoordinator::new(generator.clone(), config(true));

        let degraded = coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert!(degraded.llm_failed);
        assert!(degraded.failure_reason.is_some());
        // Fallback preserves similarity ordering.
        assert_eq!(degraded.suggestions[0].title, "A");
        assert_eq!(generator.calls(), 2);

        // Retry succeeds because the failure was not cached.
        let retried = coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert!(!retried.llm_failed);
        assert_eq!(retried.suggestions[0].title, "A");
        assert_eq!(retried.suggestions[0].llm_score, Some(8.0));
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_share_one_call() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec![Ok(
                "Document 1: 5.0 - a\nDocument 2: 6.0 - b".into()
            )])
            .with_delay(Duration::from_millis(50)),
        );
        let coordinator = Arc::new(RerankCoordinator::new(generator.clone(), config(true)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.rerank("src.md", "Src", "text", candidates()).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        assert_eq!(generator.calls(), 1);
        assert!(outcomes.iter().all(|o| !o.llm_failed));
        assert!(outcomes
            .windows(2)
            .all(|w| w[0].suggestions == w[1].suggestions));
    }

    #[tokio::test]
    async fn test_candidate_order_does_not_change_cache_identity() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(
            "Document 1: 5.0 - a\nDocument 2: 6.0 - b".into(),
        )]));
        let coordinator = RerankCoordinator::new(generator.clone(), config(true));

        coordinator.rerank("src.md", "Src", "text", candidates()).await;
        let mut reversed = candidates();
        reversed.reverse();
        coordinator.rerank("src.md", "Src", "text", reversed).await;
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_for_document_evicts_as_source_and_as_candidate() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("Document 1: 5.0 - a\nDocument 2: 6.0 - b".into()),
            Ok("Document 1: 5.0 - a\nDocument 2: 6.0 - b".into()),
        ]));
        let coordinator = RerankCoordinator::new(generator.clone(), config(true));

        coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert_eq!(generator.calls(), 1);

        // b.md is a candidate of the cached entry.
        coordinator.clear_for_document("b.md");
        coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_edit_during_rerank_is_served_but_not_cached() {
        let generator = Arc::new(
            ScriptedGenerator::new(vec![
                Ok("Document 1: 5.0 - a\nDocument 2: 6.0 - b".into()),
                Ok("Document 1: 7.0 - a\nDocument 2: 2.0 - b".into()),
            ])
            .with_delay(Duration::from_millis(50)),
        );
        let coordinator = Arc::new(RerankCoordinator::new(generator.clone(), config(true)));

        let in_flight = {
            let coordinator = coordinator.clone();
            tokio::spawn(
                async move { coordinator.rerank("src.md", "Src", "text", candidates()).await },
            )
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // The document is edited while the provider call is running.
        coordinator.clear_for_document("src.md");

        // The waiting caller still gets the computed outcome.
        let stale = in_flight.await.unwrap();
        assert!(!stale.llm_failed);
        assert_eq!(stale.suggestions[0].llm_score, Some(6.0));

        // But the pre-edit result was not cached; the next request
        // computes against the current content.
        assert!(coordinator.get_cached("src.md", &candidates()).is_none());
        let fresh = coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert_eq!(fresh.suggestions[0].llm_score, Some(7.0));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_recomputes() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("Document 1: 5.0 - a\nDocument 2: 6.0 - b".into()),
            Ok("Document 1: 7.0 - a\nDocument 2: 2.0 - b".into()),
        ]));
        let mut cfg = config(true);
        cfg.rerank_cache_ttl_secs = 0;
        let coordinator = RerankCoordinator::new(generator.clone(), cfg);

        coordinator.rerank("src.md", "Src", "text", candidates()).await;
        coordinator.rerank("src.md", "Src", "text", candidates()).await;
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache_read_but_repopulates() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("Document 1: 5.0 - a\nDocument 2: 6.0 - b".into()),
            Ok("Document 1: 8.0 - a\nDocument 2: 1.0 - b".into()),
        ]));
        let coordinator = RerankCoordinator::new(generator.clone(), config(true));

        coordinator.rerank("src.md", "Src", "text", candidates()).await;
        let refreshed = coordinator
            .rerank_opts("src.md", "Src", "text", candidates(), true)
            .await;
        assert_eq!(generator.calls(), 2);
        assert_eq!(refreshed.suggestions[0].llm_score, Some(8.0));

        // The forced result replaced the cached entry.
        let cached = coordinator.get_cached("src.md", &candidates()).unwrap();
        assert_eq!(cached.suggestions[0].llm_score, Some(8.0));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_get_cached_never_computes() {
        let generator = Arc::new(ScriptedGenerator::new(vec![]));
        let coordinator = RerankCoordinator::new(generator.clone(), config(true));
        assert!(coordinator.get_cached("src.md", &candidates()).is_none());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_only_stale_entries() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(
            "Document 1: 5.0 - a\nDocument 2: 6.0 - b".into(),
        )]));
        let mut cfg = config(true);
        cfg.rerank_cache_ttl_secs = 3600;
        let coordinator = RerankCoordinator::new(generator, cfg);

        coordinator.rerank("src.md", "Src", "text", candidates()).await;
        coordinator.purge_expired();
        assert!(coordinator.get_cached("src.md", &candidates()).is_some());
    }

    #[tokio::test]
    async fn test_keyword_extraction_retries_parse_failures() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("not json".into()),
            Ok(r#"["alpha", "beta"]"#.into()),
        ]));
        let coordinator = RerankCoordinator::new(generator.clone(), config(true));

        let keywords = coordinator.extract_keywords("T", "content").await.unwrap();
        assert_eq!(keywords, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(generator.calls(), 2);
    }
}
