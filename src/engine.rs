//! The engine facade.
//!
//! Owns every shared component (vault, vector store, freshness index,
//! rerank coordinator, caches, event tables) and exposes the operations
//! the CLI and host integrations call. All methods take `&self`; internal
//! state is behind mutexes that are never held across provider calls.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::events::{DebounceTable, OpenedDedup};
use crate::freshness::FreshnessIndex;
use crate::models::{IgnoredLink, InsertionHint, RerankOutcome, ScanSummary, Suggestion};
use crate::persist::{now_ms, save_with_retry, CacheStore};
use crate::planner::{count_pending, plan_scan};
use crate::provider::{build_embedder, Embedder, OllamaGenerator, TextGenerator};
use crate::rerank::RerankCoordinator;
use crate::retry::with_retry;
use crate::scanner::BatchScanner;
use crate::suggest::{filter_ignored, SuggestionPipeline};
use crate::vault::{extract_context, title_from_path, Vault};
use crate::vector::VectorStore;

const EMBED_BACKOFF: Duration = Duration::from_millis(500);

/// Snapshot of engine state for status output.
#[derive(Debug)]
pub struct StatusReport {
    pub documents: usize,
    pub embedded: usize,
    pub pending: usize,
    pub ignored_pairs: usize,
    pub cached_suggestion_sets: usize,
    pub embedding_provider: String,
    pub llm_enabled: bool,
}

impl StatusReport {
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("vault status\n");
        out.push_str(&format!("  documents: {}\n", self.documents));
        out.push_str(&format!("  embedded: {}\n", self.embedded));
        out.push_str(&format!("  pending: {}\n", self.pending));
        out.push_str(&format!("  ignored pairs: {}\n", self.ignored_pairs));
        out.push_str(&format!(
            "  cached suggestion sets: {}\n",
            self.cached_suggestion_sets
        ));
        out.push_str(&format!(
            "  embedding provider: {}\n",
            self.embedding_provider
        ));
        out.push_str(&format!("  llm: {}\n", if self.llm_enabled { "enabled" } else { "disabled" }));
        out
    }
}

pub struct Engine {
    config: Config,
    vault: Arc<Vault>,
    store: Arc<Mutex<VectorStore>>,
    index: Arc<Mutex<FreshnessIndex>>,
    embedder: Arc<dyn Embedder>,
    coordinator: Arc<RerankCoordinator>,
    pipeline: Arc<SuggestionPipeline>,
    suggestions: Arc<Mutex<HashMap<String, Vec<Suggestion>>>>,
    cache: Arc<CacheStore>,
    debounce: Mutex<DebounceTable>,
    opened: Mutex<OpenedDedup>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = build_embedder(&config.embedding)
            .context("Failed to construct embedding provider")?
            .into();
        let generator: Arc<dyn TextGenerator> = Arc::new(
            OllamaGenerator::new(&config.llm).context("Failed to construct LLM provider")?,
        );
        Self::with_providers(config, embedder, generator)
    }

    /// Construct with explicit providers. This is the seam integration
    /// tests use to substitute in-process stubs.
    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        let vault = Arc::new(Vault::open(&config.vault)?);
        let store = Arc::new(Mutex::new(VectorStore::new()));
        let index = Arc::new(Mutex::new(FreshnessIndex::new()));
        let coordinator = Arc::new(RerankCoordinator::new(generator, config.llm.clone()));
        let pipeline = Arc::new(SuggestionPipeline::new(
            store.clone(),
            coordinator.clone(),
            config.scan.clone(),
        ));
        let cache = Arc::new(CacheStore::new(config.cache.dir.clone()));
        let debounce = Mutex::new(DebounceTable::new(Duration::from_millis(
            config.scan.debounce_ms,
        )));
        let opened = Mutex::new(OpenedDedup::new(Duration::from_millis(
            config.scan.opened_dedup_ms,
        )));

        Ok(Self {
            config,
            vault,
            store,
            index,
            embedder,
            coordinator,
            pipeline,
            suggestions: Arc::new(Mutex::new(HashMap::new())),
            cache,
            debounce,
            opened,
        })
    }

    // --- Persistence ---

    /// Restore caches from disk. Unreadable caches load as empty.
    pub fn load(&self) -> Result<()> {
        if let Some(index) = self.cache.load_index()? {
            *lock(&self.index) = index;
        }
        if let Some(snapshot) = self.cache.load_embeddings()? {
            lock(&self.store).restore(snapshot);
        }
        if let Some(suggestions) = self.cache.load_suggestions()? {
            *lock(&self.suggestions) = suggestions;
        }
        lock(&self.index).mark_clean();
        Ok(())
    }

    pub async fn save(&self) {
        let index_copy = lock(&self.index).clone();
        let snapshot = lock(&self.store).snapshot();
        let suggestions_copy = lock(&self.suggestions).clone();

        save_with_retry("freshness index", || self.cache.save_index(&index_copy)).await;
        save_with_retry("embeddings", || self.cache.save_embeddings(&snapshot)).await;
        save_with_retry("suggestions", || {
            self.cache.save_suggestions(&suggestions_copy)
        })
        .await;
        lock(&self.index).mark_clean();
    }

    // --- Scanning ---

    /// Plan and execute a corpus scan.
    pub async fn scan_corpus(
        &self,
        check_suggestions: bool,
        priority_path: Option<&str>,
    ) -> Result<ScanSummary> {
        if !self.config.embedding.is_enabled() {
            bail!("Cannot scan: embedding provider is disabled");
        }

        let files = self.vault.list_documents()?;
        let plan = {
            let index = lock(&self.index);
            let store = lock(&self.store);
            plan_scan(&files, &index, &store, priority_path, check_suggestions)
        };
        tracing::info!(
            to_process = plan.to_process.len(),
            to_skip = plan.to_skip.len(),
            "scan planned"
        );

        let scanner = Arc::new(BatchScanner::new(
            self.vault.clone(),
            self.store.clone(),
            self.index.clone(),
            self.embedder.clone(),
            self.pipeline.clone(),
            self.suggestions.clone(),
            self.cache.clone(),
            self.config.scan.clone(),
            self.config.embedding.clone(),
        ));
        Ok(scanner.run(plan).await)
    }

    /// Force reprocessing of one document: drop all its derived state,
    /// then scan with it as the priority document.
    pub async fn refresh_document(&self, path: &str) -> Result<ScanSummary> {
        lock(&self.index).invalidate(path);
        lock(&self.suggestions).remove(path);
        self.coordinator.clear_for_document(path);
        self.scan_corpus(true, Some(path)).await
    }

    // --- Suggestions ---

    /// Compute suggestions for a document right now, bypassing the scan
    /// cycle. The document's embedding is computed on the fly if absent.
    pub async fn get_suggestions(&self, path: &str) -> Result<RerankOutcome> {
        self.get_suggestions_opts(path, false, false).await
    }

    /// As [`get_suggestions`](Self::get_suggestions), with control over
    /// the reranker. `skip_llm` avoids any provider call (a cached rerank
    /// is still used if valid); `force_refresh` bypasses the rerank TTL
    /// cache. The full candidate list is cached; the ignore set is
    /// applied only to the returned view, so un-ignoring a pair needs no
    /// recomputation.
    pub async fn get_suggestions_opts(
        &self,
        path: &str,
        skip_llm: bool,
        force_refresh: bool,
    ) -> Result<RerankOutcome> {
        let content = self.vault.read_document(path)?;
        let title = title_from_path(path);

        let query_vector = match lock(&self.store).get(path).cloned() {
            Some(vector) => vector,
            None => {
                if !self.config.embedding.is_enabled() {
                    bail!("No embedding for {} and the provider is disabled", path);
                }
                let vector = with_retry(
                    || self.embedder.embed(&content),
                    self.config.embedding.max_retries,
                    EMBED_BACKOFF,
                    Duration::from_secs(self.config.embedding.timeout_secs),
                )
                .await
                .with_context(|| format!("Failed to embed {}", path))?;
                let mut store = lock(&self.store);
                store.insert(path, vector.clone());
                store.set_context(path, extract_context(&content, 100));
                vector
            }
        };

        let outcome = self
            .pipeline
            .suggest_opts(path, &title, &content, &query_vector, skip_llm, force_refresh)
            .await;
        lock(&self.suggestions).insert(path.to_string(), outcome.suggestions.clone());

        let visible = filter_ignored(path, outcome.suggestions, &lock(&self.index));
        Ok(RerankOutcome {
            suggestions: visible,
            llm_failed: outcome.llm_failed,
            failure_reason: outcome.failure_reason,
        })
    }

    /// Last computed suggestions for a document, with the current ignore
    /// set applied, without touching any provider.
    pub fn cached_suggestions(&self, path: &str) -> Option<Vec<Suggestion>> {
        let cached = lock(&self.suggestions).get(path).cloned()?;
        Some(filter_ignored(path, cached, &lock(&self.index)))
    }

    // --- Ignored pairs ---

    /// Dismiss a suggestion pair. Cached suggestion sets are left intact;
    /// the ignore set is applied when suggestions are read, so a later
    /// [`unignore`](Self::unignore) restores the pair without rescanning.
    pub fn ignore(&self, source: &str, target: &str) {
        lock(&self.index).ignore(source, target, now_ms());
    }

    pub fn unignore(&self, source: &str, target: &str) {
        lock(&self.index).unignore(source, target);
    }

    pub fn list_ignored(&self) -> Vec<IgnoredLink> {
        lock(&self.index).list_ignored()
    }

    pub fn clear_ignored(&self) {
        lock(&self.index).clear_ignored();
    }

    // --- Insertion hints ---

    /// Where should a link to `link_title` go inside `path`? Memoized
    /// until the document is edited.
    pub async fn insertion_hint(&self, path: &str, link_title: &str) -> Result<InsertionHint> {
        if !self.coordinator.is_enabled() {
            bail!("Insertion hints require the LLM to be enabled");
        }
        if let Some(hint) = lock(&self.index).cached_hint(path, link_title).cloned() {
            return Ok(hint);
        }

        let content = self.vault.read_document(path)?;
        let link_context = lock(&self.suggestions)
            .get(path)
            .and_then(|list| list.iter().find(|s| s.title == link_title))
            .map(|s| s.context.clone())
            .unwrap_or_default();

        let hint = self
            .coordinator
            .insertion_hint(&content, link_title, &link_context)
            .await
            .with_context(|| format!("Failed to compute insertion hint for {}", path))?;
        lock(&self.index).store_hint(path, link_title, hint.clone());
        Ok(hint)
    }

    // --- Editor events ---

    /// A document changed. The change only arms the debounce timer;
    /// invalidation fires together with the reprocess when the window
    /// elapses, so cached suggestions keep serving through an edit burst.
    pub fn on_modified(&self, path: &str, now: Instant) {
        lock(&self.debounce).touch(path, now);
    }

    /// Documents whose debounce window has elapsed, ready to refresh.
    /// Draining a path invalidates its derived state; the caller follows
    /// up with [`Self::refresh_document`].
    pub fn due_modifications(&self, now: Instant) -> Vec<String> {
        let due = lock(&self.debounce).due(now);
        for path in &due {
            lock(&self.index).invalidate(path);
            lock(&self.suggestions).remove(path);
            self.coordinator.clear_for_document(path);
        }
        due
    }

    /// Whether an open event should trigger suggestion display, with
    /// bursts collapsed into one event per window.
    pub fn on_opened(&self, path: &str, now: Instant) -> bool {
        lock(&self.opened).should_process(path, now)
    }

    // --- Maintenance ---

    /// Drop every cache and persist the empty state.
    pub async fn clear_all(&self) {
        lock(&self.store).clear();
        lock(&self.index).clear();
        lock(&self.suggestions).clear();
        self.coordinator.clear();
        self.save().await;
    }

    pub fn status(&self) -> Result<StatusReport> {
        let files = self.vault.list_documents()?;
        let index = lock(&self.index);
        let store = lock(&self.store);
        Ok(StatusReport {
            documents: files.len(),
            embedded: store.len(),
            pending: count_pending(&files, &index, &store),
            ignored_pairs: index.list_ignored().len(),
            cached_suggestion_sets: lock(&self.suggestions).len(),
            embedding_provider: self.embedder.id().to_string(),
            llm_enabled: self.coordinator.is_enabled(),
        })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, EmbeddingConfig, LlmConfig, ScanConfig, VaultConfig};
    use crate::error::Result as ProviderResult;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct UniformEmbedder;

    #[async_trait]
    impl Embedder for UniformEmbedder {
        fn id(&self) -> &str {
            "uniform"
        }

        async fn embed(&self, _text: &str) -> ProviderResult<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct SilentGenerator;

    #[async_trait]
    impl TextGenerator for SilentGenerator {
        fn id(&self) -> &str {
            "silent"
        }

        async fn generate(&self, _prompt: &str, _json: bool) -> ProviderResult<String> {
            Ok(String::new())
        }
    }

    fn engine_in(root: &std::path::Path, cache: &std::path::Path) -> Engine {
        let config = Config {
            vault: VaultConfig {
                root: root.to_path_buf(),
                include_globs: vec!["**/*.md".into()],
                exclude_globs: vec![],
                follow_symlinks: false,
            },
            cache: CacheConfig {
                dir: cache.to_path_buf(),
            },
            embedding: EmbeddingConfig {
                provider: "stub".into(),
                model: Some("stub".into()),
                max_retries: 1,
                timeout_secs: 5,
                ..EmbeddingConfig::default()
            },
            llm: LlmConfig::default(),
            scan: ScanConfig {
                concurrency: 2,
                ..ScanConfig::default()
            },
        };
        Engine::with_providers(config, Arc::new(UniformEmbedder), Arc::new(SilentGenerator))
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_then_cached_suggestions() {
        let vault_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        std::fs::write(vault_dir.path().join("a.md"), "alpha text").unwrap();
        std::fs::write(vault_dir.path().join("b.md"), "beta text").unwrap();
        let engine = engine_in(vault_dir.path(), cache_dir.path());

        let summary = engine.scan_corpus(true, None).await.unwrap();
        assert_eq!(summary.processed, 2);

        let cached = engine.cached_suggestions("a.md").unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].target_path, "b.md");
    }

    #[tokio::test]
    async fn test_ignore_is_instant_in_both_views() {
        let vault_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        std::fs::write(vault_dir.path().join("a.md"), "alpha text").unwrap();
        std::fs::write(vault_dir.path().join("b.md"), "beta text").unwrap();
        let engine = engine_in(vault_dir.path(), cache_dir.path());
        engine.scan_corpus(true, None).await.unwrap();

        engine.ignore("a.md", "b.md");
        assert!(engine.cached_suggestions("a.md").unwrap().is_empty());
        let live = engine.get_suggestions("a.md").await.unwrap();
        assert!(live.suggestions.is_empty());

        // Un-ignoring restores the pair from the stored set alone, with
        // no recomputation.
        engine.unignore("a.md", "b.md");
        let restored = engine.cached_suggestions("a.md").unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].target_path, "b.md");
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let vault_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        std::fs::write(vault_dir.path().join("a.md"), "alpha text").unwrap();
        let engine = engine_in(vault_dir.path(), cache_dir.path());
        engine.scan_corpus(false, None).await.unwrap();
        engine.ignore("a.md", "b.md");
        engine.save().await;

        let fresh = engine_in(vault_dir.path(), cache_dir.path());
        fresh.load().unwrap();
        assert_eq!(fresh.list_ignored().len(), 1);
        let status = fresh.status().unwrap();
        assert_eq!(status.embedded, 1);
        assert_eq!(status.pending, 0);
    }

    #[tokio::test]
    async fn test_on_modified_defers_invalidation_until_drain() {
        let vault_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        std::fs::write(vault_dir.path().join("a.md"), "alpha text").unwrap();
        let engine = engine_in(vault_dir.path(), cache_dir.path());
        engine.scan_corpus(true, None).await.unwrap();

        let t0 = Instant::now();
        engine.on_modified("a.md", t0);
        // Cached suggestions keep serving through the quiet period and
        // nothing is stale yet.
        assert!(engine.cached_suggestions("a.md").is_some());
        assert!(engine.due_modifications(t0).is_empty());
        assert_eq!(engine.status().unwrap().pending, 0);

        let later = t0 + Duration::from_millis(engine.config().scan.debounce_ms);
        assert_eq!(engine.due_modifications(later), vec!["a.md".to_string()]);

        // Draining fired the invalidation: artifacts are stale again and
        // the cached set is gone.
        assert!(engine.cached_suggestions("a.md").is_none());
        assert_eq!(engine.status().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_clear_all_resets_state_and_disk() {
        let vault_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        std::fs::write(vault_dir.path().join("a.md"), "alpha text").unwrap();
        let engine = engine_in(vault_dir.path(), cache_dir.path());
        engine.scan_corpus(true, None).await.unwrap();
        engine.clear_all().await;

        let status = engine.status().unwrap();
        assert_eq!(status.embedded, 0);
        assert_eq!(status.pending, 1);

        let fresh = engine_in(vault_dir.path(), cache_dir.path());
        fresh.load().unwrap();
        assert_eq!(fresh.status().unwrap().embedded, 0);
    }

    #[tokio::test]
    async fn test_scan_refuses_disabled_embedder() {
        let vault_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(vault_dir.path(), cache_dir.path());
        // Rebuild with the provider switched off.
        let mut config = engine.config().clone();
        config.embedding.provider = "disabled".into();
        engine = Engine::with_providers(
            config,
            Arc::new(crate::provider::DisabledEmbedder),
            Arc::new(SilentGenerator),
        )
        .unwrap();
        assert!(engine.scan_corpus(false, None).await.is_err());
    }

    #[tokio::test]
    async fn test_opened_dedup_collapses_bursts() {
        let vault_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let engine = engine_in(vault_dir.path(), cache_dir.path());

        let t0 = Instant::now();
        assert!(engine.on_opened("a.md", t0));
        assert!(!engine.on_opened("a.md", t0 + Duration::from_millis(100)));
        let past_window =
            t0 + Duration::from_millis(engine.config().scan.opened_dedup_ms + 1);
        assert!(engine.on_opened("a.md", past_window));
    }
}
