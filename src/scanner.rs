//! Batch document processing.
//!
//! Executes a [`ScanPlan`] in two phases. The first phase settles every
//! embedding and keyword list; only then does the second phase run
//! suggestion queries, so each query sees the complete corpus rather
//! than whatever happened to be embedded so far. Within a phase, up to
//! `concurrency` documents are processed at once and a batch is fully
//! settled before the next begins. One document failing records an
//! error in the summary and never aborts the scan. Caches are
//! checkpointed to disk every few batches so an interrupted run loses
//! little work.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::config::{EmbeddingConfig, ScanConfig};
use crate::freshness::{ArtifactKind, FreshnessIndex};
use crate::models::{PlannedDocument, ScanPlan, ScanSummary, Suggestion};
use crate::persist::{save_with_retry, CacheStore};
use crate::provider::Embedder;
use crate::retry::with_retry;
use crate::suggest::SuggestionPipeline;
use crate::vault::{extract_context, title_from_path, Vault};
use crate::vector::VectorStore;

const EMBED_BACKOFF: Duration = Duration::from_millis(500);
const CONTEXT_CHARS: usize = 100;

pub struct BatchScanner {
    vault: Arc<Vault>,
    store: Arc<Mutex<VectorStore>>,
    index: Arc<Mutex<FreshnessIndex>>,
    embedder: Arc<dyn Embedder>,
    pipeline: Arc<SuggestionPipeline>,
    suggestions: Arc<Mutex<HashMap<String, Vec<Suggestion>>>>,
    cache: Arc<CacheStore>,
    scan_config: ScanConfig,
    embed_config: EmbeddingConfig,
    priority_tx: Mutex<Option<oneshot::Sender<Vec<Suggestion>>>>,
}

impl BatchScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vault: Arc<Vault>,
        store: Arc<Mutex<VectorStore>>,
        index: Arc<Mutex<FreshnessIndex>>,
        embedder: Arc<dyn Embedder>,
        pipeline: Arc<SuggestionPipeline>,
        suggestions: Arc<Mutex<HashMap<String, Vec<Suggestion>>>>,
        cache: Arc<CacheStore>,
        scan_config: ScanConfig,
        embed_config: EmbeddingConfig,
    ) -> Self {
        Self {
            vault,
            store,
            index,
            embedder,
            pipeline,
            suggestions,
            cache,
            scan_config,
            embed_config,
            priority_tx: Mutex::new(None),
        }
    }

    /// Subscribe to the priority document's suggestions. The channel
    /// fires as soon as that document settles, long before a large scan
    /// completes, so a host can display its suggestions right away. The
    /// sender is dropped unfired if the plan has no priority document or
    /// it fails.
    pub fn subscribe_priority(&self) -> oneshot::Receiver<Vec<Suggestion>> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.priority_tx) = Some(tx);
        rx
    }

    /// Execute the plan to completion and persist a final checkpoint.
    ///
    /// Suggestion queries only start once every planned embedding has
    /// settled, so on a cold start the first documents processed still
    /// see the whole corpus as candidates.
    pub async fn run(self: Arc<Self>, plan: ScanPlan) -> ScanSummary {
        let mut summary = ScanSummary {
            unchanged: plan.to_skip.len(),
            ..ScanSummary::default()
        };

        let priority_path = plan
            .priority_index
            .and_then(|i| plan.to_process.get(i))
            .map(|doc| doc.path.clone());

        let mut failed: HashSet<String> = HashSet::new();
        let mut batches_done = 0usize;

        // Phase one: embeddings and keywords.
        let embed_work: Vec<PlannedDocument> = plan
            .to_process
            .iter()
            .filter(|doc| doc.needs_embedding || doc.needs_keywords)
            .cloned()
            .collect();
        for batch in embed_work.chunks(self.scan_config.concurrency) {
            let mut set: JoinSet<(PlannedDocument, Result<bool, String>)> = JoinSet::new();

            for doc in batch {
                let scanner = self.clone();
                let doc = doc.clone();
                set.spawn(async move {
                    let result = scanner.embed_document(&doc).await;
                    (doc, result)
                });
            }

            // All-settled: every task in the batch reports before the
            // next batch starts.
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((doc, Ok(new_embedding))) => {
                        if new_embedding {
                            summary.new_embeddings += 1;
                        }
                        if !doc.needs_suggestions {
                            summary.processed += 1;
                        }
                        tracing::debug!(path = %doc.path, "document embedded");
                    }
                    Ok((doc, Err(reason))) => {
                        tracing::warn!(path = %doc.path, reason, "document failed");
                        failed.insert(doc.path.clone());
                        summary.errors.push((doc.path, reason));
                    }
                    Err(join_err) => {
                        summary
                            .errors
                            .push(("<task>".to_string(), join_err.to_string()));
                    }
                }
            }

            batches_done += 1;
            tracing::info!(
                processed = summary.processed,
                new_embeddings = summary.new_embeddings,
                errors = summary.errors.len(),
                "batch complete"
            );
            if batches_done % self.scan_config.checkpoint_every_batches == 0 {
                self.checkpoint().await;
            }
        }

        // Phase two: suggestion queries, now that the store is complete.
        // A document that already failed phase one is skipped here and
        // its suggestion artifact stays stale.
        let suggest_work: Vec<PlannedDocument> = plan
            .to_process
            .iter()
            .filter(|doc| doc.needs_suggestions && !failed.contains(&doc.path))
            .cloned()
            .collect();
        for batch in suggest_work.chunks(self.scan_config.concurrency) {
            let mut set: JoinSet<(String, Result<(), String>)> = JoinSet::new();

            for doc in batch {
                let scanner = self.clone();
                let doc = doc.clone();
                set.spawn(async move {
                    let path = doc.path.clone();
                    let result = scanner.refresh_suggestions(&doc).await;
                    (path, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((path, Ok(()))) => {
                        summary.processed += 1;
                        if priority_path.as_deref() == Some(path.as_str()) {
                            self.publish_priority(&path);
                        }
                        tracing::debug!(path, "suggestions refreshed");
                    }
                    Ok((path, Err(reason))) => {
                        tracing::warn!(path, reason, "document failed");
                        summary.errors.push((path, reason));
                    }
                    Err(join_err) => {
                        summary
                            .errors
                            .push(("<task>".to_string(), join_err.to_string()));
                    }
                }
            }

            batches_done += 1;
            if batches_done % self.scan_config.checkpoint_every_batches == 0 {
                self.checkpoint().await;
            }
        }

        self.checkpoint().await;
        // Drop an unfired sender so subscribers see the channel close
        // instead of waiting forever.
        lock(&self.priority_tx).take();
        summary
    }

    async fn embed_document(&self, doc: &PlannedDocument) -> Result<bool, String> {
        let content = self
            .vault
            .read_document(&doc.path)
            .map_err(|e| e.to_string())?;
        let title = title_from_path(&doc.path);
        let mut new_embedding = false;

        if doc.needs_embedding {
            let embedding = with_retry(
                || self.embedder.embed(&content),
                self.embed_config.max_retries,
                EMBED_BACKOFF,
                Duration::from_secs(self.embed_config.timeout_secs),
            )
            .await
            .map_err(|e| format!("embedding failed: {}", e))?;

            {
                let mut store = lock(&self.store);
                store.insert(&doc.path, embedding);
                store.set_context(&doc.path, extract_context(&content, CONTEXT_CHARS));
            }
            lock(&self.index).mark_processed(&doc.path, ArtifactKind::Embedding, doc.mtime);
            new_embedding = true;
        }

        if doc.needs_keywords {
            let keywords = self.compose_keywords(&title, &content).await;
            lock(&self.store).set_keywords(&doc.path, keywords);
            lock(&self.index).mark_processed(&doc.path, ArtifactKind::Keywords, doc.mtime);
        }

        Ok(new_embedding)
    }

    async fn refresh_suggestions(&self, doc: &PlannedDocument) -> Result<(), String> {
        let content = self
            .vault
            .read_document(&doc.path)
            .map_err(|e| e.to_string())?;
        let title = title_from_path(&doc.path);
        let query_vector = lock(&self.store)
            .get(&doc.path)
            .cloned()
            .ok_or_else(|| "no embedding available for suggestion query".to_string())?;

        let outcome = self
            .pipeline
            .suggest(&doc.path, &title, &content, &query_vector)
            .await;
        lock(&self.suggestions).insert(doc.path.clone(), outcome.suggestions);
        // A degraded rerank still counts as computed; the next edit
        // or explicit refresh retries the provider.
        lock(&self.index).mark_processed(&doc.path, ArtifactKind::Suggestions, doc.mtime);
        Ok(())
    }

    /// The keyword list always starts with the title-derived keyword;
    /// provider keywords follow. Provider failure degrades to title-only.
    async fn compose_keywords(&self, title: &str, content: &str) -> Vec<String> {
        let mut keywords = vec![title.to_string()];
        if !self.pipeline.coordinator().is_enabled() {
            return keywords;
        }

        match self.pipeline.coordinator().extract_keywords(title, content).await {
            Ok(extracted) => {
                for keyword in extracted {
                    if !keyword.eq_ignore_ascii_case(title) && !keywords.contains(&keyword) {
                        keywords.push(keyword);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(title, error = %e, "keyword extraction failed, keeping title only");
            }
        }
        keywords
    }

    fn publish_priority(&self, path: &str) {
        if let Some(tx) = lock(&self.priority_tx).take() {
            let suggestions = lock(&self.suggestions).get(path).cloned().unwrap_or_default();
            // The subscriber may have gone away; nothing to do then.
            let _ = tx.send(suggestions);
        }
    }

    async fn checkpoint(&self) {
        let index_copy = lock(&self.index).clone();
        let snapshot = lock(&self.store).snapshot();
        let suggestions_copy = lock(&self.suggestions).clone();

        let cache = &self.cache;
        save_with_retry("freshness index", || cache.save_index(&index_copy)).await;
        save_with_retry("embeddings", || cache.save_embeddings(&snapshot)).await;
        save_with_retry("suggestions", || cache.save_suggestions(&suggestions_copy)).await;
        lock(&self.index).mark_clean();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
