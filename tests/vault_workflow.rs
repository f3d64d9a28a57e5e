//! End-to-end workflow tests against a temp-dir vault with in-process
//! providers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use vaultlink::config::{CacheConfig, Config, EmbeddingConfig, LlmConfig, ScanConfig, VaultConfig};
use vaultlink::engine::Engine;
use vaultlink::error::{Error, Result as ProviderResult};
use vaultlink::provider::{Embedder, TextGenerator};

/// Embeds each known document onto a fixed axis so similarity between
/// documents is controlled by the test.
struct AxisEmbedder;

#[async_trait]
impl Embedder for AxisEmbedder {
    fn id(&self) -> &str {
        "axis"
    }

    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        // Documents mentioning "physics" share one axis, "cooking" another.
        let physics = text.contains("physics") as u8 as f32;
        let cooking = text.contains("cooking") as u8 as f32;
        if physics == 0.0 && cooking == 0.0 {
            Ok(vec![0.5, 0.5])
        } else {
            Ok(vec![physics, cooking])
        }
    }
}

struct ScriptedGenerator {
    responses: Mutex<Vec<ProviderResult<String>>>,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    fn new(responses: Vec<ProviderResult<String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &str, _json: bool) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(Error::Network("script exhausted".into()))
        } else {
            responses.remove(0)
        }
    }
}

fn test_config(root: &std::path::Path, cache: &std::path::Path, llm_enabled: bool) -> Config {
    Config {
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
            provider: "axis".into(),
            model: Some("axis".into()),
            max_retries: 1,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        },
        llm: LlmConfig {
            enabled: llm_enabled,
            model: llm_enabled.then(|| "scripted".to_string()),
            backoff_ms: 1,
            timeout_secs: 5,
            ..LlmConfig::default()
        },
        scan: ScanConfig {
            concurrency: 2,
            checkpoint_every_batches: 1,
            ..ScanConfig::default()
        },
    }
}

fn write_vault(root: &std::path::Path) {
    std::fs::write(
        root.join("quantum.md"),
        "notes on physics and quantum behavior",
    )
    .unwrap();
    std::fs::write(root.join("thermo.md"), "more physics, heat and entropy").unwrap();
    std::fs::write(root.join("pasta.md"), "cooking notes about pasta").unwrap();
}

#[tokio::test]
async fn scan_builds_cluster_local_suggestions() {
    let vault = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_vault(vault.path());

    let engine = Engine::with_providers(
        test_config(vault.path(), cache.path(), false),
        Arc::new(AxisEmbedder),
        Arc::new(ScriptedGenerator::new(vec![])),
    )
    .unwrap();

    let summary = engine.scan_corpus(true, None).await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.new_embeddings, 3);
    assert!(summary.errors.is_empty());

    // The two physics notes point at each other, not at cooking.
    let physics = engine.cached_suggestions("quantum.md").unwrap();
    assert!(physics.iter().any(|s| s.target_path == "thermo.md"));
    assert!(physics.iter().all(|s| s.target_path != "pasta.md"));

    // Incremental re-scan does nothing.
    let rescan = engine.scan_corpus(true, None).await.unwrap();
    assert_eq!(rescan.processed, 0);
    assert_eq!(rescan.unchanged, 3);
}

#[tokio::test]
async fn editing_one_document_triggers_targeted_rescan() {
    let vault = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_vault(vault.path());

    let engine = Engine::with_providers(
        test_config(vault.path(), cache.path(), false),
        Arc::new(AxisEmbedder),
        Arc::new(ScriptedGenerator::new(vec![])),
    )
    .unwrap();
    engine.scan_corpus(false, None).await.unwrap();

    // Touch one file with new content and a newer mtime.
    std::thread::sleep(std::time::Duration::from_millis(20));
    std::fs::write(
        vault.path().join("quantum.md"),
        "revised physics notes, now longer",
    )
    .unwrap();

    let summary = engine.scan_corpus(false, None).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.new_embeddings, 1);
    assert_eq!(summary.unchanged, 2);
}

#[tokio::test]
async fn rerank_degrades_and_recovers_across_requests() {
    let vault = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_vault(vault.path());

    let generator = Arc::new(ScriptedGenerator::new(vec![
        // Keyword extraction during the scan, one call per document.
        Ok(r#"["physics"]"#.into()),
        Ok(r#"["physics"]"#.into()),
        Ok(r#"["physics"]"#.into()),
        // First rerank: both attempts fail.
        Err(Error::Network("ollama down".into())),
        Err(Error::Network("ollama down".into())),
        // Second rerank: provider is back.
        Ok("Document 1: 9.0 - closely related physics".into()),
    ]));
    let engine = Engine::with_providers(
        test_config(vault.path(), cache.path(), true),
        Arc::new(AxisEmbedder),
        generator.clone(),
    )
    .unwrap();
    engine.scan_corpus(false, None).await.unwrap();

    let degraded = engine.get_suggestions("quantum.md").await.unwrap();
    assert!(degraded.llm_failed);
    assert!(degraded.failure_reason.is_some());
    // Similarity fallback still lists the related note.
    assert_eq!(degraded.suggestions[0].target_path, "thermo.md");
    assert!(degraded.suggestions[0].llm_score.is_none());

    // Failure was not cached: the next identical request goes back to
    // the provider and succeeds.
    let recovered = engine.get_suggestions("quantum.md").await.unwrap();
    assert!(!recovered.llm_failed);
    assert_eq!(recovered.suggestions[0].llm_score, Some(9.0));

    // And the success IS cached: three keyword calls during the scan,
    // then three rerank calls, nothing more.
    let cached = engine.get_suggestions("quantum.md").await.unwrap();
    assert!(!cached.llm_failed);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn state_survives_restart() {
    let vault = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_vault(vault.path());

    {
        let engine = Engine::with_providers(
            test_config(vault.path(), cache.path(), false),
            Arc::new(AxisEmbedder),
            Arc::new(ScriptedGenerator::new(vec![])),
        )
        .unwrap();
        engine.scan_corpus(true, None).await.unwrap();
        engine.ignore("quantum.md", "thermo.md");
        engine.save().await;
    }

    let engine = Engine::with_providers(
        test_config(vault.path(), cache.path(), false),
        Arc::new(AxisEmbedder),
        Arc::new(ScriptedGenerator::new(vec![])),
    )
    .unwrap();
    engine.load().unwrap();

    let status = engine.status().unwrap();
    assert_eq!(status.documents, 3);
    assert_eq!(status.embedded, 3);
    assert_eq!(status.pending, 0);
    assert_eq!(status.ignored_pairs, 1);

    // The ignore decision survived and still filters suggestions.
    let suggestions = engine.get_suggestions("quantum.md").await.unwrap();
    assert!(suggestions
        .suggestions
        .iter()
        .all(|s| s.target_path != "thermo.md"));
}

#[tokio::test]
async fn refresh_document_reprocesses_with_priority() {
    let vault = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_vault(vault.path());

    let engine = Engine::with_providers(
        test_config(vault.path(), cache.path(), false),
        Arc::new(AxisEmbedder),
        Arc::new(ScriptedGenerator::new(vec![])),
    )
    .unwrap();
    engine.scan_corpus(true, None).await.unwrap();

    let summary = engine.refresh_document("pasta.md").await.unwrap();
    // Invalidating pasta.md marks its embedding stale, which makes the
    // planner recompute suggestions corpus-wide.
    assert!(summary.processed >= 1);
    assert!(engine.cached_suggestions("pasta.md").is_some());
}
