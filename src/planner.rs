//! Scan planning.
//!
//! A pure function over `(corpus snapshot, freshness index, vector store)`
//! that decides exactly which derived artifacts must be recomputed. It
//! never mutates its inputs, so a plan can be recomputed cheaply if a
//! batch run is interrupted.

use crate::freshness::{ArtifactKind, FreshnessIndex};
use crate::models::{DocumentMeta, PlannedDocument, ScanPlan};
use crate::vector::VectorStore;

/// Build the work list for a corpus snapshot.
///
/// Per document:
/// - `needs_embedding`: no stored vector, or the embedding entry does not
///   match the current mtime;
/// - `needs_keywords`: `needs_embedding`, or the keyword entry is stale;
/// - `needs_suggestions`: only when `check_suggestions` is set, the
///   suggestion entry is stale, or *any* document anywhere needs a new
///   embedding. Suggestions depend on the embeddings of other documents,
///   so one changed neighbor can invalidate cross-links corpus-wide;
///   recomputing too much is preferred over serving stale links.
///
/// Ordering of `to_process`: the priority path first when it needs work,
/// then mtime descending, ties broken by path so the plan is
/// deterministic for identical inputs.
pub fn plan_scan(
    files: &[DocumentMeta],
    index: &FreshnessIndex,
    store: &VectorStore,
    priority_path: Option<&str>,
    check_suggestions: bool,
) -> ScanPlan {
    let any_embedding_stale = files
        .iter()
        .any(|f| !store.contains(&f.path) || !index.is_fresh(&f.path, ArtifactKind::Embedding, f.mtime));

    let mut to_process: Vec<PlannedDocument> = Vec::new();
    let mut to_skip: Vec<String> = Vec::new();

    for file in files {
        let needs_embedding = !store.contains(&file.path)
            || !index.is_fresh(&file.path, ArtifactKind::Embedding, file.mtime);
        let needs_keywords =
            needs_embedding || !index.is_fresh(&file.path, ArtifactKind::Keywords, file.mtime);
        let needs_suggestions = check_suggestions
            && (any_embedding_stale
                || !index.is_fresh(&file.path, ArtifactKind::Suggestions, file.mtime));

        if needs_embedding || needs_keywords || needs_suggestions {
            to_process.push(PlannedDocument {
                path: file.path.clone(),
                mtime: file.mtime,
                needs_embedding,
                needs_keywords,
                needs_suggestions,
            });
        } else {
            to_skip.push(file.path.clone());
        }
    }

    to_process.sort_by(|a, b| {
        let a_priority = priority_path.map_or(false, |p| a.path == p);
        let b_priority = priority_path.map_or(false, |p| b.path == p);
        b_priority
            .cmp(&a_priority)
            .then_with(|| b.mtime.cmp(&a.mtime))
            .then_with(|| a.path.cmp(&b.path))
    });

    let priority_index =
        priority_path.and_then(|p| to_process.iter().position(|f| f.path == p));

    ScanPlan {
        to_process,
        to_skip,
        priority_index,
    }
}

/// Quick count of documents whose embedding is missing or stale, for
/// status displays that don't need a full plan.
pub fn count_pending(files: &[DocumentMeta], index: &FreshnessIndex, store: &VectorStore) -> usize {
    files
        .iter()
        .filter(|f| {
            !store.contains(&f.path)
                || !index.is_fresh(&f.path, ArtifactKind::Embedding, f.mtime)
        })
        .count()
}
