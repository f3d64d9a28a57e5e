//! Freshness bookkeeping for derived artifacts.
//!
//! The [`FreshnessIndex`] is the single source of truth for "is this
//! derived artifact stale": it records, per document path and per artifact
//! kind (embedding, keyword set, suggestion set), the modification time
//! the artifact was last computed from. It also owns the ignored-pair set
//! and the insertion-hint cache, because all three share one persistence
//! lifecycle.
//!
//! All operations are total functions over in-memory maps; there are no
//! error conditions. Every mutation sets a dirty flag which the debounced
//! persist consumes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{IgnoredLink, InsertionHint};

/// The three artifact kinds tracked per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Embedding,
    Keywords,
    Suggestions,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Embedding,
        ArtifactKind::Keywords,
        ArtifactKind::Suggestions,
    ];
}

/// Per-document, per-kind last-processed mtimes plus the ignored-pair set
/// and insertion-hint cache.
///
/// Invariant: `is_fresh(path, kind, mtime)` holds iff an entry exists for
/// `(path, kind)` and equals `mtime` exactly. Absence or mismatch both
/// mean stale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreshnessIndex {
    embedding_mtimes: HashMap<String, u64>,
    keyword_mtimes: HashMap<String, u64>,
    suggestion_mtimes: HashMap<String, u64>,
    /// Key: `source|target` -> ignore timestamp (ms).
    ignored_pairs: HashMap<String, u64>,
    /// Key: `path::link_title` -> memoized insertion hint.
    insertion_hints: HashMap<String, InsertionHint>,
    #[serde(skip)]
    dirty: bool,
}

impl FreshnessIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_for(&self, kind: ArtifactKind) -> &HashMap<String, u64> {
        match kind {
            ArtifactKind::Embedding => &self.embedding_mtimes,
            ArtifactKind::Keywords => &self.keyword_mtimes,
            ArtifactKind::Suggestions => &self.suggestion_mtimes,
        }
    }

    fn map_for_mut(&mut self, kind: ArtifactKind) -> &mut HashMap<String, u64> {
        match kind {
            ArtifactKind::Embedding => &mut self.embedding_mtimes,
            ArtifactKind::Keywords => &mut self.keyword_mtimes,
            ArtifactKind::Suggestions => &mut self.suggestion_mtimes,
        }
    }

    pub fn is_fresh(&self, path: &str, kind: ArtifactKind, mtime: u64) -> bool {
        self.map_for(kind)
            .get(path)
            .map_or(false, |&recorded| recorded == mtime)
    }

    pub fn mark_processed(&mut self, path: &str, kind: ArtifactKind, mtime: u64) {
        self.map_for_mut(kind).insert(path.to_string(), mtime);
        self.dirty = true;
    }

    /// Remove all three kinds' entries for a path, plus its insertion
    /// hints. The ignored-pair set is deliberately left intact: ignoring
    /// is a user decision, not a derived artifact.
    pub fn invalidate(&mut self, path: &str) {
        self.embedding_mtimes.remove(path);
        self.keyword_mtimes.remove(path);
        self.suggestion_mtimes.remove(path);
        self.invalidate_hints_for(path);
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.embedding_mtimes.clear();
        self.keyword_mtimes.clear();
        self.suggestion_mtimes.clear();
        self.ignored_pairs.clear();
        self.insertion_hints.clear();
        self.dirty = true;
    }

    // --- Ignored pairs ---

    fn pair_key(source: &str, target: &str) -> String {
        format!("{}|{}", source, target)
    }

    pub fn is_ignored(&self, source: &str, target: &str) -> bool {
        self.ignored_pairs.contains_key(&Self::pair_key(source, target))
    }

    pub fn ignore(&mut self, source: &str, target: &str, now_ms: u64) {
        self.ignored_pairs.insert(Self::pair_key(source, target), now_ms);
        self.dirty = true;
    }

    pub fn unignore(&mut self, source: &str, target: &str) {
        self.ignored_pairs.remove(&Self::pair_key(source, target));
        self.dirty = true;
    }

    /// All ignored pairs, most recently ignored first.
    pub fn list_ignored(&self) -> Vec<IgnoredLink> {
        let mut result: Vec<IgnoredLink> = self
            .ignored_pairs
            .iter()
            .filter_map(|(key, &ignored_at)| {
                let (source, target) = key.split_once('|')?;
                Some(IgnoredLink {
                    source_path: source.to_string(),
                    target_path: target.to_string(),
                    ignored_at,
                })
            })
            .collect();
        result.sort_by(|a, b| {
            b.ignored_at
                .cmp(&a.ignored_at)
                .then_with(|| a.source_path.cmp(&b.source_path))
                .then_with(|| a.target_path.cmp(&b.target_path))
        });
        result
    }

    pub fn clear_ignored(&mut self) {
        self.ignored_pairs.clear();
        self.dirty = true;
    }

    // --- Insertion hints ---

    fn hint_key(path: &str, link_title: &str) -> String {
        format!("{}::{}", path, link_title)
    }

    pub fn cached_hint(&self, path: &str, link_title: &str) -> Option<&InsertionHint> {
        self.insertion_hints.get(&Self::hint_key(path, link_title))
    }

    pub fn store_hint(&mut self, path: &str, link_title: &str, hint: InsertionHint) {
        self.insertion_hints.insert(Self::hint_key(path, link_title), hint);
        self.dirty = true;
    }

    /// Drop every hint keyed to `path`. Returns the number removed.
    pub fn invalidate_hints_for(&mut self, path: &str) -> usize {
        let prefix = format!("{}::", path);
        let stale: Vec<String> = self
            .insertion_hints
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        let count = stale.len();
        for key in stale {
            self.insertion_hints.remove(&key);
        }
        if count > 0 {
            self.dirty = true;
        }
        count
    }

    pub fn clear_hints(&mut self) {
        self.insertion_hints.clear();
        self.dirty = true;
    }

    // --- Dirty tracking ---

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after a successful persist.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
