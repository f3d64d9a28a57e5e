//! Cache persistence.
//!
//! Three files under the cache directory:
//!
//! - `index.bin`: the freshness index (MessagePack),
//! - `embeddings.bin`: the vector store snapshot (MessagePack),
//! - `suggestions.json`: last computed suggestions per document (JSON,
//!   kept human-inspectable on purpose).
//!
//! Each file carries a version header. Earlier releases wrote the binary
//! caches as JSON; those are read transparently and rewritten as
//! MessagePack on the next save. A cache that fails to decode is treated
//! as absent; derived data is always recomputable from the vault.
//!
//! Writes go through a temp file plus rename so a crash mid-write never
//! leaves a truncated cache behind.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::freshness::FreshnessIndex;
use crate::models::Suggestion;
use crate::vector::VectorSnapshot;

const CACHE_VERSION: u32 = 1;

const INDEX_FILE: &str = "index.bin";
const EMBEDDINGS_FILE: &str = "embeddings.bin";
const SUGGESTIONS_FILE: &str = "suggestions.json";

const SAVE_ATTEMPTS: u32 = 3;
const SAVE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheHeader {
    version: u32,
    format: String,
    created_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionedCache<T> {
    header: CacheHeader,
    data: T,
}

impl<T> VersionedCache<T> {
    fn new(data: T, format: &str) -> Self {
        Self {
            header: CacheHeader {
                version: CACHE_VERSION,
                format: format.to_string(),
                created_at: now_ms(),
            },
            data,
        }
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // --- Freshness index ---

    pub fn load_index(&self) -> Result<Option<FreshnessIndex>> {
        self.load_binary(INDEX_FILE)
    }

    pub fn save_index(&self, index: &FreshnessIndex) -> Result<()> {
        self.save_binary(INDEX_FILE, index)
    }

    // --- Embeddings ---

    pub fn load_embeddings(&self) -> Result<Option<VectorSnapshot>> {
        self.load_binary(EMBEDDINGS_FILE)
    }

    pub fn save_embeddings(&self, snapshot: &VectorSnapshot) -> Result<()> {
        self.save_binary(EMBEDDINGS_FILE, snapshot)
    }

    // --- Suggestions ---

    pub fn load_suggestions(&self) -> Result<Option<HashMap<String, Vec<Suggestion>>>> {
        let path = self.dir.join(SUGGESTIONS_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        match serde_json::from_slice::<VersionedCache<HashMap<String, Vec<Suggestion>>>>(&bytes) {
            Ok(cache) if cache.header.version == CACHE_VERSION => Ok(Some(cache.data)),
            Ok(cache) => {
                tracing::warn!(
                    version = cache.header.version,
                    "suggestion cache version mismatch, discarding"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "suggestion cache unreadable, discarding");
                Ok(None)
            }
        }
    }

    pub fn save_suggestions(&self, suggestions: &HashMap<String, Vec<Suggestion>>) -> Result<()> {
        let cache = VersionedCache::new(suggestions, "json");
        let bytes = serde_json::to_vec_pretty(&cache).map_err(|e| Error::Parse(e.to_string()))?;
        self.write_atomic(SUGGESTIONS_FILE, &bytes)
    }

    // --- Shared plumbing ---

    fn load_binary<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        if let Ok(cache) = rmp_serde::from_slice::<VersionedCache<T>>(&bytes) {
            if cache.header.version == CACHE_VERSION {
                return Ok(Some(cache.data));
            }
            tracing::warn!(
                file = name,
                version = cache.header.version,
                "cache version mismatch, discarding"
            );
            return Ok(None);
        }

        // Pre-versioning installs wrote the bare value.
        if let Ok(data) = rmp_serde::from_slice::<T>(&bytes) {
            tracing::info!(file = name, "migrating unversioned cache");
            return Ok(Some(data));
        }

        // Pre-MessagePack installs wrote these as JSON, with or without
        // the version header.
        match serde_json::from_slice::<VersionedCache<T>>(&bytes) {
            Ok(cache) if cache.header.version == CACHE_VERSION => {
                tracing::info!(file = name, "migrating legacy JSON cache");
                return Ok(Some(cache.data));
            }
            _ => {}
        }
        match serde_json::from_slice::<T>(&bytes) {
            Ok(data) => {
                tracing::info!(file = name, "migrating bare JSON cache");
                Ok(Some(data))
            }
            Err(_) => {
                tracing::warn!(file = name, "cache unreadable, discarding");
                Ok(None)
            }
        }
    }

    fn save_binary<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cache = VersionedCache::new(data, "msgpack");
        let bytes = rmp_serde::to_vec(&cache).map_err(|e| Error::Parse(e.to_string()))?;
        self.write_atomic(name, &bytes)
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Run a save closure with exponential backoff. Cache writes are best
/// effort: after the final attempt the failure is logged and swallowed,
/// since everything in the cache can be recomputed.
pub async fn save_with_retry<F>(what: &str, mut save: F)
where
    F: FnMut() -> Result<()>,
{
    let mut backoff = SAVE_BACKOFF;
    for attempt in 1..=SAVE_ATTEMPTS {
        match save() {
            Ok(()) => return,
            Err(e) if attempt == SAVE_ATTEMPTS => {
                tracing::warn!(what, error = %e, "cache save failed, giving up");
            }
            Err(e) => {
                tracing::debug!(what, attempt, error = %e, "cache save failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}
