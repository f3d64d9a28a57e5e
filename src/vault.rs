//! Filesystem corpus access.
//!
//! Lists the vault's documents as `(path, mtime)` pairs and reads content
//! on demand. Paths are vault-relative with forward slashes so cache keys
//! stay stable across platforms.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::VaultConfig;
use crate::models::DocumentMeta;

pub struct Vault {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl Vault {
    pub fn open(config: &VaultConfig) -> Result<Self> {
        if !config.root.exists() {
            bail!("Vault root does not exist: {}", config.root.display());
        }

        let include = build_globset(&config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/.obsidian/**".to_string(),
            "**/.vaultlink/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&default_excludes)?;

        Ok(Self {
            root: config.root.clone(),
            include,
            exclude,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate all matching documents with their mtimes (milliseconds),
    /// in deterministic path order.
    pub fn list_documents(&self) -> Result<Vec<DocumentMeta>> {
        let mut items = Vec::new();

        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) {
                continue;
            }
            if !self.include.is_match(&rel_str) {
                continue;
            }

            let metadata = std::fs::metadata(path)?;
            let modified = metadata
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            let mtime = modified
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;

            items.push(DocumentMeta {
                path: rel_str,
                mtime,
            });
        }

        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(items)
    }

    pub fn read_document(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        Ok(std::fs::read_to_string(&full)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", full.display(), e))?)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Derive a document title from its path: the file stem of the last
/// component ("notes/strong turbulence.md" -> "strong turbulence").
pub fn title_from_path(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

/// First few lines of a document, squashed to one line and truncated,
/// used as the suggestion context excerpt.
pub fn extract_context(content: &str, max_chars: usize) -> String {
    let joined = content.lines().take(5).collect::<Vec<_>>().join(" ");
    if joined.chars().count() > max_chars {
        let truncated: String = joined.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_title_from_path() {
        assert_eq!(title_from_path("notes/strong turbulence.md"), "strong turbulence");
        assert_eq!(title_from_path("flat.md"), "flat");
        assert_eq!(title_from_path("a/b/c.txt"), "c");
        assert_eq!(title_from_path("noext"), "noext");
    }

    #[test]
    fn test_extract_context_truncates() {
        let content = "line one\nline two\nline three\nline four\nline five\nline six";
        let ctx = extract_context(content, 20);
        assert!(ctx.ends_with("..."));
        assert!(!ctx.contains("six"));

        let short = extract_context("tiny", 100);
        assert_eq!(short, "tiny");
    }

    #[test]
    fn test_list_documents_applies_globs_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("skip.bin"), "x").unwrap();
        std::fs::write(dir.path().join("sub/c.md"), "c").unwrap();

        let vault = Vault::open(&VaultConfig {
            root: dir.path().to_path_buf(),
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec![],
            follow_symlinks: false,
        })
        .unwrap();

        let docs = vault.list_documents().unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.md", "sub/c.md"]);
        assert!(docs.iter().all(|d| d.mtime > 0));
    }

    #[test]
    fn test_open_rejects_missing_root() {
        let result = Vault::open(&VaultConfig {
            root: PathBuf::from("/definitely/not/here"),
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec![],
            follow_symlinks: false,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_read_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "hello").unwrap();
        let vault = Vault::open(&VaultConfig {
            root: dir.path().to_path_buf(),
            include_globs: vec!["**/*.md".into()],
            exclude_globs: vec![],
            follow_symlinks: false,
        })
        .unwrap();
        assert_eq!(vault.read_document("a.md").unwrap(), "hello");
        assert!(vault.read_document("missing.md").is_err());
    }
}
