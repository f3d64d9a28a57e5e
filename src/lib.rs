//! # Vaultlink
//!
//! A derived-index engine for plain-text document vaults.
//!
//! Vaultlink maintains, per document, an embedding vector, a keyword
//! list, and a set of cross-document link suggestions, and keeps all
//! three in step with document modification times. Suggestions combine
//! cosine similarity with lexical signals (title mentions, keyword
//! overlap) and are optionally reranked by a local LLM through a
//! coordinator that caches, coalesces, and degrades gracefully.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │  Vault   │──▶│  Planner  │──▶│ BatchScanner │
//! │ (files)  │   │ freshness │   │  embed+kw    │
//! └─────────┘   └───────────┘   └──────┬───────┘
//!                                      │
//!                 ┌────────────────────┤
//!                 ▼                    ▼
//!          ┌────────────┐      ┌─────────────┐
//!          │ VectorStore │──▶──│ Suggestion  │
//!          │  + query    │      │  Pipeline   │
//!          └────────────┘      └──────┬──────┘
//!                                     ▼
//!                              ┌─────────────┐
//!                              │   Rerank    │
//!                              │ Coordinator │
//!                              └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vaultlink scan                       # embed + index the vault
//! vaultlink suggest notes/entropy.md   # links for one document
//! vaultlink status                     # freshness overview
//! vaultlink ignored list               # review dismissed suggestions
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Provider and persistence error kinds |
//! | [`vault`] | Filesystem corpus access |
//! | [`freshness`] | Per-artifact staleness tracking |
//! | [`vector`] | Embedding store and similarity queries |
//! | [`planner`] | Pure scan planning |
//! | [`provider`] | Embedding and text-generation providers |
//! | [`retry`] | Retry with per-attempt timeouts |
//! | [`llm`] | Prompt construction and response parsing |
//! | [`rerank`] | Rerank caching, coalescing, degradation |
//! | [`suggest`] | Suggestion pipeline |
//! | [`scanner`] | Bounded-concurrency batch processing |
//! | [`events`] | Editor event debounce and dedup |
//! | [`persist`] | Versioned cache files |
//! | [`engine`] | Top-level facade |

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod freshness;
pub mod llm;
pub mod models;
pub mod persist;
pub mod planner;
pub mod provider;
pub mod rerank;
pub mod retry;
pub mod scanner;
pub mod suggest;
pub mod vault;
pub mod vector;

pub use config::{load_config, Config};
pub use engine::Engine;
pub use models::{RerankOutcome, ScanSummary, Suggestion};
