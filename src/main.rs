//! # Vaultlink CLI (`vaultlink`)
//!
//! Command-line interface for the vault link engine: scanning the vault,
//! querying suggestions for a document, inspecting freshness, and
//! managing ignored suggestion pairs.
//!
//! ## Usage
//!
//! ```bash
//! vaultlink --config ./vaultlink.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vaultlink scan` | Embed and index every stale document |
//! | `vaultlink suggest <path>` | Print link suggestions for one document |
//! | `vaultlink status` | Show corpus and cache freshness |
//! | `vaultlink ignored list` | List dismissed suggestion pairs |
//! | `vaultlink ignored add <src> <tgt>` | Dismiss a suggestion pair |
//! | `vaultlink ignored remove <src> <tgt>` | Restore a dismissed pair |
//! | `vaultlink clear` | Drop all derived caches |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vaultlink::engine::Engine;
use vaultlink::{config, RerankOutcome};

#[derive(Parser)]
#[command(
    name = "vaultlink",
    about = "Vaultlink: link suggestions and derived indexes for plain-text vaults",
    version,
    long_about = "Vaultlink maintains embeddings, keywords, and cross-document link \
    suggestions for a vault of Markdown/text documents, kept fresh against file \
    modification times, with optional LLM reranking via a local Ollama server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./vaultlink.toml`. Vault location, cache directory,
    /// provider, and scan settings are read from this file.
    #[arg(long, global = true, default_value = "./vaultlink.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Scan the vault and refresh stale derived artifacts.
    ///
    /// Plans against recorded modification times, so unchanged documents
    /// are skipped. Caches are checkpointed during the run and an
    /// interrupted scan resumes where it left off.
    Scan {
        /// Discard all derived caches first and rebuild from scratch.
        #[arg(long)]
        full: bool,

        /// Process this document first.
        #[arg(long)]
        priority: Option<String>,
    },

    /// Compute and print link suggestions for one document.
    Suggest {
        /// Vault-relative document path.
        path: String,

        /// Never call the LLM; use a cached rerank or similarity order.
        #[arg(long)]
        skip_llm: bool,

        /// Bypass the rerank cache and ask the LLM again.
        #[arg(long, conflicts_with = "skip_llm")]
        refresh: bool,

        /// Print the raw suggestion list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show corpus size, embedding coverage, and staleness.
    Status,

    /// Manage dismissed suggestion pairs.
    Ignored {
        #[command(subcommand)]
        action: IgnoredAction,
    },

    /// Drop every derived cache (embeddings, freshness, suggestions).
    ///
    /// The vault itself is never touched. The next scan rebuilds
    /// everything from scratch.
    Clear,
}

#[derive(Subcommand)]
enum IgnoredAction {
    /// List dismissed pairs, most recently dismissed first.
    List,
    /// Dismiss a suggestion pair.
    Add { source: String, target: String },
    /// Restore a dismissed pair.
    Remove { source: String, target: String },
    /// Restore all dismissed pairs.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let engine = Engine::new(cfg)?;
    engine.load()?;

    match cli.command {
        Commands::Scan { full, priority } => {
            if full {
                engine.clear_all().await;
            }
            let summary = engine.scan_corpus(true, priority.as_deref()).await?;
            print!("{}", summary.report());
        }

        Commands::Suggest {
            path,
            skip_llm,
            refresh,
            json,
        } => {
            let outcome = engine.get_suggestions_opts(&path, skip_llm, refresh).await?;
            engine.save().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome.suggestions)?);
            } else {
                print_suggestions(&path, &outcome);
            }
        }

        Commands::Status => {
            let status = engine.status()?;
            print!("{}", status.report());
        }

        Commands::Ignored { action } => match action {
            IgnoredAction::List => {
                let ignored = engine.list_ignored();
                if ignored.is_empty() {
                    println!("No ignored suggestion pairs.");
                } else {
                    println!("Ignored suggestion pairs:");
                    for link in ignored {
                        let when = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(
                            link.ignored_at as i64,
                        )
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                        println!(
                            "  {} -> {}  (ignored {})",
                            link.source_path, link.target_path, when
                        );
                    }
                }
            }
            IgnoredAction::Add { source, target } => {
                engine.ignore(&source, &target);
                engine.save().await;
                println!("Ignored: {} -> {}", source, target);
            }
            IgnoredAction::Remove { source, target } => {
                engine.unignore(&source, &target);
                engine.save().await;
                println!("Restored: {} -> {}", source, target);
            }
            IgnoredAction::Clear => {
                engine.clear_ignored();
                engine.save().await;
                println!("All ignored pairs restored.");
            }
        },

        Commands::Clear => {
            engine.clear_all().await;
            println!("All derived caches cleared.");
        }
    }

    Ok(())
}

fn print_suggestions(path: &str, outcome: &RerankOutcome) {
    if outcome.suggestions.is_empty() {
        println!("No suggestions for {}.", path);
        return;
    }

    println!("Suggestions for {}:", path);
    for suggestion in &outcome.suggestions {
        match (suggestion.llm_score, &suggestion.llm_reason) {
            (Some(score), Some(reason)) => {
                println!(
                    "  [[{}]]  llm {:.1}  sim {:.2}  {}",
                    suggestion.title, score, suggestion.similarity, reason
                );
            }
            _ => {
                println!(
                    "  [[{}]]  sim {:.2}",
                    suggestion.title, suggestion.similarity
                );
            }
        }
    }
    if outcome.llm_failed {
        let reason = outcome.failure_reason.as_deref().unwrap_or("unknown");
        println!("  (reranking unavailable: {}; showing similarity order)", reason);
    }
}
