//! # kb-override CLI (`kbo`)
//!
//! ## Usage
//!
//! ```bash
//! kbo --config ./config/kbo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbo init` | Create the SQLite database and run schema migrations |
//! | `kbo serve` | Start the HTTP API |
//! | `kbo scope <chatbot>` | Print the effective retrieval scope |
//! | `kbo query <chatbot> "<question>"` | Run the override-vs-retrieve decision |
//! | `kbo chatbot create\|delete` | Manage chatbots |
//! | `kbo kb create\|list\|delete\|link\|attach\|detach` | Manage shared knowledge bases |
//! | `kbo revision create\|update\|deactivate\|list\|stale` | Manage answer revisions |
//! | `kbo chunks import\|delete` | Load or remove ingested chunks |
//!
//! Logs go to stderr; `RUST_LOG` controls verbosity (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use kb_override::{commands, config, migrate};
use retrieval_core::revision::{NewRevision, RevisionUpdate};
use retrieval_core::{ChatbotId, KnowledgeBaseId};

#[derive(Parser)]
#[command(
    name = "kbo",
    about = "Knowledge retrieval with human answer overrides",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print a chatbot's effective scope: its own partition, then linked
    /// knowledge bases in link order.
    Scope { chatbot: ChatbotId },

    /// Answer a query: serve a matching override or retrieve context.
    ///
    /// Prints the outcome as JSON with `state` set to `OVERRIDE_SERVED`
    /// or `CONTEXT_RETRIEVED`.
    Query {
        chatbot: ChatbotId,

        /// Question text, embedded with the configured provider.
        question: Option<String>,

        /// Precomputed query vector as comma-separated floats. Skips embedding.
        #[arg(long, allow_hyphen_values = true)]
        embedding: Option<String>,

        /// Number of chunks to return (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Manage chatbots.
    Chatbot {
        #[command(subcommand)]
        action: ChatbotAction,
    },

    /// Manage shared knowledge bases and their links.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Manage human-corrected answer revisions.
    Revision {
        #[command(subcommand)]
        action: RevisionAction,
    },

    /// Load or remove ingested chunks.
    Chunks {
        #[command(subcommand)]
        action: ChunksAction,
    },
}

#[derive(Subcommand)]
enum ChatbotAction {
    /// Register a chatbot and print its id.
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: Option<Uuid>,
    },
    /// Delete a chatbot with its private chunks, links, and revisions.
    Delete { id: ChatbotId },
}

#[derive(Subcommand)]
enum KbAction {
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List by owner (newest first) or by linked chatbot (by name).
    List {
        #[arg(long, conflicts_with = "chatbot")]
        owner: Option<String>,
        #[arg(long)]
        chatbot: Option<ChatbotId>,
    },
    Delete { id: KnowledgeBaseId },
    /// Replace a chatbot's full link set. Order is kept.
    Link {
        chatbot: ChatbotId,
        kbs: Vec<KnowledgeBaseId>,
    },
    /// Append one link.
    Attach {
        chatbot: ChatbotId,
        kb: KnowledgeBaseId,
    },
    /// Remove one link.
    Detach {
        chatbot: ChatbotId,
        kb: KnowledgeBaseId,
    },
}

#[derive(Subcommand)]
enum RevisionAction {
    /// Record a corrected answer. Requires an embedding provider.
    Create {
        #[arg(long)]
        chatbot: ChatbotId,
        #[arg(long)]
        question: String,
        #[arg(long)]
        original_answer: String,
        #[arg(long)]
        revised_answer: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        by: String,
        #[arg(long)]
        message_id: Option<String>,
    },
    /// Change fields of a revision. A new question is re-embedded.
    Update {
        id: Uuid,
        #[arg(long)]
        question: Option<String>,
        #[arg(long)]
        revised_answer: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    Deactivate { id: Uuid },
    List {
        chatbot: ChatbotId,
        /// Include deactivated revisions.
        #[arg(long)]
        all: bool,
    },
    /// Revisions whose stored question hash no longer matches their text.
    Stale { chatbot: ChatbotId },
}

#[derive(Subcommand)]
enum ChunksAction {
    /// Import finished chunks from a JSON Lines file.
    Import { path: PathBuf },
    /// Delete every chunk extracted from one source file.
    Delete {
        #[arg(long)]
        file: Uuid,
    },
}

/// Parse `0.1,0.2,0.3` into a vector.
fn parse_vector(s: &str) -> anyhow::Result<Vec<f32>> {
    s.split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid vector component '{}'", v))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            commands::run_serve(&cfg).await?;
        }
        Commands::Scope { chatbot } => {
            commands::run_scope(&cfg, chatbot).await?;
        }
        Commands::Query {
            chatbot,
            question,
            embedding,
            k,
        } => {
            let embedding = embedding.as_deref().map(parse_vector).transpose()?;
            commands::run_query(&cfg, chatbot, question, embedding, k).await?;
        }
        Commands::Chatbot { action } => match action {
            ChatbotAction::Create { user, org } => {
                commands::run_chatbot_create(&cfg, &user, org).await?;
            }
            ChatbotAction::Delete { id } => {
                commands::run_chatbot_delete(&cfg, id).await?;
            }
        },
        Commands::Kb { action } => match action {
            KbAction::Create {
                owner,
                name,
                description,
            } => {
                commands::run_kb_create(&cfg, &owner, &name, description).await?;
            }
            KbAction::List { owner, chatbot } => {
                commands::run_kb_list(&cfg, owner, chatbot).await?;
            }
            KbAction::Delete { id } => {
                commands::run_kb_delete(&cfg, id).await?;
            }
            KbAction::Link { chatbot, kbs } => {
                commands::run_kb_link(&cfg, chatbot, &kbs).await?;
            }
            KbAction::Attach { chatbot, kb } => {
                commands::run_kb_attach(&cfg, chatbot, kb).await?;
            }
            KbAction::Detach { chatbot, kb } => {
                commands::run_kb_detach(&cfg, chatbot, kb).await?;
            }
        },
        Commands::Revision { action } => match action {
            RevisionAction::Create {
                chatbot,
                question,
                original_answer,
                revised_answer,
                reason,
                by,
                message_id,
            } => {
                let req = NewRevision {
                    chatbot_id: chatbot,
                    original_message_id: message_id,
                    question,
                    original_answer,
                    revised_answer,
                    revision_reason: reason,
                    revised_by: by,
                };
                commands::run_revision_create(&cfg, req).await?;
            }
            RevisionAction::Update {
                id,
                question,
                revised_answer,
                reason,
                active,
            } => {
                let update = RevisionUpdate {
                    question,
                    revised_answer,
                    revision_reason: reason,
                    is_active: active,
                };
                commands::run_revision_update(&cfg, id, update).await?;
            }
            RevisionAction::Deactivate { id } => {
                commands::run_revision_deactivate(&cfg, id).await?;
            }
            RevisionAction::List { chatbot, all } => {
                commands::run_revision_list(&cfg, chatbot, all).await?;
            }
            RevisionAction::Stale { chatbot } => {
                commands::run_revision_stale(&cfg, chatbot).await?;
            }
        },
        Commands::Chunks { action } => match action {
            ChunksAction::Import { path } => {
                commands::run_chunks_import(&cfg, &path)
                    .await
                    .context("chunk import failed")?;
            }
            ChunksAction::Delete { file } => {
                commands::run_chunks_delete(&cfg, file).await?;
            }
        },
    }

    Ok(())
}
