//! CLI command implementations.
//!
//! Each `run_*` function opens the configured SQLite store, performs one
//! operation, and prints the result to stdout: JSON for records, a plain
//! line for confirmations. Diagnostics go to stderr through `tracing`.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use retrieval_core::revision::{stale_revisions, NewRevision, RevisionUpdate};
use retrieval_core::store::{ChunkStore, ScopeStore};
use retrieval_core::{Chatbot, ChatbotId, KnowledgeBaseId, Scope, SharedKnowledgeBase};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::engine::RetrievalEngine;
use crate::import;
use crate::sqlite_store::SqliteStore;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A token that fires on Ctrl-C, so long queries stop at the next await.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

/// Build the engine the server and `query` share.
pub async fn build_engine(config: &Config, top_k: Option<usize>) -> Result<RetrievalEngine> {
    let store = SqliteStore::connect(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let mut params = config.retrieval_params()?;
    if let Some(k) = top_k {
        if k == 0 {
            bail!("top_k must be >= 1");
        }
        params.top_k = k;
    }
    Ok(RetrievalEngine::new(Arc::new(store), embedder, params))
}

// ============ serve ============

pub async fn run_serve(config: &Config) -> Result<()> {
    let engine = build_engine(config, None).await?;
    info!(
        provider = %config.embedding.provider,
        dims = engine.params().dims,
        top_k = engine.params().top_k,
        "retrieval engine ready"
    );
    crate::server::run_server(config, Arc::new(engine)).await
}

// ============ chatbots ============

pub async fn run_chatbot_create(config: &Config, user: &str, org: Option<Uuid>) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let mut chatbot = Chatbot::new(user);
    chatbot.organization_id = org;
    store.create_chatbot(&chatbot).await?;
    store.close().await;
    println!("{}", chatbot.id);
    Ok(())
}

pub async fn run_chatbot_delete(config: &Config, id: ChatbotId) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    store.delete_chatbot(id).await?;
    store.close().await;
    println!("Deleted chatbot {}", id);
    Ok(())
}

// ============ knowledge bases ============

pub async fn run_kb_create(
    config: &Config,
    owner: &str,
    name: &str,
    description: Option<String>,
) -> Result<()> {
    if name.trim().is_empty() {
        bail!("knowledge base name must not be empty");
    }
    let store = SqliteStore::connect(config).await?;
    let mut kb = SharedKnowledgeBase::new(owner, name);
    kb.description = description;
    store.create_knowledge_base(&kb).await?;
    store.close().await;
    print_json(&kb)
}

pub async fn run_kb_list(
    config: &Config,
    owner: Option<String>,
    chatbot: Option<ChatbotId>,
) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let kbs = match (owner, chatbot) {
        (Some(owner), None) => store.list_knowledge_bases_by_owner(&owner).await?,
        (None, Some(chatbot)) => store.list_knowledge_bases_for_chatbot(chatbot).await?,
        _ => bail!("pass exactly one of --owner or --chatbot"),
    };
    store.close().await;
    print_json(&kbs)
}

pub async fn run_kb_delete(config: &Config, id: KnowledgeBaseId) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    store.delete_knowledge_base(id).await?;
    store.close().await;
    println!("Deleted knowledge base {}", id);
    Ok(())
}

pub async fn run_kb_link(config: &Config, chatbot: ChatbotId, kbs: &[KnowledgeBaseId]) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    store.replace_links(chatbot, kbs).await?;
    store.close().await;
    println!("Linked {} knowledge base(s) to chatbot {}", kbs.len(), chatbot);
    Ok(())
}

pub async fn run_kb_attach(config: &Config, chatbot: ChatbotId, kb: KnowledgeBaseId) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    store.attach_link(chatbot, kb).await?;
    store.close().await;
    println!("Attached {} to {}", kb, chatbot);
    Ok(())
}

pub async fn run_kb_detach(config: &Config, chatbot: ChatbotId, kb: KnowledgeBaseId) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    store.detach_link(chatbot, kb).await?;
    store.close().await;
    println!("Detached {} from {}", kb, chatbot);
    Ok(())
}

// ============ retrieval ============

/// Print the effective scope, one `chatbot:<id>` / `kb:<id>` per line.
pub async fn run_scope(config: &Config, chatbot: ChatbotId) -> Result<()> {
    let engine = build_engine(config, None).await?;
    let scopes: Vec<Scope> = engine.scope(&cancel_on_ctrl_c(), chatbot).await?;
    for scope in scopes {
        println!("{}", scope);
    }
    Ok(())
}

pub async fn run_query(
    config: &Config,
    chatbot: ChatbotId,
    question: Option<String>,
    embedding: Option<Vec<f32>>,
    top_k: Option<usize>,
) -> Result<()> {
    let engine = build_engine(config, top_k).await?;
    let cancel = cancel_on_ctrl_c();
    let outcome = match (question, embedding) {
        (_, Some(vector)) => engine.orchestrate(&cancel, chatbot, &vector).await?,
        (Some(question), None) => {
            if !engine.embeddings_enabled() {
                bail!("embedding provider is disabled; pass --embedding with a precomputed vector");
            }
            engine.answer(&cancel, chatbot, &question).await?
        }
        (None, None) => bail!("pass a question or --embedding"),
    };
    print_json(&outcome)
}

// ============ revisions ============

pub async fn run_revision_create(config: &Config, req: NewRevision) -> Result<()> {
    let engine = build_engine(config, None).await?;
    let revision = engine.create_revision(&cancel_on_ctrl_c(), req).await?;
    print_json(&revision)
}

pub async fn run_revision_update(config: &Config, id: Uuid, update: RevisionUpdate) -> Result<()> {
    let engine = build_engine(config, None).await?;
    let revision = engine
        .update_revision(&cancel_on_ctrl_c(), id, update)
        .await?;
    print_json(&revision)
}

pub async fn run_revision_deactivate(config: &Config, id: Uuid) -> Result<()> {
    let engine = build_engine(config, None).await?;
    let revision = engine.deactivate_revision(&cancel_on_ctrl_c(), id).await?;
    println!("Deactivated revision {}", revision.id);
    Ok(())
}

pub async fn run_revision_list(config: &Config, chatbot: ChatbotId, all: bool) -> Result<()> {
    let engine = build_engine(config, None).await?;
    let revisions = engine
        .list_revisions(&cancel_on_ctrl_c(), chatbot, all)
        .await?;
    print_json(&revisions)
}

pub async fn run_revision_stale(config: &Config, chatbot: ChatbotId) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let stale = stale_revisions(&store, chatbot).await?;
    store.close().await;
    if stale.is_empty() {
        println!("No stale revisions.");
        return Ok(());
    }
    for r in &stale {
        println!("{}  {}", r.id, r.question);
    }
    Ok(())
}

// ============ chunks ============

pub async fn run_chunks_import(config: &Config, path: &Path) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let stats = import::import_file(&store, path)
        .await
        .with_context(|| format!("import of {} stopped", path.display()))?;
    store.close().await;
    info!(imported = stats.imported, skipped = stats.skipped_blank, "chunk import finished");
    println!("Imported {} chunk(s)", stats.imported);
    Ok(())
}

pub async fn run_chunks_delete(config: &Config, file_id: Uuid) -> Result<()> {
    let store = SqliteStore::connect(config).await?;
    let removed = store.delete_chunks_by_file(file_id).await?;
    store.close().await;
    println!("Deleted {} chunk(s)", removed);
    Ok(())
}
