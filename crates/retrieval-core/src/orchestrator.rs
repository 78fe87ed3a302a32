//! Retrieval orchestrator: the override-vs-retrieve decision for one query.
//!
//! Each query ends in exactly one of two terminal states:
//!
//! - `OVERRIDE_SERVED`: an active revision of this chatbot cleared the
//!   threshold. Its revised answer is returned; no scope resolution or
//!   search is performed.
//! - `CONTEXT_RETRIEVED`: no override; the effective scope was resolved
//!   and searched, and the (possibly empty) chunk list is returned for the
//!   generation service.
//!
//! Errors from scope resolution or search propagate; the caller decides
//! whether to fall back to generation without context.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::embedding::check_dims;
use crate::error::Result;
use crate::models::{ChatbotId, Scope};
use crate::overrides::find_override;
use crate::scope::resolve_scope;
use crate::search::{search, RetrievedChunk};
use crate::store::Store;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Chunks to return on `CONTEXT_RETRIEVED`.
    pub top_k: usize,
    /// Minimum similarity for an override to be served.
    pub override_threshold: f64,
    /// Per-chatbot thresholds that take precedence over `override_threshold`.
    pub chatbot_thresholds: HashMap<ChatbotId, f64>,
    /// Dimensionality every query embedding must have.
    pub dims: usize,
}

impl RetrievalParams {
    pub fn new(top_k: usize, override_threshold: f64, dims: usize) -> Self {
        Self {
            top_k,
            override_threshold,
            chatbot_thresholds: HashMap::new(),
            dims,
        }
    }

    pub fn threshold_for(&self, chatbot_id: ChatbotId) -> f64 {
        self.chatbot_thresholds
            .get(&chatbot_id)
            .copied()
            .unwrap_or(self.override_threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideResult {
    pub revised_answer: String,
    pub matched_revision_id: Uuid,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextResult {
    pub chunks: Vec<RetrievedChunk>,
    pub scope_ids_used: Vec<Scope>,
}

/// Terminal state of one orchestrated query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetrievalOutcome {
    OverrideServed(OverrideResult),
    ContextRetrieved(ContextResult),
}

impl RetrievalOutcome {
    /// `"OVERRIDE_SERVED"` or `"CONTEXT_RETRIEVED"`.
    pub fn state(&self) -> &'static str {
        match self {
            RetrievalOutcome::OverrideServed(_) => "OVERRIDE_SERVED",
            RetrievalOutcome::ContextRetrieved(_) => "CONTEXT_RETRIEVED",
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, RetrievalOutcome::OverrideServed(_))
    }
}

/// Decide between a stored override and fresh context for one query.
#[instrument(skip(store, params, query), fields(top_k = params.top_k))]
pub async fn orchestrate<S>(
    store: &S,
    params: &RetrievalParams,
    chatbot_id: ChatbotId,
    query: &[f32],
) -> Result<RetrievalOutcome>
where
    S: Store + ?Sized,
{
    check_dims(params.dims, query)?;

    let threshold = params.threshold_for(chatbot_id);
    if let Some(m) = find_override(store, chatbot_id, query, threshold).await? {
        debug!(revision_id = %m.revision.id, "override served");
        return Ok(RetrievalOutcome::OverrideServed(OverrideResult {
            revised_answer: m.revision.revised_answer,
            matched_revision_id: m.revision.id,
            similarity: m.similarity,
        }));
    }

    let scopes = resolve_scope(store, chatbot_id).await?;
    let chunks = search(store, query, &scopes, params.top_k).await?;
    debug!(
        scopes = scopes.len(),
        chunks = chunks.len(),
        "context retrieved"
    );
    Ok(RetrievalOutcome::ContextRetrieved(ContextResult {
        chunks,
        scope_ids_used: scopes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use crate::models::{Chatbot, Chunk, SharedKnowledgeBase};
    use crate::revision::{create_revision, deactivate_revision, tests::TableEmbedder, NewRevision};
    use crate::store::memory::InMemoryStore;
    use crate::store::{ChunkStore, ScopeStore, ScoredId, VectorIndex};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Unit vectors with cosine similarity 0.92 and 0.10 against REFUND.
    const REFUND: [f32; 2] = [1.0, 0.0];
    const REFUND_PARAPHRASE: [f32; 2] = [0.92, 0.391_918_36];
    const PASSWORD_RESET: [f32; 2] = [0.10, 0.994_987_44];

    struct Fixture {
        store: InMemoryStore,
        bot: ChatbotId,
        kb: SharedKnowledgeBase,
        embedder: TableEmbedder,
        params: RetrievalParams,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new(2);
        let bot = Chatbot::new("owner");
        store.create_chatbot(&bot).await.unwrap();
        let kb = SharedKnowledgeBase::new("owner", "Help center");
        store.create_knowledge_base(&kb).await.unwrap();
        store.replace_links(bot.id, &[kb.id]).await.unwrap();

        for (id, scope, v) in [
            ("p1", Scope::Private(bot.id), vec![0.2, 1.0]),
            ("s1", Scope::Shared(kb.id), vec![0.1, 1.0]),
        ] {
            store
                .insert_chunk(&Chunk {
                    id: id.to_string(),
                    content: id.to_string(),
                    embedding: v,
                    scope,
                    file_id: None,
                    chunk_index: Some(0),
                })
                .await
                .unwrap();
        }

        Fixture {
            store,
            bot: bot.id,
            kb,
            embedder: TableEmbedder::new(2, &[("refund policy", REFUND.to_vec())]),
            params: RetrievalParams::new(3, 0.85, 2),
        }
    }

    async fn add_refund_revision(f: &Fixture) -> Uuid {
        create_revision(
            &f.store,
            &f.embedder,
            NewRevision {
                chatbot_id: f.bot,
                original_message_id: Some("msg-1".to_string()),
                question: "refund policy".to_string(),
                original_answer: "No refunds.".to_string(),
                revised_answer: "Refunds within 30 days.".to_string(),
                revision_reason: None,
                revised_by: "operator".to_string(),
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_override_short_circuits() {
        let f = fixture().await;
        let rev_id = add_refund_revision(&f).await;

        let outcome = orchestrate(&f.store, &f.params, f.bot, &REFUND_PARAPHRASE)
            .await
            .unwrap();
        assert_eq!(outcome.state(), "OVERRIDE_SERVED");
        match outcome {
            RetrievalOutcome::OverrideServed(o) => {
                assert_eq!(o.matched_revision_id, rev_id);
                assert_eq!(o.revised_answer, "Refunds within 30 days.");
                assert!((o.similarity - 0.92).abs() < 1e-4);
            }
            other => panic!("expected override, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unrelated_query_retrieves_context() {
        let f = fixture().await;
        add_refund_revision(&f).await;

        let outcome = orchestrate(&f.store, &f.params, f.bot, &PASSWORD_RESET)
            .await
            .unwrap();
        match outcome {
            RetrievalOutcome::ContextRetrieved(c) => {
                assert_eq!(
                    c.scope_ids_used,
                    vec![Scope::Private(f.bot), Scope::Shared(f.kb.id)]
                );
                let ids: Vec<&str> = c.chunks.iter().map(|r| r.chunk.id.as_str()).collect();
                assert_eq!(ids, vec!["s1", "p1"]);
            }
            other => panic!("expected context, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deactivated_revision_falls_through() {
        let f = fixture().await;
        let rev_id = add_refund_revision(&f).await;
        deactivate_revision(&f.store, rev_id).await.unwrap();

        let outcome = orchestrate(&f.store, &f.params, f.bot, &REFUND_PARAPHRASE)
            .await
            .unwrap();
        assert_eq!(outcome.state(), "CONTEXT_RETRIEVED");
    }

    #[tokio::test]
    async fn test_per_chatbot_threshold_wins() {
        let mut f = fixture().await;
        add_refund_revision(&f).await;
        f.params.chatbot_thresholds.insert(f.bot, 0.95);

        let outcome = orchestrate(&f.store, &f.params, f.bot, &REFUND_PARAPHRASE)
            .await
            .unwrap();
        assert!(!outcome.is_override());
    }

    #[tokio::test]
    async fn test_empty_scope_returns_empty_context() {
        let store = InMemoryStore::new(2);
        let bot = Chatbot::new("u");
        store.create_chatbot(&bot).await.unwrap();
        let outcome = orchestrate(&store, &RetrievalParams::new(5, 0.85, 2), bot.id, &REFUND)
            .await
            .unwrap();
        match outcome {
            RetrievalOutcome::ContextRetrieved(c) => assert!(c.chunks.is_empty()),
            other => panic!("expected context, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_chatbot_propagates_not_found() {
        let store = InMemoryStore::new(2);
        let err = orchestrate(&store, &RetrievalParams::new(5, 0.85, 2), ChatbotId::new(), &REFUND)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_query_dims_checked_first() {
        let f = fixture().await;
        let err = orchestrate(&f.store, &f.params, f.bot, &[1.0, 0.0, 0.0])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingDimensionMismatch { .. }));
    }

    #[test]
    fn test_outcome_serializes_with_state_tag() {
        let outcome = RetrievalOutcome::OverrideServed(OverrideResult {
            revised_answer: "x".to_string(),
            matched_revision_id: Uuid::nil(),
            similarity: 0.9,
        });
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["state"], "OVERRIDE_SERVED");
        assert_eq!(v["revised_answer"], "x");
    }

    /// Wraps a store and counts index queries, to prove the override path
    /// never searches.
    struct CountingStore {
        inner: InMemoryStore,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for CountingStore {
        async fn insert(&self, id: &str, vector: &[f32], scope: Scope) -> Result<()> {
            self.inner.insert(id, vector, scope).await
        }
        async fn remove(&self, id: &str) -> Result<()> {
            VectorIndex::remove(&self.inner, id).await
        }
        async fn query(&self, vector: &[f32], scopes: &[Scope], k: usize) -> Result<Vec<ScoredId>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query(vector, scopes, k).await
        }
    }

    crate::store::memory::delegate_store_except_index!(CountingStore, inner);

    #[tokio::test]
    async fn test_override_issues_no_search() {
        let f = fixture().await;
        add_refund_revision(&f).await;
        let counting = CountingStore {
            inner: f.store,
            queries: AtomicUsize::new(0),
        };

        orchestrate(&counting, &f.params, f.bot, &REFUND_PARAPHRASE)
            .await
            .unwrap();
        assert_eq!(counting.queries.load(Ordering::SeqCst), 0);

        orchestrate(&counting, &f.params, f.bot, &PASSWORD_RESET)
            .await
            .unwrap();
        assert_eq!(counting.queries.load(Ordering::SeqCst), 1);
    }
}
