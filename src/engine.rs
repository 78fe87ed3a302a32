//! Cancellable front door to the retrieval core.
//!
//! [`RetrievalEngine`] binds a store, an embedding provider, and the
//! retrieval parameters. Every public operation races the caller's
//! [`CancellationToken`]; cancellation resolves to
//! [`RetrievalError::Cancelled`] at the next suspension point and leaves
//! no partial state behind, since queries are read-only.
//!
//! The engine adds no timeouts and no retries of its own. Deadlines belong
//! to the caller (the HTTP layer wraps queries in `tokio::time::timeout`).

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use retrieval_core::embedding::{embed_checked, EmbeddingProvider};
use retrieval_core::revision::{self, NewRevision, RevisionUpdate};
use retrieval_core::scope::resolve_scope;
use retrieval_core::store::Store;
use retrieval_core::{
    orchestrate, AnswerRevision, ChatbotId, Result, RetrievalError, RetrievalOutcome,
    RetrievalParams, Scope,
};

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
        res = fut => res,
    }
}

pub struct RetrievalEngine {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: RetrievalParams,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.embedder.dims() > 0
    }

    /// Embed `question` and run the override-vs-retrieve decision.
    pub async fn answer(
        &self,
        cancel: &CancellationToken,
        chatbot_id: ChatbotId,
        question: &str,
    ) -> Result<RetrievalOutcome> {
        if question.trim().is_empty() {
            return Err(RetrievalError::Validation("question must not be empty".to_string()));
        }
        let embedding = cancellable(cancel, async {
            embed_checked(self.embedder.as_ref(), question)
                .await
                .inspect_err(|e| warn!(%chatbot_id, error = %e, "query embedding failed"))
        })
        .await?;
        self.orchestrate(cancel, chatbot_id, &embedding).await
    }

    /// Run the decision for an already-embedded query.
    pub async fn orchestrate(
        &self,
        cancel: &CancellationToken,
        chatbot_id: ChatbotId,
        embedding: &[f32],
    ) -> Result<RetrievalOutcome> {
        let outcome = cancellable(
            cancel,
            orchestrate(self.store.as_ref(), &self.params, chatbot_id, embedding),
        )
        .await?;
        info!(%chatbot_id, state = outcome.state(), "query answered");
        Ok(outcome)
    }

    pub async fn scope(&self, cancel: &CancellationToken, chatbot_id: ChatbotId) -> Result<Vec<Scope>> {
        cancellable(cancel, resolve_scope(self.store.as_ref(), chatbot_id)).await
    }

    pub async fn create_revision(
        &self,
        cancel: &CancellationToken,
        req: NewRevision,
    ) -> Result<AnswerRevision> {
        cancellable(
            cancel,
            revision::create_revision(self.store.as_ref(), self.embedder.as_ref(), req),
        )
        .await
    }

    pub async fn update_revision(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        update: RevisionUpdate,
    ) -> Result<AnswerRevision> {
        cancellable(
            cancel,
            revision::update_revision(self.store.as_ref(), self.embedder.as_ref(), id, update),
        )
        .await
    }

    pub async fn deactivate_revision(&self, cancel: &CancellationToken, id: Uuid) -> Result<AnswerRevision> {
        cancellable(cancel, revision::deactivate_revision(self.store.as_ref(), id)).await
    }

    pub async fn list_revisions(
        &self,
        cancel: &CancellationToken,
        chatbot_id: ChatbotId,
        include_inactive: bool,
    ) -> Result<Vec<AnswerRevision>> {
        cancellable(
            cancel,
            revision::list_revisions(self.store.as_ref(), chatbot_id, include_inactive),
        )
        .await
    }
}
