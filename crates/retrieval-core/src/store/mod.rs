//! Storage abstraction for the retrieval core.
//!
//! Four capabilities, each a trait so backends can be mixed or swapped:
//!
//! | Trait | Owns |
//! |-------|------|
//! | [`ScopeStore`] | chatbots, shared knowledge bases, the chatbot↔KB link table |
//! | [`ChunkStore`] | persisted content chunks |
//! | [`VectorIndex`] | nearest-neighbour lookup over chunk embeddings |
//! | [`RevisionStore`] | human-corrected answer revisions |
//!
//! [`Store`] is implemented automatically for any type providing all four.
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Write-time guarantees
//!
//! Every backend validates on write: chunks and revisions referencing a
//! missing scope fail with [`RetrievalError::InvalidScope`](crate::RetrievalError::InvalidScope),
//! vectors of the wrong length fail with
//! [`RetrievalError::EmbeddingDimensionMismatch`](crate::RetrievalError::EmbeddingDimensionMismatch),
//! and [`ScopeStore::replace_links`] is all-or-nothing: a concurrent reader
//! sees the old link set or the new one, never a mix.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AnswerRevision, Chatbot, ChatbotId, Chunk, KnowledgeBaseId, Scope, SharedKnowledgeBase};
use crate::revision::RevisionPatch;

/// A ranked hit returned by a [`VectorIndex`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredId {
    pub id: String,
    /// Cosine distance to the query vector.
    pub distance: f64,
}

#[async_trait]
pub trait ScopeStore: Send + Sync {
    async fn create_chatbot(&self, chatbot: &Chatbot) -> Result<()>;

    async fn get_chatbot(&self, id: ChatbotId) -> Result<Option<Chatbot>>;

    /// Delete a chatbot together with its private chunks, links, and revisions.
    async fn delete_chatbot(&self, id: ChatbotId) -> Result<()>;

    async fn create_knowledge_base(&self, kb: &SharedKnowledgeBase) -> Result<()>;

    async fn get_knowledge_base(&self, id: KnowledgeBaseId) -> Result<Option<SharedKnowledgeBase>>;

    /// Update name and description. Only matches when `kb.owner_id` owns the row.
    async fn update_knowledge_base(&self, kb: &SharedKnowledgeBase) -> Result<SharedKnowledgeBase>;

    /// Delete a knowledge base together with its chunks and links.
    async fn delete_knowledge_base(&self, id: KnowledgeBaseId) -> Result<()>;

    /// Newest first.
    async fn list_knowledge_bases_by_owner(&self, owner_id: &str) -> Result<Vec<SharedKnowledgeBase>>;

    /// Knowledge bases linked to a chatbot, ordered by name.
    async fn list_knowledge_bases_for_chatbot(
        &self,
        chatbot_id: ChatbotId,
    ) -> Result<Vec<SharedKnowledgeBase>>;

    /// Linked knowledge base ids in link order, read as one consistent snapshot.
    async fn linked_knowledge_base_ids(&self, chatbot_id: ChatbotId) -> Result<Vec<KnowledgeBaseId>>;

    /// Atomically replace the full link set of a chatbot.
    ///
    /// Duplicate ids keep their first position. Fails without changing
    /// anything if the chatbot or any knowledge base is missing.
    async fn replace_links(&self, chatbot_id: ChatbotId, kb_ids: &[KnowledgeBaseId]) -> Result<()>;

    /// Link one knowledge base, appended after existing links. Idempotent.
    async fn attach_link(&self, chatbot_id: ChatbotId, kb_id: KnowledgeBaseId) -> Result<()>;

    /// Remove one link. Removing a link that does not exist is not an error.
    async fn detach_link(&self, chatbot_id: ChatbotId, kb_id: KnowledgeBaseId) -> Result<()>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert or replace a chunk and index its embedding.
    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()>;

    /// Fetch chunks by id. Missing ids are skipped; order is unspecified.
    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// All chunks of one scope, by `chunk_index` (unset last) then id.
    async fn list_chunks(&self, scope: Scope) -> Result<Vec<Chunk>>;

    async fn count_chunks(&self, scope: Scope) -> Result<usize>;

    /// Returns the number of chunks removed.
    async fn delete_chunks_by_file(&self, file_id: Uuid) -> Result<u64>;

    /// Returns the number of chunks removed.
    async fn delete_chunks_by_scope(&self, scope: Scope) -> Result<u64>;
}

/// Index-agnostic nearest-neighbour capability.
///
/// Correctness is defined by the ranking contract, not by any particular
/// index: `query` returns at most `k` ids from the union of `scopes`,
/// ordered by ascending cosine distance with ties broken by ascending id.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Index (or re-index) the vector for an id within a scope.
    async fn insert(&self, id: &str, vector: &[f32], scope: Scope) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    async fn query(&self, vector: &[f32], scopes: &[Scope], k: usize) -> Result<Vec<ScoredId>>;
}

#[async_trait]
pub trait RevisionStore: Send + Sync {
    async fn insert_revision(&self, revision: &AnswerRevision) -> Result<()>;

    async fn get_revision(&self, id: Uuid) -> Result<Option<AnswerRevision>>;

    /// Apply a patch as one atomic write and return the updated row.
    async fn apply_revision_patch(&self, id: Uuid, patch: &RevisionPatch) -> Result<AnswerRevision>;

    /// Newest first. Inactive rows only when `include_inactive` is set.
    async fn list_revisions(
        &self,
        chatbot_id: ChatbotId,
        include_inactive: bool,
    ) -> Result<Vec<AnswerRevision>>;

    /// Active revisions of exactly this chatbot.
    async fn active_revisions(&self, chatbot_id: ChatbotId) -> Result<Vec<AnswerRevision>>;
}

/// A backend providing every storage capability.
pub trait Store: ScopeStore + ChunkStore + VectorIndex + RevisionStore {}

impl<T> Store for T where T: ScopeStore + ChunkStore + VectorIndex + RevisionStore {}
