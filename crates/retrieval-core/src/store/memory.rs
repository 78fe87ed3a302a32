//! In-memory [`Store`](super::Store) implementation for tests and embedding.
//!
//! Each table is a `HashMap` behind its own `std::sync::RwLock`. Link sets
//! are stored as `Arc<Vec<_>>` and replaced wholesale, so a reader holding
//! the previous `Arc` keeps a consistent snapshot while a writer swaps in
//! the new one. Vector search is brute-force cosine distance over every
//! indexed vector in the requested scopes.
//!
//! Locks are always taken in declaration order (chatbots, knowledge bases,
//! links, chunks, index, revisions).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::{check_dims, cosine_distance};
use crate::error::{Result, RetrievalError};
use crate::models::{AnswerRevision, Chatbot, ChatbotId, Chunk, KnowledgeBaseId, Scope, SharedKnowledgeBase};
use crate::revision::RevisionPatch;
use crate::search::rank_candidates;

use super::{ChunkStore, RevisionStore, ScopeStore, ScoredId, VectorIndex};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| RetrievalError::Storage(anyhow!("in-memory store lock poisoned")))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| RetrievalError::Storage(anyhow!("in-memory store lock poisoned")))
}

/// Exact nearest-neighbour index: scans every vector in the requested scopes.
pub struct BruteForceIndex {
    dims: usize,
    vectors: RwLock<HashMap<String, (Scope, Vec<f32>)>>,
}

impl BruteForceIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, id: &str, vector: &[f32], scope: Scope) -> Result<()> {
        check_dims(self.dims, vector)?;
        write(&self.vectors)?.insert(id.to_string(), (scope, vector.to_vec()));
        Ok(())
    }

    fn remove_where(&self, pred: impl Fn(&str) -> bool) -> Result<()> {
        write(&self.vectors)?.retain(|id, _| !pred(id));
        Ok(())
    }

    fn query(&self, vector: &[f32], scopes: &[Scope], k: usize) -> Result<Vec<ScoredId>> {
        check_dims(self.dims, vector)?;
        let wanted: HashSet<Scope> = scopes.iter().copied().collect();
        let vectors = read(&self.vectors)?;
        let candidates: Vec<ScoredId> = vectors
            .iter()
            .filter(|(_, (scope, _))| wanted.contains(scope))
            .map(|(id, (_, v))| ScoredId {
                id: id.clone(),
                distance: cosine_distance(vector, v),
            })
            .collect();
        Ok(rank_candidates(candidates, k))
    }
}

/// In-memory store for tests and single-process embedding.
pub struct InMemoryStore {
    dims: usize,
    chatbots: RwLock<HashMap<ChatbotId, Chatbot>>,
    knowledge_bases: RwLock<HashMap<KnowledgeBaseId, SharedKnowledgeBase>>,
    links: RwLock<HashMap<ChatbotId, Arc<Vec<KnowledgeBaseId>>>>,
    chunks: RwLock<HashMap<String, Chunk>>,
    index: BruteForceIndex,
    revisions: RwLock<HashMap<Uuid, AnswerRevision>>,
}

impl InMemoryStore {
    /// Create an empty store that accepts vectors of exactly `dims` floats.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            chatbots: RwLock::new(HashMap::new()),
            knowledge_bases: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
            index: BruteForceIndex::new(dims),
            revisions: RwLock::new(HashMap::new()),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn scope_exists(
        scope: Scope,
        chatbots: &HashMap<ChatbotId, Chatbot>,
        kbs: &HashMap<KnowledgeBaseId, SharedKnowledgeBase>,
    ) -> bool {
        match scope {
            Scope::Private(c) => chatbots.contains_key(&c),
            Scope::Shared(kb) => kbs.contains_key(&kb),
        }
    }

    fn purge_chunks(&self, scope: Scope) -> Result<u64> {
        let mut chunks = write(&self.chunks)?;
        let removed: HashSet<String> = chunks
            .values()
            .filter(|c| c.scope == scope)
            .map(|c| c.id.clone())
            .collect();
        chunks.retain(|id, _| !removed.contains(id));
        self.index.remove_where(|id| removed.contains(id))?;
        Ok(removed.len() as u64)
    }
}

#[async_trait]
impl ScopeStore for InMemoryStore {
    async fn create_chatbot(&self, chatbot: &Chatbot) -> Result<()> {
        write(&self.chatbots)?.insert(chatbot.id, chatbot.clone());
        Ok(())
    }

    async fn get_chatbot(&self, id: ChatbotId) -> Result<Option<Chatbot>> {
        Ok(read(&self.chatbots)?.get(&id).cloned())
    }

    async fn delete_chatbot(&self, id: ChatbotId) -> Result<()> {
        let mut chatbots = write(&self.chatbots)?;
        if chatbots.remove(&id).is_none() {
            return Err(RetrievalError::not_found("chatbot", id));
        }
        write(&self.links)?.remove(&id);
        self.purge_chunks(Scope::Private(id))?;
        write(&self.revisions)?.retain(|_, r| r.chatbot_id != id);
        Ok(())
    }

    async fn create_knowledge_base(&self, kb: &SharedKnowledgeBase) -> Result<()> {
        if kb.name.trim().is_empty() {
            return Err(RetrievalError::Validation(
                "knowledge base name must not be empty".to_string(),
            ));
        }
        write(&self.knowledge_bases)?.insert(kb.id, kb.clone());
        Ok(())
    }

    async fn get_knowledge_base(&self, id: KnowledgeBaseId) -> Result<Option<SharedKnowledgeBase>> {
        Ok(read(&self.knowledge_bases)?.get(&id).cloned())
    }

    async fn update_knowledge_base(&self, kb: &SharedKnowledgeBase) -> Result<SharedKnowledgeBase> {
        let mut kbs = write(&self.knowledge_bases)?;
        match kbs.get_mut(&kb.id) {
            Some(existing) if existing.owner_id == kb.owner_id => {
                existing.name = kb.name.clone();
                existing.description = kb.description.clone();
                existing.updated_at = Utc::now();
                Ok(existing.clone())
            }
            _ => Err(RetrievalError::not_found("knowledge base", kb.id)),
        }
    }

    async fn delete_knowledge_base(&self, id: KnowledgeBaseId) -> Result<()> {
        let mut kbs = write(&self.knowledge_bases)?;
        if kbs.remove(&id).is_none() {
            return Err(RetrievalError::not_found("knowledge base", id));
        }
        {
            let mut links = write(&self.links)?;
            for set in links.values_mut() {
                if set.contains(&id) {
                    let kept: Vec<KnowledgeBaseId> = set.iter().copied().filter(|k| *k != id).collect();
                    *set = Arc::new(kept);
                }
            }
        }
        self.purge_chunks(Scope::Shared(id))?;
        Ok(())
    }

    async fn list_knowledge_bases_by_owner(&self, owner_id: &str) -> Result<Vec<SharedKnowledgeBase>> {
        let mut out: Vec<SharedKnowledgeBase> = read(&self.knowledge_bases)?
            .values()
            .filter(|kb| kb.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn list_knowledge_bases_for_chatbot(
        &self,
        chatbot_id: ChatbotId,
    ) -> Result<Vec<SharedKnowledgeBase>> {
        let ids = self.linked_knowledge_base_ids(chatbot_id).await?;
        let kbs = read(&self.knowledge_bases)?;
        let mut out: Vec<SharedKnowledgeBase> =
            ids.iter().filter_map(|id| kbs.get(id).cloned()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn linked_knowledge_base_ids(&self, chatbot_id: ChatbotId) -> Result<Vec<KnowledgeBaseId>> {
        // Clone the Arc, then release the lock before copying out.
        let snapshot = read(&self.links)?.get(&chatbot_id).cloned();
        Ok(snapshot.map(|s| s.as_ref().clone()).unwrap_or_default())
    }

    async fn replace_links(&self, chatbot_id: ChatbotId, kb_ids: &[KnowledgeBaseId]) -> Result<()> {
        let chatbots = read(&self.chatbots)?;
        let kbs = read(&self.knowledge_bases)?;
        if !chatbots.contains_key(&chatbot_id) {
            return Err(RetrievalError::not_found("chatbot", chatbot_id));
        }

        let mut next: Vec<KnowledgeBaseId> = Vec::with_capacity(kb_ids.len());
        for id in kb_ids {
            if !kbs.contains_key(id) {
                return Err(RetrievalError::not_found("knowledge base", id));
            }
            if !next.contains(id) {
                next.push(*id);
            }
        }

        write(&self.links)?.insert(chatbot_id, Arc::new(next));
        Ok(())
    }

    async fn attach_link(&self, chatbot_id: ChatbotId, kb_id: KnowledgeBaseId) -> Result<()> {
        let chatbots = read(&self.chatbots)?;
        let kbs = read(&self.knowledge_bases)?;
        if !chatbots.contains_key(&chatbot_id) {
            return Err(RetrievalError::not_found("chatbot", chatbot_id));
        }
        if !kbs.contains_key(&kb_id) {
            return Err(RetrievalError::not_found("knowledge base", kb_id));
        }

        let mut links = write(&self.links)?;
        let current = links.get(&chatbot_id).cloned().unwrap_or_default();
        if !current.contains(&kb_id) {
            let mut next = current.as_ref().clone();
            next.push(kb_id);
            links.insert(chatbot_id, Arc::new(next));
        }
        Ok(())
    }

    async fn detach_link(&self, chatbot_id: ChatbotId, kb_id: KnowledgeBaseId) -> Result<()> {
        let mut links = write(&self.links)?;
        if let Some(current) = links.get(&chatbot_id) {
            if current.contains(&kb_id) {
                let next: Vec<KnowledgeBaseId> = current.iter().copied().filter(|k| *k != kb_id).collect();
                links.insert(chatbot_id, Arc::new(next));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        if chunk.id.is_empty() {
            return Err(RetrievalError::Validation("chunk id must not be empty".to_string()));
        }
        check_dims(self.dims, &chunk.embedding)?;

        let chatbots = read(&self.chatbots)?;
        let kbs = read(&self.knowledge_bases)?;
        if !Self::scope_exists(chunk.scope, &chatbots, &kbs) {
            return Err(RetrievalError::InvalidScope(format!(
                "chunk {} references unknown scope {}",
                chunk.id, chunk.scope
            )));
        }

        write(&self.chunks)?.insert(chunk.id.clone(), chunk.clone());
        self.index.insert(&chunk.id, &chunk.embedding, chunk.scope)?;
        Ok(())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let chunks = read(&self.chunks)?;
        Ok(ids.iter().filter_map(|id| chunks.get(id).cloned()).collect())
    }

    async fn list_chunks(&self, scope: Scope) -> Result<Vec<Chunk>> {
        let mut out: Vec<Chunk> = read(&self.chunks)?
            .values()
            .filter(|c| c.scope == scope)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.chunk_index.is_none(), a.chunk_index)
                .cmp(&(b.chunk_index.is_none(), b.chunk_index))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    async fn count_chunks(&self, scope: Scope) -> Result<usize> {
        Ok(read(&self.chunks)?.values().filter(|c| c.scope == scope).count())
    }

    async fn delete_chunks_by_file(&self, file_id: Uuid) -> Result<u64> {
        let mut chunks = write(&self.chunks)?;
        let removed: HashSet<String> = chunks
            .values()
            .filter(|c| c.file_id == Some(file_id))
            .map(|c| c.id.clone())
            .collect();
        chunks.retain(|id, _| !removed.contains(id));
        self.index.remove_where(|id| removed.contains(id))?;
        Ok(removed.len() as u64)
    }

    async fn delete_chunks_by_scope(&self, scope: Scope) -> Result<u64> {
        self.purge_chunks(scope)
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn insert(&self, id: &str, vector: &[f32], scope: Scope) -> Result<()> {
        self.index.insert(id, vector, scope)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.index.remove_where(|stored| stored == id)
    }

    async fn query(&self, vector: &[f32], scopes: &[Scope], k: usize) -> Result<Vec<ScoredId>> {
        self.index.query(vector, scopes, k)
    }
}

#[async_trait]
impl RevisionStore for InMemoryStore {
    async fn insert_revision(&self, revision: &AnswerRevision) -> Result<()> {
        check_dims(self.dims, &revision.question_embedding)?;
        let chatbots = read(&self.chatbots)?;
        if !chatbots.contains_key(&revision.chatbot_id) {
            return Err(RetrievalError::InvalidScope(format!(
                "revision references unknown chatbot {}",
                revision.chatbot_id
            )));
        }
        write(&self.revisions)?.insert(revision.id, revision.clone());
        Ok(())
    }

    async fn get_revision(&self, id: Uuid) -> Result<Option<AnswerRevision>> {
        Ok(read(&self.revisions)?.get(&id).cloned())
    }

    async fn apply_revision_patch(&self, id: Uuid, patch: &RevisionPatch) -> Result<AnswerRevision> {
        if let Some(q) = patch.question() {
            check_dims(self.dims, q.embedding())?;
        }
        let mut revisions = write(&self.revisions)?;
        let row = revisions
            .get_mut(&id)
            .ok_or_else(|| RetrievalError::not_found("revision", id))?;
        patch.apply_to(row, Utc::now());
        Ok(row.clone())
    }

    async fn list_revisions(
        &self,
        chatbot_id: ChatbotId,
        include_inactive: bool,
    ) -> Result<Vec<AnswerRevision>> {
        let mut out: Vec<AnswerRevision> = read(&self.revisions)?
            .values()
            .filter(|r| r.chatbot_id == chatbot_id && (include_inactive || r.is_active))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn active_revisions(&self, chatbot_id: ChatbotId) -> Result<Vec<AnswerRevision>> {
        self.list_revisions(chatbot_id, false).await
    }
}

/// Implement every store trait except [`VectorIndex`] for a wrapper type
/// by forwarding to one of its fields.
#[cfg(test)]
macro_rules! delegate_store_except_index {
    ($ty:ty, $field:ident) => {
        #[async_trait::async_trait]
        impl $crate::store::ScopeStore for $ty {
            async fn create_chatbot(&self, c: &$crate::models::Chatbot) -> $crate::Result<()> {
                self.$field.create_chatbot(c).await
            }
            async fn get_chatbot(
                &self,
                id: $crate::models::ChatbotId,
            ) -> $crate::Result<Option<$crate::models::Chatbot>> {
                self.$field.get_chatbot(id).await
            }
            async fn delete_chatbot(&self, id: $crate::models::ChatbotId) -> $crate::Result<()> {
                self.$field.delete_chatbot(id).await
            }
            async fn create_knowledge_base(
                &self,
                kb: &$crate::models::SharedKnowledgeBase,
            ) -> $crate::Result<()> {
                self.$field.create_knowledge_base(kb).await
            }
            async fn get_knowledge_base(
                &self,
                id: $crate::models::KnowledgeBaseId,
            ) -> $crate::Result<Option<$crate::models::SharedKnowledgeBase>> {
                self.$field.get_knowledge_base(id).await
            }
            async fn update_knowledge_base(
                &self,
                kb: &$crate::models::SharedKnowledgeBase,
            ) -> $crate::Result<$crate::models::SharedKnowledgeBase> {
                self.$field.update_knowledge_base(kb).await
            }
            async fn delete_knowledge_base(
                &self,
                id: $crate::models::KnowledgeBaseId,
            ) -> $crate::Result<()> {
                self.$field.delete_knowledge_base(id).await
            }
            async fn list_knowledge_bases_by_owner(
                &self,
                owner_id: &str,
            ) -> $crate::Result<Vec<$crate::models::SharedKnowledgeBase>> {
                self.$field.list_knowledge_bases_by_owner(owner_id).await
            }
            async fn list_knowledge_bases_for_chatbot(
                &self,
                id: $crate::models::ChatbotId,
            ) -> $crate::Result<Vec<$crate::models::SharedKnowledgeBase>> {
                self.$field.list_knowledge_bases_for_chatbot(id).await
            }
            async fn linked_knowledge_base_ids(
                &self,
                id: $crate::models::ChatbotId,
            ) -> $crate::Result<Vec<$crate::models::KnowledgeBaseId>> {
                self.$field.linked_knowledge_base_ids(id).await
            }
            async fn replace_links(
                &self,
                id: $crate::models::ChatbotId,
                kb_ids: &[$crate::models::KnowledgeBaseId],
            ) -> $crate::Result<()> {
                self.$field.replace_links(id, kb_ids).await
            }
            async fn attach_link(
                &self,
                id: $crate::models::ChatbotId,
                kb: $crate::models::KnowledgeBaseId,
            ) -> $crate::Result<()> {
                self.$field.attach_link(id, kb).await
            }
            async fn detach_link(
                &self,
                id: $crate::models::ChatbotId,
                kb: $crate::models::KnowledgeBaseId,
            ) -> $crate::Result<()> {
                self.$field.detach_link(id, kb).await
            }
        }

        #[async_trait::async_trait]
        impl $crate::store::ChunkStore for $ty {
            async fn insert_chunk(&self, c: &$crate::models::Chunk) -> $crate::Result<()> {
                self.$field.insert_chunk(c).await
            }
            async fn get_chunks(&self, ids: &[String]) -> $crate::Result<Vec<$crate::models::Chunk>> {
                self.$field.get_chunks(ids).await
            }
            async fn list_chunks(
                &self,
                scope: $crate::models::Scope,
            ) -> $crate::Result<Vec<$crate::models::Chunk>> {
                self.$field.list_chunks(scope).await
            }
            async fn count_chunks(&self, scope: $crate::models::Scope) -> $crate::Result<usize> {
                self.$field.count_chunks(scope).await
            }
            async fn delete_chunks_by_file(&self, file_id: uuid::Uuid) -> $crate::Result<u64> {
                self.$field.delete_chunks_by_file(file_id).await
            }
            async fn delete_chunks_by_scope(&self, scope: $crate::models::Scope) -> $crate::Result<u64> {
                self.$field.delete_chunks_by_scope(scope).await
            }
        }

        #[async_trait::async_trait]
        impl $crate::store::RevisionStore for $ty {
            async fn insert_revision(&self, r: &$crate::models::AnswerRevision) -> $crate::Result<()> {
                self.$field.insert_revision(r).await
            }
            async fn get_revision(
                &self,
                id: uuid::Uuid,
            ) -> $crate::Result<Option<$crate::models::AnswerRevision>> {
                self.$field.get_revision(id).await
            }
            async fn apply_revision_patch(
                &self,
                id: uuid::Uuid,
                patch: &$crate::revision::RevisionPatch,
            ) -> $crate::Result<$crate::models::AnswerRevision> {
                self.$field.apply_revision_patch(id, patch).await
            }
            async fn list_revisions(
                &self,
                id: $crate::models::ChatbotId,
                include_inactive: bool,
            ) -> $crate::Result<Vec<$crate::models::AnswerRevision>> {
                self.$field.list_revisions(id, include_inactive).await
            }
            async fn active_revisions(
                &self,
                id: $crate::models::ChatbotId,
            ) -> $crate::Result<Vec<$crate::models::AnswerRevision>> {
                self.$field.active_revisions(id).await
            }
        }
    };
}

#[cfg(test)]
pub(crate) use delegate_store_except_index;

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, scope: Scope, file_id: Option<Uuid>, idx: Option<i64>) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: id.to_string(),
            embedding: vec![1.0, 0.0],
            scope,
            file_id,
            chunk_index: idx,
        }
    }

    async fn store_with_bot_and_kb() -> (InMemoryStore, Chatbot, SharedKnowledgeBase) {
        let store = InMemoryStore::new(2);
        let bot = Chatbot::new("owner");
        let kb = SharedKnowledgeBase::new("owner", "Docs");
        store.create_chatbot(&bot).await.unwrap();
        store.create_knowledge_base(&kb).await.unwrap();
        (store, bot, kb)
    }

    #[tokio::test]
    async fn test_insert_chunk_unknown_scope_rejected() {
        let store = InMemoryStore::new(2);
        let err = store
            .insert_chunk(&chunk("c1", Scope::Shared(KnowledgeBaseId::new()), None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidScope(_)));
        assert!(store.index.is_empty());
    }

    #[tokio::test]
    async fn test_insert_chunk_wrong_dims_rejected() {
        let (store, bot, _) = store_with_bot_and_kb().await;
        let mut c = chunk("c1", Scope::Private(bot.id), None, None);
        c.embedding = vec![1.0, 0.0, 0.0];
        let err = store.insert_chunk(&c).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::EmbeddingDimensionMismatch { expected: 2, actual: 3 }
        ));
    }

    #[tokio::test]
    async fn test_list_chunks_orders_by_index_nulls_last() {
        let (store, bot, _) = store_with_bot_and_kb().await;
        let scope = Scope::Private(bot.id);
        store.insert_chunk(&chunk("x", scope, None, None)).await.unwrap();
        store.insert_chunk(&chunk("b", scope, None, Some(1))).await.unwrap();
        store.insert_chunk(&chunk("a", scope, None, Some(0))).await.unwrap();
        let ids: Vec<String> = store
            .list_chunks(scope)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "x"]);
        assert_eq!(store.count_chunks(scope).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_chunks_by_file_unindexes() {
        let (store, bot, _) = store_with_bot_and_kb().await;
        let scope = Scope::Private(bot.id);
        let file = Uuid::new_v4();
        store.insert_chunk(&chunk("a", scope, Some(file), Some(0))).await.unwrap();
        store.insert_chunk(&chunk("b", scope, Some(file), Some(1))).await.unwrap();
        store.insert_chunk(&chunk("c", scope, None, None)).await.unwrap();

        assert_eq!(store.delete_chunks_by_file(file).await.unwrap(), 2);
        let hits = store.query(&[1.0, 0.0], &[scope], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c");
    }

    #[tokio::test]
    async fn test_replace_links_dedupes_and_keeps_order() {
        let (store, bot, a) = store_with_bot_and_kb().await;
        let b = SharedKnowledgeBase::new("owner", "Billing");
        store.create_knowledge_base(&b).await.unwrap();

        store.replace_links(bot.id, &[b.id, a.id, b.id]).await.unwrap();
        assert_eq!(
            store.linked_knowledge_base_ids(bot.id).await.unwrap(),
            vec![b.id, a.id]
        );

        store.replace_links(bot.id, &[]).await.unwrap();
        assert!(store.linked_knowledge_base_ids(bot.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_links_all_or_nothing() {
        let (store, bot, kb) = store_with_bot_and_kb().await;
        store.replace_links(bot.id, &[kb.id]).await.unwrap();

        let err = store
            .replace_links(bot.id, &[KnowledgeBaseId::new()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.linked_knowledge_base_ids(bot.id).await.unwrap(), vec![kb.id]);
    }

    #[tokio::test]
    async fn test_attach_is_idempotent_and_detach_tolerates_missing() {
        let (store, bot, kb) = store_with_bot_and_kb().await;
        store.attach_link(bot.id, kb.id).await.unwrap();
        store.attach_link(bot.id, kb.id).await.unwrap();
        assert_eq!(store.linked_knowledge_base_ids(bot.id).await.unwrap(), vec![kb.id]);

        store.detach_link(bot.id, kb.id).await.unwrap();
        store.detach_link(bot.id, kb.id).await.unwrap();
        assert!(store.linked_knowledge_base_ids(bot.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_knowledge_base_cascades() {
        let (store, bot, kb) = store_with_bot_and_kb().await;
        store.replace_links(bot.id, &[kb.id]).await.unwrap();
        store
            .insert_chunk(&chunk("s1", Scope::Shared(kb.id), None, None))
            .await
            .unwrap();

        store.delete_knowledge_base(kb.id).await.unwrap();
        assert!(store.linked_knowledge_base_ids(bot.id).await.unwrap().is_empty());
        assert!(store.get_chunks(&["s1".to_string()]).await.unwrap().is_empty());
        assert!(store.index.is_empty());
    }

    #[tokio::test]
    async fn test_delete_chatbot_cascades() {
        let (store, bot, kb) = store_with_bot_and_kb().await;
        store.replace_links(bot.id, &[kb.id]).await.unwrap();
        store
            .insert_chunk(&chunk("p1", Scope::Private(bot.id), None, None))
            .await
            .unwrap();
        store
            .insert_chunk(&chunk("s1", Scope::Shared(kb.id), None, None))
            .await
            .unwrap();

        store.delete_chatbot(bot.id).await.unwrap();
        assert!(store.get_chatbot(bot.id).await.unwrap().is_none());
        assert!(store.get_chunks(&["p1".to_string()]).await.unwrap().is_empty());
        // Shared content survives its consumers.
        assert_eq!(store.count_chunks(Scope::Shared(kb.id)).await.unwrap(), 1);
        assert!(store.delete_chatbot(bot.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_knowledge_base_is_owner_scoped() {
        let (store, _, kb) = store_with_bot_and_kb().await;
        let mut edit = kb.clone();
        edit.name = "Renamed".to_string();
        edit.owner_id = "someone-else".to_string();
        assert!(store.update_knowledge_base(&edit).await.unwrap_err().is_not_found());

        edit.owner_id = kb.owner_id.clone();
        let updated = store.update_knowledge_base(&edit).await.unwrap();
        assert_eq!(updated.name, "Renamed");
    }

    #[tokio::test]
    async fn test_list_knowledge_bases_for_chatbot_by_name() {
        let (store, bot, docs) = store_with_bot_and_kb().await;
        let billing = SharedKnowledgeBase::new("owner", "Billing");
        store.create_knowledge_base(&billing).await.unwrap();
        store.replace_links(bot.id, &[docs.id, billing.id]).await.unwrap();

        let names: Vec<String> = store
            .list_knowledge_bases_for_chatbot(bot.id)
            .await
            .unwrap()
            .into_iter()
            .map(|kb| kb.name)
            .collect();
        assert_eq!(names, vec!["Billing", "Docs"]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_concurrent_replace() {
        let (store, bot, a) = store_with_bot_and_kb().await;
        let b = SharedKnowledgeBase::new("owner", "B");
        store.create_knowledge_base(&b).await.unwrap();
        store.replace_links(bot.id, &[a.id]).await.unwrap();

        let store = Arc::new(store);
        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..200 {
                    let set = if i % 2 == 0 { vec![a.id, b.id] } else { vec![b.id] };
                    store.replace_links(bot.id, &set).await.unwrap();
                }
            })
        };
        for _ in 0..200 {
            let seen = store.linked_knowledge_base_ids(bot.id).await.unwrap();
            assert!(
                seen == vec![a.id] || seen == vec![a.id, b.id] || seen == vec![b.id],
                "torn link set: {:?}",
                seen
            );
        }
        writer.await.unwrap();
    }
}
