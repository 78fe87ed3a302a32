//! Similarity search across one or more scopes.
//!
//! # Ranking contract
//!
//! 1. Candidates are the chunks of the **union** of the given scopes.
//! 2. Each candidate is scored by cosine distance to the query vector.
//! 3. Candidates are ranked globally (never per scope): ascending distance,
//!    ties broken by ascending chunk id.
//! 4. The first `k` are returned. There is no similarity floor: a scope
//!    with at least `k` chunks always yields `k` results.
//!
//! The ranking is performed by a [`VectorIndex`]; [`rank_candidates`] is
//! the exact reference ordering every index must reproduce.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, Scope};
use crate::store::{ChunkStore, ScoredId, VectorIndex};

/// A chunk returned by [`search`] with its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub distance: f64,
}

/// Total order used for ranking: distance ascending, then id ascending.
pub fn compare_ranked(a: &ScoredId, b: &ScoredId) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort candidates by [`compare_ranked`] and keep the first `k`.
pub fn rank_candidates(mut candidates: Vec<ScoredId>, k: usize) -> Vec<ScoredId> {
    candidates.sort_by(compare_ranked);
    candidates.truncate(k);
    candidates
}

/// Remove duplicate scopes while keeping first-seen order.
pub fn dedup_scopes(scopes: &[Scope]) -> Vec<Scope> {
    let mut out: Vec<Scope> = Vec::with_capacity(scopes.len());
    for s in scopes {
        if !out.contains(s) {
            out.push(*s);
        }
    }
    out
}

/// Return the `k` chunks nearest to `query` across all `scopes`.
///
/// An empty result is a valid outcome. A chunk removed between the index
/// lookup and the fetch is skipped rather than reported.
///
/// # Errors
///
/// - [`RetrievalError::Validation`] if `scopes` is empty.
/// - [`RetrievalError::EmbeddingDimensionMismatch`] if the query or a
///   stored vector does not match the configured dimensionality.
pub async fn search<S>(store: &S, query: &[f32], scopes: &[Scope], k: usize) -> Result<Vec<RetrievedChunk>>
where
    S: ChunkStore + VectorIndex + ?Sized,
{
    if scopes.is_empty() {
        return Err(RetrievalError::Validation(
            "search requires at least one scope".to_string(),
        ));
    }
    if k == 0 {
        return Ok(Vec::new());
    }

    let scopes = dedup_scopes(scopes);
    let ranked = store.query(query, &scopes, k).await?;
    if ranked.is_empty() {
        debug!(scopes = scopes.len(), "no chunks in scope");
        return Ok(Vec::new());
    }

    let ids: Vec<String> = ranked.iter().map(|r| r.id.clone()).collect();
    let mut by_id: HashMap<String, Chunk> = store
        .get_chunks(&ids)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    let results: Vec<RetrievedChunk> = ranked
        .into_iter()
        .filter_map(|r| {
            by_id.remove(&r.id).map(|chunk| RetrievedChunk {
                chunk,
                distance: r.distance,
            })
        })
        .collect();

    debug!(
        scopes = scopes.len(),
        returned = results.len(),
        k,
        "similarity search complete"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chatbot, KnowledgeBaseId, SharedKnowledgeBase};
    use crate::store::memory::InMemoryStore;
    use crate::store::{ChunkStore, ScopeStore};

    fn scored(id: &str, distance: f64) -> ScoredId {
        ScoredId {
            id: id.to_string(),
            distance,
        }
    }

    fn chunk(id: &str, scope: Scope, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: format!("content of {}", id),
            embedding,
            scope,
            file_id: None,
            chunk_index: None,
        }
    }

    #[test]
    fn test_rank_orders_by_distance_then_id() {
        let ranked = rank_candidates(
            vec![
                scored("c", 0.2),
                scored("b", 0.1),
                scored("a", 0.2),
                scored("d", 0.05),
            ],
            10,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn test_rank_truncates() {
        let ranked = rank_candidates(vec![scored("a", 0.3), scored("b", 0.1), scored("c", 0.2)], 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, "b");
        assert_eq!(ranked[1].id, "c");
    }

    #[test]
    fn test_dedup_scopes_keeps_order() {
        let kb = KnowledgeBaseId::new();
        let c = crate::models::ChatbotId::new();
        let out = dedup_scopes(&[Scope::Private(c), Scope::Shared(kb), Scope::Private(c)]);
        assert_eq!(out, vec![Scope::Private(c), Scope::Shared(kb)]);
    }

    async fn seeded() -> (InMemoryStore, Scope, Scope) {
        let store = InMemoryStore::new(2);
        let bot = Chatbot::new("user-1");
        let kb = SharedKnowledgeBase::new("user-1", "Policies");
        store.create_chatbot(&bot).await.unwrap();
        store.create_knowledge_base(&kb).await.unwrap();
        let private = Scope::Private(bot.id);
        let shared = Scope::Shared(kb.id);

        // Query direction is (1, 0); shared chunks sit closest.
        store.insert_chunk(&chunk("p1", private, vec![0.5, 0.5])).await.unwrap();
        store.insert_chunk(&chunk("p2", private, vec![0.0, 1.0])).await.unwrap();
        store.insert_chunk(&chunk("p3", private, vec![-1.0, 0.2])).await.unwrap();
        store.insert_chunk(&chunk("s1", shared, vec![1.0, 0.0])).await.unwrap();
        store.insert_chunk(&chunk("s2", shared, vec![0.9, 0.1])).await.unwrap();
        (store, private, shared)
    }

    #[tokio::test]
    async fn test_search_ranks_globally_across_scopes() {
        let (store, private, shared) = seeded().await;
        let results = search(&store, &[1.0, 0.0], &[private, shared], 3).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "p1"]);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn test_search_returns_all_when_fewer_than_k() {
        let (store, private, _) = seeded().await;
        let results = search(&store, &[1.0, 0.0], &[private], 10).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_search_has_no_similarity_floor() {
        let (store, private, _) = seeded().await;
        // (-1, 0) is far from everything in the private scope; still returns k.
        let results = search(&store, &[-1.0, 0.0], &[private], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "p3");
    }

    #[tokio::test]
    async fn test_search_ties_break_by_id() {
        let store = InMemoryStore::new(2);
        let bot = Chatbot::new("u");
        store.create_chatbot(&bot).await.unwrap();
        let scope = Scope::Private(bot.id);
        for id in ["z", "m", "a"] {
            store.insert_chunk(&chunk(id, scope, vec![1.0, 1.0])).await.unwrap();
        }
        let results = search(&store, &[1.0, 1.0], &[scope], 3).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[tokio::test]
    async fn test_search_empty_scope_is_ok() {
        let store = InMemoryStore::new(2);
        let bot = Chatbot::new("u");
        store.create_chatbot(&bot).await.unwrap();
        let results = search(&store, &[1.0, 0.0], &[Scope::Private(bot.id)], 5)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_requires_scope() {
        let store = InMemoryStore::new(2);
        let err = search(&store, &[1.0, 0.0], &[], 5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_search_rejects_wrong_query_dims() {
        let (store, private, _) = seeded().await;
        let err = search(&store, &[1.0, 0.0, 0.0], &[private], 3).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::EmbeddingDimensionMismatch { expected: 2, actual: 3 }
        ));
    }
}
