//! Override matcher: finds the best active human-corrected answer for a
//! query embedding.
//!
//! Matching is strictly per chatbot. Revisions are never shared through
//! linked knowledge bases, and inactive revisions never match.
//!
//! Selection: `similarity = 1 − cosine_distance`; the single highest
//! similarity wins, ties go to the lowest revision id, and the winner is
//! returned only if `similarity >= threshold`.

use serde::Serialize;
use tracing::debug;

use crate::embedding::{check_dims, cosine_similarity};
use crate::error::{Result, RetrievalError};
use crate::models::{AnswerRevision, ChatbotId};
use crate::store::RevisionStore;

/// A revision whose question cleared the override threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideMatch {
    pub revision: AnswerRevision,
    pub similarity: f64,
}

/// Pick the best candidate from `revisions` for `query`.
///
/// Pure selection over already-loaded rows; inactive rows are ignored.
/// Returns `None` when nothing reaches `threshold`.
pub fn select_override(
    revisions: Vec<AnswerRevision>,
    query: &[f32],
    threshold: f64,
) -> Result<Option<OverrideMatch>> {
    let mut best: Option<OverrideMatch> = None;

    for revision in revisions.into_iter().filter(|r| r.is_active) {
        check_dims(query.len(), &revision.question_embedding)?;
        let similarity = cosine_similarity(query, &revision.question_embedding);
        let better = match &best {
            None => true,
            Some(b) => {
                similarity > b.similarity
                    || (similarity == b.similarity && revision.id < b.revision.id)
            }
        };
        if better {
            best = Some(OverrideMatch {
                revision,
                similarity,
            });
        }
    }

    Ok(best.filter(|m| m.similarity >= threshold))
}

/// Find the override for a chatbot's query, if any.
///
/// # Errors
///
/// - [`RetrievalError::Validation`] if `threshold` is not a finite number.
/// - [`RetrievalError::EmbeddingDimensionMismatch`] if a stored revision
///   embedding does not match the query's length.
pub async fn find_override<S>(
    store: &S,
    chatbot_id: ChatbotId,
    query: &[f32],
    threshold: f64,
) -> Result<Option<OverrideMatch>>
where
    S: RevisionStore + ?Sized,
{
    if !threshold.is_finite() {
        return Err(RetrievalError::Validation(format!(
            "override threshold must be finite, got {}",
            threshold
        )));
    }

    let candidates = store.active_revisions(chatbot_id).await?;
    let considered = candidates.len();
    let matched = select_override(candidates, query, threshold)?;

    match &matched {
        Some(m) => debug!(
            %chatbot_id,
            revision_id = %m.revision.id,
            similarity = m.similarity,
            "override matched"
        ),
        None => debug!(%chatbot_id, considered, threshold, "no override"),
    }
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::content_hash;
    use crate::models::Chatbot;
    use crate::revision::{create_revision, deactivate_revision, tests::TableEmbedder, NewRevision};
    use crate::store::memory::InMemoryStore;
    use crate::store::ScopeStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn revision(id: Uuid, embedding: Vec<f32>, active: bool) -> AnswerRevision {
        let now = Utc::now();
        AnswerRevision {
            id,
            chatbot_id: ChatbotId::new(),
            original_message_id: None,
            question: "q".to_string(),
            question_hash: content_hash("q"),
            question_embedding: embedding,
            original_answer: "a".to_string(),
            revised_answer: "b".to_string(),
            revision_reason: None,
            revised_by: "op".to_string(),
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_select_highest_similarity() {
        let near = revision(Uuid::new_v4(), vec![1.0, 0.1], true);
        let far = revision(Uuid::new_v4(), vec![0.0, 1.0], true);
        let m = select_override(vec![far, near.clone()], &[1.0, 0.0], 0.5)
            .unwrap()
            .unwrap();
        assert_eq!(m.revision.id, near.id);
    }

    #[test]
    fn test_select_below_threshold_is_none() {
        let r = revision(Uuid::new_v4(), vec![0.0, 1.0], true);
        assert!(select_override(vec![r], &[1.0, 0.0], 0.85).unwrap().is_none());
    }

    #[test]
    fn test_select_threshold_inclusive() {
        let r = revision(Uuid::new_v4(), vec![1.0, 0.0], true);
        let m = select_override(vec![r], &[1.0, 0.0], 1.0).unwrap();
        assert!(m.is_some());
    }

    #[test]
    fn test_select_ties_lowest_id() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let m = select_override(
            vec![
                revision(high, vec![1.0, 0.0], true),
                revision(low, vec![2.0, 0.0], true),
            ],
            &[1.0, 0.0],
            0.9,
        )
        .unwrap()
        .unwrap();
        assert_eq!(m.revision.id, low);
    }

    #[test]
    fn test_select_ignores_inactive() {
        let inactive = revision(Uuid::new_v4(), vec![1.0, 0.0], false);
        let active = revision(Uuid::new_v4(), vec![0.6, 0.8], true);
        let m = select_override(vec![inactive, active.clone()], &[1.0, 0.0], 0.5)
            .unwrap()
            .unwrap();
        assert_eq!(m.revision.id, active.id);
        assert!((m.similarity - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_select_stored_dims_mismatch() {
        let r = revision(Uuid::new_v4(), vec![1.0, 0.0, 0.0], true);
        assert!(matches!(
            select_override(vec![r], &[1.0, 0.0], 0.5),
            Err(RetrievalError::EmbeddingDimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_override_scoped_to_chatbot_and_active() {
        let store = InMemoryStore::new(2);
        let bot = Chatbot::new("owner");
        let other = Chatbot::new("owner");
        store.create_chatbot(&bot).await.unwrap();
        store.create_chatbot(&other).await.unwrap();
        let embedder = TableEmbedder::new(2, &[("refund policy", vec![1.0, 0.0])]);

        let req = |chatbot_id| NewRevision {
            chatbot_id,
            original_message_id: None,
            question: "refund policy".to_string(),
            original_answer: "no".to_string(),
            revised_answer: "30 days".to_string(),
            revision_reason: None,
            revised_by: "op".to_string(),
        };
        let rev = create_revision(&store, &embedder, req(bot.id)).await.unwrap();
        create_revision(&store, &embedder, req(other.id)).await.unwrap();

        let m = find_override(&store, bot.id, &[1.0, 0.05], 0.85)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.revision.id, rev.id);
        assert_eq!(m.revision.chatbot_id, bot.id);

        deactivate_revision(&store, rev.id).await.unwrap();
        assert!(find_override(&store, bot.id, &[1.0, 0.05], 0.85)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_override_rejects_nan_threshold() {
        let store = InMemoryStore::new(2);
        let err = find_override(&store, ChatbotId::new(), &[1.0, 0.0], f64::NAN)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Validation(_)));
    }
}
