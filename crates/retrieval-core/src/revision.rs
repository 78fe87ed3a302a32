//! Answer revision write path: create, update, deactivate, list.
//!
//! A question and its embedding can only change together. Callers describe
//! an edit with [`RevisionUpdate`] (plain text fields); [`update_revision`]
//! turns it into a [`RevisionPatch`], embedding the new question along the
//! way. `RevisionPatch` and [`QuestionEdit`] have no public constructors,
//! so no store can be handed a question change without its embedding.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::embedding::{content_hash, embed_checked, EmbeddingProvider};
use crate::error::{Result, RetrievalError};
use crate::models::{AnswerRevision, ChatbotId};
use crate::store::{RevisionStore, ScopeStore};

/// Input for [`create_revision`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewRevision {
    pub chatbot_id: ChatbotId,
    #[serde(default)]
    pub original_message_id: Option<String>,
    pub question: String,
    pub original_answer: String,
    pub revised_answer: String,
    #[serde(default)]
    pub revision_reason: Option<String>,
    pub revised_by: String,
}

/// Partial update requested by a caller. At least one field must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevisionUpdate {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub revised_answer: Option<String>,
    #[serde(default)]
    pub revision_reason: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl RevisionUpdate {
    pub fn is_empty(&self) -> bool {
        self.question.is_none()
            && self.revised_answer.is_none()
            && self.revision_reason.is_none()
            && self.is_active.is_none()
    }
}

/// A new question text bundled with the embedding computed from it.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionEdit {
    text: String,
    hash: String,
    embedding: Vec<f32>,
}

impl QuestionEdit {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

/// A validated field-level change to one revision, ready for a store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RevisionPatch {
    question: Option<QuestionEdit>,
    revised_answer: Option<String>,
    revision_reason: Option<String>,
    is_active: Option<bool>,
}

impl RevisionPatch {
    pub(crate) fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Self::default()
        }
    }

    pub fn question(&self) -> Option<&QuestionEdit> {
        self.question.as_ref()
    }

    pub fn revised_answer(&self) -> Option<&str> {
        self.revised_answer.as_deref()
    }

    pub fn revision_reason(&self) -> Option<&str> {
        self.revision_reason.as_deref()
    }

    pub fn is_active(&self) -> Option<bool> {
        self.is_active
    }

    /// Apply the patch to a loaded row and bump `updated_at`.
    ///
    /// Stores call this inside their own atomic unit (lock or transaction).
    pub fn apply_to(&self, revision: &mut AnswerRevision, now: DateTime<Utc>) {
        if let Some(q) = &self.question {
            revision.question = q.text.clone();
            revision.question_hash = q.hash.clone();
            revision.question_embedding = q.embedding.clone();
        }
        if let Some(a) = &self.revised_answer {
            revision.revised_answer = a.clone();
        }
        if let Some(r) = &self.revision_reason {
            revision.revision_reason = Some(r.clone());
        }
        if let Some(active) = self.is_active {
            revision.is_active = active;
        }
        revision.updated_at = now;
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RetrievalError::Validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

/// Create a revision: embed the question, assign an id, mark it active.
///
/// # Errors
///
/// - [`RetrievalError::Validation`] for empty required fields.
/// - [`RetrievalError::InvalidScope`] if the chatbot does not exist.
/// - [`RetrievalError::Embedding`] / `EmbeddingDimensionMismatch` from the
///   embedding call.
pub async fn create_revision<S>(
    store: &S,
    embedder: &dyn EmbeddingProvider,
    req: NewRevision,
) -> Result<AnswerRevision>
where
    S: RevisionStore + ScopeStore + ?Sized,
{
    require_text("question", &req.question)?;
    require_text("original_answer", &req.original_answer)?;
    require_text("revised_answer", &req.revised_answer)?;
    require_text("revised_by", &req.revised_by)?;

    if store.get_chatbot(req.chatbot_id).await?.is_none() {
        return Err(RetrievalError::InvalidScope(format!(
            "revision references unknown chatbot {}",
            req.chatbot_id
        )));
    }

    let embedding = embed_checked(embedder, &req.question).await?;
    let now = Utc::now();
    let revision = AnswerRevision {
        id: Uuid::new_v4(),
        chatbot_id: req.chatbot_id,
        original_message_id: req.original_message_id,
        question_hash: content_hash(&req.question),
        question: req.question,
        question_embedding: embedding,
        original_answer: req.original_answer,
        revised_answer: req.revised_answer,
        revision_reason: req.revision_reason,
        revised_by: req.revised_by,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    store.insert_revision(&revision).await?;
    debug!(revision_id = %revision.id, chatbot_id = %revision.chatbot_id, "revision created");
    Ok(revision)
}

/// Apply a partial update. A changed question is re-embedded in the same
/// operation.
///
/// # Errors
///
/// - [`RetrievalError::Validation`] if the update touches no field, or sets
///   the question or revised answer to empty text.
/// - [`RetrievalError::NotFound`] if the revision does not exist.
pub async fn update_revision<S>(
    store: &S,
    embedder: &dyn EmbeddingProvider,
    id: Uuid,
    update: RevisionUpdate,
) -> Result<AnswerRevision>
where
    S: RevisionStore + ?Sized,
{
    if update.is_empty() {
        return Err(RetrievalError::Validation(
            "update touches no recognized field (question, revised_answer, revision_reason, is_active)"
                .to_string(),
        ));
    }
    if let Some(a) = &update.revised_answer {
        require_text("revised_answer", a)?;
    }

    let current = store
        .get_revision(id)
        .await?
        .ok_or_else(|| RetrievalError::not_found("revision", id))?;

    let question = match update.question {
        Some(text) if text != current.question => {
            require_text("question", &text)?;
            let embedding = embed_checked(embedder, &text).await?;
            Some(QuestionEdit {
                hash: content_hash(&text),
                text,
                embedding,
            })
        }
        Some(text) => {
            require_text("question", &text)?;
            None
        }
        None => None,
    };

    let patch = RevisionPatch {
        question,
        revised_answer: update.revised_answer,
        revision_reason: update.revision_reason,
        is_active: update.is_active,
    };

    let updated = store.apply_revision_patch(id, &patch).await?;
    debug!(revision_id = %id, reembedded = patch.question.is_some(), "revision updated");
    Ok(updated)
}

/// Mark a revision inactive. The row is kept for audit and stays visible
/// to direct lookup and `list(include_inactive = true)`.
pub async fn deactivate_revision<S>(store: &S, id: Uuid) -> Result<AnswerRevision>
where
    S: RevisionStore + ?Sized,
{
    let updated = store
        .apply_revision_patch(id, &RevisionPatch::deactivate())
        .await?;
    debug!(revision_id = %id, "revision deactivated");
    Ok(updated)
}

/// List a chatbot's revisions, newest first.
pub async fn list_revisions<S>(
    store: &S,
    chatbot_id: ChatbotId,
    include_inactive: bool,
) -> Result<Vec<AnswerRevision>>
where
    S: RevisionStore + ScopeStore + ?Sized,
{
    if store.get_chatbot(chatbot_id).await?.is_none() {
        return Err(RetrievalError::not_found("chatbot", chatbot_id));
    }
    store.list_revisions(chatbot_id, include_inactive).await
}

/// Revisions whose stored question hash no longer matches their text.
///
/// A healthy store returns nothing here; rows written outside the public
/// write path (manual SQL, partial restores) show up and can be re-saved
/// through [`update_revision`].
pub async fn stale_revisions<S>(store: &S, chatbot_id: ChatbotId) -> Result<Vec<AnswerRevision>>
where
    S: RevisionStore + ?Sized,
{
    Ok(store
        .list_revisions(chatbot_id, true)
        .await?
        .into_iter()
        .filter(|r| r.question_hash != content_hash(&r.question))
        .collect())
}
