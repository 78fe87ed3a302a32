//! Core data models: identifiers, scopes, chunks, knowledge bases, revisions.
//!
//! Scope ownership is modelled as the tagged union [`Scope`], so a chunk
//! can never belong to both a chatbot and a shared knowledge base. Wire
//! and database rows still carry the two nullable columns; they are
//! converted through [`Scope::from_columns`], which rejects illegal
//! combinations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, RetrievalError};

/// Identifier of a chatbot (the private scope owner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatbotId(pub Uuid);

impl ChatbotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatbotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChatbotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ChatbotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a shared knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnowledgeBaseId(pub Uuid);

impl KnowledgeBaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for KnowledgeBaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KnowledgeBaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for KnowledgeBaseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The partition a chunk belongs to: exactly one chatbot or exactly one
/// shared knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Private(ChatbotId),
    Shared(KnowledgeBaseId),
}

impl Scope {
    /// Build a scope from the two mutually exclusive nullable columns.
    ///
    /// Fails with [`RetrievalError::InvalidScope`] when both or neither
    /// are set.
    pub fn from_columns(
        chatbot_id: Option<ChatbotId>,
        shared_knowledge_base_id: Option<KnowledgeBaseId>,
    ) -> Result<Self> {
        match (chatbot_id, shared_knowledge_base_id) {
            (Some(c), None) => Ok(Scope::Private(c)),
            (None, Some(kb)) => Ok(Scope::Shared(kb)),
            (Some(c), Some(kb)) => Err(RetrievalError::InvalidScope(format!(
                "chunk cannot belong to both chatbot {} and shared knowledge base {}",
                c, kb
            ))),
            (None, None) => Err(RetrievalError::InvalidScope(
                "chunk must belong to a chatbot or a shared knowledge base".to_string(),
            )),
        }
    }

    /// Split back into `(chatbot_id, shared_knowledge_base_id)` columns.
    pub fn to_columns(self) -> (Option<ChatbotId>, Option<KnowledgeBaseId>) {
        match self {
            Scope::Private(c) => (Some(c), None),
            Scope::Shared(kb) => (None, Some(kb)),
        }
    }

    pub fn chatbot_id(self) -> Option<ChatbotId> {
        self.to_columns().0
    }

    pub fn knowledge_base_id(self) -> Option<KnowledgeBaseId> {
        self.to_columns().1
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Private(c) => write!(f, "chatbot:{}", c),
            Scope::Shared(kb) => write!(f, "kb:{}", kb),
        }
    }
}

impl FromStr for Scope {
    type Err = RetrievalError;

    /// Parses `chatbot:<uuid>` or `kb:<uuid>`.
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| RetrievalError::InvalidScope(format!("malformed scope: {}", s)))?;
        let uuid = Uuid::parse_str(id)
            .map_err(|e| RetrievalError::InvalidScope(format!("malformed scope id {}: {}", id, e)))?;
        match kind {
            "chatbot" => Ok(Scope::Private(ChatbotId(uuid))),
            "kb" => Ok(Scope::Shared(KnowledgeBaseId(uuid))),
            other => Err(RetrievalError::InvalidScope(format!(
                "unknown scope kind: {}",
                other
            ))),
        }
    }
}

/// A unit of ingested content with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub scope: Scope,
    /// Source file the chunk was extracted from, if any.
    pub file_id: Option<Uuid>,
    /// Position within the source file.
    pub chunk_index: Option<i64>,
}

/// A finished chunk row as produced by the ingestion pipeline, with the
/// scope still split across two nullable columns.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkRow {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub chatbot_id: Option<ChatbotId>,
    #[serde(default)]
    pub shared_knowledge_base_id: Option<KnowledgeBaseId>,
    #[serde(default)]
    pub file_id: Option<Uuid>,
    #[serde(default)]
    pub chunk_index: Option<i64>,
}

impl TryFrom<ChunkRow> for Chunk {
    type Error = RetrievalError;

    fn try_from(row: ChunkRow) -> Result<Self> {
        let scope = Scope::from_columns(row.chatbot_id, row.shared_knowledge_base_id)?;
        Ok(Chunk {
            id: row.id,
            content: row.content,
            embedding: row.embedding,
            scope,
            file_id: row.file_id,
            chunk_index: row.chunk_index,
        })
    }
}

/// An independently owned content container reusable across chatbots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedKnowledgeBase {
    pub id: KnowledgeBaseId,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SharedKnowledgeBase {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: KnowledgeBaseId::new(),
            owner_id: owner_id.into(),
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatbotKnowledgeLink {
    pub chatbot_id: ChatbotId,
    pub shared_knowledge_base_id: KnowledgeBaseId,
}

/// The slice of a chatbot record retrieval needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chatbot {
    pub id: ChatbotId,
    pub organization_id: Option<Uuid>,
    pub user_id: String,
}

impl Chatbot {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            id: ChatbotId::new(),
            organization_id: None,
            user_id: user_id.into(),
        }
    }
}

/// A human-corrected answer that may preempt generation for similar
/// future questions.
///
/// Deactivation is logical: the row stays queryable by id and through
/// `list(include_inactive = true)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRevision {
    pub id: Uuid,
    pub chatbot_id: ChatbotId,
    pub original_message_id: Option<String>,
    pub question: String,
    /// SHA-256 of the question text the embedding was computed from.
    pub question_hash: String,
    #[serde(skip_serializing)]
    pub question_embedding: Vec<f32>,
    pub original_answer: String,
    pub revised_answer: String,
    pub revision_reason: Option<String>,
    pub revised_by: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_from_columns_rejects_both() {
        let err = Scope::from_columns(Some(ChatbotId::new()), Some(KnowledgeBaseId::new()))
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidScope(_)));
    }

    #[test]
    fn test_scope_from_columns_rejects_neither() {
        let err = Scope::from_columns(None, None).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidScope(_)));
    }

    #[test]
    fn test_scope_columns_exactly_one_set() {
        let c = ChatbotId::new();
        let kb = KnowledgeBaseId::new();
        assert_eq!(Scope::Private(c).to_columns(), (Some(c), None));
        assert_eq!(Scope::Shared(kb).to_columns(), (None, Some(kb)));
    }

    #[test]
    fn test_scope_parse_display() {
        let kb = KnowledgeBaseId::new();
        let scope: Scope = format!("kb:{}", kb).parse().unwrap();
        assert_eq!(scope, Scope::Shared(kb));
        assert_eq!(scope.to_string(), format!("kb:{}", kb));
        assert!("team:123".parse::<Scope>().is_err());
        assert!("chatbot".parse::<Scope>().is_err());
    }

    #[test]
    fn test_chunk_row_with_both_scopes_rejected() {
        let json = format!(
            r#"{{"id":"c1","content":"x","embedding":[1.0],"chatbot_id":"{}","shared_knowledge_base_id":"{}"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let row: ChunkRow = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            Chunk::try_from(row),
            Err(RetrievalError::InvalidScope(_))
        ));
    }

    #[test]
    fn test_scope_serializes_tagged() {
        let c = ChatbotId::new();
        let v = serde_json::to_value(Scope::Private(c)).unwrap();
        assert_eq!(v["kind"], "private");
        assert_eq!(v["id"], c.to_string());
    }
}
