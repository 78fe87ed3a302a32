//! # Retrieval Core
//!
//! Shared, runtime-agnostic logic for kb-override: the scope model, store
//! traits, similarity search, the answer-revision write path, override
//! matching, and the orchestrator that decides between serving a
//! human-corrected answer and retrieving context for generation.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Backends implement the traits in [`store`];
//! [`store::memory::InMemoryStore`] ships here for tests and embedding.
//!
//! ## Decision flow
//!
//! ```text
//! query embedding
//!       │
//!       ▼
//! ┌──────────────┐  match ≥ threshold   ┌──────────────────┐
//! │ find_override│─────────────────────▶│ OVERRIDE_SERVED   │
//! └──────┬───────┘                      └──────────────────┘
//!        │ none
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │resolve_scope │──▶│    search    │──▶│ CONTEXT_RETRIEVED │
//! └──────────────┘   └──────────────┘   └──────────────────┘
//! ```

pub mod embedding;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod overrides;
pub mod revision;
pub mod scope;
pub mod search;
pub mod store;

pub use error::{Result, RetrievalError};
pub use models::{
    AnswerRevision, Chatbot, ChatbotId, ChatbotKnowledgeLink, Chunk, KnowledgeBaseId, Scope,
    SharedKnowledgeBase,
};
pub use orchestrator::{orchestrate, ContextResult, OverrideResult, RetrievalOutcome, RetrievalParams};
