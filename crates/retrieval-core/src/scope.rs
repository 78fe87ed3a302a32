//! Scope resolver: the effective retrieval scope of a chatbot.
//!
//! The effective scope is the chatbot's own private scope followed by every
//! linked shared knowledge base, in link order. Pure and read-only.

use crate::error::{Result, RetrievalError};
use crate::models::{ChatbotId, Scope};
use crate::search::dedup_scopes;
use crate::store::ScopeStore;

/// Resolve `{chatbot} ∪ {linked knowledge bases}` for a chatbot.
///
/// The link set is read as a single snapshot, so a concurrent
/// [`ScopeStore::replace_links`] is observed entirely or not at all.
///
/// # Errors
///
/// [`RetrievalError::NotFound`] if the chatbot does not exist.
pub async fn resolve_scope<S>(store: &S, chatbot_id: ChatbotId) -> Result<Vec<Scope>>
where
    S: ScopeStore + ?Sized,
{
    if store.get_chatbot(chatbot_id).await?.is_none() {
        return Err(RetrievalError::not_found("chatbot", chatbot_id));
    }

    let linked = store.linked_knowledge_base_ids(chatbot_id).await?;
    let mut scopes = Vec::with_capacity(linked.len() + 1);
    scopes.push(Scope::Private(chatbot_id));
    scopes.extend(linked.into_iter().map(Scope::Shared));
    Ok(dedup_scopes(&scopes))
}
