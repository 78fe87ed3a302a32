//! SQLite-backed implementation of the retrieval-core storage traits.
//!
//! One [`SqlitePool`] serves all four capabilities. UUIDs are stored as
//! text, timestamps as RFC 3339 text (fixed-width, so they sort
//! lexicographically), and vectors as little-endian f32 BLOBs.
//!
//! The vector index is the `chunks.embedding` column itself: queries load
//! the candidate vectors of the requested scopes and rank them in process
//! with [`rank_candidates`], which is exact. Unindexing a chunk clears its
//! embedding without deleting the row.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use retrieval_core::embedding::{blob_to_vec, check_dims, cosine_distance, vec_to_blob};
use retrieval_core::revision::RevisionPatch;
use retrieval_core::search::rank_candidates;
use retrieval_core::store::{ChunkStore, RevisionStore, ScopeStore, ScoredId, VectorIndex};
use retrieval_core::{
    AnswerRevision, Chatbot, ChatbotId, Chunk, KnowledgeBaseId, Result, RetrievalError, Scope,
    SharedKnowledgeBase,
};

use crate::config::Config;
use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
    dims: usize,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    /// Connect to the configured database and ensure the schema exists.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool, config.dims()?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Open a read-then-write transaction holding the write lock from the
    /// start, so concurrent writers wait on `busy_timeout` instead of
    /// failing with SQLITE_BUSY on lock upgrade.
    async fn begin_write(&self) -> anyhow::Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("failed to begin write transaction")
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

fn parse_uuid(s: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid uuid in database: {}", s))
}

fn scope_columns(scope: Scope) -> (Option<String>, Option<String>) {
    let (c, kb) = scope.to_columns();
    (c.map(|c| c.to_string()), kb.map(|kb| kb.to_string()))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn row_to_chatbot(row: &SqliteRow) -> anyhow::Result<Chatbot> {
    let id: String = row.try_get("id")?;
    let org: Option<String> = row.try_get("organization_id")?;
    Ok(Chatbot {
        id: ChatbotId(parse_uuid(&id)?),
        organization_id: org.as_deref().map(parse_uuid).transpose()?,
        user_id: row.try_get("user_id")?,
    })
}

fn row_to_kb(row: &SqliteRow) -> anyhow::Result<SharedKnowledgeBase> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(SharedKnowledgeBase {
        id: KnowledgeBaseId(parse_uuid(&id)?),
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> anyhow::Result<Chunk> {
    let chatbot_id: Option<String> = row.try_get("chatbot_id")?;
    let kb_id: Option<String> = row.try_get("shared_knowledge_base_id")?;
    let file_id: Option<String> = row.try_get("file_id")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;

    let scope = Scope::from_columns(
        chatbot_id.as_deref().map(parse_uuid).transpose()?.map(ChatbotId),
        kb_id.as_deref().map(parse_uuid).transpose()?.map(KnowledgeBaseId),
    )
    .map_err(|e| anyhow!("corrupt chunk row: {}", e))?;

    Ok(Chunk {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        embedding: embedding.map(|b| blob_to_vec(&b)).unwrap_or_default(),
        scope,
        file_id: file_id.as_deref().map(parse_uuid).transpose()?,
        chunk_index: row.try_get("chunk_index")?,
    })
}

fn row_to_revision(row: &SqliteRow) -> anyhow::Result<AnswerRevision> {
    let id: String = row.try_get("id")?;
    let chatbot_id: String = row.try_get("chatbot_id")?;
    let embedding: Vec<u8> = row.try_get("question_embedding")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(AnswerRevision {
        id: parse_uuid(&id)?,
        chatbot_id: ChatbotId(parse_uuid(&chatbot_id)?),
        original_message_id: row.try_get("original_message_id")?,
        question: row.try_get("question")?,
        question_hash: row.try_get("question_hash")?,
        question_embedding: blob_to_vec(&embedding),
        original_answer: row.try_get("original_answer")?,
        revised_answer: row.try_get("revised_answer")?,
        revision_reason: row.try_get("revision_reason")?,
        revised_by: row.try_get("revised_by")?,
        is_active: row.try_get("is_active")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

const CHUNK_COLUMNS: &str =
    "id, content, embedding, chatbot_id, shared_knowledge_base_id, file_id, chunk_index";

const REVISION_COLUMNS: &str = "id, chatbot_id, original_message_id, question, question_hash, \
     question_embedding, original_answer, revised_answer, revision_reason, revised_by, \
     is_active, created_at, updated_at";

async fn chatbot_exists(tx: &mut Transaction<'_, Sqlite>, id: ChatbotId) -> anyhow::Result<bool> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chatbots WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&mut **tx)
        .await?;
    Ok(n > 0)
}

async fn kb_exists(tx: &mut Transaction<'_, Sqlite>, id: KnowledgeBaseId) -> anyhow::Result<bool> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shared_knowledge_bases WHERE id = ?")
        .bind(id.to_string())
        .fetch_one(&mut **tx)
        .await?;
    Ok(n > 0)
}

impl SqliteStore {
    async fn scope_exists(&self, scope: Scope) -> Result<bool> {
        let sql = match scope {
            Scope::Private(_) => "SELECT COUNT(*) FROM chatbots WHERE id = ?",
            Scope::Shared(_) => "SELECT COUNT(*) FROM shared_knowledge_bases WHERE id = ?",
        };
        let id = match scope {
            Scope::Private(c) => c.to_string(),
            Scope::Shared(kb) => kb.to_string(),
        };
        let n: i64 = sqlx::query_scalar(sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .context("failed to check scope")?;
        Ok(n > 0)
    }
}

#[async_trait]
impl ScopeStore for SqliteStore {
    async fn create_chatbot(&self, chatbot: &Chatbot) -> Result<()> {
        sqlx::query(
            "INSERT INTO chatbots (id, organization_id, user_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(chatbot.id.to_string())
        .bind(chatbot.organization_id.map(|o| o.to_string()))
        .bind(&chatbot.user_id)
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .context("failed to insert chatbot")?;
        Ok(())
    }

    async fn get_chatbot(&self, id: ChatbotId) -> Result<Option<Chatbot>> {
        let row = sqlx::query("SELECT id, organization_id, user_id FROM chatbots WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("failed to load chatbot")?;
        Ok(row.as_ref().map(row_to_chatbot).transpose()?)
    }

    async fn delete_chatbot(&self, id: ChatbotId) -> Result<()> {
        let res = sqlx::query("DELETE FROM chatbots WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("failed to delete chatbot")?;
        if res.rows_affected() == 0 {
            return Err(RetrievalError::not_found("chatbot", id));
        }
        Ok(())
    }

    async fn create_knowledge_base(&self, kb: &SharedKnowledgeBase) -> Result<()> {
        if kb.name.trim().is_empty() {
            return Err(RetrievalError::Validation(
                "knowledge base name must not be empty".to_string(),
            ));
        }
        sqlx::query(
            r#"
            INSERT INTO shared_knowledge_bases (id, owner_id, name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kb.id.to_string())
        .bind(&kb.owner_id)
        .bind(&kb.name)
        .bind(&kb.description)
        .bind(ts(&kb.created_at))
        .bind(ts(&kb.updated_at))
        .execute(&self.pool)
        .await
        .context("failed to insert knowledge base")?;
        Ok(())
    }

    async fn get_knowledge_base(&self, id: KnowledgeBaseId) -> Result<Option<SharedKnowledgeBase>> {
        let row = sqlx::query(
            "SELECT id, owner_id, name, description, created_at, updated_at \
             FROM shared_knowledge_bases WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load knowledge base")?;
        Ok(row.as_ref().map(row_to_kb).transpose()?)
    }

    async fn update_knowledge_base(&self, kb: &SharedKnowledgeBase) -> Result<SharedKnowledgeBase> {
        let res = sqlx::query(
            "UPDATE shared_knowledge_bases SET name = ?, description = ?, updated_at = ? \
             WHERE id = ? AND owner_id = ?",
        )
        .bind(&kb.name)
        .bind(&kb.description)
        .bind(ts(&Utc::now()))
        .bind(kb.id.to_string())
        .bind(&kb.owner_id)
        .execute(&self.pool)
        .await
        .context("failed to update knowledge base")?;
        if res.rows_affected() == 0 {
            return Err(RetrievalError::not_found("knowledge base", kb.id));
        }
        self.get_knowledge_base(kb.id)
            .await?
            .ok_or_else(|| RetrievalError::not_found("knowledge base", kb.id))
    }

    async fn delete_knowledge_base(&self, id: KnowledgeBaseId) -> Result<()> {
        let res = sqlx::query("DELETE FROM shared_knowledge_bases WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("failed to delete knowledge base")?;
        if res.rows_affected() == 0 {
            return Err(RetrievalError::not_found("knowledge base", id));
        }
        Ok(())
    }

    async fn list_knowledge_bases_by_owner(&self, owner_id: &str) -> Result<Vec<SharedKnowledgeBase>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, name, description, created_at, updated_at \
             FROM shared_knowledge_bases WHERE owner_id = ? ORDER BY created_at DESC, id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list knowledge bases")?;
        Ok(rows.iter().map(row_to_kb).collect::<anyhow::Result<_>>()?)
    }

    async fn list_knowledge_bases_for_chatbot(
        &self,
        chatbot_id: ChatbotId,
    ) -> Result<Vec<SharedKnowledgeBase>> {
        let rows = sqlx::query(
            r#"
            SELECT kb.id, kb.owner_id, kb.name, kb.description, kb.created_at, kb.updated_at
            FROM shared_knowledge_bases kb
            JOIN chatbot_knowledge_links l ON l.shared_knowledge_base_id = kb.id
            WHERE l.chatbot_id = ?
            ORDER BY kb.name, kb.id
            "#,
        )
        .bind(chatbot_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("failed to list linked knowledge bases")?;
        Ok(rows.iter().map(row_to_kb).collect::<anyhow::Result<_>>()?)
    }

    async fn linked_knowledge_base_ids(&self, chatbot_id: ChatbotId) -> Result<Vec<KnowledgeBaseId>> {
        // A single statement reads one consistent snapshot of the link set.
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT shared_knowledge_base_id FROM chatbot_knowledge_links \
             WHERE chatbot_id = ? ORDER BY position",
        )
        .bind(chatbot_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("failed to load links")?;
        Ok(ids
            .iter()
            .map(|s| parse_uuid(s).map(KnowledgeBaseId))
            .collect::<anyhow::Result<_>>()?)
    }

    async fn replace_links(&self, chatbot_id: ChatbotId, kb_ids: &[KnowledgeBaseId]) -> Result<()> {
        let mut tx = self.begin_write().await?;

        if !chatbot_exists(&mut tx, chatbot_id).await? {
            return Err(RetrievalError::not_found("chatbot", chatbot_id));
        }

        let mut deduped: Vec<KnowledgeBaseId> = Vec::with_capacity(kb_ids.len());
        for id in kb_ids {
            if !deduped.contains(id) {
                deduped.push(*id);
            }
        }
        for id in &deduped {
            if !kb_exists(&mut tx, *id).await? {
                return Err(RetrievalError::not_found("knowledge base", id));
            }
        }

        sqlx::query("DELETE FROM chatbot_knowledge_links WHERE chatbot_id = ?")
            .bind(chatbot_id.to_string())
            .execute(&mut *tx)
            .await
            .context("failed to clear links")?;

        let now = ts(&Utc::now());
        for (position, id) in deduped.iter().enumerate() {
            sqlx::query(
                "INSERT INTO chatbot_knowledge_links \
                 (chatbot_id, shared_knowledge_base_id, position, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(chatbot_id.to_string())
            .bind(id.to_string())
            .bind(position as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .context("failed to insert link")?;
        }

        tx.commit().await.context("failed to commit links")?;
        Ok(())
    }

    async fn attach_link(&self, chatbot_id: ChatbotId, kb_id: KnowledgeBaseId) -> Result<()> {
        let mut tx = self.begin_write().await?;
        if !chatbot_exists(&mut tx, chatbot_id).await? {
            return Err(RetrievalError::not_found("chatbot", chatbot_id));
        }
        if !kb_exists(&mut tx, kb_id).await? {
            return Err(RetrievalError::not_found("knowledge base", kb_id));
        }

        sqlx::query(
            r#"
            INSERT INTO chatbot_knowledge_links (chatbot_id, shared_knowledge_base_id, position, created_at)
            SELECT ?, ?, COALESCE(MAX(position) + 1, 0), ?
            FROM chatbot_knowledge_links WHERE chatbot_id = ?
            ON CONFLICT(chatbot_id, shared_knowledge_base_id) DO NOTHING
            "#,
        )
        .bind(chatbot_id.to_string())
        .bind(kb_id.to_string())
        .bind(ts(&Utc::now()))
        .bind(chatbot_id.to_string())
        .execute(&mut *tx)
        .await
        .context("failed to attach link")?;

        tx.commit().await.context("failed to commit link")?;
        Ok(())
    }

    async fn detach_link(&self, chatbot_id: ChatbotId, kb_id: KnowledgeBaseId) -> Result<()> {
        sqlx::query(
            "DELETE FROM chatbot_knowledge_links WHERE chatbot_id = ? AND shared_knowledge_base_id = ?",
        )
        .bind(chatbot_id.to_string())
        .bind(kb_id.to_string())
        .execute(&self.pool)
        .await
        .context("failed to detach link")?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        if chunk.id.is_empty() {
            return Err(RetrievalError::Validation("chunk id must not be empty".to_string()));
        }
        check_dims(self.dims, &chunk.embedding)?;
        if !self.scope_exists(chunk.scope).await? {
            return Err(RetrievalError::InvalidScope(format!(
                "chunk {} references unknown scope {}",
                chunk.id, chunk.scope
            )));
        }

        let (chatbot_id, kb_id) = scope_columns(chunk.scope);
        sqlx::query(
            r#"
            INSERT INTO chunks (id, content, embedding, dims, chatbot_id, shared_knowledge_base_id,
                                file_id, chunk_index, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                embedding = excluded.embedding,
                dims = excluded.dims,
                chatbot_id = excluded.chatbot_id,
                shared_knowledge_base_id = excluded.shared_knowledge_base_id,
                file_id = excluded.file_id,
                chunk_index = excluded.chunk_index
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.content)
        .bind(vec_to_blob(&chunk.embedding))
        .bind(chunk.embedding.len() as i64)
        .bind(chatbot_id)
        .bind(kb_id)
        .bind(chunk.file_id.map(|f| f.to_string()))
        .bind(chunk.chunk_index)
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await
        .context("failed to insert chunk")?;
        Ok(())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM chunks WHERE id IN ({})",
            CHUNK_COLUMNS,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("failed to load chunks")?;
        Ok(rows.iter().map(row_to_chunk).collect::<anyhow::Result<_>>()?)
    }

    async fn list_chunks(&self, scope: Scope) -> Result<Vec<Chunk>> {
        let (chatbot_id, kb_id) = scope_columns(scope);
        let sql = format!(
            "SELECT {} FROM chunks WHERE chatbot_id IS ? AND shared_knowledge_base_id IS ? \
             ORDER BY chunk_index IS NULL, chunk_index, id",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(chatbot_id)
            .bind(kb_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to list chunks")?;
        Ok(rows.iter().map(row_to_chunk).collect::<anyhow::Result<_>>()?)
    }

    async fn count_chunks(&self, scope: Scope) -> Result<usize> {
        let (chatbot_id, kb_id) = scope_columns(scope);
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE chatbot_id IS ? AND shared_knowledge_base_id IS ?",
        )
        .bind(chatbot_id)
        .bind(kb_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count chunks")?;
        Ok(n as usize)
    }

    async fn delete_chunks_by_file(&self, file_id: Uuid) -> Result<u64> {
        let res = sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await
            .context("failed to delete chunks by file")?;
        Ok(res.rows_affected())
    }

    async fn delete_chunks_by_scope(&self, scope: Scope) -> Result<u64> {
        let (chatbot_id, kb_id) = scope_columns(scope);
        let res = sqlx::query(
            "DELETE FROM chunks WHERE chatbot_id IS ? AND shared_knowledge_base_id IS ?",
        )
        .bind(chatbot_id)
        .bind(kb_id)
        .execute(&self.pool)
        .await
        .context("failed to delete chunks by scope")?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn insert(&self, id: &str, vector: &[f32], scope: Scope) -> Result<()> {
        check_dims(self.dims, vector)?;
        let (chatbot_id, kb_id) = scope_columns(scope);
        let res = sqlx::query(
            "UPDATE chunks SET embedding = ?, dims = ? \
             WHERE id = ? AND chatbot_id IS ? AND shared_knowledge_base_id IS ?",
        )
        .bind(vec_to_blob(vector))
        .bind(vector.len() as i64)
        .bind(id)
        .bind(chatbot_id)
        .bind(kb_id)
        .execute(&self.pool)
        .await
        .context("failed to index vector")?;
        if res.rows_affected() == 0 {
            return Err(RetrievalError::not_found("chunk", id));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE chunks SET embedding = NULL, dims = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to unindex vector")?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], scopes: &[Scope], k: usize) -> Result<Vec<ScoredId>> {
        check_dims(self.dims, vector)?;
        let chatbot_ids: Vec<String> = scopes
            .iter()
            .filter_map(|s| s.chatbot_id())
            .map(|c| c.to_string())
            .collect();
        let kb_ids: Vec<String> = scopes
            .iter()
            .filter_map(|s| s.knowledge_base_id())
            .map(|kb| kb.to_string())
            .collect();
        if chatbot_ids.is_empty() && kb_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL \
             AND (chatbot_id IN ({}) OR shared_knowledge_base_id IN ({}))",
            placeholders(chatbot_ids.len().max(1)),
            placeholders(kb_ids.len().max(1)),
        );
        let mut query = sqlx::query(&sql);
        // An unused IN list still needs one bind; NULL matches nothing.
        if chatbot_ids.is_empty() {
            query = query.bind(None::<String>);
        }
        for id in &chatbot_ids {
            query = query.bind(id);
        }
        if kb_ids.is_empty() {
            query = query.bind(None::<String>);
        }
        for id in &kb_ids {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("failed to load candidate vectors")?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").context("bad chunk row")?;
            let blob: Vec<u8> = row.try_get("embedding").context("bad chunk row")?;
            let stored = blob_to_vec(&blob);
            check_dims(self.dims, &stored)?;
            candidates.push(ScoredId {
                distance: cosine_distance(vector, &stored),
                id,
            });
        }
        Ok(rank_candidates(candidates, k))
    }
}

#[async_trait]
impl RevisionStore for SqliteStore {
    async fn insert_revision(&self, revision: &AnswerRevision) -> Result<()> {
        check_dims(self.dims, &revision.question_embedding)?;
        if !self.scope_exists(Scope::Private(revision.chatbot_id)).await? {
            return Err(RetrievalError::InvalidScope(format!(
                "revision references unknown chatbot {}",
                revision.chatbot_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO answer_revisions (id, chatbot_id, original_message_id, question, question_hash,
                                          question_embedding, original_answer, revised_answer,
                                          revision_reason, revised_by, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(revision.id.to_string())
        .bind(revision.chatbot_id.to_string())
        .bind(&revision.original_message_id)
        .bind(&revision.question)
        .bind(&revision.question_hash)
        .bind(vec_to_blob(&revision.question_embedding))
        .bind(&revision.original_answer)
        .bind(&revision.revised_answer)
        .bind(&revision.revision_reason)
        .bind(&revision.revised_by)
        .bind(revision.is_active)
        .bind(ts(&revision.created_at))
        .bind(ts(&revision.updated_at))
        .execute(&self.pool)
        .await
        .context("failed to insert revision")?;
        Ok(())
    }

    async fn get_revision(&self, id: Uuid) -> Result<Option<AnswerRevision>> {
        let sql = format!("SELECT {} FROM answer_revisions WHERE id = ?", REVISION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("failed to load revision")?;
        Ok(row.as_ref().map(row_to_revision).transpose()?)
    }

    async fn apply_revision_patch(&self, id: Uuid, patch: &RevisionPatch) -> Result<AnswerRevision> {
        if let Some(q) = patch.question() {
            check_dims(self.dims, q.embedding())?;
        }

        let mut tx = self.begin_write().await?;
        let sql = format!("SELECT {} FROM answer_revisions WHERE id = ?", REVISION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .context("failed to load revision")?;
        let mut revision = match row {
            Some(r) => row_to_revision(&r)?,
            None => return Err(RetrievalError::not_found("revision", id)),
        };

        patch.apply_to(&mut revision, Utc::now());

        sqlx::query(
            r#"
            UPDATE answer_revisions SET
                question = ?, question_hash = ?, question_embedding = ?,
                revised_answer = ?, revision_reason = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&revision.question)
        .bind(&revision.question_hash)
        .bind(vec_to_blob(&revision.question_embedding))
        .bind(&revision.revised_answer)
        .bind(&revision.revision_reason)
        .bind(revision.is_active)
        .bind(ts(&revision.updated_at))
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .context("failed to update revision")?;

        tx.commit().await.context("failed to commit revision")?;
        Ok(revision)
    }

    async fn list_revisions(
        &self,
        chatbot_id: ChatbotId,
        include_inactive: bool,
    ) -> Result<Vec<AnswerRevision>> {
        let sql = if include_inactive {
            format!(
                "SELECT {} FROM answer_revisions WHERE chatbot_id = ? ORDER BY created_at DESC, id",
                REVISION_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM answer_revisions WHERE chatbot_id = ? AND is_active = 1 \
                 ORDER BY created_at DESC, id",
                REVISION_COLUMNS
            )
        };
        let rows = sqlx::query(&sql)
            .bind(chatbot_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("failed to list revisions")?;
        Ok(rows.iter().map(row_to_revision).collect::<anyhow::Result<_>>()?)
    }

    async fn active_revisions(&self, chatbot_id: ChatbotId) -> Result<Vec<AnswerRevision>> {
        self.list_revisions(chatbot_id, false).await
    }
}
