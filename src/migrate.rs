use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chatbots (
            id TEXT PRIMARY KEY,
            organization_id TEXT,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shared_knowledge_bases (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `position` preserves link order for scope resolution.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chatbot_knowledge_links (
            chatbot_id TEXT NOT NULL,
            shared_knowledge_base_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (chatbot_id, shared_knowledge_base_id),
            FOREIGN KEY (chatbot_id) REFERENCES chatbots(id) ON DELETE CASCADE,
            FOREIGN KEY (shared_knowledge_base_id) REFERENCES shared_knowledge_bases(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            embedding BLOB,
            dims INTEGER,
            chatbot_id TEXT,
            shared_knowledge_base_id TEXT,
            file_id TEXT,
            chunk_index INTEGER,
            created_at TEXT NOT NULL,
            CHECK ((chatbot_id IS NULL) <> (shared_knowledge_base_id IS NULL)),
            FOREIGN KEY (chatbot_id) REFERENCES chatbots(id) ON DELETE CASCADE,
            FOREIGN KEY (shared_knowledge_base_id) REFERENCES shared_knowledge_bases(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS answer_revisions (
            id TEXT PRIMARY KEY,
            chatbot_id TEXT NOT NULL,
            original_message_id TEXT,
            question TEXT NOT NULL,
            question_hash TEXT NOT NULL,
            question_embedding BLOB NOT NULL,
            original_answer TEXT NOT NULL,
            revised_answer TEXT NOT NULL,
            revision_reason TEXT,
            revised_by TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (chatbot_id) REFERENCES chatbots(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_chatbot ON chunks(chatbot_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_kb ON chunks(shared_knowledge_base_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_links_kb ON chatbot_knowledge_links(shared_knowledge_base_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_revisions_chatbot_active ON answer_revisions(chatbot_id, is_active)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_kbs_owner ON shared_knowledge_bases(owner_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
