//! Chunk import from JSON Lines.
//!
//! The ingestion pipeline (extraction, chunking, embedding) lives outside
//! this crate. It hands over finished rows, one JSON object per line:
//!
//! ```json
//! {"id":"doc1-0","content":"...","embedding":[0.1,0.2],"shared_knowledge_base_id":"<uuid>","file_id":"<uuid>","chunk_index":0}
//! ```
//!
//! Exactly one of `chatbot_id` / `shared_knowledge_base_id` must be set.
//! Import stops at the first invalid row and reports its line number;
//! rows before it stay imported.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

use retrieval_core::models::ChunkRow;
use retrieval_core::store::ChunkStore;
use retrieval_core::Chunk;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: usize,
    pub skipped_blank: usize,
}

/// Parse one JSONL line into a chunk, validating its scope columns.
pub fn parse_line(line: &str) -> Result<Chunk> {
    let row: ChunkRow = serde_json::from_str(line).context("malformed chunk row")?;
    Ok(Chunk::try_from(row)?)
}

pub async fn import_reader<S, R>(store: &S, reader: R) -> Result<ImportStats>
where
    S: ChunkStore + ?Sized,
    R: BufRead,
{
    let mut stats = ImportStats::default();
    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.with_context(|| format!("failed to read line {}", lineno))?;
        if line.trim().is_empty() {
            stats.skipped_blank += 1;
            continue;
        }
        let chunk = parse_line(&line).with_context(|| format!("line {}", lineno))?;
        store
            .insert_chunk(&chunk)
            .await
            .with_context(|| format!("line {}: chunk {}", lineno, chunk.id))?;
        debug!(chunk_id = %chunk.id, scope = %chunk.scope, "chunk imported");
        stats.imported += 1;
    }
    Ok(stats)
}

pub async fn import_file<S>(store: &S, path: &Path) -> Result<ImportStats>
where
    S: ChunkStore + ?Sized,
{
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    import_reader(store, std::io::BufReader::new(file)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrieval_core::store::memory::InMemoryStore;
    use retrieval_core::store::ScopeStore;
    use retrieval_core::{Chatbot, Scope, SharedKnowledgeBase};

    #[tokio::test]
    async fn test_import_rows_into_both_scopes() {
        let store = InMemoryStore::new(2);
        let bot = Chatbot::new("u");
        let kb = SharedKnowledgeBase::new("u", "Docs");
        store.create_chatbot(&bot).await.unwrap();
        store.create_knowledge_base(&kb).await.unwrap();

        let input = format!(
            "{{\"id\":\"p1\",\"content\":\"a\",\"embedding\":[1.0,0.0],\"chatbot_id\":\"{}\"}}\n\n\
             {{\"id\":\"s1\",\"content\":\"b\",\"embedding\":[0.0,1.0],\"shared_knowledge_base_id\":\"{}\",\"chunk_index\":3}}\n",
            bot.id, kb.id
        );
        let stats = import_reader(&store, input.as_bytes()).await.unwrap();
        assert_eq!(
            stats,
            ImportStats {
                imported: 2,
                skipped_blank: 1
            }
        );
        assert_eq!(store.count_chunks(Scope::Shared(kb.id)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_reports_bad_line() {
        let store = InMemoryStore::new(2);
        let input = "{\"id\":\"x\",\"content\":\"a\",\"embedding\":[1.0,0.0]}\n";
        let err = import_reader(&store, input.as_bytes()).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("line 1"), "{}", msg);
        assert!(msg.contains("invalid scope"), "{}", msg);
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(parse_line("not json").is_err());
    }
}
