//! Embedding backfill and coverage statistics.

use async_trait::async_trait;
use tracing::{info, warn};

use medchat_embeddings::DomainTextBuilder;
use medchat_scheduler::jobs::backfill::validate_batch_size;
use medchat_scheduler::{BackfillReport, BackfillRunner};
use medchat_storage::EmbeddingStats;

use crate::error::ServiceError;
use crate::service::ChatService;

/// Restricts which rows a backfill pass looks at.
#[derive(Debug, Clone, Default)]
pub struct BackfillScope {
    /// Only messages of this conversation
    pub conversation_id: Option<String>,
    /// Only memories of this owner
    pub owner_id: Option<String>,
}

/// Where the next pass resumes in each table.
///
/// Rows that keep failing (blank content, a backend that rejects them)
/// stay unembedded, so a pass that restarted from the top every time would
/// select the same rows forever. Each pass continues after the last row
/// the previous one looked at and wraps around once it reaches the end.
#[derive(Debug, Default)]
pub(crate) struct BackfillCursor {
    messages: Option<String>,
    memories: Option<String>,
}

/// The resume point after a page: its last row, or `None` (start over)
/// when the page came back short.
fn next_cursor<T>(page: &[T], batch_size: usize, id: impl Fn(&T) -> &str) -> Option<String> {
    if page.len() < batch_size {
        return None;
    }
    page.last().map(|row| id(row).to_string())
}

impl ChatService {
    /// Embed up to `batch_size` messages and `batch_size` memories that
    /// have no vector yet.
    ///
    /// Items are embedded as one batch per table; an item whose slot comes
    /// back empty, or whose write fails, is logged and counted as failed.
    /// Passes are serialized and walk the tables round-robin, so failing
    /// rows never hide the rows behind them.
    pub async fn backfill(
        &self,
        batch_size: usize,
        scope: &BackfillScope,
    ) -> Result<BackfillReport, ServiceError> {
        validate_batch_size(batch_size)?;
        let mut report = BackfillReport::default();
        let mut cursor = self.backfill_cursor.lock().await;

        let messages = self
            .store
            .messages_missing_embeddings(
                batch_size,
                scope.conversation_id.as_deref(),
                cursor.messages.as_deref(),
            )
            .await?;
        cursor.messages = next_cursor(&messages, batch_size, |m| m.id.as_str());
        let texts: Vec<String> = messages.iter().map(DomainTextBuilder::for_message).collect();
        let vectors = self.embedder.embed_batch(&texts).await;

        for (message, vector) in messages.iter().zip(vectors) {
            let stored = match vector {
                Some(v) => self
                    .store
                    .set_message_embedding(&message.id, v.into_vec())
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("embedding failed".to_string()),
            };
            match stored {
                Ok(()) => report.messages_processed += 1,
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "Message backfill failed");
                    report.messages_failed += 1;
                }
            }
        }

        let memories = self
            .store
            .memories_missing_embeddings(
                batch_size,
                scope.owner_id.as_deref(),
                cursor.memories.as_deref(),
            )
            .await?;
        cursor.memories = next_cursor(&memories, batch_size, |m| m.id.as_str());
        let texts: Vec<String> = memories.iter().map(DomainTextBuilder::memory_text).collect();
        let vectors = self.embedder.embed_batch(&texts).await;

        for (memory, vector) in memories.iter().zip(vectors) {
            let stored = match vector {
                Some(v) => self
                    .store
                    .set_memory_embedding(&memory.id, v.into_vec())
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("embedding failed".to_string()),
            };
            match stored {
                Ok(()) => report.memories_processed += 1,
                Err(e) => {
                    warn!(memory_id = %memory.id, error = %e, "Memory backfill failed");
                    report.memories_failed += 1;
                }
            }
        }

        info!(
            messages_processed = report.messages_processed,
            messages_failed = report.messages_failed,
            memories_processed = report.memories_processed,
            memories_failed = report.memories_failed,
            "Backfill complete"
        );
        Ok(report)
    }

    /// Share of messages and memories carrying a vector.
    pub async fn embedding_stats(&self) -> Result<EmbeddingStats, ServiceError> {
        Ok(self.store.embedding_stats().await?)
    }
}

#[async_trait]
impl BackfillRunner for ChatService {
    async fn run_backfill(&self, batch_size: usize) -> Result<BackfillReport, String> {
        self.backfill(batch_size, &BackfillScope::default())
            .await
            .map_err(|e| e.to_string())
    }
}
