use std::sync::Arc;

use cortex_ai::LlmClient;
use cortex_core::refresh_entity_embeddings;
use cortex_shared::AppError;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────────
// Job definition
// ──────────────────────────────────────────────────

/// Sweep active entities and refresh stale name embeddings. The hash check
/// makes redundant runs cheap, so this job carries no payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRefreshJob {}

// ──────────────────────────────────────────────────
// Job processing
// ──────────────────────────────────────────────────

pub async fn process_embedding_refresh(
  _job: EmbeddingRefreshJob,
  db: DatabaseConnection,
  llm: Arc<LlmClient>,
) -> Result<(), AppError> {
  let refreshed = refresh_entity_embeddings(&llm, &db).await?;
  if refreshed > 0 {
    tracing::info!(refreshed, "embedding refresh complete");
  }
  Ok(())
}
