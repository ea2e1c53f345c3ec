use std::sync::Arc;

use apalis::prelude::TaskSink;
use apalis_postgres::PostgresStorage;
use cortex_ai::{EmbeddingBatcher, LlmClient};
use cortex_core::process_episode;
use cortex_shared::AppError;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EmbeddingRefreshJob, MergeScanJob};

// ──────────────────────────────────────────────────
// Job definition
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractEpisodeJob {
  pub episode_id: Uuid,
  pub custom_instructions: Option<String>,
}

// ──────────────────────────────────────────────────
// Job processing
// ──────────────────────────────────────────────────

/// Run the extraction pipeline for one episode, then schedule the merge
/// scan and an embedding refresh for whatever it touched.
pub async fn process_extract_episode(
  job: ExtractEpisodeJob,
  db: DatabaseConnection,
  llm: Arc<LlmClient>,
  batcher: EmbeddingBatcher,
  mut merge_storage: PostgresStorage<MergeScanJob>,
  mut embedding_storage: PostgresStorage<EmbeddingRefreshJob>,
) -> Result<(), AppError> {
  tracing::info!(episode_id = %job.episode_id, "processing episode extraction");

  let outcome = process_episode(
    job.episode_id,
    job.custom_instructions.as_deref(),
    &llm,
    &batcher,
    &db,
  )
  .await?;

  tracing::info!(
    episode_id = %job.episode_id,
    new_entities = outcome.new_entities,
    existing_entities = outcome.existing_entities,
    new_relationships = outcome.new_relationships,
    aliases_created = outcome.aliases_created,
    entity_mentions = outcome.entity_mentions_created,
    errors = outcome.errors.len(),
    "episode extraction finished"
  );

  if !outcome.touched_entity_ids.is_empty() {
    merge_storage
      .push(MergeScanJob {
        entity_ids: outcome.touched_entity_ids,
      })
      .await
      .map_err(AppError::from)?;

    embedding_storage
      .push(EmbeddingRefreshJob {})
      .await
      .map_err(AppError::from)?;
  }

  Ok(())
}
