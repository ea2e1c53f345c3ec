mod jobs;
pub use jobs::*;

use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::{Monitor, WorkerBuilder};
use apalis_postgres::PostgresStorage;
use cortex_ai::{EmbeddingBatcher, LlmClient};
use cortex_shared::{APP_ENV, AppError};
use sea_orm::DatabaseConnection;

/// Run the worker monitor: one worker per job kind, all sharing the single
/// `LlmClient` collaborator and its embedding batcher. Shuts down cleanly on
/// SIGINT, letting in-flight episodes finish or unwind without partial
/// commits.
pub async fn worker(
  db: &DatabaseConnection,
  llm: Arc<LlmClient>,
  extract_storage: PostgresStorage<ExtractEpisodeJob>,
  merge_storage: PostgresStorage<MergeScanJob>,
  embedding_storage: PostgresStorage<EmbeddingRefreshJob>,
) -> Result<(), AppError> {
  let batcher = EmbeddingBatcher::spawn(
    llm.clone(),
    APP_ENV.embedding_batch_size,
    Duration::from_millis(APP_ENV.embedding_flush_ms),
  );

  let extract_db = db.clone();
  let extract_llm = llm.clone();
  let extract_merge_storage = merge_storage.clone();
  let extract_embedding_storage = embedding_storage.clone();

  let merge_db = db.clone();
  let embedding_db = db.clone();
  let embedding_llm = llm;

  Monitor::new()
    .register(move |_run_id| {
      let db = extract_db.clone();
      let llm = extract_llm.clone();
      let batcher = batcher.clone();
      let merge_storage = extract_merge_storage.clone();
      let embedding_storage = extract_embedding_storage.clone();

      WorkerBuilder::new("cortex-extract-episode")
        .backend(extract_storage.clone())
        .build(move |job: ExtractEpisodeJob| {
          let db = db.clone();
          let llm = llm.clone();
          let batcher = batcher.clone();
          let merge_storage = merge_storage.clone();
          let embedding_storage = embedding_storage.clone();
          async move {
            process_extract_episode(job, db, llm, batcher, merge_storage, embedding_storage)
              .await
              .map_err(WorkerError::from)
          }
        })
    })
    .register(move |_run_id| {
      let db = merge_db.clone();

      WorkerBuilder::new("cortex-merge-scan")
        .backend(merge_storage.clone())
        .build(move |job: MergeScanJob| {
          let db = db.clone();
          async move { process_merge_scan(job, db).await.map_err(WorkerError::from) }
        })
    })
    .register(move |_run_id| {
      let db = embedding_db.clone();
      let llm = embedding_llm.clone();

      WorkerBuilder::new("cortex-embedding-refresh")
        .backend(embedding_storage.clone())
        .build(move |job: EmbeddingRefreshJob| {
          let db = db.clone();
          let llm = llm.clone();
          async move {
            process_embedding_refresh(job, db, llm)
              .await
              .map_err(WorkerError::from)
          }
        })
    })
    .shutdown_timeout(Duration::from_secs(5))
    .run_with_signal(tokio::signal::ctrl_c())
    .await
    .map_err(|err| AppError::new(anyhow::Error::new(err)))?;

  Ok(())
}
