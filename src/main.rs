use std::sync::Arc;

use apalis_postgres::PostgresStorage;
use cortex_ai::LlmClient;
use cortex_migration::{Migrator, MigratorTrait};
use cortex_server::server;
use cortex_shared::{APP_ENV, AppError};
use cortex_worker::{EmbeddingRefreshJob, ExtractEpisodeJob, MergeScanJob, worker};
use sea_orm::Database;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let db = Database::connect(APP_ENV.database_url.as_str()).await?;

  // Apply all pending migrations
  // https://www.sea-ql.org/SeaORM/docs/migration/running-migration/#migrating-programmatically
  Migrator::up(&db, None).await?;
  PostgresStorage::setup(&db.get_postgres_connection_pool()).await?;

  let extract_storage =
    PostgresStorage::<ExtractEpisodeJob>::new(db.get_postgres_connection_pool());
  let merge_storage = PostgresStorage::<MergeScanJob>::new(db.get_postgres_connection_pool());
  let embedding_storage =
    PostgresStorage::<EmbeddingRefreshJob>::new(db.get_postgres_connection_pool());

  let llm = Arc::new(LlmClient::from_env());

  let _ = tokio::try_join!(
    worker(
      &db,
      llm,
      extract_storage.clone(),
      merge_storage,
      embedding_storage
    ),
    server(db.clone(), extract_storage)
  );

  Ok(())
}
