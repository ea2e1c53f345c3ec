use apalis_postgres::PostgresStorage;
use sea_orm::DatabaseConnection;

use cortex_worker::ExtractEpisodeJob;

#[derive(Clone)]
pub struct AppState {
  pub db: DatabaseConnection,
  pub extract_storage: PostgresStorage<ExtractEpisodeJob>,
}

impl AppState {
  #[must_use]
  pub const fn new(
    db: DatabaseConnection,
    extract_storage: PostgresStorage<ExtractEpisodeJob>,
  ) -> Self {
    Self {
      db,
      extract_storage,
    }
  }
}
