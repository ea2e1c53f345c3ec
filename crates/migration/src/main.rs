use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
  cli::run_cli(cortex_migration::Migrator).await
}
