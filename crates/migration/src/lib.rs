pub use sea_orm_migration::*;

mod m20260712_01_create_event_store_tables;
mod m20260712_02_create_graph_tables;
mod m20260712_03_create_mention_tables;
mod m20260712_04_create_merge_tables;
mod m20260712_05_create_embeddings_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20260712_01_create_event_store_tables::Migration),
      Box::new(m20260712_02_create_graph_tables::Migration),
      Box::new(m20260712_03_create_mention_tables::Migration),
      Box::new(m20260712_04_create_merge_tables::Migration),
      Box::new(m20260712_05_create_embeddings_table::Migration),
    ]
  }
}
