use sea_orm_migration::{
  prelude::*,
  schema::{custom, integer, text, timestamp_with_time_zone, uuid},
  sea_orm::Statement,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Embedding::Table)
          .if_not_exists()
          .col(uuid(Embedding::Id).primary_key())
          .col(text(Embedding::TargetType))
          .col(uuid(Embedding::TargetId))
          .col(text(Embedding::Model))
          .col(custom(Embedding::Embedding, "vector(1024)").not_null())
          .col(integer(Embedding::Dimension))
          .col(text(Embedding::SourceTextHash))
          .col(
            timestamp_with_time_zone(Embedding::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_embeddings_target")
          .table(Embedding::Table)
          .col(Embedding::TargetType)
          .col(Embedding::TargetId)
          .col(Embedding::Model)
          .unique()
          .to_owned(),
      )
      .await?;

    // HNSW index for cosine-nearest candidate lookups during resolution
    manager
      .get_connection()
      .execute_raw(Statement::from_string(
        manager.get_database_backend(),
        "CREATE INDEX idx_embeddings_vector_hnsw ON embeddings USING hnsw (embedding vector_cosine_ops);",
      ))
      .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Embedding::Table).to_owned())
      .await?;

    Ok(())
  }
}

#[derive(Iden)]
pub enum Embedding {
  Table,

  Id,
  TargetType, // currently always "entity"
  TargetId,
  Model,          // embedding model id, part of the key
  Embedding,      // vector(1024)
  Dimension,      // stored dimension of the vector
  SourceTextHash, // SHA-256 hex of the text that produced the vector
  CreatedAt,
}
