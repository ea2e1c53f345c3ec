use sea_orm::entity::prelude::*;

/// One dense vector per `(target_type, target_id, model)`. Refreshed only
/// when `source_text_hash` changes.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "embeddings")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  /// Currently always `entity`; kept open for future targets.
  pub target_type: String,
  pub target_id: Uuid,
  pub model: String,
  pub embedding: PgVector,
  pub dimension: i32,
  /// SHA-256 hex of the text that produced the vector.
  pub source_text_hash: String,
  pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
