use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// A durable node in the knowledge graph. Never deleted; a merged entity is
/// tombstoned via `merged_into` and excluded from reads.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "entities")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub canonical_name: String,
  /// One of the fixed 8 kinds (0 Entity .. 7 Pet).
  pub entity_type_id: i32,
  pub summary: Option<String>,
  /// How this row came to exist, e.g. `episode:<uuid>`.
  pub origin: Option<String>,
  pub confidence: f32,
  /// Tombstone back-reference. Non-null means reads must skip this row.
  pub merged_into: Option<Uuid>,
  pub created_at: chrono::DateTime<chrono::FixedOffset>,
  pub updated_at: chrono::DateTime<chrono::FixedOffset>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::entity_alias::Entity")]
  EntityAlias,
}

impl Related<super::entity_alias::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::EntityAlias.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
