use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// An alternative label for an entity: a name variant or an identity handle
/// (email, phone, handle, username). `(alias_type, normalized)` identifies a
/// bucket; multiple owners are only legal when every row is `is_shared`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "entity_aliases")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub entity_id: Uuid,
  /// Raw string as it appeared in the source.
  pub alias: String,
  pub alias_type: String,
  /// Type-specific canonical form used for matching.
  pub normalized: String,
  /// Legitimately shared identifier (e.g. a family phone line). Exact-match
  /// resolution must not use shared aliases.
  pub is_shared: bool,
  pub created_at: chrono::DateTime<chrono::FixedOffset>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::entity::Entity",
    from = "Column::EntityId",
    to = "super::entity::Column::Id"
  )]
  Entity,
}

impl Related<super::entity::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Entity.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
