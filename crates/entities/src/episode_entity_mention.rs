use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// Provenance: which episodes mention which entities, and how often. Used for
/// "which episodes mention X" and for weighting resolution evidence.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "episode_entity_mentions")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub episode_id: Uuid,
  #[sea_orm(primary_key, auto_increment = false)]
  pub entity_id: Uuid,
  pub mention_count: i32,
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
