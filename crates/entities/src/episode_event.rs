use sea_orm::entity::prelude::*;

/// Ordered join between an episode and the events it covers.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "episode_events")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub episode_id: Uuid,
  #[sea_orm(primary_key, auto_increment = false)]
  pub event_id: Uuid,
  pub position: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::episode::Entity",
    from = "Column::EpisodeId",
    to = "super::episode::Column::Id"
  )]
  Episode,
  #[sea_orm(
    belongs_to = "super::event::Entity",
    from = "Column::EventId",
    to = "super::event::Column::Id"
  )]
  Event,
}

impl Related<super::episode::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Episode.def()
  }
}

impl Related<super::event::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Event.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
