use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// The unit of extraction: a bounded, contiguous slice of raw events.
/// Immutable once written; replaying an episode must be idempotent.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "episodes")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  /// Chunking rule that produced this episode, if any.
  pub definition_id: Option<Uuid>,
  pub channel: String,
  pub thread_id: Option<String>,
  pub start_time: chrono::DateTime<chrono::FixedOffset>,
  pub end_time: chrono::DateTime<chrono::FixedOffset>,
  pub event_count: i32,
  /// Pre-encoded episode text; rendered from events when absent.
  pub content: Option<String>,
  pub created_at: chrono::DateTime<chrono::FixedOffset>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::episode_event::Entity")]
  EpisodeEvent,
}

impl Related<super::episode_event::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::EpisodeEvent.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
