use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// A raw communication event written by a source adapter. The pipeline only
/// reads this table; `(source_adapter, source_id)` is unique upstream.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "events")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub channel: String,
  pub timestamp: chrono::DateTime<chrono::FixedOffset>,
  pub thread_id: Option<String>,
  pub content: String,
  /// sent | received | observed | created | updated | deleted
  pub direction: String,
  /// Display name of the event author, when the adapter knows it.
  pub sender: Option<String>,
  pub source_adapter: String,
  pub source_id: String,
  pub created_at: chrono::DateTime<chrono::FixedOffset>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
