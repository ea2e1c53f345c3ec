use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// Immutable audit log entry, appended whenever a merge actually executes.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "entity_merge_events")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub source_entity_id: Uuid,
  pub target_entity_id: Uuid,
  pub merge_type: String,
  pub triggering_facts: Json,
  pub similarity_score: f64,
  pub created_at: chrono::DateTime<chrono::FixedOffset>,
  /// "auto" or "user:<name>".
  pub resolved_by: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
