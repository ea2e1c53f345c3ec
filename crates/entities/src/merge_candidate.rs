use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// A proposed deduplication of two entities. Mutable: `status` transitions
/// through pending → merged/rejected/deferred. `(entity_a_id, entity_b_id)`
/// is unique, which also serializes concurrent merge scans.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "merge_candidates")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub entity_a_id: Uuid,
  pub entity_b_id: Uuid,
  pub confidence: f64,
  pub auto_eligible: bool,
  /// hard_identifier | multiple_hard_identifiers | compound |
  /// soft_accumulation | conflict
  pub reason: String,
  /// Serialized list of the facts that matched.
  pub matching_facts: Json,
  /// Serialized map, e.g. `{"compound_type": "name_birthdate"}`.
  pub context: Json,
  /// Serialized list of conflict records; non-empty disables auto-merge.
  pub conflicts: Json,
  /// pending | merged | rejected | deferred
  pub status: String,
  pub created_at: chrono::DateTime<chrono::FixedOffset>,
  pub resolved_at: Option<chrono::DateTime<chrono::FixedOffset>>,
  pub resolved_by: Option<String>,
  pub resolution_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
