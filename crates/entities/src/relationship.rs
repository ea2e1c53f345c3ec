use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// A directed, typed fact. Exactly one of `target_entity_id` or
/// `target_literal` is set (CHECK-enforced). Bi-temporal: `created_at` is
/// system time, `valid_at`/`invalid_at` bound real-world validity and may be
/// reduced-precision ISO dates (`YYYY`, `YYYY-MM`, `YYYY-MM-DD`).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "relationships")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub source_entity_id: Uuid,
  pub target_entity_id: Option<Uuid>,
  pub target_literal: Option<String>,
  /// Uppercased snake_case, open vocabulary with documented subsets.
  pub relation_type: String,
  /// Natural-language rendering of the fact.
  pub fact: String,
  pub valid_at: Option<String>,
  pub invalid_at: Option<String>,
  pub created_at: chrono::DateTime<chrono::FixedOffset>,
  pub confidence: f32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::entity::Entity",
    from = "Column::SourceEntityId",
    to = "super::entity::Column::Id"
  )]
  SourceEntity,
}

impl ActiveModelBehavior for ActiveModel {}
