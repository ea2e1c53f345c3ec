use sea_orm::entity::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

/// Provenance for every fact an episode yielded. `relationship_id` is null
/// for identity facts promoted to aliases; `alias_id` points at the alias
/// instead.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, ToSchema)]
#[sea_orm(table_name = "episode_relationship_mentions")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub episode_id: Uuid,
  pub relationship_id: Option<Uuid>,
  /// The fact text exactly as extracted, before validation rewrites.
  pub extracted_fact: String,
  /// Who made the claim inside the episode, when attributable.
  pub asserted_by_entity_id: Option<Uuid>,
  /// self_disclosed | mentioned | inferred
  pub source_type: String,
  pub target_literal: Option<String>,
  pub alias_id: Option<Uuid>,
  pub confidence: f32,
  pub created_at: chrono::DateTime<chrono::FixedOffset>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::episode::Entity",
    from = "Column::EpisodeId",
    to = "super::episode::Column::Id"
  )]
  Episode,
}

impl ActiveModelBehavior for ActiveModel {}
