use axum::{
  Json,
  extract::{Path, Query, State},
};
use cortex_core::{
  QueryOptions, RelatedEntity, RelationshipWithDirection, find_entities_by_name, get_entity,
  get_entity_aliases, get_entity_relationships, get_related_entities,
};
use cortex_entities::{entity, entity_alias};
use cortex_shared::AppError;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::utils::AppState;

/// Entity by id. Merge chains are not followed; a tombstoned entity comes
/// back with its `merged_into` pointer for the caller to chase.
#[utoipa::path(
  get,
  path = "/api/v0/entities/{id}",
  params(("id" = Uuid, Path, description = "Entity id")),
  responses(
    (status = 200, description = "The entity", body = entity::Model),
    (status = 404, description = "No such entity")
  )
)]
#[axum::debug_handler]
#[tracing::instrument(skip(state))]
pub async fn entity_by_id(
  State(state): State<AppState>,
  Path(id): Path<Uuid>,
) -> Result<Json<entity::Model>, AppError> {
  get_entity(id, &state.db)
    .await?
    .map(Json)
    .ok_or_else(|| AppError::user_input(anyhow::anyhow!("entity {id} not found")))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RelatedParams {
  pub direction: Option<String>,
  /// Comma-separated relation types.
  pub relation_types: Option<String>,
  pub as_of_time: Option<String>,
  pub include_invalidated: Option<bool>,
  pub limit: Option<u64>,
}

impl RelatedParams {
  fn into_options(self) -> QueryOptions {
    QueryOptions {
      direction: match self.direction.as_deref() {
        Some("outgoing") => cortex_core::Direction::Outgoing,
        Some("incoming") => cortex_core::Direction::Incoming,
        _ => cortex_core::Direction::Both,
      },
      relation_types: self
        .relation_types
        .map(|kinds| kinds.split(',').map(|k| k.trim().to_owned()).collect()),
      as_of_time: self.as_of_time,
      include_invalidated: self.include_invalidated.unwrap_or(false),
      limit: self.limit,
    }
  }
}

/// Temporally filtered neighbors of an entity
#[utoipa::path(
  get,
  path = "/api/v0/entities/{id}/related",
  params(("id" = Uuid, Path, description = "Entity id"), RelatedParams),
  responses((status = 200, description = "Neighbor entities", body = [RelatedEntity]))
)]
#[axum::debug_handler]
#[tracing::instrument(skip(state))]
pub async fn related_entities(
  State(state): State<AppState>,
  Path(id): Path<Uuid>,
  Query(params): Query<RelatedParams>,
) -> Result<Json<Vec<RelatedEntity>>, AppError> {
  let related = get_related_entities(id, &params.into_options(), &state.db).await?;
  Ok(Json(related))
}

/// Full relationship rows with direction labels
#[utoipa::path(
  get,
  path = "/api/v0/entities/{id}/relationships",
  params(("id" = Uuid, Path, description = "Entity id"), RelatedParams),
  responses((status = 200, description = "Relationship rows", body = [RelationshipWithDirection]))
)]
#[axum::debug_handler]
#[tracing::instrument(skip(state))]
pub async fn entity_relationships(
  State(state): State<AppState>,
  Path(id): Path<Uuid>,
  Query(params): Query<RelatedParams>,
) -> Result<Json<Vec<RelationshipWithDirection>>, AppError> {
  let rows = get_entity_relationships(id, &params.into_options(), &state.db).await?;
  Ok(Json(rows))
}

/// Aliases of an entity, ordered by type then alias
#[utoipa::path(
  get,
  path = "/api/v0/entities/{id}/aliases",
  params(("id" = Uuid, Path, description = "Entity id")),
  responses((status = 200, description = "Alias rows", body = [entity_alias::Model]))
)]
#[axum::debug_handler]
#[tracing::instrument(skip(state))]
pub async fn entity_aliases(
  State(state): State<AppState>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<entity_alias::Model>>, AppError> {
  Ok(Json(get_entity_aliases(id, &state.db).await?))
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct SearchParams {
  /// Case-insensitive name fragment.
  pub name: String,
  pub entity_type_id: Option<i32>,
  pub limit: Option<u64>,
}

/// Find entities by partial name
#[utoipa::path(
  get,
  path = "/api/v0/entities",
  params(SearchParams),
  responses((status = 200, description = "Matching active entities", body = [entity::Model]))
)]
#[axum::debug_handler]
#[tracing::instrument(skip(state))]
pub async fn search_entities(
  State(state): State<AppState>,
  Query(params): Query<SearchParams>,
) -> Result<Json<Vec<entity::Model>>, AppError> {
  let entities =
    find_entities_by_name(&params.name, params.entity_type_id, params.limit, &state.db).await?;
  Ok(Json(entities))
}
