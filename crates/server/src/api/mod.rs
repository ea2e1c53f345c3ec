use axum::{
  Json, Router,
  routing::{get, post},
};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::utils::AppState;

mod entities;
mod merge_candidates;
mod process_episode;

pub use entities::SearchParams;
pub use merge_candidates::{ResolveCandidate, ResolveCandidateResult};
pub use process_episode::ProcessEpisode;

#[derive(OpenApi)]
#[openapi(
  info(
    title = "Cortex API",
    version = "0.1.0",
    description = "Temporal knowledge graph over personal communications"
  ),
  paths(
    process_episode::process_episode,
    entities::entity_by_id,
    entities::related_entities,
    entities::entity_relationships,
    entities::entity_aliases,
    entities::search_entities,
    merge_candidates::list_merge_candidates,
    merge_candidates::resolve_merge_candidate,
  ),
  components(schemas(
    ProcessEpisode,
    ResolveCandidate,
    ResolveCandidateResult,
    cortex_core::Direction,
    cortex_core::RelatedEntity,
    cortex_core::RelationshipWithDirection,
    cortex_entities::entity::Model,
    cortex_entities::entity_alias::Model,
    cortex_entities::merge_candidate::Model,
    cortex_entities::relationship::Model,
  ))
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
  Json(ApiDoc::openapi())
}

pub fn app() -> Router<AppState> {
  Router::new()
    .route(
      "/api/v0/episodes/{id}/process",
      post(process_episode::process_episode),
    )
    .route("/api/v0/entities", get(entities::search_entities))
    .route("/api/v0/entities/{id}", get(entities::entity_by_id))
    .route(
      "/api/v0/entities/{id}/related",
      get(entities::related_entities),
    )
    .route(
      "/api/v0/entities/{id}/relationships",
      get(entities::entity_relationships),
    )
    .route(
      "/api/v0/entities/{id}/aliases",
      get(entities::entity_aliases),
    )
    .route(
      "/api/v0/merge-candidates",
      get(merge_candidates::list_merge_candidates),
    )
    .route(
      "/api/v0/merge-candidates/{id}/resolve",
      post(merge_candidates::resolve_merge_candidate),
    )
    .route("/openapi.json", get(openapi_json))
    .merge(Scalar::with_url("/openapi/", ApiDoc::openapi()))
}
