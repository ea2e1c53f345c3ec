use apalis::prelude::TaskSink;
use axum::{Json, extract::Path, extract::State, http::StatusCode};
use cortex_shared::AppError;
use cortex_worker::ExtractEpisodeJob;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProcessEpisode {
  /// Extra guidance forwarded to the extraction prompts.
  pub custom_instructions: Option<String>,
}

/// Queue extraction for one episode
#[utoipa::path(
  post,
  path = "/api/v0/episodes/{id}/process",
  params(("id" = Uuid, Path, description = "Episode id")),
  request_body = ProcessEpisode,
  responses(
    (status = 202, description = "Extraction queued"),
    (status = 404, description = "Episode not found")
  )
)]
#[axum::debug_handler]
#[tracing::instrument(skip(state))]
pub async fn process_episode(
  State(state): State<AppState>,
  Path(id): Path<Uuid>,
  payload: Option<Json<ProcessEpisode>>,
) -> Result<StatusCode, AppError> {
  use cortex_entities::episode;
  use sea_orm::EntityTrait;

  if episode::Entity::find_by_id(id).one(&state.db).await?.is_none() {
    return Err(AppError::user_input(anyhow::anyhow!("episode {id} not found")));
  }

  let custom_instructions = payload.and_then(|Json(p)| p.custom_instructions);

  let mut storage = state.extract_storage.clone();
  storage
    .push(ExtractEpisodeJob {
      episode_id: id,
      custom_instructions,
    })
    .await
    .map_err(AppError::from)?;

  Ok(StatusCode::ACCEPTED)
}
