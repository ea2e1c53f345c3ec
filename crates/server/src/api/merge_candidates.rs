use axum::{
  Json,
  extract::{Path, Query, State},
};
use cortex_core::{MergeOutcome, defer_candidate, execute_merge, reject_candidate};
use cortex_entities::merge_candidate;
use cortex_shared::AppError;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::utils::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct CandidateParams {
  /// pending | merged | rejected | deferred; defaults to pending.
  pub status: Option<String>,
}

/// List merge candidates
#[utoipa::path(
  get,
  path = "/api/v0/merge-candidates",
  params(CandidateParams),
  responses((status = 200, description = "Candidates by status", body = [merge_candidate::Model]))
)]
#[axum::debug_handler]
#[tracing::instrument(skip(state))]
pub async fn list_merge_candidates(
  State(state): State<AppState>,
  Query(params): Query<CandidateParams>,
) -> Result<Json<Vec<merge_candidate::Model>>, AppError> {
  let status = params.status.unwrap_or_else(|| "pending".to_owned());
  let rows = merge_candidate::Entity::find()
    .filter(merge_candidate::Column::Status.eq(status))
    .order_by_desc(merge_candidate::Column::CreatedAt)
    .all(&state.db)
    .await?;
  Ok(Json(rows))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveCandidate {
  /// approve | reject | defer
  pub action: String,
  /// Reviewer identity recorded on the candidate (e.g. "user:sam").
  pub resolved_by: String,
  pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResolveCandidateResult {
  pub status: String,
}

/// Resolve a merge candidate
#[utoipa::path(
  post,
  path = "/api/v0/merge-candidates/{id}/resolve",
  params(("id" = Uuid, Path, description = "Candidate id")),
  request_body = ResolveCandidate,
  responses(
    (status = 200, description = "Resolution applied", body = ResolveCandidateResult),
    (status = 400, description = "Unknown action")
  )
)]
#[axum::debug_handler]
#[tracing::instrument(skip(state), fields(action = payload.action))]
pub async fn resolve_merge_candidate(
  State(state): State<AppState>,
  Path(id): Path<Uuid>,
  Json(payload): Json<ResolveCandidate>,
) -> Result<Json<ResolveCandidateResult>, AppError> {
  let reason = payload.reason.as_deref().unwrap_or("");

  let status = match payload.action.as_str() {
    "approve" => match execute_merge(id, &payload.resolved_by, &state.db).await? {
      MergeOutcome::Merged { .. } => "merged",
      MergeOutcome::AlreadyMerged => "already_merged",
      MergeOutcome::NotPending => "not_pending",
    },
    "reject" => {
      reject_candidate(id, &payload.resolved_by, reason, &state.db).await?;
      "rejected"
    }
    "defer" => {
      defer_candidate(id, &payload.resolved_by, reason, &state.db).await?;
      "deferred"
    }
    other => {
      return Err(AppError::user_input(anyhow::anyhow!(
        "unknown action {other:?}, expected approve/reject/defer"
      )));
    }
  };

  Ok(Json(ResolveCandidateResult {
    status: status.to_owned(),
  }))
}
