use cortex_core::{MergeOutcome, execute_merge, scan_for_merge_candidates};
use cortex_shared::AppError;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ──────────────────────────────────────────────────
// Job definition
// ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeScanJob {
  /// Entities to scan against the graph, typically an episode's touch set.
  pub entity_ids: Vec<Uuid>,
}

// ──────────────────────────────────────────────────
// Job processing
// ──────────────────────────────────────────────────

/// Detect merge candidates for the given entities and execute the
/// auto-eligible ones. Reentrant: overlapping scans serialize on the unique
/// candidate pair index, and repeated executions are no-ops.
pub async fn process_merge_scan(
  job: MergeScanJob,
  db: DatabaseConnection,
) -> Result<(), AppError> {
  if job.entity_ids.is_empty() {
    return Ok(());
  }

  let auto_candidates = scan_for_merge_candidates(&job.entity_ids, &db).await?;
  tracing::debug!(
    scanned = job.entity_ids.len(),
    auto_candidates = auto_candidates.len(),
    "merge scan complete"
  );

  for candidate_id in auto_candidates {
    match execute_merge(candidate_id, "auto", &db).await? {
      MergeOutcome::Merged { source, target } => {
        tracing::info!(candidate_id = %candidate_id, source = %source, target = %target, "auto-merge executed");
      }
      MergeOutcome::AlreadyMerged => {
        tracing::debug!(candidate_id = %candidate_id, "auto-merge skipped, already merged");
      }
      MergeOutcome::NotPending => {
        tracing::debug!(candidate_id = %candidate_id, "auto-merge skipped, candidate resolved elsewhere");
      }
    }
  }

  Ok(())
}
