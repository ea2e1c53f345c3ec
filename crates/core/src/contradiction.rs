//! Exclusive-fact contradiction handling. A newly inserted WORKS_AT
//! supersedes the previous active WORKS_AT for the same source; backdated
//! arrivals never rewrite history and are flagged for review instead.

use chrono::{DateTime, Utc};
use cortex_entities::{merge_candidate, relationship};
use cortex_shared::AppError;
use sea_orm::{
  ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
  prelude::Expr, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::vocab::is_exclusive_relation;

#[derive(Debug, PartialEq)]
enum Decision {
  /// Close the prior fact as of the given ISO timestamp.
  Invalidate(String),
  /// The new fact ends before the existing one began; leave both rows alone
  /// and surface the pair.
  FlagBackdated,
}

/// The invalidation timestamp: the new fact's `valid_at` when it carries
/// one, otherwise the episode's reference time.
fn decide(
  new_valid_at: Option<&str>,
  new_invalid_at: Option<&str>,
  existing_valid_at: Option<&str>,
  reference_time: &str,
) -> Decision {
  if let (Some(new_end), Some(existing_start)) = (new_invalid_at, existing_valid_at) {
    // ISO prefixes compare lexicographically.
    if new_end < existing_start {
      return Decision::FlagBackdated;
    }
  }
  Decision::Invalidate(new_valid_at.unwrap_or(reference_time).to_owned())
}

/// Run contradiction detection for the episode's freshly inserted rows.
/// Only exclusive relation types participate; non-exclusive relations
/// accumulate without invalidation.
pub async fn detect_contradictions<C: ConnectionTrait>(
  new_rows: &[relationship::Model],
  reference_time: DateTime<Utc>,
  db: &C,
) -> Result<(), AppError> {
  let reference = reference_time.to_rfc3339();

  for new_row in new_rows {
    if !is_exclusive_relation(&new_row.relation_type) {
      continue;
    }

    let prior: Vec<relationship::Model> = relationship::Entity::find()
      .filter(relationship::Column::SourceEntityId.eq(new_row.source_entity_id))
      .filter(relationship::Column::RelationType.eq(new_row.relation_type.as_str()))
      .filter(relationship::Column::InvalidAt.is_null())
      .filter(relationship::Column::Id.ne(new_row.id))
      .all(db)
      .await?;

    for existing in prior {
      // Same target means an update to the same fact, not a contradiction.
      let same_target = existing.target_entity_id == new_row.target_entity_id
        && existing.target_literal == new_row.target_literal;
      if same_target {
        continue;
      }

      match decide(
        new_row.valid_at.as_deref(),
        new_row.invalid_at.as_deref(),
        existing.valid_at.as_deref(),
        &reference,
      ) {
        Decision::Invalidate(at) => {
          relationship::Entity::update_many()
            .col_expr(relationship::Column::InvalidAt, Expr::value(at.clone()))
            .filter(relationship::Column::Id.eq(existing.id))
            .filter(relationship::Column::InvalidAt.is_null())
            .exec(db)
            .await?;
          tracing::info!(
            relationship_id = %existing.id,
            superseded_by = %new_row.id,
            relation_type = %new_row.relation_type,
            invalid_at = at,
            "invalidated superseded exclusive fact"
          );
        }
        Decision::FlagBackdated => {
          flag_backdated_pair(new_row, &existing, db).await?;
        }
      }
    }
  }

  Ok(())
}

/// Record a `conflict` merge candidate for a backdated pair so a human can
/// untangle the timeline. The unique pair index makes this idempotent.
async fn flag_backdated_pair<C: ConnectionTrait>(
  new_row: &relationship::Model,
  existing: &relationship::Model,
  db: &C,
) -> Result<(), AppError> {
  let (Some(target_a), Some(target_b)) = (new_row.target_entity_id, existing.target_entity_id)
  else {
    tracing::warn!(
      new_id = %new_row.id,
      existing_id = %existing.id,
      "backdated exclusive fact with literal target, cannot flag a pair"
    );
    return Ok(());
  };
  if target_a == target_b {
    return Ok(());
  }

  let (entity_a, entity_b) = order_pair(target_a, target_b);
  let model = merge_candidate::Model {
    id: Uuid::now_v7(),
    entity_a_id: entity_a,
    entity_b_id: entity_b,
    confidence: 0.0,
    auto_eligible: false,
    reason: "conflict".to_owned(),
    matching_facts: serde_json::json!([new_row.fact, existing.fact]),
    context: serde_json::json!({
      "relationship_ids": [new_row.id, existing.id],
      "relation_type": new_row.relation_type,
    }),
    conflicts: serde_json::json!([{
      "type": "backdated_exclusive_fact",
      "values_a": [new_row.valid_at, new_row.invalid_at],
      "values_b": [existing.valid_at, existing.invalid_at],
    }]),
    status: "pending".to_owned(),
    created_at: Utc::now().into(),
    resolved_at: None,
    resolved_by: None,
    resolution_reason: None,
  };

  merge_candidate::Entity::insert(model.into_active_model())
    .on_conflict(
      OnConflict::columns([
        merge_candidate::Column::EntityAId,
        merge_candidate::Column::EntityBId,
      ])
      .do_nothing()
      .to_owned(),
    )
    .exec_without_returning(db)
    .await?;

  tracing::info!(
    new_id = %new_row.id,
    existing_id = %existing.id,
    "flagged backdated exclusive fact for review"
  );
  Ok(())
}

/// Candidate pairs are stored lower-id first so the unique index treats them
/// as unordered.
pub(crate) fn order_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
  if a <= b { (a, b) } else { (b, a) }
}

/// Non-exclusive sanity check used by callers that want to assert policy.
#[must_use]
pub fn relation_accumulates(relation_type: &str) -> bool {
  !is_exclusive_relation(relation_type)
}

#[cfg(test)]
mod tests {
  use super::*;

  const REFERENCE: &str = "2026-01-06T17:00:00+00:00";

  #[test]
  fn new_fact_with_valid_at_closes_prior_at_that_date() {
    let decision = decide(Some("2026-01-06"), None, Some("2024-03"), REFERENCE);
    assert_eq!(decision, Decision::Invalidate("2026-01-06".to_owned()));
  }

  #[test]
  fn new_fact_without_valid_at_falls_back_to_reference_time() {
    let decision = decide(None, None, Some("2024-03"), REFERENCE);
    assert_eq!(decision, Decision::Invalidate(REFERENCE.to_owned()));
  }

  #[test]
  fn backdated_new_fact_is_flagged_not_applied() {
    // The new fact ended in 2020; the existing one started in 2024.
    let decision = decide(Some("2019"), Some("2020"), Some("2024-03"), REFERENCE);
    assert_eq!(decision, Decision::FlagBackdated);
  }

  #[test]
  fn closed_new_fact_after_existing_start_still_invalidates() {
    let decision = decide(Some("2025"), Some("2026-01"), Some("2024-03"), REFERENCE);
    assert_eq!(decision, Decision::Invalidate("2025".to_owned()));
  }

  #[test]
  fn accumulating_relations_are_exempt() {
    assert!(relation_accumulates("KNOWS"));
    assert!(relation_accumulates("USES"));
    assert!(!relation_accumulates("WORKS_AT"));
  }

  #[test]
  fn pair_ordering_is_stable() {
    let a = Uuid::now_v7();
    let b = Uuid::now_v7();
    assert_eq!(order_pair(a, b), order_pair(b, a));
  }
}
