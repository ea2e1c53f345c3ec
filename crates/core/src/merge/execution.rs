//! Merge execution: fold a source entity into a target inside one
//! transaction, tombstone the source, and append the audit event.

use anyhow::anyhow;
use chrono::Utc;
use cortex_entities::{
  entity, entity_alias, entity_merge_event, episode_entity_mention, merge_candidate, relationship,
};
use cortex_shared::AppError;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
  IntoActiveModel, QueryFilter, Set, TransactionTrait, prelude::Expr,
};
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq)]
pub enum MergeOutcome {
  Merged { source: Uuid, target: Uuid },
  /// The candidate was already executed; nothing to do.
  AlreadyMerged,
  /// The candidate is rejected or deferred; execution refuses to touch it.
  NotPending,
}

/// Deterministic merge direction: the entity with more aliases survives as
/// the target; ties break to the earlier `created_at`, then to the smaller
/// id. Returns `(source, target)`.
#[must_use]
pub fn choose_merge_direction(
  a: (Uuid, usize, chrono::DateTime<chrono::FixedOffset>),
  b: (Uuid, usize, chrono::DateTime<chrono::FixedOffset>),
) -> (Uuid, Uuid) {
  let a_wins = match a.1.cmp(&b.1) {
    std::cmp::Ordering::Greater => true,
    std::cmp::Ordering::Less => false,
    std::cmp::Ordering::Equal => match a.2.cmp(&b.2) {
      std::cmp::Ordering::Less => true,
      std::cmp::Ordering::Greater => false,
      std::cmp::Ordering::Equal => a.0 < b.0,
    },
  };
  if a_wins { (b.0, a.0) } else { (a.0, b.0) }
}

/// Whether the source's canonical name should be promoted onto the target:
/// non-empty beats empty, title case beats ALL CAPS, and a longer name wins
/// when both are reasonable and it is at most three times as long.
#[must_use]
pub fn source_name_is_better(source: &str, target: &str) -> bool {
  let source = source.trim();
  let target = target.trim();
  if target.is_empty() {
    return !source.is_empty();
  }
  if source.is_empty() {
    return false;
  }
  match (is_all_caps(source), is_all_caps(target)) {
    (false, true) => return true,
    (true, false) => return false,
    _ => {}
  }
  source.len() > target.len() && source.len() <= target.len() * 3
}

fn is_all_caps(name: &str) -> bool {
  let mut has_alpha = false;
  for c in name.chars() {
    if c.is_alphabetic() {
      has_alpha = true;
      if c.is_lowercase() {
        return false;
      }
    }
  }
  has_alpha
}

/// Execute one merge candidate. Idempotent: an already-merged candidate is a
/// no-op, and concurrent executions serialize on the row locks.
pub async fn execute_merge(
  candidate_id: Uuid,
  resolved_by: &str,
  db: &DatabaseConnection,
) -> Result<MergeOutcome, AppError> {
  let candidate = merge_candidate::Entity::find_by_id(candidate_id)
    .one(db)
    .await?
    .ok_or_else(|| AppError::user_input(anyhow!("merge candidate {candidate_id} not found")))?;

  match candidate.status.as_str() {
    "pending" => {}
    "merged" => return Ok(MergeOutcome::AlreadyMerged),
    _ => return Ok(MergeOutcome::NotPending),
  }

  let txn = db.begin().await?;

  // Lock both entity rows for the duration of the merge.
  let entity_a = lock_entity(candidate.entity_a_id, &txn).await?;
  let entity_b = lock_entity(candidate.entity_b_id, &txn).await?;

  // A pair where either side is already tombstoned has been handled by an
  // earlier merge; close the candidate without touching the graph.
  if entity_a.merged_into.is_some() || entity_b.merged_into.is_some() {
    close_candidate(&candidate, "merged", resolved_by, "superseded by earlier merge", &txn)
      .await?;
    txn.commit().await?;
    return Ok(MergeOutcome::AlreadyMerged);
  }

  let a_aliases = alias_count(entity_a.id, &txn).await?;
  let b_aliases = alias_count(entity_b.id, &txn).await?;
  let (source_id, target_id) = choose_merge_direction(
    (entity_a.id, a_aliases, entity_a.created_at),
    (entity_b.id, b_aliases, entity_b.created_at),
  );
  let (source, target) = if source_id == entity_a.id {
    (entity_a, entity_b)
  } else {
    (entity_b, entity_a)
  };

  // Refuse a merge whose target would transitively resolve back to the
  // source; that would close a merge-chain cycle.
  if chain_reaches(&txn, target_id, source_id).await? {
    txn.rollback().await?;
    return Err(AppError::data_invariant(anyhow!(
      "merging {source_id} into {target_id} would create a merge cycle"
    )));
  }

  // 1. Reassign aliases, dropping those whose bucket the target already has.
  reassign_aliases(&source, &target, &txn).await?;

  // 2. Re-point relationships on both ends.
  relationship::Entity::update_many()
    .col_expr(relationship::Column::SourceEntityId, Expr::value(target.id))
    .filter(relationship::Column::SourceEntityId.eq(source.id))
    .exec(&txn)
    .await?;
  relationship::Entity::update_many()
    .col_expr(relationship::Column::TargetEntityId, Expr::value(target.id))
    .filter(relationship::Column::TargetEntityId.eq(source.id))
    .exec(&txn)
    .await?;

  // 3. Fold episode mentions, summing counts on overlap.
  merge_mentions(&source, &target, &txn).await?;

  // 4. Possibly promote the source's canonical name.
  let mut target_active: entity::ActiveModel = target.clone().into_active_model();
  if source_name_is_better(&source.canonical_name, &target.canonical_name) {
    target_active.canonical_name = Set(source.canonical_name.clone());
  }
  target_active.updated_at = Set(Utc::now().into());
  let target = target_active.update(&txn).await?;

  // 5. Tombstone the source, keeping a debugging breadcrumb in its name.
  let mut source_active: entity::ActiveModel = source.clone().into_active_model();
  source_active.merged_into = Set(Some(target.id));
  source_active.canonical_name = Set(format!(
    "{} [MERGED→{}]",
    source.canonical_name, target.canonical_name
  ));
  source_active.updated_at = Set(Utc::now().into());
  source_active.update(&txn).await?;

  // 6. Append the immutable audit event.
  entity_merge_event::Model {
    id: Uuid::now_v7(),
    source_entity_id: source.id,
    target_entity_id: target.id,
    merge_type: candidate.reason.clone(),
    triggering_facts: candidate.matching_facts.clone(),
    similarity_score: candidate.confidence,
    created_at: Utc::now().into(),
    resolved_by: resolved_by.to_owned(),
  }
  .into_active_model()
  .insert(&txn)
  .await?;

  // 7. Close the candidate.
  close_candidate(&candidate, "merged", resolved_by, "", &txn).await?;

  txn.commit().await?;

  tracing::info!(
    source = %source.id,
    target = %target.id,
    reason = %candidate.reason,
    resolved_by,
    "merge executed"
  );

  Ok(MergeOutcome::Merged {
    source: source.id,
    target: target.id,
  })
}

/// Mark a candidate rejected. Never modifies the graph.
pub async fn reject_candidate(
  candidate_id: Uuid,
  resolved_by: &str,
  reason: &str,
  db: &DatabaseConnection,
) -> Result<(), AppError> {
  set_candidate_status(candidate_id, "rejected", resolved_by, reason, db).await
}

/// Mark a candidate deferred. Never modifies the graph.
pub async fn defer_candidate(
  candidate_id: Uuid,
  resolved_by: &str,
  reason: &str,
  db: &DatabaseConnection,
) -> Result<(), AppError> {
  set_candidate_status(candidate_id, "deferred", resolved_by, reason, db).await
}

async fn set_candidate_status(
  candidate_id: Uuid,
  status: &str,
  resolved_by: &str,
  reason: &str,
  db: &DatabaseConnection,
) -> Result<(), AppError> {
  let candidate = merge_candidate::Entity::find_by_id(candidate_id)
    .one(db)
    .await?
    .ok_or_else(|| AppError::user_input(anyhow!("merge candidate {candidate_id} not found")))?;
  close_candidate(&candidate, status, resolved_by, reason, db).await
}

async fn close_candidate<C: ConnectionTrait>(
  candidate: &merge_candidate::Model,
  status: &str,
  resolved_by: &str,
  reason: &str,
  db: &C,
) -> Result<(), AppError> {
  let mut active: merge_candidate::ActiveModel = candidate.clone().into_active_model();
  active.status = Set(status.to_owned());
  active.resolved_at = Set(Some(Utc::now().into()));
  active.resolved_by = Set(Some(resolved_by.to_owned()));
  active.resolution_reason = Set(Some(reason.to_owned()).filter(|r| !r.is_empty()));
  active.update(db).await?;
  Ok(())
}

async fn lock_entity<C: ConnectionTrait>(id: Uuid, db: &C) -> Result<entity::Model, AppError> {
  use sea_orm::QuerySelect;
  entity::Entity::find_by_id(id)
    .lock_exclusive()
    .one(db)
    .await?
    .ok_or_else(|| AppError::data_invariant(anyhow!("merge candidate references missing entity {id}")))
}

async fn alias_count<C: ConnectionTrait>(id: Uuid, db: &C) -> Result<usize, AppError> {
  use sea_orm::PaginatorTrait;
  let count = entity_alias::Entity::find()
    .filter(entity_alias::Column::EntityId.eq(id))
    .count(db)
    .await?;
  Ok(count as usize)
}

/// Does the merge chain starting at `from` reach `needle`?
async fn chain_reaches<C: ConnectionTrait>(
  db: &C,
  from: Uuid,
  needle: Uuid,
) -> Result<bool, AppError> {
  let mut current = from;
  let mut visited = std::collections::HashSet::new();
  loop {
    if current == needle {
      return Ok(true);
    }
    if !visited.insert(current) {
      return Err(AppError::data_invariant(anyhow!(
        "existing merge chain cycle at {current}"
      )));
    }
    let Some(row) = entity::Entity::find_by_id(current).one(db).await? else {
      return Ok(false);
    };
    match row.merged_into {
      Some(next) => current = next,
      None => return Ok(false),
    }
  }
}

async fn reassign_aliases<C: ConnectionTrait>(
  source: &entity::Model,
  target: &entity::Model,
  db: &C,
) -> Result<(), AppError> {
  let target_buckets: std::collections::HashSet<(String, String)> = entity_alias::Entity::find()
    .filter(entity_alias::Column::EntityId.eq(target.id))
    .all(db)
    .await?
    .into_iter()
    .map(|row| (row.alias_type, row.normalized))
    .collect();

  let source_aliases = entity_alias::Entity::find()
    .filter(entity_alias::Column::EntityId.eq(source.id))
    .all(db)
    .await?;

  for alias in source_aliases {
    let bucket = (alias.alias_type.clone(), alias.normalized.clone());
    if target_buckets.contains(&bucket) {
      entity_alias::Entity::delete_by_id(alias.id).exec(db).await?;
    } else {
      let mut active: entity_alias::ActiveModel = alias.into_active_model();
      active.entity_id = Set(target.id);
      active.update(db).await?;
    }
  }
  Ok(())
}

/// Fold the source's episode mentions into the target's, summing counts on
/// episodes both touched.
async fn merge_mentions<C: ConnectionTrait>(
  source: &entity::Model,
  target: &entity::Model,
  db: &C,
) -> Result<(), AppError> {
  let source_mentions = episode_entity_mention::Entity::find()
    .filter(episode_entity_mention::Column::EntityId.eq(source.id))
    .all(db)
    .await?;

  for mention in source_mentions {
    let existing = episode_entity_mention::Entity::find_by_id((mention.episode_id, target.id))
      .one(db)
      .await?;

    if let Some(existing) = existing {
      let combined = existing.mention_count + mention.mention_count;
      let mut active: episode_entity_mention::ActiveModel = existing.into_active_model();
      active.mention_count = Set(combined);
      active.update(db).await?;
    } else {
      episode_entity_mention::Model {
        episode_id: mention.episode_id,
        entity_id: target.id,
        mention_count: mention.mention_count,
      }
      .into_active_model()
      .insert(db)
      .await?;
    }

    episode_entity_mention::Entity::delete_by_id((mention.episode_id, source.id))
      .exec(db)
      .await?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at(seconds: i64) -> chrono::DateTime<chrono::FixedOffset> {
    chrono::Utc.timestamp_opt(seconds, 0).unwrap().into()
  }

  #[test]
  fn more_aliases_wins_as_target() {
    let a = Uuid::now_v7();
    let b = Uuid::now_v7();
    let (source, target) = choose_merge_direction((a, 5, at(100)), (b, 2, at(50)));
    assert_eq!((source, target), (b, a));
  }

  #[test]
  fn alias_tie_breaks_to_the_older_entity() {
    let a = Uuid::now_v7();
    let b = Uuid::now_v7();
    let (source, target) = choose_merge_direction((a, 3, at(200)), (b, 3, at(100)));
    assert_eq!((source, target), (a, b));
  }

  #[test]
  fn full_tie_breaks_to_the_smaller_id() {
    let a = Uuid::now_v7();
    let b = Uuid::now_v7();
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let (source, target) = choose_merge_direction((low, 1, at(100)), (high, 1, at(100)));
    assert_eq!((source, target), (high, low));
  }

  #[test]
  fn direction_is_symmetric() {
    let a = Uuid::now_v7();
    let b = Uuid::now_v7();
    assert_eq!(
      choose_merge_direction((a, 4, at(10)), (b, 1, at(20))),
      choose_merge_direction((b, 1, at(20)), (a, 4, at(10)))
    );
  }

  #[test]
  fn name_promotion_prefers_substance() {
    assert!(source_name_is_better("Cloudflare, Inc.", ""));
    assert!(!source_name_is_better("", "Cloudflare"));
    assert!(source_name_is_better("Cloudflare", "CLOUDFLARE"));
    assert!(!source_name_is_better("CLOUDFLARE", "Cloudflare"));
    // longer but within 3x
    assert!(source_name_is_better("Cloudflare, Inc.", "Cloudflare"));
    // absurdly longer is not promoted
    assert!(!source_name_is_better(
      "Cloudflare the global connectivity cloud company formerly known as Project Honey Pot",
      "Cloudflare"
    ));
  }
}
