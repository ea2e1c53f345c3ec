//! Per-episode orchestration: extract → resolve → extract relationships →
//! promote identities → detect contradictions, persisted under the strict
//! write order (entities → aliases → relationships → mentions →
//! contradictions). Replaying an episode is idempotent: entities and aliases
//! resolve to the same rows and relationships dedupe on
//! `(source, type, target, valid_at)`.

use std::collections::HashMap;

use chrono::Utc;
use cortex_ai::{EmbeddingBatcher, LlmClient};
use cortex_entities::{episode_entity_mention, episode_relationship_mention, relationship};
use cortex_shared::AppError;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
  IntoActiveModel, QueryFilter, TransactionTrait, sea_query::OnConflict,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::contradiction::detect_contradictions;
use crate::episode::load_episode_context;
use crate::extraction::{
  ExtractedRelationship, RelationshipTarget, extract_entities, extract_relationships,
};
use crate::identity::promote_identity_fact;
use crate::resolution::{ResolvedEntity, resolve_entities};
use crate::vocab::{SourceType, is_identity_relation};

/// Structured result returned to the caller (worker, API, or CLI).
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct ProcessOutcome {
  pub new_entities: usize,
  pub existing_entities: usize,
  pub new_relationships: usize,
  pub aliases_created: usize,
  pub entity_mentions_created: usize,
  pub errors: Vec<String>,
  /// Active entities this episode touched; feeds the merge scan.
  #[serde(skip)]
  pub touched_entity_ids: Vec<Uuid>,
}

/// Run the full extraction pipeline for one episode.
pub async fn process_episode(
  episode_id: Uuid,
  custom_instructions: Option<&str>,
  llm: &LlmClient,
  batcher: &EmbeddingBatcher,
  db: &DatabaseConnection,
) -> Result<ProcessOutcome, AppError> {
  let ctx = load_episode_context(episode_id, db).await?;
  let mut outcome = ProcessOutcome::default();

  // Stage 1: candidate entities.
  let extraction = extract_entities(&ctx, custom_instructions, llm).await?;
  if extraction.entities.is_empty() {
    tracing::info!(episode_id = %episode_id, "episode yielded no entities");
    return Ok(outcome);
  }

  // Stage 2: resolution (may create entities + name aliases).
  let resolved = resolve_entities(&extraction.entities, &ctx, llm, batcher, db).await?;
  for entity in &resolved {
    if entity.created {
      outcome.new_entities += 1;
      outcome.aliases_created += 1; // the canonical-name alias
    } else {
      outcome.existing_entities += 1;
    }
  }
  outcome.touched_entity_ids = {
    let mut ids: Vec<Uuid> = resolved.iter().map(|r| r.entity_id).collect();
    ids.sort();
    ids.dedup();
    ids
  };

  // Stage 3: relationships over the resolved set.
  let relationships =
    extract_relationships(&ctx, &resolved, custom_instructions, llm).await?;

  // Stages 4-5 commit atomically: relationships, promotions, mentions,
  // contradictions. A failure here leaves the graph untouched apart from
  // the already-resolved entities.
  let txn = db.begin().await?;

  let mut new_rows: Vec<relationship::Model> = Vec::new();
  for extracted in &relationships {
    match persist_relationship(
      &mut outcome,
      extracted,
      &resolved,
      episode_id,
      extraction.source_type,
      &txn,
    )
    .await
    {
      Ok(Some(row)) => new_rows.push(row),
      Ok(None) => {}
      Err(err) => {
        // A single bad fact does not sink the episode.
        tracing::warn!(episode_id = %episode_id, error = %err, "failed to persist extracted fact");
        outcome.errors.push(err.to_string());
      }
    }
  }

  outcome.entity_mentions_created = upsert_entity_mentions(&resolved, episode_id, &txn).await?;

  detect_contradictions(&new_rows, ctx.reference_time, &txn).await?;

  txn.commit().await?;

  tracing::info!(
    episode_id = %episode_id,
    new_entities = outcome.new_entities,
    existing_entities = outcome.existing_entities,
    new_relationships = outcome.new_relationships,
    aliases_created = outcome.aliases_created,
    errors = outcome.errors.len(),
    "episode processed"
  );
  Ok(outcome)
}

/// Persist one validated fact: identity facts promote to aliases, everything
/// else lands in the relationships table unless an identical row already
/// exists. Returns the inserted row for contradiction detection.
async fn persist_relationship<C: ConnectionTrait>(
  outcome: &mut ProcessOutcome,
  extracted: &ExtractedRelationship,
  resolved: &[ResolvedEntity],
  episode_id: Uuid,
  episode_source_type: SourceType,
  db: &C,
) -> Result<Option<relationship::Model>, AppError> {
  let source = &resolved[extracted.source_index];
  let asserted_by = (extracted.source_type == SourceType::SelfDisclosed
    || episode_source_type == SourceType::SelfDisclosed)
    .then_some(source.entity_id);

  if is_identity_relation(&extracted.relation_type) {
    let RelationshipTarget::Literal(literal) = &extracted.target else {
      // Validation already dropped entity-targeted identity facts.
      return Ok(None);
    };
    let promotion =
      promote_identity_fact(source.entity_id, &extracted.relation_type, literal, db).await?;
    if promotion.created {
      outcome.aliases_created += 1;
    }

    record_mention(
      episode_id,
      None,
      Some(promotion.alias_id),
      extracted,
      asserted_by,
      Some(literal.clone()),
      db,
    )
    .await?;
    return Ok(None);
  }

  let (target_entity_id, target_literal) = match &extracted.target {
    RelationshipTarget::Entity(index) => (Some(resolved[*index].entity_id), None),
    RelationshipTarget::Literal(literal) => (None, Some(literal.clone())),
  };

  // Replay idempotence: identical (source, type, target, valid_at) rows
  // are reused rather than duplicated.
  let mut dedupe = relationship::Entity::find()
    .filter(relationship::Column::SourceEntityId.eq(source.entity_id))
    .filter(relationship::Column::RelationType.eq(extracted.relation_type.as_str()));
  dedupe = match (&target_entity_id, &target_literal) {
    (Some(id), _) => dedupe.filter(relationship::Column::TargetEntityId.eq(*id)),
    (None, Some(literal)) => dedupe.filter(relationship::Column::TargetLiteral.eq(literal.as_str())),
    (None, None) => unreachable!("validation guarantees exactly one target"),
  };
  dedupe = match &extracted.valid_at {
    Some(valid_at) => dedupe.filter(relationship::Column::ValidAt.eq(valid_at.as_str())),
    None => dedupe.filter(relationship::Column::ValidAt.is_null()),
  };

  let row = if let Some(existing) = dedupe.one(db).await? {
    existing
  } else {
    let model = relationship::Model {
      id: Uuid::now_v7(),
      source_entity_id: source.entity_id,
      target_entity_id,
      target_literal: target_literal.clone(),
      relation_type: extracted.relation_type.clone(),
      fact: extracted.fact.clone(),
      valid_at: extracted.valid_at.clone(),
      invalid_at: extracted.invalid_at.clone(),
      created_at: Utc::now().into(),
      confidence: 1.0,
    };
    let inserted = model.into_active_model().insert(db).await?;
    outcome.new_relationships += 1;
    inserted
  };

  record_mention(
    episode_id,
    Some(row.id),
    None,
    extracted,
    asserted_by,
    target_literal,
    db,
  )
  .await?;

  Ok(Some(row))
}

/// One provenance row per (episode, fact); replays reuse the existing row.
async fn record_mention<C: ConnectionTrait>(
  episode_id: Uuid,
  relationship_id: Option<Uuid>,
  alias_id: Option<Uuid>,
  extracted: &ExtractedRelationship,
  asserted_by: Option<Uuid>,
  target_literal: Option<String>,
  db: &C,
) -> Result<(), AppError> {
  let mut existing = episode_relationship_mention::Entity::find()
    .filter(episode_relationship_mention::Column::EpisodeId.eq(episode_id));
  existing = match (relationship_id, alias_id) {
    (Some(id), _) => {
      existing.filter(episode_relationship_mention::Column::RelationshipId.eq(id))
    }
    (None, Some(id)) => existing.filter(episode_relationship_mention::Column::AliasId.eq(id)),
    (None, None) => return Ok(()),
  };
  if existing.one(db).await?.is_some() {
    return Ok(());
  }

  episode_relationship_mention::Model {
    id: Uuid::now_v7(),
    episode_id,
    relationship_id,
    extracted_fact: extracted.fact.clone(),
    asserted_by_entity_id: asserted_by,
    source_type: extracted.source_type.to_string(),
    target_literal,
    alias_id,
    confidence: 1.0,
    created_at: Utc::now().into(),
  }
  .into_active_model()
  .insert(db)
  .await?;
  Ok(())
}

/// Upsert `(episode, entity)` mention counts. Counts are recomputed from
/// this pass, so a replay converges instead of accumulating.
async fn upsert_entity_mentions<C: ConnectionTrait>(
  resolved: &[ResolvedEntity],
  episode_id: Uuid,
  db: &C,
) -> Result<usize, AppError> {
  let mut counts: HashMap<Uuid, i32> = HashMap::new();
  for entity in resolved {
    *counts.entry(entity.entity_id).or_insert(0) += 1;
  }

  let total = counts.len();
  for (entity_id, mention_count) in counts {
    episode_entity_mention::Entity::insert(
      episode_entity_mention::Model {
        episode_id,
        entity_id,
        mention_count,
      }
      .into_active_model(),
    )
    .on_conflict(
      OnConflict::columns([
        episode_entity_mention::Column::EpisodeId,
        episode_entity_mention::Column::EntityId,
      ])
      .update_column(episode_entity_mention::Column::MentionCount)
      .to_owned(),
    )
    .exec_without_returning(db)
    .await?;
  }
  Ok(total)
}
