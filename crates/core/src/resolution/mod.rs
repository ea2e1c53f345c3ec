//! Entity resolution: map each extracted candidate to an existing graph
//! entity or create a new one. Candidate order is preserved so relationship
//! extraction can reference candidates by index.
//!
//! Per candidate: exact alias match → shared-alias short-circuit → candidate
//! pool (name prefix, alias prefix, embedding nearest) → deterministic
//! scoring → LLM tiebreaker → tombstone chase → transactional creation.

mod scoring;
pub use scoring::{ACCEPT_THRESHOLD, MARGIN_THRESHOLD, token_set_jaccard};
use scoring::{ScoreInputs, accept_deterministically, composite_score, edit_similarity};

use std::collections::HashMap;
use std::fmt::Write;

use anyhow::anyhow;
use chrono::Utc;
use cortex_ai::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestUserMessage, EmbeddingBatcher, LlmClient,
};
use cortex_entities::{entity, entity_alias};
use cortex_shared::{APP_ENV, AppError, ErrorKind};
use schemars::JsonSchema;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
  FromQueryResult, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
  TransactionTrait,
  prelude::{Expr, PgVector},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::episode::EpisodeContext;
use crate::extraction::ExtractedEntity;
use crate::identity::{is_unique_violation, name_alias_model, normalize_name};
use crate::vocab::{AliasType, EntityType};

/// Pool size for deterministic scoring.
const POOL_LIMIT: u64 = 25;
/// Cosine-nearest pool leg size.
const EMBEDDING_POOL_LIMIT: i64 = 10;
/// Pool members shown to the LLM tiebreaker.
const TIEBREAK_CHOICES: usize = 4;
/// Upper bound on merge-chain hops before declaring a data invariant.
const MAX_CHAIN_HOPS: usize = 32;

/// One resolved candidate, index-aligned with the extractor output.
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
  pub index: usize,
  pub entity_id: Uuid,
  pub name: String,
  pub entity_type: EntityType,
  /// `false` when the candidate matched an existing entity.
  pub created: bool,
}

struct PoolMember {
  entity: entity::Model,
  aliases: Vec<entity_alias::Model>,
  embedding_similarity: Option<f32>,
  score: f64,
}

/// Resolve every candidate, in order. Resolution only reads the graph except
/// for new-entity creation, which writes one entity row and one name alias
/// inside a single transaction.
pub async fn resolve_entities(
  candidates: &[ExtractedEntity],
  ctx: &EpisodeContext,
  llm: &LlmClient,
  batcher: &EmbeddingBatcher,
  db: &DatabaseConnection,
) -> Result<Vec<ResolvedEntity>, AppError> {
  let mut resolved = Vec::with_capacity(candidates.len());

  for (index, candidate) in candidates.iter().enumerate() {
    let entity = resolve_one(candidate, ctx, llm, batcher, db).await?;
    resolved.push(ResolvedEntity {
      index,
      entity_id: entity.0.id,
      name: entity.0.canonical_name,
      entity_type: EntityType::from_raw(i64::from(entity.0.entity_type_id)),
      created: entity.1,
    });
  }

  Ok(resolved)
}

async fn resolve_one(
  candidate: &ExtractedEntity,
  ctx: &EpisodeContext,
  llm: &LlmClient,
  batcher: &EmbeddingBatcher,
  db: &DatabaseConnection,
) -> Result<(entity::Model, bool), AppError> {
  // 1-2. Exact alias match, unless the bucket is shared.
  if let Some(existing) = exact_alias_match(candidate, db).await? {
    let terminal = chase_merge_chain(existing, db).await?;
    return Ok((terminal, false));
  }

  // 3. Candidate pool.
  let name_embedding = if APP_ENV.skip_embeddings {
    None
  } else {
    match batcher.embed(candidate.name.clone()).await {
      Ok(vector) => Some(vector),
      Err(err) => {
        tracing::warn!(name = %candidate.name, error = %err, "candidate embedding failed, continuing without");
        None
      }
    }
  };
  let mut pool = candidate_pool(candidate, name_embedding.as_ref(), db).await?;

  // 4. Deterministic scoring.
  for member in &mut pool {
    member.score = score_member(candidate, member);
  }
  pool.sort_by(|a, b| b.score.total_cmp(&a.score));

  if let [top, rest @ ..] = pool.as_slice() {
    let runner_up = rest.first().map(|m| m.score);
    if accept_deterministically(top.score, runner_up) {
      let terminal = chase_merge_chain(top.entity.clone(), db).await?;
      return Ok((terminal, false));
    }

    // 5. LLM tiebreaker over the strongest few.
    if let Some(choice) = llm_tiebreak(candidate, &pool, ctx, llm).await? {
      let terminal = chase_merge_chain(pool[choice].entity.clone(), db).await?;
      return Ok((terminal, false));
    }
  }

  // 7. New entity.
  create_entity(candidate, ctx, db).await
}

// ──────────────────────────────────────────────────
// Exact alias match
// ──────────────────────────────────────────────────

/// A single non-shared `name` alias in the candidate's bucket resolves
/// directly, provided the owning entity is type-compatible. Shared buckets
/// never short-circuit.
async fn exact_alias_match(
  candidate: &ExtractedEntity,
  db: &DatabaseConnection,
) -> Result<Option<entity::Model>, AppError> {
  let normalized = normalize_name(&candidate.name);
  let rows = entity_alias::Entity::find()
    .filter(entity_alias::Column::AliasType.eq(AliasType::Name.to_string()))
    .filter(entity_alias::Column::Normalized.eq(normalized.as_str()))
    .all(db)
    .await?;

  let mut non_shared = rows.iter().filter(|row| !row.is_shared);
  let (Some(only), None) = (non_shared.next(), non_shared.next()) else {
    return Ok(None);
  };

  let Some(owner) = entity::Entity::find_by_id(only.entity_id).one(db).await? else {
    return Err(AppError::data_invariant(anyhow!(
      "alias {} references missing entity {}",
      only.id,
      only.entity_id
    )));
  };

  let owner_type = EntityType::from_raw(i64::from(owner.entity_type_id));
  if owner_type.compatible_with(candidate.entity_type) {
    Ok(Some(owner))
  } else {
    Ok(None)
  }
}

// ──────────────────────────────────────────────────
// Candidate pool
// ──────────────────────────────────────────────────

#[derive(Debug, FromQueryResult)]
struct NearestEntityRow {
  id: Uuid,
  similarity: f64,
}

async fn candidate_pool(
  candidate: &ExtractedEntity,
  name_embedding: Option<&PgVector>,
  db: &DatabaseConnection,
) -> Result<Vec<PoolMember>, AppError> {
  let normalized = normalize_name(&candidate.name);
  let prefix = format!("{}%", escape_like(&normalized));
  let mut similarity_by_id: HashMap<Uuid, f32> = HashMap::new();

  // Recent same-type entities whose name prefix-matches.
  let mut pool_entities: Vec<entity::Model> = entity::Entity::find()
    .filter(entity::Column::MergedInto.is_null())
    .filter(entity::Column::EntityTypeId.eq(candidate.entity_type.id()))
    .filter(Expr::cust_with_values(
      "lower(canonical_name) LIKE ?",
      [prefix.clone()],
    ))
    .order_by_desc(entity::Column::CreatedAt)
    .limit(POOL_LIMIT)
    .all(db)
    .await?;

  // Entities whose name/nickname aliases prefix-match.
  let alias_owner_ids: Vec<Uuid> = entity_alias::Entity::find()
    .filter(
      entity_alias::Column::AliasType
        .is_in([AliasType::Name.to_string(), AliasType::Nickname.to_string()]),
    )
    .filter(Expr::cust_with_values("normalized LIKE ?", [prefix]))
    .limit(POOL_LIMIT)
    .all(db)
    .await?
    .into_iter()
    .map(|row| row.entity_id)
    .collect();

  if !alias_owner_ids.is_empty() {
    let owners = entity::Entity::find()
      .filter(entity::Column::Id.is_in(alias_owner_ids))
      .filter(entity::Column::MergedInto.is_null())
      .filter(entity::Column::EntityTypeId.eq(candidate.entity_type.id()))
      .all(db)
      .await?;
    pool_entities.extend(owners);
  }

  // Cosine-nearest leg over stored name embeddings.
  if let Some(embedding) = name_embedding {
    let sql = r"
    SELECT e.id AS id, 1 - (emb.embedding <=> $1) AS similarity
    FROM embeddings emb
    JOIN entities e ON e.id = emb.target_id
    WHERE emb.target_type = 'entity'
      AND emb.model = $2
      AND e.merged_into IS NULL
      AND e.entity_type_id = $3
    ORDER BY emb.embedding <=> $1
    LIMIT $4;
    ";
    let stmt = Statement::from_sql_and_values(
      DbBackend::Postgres,
      sql,
      vec![
        embedding.clone().into(),
        APP_ENV.embedding_model.clone().into(),
        candidate.entity_type.id().into(),
        EMBEDDING_POOL_LIMIT.into(),
      ],
    );
    let rows = db.query_all_raw(stmt).await?;
    let mut nearest_ids = Vec::with_capacity(rows.len());
    for row in rows {
      let parsed = NearestEntityRow::from_query_result(&row, "")?;
      similarity_by_id.insert(parsed.id, parsed.similarity as f32);
      nearest_ids.push(parsed.id);
    }
    if !nearest_ids.is_empty() {
      let nearest = entity::Entity::find()
        .filter(entity::Column::Id.is_in(nearest_ids))
        .all(db)
        .await?;
      pool_entities.extend(nearest);
    }
  }

  // Dedupe, clip, and load aliases for overlap scoring.
  let mut seen = std::collections::HashSet::new();
  pool_entities.retain(|e| seen.insert(e.id));
  pool_entities.truncate(POOL_LIMIT as usize);

  if pool_entities.is_empty() {
    return Ok(vec![]);
  }

  let alias_rows = entity_alias::Entity::find()
    .filter(entity_alias::Column::EntityId.is_in(pool_entities.iter().map(|e| e.id)))
    .all(db)
    .await?;
  let mut aliases_by_entity: HashMap<Uuid, Vec<entity_alias::Model>> = HashMap::new();
  for row in alias_rows {
    aliases_by_entity.entry(row.entity_id).or_default().push(row);
  }

  Ok(
    pool_entities
      .into_iter()
      .map(|entity| PoolMember {
        embedding_similarity: similarity_by_id.get(&entity.id).copied(),
        aliases: aliases_by_entity.remove(&entity.id).unwrap_or_default(),
        entity,
        score: 0.0,
      })
      .collect(),
  )
}

fn escape_like(input: &str) -> String {
  input.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn score_member(candidate: &ExtractedEntity, member: &PoolMember) -> f64 {
  let candidate_norm = normalize_name(&candidate.name);
  let member_norm = normalize_name(&member.entity.canonical_name);

  // Alias overlap: the candidate name appearing in the member's name-type
  // aliases counts; identity-handle overlap is only known post-promotion,
  // so any same-normalized name alias is the signal here.
  let alias_overlap = member.aliases.iter().any(|alias| {
    alias.alias_type == AliasType::Name.to_string() && alias.normalized == candidate_norm
  });

  composite_score(ScoreInputs {
    exact_name: candidate_norm == member_norm,
    jaccard: token_set_jaccard(&candidate_norm, &member_norm),
    edit_similarity: edit_similarity(&candidate_norm, &member_norm),
    type_match: EntityType::from_raw(i64::from(member.entity.entity_type_id))
      .compatible_with(candidate.entity_type),
    alias_overlap,
    embedding_similarity: member.embedding_similarity,
  })
}

// ──────────────────────────────────────────────────
// LLM tiebreaker
// ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct TiebreakOutput {
  /// Zero-based index of the chosen candidate, or -1 for "new entity".
  choice: i64,
}

const TIEBREAK_SYSTEM_PROMPT: &str = "\
You disambiguate entity references in a personal knowledge graph.

Given a mention from an episode and a numbered list of existing entities, \
answer with the number of the entity the mention refers to, or -1 if it is a \
different entity not on the list. Only match when the episode context \
supports it; prefer -1 over a guess.";

async fn llm_tiebreak(
  candidate: &ExtractedEntity,
  pool: &[PoolMember],
  ctx: &EpisodeContext,
  llm: &LlmClient,
) -> Result<Option<usize>, AppError> {
  let shown = pool.len().min(TIEBREAK_CHOICES);
  let mut prompt = String::new();
  let _ = writeln!(
    prompt,
    "Mention: {:?} (type: {})\n\nExisting entities:",
    candidate.name, candidate.entity_type
  );
  for (index, member) in pool[..shown].iter().enumerate() {
    let aliases: Vec<&str> = member
      .aliases
      .iter()
      .map(|alias| alias.alias.as_str())
      .take(5)
      .collect();
    let _ = writeln!(
      prompt,
      "{index}. {} — summary: {}; aliases: [{}]",
      member.entity.canonical_name,
      member.entity.summary.as_deref().unwrap_or("none"),
      aliases.join(", ")
    );
  }
  let _ = write!(
    prompt,
    "\n<REFERENCE_TIME>{}</REFERENCE_TIME>\n<EPISODE>\n{}\n</EPISODE>",
    ctx.reference_time.to_rfc3339(),
    ctx.content
  );

  let system = ChatCompletionRequestSystemMessage::from(TIEBREAK_SYSTEM_PROMPT);
  let user = ChatCompletionRequestUserMessage::from(prompt);

  let output = llm
    .generate_object::<TiebreakOutput>(
      vec![
        ChatCompletionRequestMessage::System(system),
        ChatCompletionRequestMessage::User(user),
      ],
      "resolution_tiebreak",
      Some("Choose an existing entity or -1 for a new one".to_owned()),
    )
    .await;

  let choice = match output {
    Ok(output) => output.choice,
    // Invalid tiebreak output means "new entity", not a failed episode.
    Err(err) if err.kind() == ErrorKind::MalformedLlmOutput => {
      tracing::warn!(name = %candidate.name, error = %err, "tiebreak output invalid, treating as new entity");
      -1
    }
    Err(err) => return Err(err),
  };

  Ok(usize::try_from(choice).ok().filter(|&index| index < shown))
}

// ──────────────────────────────────────────────────
// Tombstone chase
// ──────────────────────────────────────────────────

/// Follow `merged_into` to the active terminal entity. Cycles are a data
/// invariant violation. Long chains are compacted opportunistically by
/// repointing the entry row at the terminal.
pub(crate) async fn chase_merge_chain(
  start: entity::Model,
  db: &DatabaseConnection,
) -> Result<entity::Model, AppError> {
  let Some(mut next_id) = start.merged_into else {
    return Ok(start);
  };

  let mut visited = std::collections::HashSet::from([start.id]);
  let mut hops = 0usize;
  let current: entity::Model;

  loop {
    if !visited.insert(next_id) {
      return Err(AppError::data_invariant(anyhow!(
        "merge chain cycle through entity {next_id}"
      )));
    }
    hops += 1;
    if hops > MAX_CHAIN_HOPS {
      return Err(AppError::data_invariant(anyhow!(
        "merge chain from {} exceeds {MAX_CHAIN_HOPS} hops",
        start.id
      )));
    }

    let node = entity::Entity::find_by_id(next_id)
      .one(db)
      .await?
      .ok_or_else(|| {
        AppError::data_invariant(anyhow!("merge chain points at missing entity {next_id}"))
      })?;

    match node.merged_into {
      Some(id) => next_id = id,
      None => {
        current = node;
        break;
      }
    }
  }

  if hops > 1 {
    // Compact: repoint the entry row straight at the terminal.
    let mut active: entity::ActiveModel = start.into_active_model();
    active.merged_into = Set(Some(current.id));
    active.updated_at = Set(Utc::now().into());
    active.update(db).await?;
  }

  Ok(current)
}

// ──────────────────────────────────────────────────
// New entity creation
// ──────────────────────────────────────────────────

/// Insert entity + canonical-name alias in one transaction. Losing the
/// unique-index race on the name bucket means another worker created the
/// same entity; recover its row instead of failing the episode.
async fn create_entity(
  candidate: &ExtractedEntity,
  ctx: &EpisodeContext,
  db: &DatabaseConnection,
) -> Result<(entity::Model, bool), AppError> {
  let now = Utc::now();
  let model = entity::Model {
    id: Uuid::now_v7(),
    canonical_name: candidate.name.clone(),
    entity_type_id: candidate.entity_type.id(),
    summary: candidate.summary.clone(),
    origin: Some(format!("episode:{}", ctx.episode.id)),
    confidence: 1.0,
    merged_into: None,
    created_at: now.into(),
    updated_at: now.into(),
  };

  let insert = async {
    let txn = db.begin().await?;
    let inserted = model.clone().into_active_model().insert(&txn).await?;
    name_alias_model(inserted.id, &candidate.name)
      .insert(&txn)
      .await?;
    txn.commit().await?;
    Ok::<entity::Model, AppError>(inserted)
  };

  match insert.await {
    Ok(inserted) => {
      tracing::debug!(
        entity_id = %inserted.id,
        name = %inserted.canonical_name,
        "created new entity"
      );
      Ok((inserted, true))
    }
    Err(err) if is_unique_violation(&err) => {
      // The winner's alias row is in our bucket now.
      let winner = exact_alias_match(candidate, db).await?.ok_or_else(|| {
        AppError::constraint_violation(anyhow!(
          "lost creation race for {:?} but found no winner",
          candidate.name
        ))
      })?;
      tracing::debug!(entity_id = %winner.id, "recovered winner after creation race");
      let terminal = chase_merge_chain(winner, db).await?;
      Ok((terminal, false))
    }
    Err(err) => Err(err),
  }
}
