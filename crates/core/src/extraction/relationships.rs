use std::fmt::Write;

use cortex_ai::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestUserMessage, LlmClient,
};
use cortex_shared::AppError;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::episode::EpisodeContext;
use crate::resolution::ResolvedEntity;
use crate::temporal::normalize_flexible_date;
use crate::vocab::{
  EXCLUSIVE_RELATIONS, IDENTITY_RELATIONS, SourceType, TEMPORAL_RELATIONS, is_identity_relation,
  is_known_relation, is_temporal_relation,
};

// ──────────────────────────────────────────────────
// LLM output types
// ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RelationshipExtractionOutput {
  pub relationships: Vec<RawRelationship>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RawRelationship {
  /// Index into the resolved-entity list.
  pub source_entity_id: i64,
  /// UPPER_SNAKE relation type.
  pub relation_type: String,
  /// Index into the resolved-entity list, for entity-targeted relations.
  pub target_entity_id: Option<i64>,
  /// Literal target for identity and temporal relations.
  pub target_literal: Option<String>,
  /// Natural-language sentence stating the fact.
  pub fact: String,
  /// "self_disclosed", "mentioned", or "inferred".
  pub source_type: Option<String>,
  pub valid_at: Option<String>,
  pub invalid_at: Option<String>,
}

/// A validated relationship, still index-addressed into the resolved list.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRelationship {
  pub source_index: usize,
  pub relation_type: String,
  pub target: RelationshipTarget,
  pub fact: String,
  pub source_type: SourceType,
  pub valid_at: Option<String>,
  pub invalid_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipTarget {
  /// Index into the resolved-entity list.
  Entity(usize),
  Literal(String),
}

// ──────────────────────────────────────────────────
// Prompt
// ──────────────────────────────────────────────────

const RELATIONSHIP_SYSTEM_PROMPT: &str = "\
You extract typed facts between resolved entities from personal \
communications.

Each fact is a triple: a source entity (by its integer id from \
<RESOLVED_ENTITIES>), an UPPER_SNAKE relation type, and either a target \
entity id or a target_literal string — never both.

Relation guidance:
1. Identity relations take target_literal, never a target entity.
2. Temporal relations take an ISO date literal (YYYY, YYYY-MM, or \
YYYY-MM-DD).
3. Exclusive relations (current employer, home, partner) should carry \
valid_at when the episode states or implies a date; resolve relative dates \
against <REFERENCE_TIME>.
4. Prefer the documented relation types; invent a new UPPER_SNAKE type only \
when none fits.
5. Each fact needs a `fact` sentence a person would say aloud.
6. Classify each fact's source_type: \"self_disclosed\" (author about \
themselves), \"mentioned\" (stated about someone else), \"inferred\" \
(implied only).";

fn build_user_content(
  resolved: &[ResolvedEntity],
  ctx: &EpisodeContext,
  custom_instructions: Option<&str>,
) -> String {
  let mut out = String::new();

  let entities: Vec<serde_json::Value> = resolved
    .iter()
    .enumerate()
    .map(|(index, entity)| {
      serde_json::json!({
        "id": index,
        "uuid": entity.entity_id,
        "name": entity.name,
        "entity_type": entity.entity_type.to_string(),
      })
    })
    .collect();
  let _ = writeln!(
    out,
    "<RESOLVED_ENTITIES>\n{}\n</RESOLVED_ENTITIES>\n",
    serde_json::Value::Array(entities)
  );

  let _ = writeln!(
    out,
    "<REFERENCE_TIME>\n{}\n</REFERENCE_TIME>\n",
    ctx.reference_time.to_rfc3339()
  );

  let _ = writeln!(
    out,
    "<RELATION_TYPES identity=\"{}\" temporal=\"{}\" exclusive=\"{}\" />\n",
    IDENTITY_RELATIONS.join(","),
    TEMPORAL_RELATIONS.join(","),
    EXCLUSIVE_RELATIONS.join(",")
  );

  if !ctx.previous_episodes.is_empty() {
    let _ = writeln!(out, "<PREVIOUS_EPISODES>");
    for excerpt in &ctx.previous_episodes {
      let _ = writeln!(out, "---\n{excerpt}");
    }
    let _ = writeln!(out, "</PREVIOUS_EPISODES>\n");
  }

  if let Some(instructions) = custom_instructions {
    let _ = writeln!(out, "<INSTRUCTIONS>\n{instructions}\n</INSTRUCTIONS>\n");
  }

  let _ = write!(out, "<CURRENT_EPISODE>\n{}\n</CURRENT_EPISODE>", ctx.content);
  out
}

// ──────────────────────────────────────────────────
// Validation
// ──────────────────────────────────────────────────

fn index_in_range(raw: i64, len: usize) -> Option<usize> {
  usize::try_from(raw).ok().filter(|&i| i < len)
}

/// Apply the persistence rules to raw LLM rows. Every discarded row is
/// logged; date fields that fail to parse are cleared, not fatal.
fn validate_relationships(
  raw: Vec<RawRelationship>,
  resolved_len: usize,
) -> Vec<ExtractedRelationship> {
  let mut validated = Vec::with_capacity(raw.len());

  for row in raw {
    let relation_type = row
      .relation_type
      .trim()
      .to_uppercase()
      .replace([' ', '-'], "_");
    let fact = row.fact.trim().to_owned();
    if relation_type.is_empty() || fact.is_empty() {
      tracing::debug!("dropping relationship with empty type or fact");
      continue;
    }

    let Some(source_index) = index_in_range(row.source_entity_id, resolved_len) else {
      tracing::debug!(
        source = row.source_entity_id,
        relation_type,
        "dropping relationship with out-of-range source index"
      );
      continue;
    };

    let identity = is_identity_relation(&relation_type);
    let literal = row
      .target_literal
      .as_deref()
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(str::to_owned);
    let entity_index = row
      .target_entity_id
      .and_then(|raw| index_in_range(raw, resolved_len));

    // Observed upstream: identity relations sometimes arrive entity-targeted.
    // When both targets are present, identity prefers the literal; everything
    // else prefers the entity reference.
    let target = if identity {
      match literal {
        Some(literal) => RelationshipTarget::Literal(literal),
        None => {
          tracing::debug!(relation_type, "dropping identity relation without a literal");
          continue;
        }
      }
    } else {
      match (entity_index, literal) {
        (Some(index), _) => RelationshipTarget::Entity(index),
        (None, Some(literal)) => RelationshipTarget::Literal(literal),
        (None, None) => {
          tracing::debug!(relation_type, "dropping relationship with no usable target");
          continue;
        }
      }
    };

    // Temporal literals must be usable dates.
    let target = match target {
      RelationshipTarget::Literal(literal) if is_temporal_relation(&relation_type) => {
        match normalize_flexible_date(&literal) {
          Some(date) => RelationshipTarget::Literal(date),
          None => {
            tracing::debug!(relation_type, literal, "dropping temporal fact with unparseable date");
            continue;
          }
        }
      }
      other => other,
    };

    if !is_known_relation(&relation_type) {
      tracing::warn!(relation_type, "unknown relation type, persisting anyway");
    }

    let valid_at = row.valid_at.as_deref().and_then(normalize_flexible_date);
    let invalid_at = row.invalid_at.as_deref().and_then(normalize_flexible_date);

    validated.push(ExtractedRelationship {
      source_index,
      relation_type,
      target,
      fact,
      source_type: row
        .source_type
        .as_deref()
        .map_or(SourceType::Mentioned, SourceType::from_raw),
      valid_at,
      invalid_at,
    });
  }

  validated
}

// ──────────────────────────────────────────────────
// Extraction call
// ──────────────────────────────────────────────────

pub async fn extract_relationships(
  ctx: &EpisodeContext,
  resolved: &[ResolvedEntity],
  custom_instructions: Option<&str>,
  llm: &LlmClient,
) -> Result<Vec<ExtractedRelationship>, AppError> {
  if resolved.is_empty() {
    return Ok(vec![]);
  }

  let system = ChatCompletionRequestSystemMessage::from(RELATIONSHIP_SYSTEM_PROMPT);
  let user = ChatCompletionRequestUserMessage::from(build_user_content(
    resolved,
    ctx,
    custom_instructions,
  ));

  let output = llm
    .generate_object::<RelationshipExtractionOutput>(
      vec![
        ChatCompletionRequestMessage::System(system),
        ChatCompletionRequestMessage::User(user),
      ],
      "relationship_extraction",
      Some("Typed facts between resolved entities".to_owned()),
    )
    .await?;

  let relationships = validate_relationships(output.relationships, resolved.len());
  tracing::debug!(
    episode_id = %ctx.episode.id,
    relationships = relationships.len(),
    "relationship extraction complete"
  );
  Ok(relationships)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::vocab::EntityType;
  use chrono::Utc;

  #[test]
  fn prompt_lists_resolved_entities_and_relation_subsets() {
    let now = Utc::now();
    let ctx = EpisodeContext {
      episode: cortex_entities::episode::Model {
        id: uuid::Uuid::now_v7(),
        definition_id: None,
        channel: "gmail".to_owned(),
        thread_id: None,
        start_time: now.into(),
        end_time: now.into(),
        event_count: 1,
        content: None,
        created_at: now.into(),
      },
      content: "Started at Anthropic today".to_owned(),
      reference_time: now,
      previous_episodes: vec![],
      known_entities: vec![],
    };
    let tyler = uuid::Uuid::now_v7();
    let resolved = vec![ResolvedEntity {
      index: 0,
      entity_id: tyler,
      name: "Tyler".to_owned(),
      entity_type: EntityType::Person,
      created: false,
    }];

    let prompt = build_user_content(&resolved, &ctx, None);
    assert!(prompt.contains("<RESOLVED_ENTITIES>"));
    assert!(prompt.contains(&tyler.to_string()));
    assert!(prompt.contains("\"name\":\"Tyler\""));
    assert!(prompt.contains("identity=\"HAS_EMAIL,"));
    assert!(prompt.contains("exclusive=\"WORKS_AT,"));
    assert!(prompt.contains("<CURRENT_EPISODE>\nStarted at Anthropic today"));
  }

  fn raw(source: i64, relation_type: &str) -> RawRelationship {
    RawRelationship {
      source_entity_id: source,
      relation_type: relation_type.to_owned(),
      target_entity_id: None,
      target_literal: None,
      fact: "a fact".to_owned(),
      source_type: None,
      valid_at: None,
      invalid_at: None,
    }
  }

  #[test]
  fn out_of_range_source_index_is_dropped() {
    let mut row = raw(5, "KNOWS");
    row.target_entity_id = Some(0);
    assert!(validate_relationships(vec![row], 2).is_empty());

    let mut negative = raw(-1, "KNOWS");
    negative.target_entity_id = Some(0);
    assert!(validate_relationships(vec![negative], 2).is_empty());
  }

  #[test]
  fn identity_with_both_targets_prefers_the_literal() {
    let mut row = raw(0, "HAS_EMAIL");
    row.target_entity_id = Some(1);
    row.target_literal = Some("casey@anthropic.com".to_owned());

    let out = validate_relationships(vec![row], 2);
    assert_eq!(
      out[0].target,
      RelationshipTarget::Literal("casey@anthropic.com".to_owned())
    );
  }

  #[test]
  fn non_identity_with_both_targets_prefers_the_entity() {
    let mut row = raw(0, "WORKS_AT");
    row.target_entity_id = Some(1);
    row.target_literal = Some("Anthropic".to_owned());

    let out = validate_relationships(vec![row], 2);
    assert_eq!(out[0].target, RelationshipTarget::Entity(1));
  }

  #[test]
  fn identity_without_literal_is_dropped() {
    let mut row = raw(0, "HAS_PHONE");
    row.target_entity_id = Some(1);
    assert!(validate_relationships(vec![row], 2).is_empty());
  }

  #[test]
  fn bad_dates_clear_the_field_not_the_row() {
    let mut row = raw(0, "WORKS_AT");
    row.target_entity_id = Some(1);
    row.valid_at = Some("sometime soon".to_owned());
    row.invalid_at = Some("2026-01".to_owned());

    let out = validate_relationships(vec![row], 2);
    assert_eq!(out[0].valid_at, None);
    assert_eq!(out[0].invalid_at, Some("2026-01".to_owned()));
  }

  #[test]
  fn temporal_fact_with_unparseable_date_is_dropped() {
    let mut row = raw(0, "BORN_ON");
    row.target_literal = Some("the nineties".to_owned());
    assert!(validate_relationships(vec![row], 1).is_empty());

    let mut ok = raw(0, "BORN_ON");
    ok.target_literal = Some("1993-04-12".to_owned());
    let out = validate_relationships(vec![ok], 1);
    assert_eq!(
      out[0].target,
      RelationshipTarget::Literal("1993-04-12".to_owned())
    );
  }

  #[test]
  fn unknown_source_type_coerces_to_mentioned() {
    let mut row = raw(0, "KNOWS");
    row.target_entity_id = Some(0);
    row.source_type = Some("gossip".to_owned());
    let out = validate_relationships(vec![row], 1);
    assert_eq!(out[0].source_type, SourceType::Mentioned);
  }

  #[test]
  fn relation_type_is_normalized_to_upper_snake() {
    let mut row = raw(0, "works at");
    row.target_entity_id = Some(0);
    let out = validate_relationships(vec![row], 1);
    assert_eq!(out[0].relation_type, "WORKS_AT");
  }
}
