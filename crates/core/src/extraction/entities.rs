use std::fmt::Write;

use cortex_ai::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestUserMessage, LlmClient,
};
use cortex_shared::AppError;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::episode::EpisodeContext;
use crate::vocab::{EntityType, SourceType};

// ──────────────────────────────────────────────────
// LLM output types
// ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EntityExtractionOutput {
  /// Distinct entities in order of first appearance.
  pub entities: Vec<RawEntity>,
  /// Blanket provenance for the episode's assertions:
  /// "self_disclosed", "mentioned", or "inferred".
  pub source_type: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RawEntity {
  pub name: String,
  /// 0 Entity / 1 Person / 2 Company / 3 Project / 4 Location / 5 Event /
  /// 6 Document / 7 Pet
  pub entity_type_id: i64,
  pub summary: Option<String>,
}

/// A validated candidate entity, not yet resolved against the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
  pub name: String,
  pub entity_type: EntityType,
  pub summary: Option<String>,
}

pub struct EntityExtraction {
  pub entities: Vec<ExtractedEntity>,
  pub source_type: SourceType,
}

// ──────────────────────────────────────────────────
// Prompt
// ──────────────────────────────────────────────────

const ENTITY_SYSTEM_PROMPT: &str = "\
You extract entities from personal communications for a knowledge graph.

Return every distinct person, company, project, location, event, document, or \
pet the episode mentions, in order of first appearance. Assign each one an \
entity_type_id:

  0 generic entity (only when unsure), 1 person, 2 company, 3 project, \
4 location, 5 event, 6 document, 7 pet

Rules:
1. Entities are things worth traversing to. Do NOT emit abstract categories \
(hobbies, professions, topics) — those become relationships, not entities.
2. Dates, phone numbers, email addresses, and handles are NEVER entities.
3. Use the speaker's full name when it is known from the known-entities hints.
4. Deduplicate: one entry per entity even if it appears many times.
5. Give each entity a one-sentence summary when the episode supports one.

Also classify the episode's overall source_type: \"self_disclosed\" when the \
author talks about themselves, \"mentioned\" when facts concern third parties, \
\"inferred\" when the facts are only implied.";

fn build_user_content(ctx: &EpisodeContext, custom_instructions: Option<&str>) -> String {
  let mut out = String::new();

  if !ctx.known_entities.is_empty() {
    let _ = writeln!(out, "<KNOWN_ENTITIES>");
    for (name, entity_type) in &ctx.known_entities {
      let _ = writeln!(out, "- {name} ({entity_type})");
    }
    let _ = writeln!(out, "</KNOWN_ENTITIES>\n");
  }

  if !ctx.previous_episodes.is_empty() {
    let _ = writeln!(out, "<PREVIOUS_EPISODES>");
    for excerpt in &ctx.previous_episodes {
      let _ = writeln!(out, "---\n{excerpt}");
    }
    let _ = writeln!(out, "</PREVIOUS_EPISODES>\n");
  }

  let _ = writeln!(
    out,
    "<REFERENCE_TIME>\n{}\n</REFERENCE_TIME>\n",
    ctx.reference_time.to_rfc3339()
  );

  if let Some(instructions) = custom_instructions {
    let _ = writeln!(out, "<INSTRUCTIONS>\n{instructions}\n</INSTRUCTIONS>\n");
  }

  let _ = write!(
    out,
    "<CURRENT_EPISODE channel=\"{}\">\n{}\n</CURRENT_EPISODE>",
    ctx.episode.channel, ctx.content
  );

  out
}

// ──────────────────────────────────────────────────
// Validation
// ──────────────────────────────────────────────────

/// Drop empty names, deduplicate by case-folded name (first occurrence wins,
/// order preserved), and clamp type ids to the documented range.
fn validate_entities(raw: Vec<RawEntity>) -> Vec<ExtractedEntity> {
  let mut seen = std::collections::HashSet::new();
  let mut entities = Vec::with_capacity(raw.len());

  for candidate in raw {
    let name = candidate.name.trim().to_owned();
    if name.is_empty() {
      tracing::debug!("dropping extracted entity with empty name");
      continue;
    }
    if !seen.insert(name.to_lowercase()) {
      continue;
    }
    entities.push(ExtractedEntity {
      name,
      entity_type: EntityType::from_raw(candidate.entity_type_id),
      summary: candidate
        .summary
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty()),
    });
  }

  entities
}

// ──────────────────────────────────────────────────
// Extraction call
// ──────────────────────────────────────────────────

/// Propose candidate entities for one episode. Never consults the graph;
/// the hints in `ctx.known_entities` are the only graph-derived input.
pub async fn extract_entities(
  ctx: &EpisodeContext,
  custom_instructions: Option<&str>,
  llm: &LlmClient,
) -> Result<EntityExtraction, AppError> {
  let system = ChatCompletionRequestSystemMessage::from(ENTITY_SYSTEM_PROMPT);
  let user = ChatCompletionRequestUserMessage::from(build_user_content(ctx, custom_instructions));

  let output = llm
    .generate_object::<EntityExtractionOutput>(
      vec![
        ChatCompletionRequestMessage::System(system),
        ChatCompletionRequestMessage::User(user),
      ],
      "entity_extraction",
      Some("Distinct entities mentioned in one episode".to_owned()),
    )
    .await?;

  let entities = validate_entities(output.entities);
  tracing::debug!(
    episode_id = %ctx.episode.id,
    entities = entities.len(),
    "entity extraction complete"
  );

  Ok(EntityExtraction {
    entities,
    source_type: SourceType::from_raw(&output.source_type),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn test_ctx() -> EpisodeContext {
    let now = Utc::now();
    EpisodeContext {
      episode: cortex_entities::episode::Model {
        id: uuid::Uuid::now_v7(),
        definition_id: None,
        channel: "imessage".to_owned(),
        thread_id: None,
        start_time: now.into(),
        end_time: now.into(),
        event_count: 1,
        content: Some("hello".to_owned()),
        created_at: now.into(),
      },
      content: "My new work email is casey@anthropic.com btw".to_owned(),
      reference_time: now,
      previous_episodes: vec!["earlier chatter".to_owned()],
      known_entities: vec![("Casey Adams".to_owned(), EntityType::Person)],
    }
  }

  #[test]
  fn prompt_carries_all_four_sections() {
    let prompt = build_user_content(&test_ctx(), Some("focus on people"));
    assert!(prompt.contains("<KNOWN_ENTITIES>"));
    assert!(prompt.contains("- Casey Adams (person)"));
    assert!(prompt.contains("<PREVIOUS_EPISODES>"));
    assert!(prompt.contains("earlier chatter"));
    assert!(prompt.contains("<REFERENCE_TIME>"));
    assert!(prompt.contains("<INSTRUCTIONS>\nfocus on people"));
    assert!(prompt.contains("<CURRENT_EPISODE channel=\"imessage\">"));
    assert!(prompt.contains("casey@anthropic.com"));
  }

  #[test]
  fn empty_hint_sections_are_omitted() {
    let mut ctx = test_ctx();
    ctx.known_entities.clear();
    ctx.previous_episodes.clear();
    let prompt = build_user_content(&ctx, None);
    assert!(!prompt.contains("<KNOWN_ENTITIES>"));
    assert!(!prompt.contains("<PREVIOUS_EPISODES>"));
    assert!(!prompt.contains("<INSTRUCTIONS>"));
  }

  fn raw(name: &str, type_id: i64) -> RawEntity {
    RawEntity {
      name: name.to_owned(),
      entity_type_id: type_id,
      summary: None,
    }
  }

  #[test]
  fn drops_empty_names() {
    let out = validate_entities(vec![raw("", 1), raw("   ", 1), raw("Casey Adams", 1)]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].name, "Casey Adams");
  }

  #[test]
  fn dedupes_case_folded_preserving_order() {
    let out = validate_entities(vec![
      raw("Anthropic", 2),
      raw("Casey Adams", 1),
      raw("anthropic", 2),
    ]);
    let names: Vec<&str> = out.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Anthropic", "Casey Adams"]);
  }

  #[test]
  fn out_of_range_types_coerce_to_generic() {
    let out = validate_entities(vec![raw("Mystery", 42)]);
    assert_eq!(out[0].entity_type, EntityType::Entity);
  }

  #[test]
  fn blank_summaries_become_none() {
    let out = validate_entities(vec![RawEntity {
      name: "Cloudflare".to_owned(),
      entity_type_id: 2,
      summary: Some("  ".to_owned()),
    }]);
    assert_eq!(out[0].summary, None);
  }
}
