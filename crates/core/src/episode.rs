use anyhow::anyhow;
use chrono::{DateTime, Utc};
use cortex_entities::{
  entity, episode, episode_definition, episode_entity_mention, episode_event, event,
};
use cortex_shared::AppError;
use sea_orm::{
  ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::vocab::EntityType;

/// How many prior episodes are offered to the prompts as context.
const PREVIOUS_EPISODE_COUNT: u64 = 2;
/// Per-excerpt character budget for prior-episode context.
const EXCERPT_CHARS: usize = 600;

/// Everything the extraction stages need to know about one episode.
pub struct EpisodeContext {
  pub episode: episode::Model,
  /// Canonical episode text: the stored `content` or a rendering of the
  /// episode's events.
  pub content: String,
  /// The "now" of the episode, used to resolve relative dates in text.
  pub reference_time: DateTime<Utc>,
  pub previous_episodes: Vec<String>,
  /// Names already in the graph that recently co-occurred with this thread,
  /// offered to the extractor as hints.
  pub known_entities: Vec<(String, EntityType)>,
}

pub async fn load_episode_context(
  episode_id: uuid::Uuid,
  db: &DatabaseConnection,
) -> Result<EpisodeContext, AppError> {
  let episode = episode::Entity::find_by_id(episode_id)
    .one(db)
    .await?
    .ok_or_else(|| AppError::user_input(anyhow!("episode {episode_id} not found")))?;

  if let Some(definition_id) = episode.definition_id
    && let Some(definition) = episode_definition::Entity::find_by_id(definition_id)
      .one(db)
      .await?
  {
    tracing::debug!(
      episode_id = %episode.id,
      definition = %definition.name,
      strategy = %definition.strategy,
      "episode produced by chunking rule"
    );
  }

  let content = match &episode.content {
    Some(content) if !content.is_empty() => content.clone(),
    _ => render_episode_events(episode_id, db).await?,
  };

  let previous = previous_episodes(&episode, db).await?;
  let known_entities = known_entities(&previous.1, db).await?;

  Ok(EpisodeContext {
    reference_time: episode.end_time.with_timezone(&Utc),
    episode,
    content,
    previous_episodes: previous.0,
    known_entities,
  })
}

/// Render the episode's events, ordered by position, into the canonical
/// episode text.
async fn render_episode_events(
  episode_id: uuid::Uuid,
  db: &DatabaseConnection,
) -> Result<String, AppError> {
  let rows: Vec<(episode_event::Model, Option<event::Model>)> = episode_event::Entity::find()
    .filter(episode_event::Column::EpisodeId.eq(episode_id))
    .order_by_asc(episode_event::Column::Position)
    .find_also_related(event::Entity)
    .all(db)
    .await?;

  if rows.is_empty() {
    return Err(AppError::data_invariant(anyhow!(
      "episode {episode_id} has no content and no events"
    )));
  }

  let lines: Vec<String> = rows
    .into_iter()
    .filter_map(|(_, event)| event)
    .map(|event| render_event(&event))
    .collect();

  Ok(lines.join("\n"))
}

fn render_event(event: &event::Model) -> String {
  let timestamp = event.timestamp.with_timezone(&Utc).format("%Y-%m-%d %H:%M");
  match &event.sender {
    Some(sender) => format!("[{timestamp}] {sender} ({}): {}", event.direction, event.content),
    None => format!("[{timestamp}] ({}): {}", event.direction, event.content),
  }
}

/// Most recent prior episodes from the same channel (and thread, when set),
/// clipped to excerpt size. Returns the excerpts plus the episode ids for
/// known-entity lookups.
async fn previous_episodes(
  episode: &episode::Model,
  db: &DatabaseConnection,
) -> Result<(Vec<String>, Vec<uuid::Uuid>), AppError> {
  let mut query = episode::Entity::find()
    .filter(episode::Column::Channel.eq(episode.channel.as_str()))
    .filter(episode::Column::EndTime.lt(episode.start_time))
    .filter(episode::Column::Id.ne(episode.id));
  if let Some(thread_id) = &episode.thread_id {
    query = query.filter(episode::Column::ThreadId.eq(thread_id.as_str()));
  }

  let models = query
    .order_by_desc(episode::Column::EndTime)
    .limit(PREVIOUS_EPISODE_COUNT)
    .all(db)
    .await?;

  let ids = models.iter().map(|m| m.id).collect();
  let excerpts = models
    .into_iter()
    .filter_map(|m| m.content)
    .map(|content| excerpt(&content))
    .collect();
  Ok((excerpts, ids))
}

fn excerpt(content: &str) -> String {
  if content.len() <= EXCERPT_CHARS {
    return content.to_owned();
  }
  let mut cut = EXCERPT_CHARS;
  while !content.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}…", &content[..cut])
}

/// Entities the prior episodes mentioned, as extractor hints.
async fn known_entities(
  episode_ids: &[uuid::Uuid],
  db: &DatabaseConnection,
) -> Result<Vec<(String, EntityType)>, AppError> {
  if episode_ids.is_empty() {
    return Ok(vec![]);
  }

  let rows: Vec<(episode_entity_mention::Model, Option<entity::Model>)> =
    episode_entity_mention::Entity::find()
      .filter(episode_entity_mention::Column::EpisodeId.is_in(episode_ids.iter().copied()))
      .find_also_related(entity::Entity)
      .all(db)
      .await?;

  let mut seen = std::collections::HashSet::new();
  let mut hints = Vec::new();
  for (_, entity) in rows {
    let Some(entity) = entity else { continue };
    if entity.merged_into.is_some() {
      continue;
    }
    if seen.insert(entity.id) {
      hints.push((
        entity.canonical_name,
        EntityType::from_raw(i64::from(entity.entity_type_id)),
      ));
    }
  }
  Ok(hints)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn excerpt_clips_long_content_on_a_char_boundary() {
    let long = "é".repeat(EXCERPT_CHARS); // two bytes per char
    let clipped = excerpt(&long);
    assert!(clipped.ends_with('…'));
    assert!(clipped.len() <= EXCERPT_CHARS + '…'.len_utf8());
  }

  #[test]
  fn excerpt_keeps_short_content_whole() {
    assert_eq!(excerpt("short"), "short");
  }
}
