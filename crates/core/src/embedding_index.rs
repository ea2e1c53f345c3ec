//! Embedding maintenance: one vector per active entity, keyed by a content
//! hash so unchanged names are never re-embedded. Merged entities are left
//! alone; their vectors simply stop being refreshed.

use chrono::Utc;
use cortex_ai::{EMBEDDING_DIMENSION, LlmClient};
use cortex_entities::{embedding, entity};
use cortex_shared::{APP_ENV, AppError};
use sea_orm::{
  ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
  Set, TransactionTrait,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const TARGET_TYPE: &str = "entity";

/// SHA-256 hex of the text an entity's vector is derived from. The model id
/// participates so a model change invalidates every hash.
#[must_use]
pub(crate) fn source_text_hash(model: &str, canonical_name: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(model.as_bytes());
  hasher.update(b":");
  hasher.update(canonical_name.as_bytes());
  format!("{:x}", hasher.finalize())
}

/// Refresh stale entity-name embeddings. Returns how many vectors were
/// written. `skip_embeddings` turns the whole pass into a no-op.
pub async fn refresh_entity_embeddings(
  llm: &LlmClient,
  db: &DatabaseConnection,
) -> Result<usize, AppError> {
  if APP_ENV.skip_embeddings {
    return Ok(0);
  }
  let model = llm.embedding_model().to_owned();

  let entities = entity::Entity::find()
    .filter(entity::Column::MergedInto.is_null())
    .all(db)
    .await?;
  if entities.is_empty() {
    return Ok(0);
  }

  let existing: std::collections::HashMap<Uuid, embedding::Model> = embedding::Entity::find()
    .filter(embedding::Column::TargetType.eq(TARGET_TYPE))
    .filter(embedding::Column::Model.eq(model.as_str()))
    .filter(embedding::Column::TargetId.is_in(entities.iter().map(|e| e.id)))
    .all(db)
    .await?
    .into_iter()
    .map(|row| (row.target_id, row))
    .collect();

  let stale: Vec<(&entity::Model, String)> = entities
    .iter()
    .filter_map(|entity| {
      let hash = source_text_hash(&model, &entity.canonical_name);
      match existing.get(&entity.id) {
        Some(row) if row.source_text_hash == hash => None,
        _ => Some((entity, hash)),
      }
    })
    .collect();
  if stale.is_empty() {
    return Ok(0);
  }

  let texts: Vec<String> = stale
    .iter()
    .map(|(entity, _)| entity.canonical_name.clone())
    .collect();
  let vectors = llm.embed_batch(&texts).await?;

  // The vector and its hash move together or not at all.
  let txn = db.begin().await?;
  for ((entity, hash), vector) in stale.into_iter().zip(vectors) {
    match existing.get(&entity.id) {
      Some(row) => {
        let mut active: embedding::ActiveModel = row.clone().into_active_model();
        active.embedding = Set(vector);
        active.source_text_hash = Set(hash);
        active.dimension = Set(EMBEDDING_DIMENSION as i32);
        active.update(&txn).await?;
      }
      None => {
        embedding::Model {
          id: Uuid::now_v7(),
          target_type: TARGET_TYPE.to_owned(),
          target_id: entity.id,
          model: model.clone(),
          embedding: vector,
          dimension: EMBEDDING_DIMENSION as i32,
          source_text_hash: hash,
          created_at: Utc::now().into(),
        }
        .into_active_model()
        .insert(&txn)
        .await?;
      }
    }
  }
  txn.commit().await?;

  tracing::debug!(refreshed = texts.len(), model, "entity embeddings refreshed");
  Ok(texts.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_is_stable_and_hex() {
    let a = source_text_hash("text-embedding-3-small", "Casey Adams");
    let b = source_text_hash("text-embedding-3-small", "Casey Adams");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn hash_depends_on_name_and_model() {
    let base = source_text_hash("model-a", "Casey Adams");
    assert_ne!(base, source_text_hash("model-a", "Casey Adam"));
    assert_ne!(base, source_text_hash("model-b", "Casey Adams"));
  }
}
