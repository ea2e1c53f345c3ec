//! Read-side traversal. Honors the bi-temporal bounds, excludes merged
//! entities, and truncates via an optional hard limit after the default
//! `created_at DESC` ordering.

use std::collections::HashMap;

use anyhow::anyhow;
use cortex_entities::{entity, entity_alias, relationship};
use cortex_shared::AppError;
use sea_orm::{
  ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::temporal::normalize_flexible_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
  Outgoing,
  Incoming,
  #[default]
  Both,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct QueryOptions {
  #[serde(default)]
  pub direction: Direction,
  /// Restrict to these relation types, when set.
  pub relation_types: Option<Vec<String>>,
  /// Point-in-time view; `None` means "currently true".
  pub as_of_time: Option<String>,
  /// Include rows whose `invalid_at` has passed.
  #[serde(default)]
  pub include_invalidated: bool,
  /// Hard cap applied after the default ordering.
  pub limit: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RelatedEntity {
  pub entity: entity::Model,
  pub relation_type: String,
  pub direction: Direction,
  pub relationship_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RelationshipWithDirection {
  pub relationship: relationship::Model,
  pub direction: Direction,
}

/// Entity by id. Does not follow merge chains; callers decide.
pub async fn get_entity(
  id: Uuid,
  db: &DatabaseConnection,
) -> Result<Option<entity::Model>, AppError> {
  Ok(entity::Entity::find_by_id(id).one(db).await?)
}

/// All aliases of an entity, ordered by type then alias.
pub async fn get_entity_aliases(
  id: Uuid,
  db: &DatabaseConnection,
) -> Result<Vec<entity_alias::Model>, AppError> {
  Ok(
    entity_alias::Entity::find()
      .filter(entity_alias::Column::EntityId.eq(id))
      .order_by_asc(entity_alias::Column::AliasType)
      .order_by_asc(entity_alias::Column::Alias)
      .all(db)
      .await?,
  )
}

/// Neighbors of `id`, temporally filtered, with merged neighbors excluded.
pub async fn get_related_entities(
  id: Uuid,
  opts: &QueryOptions,
  db: &DatabaseConnection,
) -> Result<Vec<RelatedEntity>, AppError> {
  let rows = directed_relationships(id, opts, db).await?;

  // Resolve neighbor entities, skipping literal targets and tombstones.
  let neighbor_ids: Vec<Uuid> = rows
    .iter()
    .filter_map(|row| neighbor_of(&row.relationship, id))
    .collect();
  let neighbors: HashMap<Uuid, entity::Model> = entity::Entity::find()
    .filter(entity::Column::Id.is_in(neighbor_ids))
    .filter(entity::Column::MergedInto.is_null())
    .all(db)
    .await?
    .into_iter()
    .map(|model| (model.id, model))
    .collect();

  let mut related = Vec::new();
  for row in rows {
    let Some(neighbor_id) = neighbor_of(&row.relationship, id) else {
      continue;
    };
    let Some(neighbor) = neighbors.get(&neighbor_id) else {
      continue;
    };
    related.push(RelatedEntity {
      entity: neighbor.clone(),
      relation_type: row.relationship.relation_type.clone(),
      direction: row.direction,
      relationship_id: row.relationship.id,
    });
  }

  if let Some(limit) = opts.limit {
    related.truncate(limit as usize);
  }
  Ok(related)
}

/// Full relationship rows (including literal targets) with direction labels.
pub async fn get_entity_relationships(
  id: Uuid,
  opts: &QueryOptions,
  db: &DatabaseConnection,
) -> Result<Vec<RelationshipWithDirection>, AppError> {
  let mut rows = directed_relationships(id, opts, db).await?;
  if let Some(limit) = opts.limit {
    rows.truncate(limit as usize);
  }
  Ok(rows)
}

/// Case-insensitive partial name match, excluding merged entities.
pub async fn find_entities_by_name(
  partial: &str,
  entity_type_id: Option<i32>,
  limit: Option<u64>,
  db: &DatabaseConnection,
) -> Result<Vec<entity::Model>, AppError> {
  let needle = partial.trim();
  if needle.is_empty() {
    return Err(AppError::user_input(anyhow!("name fragment must not be empty")));
  }

  let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
  let mut query = entity::Entity::find()
    .filter(entity::Column::MergedInto.is_null())
    .filter(sea_orm::prelude::Expr::cust_with_values(
      "canonical_name ILIKE ?",
      [format!("%{escaped}%")],
    ));
  if let Some(type_id) = entity_type_id {
    query = query.filter(entity::Column::EntityTypeId.eq(type_id));
  }
  if let Some(limit) = limit {
    query = query.limit(limit);
  }
  Ok(
    query
      .order_by_desc(entity::Column::CreatedAt)
      .all(db)
      .await?,
  )
}

/// Inverse lookup: active sources pointing at `target_entity_id` through
/// `relation_type` ("who works at T?"), temporally filtered.
pub async fn find_entities_by_relation_type(
  relation_type: &str,
  target_entity_id: Uuid,
  opts: &QueryOptions,
  db: &DatabaseConnection,
) -> Result<Vec<entity::Model>, AppError> {
  if relation_type.trim().is_empty() {
    return Err(AppError::user_input(anyhow!("relation_type must not be empty")));
  }

  let rows = relationship::Entity::find()
    .filter(relationship::Column::TargetEntityId.eq(target_entity_id))
    .filter(relationship::Column::RelationType.eq(relation_type))
    .filter(temporal_condition(opts)?)
    .order_by_desc(relationship::Column::CreatedAt)
    .all(db)
    .await?;

  let source_ids: Vec<Uuid> = rows.iter().map(|row| row.source_entity_id).collect();
  let mut sources = entity::Entity::find()
    .filter(entity::Column::Id.is_in(source_ids))
    .filter(entity::Column::MergedInto.is_null())
    .all(db)
    .await?;
  if let Some(limit) = opts.limit {
    sources.truncate(limit as usize);
  }
  Ok(sources)
}

// ──────────────────────────────────────────────────
// Shared query plumbing
// ──────────────────────────────────────────────────

async fn directed_relationships(
  id: Uuid,
  opts: &QueryOptions,
  db: &DatabaseConnection,
) -> Result<Vec<RelationshipWithDirection>, AppError> {
  let mut results = Vec::new();

  if matches!(opts.direction, Direction::Outgoing | Direction::Both) {
    let rows = base_query(opts)?
      .filter(relationship::Column::SourceEntityId.eq(id))
      .all(db)
      .await?;
    results.extend(rows.into_iter().map(|relationship| RelationshipWithDirection {
      relationship,
      direction: Direction::Outgoing,
    }));
  }

  if matches!(opts.direction, Direction::Incoming | Direction::Both) {
    let rows = base_query(opts)?
      .filter(relationship::Column::TargetEntityId.eq(id))
      .all(db)
      .await?;
    results.extend(rows.into_iter().map(|relationship| RelationshipWithDirection {
      relationship,
      direction: Direction::Incoming,
    }));
  }

  // Default per-query order: newest first.
  results.sort_by(|a, b| b.relationship.created_at.cmp(&a.relationship.created_at));
  Ok(results)
}

fn base_query(opts: &QueryOptions) -> Result<sea_orm::Select<relationship::Entity>, AppError> {
  let mut query = relationship::Entity::find().filter(temporal_condition(opts)?);
  if let Some(types) = &opts.relation_types
    && !types.is_empty()
  {
    query = query.filter(relationship::Column::RelationType.is_in(types.clone()));
  }
  Ok(query)
}

/// The default temporal policy: only rows valid at the chosen instant.
/// `include_invalidated` disables the filter entirely.
fn temporal_condition(opts: &QueryOptions) -> Result<Condition, AppError> {
  if opts.include_invalidated {
    return Ok(Condition::all());
  }

  match &opts.as_of_time {
    Some(raw) => {
      let as_of = normalize_flexible_date(raw)
        .ok_or_else(|| AppError::user_input(anyhow!("unparseable as_of_time {raw:?}")))?;
      Ok(
        Condition::all()
          .add(
            Condition::any()
              .add(relationship::Column::InvalidAt.is_null())
              .add(relationship::Column::InvalidAt.gt(as_of.clone())),
          )
          .add(
            Condition::any()
              .add(relationship::Column::ValidAt.is_null())
              .add(relationship::Column::ValidAt.lte(as_of)),
          ),
      )
    }
    None => Ok(Condition::all().add(relationship::Column::InvalidAt.is_null())),
  }
}

fn neighbor_of(row: &relationship::Model, subject: Uuid) -> Option<Uuid> {
  if row.source_entity_id == subject {
    row.target_entity_id
  } else {
    Some(row.source_entity_id)
  }
}
