use sea_orm_migration::{
  prelude::*,
  schema::{
    boolean, float, integer, text, text_null, timestamp_with_time_zone, uuid, uuid_null,
  },
  sea_orm::Statement,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Entity::Table)
          .if_not_exists()
          .col(uuid(Entity::Id).primary_key())
          .col(text(Entity::CanonicalName))
          .col(integer(Entity::EntityTypeId))
          .col(text_null(Entity::Summary))
          .col(text_null(Entity::Origin))
          .col(float(Entity::Confidence).default(1.0))
          .col(uuid_null(Entity::MergedInto))
          .col(
            timestamp_with_time_zone(Entity::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .col(
            timestamp_with_time_zone(Entity::UpdatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .foreign_key(
            ForeignKey::create()
              .from(Entity::Table, Entity::MergedInto)
              .to(Entity::Table, Entity::Id),
          )
          .to_owned(),
      )
      .await?;

    // Active-entity lookups by type + name prefix.
    manager
      .get_connection()
      .execute_raw(Statement::from_string(
        manager.get_database_backend(),
        "CREATE INDEX idx_entities_active_type_name ON entities (entity_type_id, lower(canonical_name)) WHERE merged_into IS NULL;",
      ))
      .await?;

    manager
      .create_table(
        Table::create()
          .table(EntityAlias::Table)
          .if_not_exists()
          .col(uuid(EntityAlias::Id).primary_key())
          .col(uuid(EntityAlias::EntityId))
          .col(text(EntityAlias::Alias))
          .col(text(EntityAlias::AliasType))
          .col(text(EntityAlias::Normalized))
          .col(boolean(EntityAlias::IsShared).default(false))
          .col(
            timestamp_with_time_zone(EntityAlias::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .foreign_key(
            ForeignKey::create()
              .from(EntityAlias::Table, EntityAlias::EntityId)
              .to(Entity::Table, Entity::Id),
          )
          .to_owned(),
      )
      .await?;

    // A bucket (alias_type, normalized) may hold one non-shared owner, or any
    // number of shared owners. Shared rows fall outside the partial index, so
    // racing creators collide here and recover by re-reading the winner.
    manager
      .get_connection()
      .execute_raw(Statement::from_string(
        manager.get_database_backend(),
        "CREATE UNIQUE INDEX idx_entity_aliases_bucket ON entity_aliases (alias_type, normalized) WHERE NOT is_shared;",
      ))
      .await?;

    manager
      .get_connection()
      .execute_raw(Statement::from_string(
        manager.get_database_backend(),
        "CREATE INDEX idx_entity_aliases_entity ON entity_aliases (entity_id);",
      ))
      .await?;

    manager
      .get_connection()
      .execute_raw(Statement::from_string(
        manager.get_database_backend(),
        "CREATE INDEX idx_entity_aliases_lookup ON entity_aliases (alias_type, normalized);",
      ))
      .await?;

    manager
      .create_table(
        Table::create()
          .table(Relationship::Table)
          .if_not_exists()
          .col(uuid(Relationship::Id).primary_key())
          .col(uuid(Relationship::SourceEntityId))
          .col(uuid_null(Relationship::TargetEntityId))
          .col(text_null(Relationship::TargetLiteral))
          .col(text(Relationship::RelationType))
          .col(text(Relationship::Fact))
          .col(text_null(Relationship::ValidAt))
          .col(text_null(Relationship::InvalidAt))
          .col(
            timestamp_with_time_zone(Relationship::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .col(float(Relationship::Confidence).default(1.0))
          .foreign_key(
            ForeignKey::create()
              .from(Relationship::Table, Relationship::SourceEntityId)
              .to(Entity::Table, Entity::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .from(Relationship::Table, Relationship::TargetEntityId)
              .to(Entity::Table, Entity::Id),
          )
          .to_owned(),
      )
      .await?;

    // Exactly one of entity target / literal target.
    manager
      .get_connection()
      .execute_raw(Statement::from_string(
        manager.get_database_backend(),
        "ALTER TABLE relationships ADD CONSTRAINT chk_relationships_one_target CHECK ((target_entity_id IS NULL) != (target_literal IS NULL));",
      ))
      .await?;

    manager
      .get_connection()
      .execute_raw(Statement::from_string(
        manager.get_database_backend(),
        "CREATE INDEX idx_relationships_source ON relationships (source_entity_id, relation_type);",
      ))
      .await?;

    manager
      .get_connection()
      .execute_raw(Statement::from_string(
        manager.get_database_backend(),
        "CREATE INDEX idx_relationships_target ON relationships (target_entity_id, relation_type) WHERE target_entity_id IS NOT NULL;",
      ))
      .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Relationship::Table).to_owned())
      .await?;
    manager
      .drop_table(Table::drop().table(EntityAlias::Table).to_owned())
      .await?;
    manager
      .drop_table(Table::drop().table(Entity::Table).to_owned())
      .await?;

    Ok(())
  }
}

#[derive(Iden)]
pub enum Entity {
  Table,

  Id,            // uuid v7
  CanonicalName, // display name, possibly promoted during merges
  EntityTypeId,  // 0 Entity / 1 Person / 2 Company / 3 Project / 4 Location / 5 Event / 6 Document / 7 Pet
  Summary,
  Origin,     // how the row was created, e.g. episode:<uuid>
  Confidence, // 0..1
  MergedInto, // tombstone back-reference; NULL = active
  CreatedAt,
  UpdatedAt,
}

#[derive(Iden)]
pub enum EntityAlias {
  Table,

  Id,
  EntityId,
  Alias,      // raw string
  AliasType,  // name | nickname | email | phone | handle | username
  Normalized, // type-specific canonical form
  IsShared,   // legitimately shared identifier (family phone etc.)
  CreatedAt,
}

#[derive(Iden)]
pub enum Relationship {
  Table,

  Id,
  SourceEntityId,
  TargetEntityId, // exactly one of this
  TargetLiteral,  // ... or this
  RelationType,   // UPPER_SNAKE, open vocabulary
  Fact,           // natural language rendering
  ValidAt,        // ISO prefix: YYYY / YYYY-MM / YYYY-MM-DD / RFC 3339
  InvalidAt,
  CreatedAt, // system time
  Confidence,
}
