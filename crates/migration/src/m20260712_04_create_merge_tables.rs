use sea_orm_migration::{
  prelude::*,
  schema::{
    boolean, double, json_binary, text, text_null, timestamp_with_time_zone,
    timestamp_with_time_zone_null, uuid,
  },
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(MergeCandidate::Table)
          .if_not_exists()
          .col(uuid(MergeCandidate::Id).primary_key())
          .col(uuid(MergeCandidate::EntityAId))
          .col(uuid(MergeCandidate::EntityBId))
          .col(double(MergeCandidate::Confidence))
          .col(boolean(MergeCandidate::AutoEligible).default(false))
          .col(text(MergeCandidate::Reason))
          .col(json_binary(MergeCandidate::MatchingFacts))
          .col(json_binary(MergeCandidate::Context))
          .col(json_binary(MergeCandidate::Conflicts))
          .col(text(MergeCandidate::Status).default("pending"))
          .col(
            timestamp_with_time_zone(MergeCandidate::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .col(timestamp_with_time_zone_null(MergeCandidate::ResolvedAt))
          .col(text_null(MergeCandidate::ResolvedBy))
          .col(text_null(MergeCandidate::ResolutionReason))
          .to_owned(),
      )
      .await?;

    // One candidate per unordered pair; also serializes concurrent scans.
    manager
      .create_index(
        Index::create()
          .name("idx_merge_candidates_pair")
          .table(MergeCandidate::Table)
          .col(MergeCandidate::EntityAId)
          .col(MergeCandidate::EntityBId)
          .unique()
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(EntityMergeEvent::Table)
          .if_not_exists()
          .col(uuid(EntityMergeEvent::Id).primary_key())
          .col(uuid(EntityMergeEvent::SourceEntityId))
          .col(uuid(EntityMergeEvent::TargetEntityId))
          .col(text(EntityMergeEvent::MergeType))
          .col(json_binary(EntityMergeEvent::TriggeringFacts))
          .col(double(EntityMergeEvent::SimilarityScore))
          .col(
            timestamp_with_time_zone(EntityMergeEvent::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .col(text(EntityMergeEvent::ResolvedBy))
          .to_owned(),
      )
      .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(EntityMergeEvent::Table).to_owned())
      .await?;
    manager
      .drop_table(Table::drop().table(MergeCandidate::Table).to_owned())
      .await?;

    Ok(())
  }
}

#[derive(Iden)]
pub enum MergeCandidate {
  Table,

  Id,
  EntityAId, // unordered pair, stored lower-id first
  EntityBId,
  Confidence,
  AutoEligible,
  Reason,        // hard_identifier | multiple_hard_identifiers | compound | soft_accumulation | conflict
  MatchingFacts, // serialized list
  Context,       // serialized map, e.g. {"compound_type": "name_birthdate"}
  Conflicts,     // serialized list of conflict records
  Status,        // pending | merged | rejected | deferred
  CreatedAt,
  ResolvedAt,
  ResolvedBy,
  ResolutionReason,
}

#[derive(Iden)]
pub enum EntityMergeEvent {
  Table,

  Id,
  SourceEntityId, // the tombstoned entity
  TargetEntityId, // the surviving entity
  MergeType,
  TriggeringFacts,
  SimilarityScore,
  CreatedAt,
  ResolvedBy, // "auto" or "user:<name>"
}
