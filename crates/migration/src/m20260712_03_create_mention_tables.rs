use sea_orm_migration::{
  prelude::*,
  schema::{float, integer, text, text_null, timestamp_with_time_zone, uuid, uuid_null},
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(EpisodeEntityMention::Table)
          .if_not_exists()
          .col(uuid(EpisodeEntityMention::EpisodeId))
          .col(uuid(EpisodeEntityMention::EntityId))
          .col(integer(EpisodeEntityMention::MentionCount).default(1))
          .primary_key(
            Index::create()
              .col(EpisodeEntityMention::EpisodeId)
              .col(EpisodeEntityMention::EntityId),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_episode_entity_mentions_entity")
          .table(EpisodeEntityMention::Table)
          .col(EpisodeEntityMention::EntityId)
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(EpisodeRelationshipMention::Table)
          .if_not_exists()
          .col(uuid(EpisodeRelationshipMention::Id).primary_key())
          .col(uuid(EpisodeRelationshipMention::EpisodeId))
          .col(uuid_null(EpisodeRelationshipMention::RelationshipId))
          .col(text(EpisodeRelationshipMention::ExtractedFact))
          .col(uuid_null(EpisodeRelationshipMention::AssertedByEntityId))
          .col(text(EpisodeRelationshipMention::SourceType))
          .col(text_null(EpisodeRelationshipMention::TargetLiteral))
          .col(uuid_null(EpisodeRelationshipMention::AliasId))
          .col(float(EpisodeRelationshipMention::Confidence).default(1.0))
          .col(
            timestamp_with_time_zone(EpisodeRelationshipMention::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_episode_relationship_mentions_episode")
          .table(EpisodeRelationshipMention::Table)
          .col(EpisodeRelationshipMention::EpisodeId)
          .to_owned(),
      )
      .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(
        Table::drop()
          .table(EpisodeRelationshipMention::Table)
          .to_owned(),
      )
      .await?;
    manager
      .drop_table(Table::drop().table(EpisodeEntityMention::Table).to_owned())
      .await?;

    Ok(())
  }
}

#[derive(Iden)]
pub enum EpisodeEntityMention {
  Table,

  EpisodeId,
  EntityId,
  MentionCount, // weight for resolution/embedding evidence
}

#[derive(Iden)]
pub enum EpisodeRelationshipMention {
  Table,

  Id,
  EpisodeId,
  RelationshipId, // NULL for promoted identity facts
  ExtractedFact,  // fact text as extracted
  AssertedByEntityId,
  SourceType,    // self_disclosed | mentioned | inferred
  TargetLiteral, // copy of the literal when applicable
  AliasId,       // set for promoted identity facts
  Confidence,
  CreatedAt,
}
