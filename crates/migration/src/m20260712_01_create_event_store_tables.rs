use sea_orm_migration::{
  prelude::*,
  schema::{big_integer_null, integer, text, text_null, timestamp_with_time_zone, uuid, uuid_null},
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    // Raw event store, written by source adapters. The pipeline reads it.
    manager
      .create_table(
        Table::create()
          .table(Event::Table)
          .if_not_exists()
          .col(uuid(Event::Id).primary_key())
          .col(text(Event::Channel))
          .col(timestamp_with_time_zone(Event::Timestamp))
          .col(text_null(Event::ThreadId))
          .col(text(Event::Content))
          .col(text(Event::Direction))
          .col(text_null(Event::Sender))
          .col(text(Event::SourceAdapter))
          .col(text(Event::SourceId))
          .col(
            timestamp_with_time_zone(Event::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_events_source")
          .table(Event::Table)
          .col(Event::SourceAdapter)
          .col(Event::SourceId)
          .unique()
          .to_owned(),
      )
      .await?;

    // Chunking rules, written by the episode chunkers.
    manager
      .create_table(
        Table::create()
          .table(EpisodeDefinition::Table)
          .if_not_exists()
          .col(uuid(EpisodeDefinition::Id).primary_key())
          .col(text(EpisodeDefinition::Name))
          .col(text_null(EpisodeDefinition::Channel))
          .col(text(EpisodeDefinition::Strategy))
          .col(big_integer_null(EpisodeDefinition::GapSeconds))
          .col(
            timestamp_with_time_zone(EpisodeDefinition::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(Episode::Table)
          .if_not_exists()
          .col(uuid(Episode::Id).primary_key())
          .col(uuid_null(Episode::DefinitionId))
          .col(text(Episode::Channel))
          .col(text_null(Episode::ThreadId))
          .col(timestamp_with_time_zone(Episode::StartTime))
          .col(timestamp_with_time_zone(Episode::EndTime))
          .col(integer(Episode::EventCount))
          .col(text_null(Episode::Content))
          .col(
            timestamp_with_time_zone(Episode::CreatedAt)
              .not_null()
              .default(Expr::current_timestamp()),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(EpisodeEvent::Table)
          .if_not_exists()
          .col(uuid(EpisodeEvent::EpisodeId))
          .col(uuid(EpisodeEvent::EventId))
          .col(integer(EpisodeEvent::Position))
          .primary_key(
            Index::create()
              .col(EpisodeEvent::EpisodeId)
              .col(EpisodeEvent::EventId),
          )
          .foreign_key(
            ForeignKey::create()
              .from(EpisodeEvent::Table, EpisodeEvent::EpisodeId)
              .to(Episode::Table, Episode::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .from(EpisodeEvent::Table, EpisodeEvent::EventId)
              .to(Event::Table, Event::Id),
          )
          .to_owned(),
      )
      .await?;

    Ok(())
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(EpisodeEvent::Table).to_owned())
      .await?;
    manager
      .drop_table(Table::drop().table(Episode::Table).to_owned())
      .await?;
    manager
      .drop_table(Table::drop().table(EpisodeDefinition::Table).to_owned())
      .await?;
    manager
      .drop_table(Table::drop().table(Event::Table).to_owned())
      .await?;

    Ok(())
  }
}

#[derive(Iden)]
pub enum Event {
  Table,

  Id,            // uuid v7
  Channel,       // imessage, gmail, claude, ...
  Timestamp,     // when the event happened
  ThreadId,      // conversation/thread grouping key
  Content,       // normalized text body
  Direction,     // sent | received | observed | created | updated | deleted
  Sender,        // display name of the author, if known
  SourceAdapter, // adapter that wrote the row
  SourceId,      // adapter-scoped id, unique with SourceAdapter
  CreatedAt,
}

#[derive(Iden)]
pub enum EpisodeDefinition {
  Table,

  Id,
  Name,
  Channel,
  Strategy,   // time_gap | per_thread | per_turn
  GapSeconds, // for time_gap
  CreatedAt,
}

#[derive(Iden)]
pub enum Episode {
  Table,

  Id,           // uuid v7
  DefinitionId, // chunking rule that produced this episode
  Channel,
  ThreadId,
  StartTime,
  EndTime,
  EventCount,
  Content, // pre-encoded episode text, rendered from events when NULL
  CreatedAt,
}

#[derive(Iden)]
pub enum EpisodeEvent {
  Table,

  EpisodeId,
  EventId,
  Position, // order of the event inside the episode
}
