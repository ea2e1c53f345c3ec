use sea_orm::entity::prelude::*;

/// How a chunker groups events into episodes (time gap, per thread, per
/// turn). Written by the chunking layer; the pipeline only reads it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "episode_definitions")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: Uuid,
  pub name: String,
  pub channel: Option<String>,
  pub strategy: String,
  pub gap_seconds: Option<i64>,
  pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
