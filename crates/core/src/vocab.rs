//! Fixed vocabularies of the graph: entity kinds, alias kinds, provenance
//! source kinds, and the documented subsets of the (otherwise open) relation
//! type space.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr};
use utoipa::ToSchema;

/// The fixed 8 entity kinds. Stored as `entity_type_id`; anything out of
/// range coerces to `Entity` (0) at extraction time.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromRepr, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum EntityType {
  Entity = 0,
  Person = 1,
  Company = 2,
  Project = 3,
  Location = 4,
  Event = 5,
  Document = 6,
  Pet = 7,
}

impl EntityType {
  /// Clamp a raw LLM-provided id to the documented range.
  #[must_use]
  pub fn from_raw(id: i64) -> Self {
    i32::try_from(id)
      .ok()
      .and_then(Self::from_repr)
      .unwrap_or(Self::Entity)
  }

  #[must_use]
  pub const fn id(self) -> i32 {
    self as i32
  }

  /// Two candidates are type-compatible when they agree, or when either side
  /// is the untyped fallback.
  #[must_use]
  pub fn compatible_with(self, other: Self) -> bool {
    self == other || self == Self::Entity || other == Self::Entity
  }
}

/// Kinds of alternative labels an entity can carry.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AliasType {
  Name,
  Nickname,
  Email,
  Phone,
  Handle,
  Username,
}

/// How a fact entered the episode.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
  SelfDisclosed,
  Mentioned,
  Inferred,
}

impl SourceType {
  /// Unknown strings coerce to `Mentioned` rather than dropping the row.
  #[must_use]
  pub fn from_raw(raw: &str) -> Self {
    raw.parse().unwrap_or(Self::Mentioned)
  }
}

/// Identity relations never persist as relationship rows; they are promoted
/// to aliases.
pub const IDENTITY_RELATIONS: [&str; 5] = [
  "HAS_EMAIL",
  "HAS_PHONE",
  "HAS_HANDLE",
  "HAS_USERNAME",
  "ALSO_KNOWN_AS",
];

/// Temporal relations carry an ISO date string as their literal target.
pub const TEMPORAL_RELATIONS: [&str; 6] = [
  "BORN_ON",
  "STARTED_ON",
  "ENDED_ON",
  "ANNIVERSARY_ON",
  "OCCURRED_ON",
  "SCHEDULED_FOR",
];

/// Exclusive per `(source, relation_type)`: inserting a new active fact
/// invalidates the prior one.
pub const EXCLUSIVE_RELATIONS: [&str; 4] = ["WORKS_AT", "LIVES_IN", "DATING", "SPOUSE_OF"];

/// Entity-targeted relation types the prompts advertise. The vocabulary is
/// open; anything outside it persists with an "unknown type" warning.
pub const DOCUMENTED_RELATIONS: [&str; 10] = [
  "WORKS_AT",
  "KNOWS",
  "LIVES_IN",
  "OWNS",
  "USES",
  "DATING",
  "SPOUSE_OF",
  "CUSTOMER_OF",
  "EMPLOYS",
  "ATTENDED",
];

#[must_use]
pub fn is_identity_relation(relation_type: &str) -> bool {
  IDENTITY_RELATIONS.contains(&relation_type)
}

#[must_use]
pub fn is_temporal_relation(relation_type: &str) -> bool {
  TEMPORAL_RELATIONS.contains(&relation_type)
}

#[must_use]
pub fn is_exclusive_relation(relation_type: &str) -> bool {
  EXCLUSIVE_RELATIONS.contains(&relation_type)
}

#[must_use]
pub fn is_known_relation(relation_type: &str) -> bool {
  DOCUMENTED_RELATIONS.contains(&relation_type)
    || IDENTITY_RELATIONS.contains(&relation_type)
    || TEMPORAL_RELATIONS.contains(&relation_type)
}

/// The alias kind an identity relation promotes into.
#[must_use]
pub fn alias_type_for_identity(relation_type: &str) -> Option<AliasType> {
  match relation_type {
    "HAS_EMAIL" => Some(AliasType::Email),
    "HAS_PHONE" => Some(AliasType::Phone),
    "HAS_HANDLE" => Some(AliasType::Handle),
    "HAS_USERNAME" => Some(AliasType::Username),
    "ALSO_KNOWN_AS" => Some(AliasType::Name),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn entity_type_ids_round_trip() {
    assert_eq!(EntityType::from_raw(1), EntityType::Person);
    assert_eq!(EntityType::from_raw(7), EntityType::Pet);
    assert_eq!(EntityType::Person.id(), 1);
  }

  #[test]
  fn out_of_range_type_ids_coerce_to_entity() {
    assert_eq!(EntityType::from_raw(-3), EntityType::Entity);
    assert_eq!(EntityType::from_raw(8), EntityType::Entity);
    assert_eq!(EntityType::from_raw(i64::MAX), EntityType::Entity);
  }

  #[test]
  fn untyped_fallback_is_compatible_with_everything() {
    assert!(EntityType::Entity.compatible_with(EntityType::Person));
    assert!(EntityType::Company.compatible_with(EntityType::Entity));
    assert!(!EntityType::Person.compatible_with(EntityType::Company));
  }

  #[test]
  fn unknown_source_type_coerces_to_mentioned() {
    assert_eq!(SourceType::from_raw("self_disclosed"), SourceType::SelfDisclosed);
    assert_eq!(SourceType::from_raw("overheard"), SourceType::Mentioned);
  }

  #[test]
  fn relation_families_are_disjoint() {
    for identity in IDENTITY_RELATIONS {
      assert!(!is_temporal_relation(identity));
      assert!(!is_exclusive_relation(identity));
    }
    for temporal in TEMPORAL_RELATIONS {
      assert!(!is_identity_relation(temporal));
    }
  }

  #[test]
  fn every_identity_relation_maps_to_an_alias_type() {
    for relation in IDENTITY_RELATIONS {
      assert!(alias_type_for_identity(relation).is_some(), "{relation}");
    }
    assert_eq!(alias_type_for_identity("WORKS_AT"), None);
  }
}
