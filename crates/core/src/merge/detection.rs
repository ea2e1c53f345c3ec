//! Candidate detection. Three signal tiers, strongest wins:
//!
//! - hard identifier: a shared email/handle/username bucket (phones are
//!   excluded here; family lines legitimately share a number)
//! - compound: same case-folded name plus the same BORN_ON date
//! - soft accumulation: weighted circumstantial overlap, never auto-eligible

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use cortex_entities::{entity, entity_alias, merge_candidate, relationship};
use cortex_shared::{APP_ENV, AppError};
use sea_orm::{
  ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
  sea_query::OnConflict,
};
use uuid::Uuid;

use crate::contradiction::order_pair;
use crate::identity::normalize_name;
use crate::resolution::token_set_jaccard;
use crate::vocab::AliasType;

use super::conflicts::{ConflictRecord, EntityIdentity, detect_conflicts};

/// Hard-identifier alias kinds. Phone is not one; see the soft tier.
const HARD_ALIAS_TYPES: [AliasType; 3] = [AliasType::Email, AliasType::Handle, AliasType::Username];

const HARD_CONFIDENCE: f64 = 0.95;
const MULTI_HARD_CONFIDENCE: f64 = 0.99;
const COMPOUND_CONFIDENCE: f64 = 0.90;

// Soft-accumulation weights; the sum competes with `merge_soft_threshold`.
const SOFT_EMPLOYER_WEIGHT: f64 = 0.25;
const SOFT_LOCATION_WEIGHT: f64 = 0.25;
const SOFT_SHARED_PHONE_WEIGHT: f64 = 0.30;
const SOFT_NAME_WEIGHT: f64 = 0.20;
/// Token-set similarity two names need before they count as a soft signal.
const SOFT_NAME_JACCARD: f64 = 0.8;

/// Tunable decision thresholds, loaded from the environment in production.
#[derive(Debug, Clone, Copy)]
pub struct MergeThresholds {
  pub soft: f64,
  pub auto_hard_confidence: f64,
  pub auto_compound_confidence: f64,
}

impl Default for MergeThresholds {
  fn default() -> Self {
    Self {
      soft: 0.60,
      auto_hard_confidence: 0.95,
      auto_compound_confidence: 0.90,
    }
  }
}

impl MergeThresholds {
  #[must_use]
  pub fn from_env() -> Self {
    Self {
      soft: APP_ENV.merge_soft_threshold,
      auto_hard_confidence: APP_ENV.merge_auto_hard_confidence,
      auto_compound_confidence: APP_ENV.merge_auto_compound_confidence,
    }
  }
}

// ──────────────────────────────────────────────────
// Pure tier classification
// ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct PairSignals {
  /// Matched hard identifiers, rendered as `email:casey@example.com`.
  pub hard_matches: Vec<String>,
  /// Distinct alias types among the hard matches.
  pub distinct_hard_types: usize,
  pub shared_name: bool,
  pub same_birthdate: Option<String>,
  pub shared_employer: bool,
  pub shared_location: bool,
  pub shared_phone: bool,
  pub name_jaccard: f64,
}

#[derive(Debug, PartialEq)]
pub(crate) struct Classification {
  pub reason: &'static str,
  pub confidence: f64,
  /// Whether this tier may auto-merge, before conflict checks.
  pub auto_base: bool,
  pub matching_facts: Vec<String>,
  pub context: serde_json::Value,
}

pub(crate) fn classify_pair(
  signals: &PairSignals,
  thresholds: MergeThresholds,
) -> Option<Classification> {
  if !signals.hard_matches.is_empty() {
    let multiple = signals.distinct_hard_types >= 2;
    return Some(Classification {
      reason: if multiple { "multiple_hard_identifiers" } else { "hard_identifier" },
      confidence: if multiple { MULTI_HARD_CONFIDENCE } else { HARD_CONFIDENCE },
      auto_base: true,
      matching_facts: signals.hard_matches.clone(),
      context: serde_json::json!({}),
    });
  }

  if signals.shared_name && signals.same_birthdate.is_some() {
    let birthdate = signals.same_birthdate.clone().unwrap_or_default();
    return Some(Classification {
      reason: "compound",
      confidence: COMPOUND_CONFIDENCE,
      auto_base: true,
      matching_facts: vec![format!("name+born_on:{birthdate}")],
      context: serde_json::json!({ "compound_type": "name_birthdate" }),
    });
  }

  let mut score = 0.0;
  let mut facts = Vec::new();
  if signals.shared_employer {
    score += SOFT_EMPLOYER_WEIGHT;
    facts.push("shared_employer".to_owned());
  }
  if signals.shared_location {
    score += SOFT_LOCATION_WEIGHT;
    facts.push("shared_location".to_owned());
  }
  if signals.shared_phone {
    score += SOFT_SHARED_PHONE_WEIGHT;
    facts.push("shared_phone".to_owned());
  }
  if signals.name_jaccard >= SOFT_NAME_JACCARD {
    score += SOFT_NAME_WEIGHT;
    facts.push("similar_name".to_owned());
  }

  if score >= thresholds.soft {
    return Some(Classification {
      reason: "soft_accumulation",
      confidence: score.min(0.85),
      auto_base: false,
      matching_facts: facts,
      context: serde_json::json!({ "soft_score": score }),
    });
  }

  None
}

/// Auto-merge policy: no conflicts, and either a hard identifier at the
/// configured confidence, multiple hard identifiers, or a name+birthdate
/// compound at the configured confidence.
pub(crate) fn is_auto_eligible(
  classification: &Classification,
  conflicts: &[ConflictRecord],
  thresholds: MergeThresholds,
) -> bool {
  if !conflicts.is_empty() || !classification.auto_base {
    return false;
  }
  match classification.reason {
    "multiple_hard_identifiers" => true,
    "hard_identifier" => classification.confidence >= thresholds.auto_hard_confidence,
    "compound" => {
      classification.context["compound_type"] == "name_birthdate"
        && classification.confidence >= thresholds.auto_compound_confidence
    }
    _ => false,
  }
}

// ──────────────────────────────────────────────────
// Graph scanning
// ──────────────────────────────────────────────────

/// Scan the given entities (typically the ones an episode touched) against
/// the graph and persist merge candidates. Returns candidate ids that are
/// pending and auto-eligible, for the caller to execute.
pub async fn scan_for_merge_candidates(
  entity_ids: &[Uuid],
  db: &DatabaseConnection,
) -> Result<Vec<Uuid>, AppError> {
  let thresholds = MergeThresholds::from_env();
  let mut auto_eligible_ids = Vec::new();
  let mut visited_pairs: HashSet<(Uuid, Uuid)> = HashSet::new();

  for &entity_id in entity_ids {
    let Some(subject) = entity::Entity::find_by_id(entity_id).one(db).await? else {
      continue;
    };
    if subject.merged_into.is_some() {
      continue;
    }

    let subject_aliases = aliases_of(subject.id, db).await?;
    let subject_facets = facets_of(&subject, &subject_aliases, db).await?;

    for partner_id in discover_partners(&subject, &subject_aliases, db).await? {
      let pair = order_pair(subject.id, partner_id);
      if !visited_pairs.insert(pair) {
        continue;
      }

      let Some(partner) = entity::Entity::find_by_id(partner_id).one(db).await? else {
        continue;
      };
      if partner.merged_into.is_some() || partner.entity_type_id != subject.entity_type_id {
        continue;
      }

      let partner_aliases = aliases_of(partner.id, db).await?;
      let partner_facets = facets_of(&partner, &partner_aliases, db).await?;

      let signals = pair_signals(&subject_facets, &partner_facets);
      let Some(classification) = classify_pair(&signals, thresholds) else {
        continue;
      };

      let conflicts = detect_conflicts(&subject_facets.identity, &partner_facets.identity);
      let auto = is_auto_eligible(&classification, &conflicts, thresholds);

      if let Some(candidate_id) =
        persist_candidate(pair, &classification, &conflicts, auto, db).await?
      {
        tracing::info!(
          entity_a = %pair.0,
          entity_b = %pair.1,
          reason = classification.reason,
          confidence = classification.confidence,
          auto_eligible = auto,
          conflicts = conflicts.len(),
          "merge candidate recorded"
        );
        if auto {
          auto_eligible_ids.push(candidate_id);
        }
      }
    }
  }

  Ok(auto_eligible_ids)
}

/// Everything detection needs to know about one entity.
struct EntityFacets {
  normalized_name: String,
  /// `(alias_type, normalized)` for hard kinds.
  hard_buckets: Vec<(String, String)>,
  phone_buckets: Vec<String>,
  identity: EntityIdentity,
  employer_ids: Vec<Uuid>,
  location_ids: Vec<Uuid>,
}

async fn aliases_of(
  entity_id: Uuid,
  db: &DatabaseConnection,
) -> Result<Vec<entity_alias::Model>, AppError> {
  Ok(
    entity_alias::Entity::find()
      .filter(entity_alias::Column::EntityId.eq(entity_id))
      .all(db)
      .await?,
  )
}

async fn facets_of(
  subject: &entity::Model,
  aliases: &[entity_alias::Model],
  db: &DatabaseConnection,
) -> Result<EntityFacets, AppError> {
  let hard_types: Vec<String> = HARD_ALIAS_TYPES.iter().map(ToString::to_string).collect();
  let hard_buckets = aliases
    .iter()
    .filter(|alias| hard_types.contains(&alias.alias_type))
    .map(|alias| (alias.alias_type.clone(), alias.normalized.clone()))
    .collect();
  let phone_buckets: Vec<String> = aliases
    .iter()
    .filter(|alias| alias.alias_type == AliasType::Phone.to_string())
    .map(|alias| alias.normalized.clone())
    .collect();
  let emails = aliases
    .iter()
    .filter(|alias| alias.alias_type == AliasType::Email.to_string())
    .map(|alias| alias.normalized.clone())
    .collect();

  let birthdate = relationship::Entity::find()
    .filter(relationship::Column::SourceEntityId.eq(subject.id))
    .filter(relationship::Column::RelationType.eq("BORN_ON"))
    .one(db)
    .await?
    .and_then(|row| row.target_literal);

  let exclusive_targets = relationship::Entity::find()
    .filter(relationship::Column::SourceEntityId.eq(subject.id))
    .filter(relationship::Column::RelationType.is_in(["WORKS_AT", "LIVES_IN"]))
    .filter(relationship::Column::InvalidAt.is_null())
    .all(db)
    .await?;
  let employer_ids = exclusive_targets
    .iter()
    .filter(|row| row.relation_type == "WORKS_AT")
    .filter_map(|row| row.target_entity_id)
    .collect();
  let location_ids = exclusive_targets
    .iter()
    .filter(|row| row.relation_type == "LIVES_IN")
    .filter_map(|row| row.target_entity_id)
    .collect();

  Ok(EntityFacets {
    normalized_name: normalize_name(&subject.canonical_name),
    hard_buckets,
    identity: EntityIdentity {
      phones: phone_buckets.clone(),
      emails,
      birthdate,
    },
    phone_buckets,
    employer_ids,
    location_ids,
  })
}

fn pair_signals(a: &EntityFacets, b: &EntityFacets) -> PairSignals {
  let mut hard_matches = Vec::new();
  let mut hard_types = HashSet::new();
  for (alias_type, normalized) in &a.hard_buckets {
    if b.hard_buckets.contains(&(alias_type.clone(), normalized.clone())) {
      hard_matches.push(format!("{alias_type}:{normalized}"));
      hard_types.insert(alias_type.clone());
    }
  }

  let same_birthdate = match (&a.identity.birthdate, &b.identity.birthdate) {
    (Some(x), Some(y)) if x == y => Some(x.clone()),
    _ => None,
  };

  PairSignals {
    distinct_hard_types: hard_types.len(),
    hard_matches,
    shared_name: a.normalized_name == b.normalized_name,
    same_birthdate,
    shared_employer: a.employer_ids.iter().any(|id| b.employer_ids.contains(id)),
    shared_location: a.location_ids.iter().any(|id| b.location_ids.contains(id)),
    shared_phone: a.phone_buckets.iter().any(|p| b.phone_buckets.contains(p)),
    name_jaccard: token_set_jaccard(&a.normalized_name, &b.normalized_name),
  }
}

/// Partner discovery: entities sharing an alias bucket with the subject,
/// plus entities pointing at the same active employer/location.
async fn discover_partners(
  subject: &entity::Model,
  subject_aliases: &[entity_alias::Model],
  db: &DatabaseConnection,
) -> Result<HashSet<Uuid>, AppError> {
  let mut partners = HashSet::new();

  // Bucket co-owners, one query per bucket kind worth matching on.
  let mut bucket_keys: HashMap<String, Vec<String>> = HashMap::new();
  for alias in subject_aliases {
    bucket_keys
      .entry(alias.alias_type.clone())
      .or_default()
      .push(alias.normalized.clone());
  }
  for (alias_type, normals) in bucket_keys {
    let rows = entity_alias::Entity::find()
      .filter(entity_alias::Column::AliasType.eq(alias_type))
      .filter(entity_alias::Column::Normalized.is_in(normals))
      .filter(entity_alias::Column::EntityId.ne(subject.id))
      .all(db)
      .await?;
    partners.extend(rows.into_iter().map(|row| row.entity_id));
  }

  // Co-targets of the subject's active WORKS_AT / LIVES_IN facts.
  let target_ids: Vec<Uuid> = relationship::Entity::find()
    .filter(relationship::Column::SourceEntityId.eq(subject.id))
    .filter(relationship::Column::RelationType.is_in(["WORKS_AT", "LIVES_IN"]))
    .filter(relationship::Column::InvalidAt.is_null())
    .all(db)
    .await?
    .into_iter()
    .filter_map(|row| row.target_entity_id)
    .collect();
  if !target_ids.is_empty() {
    let co_sources = relationship::Entity::find()
      .filter(relationship::Column::TargetEntityId.is_in(target_ids))
      .filter(relationship::Column::RelationType.is_in(["WORKS_AT", "LIVES_IN"]))
      .filter(relationship::Column::InvalidAt.is_null())
      .filter(relationship::Column::SourceEntityId.ne(subject.id))
      .all(db)
      .await?;
    partners.extend(co_sources.into_iter().map(|row| row.source_entity_id));
  }

  Ok(partners)
}

/// Insert the candidate if the pair is new; otherwise return the existing
/// row when it is still pending. The unique pair index serializes
/// concurrent scans.
async fn persist_candidate(
  pair: (Uuid, Uuid),
  classification: &Classification,
  conflicts: &[ConflictRecord],
  auto_eligible: bool,
  db: &DatabaseConnection,
) -> Result<Option<Uuid>, AppError> {
  let model = merge_candidate::Model {
    id: Uuid::now_v7(),
    entity_a_id: pair.0,
    entity_b_id: pair.1,
    confidence: classification.confidence,
    auto_eligible,
    reason: classification.reason.to_owned(),
    matching_facts: serde_json::to_value(&classification.matching_facts)?,
    context: classification.context.clone(),
    conflicts: serde_json::to_value(conflicts)?,
    status: "pending".to_owned(),
    created_at: Utc::now().into(),
    resolved_at: None,
    resolved_by: None,
    resolution_reason: None,
  };

  merge_candidate::Entity::insert(model.into_active_model())
    .on_conflict(
      OnConflict::columns([
        merge_candidate::Column::EntityAId,
        merge_candidate::Column::EntityBId,
      ])
      .do_nothing()
      .to_owned(),
    )
    .exec_without_returning(db)
    .await?;

  let current = merge_candidate::Entity::find()
    .filter(merge_candidate::Column::EntityAId.eq(pair.0))
    .filter(merge_candidate::Column::EntityBId.eq(pair.1))
    .one(db)
    .await?;

  Ok(current.filter(|row| row.status == "pending").map(|row| row.id))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn one_hard_match_is_hard_identifier() {
    let signals = PairSignals {
      hard_matches: vec!["email:tyler@example.com".to_owned()],
      distinct_hard_types: 1,
      ..Default::default()
    };
    let c = classify_pair(&signals, MergeThresholds::default()).unwrap();
    assert_eq!(c.reason, "hard_identifier");
    assert!((c.confidence - 0.95).abs() < 1e-9);
    assert!(c.auto_base);
  }

  #[test]
  fn two_hard_types_bump_to_multiple() {
    let signals = PairSignals {
      hard_matches: vec![
        "email:tyler@example.com".to_owned(),
        "username:tyler".to_owned(),
      ],
      distinct_hard_types: 2,
      ..Default::default()
    };
    let c = classify_pair(&signals, MergeThresholds::default()).unwrap();
    assert_eq!(c.reason, "multiple_hard_identifiers");
    assert!((c.confidence - 0.99).abs() < 1e-9);
  }

  #[test]
  fn name_plus_birthdate_is_compound() {
    let signals = PairSignals {
      shared_name: true,
      same_birthdate: Some("1990-01-01".to_owned()),
      ..Default::default()
    };
    let c = classify_pair(&signals, MergeThresholds::default()).unwrap();
    assert_eq!(c.reason, "compound");
    assert_eq!(c.context["compound_type"], "name_birthdate");
  }

  #[test]
  fn shared_name_alone_is_not_compound() {
    let signals = PairSignals {
      shared_name: true,
      name_jaccard: 1.0,
      ..Default::default()
    };
    // only the name-similarity soft signal: below the default 0.60 threshold
    assert_eq!(classify_pair(&signals, MergeThresholds::default()), None);
  }

  #[test]
  fn shared_phone_alone_is_below_the_soft_threshold() {
    // Scenario: a family phone line must not produce a candidate by itself.
    let signals = PairSignals {
      shared_phone: true,
      ..Default::default()
    };
    assert_eq!(classify_pair(&signals, MergeThresholds::default()), None);
  }

  #[test]
  fn accumulated_soft_signals_cross_the_threshold() {
    let signals = PairSignals {
      shared_employer: true,
      shared_location: true,
      name_jaccard: 0.9,
      ..Default::default()
    };
    let c = classify_pair(&signals, MergeThresholds::default()).unwrap();
    assert_eq!(c.reason, "soft_accumulation");
    assert!(!c.auto_base);
  }

  #[test]
  fn conflicts_disable_auto_eligibility() {
    let classification = Classification {
      reason: "hard_identifier",
      confidence: 0.95,
      auto_base: true,
      matching_facts: vec![],
      context: serde_json::json!({}),
    };
    let conflict = ConflictRecord {
      conflict_type: "different_phones".to_owned(),
      values_a: vec!["5551111".to_owned()],
      values_b: vec!["5552222".to_owned()],
    };
    assert!(is_auto_eligible(&classification, &[], MergeThresholds::default()));
    assert!(!is_auto_eligible(&classification, &[conflict], MergeThresholds::default()));
  }

  #[test]
  fn soft_candidates_are_never_auto_eligible() {
    let classification = Classification {
      reason: "soft_accumulation",
      confidence: 0.8,
      auto_base: false,
      matching_facts: vec![],
      context: serde_json::json!({}),
    };
    assert!(!is_auto_eligible(&classification, &[], MergeThresholds::default()));
  }
}
