//! Conflict detection between a proposed merge pair. Any conflict disables
//! auto-merge regardless of confidence; the candidate is persisted with the
//! conflict records for human resolution.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
  #[serde(rename = "type")]
  pub conflict_type: String,
  pub values_a: Vec<String>,
  pub values_b: Vec<String>,
}

/// The identity facets conflict detection compares.
#[derive(Debug, Default, Clone)]
pub struct EntityIdentity {
  /// Normalized phone aliases.
  pub phones: Vec<String>,
  /// Normalized email aliases.
  pub emails: Vec<String>,
  /// BORN_ON literal, when one exists.
  pub birthdate: Option<String>,
}

#[must_use]
pub fn detect_conflicts(a: &EntityIdentity, b: &EntityIdentity) -> Vec<ConflictRecord> {
  let mut conflicts = Vec::new();

  if disjoint_non_empty(&a.phones, &b.phones) {
    conflicts.push(ConflictRecord {
      conflict_type: "different_phones".to_owned(),
      values_a: a.phones.clone(),
      values_b: b.phones.clone(),
    });
  }

  if disjoint_non_empty(&a.emails, &b.emails) {
    conflicts.push(ConflictRecord {
      conflict_type: "different_emails".to_owned(),
      values_a: a.emails.clone(),
      values_b: b.emails.clone(),
    });
  }

  if let (Some(born_a), Some(born_b)) = (&a.birthdate, &b.birthdate)
    && born_a != born_b
  {
    conflicts.push(ConflictRecord {
      conflict_type: "different_birthdates".to_owned(),
      values_a: vec![born_a.clone()],
      values_b: vec![born_b.clone()],
    });
  }

  conflicts
}

/// Both sides have values and the sets do not intersect.
fn disjoint_non_empty(a: &[String], b: &[String]) -> bool {
  !a.is_empty() && !b.is_empty() && a.iter().all(|value| !b.contains(value))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn identity(phones: &[&str], emails: &[&str], birthdate: Option<&str>) -> EntityIdentity {
    EntityIdentity {
      phones: phones.iter().map(|s| (*s).to_owned()).collect(),
      emails: emails.iter().map(|s| (*s).to_owned()).collect(),
      birthdate: birthdate.map(str::to_owned),
    }
  }

  #[test]
  fn disjoint_phones_conflict() {
    let a = identity(&["5551111"], &[], None);
    let b = identity(&["5552222"], &[], None);
    let conflicts = detect_conflicts(&a, &b);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, "different_phones");
    assert_eq!(conflicts[0].values_a, vec!["5551111"]);
    assert_eq!(conflicts[0].values_b, vec!["5552222"]);
  }

  #[test]
  fn overlapping_phones_do_not_conflict() {
    let a = identity(&["5551111", "5553333"], &[], None);
    let b = identity(&["5553333"], &[], None);
    assert!(detect_conflicts(&a, &b).is_empty());
  }

  #[test]
  fn one_sided_facets_never_conflict() {
    let a = identity(&["5551111"], &["a@example.com"], Some("1990-01-01"));
    let b = identity(&[], &[], None);
    assert!(detect_conflicts(&a, &b).is_empty());
  }

  #[test]
  fn different_birthdates_conflict() {
    let a = identity(&[], &[], Some("1990-01-01"));
    let b = identity(&[], &[], Some("1991-06-15"));
    let conflicts = detect_conflicts(&a, &b);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, "different_birthdates");
  }

  #[test]
  fn multiple_conflicts_are_all_reported() {
    let a = identity(&["5551111"], &["a@example.com"], Some("1990-01-01"));
    let b = identity(&["5552222"], &["b@example.com"], Some("1991-06-15"));
    let conflicts = detect_conflicts(&a, &b);
    let kinds: Vec<&str> = conflicts.iter().map(|c| c.conflict_type.as_str()).collect();
    assert_eq!(
      kinds,
      vec!["different_phones", "different_emails", "different_birthdates"]
    );
  }
}
