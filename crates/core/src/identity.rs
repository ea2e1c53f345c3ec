//! Identity promotion: identity facts (HAS_EMAIL, HAS_PHONE, ...) become
//! alias rows instead of relationship rows. A bucket collision with another
//! entity marks the identifier shared and leaves deduplication to the merge
//! engine.

use anyhow::anyhow;
use chrono::Utc;
use cortex_entities::entity_alias;
use cortex_shared::AppError;
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
  prelude::Expr,
};
use uuid::Uuid;

use crate::vocab::{AliasType, alias_type_for_identity};

/// Type-specific canonical form of an alias string.
#[must_use]
pub fn normalize_alias(alias_type: AliasType, raw: &str) -> String {
  match alias_type {
    AliasType::Email => raw.trim().to_lowercase(),
    AliasType::Phone => normalize_phone(raw),
    AliasType::Handle => {
      let lowered = raw.trim().to_lowercase();
      if lowered.starts_with('@') {
        lowered
      } else {
        format!("@{lowered}")
      }
    }
    AliasType::Username => raw.trim().to_lowercase(),
    AliasType::Name | AliasType::Nickname => normalize_name(raw),
  }
}

/// Case-folded name with whitespace collapsed; the resolver keys exact name
/// matches on this form.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
  raw
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

fn normalize_phone(raw: &str) -> String {
  let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
  if digits.len() == 11 && digits.starts_with('1') {
    digits[1..].to_owned()
  } else {
    digits
  }
}

pub struct PromotionOutcome {
  pub alias_id: Uuid,
  pub created: bool,
  pub shared: bool,
}

/// Route one identity fact to the alias table.
///
/// - Same entity already owns the bucket: no-op.
/// - Another entity owns it: every row in the bucket (including the new one)
///   becomes `is_shared`; no auto-merge here.
/// - Bucket empty: insert a non-shared row. A racing creator loses on the
///   partial unique index and recovers by re-reading the bucket.
pub async fn promote_identity_fact<C: ConnectionTrait>(
  entity_id: Uuid,
  relation_type: &str,
  literal: &str,
  db: &C,
) -> Result<PromotionOutcome, AppError> {
  let alias_type = alias_type_for_identity(relation_type).ok_or_else(|| {
    AppError::data_invariant(anyhow!("{relation_type} is not an identity relation"))
  })?;
  let normalized = normalize_alias(alias_type, literal);
  if normalized.is_empty() || normalized == "@" {
    return Err(AppError::data_invariant(anyhow!(
      "identity literal {literal:?} normalizes to nothing"
    )));
  }

  // Two passes: the second only runs after losing a creation race.
  for attempt in 0..2 {
    let bucket = entity_alias::Entity::find()
      .filter(entity_alias::Column::AliasType.eq(alias_type.to_string()))
      .filter(entity_alias::Column::Normalized.eq(normalized.as_str()))
      .all(db)
      .await?;

    if let Some(ours) = bucket.iter().find(|row| row.entity_id == entity_id) {
      return Ok(PromotionOutcome {
        alias_id: ours.id,
        created: false,
        shared: ours.is_shared,
      });
    }

    if !bucket.is_empty() {
      // Another entity legitimately holds this identifier. Flip the whole
      // bucket to shared, then join it.
      entity_alias::Entity::update_many()
        .col_expr(entity_alias::Column::IsShared, Expr::value(true))
        .filter(entity_alias::Column::AliasType.eq(alias_type.to_string()))
        .filter(entity_alias::Column::Normalized.eq(normalized.as_str()))
        .exec(db)
        .await?;

      let inserted = insert_alias(entity_id, alias_type, literal, &normalized, true, db).await?;
      tracing::info!(
        entity_id = %entity_id,
        alias_type = %alias_type,
        normalized,
        "identifier is now shared across entities"
      );
      return Ok(PromotionOutcome {
        alias_id: inserted,
        created: true,
        shared: true,
      });
    }

    match insert_alias(entity_id, alias_type, literal, &normalized, false, db).await {
      Ok(alias_id) => {
        return Ok(PromotionOutcome {
          alias_id,
          created: true,
          shared: false,
        });
      }
      Err(err) if attempt == 0 && is_unique_violation(&err) => {
        tracing::debug!(normalized, "lost alias creation race, re-reading bucket");
      }
      Err(err) => return Err(err),
    }
  }

  Err(AppError::constraint_violation(anyhow!(
    "alias bucket ({alias_type}, {normalized}) kept colliding"
  )))
}

async fn insert_alias<C: ConnectionTrait>(
  entity_id: Uuid,
  alias_type: AliasType,
  raw: &str,
  normalized: &str,
  is_shared: bool,
  db: &C,
) -> Result<Uuid, AppError> {
  let id = Uuid::now_v7();
  let model = entity_alias::Model {
    id,
    entity_id,
    alias: raw.trim().to_owned(),
    alias_type: alias_type.to_string(),
    normalized: normalized.to_owned(),
    is_shared,
    created_at: Utc::now().into(),
  };
  model.into_active_model().insert(db).await?;
  Ok(id)
}

pub(crate) fn is_unique_violation(err: &AppError) -> bool {
  // sea-orm surfaces Postgres unique violations with SQLSTATE 23505.
  let text = err.to_string();
  text.contains("23505") || text.contains("duplicate key")
}

/// Active model for the canonical-name alias of a freshly created entity.
pub(crate) fn name_alias_model(entity_id: Uuid, name: &str) -> entity_alias::ActiveModel {
  entity_alias::Model {
    id: Uuid::now_v7(),
    entity_id,
    alias: name.to_owned(),
    alias_type: AliasType::Name.to_string(),
    normalized: normalize_name(name),
    is_shared: false,
    created_at: Utc::now().into(),
  }
  .into_active_model()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn email_lowercases_and_trims() {
    assert_eq!(
      normalize_alias(AliasType::Email, "  Casey@Anthropic.COM "),
      "casey@anthropic.com"
    );
  }

  #[test]
  fn phone_strips_formatting_and_country_code() {
    assert_eq!(normalize_alias(AliasType::Phone, "+1-555-010-0100"), "5550100100");
    assert_eq!(normalize_alias(AliasType::Phone, "(555) 010-0100"), "5550100100");
    // an 11-digit number not starting with 1 keeps every digit
    assert_eq!(normalize_alias(AliasType::Phone, "25550100100"), "25550100100");
  }

  #[test]
  fn handle_gains_an_at_prefix_once() {
    assert_eq!(normalize_alias(AliasType::Handle, "CaseyCodes"), "@caseycodes");
    assert_eq!(normalize_alias(AliasType::Handle, "@CaseyCodes"), "@caseycodes");
  }

  #[test]
  fn username_lowercases() {
    assert_eq!(normalize_alias(AliasType::Username, " Casey_A "), "casey_a");
  }

  #[test]
  fn names_case_fold_and_collapse_whitespace() {
    assert_eq!(normalize_name("  Casey   ADAMS "), "casey adams");
    assert_eq!(
      normalize_alias(AliasType::Name, "Casey\tAdams"),
      "casey adams"
    );
  }
}
