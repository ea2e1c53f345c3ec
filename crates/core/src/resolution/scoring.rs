//! Deterministic candidate scoring. The resolver only trusts this path when
//! the winner is both strong and clearly separated; everything else goes to
//! the LLM tiebreaker.

/// Composite score a pool member must reach for deterministic acceptance.
pub const ACCEPT_THRESHOLD: f64 = 0.85;
/// Required separation between the winner and the runner-up.
pub const MARGIN_THRESHOLD: f64 = 0.15;

const NAME_WEIGHT: f64 = 0.45;
const TYPE_WEIGHT: f64 = 0.15;
const ALIAS_WEIGHT: f64 = 0.25;
const EMBEDDING_WEIGHT: f64 = 0.15;

/// Per-signal inputs for one (candidate, pool member) pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreInputs {
  /// Normalized names are byte-equal.
  pub exact_name: bool,
  /// Token-set Jaccard over the two names.
  pub jaccard: f64,
  /// Normalized Levenshtein similarity over the two names.
  pub edit_similarity: f64,
  pub type_match: bool,
  /// The two entities share an email/phone/handle/username alias.
  pub alias_overlap: bool,
  /// Cosine similarity of name embeddings, when both sides have one.
  pub embedding_similarity: Option<f32>,
}

#[must_use]
pub fn composite_score(inputs: ScoreInputs) -> f64 {
  let name_component = if inputs.exact_name {
    1.0
  } else {
    0.6 * inputs.jaccard + 0.4 * inputs.edit_similarity
  };
  let embedding_component = inputs
    .embedding_similarity
    .map_or(0.0, |sim| f64::from(sim).clamp(0.0, 1.0));

  NAME_WEIGHT * name_component
    + TYPE_WEIGHT * f64::from(inputs.type_match)
    + ALIAS_WEIGHT * f64::from(inputs.alias_overlap)
    + EMBEDDING_WEIGHT * embedding_component
}

/// Accept the winner only when it is strong and separated from the runner-up.
#[must_use]
pub fn accept_deterministically(top: f64, runner_up: Option<f64>) -> bool {
  top >= ACCEPT_THRESHOLD && top - runner_up.unwrap_or(0.0) >= MARGIN_THRESHOLD
}

/// Jaccard similarity over whitespace token sets of two normalized names.
#[must_use]
pub fn token_set_jaccard(a: &str, b: &str) -> f64 {
  let set_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
  let set_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
  if set_a.is_empty() && set_b.is_empty() {
    return 0.0;
  }
  let intersection = set_a.intersection(&set_b).count() as f64;
  let union = set_a.union(&set_b).count() as f64;
  intersection / union
}

/// Levenshtein distance, classic two-row dynamic program over chars.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
  let a: Vec<char> = a.chars().collect();
  let b: Vec<char> = b.chars().collect();
  if a.is_empty() {
    return b.len();
  }
  if b.is_empty() {
    return a.len();
  }

  let mut previous: Vec<usize> = (0..=b.len()).collect();
  let mut current = vec![0; b.len() + 1];

  for (i, &ca) in a.iter().enumerate() {
    current[0] = i + 1;
    for (j, &cb) in b.iter().enumerate() {
      let substitution = previous[j] + usize::from(ca != cb);
      current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
    }
    std::mem::swap(&mut previous, &mut current);
  }
  previous[b.len()]
}

/// Levenshtein scaled into a [0, 1] similarity.
#[must_use]
pub fn edit_similarity(a: &str, b: &str) -> f64 {
  let longest = a.chars().count().max(b.chars().count());
  if longest == 0 {
    return 0.0;
  }
  1.0 - levenshtein(a, b) as f64 / longest as f64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn levenshtein_basics() {
    assert_eq!(levenshtein("casey", "casey"), 0);
    assert_eq!(levenshtein("casey", "case"), 1);
    assert_eq!(levenshtein("kitten", "sitting"), 3);
    assert_eq!(levenshtein("", "abc"), 3);
  }

  #[test]
  fn jaccard_over_token_sets() {
    assert_eq!(token_set_jaccard("casey adams", "casey adams"), 1.0);
    assert_eq!(token_set_jaccard("casey adams", "adams casey"), 1.0);
    assert!((token_set_jaccard("casey adams", "casey") - 0.5).abs() < 1e-9);
    assert_eq!(token_set_jaccard("", ""), 0.0);
  }

  #[test]
  fn exact_name_with_type_and_alias_overlap_is_accepted() {
    let score = composite_score(ScoreInputs {
      exact_name: true,
      type_match: true,
      alias_overlap: true,
      ..Default::default()
    });
    assert!(score >= ACCEPT_THRESHOLD);
    assert!(accept_deterministically(score, Some(0.4)));
  }

  #[test]
  fn exact_name_alone_goes_to_the_tiebreaker() {
    let score = composite_score(ScoreInputs {
      exact_name: true,
      type_match: true,
      ..Default::default()
    });
    assert!(score < ACCEPT_THRESHOLD);
  }

  #[test]
  fn narrow_margin_is_not_accepted() {
    assert!(!accept_deterministically(0.9, Some(0.8)));
    assert!(accept_deterministically(0.9, Some(0.7)));
    assert!(accept_deterministically(0.9, None));
  }

  #[test]
  fn embedding_similarity_is_clamped() {
    let score = composite_score(ScoreInputs {
      embedding_similarity: Some(2.0),
      ..Default::default()
    });
    assert!(score <= EMBEDDING_WEIGHT + 1e-9);
  }
}
