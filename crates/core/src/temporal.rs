//! Reduced-precision validity timestamps. A fact learned from "back in 2019"
//! carries a bare `2019`; normalized ISO prefixes compare correctly with
//! lexicographic ordering, which is what the temporal SQL filters rely on.

use chrono::{DateTime, NaiveDate};

/// Normalize a validity timestamp to an ISO prefix: `YYYY`, `YYYY-MM`,
/// `YYYY-MM-DD`, or a full RFC 3339 instant. Returns `None` when the string
/// is not a usable date; callers clear the field rather than dropping the
/// row.
#[must_use]
pub fn normalize_flexible_date(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
    return Some(instant.to_utc().to_rfc3339());
  }

  let mut parts = trimmed.splitn(3, '-');
  let year: i32 = parts.next()?.parse().ok().filter(|y| (1..=9999).contains(y))?;

  let Some(month_part) = parts.next() else {
    return Some(format!("{year:04}"));
  };
  let month: u32 = month_part.parse().ok().filter(|m| (1..=12).contains(m))?;

  let Some(day_part) = parts.next() else {
    return Some(format!("{year:04}-{month:02}"));
  };
  let day: u32 = day_part.parse().ok()?;
  NaiveDate::from_ymd_opt(year, month, day)?;
  Some(format!("{year:04}-{month:02}-{day:02}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_all_three_precisions() {
    assert_eq!(normalize_flexible_date("2019"), Some("2019".to_owned()));
    assert_eq!(normalize_flexible_date("2025-12"), Some("2025-12".to_owned()));
    assert_eq!(
      normalize_flexible_date("2026-01-06"),
      Some("2026-01-06".to_owned())
    );
  }

  #[test]
  fn pads_short_components() {
    assert_eq!(normalize_flexible_date("2026-1-6"), Some("2026-01-06".to_owned()));
  }

  #[test]
  fn accepts_rfc3339_instants() {
    let normalized = normalize_flexible_date("2025-12-15T09:30:00-05:00").unwrap();
    assert_eq!(normalized, "2025-12-15T14:30:00+00:00");
  }

  #[test]
  fn rejects_garbage() {
    assert_eq!(normalize_flexible_date(""), None);
    assert_eq!(normalize_flexible_date("soon"), None);
    assert_eq!(normalize_flexible_date("2026-13"), None);
    assert_eq!(normalize_flexible_date("2026-02-30"), None);
  }

  #[test]
  fn normalized_prefixes_order_lexicographically() {
    let year = normalize_flexible_date("2025").unwrap();
    let month = normalize_flexible_date("2025-06").unwrap();
    let day = normalize_flexible_date("2025-06-15").unwrap();
    assert!(year < month && month < day);
  }
}
