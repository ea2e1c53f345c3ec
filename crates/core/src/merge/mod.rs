//! Merge engine: scans for identifier overlap between active entities,
//! persists merge candidates, auto-merges the safe tiers, and keeps an
//! immutable audit trail.

mod conflicts;
pub use conflicts::{ConflictRecord, EntityIdentity, detect_conflicts};

mod detection;
pub use detection::scan_for_merge_candidates;

mod execution;
pub use execution::{
  MergeOutcome, choose_merge_direction, defer_candidate, execute_merge, reject_candidate,
};
