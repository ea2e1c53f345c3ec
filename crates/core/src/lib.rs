mod vocab;
pub use vocab::{
  AliasType, EntityType, SourceType, alias_type_for_identity, is_exclusive_relation,
  is_identity_relation, is_known_relation, is_temporal_relation,
};

mod temporal;
pub use temporal::normalize_flexible_date;

mod episode;
pub use episode::{EpisodeContext, load_episode_context};

pub mod extraction;
pub use extraction::{ExtractedEntity, ExtractedRelationship, RelationshipTarget};

pub mod resolution;
pub use resolution::ResolvedEntity;

mod identity;
pub use identity::{PromotionOutcome, normalize_alias, promote_identity_fact};

mod contradiction;
pub use contradiction::{detect_contradictions, relation_accumulates};

pub mod merge;
pub use merge::{
  MergeOutcome, defer_candidate, execute_merge, reject_candidate, scan_for_merge_candidates,
};

mod query;
pub use query::{
  Direction, QueryOptions, RelatedEntity, RelationshipWithDirection, find_entities_by_name,
  find_entities_by_relation_type, get_entity, get_entity_aliases, get_entity_relationships,
  get_related_entities,
};

mod embedding_index;
pub use embedding_index::refresh_entity_embeddings;

mod pipeline;
pub use pipeline::{ProcessOutcome, process_episode};
