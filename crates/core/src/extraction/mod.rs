//! The two structured LLM calls of the pipeline: candidate entities first,
//! then typed relationships over the resolved entities.

mod entities;
pub use entities::{EntityExtraction, ExtractedEntity, extract_entities};

mod relationships;
pub use relationships::{
  ExtractedRelationship, RelationshipTarget, extract_relationships,
};
