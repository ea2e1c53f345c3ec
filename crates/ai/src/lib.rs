// Re-export async_openai types for consumers
pub use async_openai::types::chat::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
  ChatCompletionRequestUserMessage,
};

mod batcher;
pub use batcher::{Embedder, EmbeddingBatcher};

mod client;
pub use client::{EMBEDDING_DIMENSION, LlmClient};

mod limiter;
pub use limiter::{AdaptiveLimiter, Permit};

mod rate;
pub use rate::RateLimiter;

mod schema;

mod usage;
pub use usage::{UsageCounters, UsageSnapshot};
