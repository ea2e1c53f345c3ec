use std::time::Duration;

use anyhow::anyhow;
use async_openai::{
  Client,
  config::OpenAIConfig,
  error::OpenAIError,
  types::chat::{
    ChatCompletionRequestMessage, CreateChatCompletionRequestArgs, ReasoningEffort,
    ResponseFormat, ResponseFormatJsonSchema,
  },
  types::embeddings::CreateEmbeddingRequestArgs,
};
use cortex_shared::{APP_ENV, AppError};
use schemars::JsonSchema;
use sea_orm::prelude::PgVector;
use serde::de::DeserializeOwned;

use crate::limiter::AdaptiveLimiter;
use crate::rate::RateLimiter;
use crate::schema::fix_schema_for_strict;
use crate::usage::{UsageCounters, UsageSnapshot};

/// Per-call wall clock budget; a timeout is treated as a transient failure.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Bounded retries for transient failures (rate limit, 5xx, timeout).
const MAX_TRANSIENT_RETRIES: u32 = 4;
/// Backoff base; doubles per attempt, capped at [`BACKOFF_CAP`].
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);
/// Additional LLM round-trips allowed when output fails to parse.
const MAX_PARSE_RETRIES: u32 = 2;
/// Provider limit on texts per embedding request.
const EMBED_REQUEST_CAP: usize = 100;
/// Embedding dimension stored in the graph.
pub const EMBEDDING_DIMENSION: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
  RateLimited,
  Server,
  Other,
}

/// Classify a provider error from its rendered form. async-openai surfaces
/// provider error bodies through `ApiError`; the strings are stable enough to
/// key retry behavior on without depending on variant internals.
fn classify(err: &OpenAIError) -> ErrorClass {
  let text = err.to_string().to_ascii_lowercase();
  if text.contains("rate limit") || text.contains("rate_limit") || text.contains("429") {
    ErrorClass::RateLimited
  } else if text.contains("timeout")
    || text.contains("timed out")
    || text.contains("connection")
    || text.contains("server_error")
    || text.contains("internal server")
    || text.contains("overloaded")
    || text.contains("502")
    || text.contains("503")
  {
    ErrorClass::Server
  } else {
    ErrorClass::Other
  }
}

fn backoff_delay(attempt: u32) -> Duration {
  BACKOFF_BASE
    .saturating_mul(2_u32.saturating_pow(attempt))
    .min(BACKOFF_CAP)
}

/// The single collaborator through which all LLM traffic flows. Owns the
/// provider client, the adaptive concurrency bound, the request pacer, and
/// the usage counters; injected into the pipeline at construction time.
pub struct LlmClient {
  client: Client<OpenAIConfig>,
  extraction_model: String,
  embedding_model: String,
  thinking_level: Option<ReasoningEffort>,
  limiter: AdaptiveLimiter,
  rate: RateLimiter,
  usage: UsageCounters,
}

impl LlmClient {
  #[must_use]
  pub fn from_env() -> Self {
    let config = OpenAIConfig::new()
      .with_api_key(&APP_ENV.openai_api_key)
      .with_api_base(&APP_ENV.openai_base_url);

    let thinking_level = APP_ENV.thinking_level.as_deref().and_then(|level| {
      match level {
        "low" => Some(ReasoningEffort::Low),
        "medium" => Some(ReasoningEffort::Medium),
        "high" => Some(ReasoningEffort::High),
        other => {
          tracing::warn!(level = other, "unknown thinking level, ignoring");
          None
        }
      }
    });

    Self {
      client: Client::with_config(config),
      extraction_model: APP_ENV.extraction_model.clone(),
      embedding_model: APP_ENV.embedding_model.clone(),
      thinking_level,
      limiter: AdaptiveLimiter::new(APP_ENV.worker_count.max(1), APP_ENV.worker_count.max(1) * 4),
      rate: RateLimiter::new(
        APP_ENV.start_rpm,
        APP_ENV.max_rpm,
        APP_ENV.slow_start_until_rpm,
      ),
      usage: UsageCounters::default(),
    }
  }

  #[must_use]
  pub fn embedding_model(&self) -> &str {
    &self.embedding_model
  }

  #[must_use]
  pub fn usage(&self) -> UsageSnapshot {
    self.usage.snapshot()
  }

  /// Generate a structured object of type `T` via json_schema strict mode.
  ///
  /// Transient provider failures are retried with bounded exponential
  /// backoff. Unparseable output is re-requested up to [`MAX_PARSE_RETRIES`]
  /// times and then surfaced as `MalformedLlmOutput`; the caller fails the
  /// episode rather than retrying forever.
  pub async fn generate_object<T>(
    &self,
    messages: Vec<ChatCompletionRequestMessage>,
    schema_name: &str,
    schema_description: Option<String>,
  ) -> Result<T, AppError>
  where
    T: DeserializeOwned + JsonSchema,
  {
    let schema = schemars::schema_for!(T);
    let mut schema = serde_json::to_value(&schema)?;
    fix_schema_for_strict(&mut schema);

    let mut last_err: Option<serde_json::Error> = None;
    for parse_attempt in 0..=MAX_PARSE_RETRIES {
      let response = self
        .chat_raw(messages.clone(), schema_name, schema_description.clone(), schema.clone())
        .await?;

      match serde_json::from_str::<T>(&response) {
        Ok(value) => return Ok(value),
        Err(err) => {
          tracing::warn!(
            schema = schema_name,
            attempt = parse_attempt,
            error = %err,
            "LLM output failed schema parse, re-requesting"
          );
          self.usage.record_chat_retry();
          last_err = Some(err);
        }
      }
    }

    Err(AppError::malformed_llm_output(anyhow!(
      "unparseable LLM output for {schema_name} after {} attempts: {}",
      MAX_PARSE_RETRIES + 1,
      last_err.map_or_else(|| "unknown".to_owned(), |e| e.to_string())
    )))
  }

  /// One rate-limited, concurrency-bounded, transient-retried chat call.
  async fn chat_raw(
    &self,
    messages: Vec<ChatCompletionRequestMessage>,
    schema_name: &str,
    schema_description: Option<String>,
    schema: serde_json::Value,
  ) -> Result<String, AppError> {
    let mut builder = CreateChatCompletionRequestArgs::default();
    builder
      .model(&self.extraction_model)
      .messages(messages)
      .response_format(ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
          description: schema_description,
          name: schema_name.to_owned(),
          schema: Some(schema),
          strict: Some(true),
        },
      });
    if let Some(effort) = &self.thinking_level {
      builder.reasoning_effort(effort.clone());
    }
    let request = builder.build()?;

    for attempt in 0..=MAX_TRANSIENT_RETRIES {
      self.rate.acquire().await;
      let permit = self.limiter.acquire().await;

      let outcome = tokio::time::timeout(
        REQUEST_TIMEOUT,
        self.client.chat().create(request.clone()),
      )
      .await;
      drop(permit);

      let err = match outcome {
        Ok(Ok(response)) => {
          self.limiter.on_success();
          self.rate.on_success();
          if let Some(usage) = &response.usage {
            self
              .usage
              .record_chat(u64::from(usage.prompt_tokens), u64::from(usage.completion_tokens));
          }
          return response
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| AppError::malformed_llm_output(anyhow!("empty message content")));
        }
        Ok(Err(err)) => {
          let class = classify(&err);
          match class {
            ErrorClass::RateLimited => {
              self.limiter.on_pressure();
              self.rate.on_pressure();
            }
            ErrorClass::Server => self.limiter.on_pressure(),
            ErrorClass::Other => {
              return Err(AppError::new(err));
            }
          }
          AppError::transient(err)
        }
        Err(_elapsed) => {
          self.limiter.on_pressure();
          AppError::transient(anyhow!("LLM call timed out after {REQUEST_TIMEOUT:?}"))
        }
      };

      if attempt == MAX_TRANSIENT_RETRIES {
        return Err(err);
      }
      let delay = backoff_delay(attempt);
      tracing::debug!(
        schema = schema_name,
        attempt,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "transient LLM failure, backing off"
      );
      self.usage.record_chat_retry();
      tokio::time::sleep(delay).await;
    }

    unreachable!("retry loop returns on final attempt")
  }

  /// Embed a batch of texts. Returns one vector per input, in order.
  /// Inputs beyond the provider's per-request cap are chunked transparently.
  pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<PgVector>, AppError> {
    if inputs.is_empty() {
      return Ok(vec![]);
    }

    let mut vectors = Vec::with_capacity(inputs.len());
    for chunk in inputs.chunks(EMBED_REQUEST_CAP) {
      vectors.extend(self.embed_chunk(chunk).await?);
    }
    Ok(vectors)
  }

  async fn embed_chunk(&self, inputs: &[String]) -> Result<Vec<PgVector>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
      .model(&self.embedding_model)
      .input(inputs.to_vec())
      .dimensions(EMBEDDING_DIMENSION as u32)
      .build()?;

    for attempt in 0..=MAX_TRANSIENT_RETRIES {
      self.rate.acquire().await;
      let permit = self.limiter.acquire().await;
      let outcome = tokio::time::timeout(
        REQUEST_TIMEOUT,
        self.client.embeddings().create(request.clone()),
      )
      .await;
      drop(permit);

      let err = match outcome {
        Ok(Ok(response)) => {
          self.limiter.on_success();
          self.rate.on_success();
          self.usage.record_embedding(inputs.len() as u64);

          // Sort by index so ordering matches input
          let mut data = response.data;
          data.sort_by_key(|e| e.index);

          if data.len() != inputs.len() {
            return Err(AppError::new(anyhow!(
              "embedding count mismatch: expected {}, got {}",
              inputs.len(),
              data.len()
            )));
          }

          return Ok(data.into_iter().map(|e| PgVector::from(e.embedding)).collect());
        }
        Ok(Err(err)) => {
          match classify(&err) {
            ErrorClass::RateLimited => {
              self.limiter.on_pressure();
              self.rate.on_pressure();
            }
            ErrorClass::Server => self.limiter.on_pressure(),
            ErrorClass::Other => return Err(AppError::new(err)),
          }
          AppError::transient(err)
        }
        Err(_elapsed) => {
          self.limiter.on_pressure();
          AppError::transient(anyhow!("embedding call timed out after {REQUEST_TIMEOUT:?}"))
        }
      };

      if attempt == MAX_TRANSIENT_RETRIES {
        return Err(err);
      }
      tokio::time::sleep(backoff_delay(attempt)).await;
    }

    unreachable!("retry loop returns on final attempt")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_doubles_and_caps() {
    assert_eq!(backoff_delay(0), Duration::from_millis(500));
    assert_eq!(backoff_delay(1), Duration::from_secs(1));
    assert_eq!(backoff_delay(3), Duration::from_secs(4));
    assert_eq!(backoff_delay(10), BACKOFF_CAP);
  }

  #[test]
  fn rate_limit_strings_classify_as_rate_limited() {
    let err = OpenAIError::InvalidArgument("Rate limit reached for requests".to_owned());
    assert_eq!(classify(&err), ErrorClass::RateLimited);
  }

  #[test]
  fn server_strings_classify_as_server() {
    let err = OpenAIError::InvalidArgument("upstream connection timed out".to_owned());
    assert_eq!(classify(&err), ErrorClass::Server);
  }

  #[test]
  fn unknown_strings_classify_as_other() {
    let err = OpenAIError::InvalidArgument("invalid api key".to_owned());
    assert_eq!(classify(&err), ErrorClass::Other);
  }
}
