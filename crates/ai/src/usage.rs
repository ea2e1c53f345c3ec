use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative request/token accounting for one `LlmClient`. Mutated only by
/// the client internals; read through [`UsageCounters::snapshot`].
#[derive(Debug, Default)]
pub struct UsageCounters {
  chat_requests: AtomicU64,
  chat_retries: AtomicU64,
  prompt_tokens: AtomicU64,
  completion_tokens: AtomicU64,
  embedding_requests: AtomicU64,
  embedded_texts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
  pub chat_requests: u64,
  pub chat_retries: u64,
  pub prompt_tokens: u64,
  pub completion_tokens: u64,
  pub embedding_requests: u64,
  pub embedded_texts: u64,
}

impl UsageCounters {
  pub(crate) fn record_chat(&self, prompt_tokens: u64, completion_tokens: u64) {
    self.chat_requests.fetch_add(1, Ordering::Relaxed);
    self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
    self
      .completion_tokens
      .fetch_add(completion_tokens, Ordering::Relaxed);
  }

  pub(crate) fn record_chat_retry(&self) {
    self.chat_retries.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_embedding(&self, texts: u64) {
    self.embedding_requests.fetch_add(1, Ordering::Relaxed);
    self.embedded_texts.fetch_add(texts, Ordering::Relaxed);
  }

  #[must_use]
  pub fn snapshot(&self) -> UsageSnapshot {
    UsageSnapshot {
      chat_requests: self.chat_requests.load(Ordering::Relaxed),
      chat_retries: self.chat_retries.load(Ordering::Relaxed),
      prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
      completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
      embedding_requests: self.embedding_requests.load(Ordering::Relaxed),
      embedded_texts: self.embedded_texts.load(Ordering::Relaxed),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_reflects_recorded_activity() {
    let counters = UsageCounters::default();
    counters.record_chat(120, 40);
    counters.record_chat(80, 10);
    counters.record_chat_retry();
    counters.record_embedding(25);

    let snap = counters.snapshot();
    assert_eq!(snap.chat_requests, 2);
    assert_eq!(snap.chat_retries, 1);
    assert_eq!(snap.prompt_tokens, 200);
    assert_eq!(snap.completion_tokens, 50);
    assert_eq!(snap.embedding_requests, 1);
    assert_eq!(snap.embedded_texts, 25);
  }
}
