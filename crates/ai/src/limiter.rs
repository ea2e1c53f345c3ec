use std::sync::Mutex;

use tokio::sync::Notify;

/// Additive-increase / multiplicative-decrease bound on in-flight LLM
/// operations. After a full window of clean completions the limit grows by
/// one; a rate-limit or server-error signal halves it.
pub struct AdaptiveLimiter {
  state: Mutex<State>,
  released: Notify,
  min_limit: usize,
  max_limit: usize,
}

struct State {
  limit: usize,
  in_flight: usize,
  /// Clean completions since the last limit change.
  window: usize,
}

/// Permit for one in-flight operation; release by dropping.
pub struct Permit<'a> {
  limiter: &'a AdaptiveLimiter,
}

impl AdaptiveLimiter {
  #[must_use]
  pub fn new(initial: usize, max_limit: usize) -> Self {
    let initial = initial.clamp(1, max_limit.max(1));
    Self {
      state: Mutex::new(State {
        limit: initial,
        in_flight: 0,
        window: 0,
      }),
      released: Notify::new(),
      min_limit: 1,
      max_limit: max_limit.max(1),
    }
  }

  /// Wait until an in-flight slot is available.
  pub async fn acquire(&self) -> Permit<'_> {
    loop {
      {
        let mut state = self.state.lock().expect("limiter mutex poisoned");
        if state.in_flight < state.limit {
          state.in_flight += 1;
          return Permit { limiter: self };
        }
      }
      self.released.notified().await;
    }
  }

  /// Record a clean completion; additive increase after a full window.
  pub fn on_success(&self) {
    let mut state = self.state.lock().expect("limiter mutex poisoned");
    state.window += 1;
    if state.window >= state.limit && state.limit < self.max_limit {
      state.limit += 1;
      state.window = 0;
      tracing::debug!(limit = state.limit, "concurrency limit increased");
    }
  }

  /// Record a rate-limit or server-error signal; multiplicative decrease.
  pub fn on_pressure(&self) {
    let mut state = self.state.lock().expect("limiter mutex poisoned");
    let halved = (state.limit / 2).max(self.min_limit);
    if halved < state.limit {
      state.limit = halved;
      tracing::debug!(limit = state.limit, "concurrency limit decreased");
    }
    state.window = 0;
  }

  #[must_use]
  pub fn current_limit(&self) -> usize {
    self.state.lock().expect("limiter mutex poisoned").limit
  }

  fn release(&self) {
    let mut state = self.state.lock().expect("limiter mutex poisoned");
    state.in_flight = state.in_flight.saturating_sub(1);
    drop(state);
    self.released.notify_waiters();
  }
}

impl Drop for Permit<'_> {
  fn drop(&mut self) {
    self.limiter.release();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn grows_after_a_clean_window() {
    let limiter = AdaptiveLimiter::new(2, 8);
    for _ in 0..2 {
      let permit = limiter.acquire().await;
      drop(permit);
      limiter.on_success();
    }
    assert_eq!(limiter.current_limit(), 3);
  }

  #[tokio::test]
  async fn halves_under_pressure_and_floors_at_one() {
    let limiter = AdaptiveLimiter::new(8, 8);
    limiter.on_pressure();
    assert_eq!(limiter.current_limit(), 4);
    limiter.on_pressure();
    limiter.on_pressure();
    limiter.on_pressure();
    assert_eq!(limiter.current_limit(), 1);
  }

  #[tokio::test]
  async fn acquire_blocks_at_the_limit() {
    let limiter = AdaptiveLimiter::new(1, 4);
    let held = limiter.acquire().await;

    let waited = tokio::time::timeout(
      std::time::Duration::from_millis(20),
      limiter.acquire(),
    )
    .await;
    assert!(waited.is_err(), "second acquire should block");

    drop(held);
    let permit = tokio::time::timeout(
      std::time::Duration::from_millis(200),
      limiter.acquire(),
    )
    .await;
    assert!(permit.is_ok(), "released slot should be reacquirable");
  }

  #[tokio::test]
  async fn pressure_resets_the_success_window() {
    let limiter = AdaptiveLimiter::new(4, 8);
    limiter.on_success();
    limiter.on_success();
    limiter.on_success();
    limiter.on_pressure();
    assert_eq!(limiter.current_limit(), 2);
    // window restarted; one success is not a full window of two
    limiter.on_success();
    assert_eq!(limiter.current_limit(), 2);
  }
}
