use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Smooth (leaky-bucket) request pacing at a controlled RPM.
///
/// Requests drain one at a time at the current rate instead of bursting, so
/// spiky traffic cannot trip upstream quotas. A feedback controller adjusts
/// the rate between `start_rpm` and `max_rpm`: doubling while below
/// `slow_start_until_rpm`, creeping additively above it, and halving whenever
/// the provider pushes back.
pub struct RateLimiter {
  state: Mutex<PacerState>,
  start_rpm: u32,
  max_rpm: u32,
  slow_start_until_rpm: u32,
}

struct PacerState {
  rpm: u32,
  /// Earliest instant the next request may leave the bucket.
  next_slot: Instant,
  /// Clean completions since the last rate change.
  window: u32,
}

/// Clean completions required before a rate adjustment is considered.
const GROWTH_WINDOW: u32 = 10;
/// Additive step above the slow-start region.
const ADDITIVE_STEP: u32 = 5;

impl RateLimiter {
  #[must_use]
  pub fn new(start_rpm: u32, max_rpm: u32, slow_start_until_rpm: u32) -> Self {
    let start_rpm = start_rpm.max(1);
    Self {
      state: Mutex::new(PacerState {
        rpm: start_rpm,
        next_slot: Instant::now(),
        window: 0,
      }),
      start_rpm,
      max_rpm: max_rpm.max(start_rpm),
      slow_start_until_rpm,
    }
  }

  /// Wait for this request's slot in the bucket.
  pub async fn acquire(&self) {
    let wait_until = {
      let mut state = self.state.lock().expect("rate mutex poisoned");
      let interval = Duration::from_secs_f64(60.0 / f64::from(state.rpm));
      let now = Instant::now();
      let slot = state.next_slot.max(now);
      state.next_slot = slot + interval;
      slot
    };
    tokio::time::sleep_until(wait_until).await;
  }

  /// Record a clean completion; grow the rate after a full window.
  pub fn on_success(&self) {
    let mut state = self.state.lock().expect("rate mutex poisoned");
    state.window += 1;
    if state.window < GROWTH_WINDOW || state.rpm >= self.max_rpm {
      return;
    }
    state.window = 0;
    state.rpm = if state.rpm < self.slow_start_until_rpm {
      (state.rpm * 2).min(self.max_rpm)
    } else {
      (state.rpm + ADDITIVE_STEP).min(self.max_rpm)
    };
    tracing::debug!(rpm = state.rpm, "request rate increased");
  }

  /// Record provider pushback (429 or 5xx); halve, never below `start_rpm`.
  pub fn on_pressure(&self) {
    let mut state = self.state.lock().expect("rate mutex poisoned");
    let halved = (state.rpm / 2).max(self.start_rpm);
    if halved < state.rpm {
      state.rpm = halved;
      tracing::debug!(rpm = state.rpm, "request rate decreased");
    }
    state.window = 0;
  }

  #[must_use]
  pub fn current_rpm(&self) -> u32 {
    self.state.lock().expect("rate mutex poisoned").rpm
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn drain_window(limiter: &RateLimiter) {
    for _ in 0..GROWTH_WINDOW {
      limiter.on_success();
    }
  }

  #[test]
  fn slow_start_doubles_then_additive() {
    let limiter = RateLimiter::new(30, 300, 120);
    drain_window(&limiter);
    assert_eq!(limiter.current_rpm(), 60);
    drain_window(&limiter);
    assert_eq!(limiter.current_rpm(), 120);
    // at the slow-start boundary growth turns additive
    drain_window(&limiter);
    assert_eq!(limiter.current_rpm(), 125);
  }

  #[test]
  fn pressure_halves_but_never_below_start() {
    let limiter = RateLimiter::new(60, 300, 120);
    drain_window(&limiter);
    assert_eq!(limiter.current_rpm(), 120);
    limiter.on_pressure();
    assert_eq!(limiter.current_rpm(), 60);
    limiter.on_pressure();
    assert_eq!(limiter.current_rpm(), 60);
  }

  #[test]
  fn growth_caps_at_max() {
    let limiter = RateLimiter::new(200, 210, 120);
    drain_window(&limiter);
    assert_eq!(limiter.current_rpm(), 205);
    drain_window(&limiter);
    assert_eq!(limiter.current_rpm(), 210);
    drain_window(&limiter);
    assert_eq!(limiter.current_rpm(), 210);
  }

  #[tokio::test(start_paused = true)]
  async fn paces_requests_at_the_configured_interval() {
    let limiter = RateLimiter::new(60, 60, 60); // one per second
    let started = Instant::now();
    limiter.acquire().await;
    limiter.acquire().await;
    limiter.acquire().await;
    // first slot is immediate, the next two wait a second each
    assert!(started.elapsed() >= Duration::from_secs(2));
  }
}
