//! Reconnect pacing and failure accounting.
//!
//! Delays grow along a fixed table and hold at the final entry. Two
//! independent conditions stop automatic retrying: three consecutive
//! connection-attempt failures open the circuit breaker, and a wall-clock
//! window bounds the total duration of a failure episode. Both require an
//! explicit disconnect/reconnect to clear.

use std::time::{Duration, Instant};

pub const RETRY_DELAYS_MS: [u64; 6] = [100, 200, 500, 1000, 3000, 5000];
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(300);

/// Delay before the nth retry, clamped to the last table entry.
pub fn retry_delay(retry_count: u32) -> Duration {
    let idx = (retry_count as usize).min(RETRY_DELAYS_MS.len() - 1);
    Duration::from_millis(RETRY_DELAYS_MS[idx])
}

#[derive(Debug, Default)]
pub struct RetryState {
    pub retry_count: u32,
    pub retry_started_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    CircuitOpen,
    WindowExhausted,
}

impl RetryState {
    /// Account a failed connection attempt and decide what happens next.
    pub fn record_failure(&mut self, now: Instant, window: Duration) -> RetryDecision {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            self.circuit_open = true;
            return RetryDecision::CircuitOpen;
        }
        self.schedule(now, window)
    }

    /// Plan the next reconnect without counting a failure (unexpected loss
    /// of an established connection).
    pub fn schedule(&mut self, now: Instant, window: Duration) -> RetryDecision {
        if self.circuit_open {
            return RetryDecision::CircuitOpen;
        }
        let started = *self.retry_started_at.get_or_insert(now);
        if now.duration_since(started) > window {
            return RetryDecision::WindowExhausted;
        }
        let delay = retry_delay(self.retry_count);
        self.retry_count += 1;
        RetryDecision::RetryAfter(delay)
    }

    /// Clear all failure accounting (successful connect or explicit
    /// disconnect).
    pub fn reset(&mut self) {
        *self = RetryState::default();
    }
}
