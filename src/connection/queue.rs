//! Bounded FIFO for keystrokes typed while the connection is down.

use std::collections::VecDeque;

use tracing::debug;

pub const DEFAULT_INPUT_QUEUE_BYTES: usize = 1024;

/// Pending input payloads with a running byte budget. Overflow silently
/// drops the newest item; losing fresh keystrokes during an outage is the
/// documented policy, not an error.
#[derive(Debug)]
pub struct InputQueue {
    items: VecDeque<String>,
    bytes: usize,
    budget: usize,
}

impl InputQueue {
    pub fn new(budget: usize) -> Self {
        InputQueue {
            items: VecDeque::new(),
            bytes: 0,
            budget,
        }
    }

    /// Returns false when the payload was dropped for budget.
    pub fn push(&mut self, payload: impl Into<String>) -> bool {
        let payload = payload.into();
        if self.bytes + payload.len() > self.budget {
            debug!(
                target = "connection::queue",
                dropped = payload.len(),
                queued = self.bytes,
                budget = self.budget,
                "input queue budget exhausted; dropping newest entry"
            );
            return false;
        }
        self.bytes += payload.len();
        self.items.push_back(payload);
        true
    }

    /// Remove and return everything, in enqueue order.
    pub fn drain(&mut self) -> Vec<String> {
        self.bytes = 0;
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.bytes
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        InputQueue::new(DEFAULT_INPUT_QUEUE_BYTES)
    }
}
