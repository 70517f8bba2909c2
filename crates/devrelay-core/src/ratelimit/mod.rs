//! Token-bucket rate limiting for calls into the code-generation provider.
//!
//! One bucket is shared across all workers in a process; nodes that call
//! `CodeGenClient` acquire a permit before issuing the request and release
//! it (refilling over time) rather than after, since the cost of a call is
//! charged up front.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A simple token bucket: capacity tokens, refilled at `refill_per_sec`.
pub struct TokenBucket {
    inner: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            inner: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
            capacity,
            refill_per_sec,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Try to take `cost` tokens immediately. Returns `true` on success.
    pub fn try_acquire(&self, cost: f64) -> bool {
        let mut state = self.inner.lock().unwrap();
        self.refill(&mut state);
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Block (async) until `cost` tokens are available, polling at a fixed
    /// interval. Used by the engine's LLM call sites so a burst of
    /// debug-loop retries doesn't overrun the provider's rate limit.
    pub async fn acquire(&self, cost: f64) {
        loop {
            if self.try_acquire(cost) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_up_to_capacity_then_blocks() {
        let bucket = TokenBucket::new(2.0, 0.0);
        assert!(bucket.try_acquire(1.0));
        assert!(bucket.try_acquire(1.0));
        assert!(!bucket.try_acquire(1.0));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(1.0, 1000.0);
        assert!(bucket.try_acquire(1.0));
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_acquire(1.0));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let bucket = TokenBucket::new(1.0, 50.0);
        assert!(bucket.try_acquire(1.0));
        tokio::time::timeout(Duration::from_secs(1), bucket.acquire(1.0))
            .await
            .expect("acquire should complete once tokens refill");
    }
}
