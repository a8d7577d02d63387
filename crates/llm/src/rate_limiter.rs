//! Per-process token-bucket rate limiting for generator calls.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Limits generator calls to a configured requests-per-minute rate. One
/// bucket is shared by every call this process makes; it does not
/// coordinate across processes.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Blocks until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d.max(Duration::from_millis(1))).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_burst_up_to_capacity() {
        let bucket = TokenBucket::new(60);
        for _ in 0..60 {
            tokio::time::timeout(Duration::from_millis(50), bucket.acquire())
                .await
                .expect("should not block within capacity");
        }
    }

    #[tokio::test]
    async fn blocks_once_exhausted() {
        let bucket = TokenBucket::new(60);
        for _ in 0..60 {
            bucket.acquire().await;
        }
        let result = tokio::time::timeout(Duration::from_millis(50), bucket.acquire()).await;
        assert!(result.is_err(), "61st call should have to wait");
    }
}
