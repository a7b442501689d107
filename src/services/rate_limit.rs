//! Per-credential request spacing.
//!
//! Each credential has a "next allowed" instant. Reserving a turn happens
//! under one lock; the sleep until that turn happens outside it, so a
//! backed-up credential never stalls callers using other credentials.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::services::cancel::{CancelToken, Cancelled};

pub struct RateLimiter {
    delay: Duration,
    next_allowed: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// `delay` is the minimum spacing between two requests on one credential.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_allowed: Mutex::new(HashMap::new()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Reserve the next slot for `credential` and return how long the caller
    /// must wait for it.
    fn reserve(&self, credential: &str) -> Duration {
        let now = Instant::now();
        let mut next_allowed = self.next_allowed.lock().unwrap_or_else(|e| e.into_inner());

        let scheduled = match next_allowed.get(credential) {
            Some(&next) if next > now => next,
            _ => now,
        };
        next_allowed.insert(credential.to_string(), scheduled + self.delay);

        scheduled - now
    }

    /// Wait until `credential` may be used again. Returns the delay applied.
    pub async fn await_turn(
        &self,
        credential: &str,
        cancel: &CancelToken,
    ) -> Result<Duration, Cancelled> {
        let wait = self.reserve(credential);

        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit delay");
        }

        if cancel.sleep(wait).await {
            Ok(wait)
        } else {
            Err(Cancelled)
        }
    }
}
