//! Rate limiting for group operations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::error::SignalError;

/// Rate limiter for client-initiated group operations.
pub struct OpRateLimiter {
    /// Map of `client_id` to last accepted operation time.
    last_op: Mutex<HashMap<Uuid, Instant>>,
    /// Minimum time between operations.
    min_interval: Duration,
}

impl OpRateLimiter {
    /// Create a new rate limiter.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_op: Mutex::new(HashMap::new()),
            min_interval,
        }
    }

    /// Check whether a client may run a group operation now.
    pub fn check(&self, client_id: Uuid) -> Result<(), SignalError> {
        let mut map = self.last_op.lock().expect("rate limit lock");

        if let Some(last) = map.get(&client_id) {
            if last.elapsed() < self.min_interval {
                return Err(SignalError::RateLimited);
            }
        }

        map.insert(client_id, Instant::now());
        Ok(())
    }

    /// Drop stale entries (call periodically to prevent unbounded growth).
    pub fn cleanup(&self) {
        let cleanup_threshold = self.min_interval * 10;
        let mut map = self.last_op.lock().expect("rate limit lock");

        map.retain(|_, last| last.elapsed() < cleanup_threshold);
    }
}

impl Default for OpRateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_first_op() {
        let limiter = OpRateLimiter::new(Duration::from_millis(100));
        assert!(limiter.check(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn blocks_rapid_ops() {
        let limiter = OpRateLimiter::new(Duration::from_millis(100));
        let client = Uuid::new_v4();

        assert!(limiter.check(client).is_ok());
        assert!(limiter.check(client).is_err());
    }

    #[test]
    fn allows_after_interval() {
        let limiter = OpRateLimiter::new(Duration::from_millis(20));
        let client = Uuid::new_v4();

        assert!(limiter.check(client).is_ok());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check(client).is_ok());
    }

    #[test]
    fn independent_clients() {
        let limiter = OpRateLimiter::new(Duration::from_millis(100));
        assert!(limiter.check(Uuid::new_v4()).is_ok());
        assert!(limiter.check(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn cleanup_removes_old_entries() {
        let limiter = OpRateLimiter::new(Duration::from_millis(5));
        let client = Uuid::new_v4();

        limiter.check(client).ok();
        std::thread::sleep(Duration::from_millis(80));
        limiter.cleanup();
        assert!(limiter.last_op.lock().unwrap().is_empty());
    }
}
