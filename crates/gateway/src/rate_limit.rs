use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Copy)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window request limiter keyed per identity. `limit == 0` disables
/// limiting for that call.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, Window>>>,
    window: Duration,
    max_keys: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, max_keys: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_keys,
        }
    }

    pub fn allow(&self, key: &str, limit: u32) -> bool {
        if limit == 0 {
            return true;
        }

        let now = Instant::now();
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = self.window;
        let entry = inner.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            return false;
        }
        entry.count += 1;

        if inner.len() > self.max_keys {
            inner.retain(|_, w| now.duration_since(w.started_at) < window);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn limiter_rejects_when_limit_reached() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 16);
        assert!(limiter.allow("auth:42", 2));
        assert!(limiter.allow("auth:42", 2));
        assert!(!limiter.allow("auth:42", 2));
        assert!(limiter.allow("auth:7", 2), "keys are independent");
    }

    #[test]
    fn limiter_allows_after_window_elapses() {
        let limiter = RateLimiter::new(Duration::from_millis(5), 16);
        assert!(limiter.allow("lookup:42", 1));
        assert!(!limiter.allow("lookup:42", 1));
        thread::sleep(Duration::from_millis(10));
        assert!(limiter.allow("lookup:42", 1));
    }

    #[test]
    fn zero_limit_disables_limiting() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 16);
        for _ in 0..100 {
            assert!(limiter.allow("auth:42", 0));
        }
    }
}
