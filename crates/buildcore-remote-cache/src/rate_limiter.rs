//! Token-bucket rate limiter wrapping the remote cache transport.

use std::time::Instant;

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucketLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempts to take one token; returns false if the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = Instant::now();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_refuses() {
        let limiter = TokenBucketLimiter::new(2.0, 0.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let limiter = TokenBucketLimiter::new(1.0, 1000.0);
        assert!(limiter.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(limiter.try_acquire());
    }
}
