//! Two-bucket token-bucket rate control.
//!
//! The outer (total) bucket is always active; the optional
//! originals/repairs split is a straightforward refinement disabled by
//! default. Grounded on a byte-accounted bucket refilled on demand against
//! an `Instant`, rather than a ticking background task.

use std::time::Instant;

/// A single byte-accounted token bucket.
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate_bps: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate_bps: u32, capacity_bytes: u32, now: Instant) -> Self {
        TokenBucket {
            tokens: capacity_bytes as f64,
            capacity: capacity_bytes as f64,
            rate_bps: rate_bps as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate_bps).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Attempts to consume `bytes` worth of tokens, refilling first.
    /// Returns `true` on success.
    pub fn try_consume(&mut self, bytes: usize, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= bytes as f64 {
            self.tokens -= bytes as f64;
            true
        } else {
            false
        }
    }

    /// Number of bytes still needed before `bytes` could be consumed, after
    /// refilling for `now`. Used to populate `Error::RateLimited(blocklen)`.
    #[must_use]
    pub fn deficit(&mut self, bytes: usize, now: Instant) -> usize {
        self.refill(now);
        (bytes as f64 - self.tokens).max(0.0) as usize
    }

    #[must_use]
    pub fn available(&self) -> f64 {
        self.tokens
    }

    pub fn set_rate(&mut self, rate_bps: u32) {
        self.rate_bps = rate_bps as f64;
    }
}

/// The rate controller a socket consults before every transmit: an always-on
/// outer bucket, plus optional originals-only and repairs-only sub-buckets.
pub struct RateController {
    pub outer: TokenBucket,
    pub originals: Option<TokenBucket>,
    pub repairs: Option<TokenBucket>,
}

impl RateController {
    #[must_use]
    pub fn new(max_rate_bps: u32, capacity_bytes: u32, now: Instant) -> Self {
        RateController {
            outer: TokenBucket::new(max_rate_bps, capacity_bytes, now),
            originals: None,
            repairs: None,
        }
    }

    /// Checks (and consumes on success) the outer bucket plus whichever
    /// sub-bucket applies to `is_repair`.
    pub fn try_send(&mut self, bytes: usize, is_repair: bool, now: Instant) -> Result<(), usize> {
        let sub = if is_repair { &mut self.repairs } else { &mut self.originals };
        if let Some(bucket) = sub {
            if !bucket.try_consume(bytes, now) {
                return Err(bucket.deficit(bytes, now));
            }
        }
        if self.outer.try_consume(bytes, now) {
            Ok(())
        } else {
            let deficit = self.outer.deficit(bytes, now);
            Err(deficit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn consumes_until_empty_then_refills_over_time() {
        let t0 = Instant::now();
        let mut b = TokenBucket::new(100, 100, t0);
        assert!(b.try_consume(100, t0));
        assert!(!b.try_consume(1, t0));
        let later = t0 + Duration::from_millis(500);
        assert!(b.try_consume(50, later));
    }

    #[test]
    fn deficit_reports_bytes_needed() {
        let t0 = Instant::now();
        let mut b = TokenBucket::new(10, 10, t0);
        b.try_consume(10, t0);
        let d = b.deficit(5, t0);
        assert_eq!(d, 5);
    }
}
