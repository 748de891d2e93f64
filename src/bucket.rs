use tokio::time::Instant;

/// A token bucket which refills continuously with elapsed time.
///
/// Tokens are fractional and accumulate at `rate` tokens per second up to
/// `burst`. Admitting a unit of work costs exactly one token. Time is read
/// from Tokio's clock, so a paused runtime controls refilling in tests.
///
/// # Examples
///
/// ```
/// use task_tamer::TokenBucket;
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let mut bucket = TokenBucket::new(10.0, 2.0);
///
/// assert!(bucket.execute(|| true));
/// assert!(bucket.execute(|| true));
/// // Out of tokens, `work` is not invoked.
/// assert!(!bucket.execute(|| unreachable!()));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Construct a full bucket.
    ///
    /// # Panics
    ///
    /// Panics unless both `rate` and `burst` are finite and positive.
    pub fn new(rate: f64, burst: f64) -> Self {
        Self::with_tokens(rate, burst, burst)
    }

    /// Construct a bucket which starts out with `tokens` tokens, clamped to
    /// `0..=burst`.
    ///
    /// # Panics
    ///
    /// Panics unless both `rate` and `burst` are finite and positive.
    pub fn with_tokens(rate: f64, burst: f64, tokens: f64) -> Self {
        assert!(
            rate.is_finite() && rate > 0.0,
            "rate must be finite and positive, but was {rate}"
        );
        assert!(
            burst.is_finite() && burst > 0.0,
            "burst must be finite and positive, but was {burst}"
        );

        let tokens = if tokens.is_nan() {
            0.0
        } else {
            tokens.clamp(0.0, burst)
        };

        Self {
            rate,
            burst,
            tokens,
            last_refill: Instant::now(),
        }
    }

    /// Refill rate in tokens per second.
    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum number of tokens.
    #[inline]
    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Number of tokens as of the last refill.
    #[inline]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Admit `work` if there is at least one token available.
    ///
    /// Returns `false` without invoking `work` if the bucket is short of a
    /// token. Otherwise `work` is invoked and a token is only spent if it
    /// reports that it actually ran by returning `true`. Either way the
    /// bucket admitted the work, so this returns `true`.
    pub fn execute<F>(&mut self, work: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        if !self.try_acquire() {
            return false;
        }

        if !work() {
            self.refund();
        }

        true
    }

    /// Refill, then take a token if one is available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens < 1.0 {
            return false;
        }

        self.tokens -= 1.0;
        true
    }

    /// Test if a token is available, after refilling.
    pub fn has_capacity(&mut self) -> bool {
        self.refill();
        self.tokens >= 1.0
    }

    /// Give back a token taken with [`try_acquire`] which ended up unused.
    ///
    /// [`try_acquire`]: TokenBucket::try_acquire
    pub fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.burst);
    }

    fn refill(&mut self) {
        let now = Instant::now();
        // Saturates to zero if the clock went backwards.
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        if elapsed > 0.0 {
            self.tokens = (self.tokens + self.rate * elapsed).min(self.burst);
            self.last_refill = now;
        }

        debug_assert!((0.0..=self.burst).contains(&self.tokens));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;

    use super::TokenBucket;

    #[tokio::test(start_paused = true)]
    async fn burst_then_refill() {
        let mut bucket = TokenBucket::new(80.0, 25.0);

        for _ in 0..25 {
            assert!(bucket.execute(|| true));
        }

        assert!(!bucket.execute(|| true));

        // One token takes 12.5ms at 80 tokens per second.
        time::advance(Duration::from_millis(12)).await;
        assert!(!bucket.has_capacity());
        time::advance(Duration::from_millis(1)).await;
        assert!(bucket.execute(|| true));
        assert!(!bucket.has_capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_work_is_free() {
        let mut bucket = TokenBucket::with_tokens(1.0, 1.0, 1.0);
        let mut ran = false;

        assert!(bucket.execute(|| false));
        assert_eq!(bucket.tokens(), 1.0);

        assert!(bucket.execute(|| {
            ran = true;
            true
        }));

        assert!(ran);
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let mut bucket = TokenBucket::with_tokens(100.0, 5.0, 0.0);

        time::advance(Duration::from_secs(60)).await;
        assert!(bucket.has_capacity());
        assert_eq!(bucket.tokens(), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_stay_within_bounds() {
        let mut bucket = TokenBucket::with_tokens(37.0, 3.0, 3.0);

        // A fixed but irregular pattern of pauses and admissions.
        let pauses = [0, 1, 7, 0, 0, 33, 2, 250, 0, 0, 0, 0, 13, 81, 5, 0];

        for (n, pause) in pauses.iter().cycle().take(200).enumerate() {
            time::advance(Duration::from_millis(*pause)).await;
            bucket.execute(|| n % 3 != 0);
            assert!(bucket.tokens() >= 0.0 && bucket.tokens() <= bucket.burst());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_tokens_are_clamped() {
        assert_eq!(TokenBucket::with_tokens(1.0, 4.0, 10.0).tokens(), 4.0);
        assert_eq!(TokenBucket::with_tokens(1.0, 4.0, -1.0).tokens(), 0.0);
        assert_eq!(TokenBucket::with_tokens(1.0, 4.0, f64::NAN).tokens(), 0.0);
    }

    #[test]
    #[should_panic = "rate must be finite and positive"]
    fn zero_rate() {
        let _ = TokenBucket::new(0.0, 1.0);
    }
}
