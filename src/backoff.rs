// Author: Jacques Murray

//! Delay strategies used between retry attempts.
//!
//! A `Backoff` is simply an `Iterator` that yields `Duration`s. The retry
//! engine pulls one delay after every recovery step; when the iterator
//! returns `None`, the loop gives up with the last error.

use std::time::Duration;

/// Trait for delay strategies.
///
/// Implemented for every `Iterator` over `Duration`, so `.take(n)` and the
/// other standard adapters can bound or reshape a strategy.
pub trait Backoff: Iterator<Item = Duration> {}

impl<T> Backoff for T where T: Iterator<Item = Duration> {}

/// Largest exponent applied by [`ExponentialBackoff`]. Keeps the shift from
/// overflowing long before `saturating_mul` would matter.
const MAX_DOUBLINGS: u32 = 16;

/// Waits for the same duration before every retry.
/// Infinite unless limited (e.g., with `.take()`).
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    duration: Duration,
}

impl FixedDelay {
    /// Creates a new `FixedDelay` strategy.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// A strategy that never waits. Handy in tests.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Iterator for FixedDelay {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.duration)
    }
}

/// Doubles the wait after every retry: base, 2×base, 4×base...
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Option<Duration>,
    max_retries: Option<usize>,
    attempt: usize,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` starting at `base_delay`.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base: base_delay,
            max_delay: None,
            max_retries: None,
            attempt: 0,
        }
    }

    /// Caps every yielded delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Stops yielding after `max_retries` delays.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.max_retries, Some(max) if self.attempt >= max) {
            return None;
        }

        let doublings = (self.attempt as u32).min(MAX_DOUBLINGS);
        self.attempt += 1;

        let delay = self.base.saturating_mul(1u32 << doublings);
        Some(match self.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        })
    }
}

/// Adds a random amount in `0..=max_jitter` to every delay of the wrapped
/// strategy, so clients that lost their session together do not all
/// re-authenticate in the same instant. Requires the `jitter` feature.
#[cfg(feature = "jitter")]
#[derive(Debug, Clone)]
pub struct Jitter<B: Backoff> {
    inner: B,
    max_jitter: Duration,
}

#[cfg(feature = "jitter")]
impl<B: Backoff> Jitter<B> {
    /// Wraps `inner`, adding up to `max_jitter` to each of its delays.
    pub fn new(inner: B, max_jitter: Duration) -> Self {
        Self { inner, max_jitter }
    }
}

#[cfg(feature = "jitter")]
impl<B: Backoff> Iterator for Jitter<B> {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        use rand::Rng;

        let delay = self.inner.next()?;
        let max_millis = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_millis == 0 {
            return Some(delay);
        }
        let extra = rand::thread_rng().gen_range(0..=max_millis);
        Some(delay.saturating_add(Duration::from_millis(extra)))
    }
}

/// The strategy the client uses between session-recovery retries:
/// exponential from `base_delay`, plus up to `max_jitter` of noise when the
/// `jitter` feature is enabled.
pub fn session_retry_delays(
    base_delay: Duration,
    max_jitter: Duration,
) -> impl Backoff + Send + 'static {
    cfg_if::cfg_if! {
        if #[cfg(feature = "jitter")] {
            Jitter::new(ExponentialBackoff::new(base_delay), max_jitter)
        } else {
            let _ = max_jitter;
            ExponentialBackoff::new(base_delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let mut strategy = FixedDelay::new(Duration::from_secs(1)).take(2);
        assert_eq!(strategy.next(), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next(), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next(), None);
    }

    #[test]
    fn test_immediate_never_waits() {
        let mut strategy = FixedDelay::immediate();
        assert_eq!(strategy.next(), Some(Duration::ZERO));
        assert_eq!(strategy.next(), Some(Duration::ZERO));
    }

    #[test]
    fn test_exponential_backoff() {
        let mut strategy = ExponentialBackoff::new(Duration::from_millis(100)).take(4);
        assert_eq!(strategy.next(), Some(Duration::from_millis(100)));
        assert_eq!(strategy.next(), Some(Duration::from_millis(200)));
        assert_eq!(strategy.next(), Some(Duration::from_millis(400)));
        assert_eq!(strategy.next(), Some(Duration::from_millis(800)));
        assert_eq!(strategy.next(), None);
    }

    #[test]
    fn test_exponential_backoff_with_max_delay() {
        let mut strategy = ExponentialBackoff::new(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .take(4);
        assert_eq!(strategy.next(), Some(Duration::from_millis(100)));
        assert_eq!(strategy.next(), Some(Duration::from_millis(200)));
        assert_eq!(strategy.next(), Some(Duration::from_millis(300)));
        assert_eq!(strategy.next(), Some(Duration::from_millis(300)));
        assert_eq!(strategy.next(), None);
    }

    #[test]
    fn test_exponential_backoff_with_max_retries() {
        let mut strategy = ExponentialBackoff::new(Duration::from_millis(100)).with_max_retries(2);
        assert_eq!(strategy.next(), Some(Duration::from_millis(100)));
        assert_eq!(strategy.next(), Some(Duration::from_millis(200)));
        assert_eq!(strategy.next(), None);
    }

    #[test]
    fn test_exponential_backoff_does_not_overflow() {
        let mut strategy = ExponentialBackoff::new(Duration::from_secs(1));
        let last = strategy.nth(200).unwrap();
        assert_eq!(last, Duration::from_secs(1 << MAX_DOUBLINGS));
    }

    #[cfg(feature = "jitter")]
    #[test]
    fn test_jitter_stays_within_bounds() {
        let fixed = FixedDelay::new(Duration::from_millis(100));
        let mut jitter = Jitter::new(fixed, Duration::from_millis(50)).take(20);
        for _ in 0..20 {
            let duration = jitter.next().unwrap();
            assert!(duration >= Duration::from_millis(100));
            assert!(duration <= Duration::from_millis(150));
        }
        assert_eq!(jitter.next(), None);
    }

    #[cfg(feature = "jitter")]
    #[test]
    fn test_zero_jitter_is_passthrough() {
        let mut jitter = Jitter::new(FixedDelay::new(Duration::from_millis(7)), Duration::ZERO);
        assert_eq!(jitter.next(), Some(Duration::from_millis(7)));
    }

    #[cfg(feature = "jitter")]
    #[test]
    fn test_huge_jitter_saturates_instead_of_wrapping() {
        let base = Duration::from_millis(100);
        let mut jitter = Jitter::new(FixedDelay::new(base), Duration::MAX);
        for _ in 0..20 {
            assert!(jitter.next().unwrap() >= base);
        }
    }

    #[test]
    fn test_session_retry_delays_start_at_base() {
        let mut delays = session_retry_delays(Duration::from_millis(10), Duration::ZERO);
        assert_eq!(delays.next(), Some(Duration::from_millis(10)));
        assert_eq!(delays.next(), Some(Duration::from_millis(20)));
    }
}
