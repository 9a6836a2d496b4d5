use std::time::Duration;

/// A Linear Backoff strategy: every call to [Iterator::next] hands out the current delay and then
/// grows it by `step`, never beyond `max_interval`.
///
/// The first delay is `initial` (zero for the queue poller), so after `n` calls the *current*
/// delay is `min(max_interval, initial + n * step)`. [Linear::reset] brings it back to `initial`,
/// which is what the poller does as soon as a receive returns messages.
///
/// # Example
/// ```
/// use backoff::strategy::linear::Linear;
/// use std::time::Duration;
///
/// let mut backoff = Linear::new(Duration::ZERO, Duration::from_secs(2), Duration::from_secs(15));
/// assert_eq!(backoff.next(), Some(Duration::ZERO));
/// assert_eq!(backoff.next(), Some(Duration::from_secs(2)));
/// assert_eq!(backoff.current(), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone)]
pub struct Linear {
    initial: Duration,
    step: Duration,
    max_interval: Duration,
    current: Duration,
}

impl Linear {
    pub fn new(initial: Duration, step: Duration, max_interval: Duration) -> Self {
        let initial = initial.min(max_interval);
        Self {
            initial,
            step,
            max_interval,
            current: initial,
        }
    }

    pub fn from_secs(step_secs: u64, max_interval_secs: u64) -> Self {
        Self::new(
            Duration::ZERO,
            Duration::from_secs(step_secs),
            Duration::from_secs(max_interval_secs),
        )
    }

    pub fn from_millis(step_ms: u64, max_interval_ms: u64) -> Self {
        Self::new(
            Duration::ZERO,
            Duration::from_millis(step_ms),
            Duration::from_millis(max_interval_ms),
        )
    }

    /// The delay the next call to [Iterator::next] will hand out.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Iterator for Linear {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.current;
        self.current = self
            .current
            .saturating_add(self.step)
            .min(self.max_interval);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_by_step_until_cap() {
        let mut backoff = Linear::from_secs(2, 15);

        let delays: Vec<u64> = backoff.by_ref().take(10).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![0, 2, 4, 6, 8, 10, 12, 14, 15, 15]);
        assert_eq!(backoff.current(), Duration::from_secs(15));
    }

    #[test]
    fn test_current_after_n_attempts() {
        for n in 0..20u64 {
            let mut backoff = Linear::from_secs(2, 15);
            for _ in 0..n {
                backoff.next();
            }
            assert_eq!(backoff.current(), Duration::from_secs((2 * n).min(15)));
        }
    }

    #[test]
    fn test_reset() {
        let mut backoff = Linear::from_millis(100, 1000);
        backoff.next();
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_millis(200));

        backoff.reset();
        assert_eq!(backoff.current(), Duration::ZERO);
        assert_eq!(backoff.next(), Some(Duration::ZERO));
    }

    #[test]
    fn test_initial_is_capped() {
        let mut backoff = Linear::new(
            Duration::from_secs(30),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        assert_eq!(backoff.next(), Some(Duration::from_secs(10)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_take_bounds_attempts() {
        let backoff = Linear::from_millis(10, 50).take(3);
        assert_eq!(backoff.count(), 3);
    }
}
