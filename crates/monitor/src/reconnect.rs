//! Exponential backoff between transport recovery attempts.
//!
//! When polling the transport fails, the I/O task waits
//! [`next_delay`]-spaced intervals before polling again, which lets the
//! transport re-establish its connection. A successful connect resets
//! the delay to [`ReconnectConfig::initial_delay`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Retry spacing used by the I/O task after a transport failure.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay that follows `current`, never above [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Tracks the current delay across consecutive failures.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    delay: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            delay,
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.delay = self.config.initial_delay;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Sleep for the current delay, then grow it.
    ///
    /// Returns `false` if `cancel` fired while waiting.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        self.attempt += 1;
        tracing::info!(
            attempt = self.attempt,
            delay_ms = self.delay.as_millis() as u64,
            "Waiting before next transport attempt",
        );

        let delay = self.delay;
        self.delay = next_delay(delay, &self.config);

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(initial_ms: u64, max_ms: u64, multiplier: f64) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
        }
    }

    #[test]
    fn fractional_multiplier_grows_in_millis() {
        let config = fast(1_000, 30_000, 1.5);
        assert_eq!(
            next_delay(Duration::from_millis(1_000), &config),
            Duration::from_millis(1_500)
        );
        assert_eq!(
            next_delay(Duration::from_millis(1_500), &config),
            Duration::from_millis(2_250)
        );
    }

    #[test]
    fn delay_never_exceeds_cap() {
        let config = fast(100, 1_000, 3.0);
        let mut delay = config.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..5 {
            delay = next_delay(delay, &config);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, [300, 900, 1_000, 1_000, 1_000]);
    }

    #[tokio::test]
    async fn each_wait_counts_an_attempt_and_grows_the_delay() {
        let cancel = CancellationToken::new();
        let mut backoff = Backoff::new(fast(1, 4, 2.0));

        let mut delays = Vec::new();
        for expected_attempt in 1..=4 {
            assert!(backoff.wait(&cancel).await);
            assert_eq!(backoff.attempt(), expected_attempt);
            delays.push(backoff.delay.as_millis());
        }
        assert_eq!(delays, [2, 4, 4, 4]);
    }

    #[tokio::test]
    async fn cancel_interrupts_a_long_wait() {
        let cancel = CancellationToken::new();
        let mut backoff = Backoff::new(fast(60_000, 60_000, 2.0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        assert!(!backoff.wait(&cancel).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(backoff.attempt(), 1);
    }

    #[tokio::test]
    async fn reset_after_growth_starts_over() {
        let cancel = CancellationToken::new();
        let mut backoff = Backoff::new(fast(1, 50, 4.0));
        assert!(backoff.wait(&cancel).await);
        assert!(backoff.wait(&cancel).await);
        assert_eq!(backoff.delay, Duration::from_millis(16));

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.delay, Duration::from_millis(1));

        assert!(backoff.wait(&cancel).await);
        assert_eq!(backoff.attempt(), 1);
        assert_eq!(backoff.delay, Duration::from_millis(4));
    }
}
