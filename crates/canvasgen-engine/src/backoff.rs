use std::time::Duration;

use canvasgen_contracts::config::non_empty_env;

pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Lowest base delay accepted from the environment; a zero base would never grow.
pub const MIN_BASE_DELAY_MS: u64 = 100;

/// Retry, polling and deadline limits for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Number of `Retryable` outcomes after which the run fails.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_polls: u32,
    /// Wall-clock budget for the whole loop; `None` disables it.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_millis(15_000),
            multiplier: BACKOFF_MULTIPLIER,
            max_polls: 60,
            deadline: Some(Duration::from_secs(240)),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_retries = env_u64("CANVASGEN_MAX_RETRIES", defaults.max_retries.into(), 1, 20);
        let base_ms = env_u64(
            "CANVASGEN_RETRY_BASE_DELAY_MS",
            duration_ms(defaults.base_delay),
            MIN_BASE_DELAY_MS,
            60_000,
        );
        let max_ms = env_u64(
            "CANVASGEN_RETRY_MAX_DELAY_MS",
            duration_ms(defaults.max_delay),
            0,
            300_000,
        );
        let max_polls = env_u64("CANVASGEN_MAX_POLLS", defaults.max_polls.into(), 1, 1_000);
        let deadline_secs = env_u64("CANVASGEN_DEADLINE_SECS", 240, 0, 3_600);
        Self {
            max_retries: max_retries as u32,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms.max(base_ms)),
            multiplier: BACKOFF_MULTIPLIER,
            max_polls: max_polls as u32,
            deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
        }
    }

    /// Zero delays, no deadline; for tests and offline providers.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            deadline: None,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self)
    }

    /// First `count` waits the loop would take.
    pub fn delay_schedule(&self, count: usize) -> Vec<Duration> {
        self.backoff().take(count).collect()
    }
}

/// Infinite, non-decreasing delay sequence capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        let max_delay = policy.max_delay.max(policy.base_delay);
        Self {
            next: policy.base_delay.min(max_delay),
            max_delay,
            multiplier: policy.multiplier.max(1.0),
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = current.as_secs_f64() * self.multiplier;
        self.next = if grown >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::try_from_secs_f64(grown)
                .map_or(self.max_delay, |grown| grown.max(current))
        };
        Some(current)
    }
}

fn duration_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

fn env_u64(key: &str, default: u64, min: u64, max: u64) -> u64 {
    non_empty_env(key)
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}
