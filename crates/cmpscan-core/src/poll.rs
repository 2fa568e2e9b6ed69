//! Bounded cooperative polling.
//!
//! Every wait in the consent protocol is "check a predicate up to N times,
//! sleeping a fixed interval between checks". Waits never block without a
//! bound, so a visit always terminates even if the page never answers.

use std::time::Duration;

/// Default number of checks per wait.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
/// Default pause between checks in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 100;

/// Attempt budget for a single wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollBudget {
    /// Total number of predicate checks (at least one is always made).
    pub max_attempts: u32,
    /// Pause between consecutive checks.
    pub interval: Duration,
}

impl PollBudget {
    /// Budget of `max_attempts` checks, `interval` apart.
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// A single immediate check (used for fast test configurations).
    pub const fn immediate() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Upper bound on the time a wait with this budget can take.
    pub fn worst_case(&self) -> Duration {
        self.interval * self.max_attempts.max(1).saturating_sub(1)
    }
}

impl Default for PollBudget {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_INTERVAL_MS),
        )
    }
}

/// Run `probe` until it yields a value or the budget is spent.
///
/// The first check is immediate; later checks follow `budget.interval`
/// apart. Returns `None` when every check came back empty.
pub async fn poll_until<T, F>(budget: PollBudget, mut probe: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let attempts = budget.max_attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(value) = probe() {
            return Some(value);
        }
        if attempt < attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }
    None
}
