//! Poll interval policy for waiting on a submitted job
//!
//! Each submission carries a ceiling for the time between two scheduler
//! queries. Waiting starts with a short interval and doubles it after every
//! sleep until the ceiling is reached, so short jobs are noticed quickly and
//! long jobs do not hammer the scheduler.
//!
//! Elapsed time is the sum of the intervals slept, not wall-clock time; the
//! scheduler round-trips themselves are not counted against a timeout.

use std::time::Duration;

use clusterjob_backends::{walltime_seconds, BackendError, ResourceMap, StatusCode};

use crate::config::JobAttributes;

/// First sleep of a wait, in seconds, unless the ceiling is lower
pub const INITIAL_INTERVAL: u64 = 5;

/// Ceiling used when neither an explicit interval nor a `time` resource is set
pub const DEFAULT_INTERVAL: u64 = 60;

/// Derived ceilings are this fraction of the requested wall time
const WALLTIME_DIVISOR: u64 = 10;

/// Poll ceiling of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum seconds between two status queries (at least 1)
    pub ceiling: u64,
}

impl PollPolicy {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling: ceiling.max(1),
        }
    }

    /// Work out the ceiling for a job.
    ///
    /// An explicit `sleep_interval` wins and is used as given.
    /// Otherwise a tenth of the `time` resource is used, kept within
    /// `min_sleep_interval..=max_sleep_interval`. Without either the
    /// ceiling is [`DEFAULT_INTERVAL`], still capped at the maximum.
    pub fn for_job(attributes: &JobAttributes, resources: &ResourceMap) -> Result<Self, BackendError> {
        let max = attributes.max_sleep_interval;
        let min = attributes.min_sleep_interval.min(max);

        let ceiling = match (attributes.sleep_interval, resources.get("time")) {
            (Some(explicit), _) => explicit,
            (None, Some(time)) => {
                let seconds = walltime_seconds("time", time)?;
                (seconds / WALLTIME_DIVISOR).max(min).min(max)
            }
            (None, None) => DEFAULT_INTERVAL.min(max),
        };
        Ok(Self::new(ceiling))
    }

    /// Fresh backoff sequence for one wait
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.ceiling)
    }
}

/// Doubling sleep intervals, capped at a ceiling
///
/// The sequence is infinite and non-decreasing.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u64,
    ceiling: u64,
}

impl Backoff {
    pub fn new(ceiling: u64) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            current: INITIAL_INTERVAL.min(ceiling),
            ceiling,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let interval = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        Some(Duration::from_secs(interval))
    }
}

/// Query `status` until it reports a finished job or the time spent
/// sleeping exceeds `timeout`.
///
/// Returns the last status observed, which is not finished when the
/// timeout ran out. `sleep` is called with every interval.
pub fn wait_for<E, Q, S>(
    policy: &PollPolicy,
    timeout: Option<Duration>,
    mut status: Q,
    mut sleep: S,
) -> Result<StatusCode, E>
where
    Q: FnMut() -> Result<StatusCode, E>,
    S: FnMut(Duration),
{
    let mut spent = Duration::ZERO;
    let mut intervals = policy.backoff();
    loop {
        let current = status()?;
        if current.is_finished() {
            return Ok(current);
        }
        let interval = intervals.next().unwrap_or(Duration::from_secs(policy.ceiling));
        sleep(interval);
        spent += interval;
        if let Some(limit) = timeout {
            if spent > limit {
                return Ok(current);
            }
        }
    }
}
