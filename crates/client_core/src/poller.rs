//! Bounded confirmation polling with a linearly escalating delay.
//!
//! After an accepted command the poller waits `initial_wait` for the hardware to
//! start moving, then reads the device status up to `max_attempts` times. The
//! wait after attempt `n` is `increment * n`, and the final attempt has no
//! trailing wait, so the default policy waits at most `5 + 5 + 10 + 15 + 20`
//! seconds. Reads are strictly sequential and the loop exits on the first read
//! that converges.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use shared::domain::{DeviceId, DeviceStatus};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{clock::Clock, convergence::ConvergenceEvaluator, DeviceStatusClient};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_WAIT: Duration = Duration::from_secs(5);
pub const DEFAULT_INCREMENT: Duration = Duration::from_secs(5);

const ATTEMPT_CAPACITY_HINT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_wait: Duration,
    pub increment: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_wait: DEFAULT_INITIAL_WAIT,
            increment: DEFAULT_INCREMENT,
        }
    }
}

impl BackoffPolicy {
    /// Wait following `attempt` (1-based), or `None` after the final attempt.
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn wait_after(&self, attempt: u32) -> Option<Duration> {
        (attempt >= 1 && attempt < self.max_attempts).then(|| {
            self.increment
                .checked_mul(attempt)
                .unwrap_or(Duration::MAX)
        })
    }

    /// Inter-attempt waits in order, excluding the initial wait.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .filter_map(|attempt| self.wait_after(attempt))
            .collect()
    }

    pub fn worst_case_wait(&self) -> Duration {
        (1..self.max_attempts)
            .filter_map(|attempt| self.wait_after(attempt))
            .fold(self.initial_wait, |total, wait| total.saturating_add(wait))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationAttempt {
    pub attempt_index: u32,
    /// Delay waited immediately before this read.
    pub scheduled_delay: Duration,
    /// `None` when the read failed at the transport level.
    pub observed_locked: Option<bool>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Confirmed {
        status: DeviceStatus,
        attempts: Vec<ConfirmationAttempt>,
    },
    Unconfirmed {
        attempts: Vec<ConfirmationAttempt>,
    },
}

impl ConfirmationOutcome {
    pub fn attempts(&self) -> &[ConfirmationAttempt] {
        match self {
            Self::Confirmed { attempts, .. } | Self::Unconfirmed { attempts } => attempts,
        }
    }

    pub fn into_attempts(self) -> Vec<ConfirmationAttempt> {
        match self {
            Self::Confirmed { attempts, .. } | Self::Unconfirmed { attempts } => attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("confirmation polling cancelled")]
pub struct PollCancelled;

#[derive(Clone)]
pub struct BackoffPoller {
    status_client: Arc<dyn DeviceStatusClient>,
    evaluator: Arc<dyn ConvergenceEvaluator>,
    clock: Arc<dyn Clock>,
}

impl BackoffPoller {
    pub fn new(
        status_client: Arc<dyn DeviceStatusClient>,
        evaluator: Arc<dyn ConvergenceEvaluator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            status_client,
            evaluator,
            clock,
        }
    }

    pub async fn confirm(
        &self,
        device_id: &DeviceId,
        expected_locked: bool,
        policy: &BackoffPolicy,
        cancel: &CancellationToken,
    ) -> Result<ConfirmationOutcome, PollCancelled> {
        let capacity = policy.max_attempts.min(ATTEMPT_CAPACITY_HINT) as usize;
        let mut attempts = Vec::with_capacity(capacity);
        self.wait(policy.initial_wait, cancel).await?;
        let mut scheduled_delay = policy.initial_wait;

        for attempt in 1..=policy.max_attempts {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollCancelled),
                read = self.status_client.get_status(device_id) => read,
            };
            let observed_at = self.clock.now();

            match read {
                Ok(status) => {
                    let converged = self.evaluator.matches(&status, expected_locked);
                    attempts.push(ConfirmationAttempt {
                        attempt_index: attempt,
                        scheduled_delay,
                        observed_locked: Some(status.locked),
                        observed_at,
                    });
                    if converged {
                        info!(
                            device_id = %device_id,
                            attempt,
                            max_attempts = policy.max_attempts,
                            "actuation: status converged"
                        );
                        return Ok(ConfirmationOutcome::Confirmed { status, attempts });
                    }
                    debug!(
                        device_id = %device_id,
                        attempt,
                        observed_locked = status.locked,
                        expected_locked,
                        "actuation: status not yet converged"
                    );
                }
                Err(error) => {
                    warn!(
                        device_id = %device_id,
                        attempt,
                        error = %error,
                        "actuation: status read failed; continuing"
                    );
                    attempts.push(ConfirmationAttempt {
                        attempt_index: attempt,
                        scheduled_delay,
                        observed_locked: None,
                        observed_at,
                    });
                }
            }

            if let Some(delay) = policy.wait_after(attempt) {
                self.wait(delay, cancel).await?;
                scheduled_delay = delay;
            }
        }

        info!(
            device_id = %device_id,
            max_attempts = policy.max_attempts,
            "actuation: confirmation budget exhausted"
        );
        Ok(ConfirmationOutcome::Unconfirmed { attempts })
    }

    async fn wait(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), PollCancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PollCancelled),
            _ = self.clock.after(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
