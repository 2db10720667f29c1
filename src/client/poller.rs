//! Pull-side detection.
//!
//! The poller queries the job server up to a fixed budget, waiting a little
//! less between attempts as the budget runs out. Every successful answer is
//! written to the [`StatusCache`], terminal or not.

use std::sync::Arc;
use std::time::Duration;

use super::api::StatusApi;
use crate::error::WatchError;
use crate::status::{JobStatus, StatusCache};

/// Backoff intervals for the three phases of the poll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// First half of the budget.
    pub base: Duration,
    /// Third quarter.
    pub mid: Duration,
    /// Final quarter.
    pub fine: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(4),
            mid: Duration::from_secs(2),
            fine: Duration::from_secs(1),
        }
    }
}

impl PollSchedule {
    /// Wait after `attempt` (0-based) out of `budget`. Never increases with
    /// the attempt index, even if the configured intervals are out of order.
    pub fn interval_for(&self, attempt: u32, budget: u32) -> Duration {
        let mid = self.mid.min(self.base);
        let fine = self.fine.min(mid);
        let (attempt, budget) = (u64::from(attempt), u64::from(budget));
        if attempt > budget * 3 / 4 {
            fine
        } else if attempt > budget / 2 {
            mid
        } else {
            self.base
        }
    }
}

/// Pull-side detection: queries until a terminal status or budget exhaustion.
pub struct Poller<A> {
    api: Arc<A>,
    cache: Arc<StatusCache>,
    schedule: PollSchedule,
}

impl<A: StatusApi> Poller<A> {
    pub fn new(api: Arc<A>, cache: Arc<StatusCache>, schedule: PollSchedule) -> Self {
        Self {
            api,
            cache,
            schedule,
        }
    }

    /// Polls until a terminal status is seen or `max_attempts` queries were
    /// made. An error on the last attempt is returned as
    /// [`WatchError::PollExhausted`]; earlier errors are logged and retried.
    /// There is no wait after the final attempt.
    pub async fn poll(&self, max_attempts: u32) -> Result<JobStatus, WatchError> {
        for attempt in 0..max_attempts {
            let last = attempt + 1 == max_attempts;

            match self.api.fetch_status().await {
                Ok(status) => {
                    self.cache.set(status);
                    tracing::info!(attempt = attempt + 1, %status, "job status");
                    if status.is_terminal() {
                        tracing::info!("job completed via polling");
                        return Ok(status);
                    }
                }
                Err(err) => {
                    tracing::warn!(attempt = attempt + 1, error = %err, "error getting status");
                    if last {
                        return Err(WatchError::PollExhausted {
                            attempts: max_attempts,
                            source: Box::new(err),
                        });
                    }
                }
            }

            if !last {
                let interval = self.schedule.interval_for(attempt, max_attempts);
                tracing::debug!(interval_ms = interval.as_millis() as u64, "waiting before next poll");
                tokio::time::sleep(interval).await;
            }
        }

        Err(WatchError::RetriesExhausted {
            attempts: max_attempts,
        })
    }
}
