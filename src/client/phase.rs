//! Phase tracking for one resolution attempt.
//!
//! An attempt moves `Idle -> AwaitingWebhookRegistration -> Racing` and ends
//! in exactly one of `Resolved` or `TimedOut`. [`PhaseTracker`] rejects any
//! other transition and keeps the history for the final [`Resolution`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::race::{Detection, DetectionSource};
use crate::status::JobStatus;

/// Phases of one resolution attempt.
///
/// Each attempt flows: IDLE → AWAITING_WEBHOOK_REGISTRATION → RACING →
/// RESOLVED | TIMED_OUT. `Resolved` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPhase {
    Idle,
    AwaitingWebhookRegistration,
    Racing,
    Resolved,
    TimedOut,
}

impl ResolutionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResolutionPhase::Resolved | ResolutionPhase::TimedOut)
    }

    fn can_advance_to(self, next: ResolutionPhase) -> bool {
        use ResolutionPhase::*;
        matches!(
            (self, next),
            (Idle, AwaitingWebhookRegistration)
                | (AwaitingWebhookRegistration, Racing)
                | (Racing, Resolved)
                | (Racing, TimedOut)
        )
    }
}

impl fmt::Display for ResolutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionPhase::Idle => write!(f, "IDLE"),
            ResolutionPhase::AwaitingWebhookRegistration => {
                write!(f, "AWAITING_WEBHOOK_REGISTRATION")
            }
            ResolutionPhase::Racing => write!(f, "RACING"),
            ResolutionPhase::Resolved => write!(f, "RESOLVED"),
            ResolutionPhase::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal resolution transition {from} -> {to}")]
pub struct PhaseError {
    pub from: ResolutionPhase,
    pub to: ResolutionPhase,
}

/// Current phase plus the phases already left behind.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: ResolutionPhase,
    // Every phase entered, starting with Idle.
    history: Vec<ResolutionPhase>,
    started_at: DateTime<Utc>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: ResolutionPhase::Idle,
            history: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn current(&self) -> ResolutionPhase {
        self.current
    }

    /// Moves to `next`, recording it in the history. Illegal transitions
    /// leave the tracker untouched.
    pub fn advance(&mut self, next: ResolutionPhase) -> Result<(), PhaseError> {
        if !self.current.can_advance_to(next) {
            return Err(PhaseError {
                from: self.current,
                to: next,
            });
        }
        tracing::debug!(from = %self.current, to = %next, "resolution phase");
        self.history.push(self.current);
        self.current = next;
        Ok(())
    }

    /// Every phase visited so far, including the current one.
    pub fn phases(&self) -> Vec<ResolutionPhase> {
        let mut phases = self.history.clone();
        phases.push(self.current);
        phases
    }
}

/// Record of a resolution that produced an authoritative status.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub status: JobStatus,
    pub source: DetectionSource,
    pub phases: Vec<ResolutionPhase>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl Resolution {
    /// Stamps the finish time now; the duration is measured from the
    /// tracker's start.
    pub fn from_detection(detection: Detection, tracker: &PhaseTracker) -> Self {
        let now = Utc::now();
        Self {
            status: detection.status,
            source: detection.source,
            phases: tracker.phases(),
            started_at: tracker.started_at,
            finished_at: now,
            duration_ms: (now - tracker.started_at).num_milliseconds(),
        }
    }
}
