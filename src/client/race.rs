//! First-result-wins slot shared by the webhook and polling paths.
//!
//! The arbiter arms the slot once per resolution attempt and waits on the
//! returned [`Ticket`]. Publishers never block: the first publish for the
//! armed attempt is delivered, every later one is dropped and reported as
//! `false`. A publish after the arbiter stopped waiting is dropped too.

use std::future::pending;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Webhook,
    Polling,
}

impl std::fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionSource::Webhook => write!(f, "webhook"),
            DetectionSource::Polling => write!(f, "polling"),
        }
    }
}

/// A terminal status found by one of the detection paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub status: crate::status::JobStatus,
    pub source: DetectionSource,
}

struct Armed {
    generation: u64,
    // Taken by the first delivery for this generation.
    tx: Option<oneshot::Sender<Detection>>,
}

/// Shared between the receiver, every poller and the arbiter.
pub struct ResultSlot {
    armed: Mutex<Armed>,
}

impl Default for ResultSlot {
    fn default() -> Self {
        Self {
            armed: Mutex::new(Armed {
                generation: 0,
                tx: None,
            }),
        }
    }
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh attempt. Any earlier ticket stops receiving.
    pub fn arm(&self) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        armed.generation += 1;
        armed.tx = Some(tx);
        Ticket {
            generation: armed.generation,
            rx,
        }
    }

    /// Delivers to whichever attempt is currently armed.
    pub fn publish(&self, detection: Detection) -> bool {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        Self::deliver(&mut armed, detection)
    }

    /// Delivers only if `generation` is still the armed attempt.
    pub fn publish_for(&self, generation: u64, detection: Detection) -> bool {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        if armed.generation != generation {
            return false;
        }
        Self::deliver(&mut armed, detection)
    }

    fn deliver(armed: &mut Armed, detection: Detection) -> bool {
        match armed.tx.take() {
            Some(tx) => tx.send(detection).is_ok(),
            None => false,
        }
    }
}

/// The arbiter's end of one armed attempt.
pub struct Ticket {
    generation: u64,
    rx: oneshot::Receiver<Detection>,
}

impl Ticket {
    /// The attempt this ticket belongs to; pollers publish against it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for the first detection, or `None` once `timeout` elapses.
    pub async fn wait(self, timeout: Duration) -> Option<Detection> {
        let rx = self.rx;
        let first = async move {
            match rx.await {
                Ok(detection) => detection,
                // Re-armed by a newer attempt; nothing more will arrive here.
                Err(_) => pending().await,
            }
        };
        tokio::time::timeout(timeout, first).await.ok()
    }
}
