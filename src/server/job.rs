//! Simulated job with a lazily started, one-shot completion timer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use uuid::Uuid;

use super::registry::{NotifyOutcome, WebhookRegistry};
use crate::error::ConfigError;
use crate::status::{JobStatus, StatusReport};

/// Inclusive range the completion delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    /// Fails if `min > max`. Equal bounds give a fixed delay.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::ReversedDelayRange {
                min_ms: min.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            });
        }
        Ok(Self { min, max })
    }

    pub fn from_secs(min: u64, max: u64) -> Result<Self, ConfigError> {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Uniform draw at millisecond granularity.
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(5),
            max: Duration::from_secs(15),
        }
    }
}

/// One job's lifecycle on the server.
///
/// The status and the start flag sit behind separate locks and are never
/// held together: `query_status` releases the start flag before it touches
/// the status.
pub struct JobSession {
    id: Uuid,
    status: Mutex<JobStatus>,
    started: Mutex<bool>,
    timer_launches: AtomicU32,
    delay: DelayRange,
    registry: Arc<WebhookRegistry>,
    changes: watch::Sender<JobStatus>,
}

impl JobSession {
    pub fn new(delay: DelayRange, registry: Arc<WebhookRegistry>) -> Arc<Self> {
        let (changes, _) = watch::channel(JobStatus::Pending);
        Arc::new(Self {
            id: Uuid::new_v4(),
            status: Mutex::new(JobStatus::Pending),
            started: Mutex::new(false),
            timer_launches: AtomicU32::new(0),
            delay,
            registry,
            changes,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current status. The first call over the session's lifetime starts the
    /// completion timer; concurrent first calls start it exactly once.
    pub fn query_status(self: &Arc<Self>) -> JobStatus {
        let first = {
            let mut started = self.started.lock().unwrap_or_else(|e| e.into_inner());
            !std::mem::replace(&mut *started, true)
        };
        if first {
            self.start_timer();
        }
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether any status query has happened yet.
    pub fn started(&self) -> bool {
        *self.started.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// How many times the completion timer was started. Stays at 0 or 1.
    pub fn timer_launches(&self) -> u32 {
        self.timer_launches.load(Ordering::SeqCst)
    }

    /// Receives every status change; lets callers await completion without
    /// querying (and therefore without starting the timer).
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.changes.subscribe()
    }

    fn start_timer(self: &Arc<Self>) {
        self.timer_launches.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay.sample();
        tracing::info!(job = %self.id, delay_ms = delay.as_millis() as u64, "job completion timer started");

        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.complete();
            let outcome = session
                .registry
                .notify(StatusReport::new(JobStatus::Completed))
                .await;
            if let NotifyOutcome::Failed(reason) = outcome {
                tracing::debug!(job = %session.id, %reason, "completion notification not delivered");
            }
        });
    }

    fn complete(&self) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        *status = JobStatus::Completed;
        self.changes.send_replace(JobStatus::Completed);
        tracing::info!(job = %self.id, "job completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry() -> Arc<WebhookRegistry> {
        Arc::new(WebhookRegistry::new(Duration::from_secs(2)).unwrap())
    }

    #[test]
    fn delay_range_rejects_reversed_bounds() {
        assert!(DelayRange::from_secs(15, 5).is_err());
        assert!(DelayRange::from_secs(5, 5).is_ok());
    }

    #[test]
    fn delay_sample_stays_in_range() {
        let range = DelayRange::from_secs(5, 15).unwrap();
        for _ in 0..200 {
            let d = range.sample();
            assert!(d >= Duration::from_secs(5) && d <= Duration::from_secs(15));
        }
        assert_eq!(
            DelayRange::fixed(Duration::from_secs(1)).sample(),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn creation_does_not_start_timer() {
        let session = JobSession::new(DelayRange::default(), registry());
        assert!(!session.started());
        assert_eq!(session.timer_launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_query_starts_timer_and_job_completes() {
        let session = JobSession::new(DelayRange::fixed(Duration::from_secs(5)), registry());
        let mut changes = session.subscribe();

        assert_eq!(session.query_status(), JobStatus::Pending);
        assert!(session.started());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(session.query_status(), JobStatus::Pending);

        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), JobStatus::Completed);
        assert_eq!(session.query_status(), JobStatus::Completed);
        assert_eq!(session.timer_launches(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_queries_start_timer_once() {
        let session = JobSession::new(DelayRange::fixed(Duration::from_secs(60)), registry());
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let session = Arc::clone(&session);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    session.query_status()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap(), JobStatus::Pending);
        }
        assert_eq!(session.timer_launches(), 1);
    }

    #[tokio::test]
    async fn completion_notifies_registered_webhook_once() {
        let hook = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({"status": "completed"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&hook)
            .await;

        let registry = registry();
        registry.register(Url::parse(&format!("{}/webhook", hook.uri())).unwrap());
        let session = JobSession::new(DelayRange::fixed(Duration::from_millis(50)), registry);
        let mut changes = session.subscribe();

        for _ in 0..5 {
            session.query_status();
        }
        changes.changed().await.unwrap();
        // Give the notification time to land before the mock verifies on drop.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(session.query_status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn dead_webhook_does_not_disturb_completion() {
        let registry = registry();
        registry.register(Url::parse("http://127.0.0.1:9/webhook").unwrap());
        let session = JobSession::new(DelayRange::fixed(Duration::from_millis(10)), registry);
        let mut changes = session.subscribe();

        session.query_status();
        changes.changed().await.unwrap();
        assert_eq!(session.query_status(), JobStatus::Completed);
    }
}
