//! Races webhook push against status polling under a hard deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::api::StatusApi;
use super::phase::{PhaseTracker, Resolution, ResolutionPhase};
use super::poller::{PollSchedule, Poller};
use super::race::{Detection, DetectionSource, ResultSlot};
use super::receiver::{ReceiverHandle, WebhookReceiver};
use crate::config::JobwatchConfig;
use crate::error::WatchError;
use crate::status::StatusCache;

/// What a failed webhook registration means for the resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Registration failure aborts the resolution.
    #[default]
    Required,
    /// Registration failure is logged and polling races alone.
    BestEffort,
}

/// Type-erased detached work handed to a [`TaskSpawner`].
pub type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Launches detection work that outlives the resolution that started it.
///
/// The arbiter never cancels these tasks: a poller that lost the race keeps
/// running until it finds a terminal status or exhausts its budget.
pub trait TaskSpawner: Send + Sync {
    fn spawn_detached(&self, name: &'static str, task: BackgroundTask);
}

/// Spawns onto the ambient tokio runtime and drops the join handle.
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn_detached(&self, name: &'static str, task: BackgroundTask) {
        tracing::debug!(task = name, "spawning background task");
        drop(tokio::spawn(task));
    }
}

#[derive(Debug, Clone)]
pub struct ArbiterSettings {
    pub webhook_host: String,
    pub webhook_port: u16,
    pub callback_host: String,
    pub poll_budget: u32,
    pub schedule: PollSchedule,
    pub timeout: Duration,
    pub registration: RegistrationPolicy,
}

impl ArbiterSettings {
    pub fn from_config(config: &JobwatchConfig) -> Self {
        Self {
            webhook_host: config.webhook_host.clone(),
            webhook_port: config.webhook_port,
            callback_host: config.callback_host.clone(),
            poll_budget: config.poll_budget,
            schedule: config.poll_schedule(),
            timeout: config.resolve_timeout(),
            registration: config.registration,
        }
    }
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self::from_config(&JobwatchConfig::default())
    }
}

/// Client-side coordinator. Owns the status cache, the result slot and the
/// standing webhook receiver, which is started by the first resolution and
/// reused by later ones.
pub struct Arbiter<A> {
    api: Arc<A>,
    cache: Arc<StatusCache>,
    slot: Arc<ResultSlot>,
    receiver: OnceCell<ReceiverHandle>,
    spawner: Arc<dyn TaskSpawner>,
    settings: ArbiterSettings,
}

impl<A: StatusApi> Arbiter<A> {
    pub fn new(api: A, settings: ArbiterSettings) -> Self {
        Self {
            api: Arc::new(api),
            cache: Arc::new(StatusCache::new()),
            slot: Arc::new(ResultSlot::new()),
            receiver: OnceCell::new(),
            spawner: Arc::new(TokioSpawner),
            settings,
        }
    }

    /// Replaces the default [`TokioSpawner`].
    pub fn with_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    /// The webhook receiver, once a resolution has started it.
    pub fn receiver(&self) -> Option<&ReceiverHandle> {
        self.receiver.get()
    }

    /// [`resolve_within`](Self::resolve_within) using the configured timeout.
    pub async fn resolve(&self) -> Result<Resolution, WatchError> {
        self.resolve_within(self.settings.timeout).await
    }

    /// Returns the first terminal status reported by either path. On timeout
    /// the error carries the cached, non-authoritative status.
    pub async fn resolve_within(&self, timeout: Duration) -> Result<Resolution, WatchError> {
        let mut tracker = PhaseTracker::new();

        let receiver = self.ensure_receiver().await?;
        tracker.advance(ResolutionPhase::AwaitingWebhookRegistration)?;

        // Armed before registering so an early callback is not lost.
        let ticket = self.slot.arm();
        let callback_url = receiver.callback_url(&self.settings.callback_host);
        match self.api.register_webhook(&callback_url).await {
            Ok(()) => {
                tracing::info!(url = %callback_url, "webhook registered, starting polling as backup");
            }
            Err(err) => match self.settings.registration {
                RegistrationPolicy::Required => {
                    return Err(match err {
                        WatchError::Registration(_) => err,
                        other => WatchError::Registration(other.to_string()),
                    });
                }
                RegistrationPolicy::BestEffort => {
                    tracing::warn!(error = %err, "webhook registration failed, relying on polling");
                }
            },
        }

        tracker.advance(ResolutionPhase::Racing)?;
        self.spawn_poller(ticket.generation());

        match ticket.wait(timeout).await {
            Some(detection) => {
                tracker.advance(ResolutionPhase::Resolved)?;
                tracing::info!(status = %detection.status, source = %detection.source, "received status");
                Ok(Resolution::from_detection(detection, &tracker))
            }
            None => {
                tracker.advance(ResolutionPhase::TimedOut)?;
                let fallback = self.cache.get();
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    fallback = ?fallback,
                    "timeout waiting for job completion"
                );
                Err(WatchError::Timeout { fallback })
            }
        }
    }

    async fn ensure_receiver(&self) -> Result<&ReceiverHandle, WatchError> {
        let handle = self
            .receiver
            .get_or_try_init(|| {
                WebhookReceiver::start(
                    (self.settings.webhook_host.as_str(), self.settings.webhook_port),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.slot),
                )
            })
            .await?;
        Ok(handle)
    }

    fn spawn_poller(&self, generation: u64) {
        let poller = Poller::new(
            Arc::clone(&self.api),
            Arc::clone(&self.cache),
            self.settings.schedule,
        );
        let slot = Arc::clone(&self.slot);
        let budget = self.settings.poll_budget;

        self.spawner.spawn_detached(
            "poller",
            Box::pin(async move {
                match poller.poll(budget).await {
                    Ok(status) => {
                        let delivered = slot.publish_for(
                            generation,
                            Detection {
                                status,
                                source: DetectionSource::Polling,
                            },
                        );
                        if !delivered {
                            tracing::debug!(%status, "polling result discarded, race already decided");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "polling ended without a terminal status");
                    }
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::JobStatus;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted server: fixed poll answers, optional registration failure and
    /// an optional callback delivered to the registered URL after a delay.
    struct MockApi {
        polls: Mutex<Vec<Result<JobStatus, ()>>>,
        register_ok: bool,
        push: Option<(Duration, &'static str)>,
        registered: Mutex<Vec<String>>,
        fetches: AtomicUsize,
    }

    impl MockApi {
        fn new(polls: Vec<Result<JobStatus, ()>>) -> Self {
            Self {
                polls: Mutex::new(polls),
                register_ok: true,
                push: None,
                registered: Mutex::new(Vec::new()),
                fetches: AtomicUsize::new(0),
            }
        }

        fn failing_registration(mut self) -> Self {
            self.register_ok = false;
            self
        }

        fn pushing(mut self, after: Duration, body: &'static str) -> Self {
            self.push = Some((after, body));
            self
        }
    }

    impl StatusApi for MockApi {
        async fn fetch_status(&self) -> Result<JobStatus, WatchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut polls = self.polls.lock().unwrap();
            let next = if polls.len() > 1 {
                polls.remove(0)
            } else {
                polls[0]
            };
            next.map_err(|_| WatchError::Decode("connection reset".into()))
        }

        async fn register_webhook(&self, callback_url: &str) -> Result<(), WatchError> {
            self.registered.lock().unwrap().push(callback_url.to_string());
            if !self.register_ok {
                return Err(WatchError::Registration("connection refused".into()));
            }
            if let Some((after, body)) = self.push {
                let url = callback_url.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = reqwest::Client::new()
                        .post(url)
                        .header("content-type", "application/json")
                        .body(body)
                        .send()
                        .await;
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSpawner {
        spawned: AtomicUsize,
    }

    impl TaskSpawner for CountingSpawner {
        fn spawn_detached(&self, _name: &'static str, task: BackgroundTask) {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(task);
        }
    }

    /// Keeps join handles so a test can wait for detached work to finish.
    #[derive(Default)]
    struct RecordingSpawner {
        handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    }

    impl RecordingSpawner {
        fn take(&self) -> Vec<tokio::task::JoinHandle<()>> {
            std::mem::take(&mut *self.handles.lock().unwrap())
        }
    }

    impl TaskSpawner for RecordingSpawner {
        fn spawn_detached(&self, _name: &'static str, task: BackgroundTask) {
            self.handles.lock().unwrap().push(tokio::spawn(task));
        }
    }

    fn settings(timeout: Duration) -> ArbiterSettings {
        ArbiterSettings {
            webhook_host: "127.0.0.1".into(),
            webhook_port: 0,
            callback_host: "127.0.0.1".into(),
            poll_budget: 10,
            schedule: PollSchedule {
                base: Duration::from_millis(40),
                mid: Duration::from_millis(20),
                fine: Duration::from_millis(10),
            },
            timeout,
            registration: RegistrationPolicy::Required,
        }
    }

    #[tokio::test]
    async fn webhook_wins_over_slow_polling() {
        let api = MockApi::new(vec![Ok(JobStatus::Pending)])
            .pushing(Duration::from_millis(50), r#"{"status":"completed"}"#);
        let mut s = settings(Duration::from_secs(5));
        s.schedule.base = Duration::from_secs(60);
        let arbiter = Arbiter::new(api, s);

        let resolution = arbiter.resolve().await.unwrap();
        assert_eq!(resolution.status, JobStatus::Completed);
        assert_eq!(resolution.source, DetectionSource::Webhook);
        assert_eq!(
            resolution.phases,
            vec![
                ResolutionPhase::Idle,
                ResolutionPhase::AwaitingWebhookRegistration,
                ResolutionPhase::Racing,
                ResolutionPhase::Resolved,
            ]
        );
    }

    #[tokio::test]
    async fn polling_wins_when_best_effort_registration_fails() {
        let api = MockApi::new(vec![
            Ok(JobStatus::Pending),
            Ok(JobStatus::Pending),
            Ok(JobStatus::Completed),
        ])
        .failing_registration();
        let mut s = settings(Duration::from_secs(5));
        s.registration = RegistrationPolicy::BestEffort;
        let arbiter = Arbiter::new(api, s);

        let resolution = arbiter.resolve().await.unwrap();
        assert_eq!(resolution.status, JobStatus::Completed);
        assert_eq!(resolution.source, DetectionSource::Polling);
    }

    #[tokio::test]
    async fn required_registration_failure_is_fatal() {
        let spawner = Arc::new(CountingSpawner::default());
        let api = MockApi::new(vec![Ok(JobStatus::Completed)]).failing_registration();
        let arbiter = Arbiter::new(api, settings(Duration::from_secs(5)))
            .with_spawner(Arc::clone(&spawner) as Arc<dyn TaskSpawner>);

        let err = arbiter.resolve().await.unwrap_err();
        assert!(matches!(err, WatchError::Registration(_)));
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_returns_cached_pending() {
        let api = MockApi::new(vec![Ok(JobStatus::Pending)]);
        let arbiter = Arbiter::new(api, settings(Duration::from_millis(300)));

        let err = arbiter.resolve().await.unwrap_err();
        assert_eq!(err.fallback(), Some(Some(JobStatus::Pending)));
    }

    #[tokio::test]
    async fn timeout_with_nothing_observed_is_unknown() {
        let api = MockApi::new(vec![Err(())]);
        let arbiter = Arbiter::new(api, settings(Duration::from_millis(200)));

        let err = arbiter.resolve().await.unwrap_err();
        assert!(matches!(err, WatchError::Timeout { fallback: None }));
    }

    #[tokio::test]
    async fn malformed_webhook_never_resolves() {
        let api = MockApi::new(vec![Err(())])
            .pushing(Duration::from_millis(20), r#"{"status": 7}"#);
        let arbiter = Arbiter::new(api, settings(Duration::from_millis(400)));

        let err = arbiter.resolve().await.unwrap_err();
        assert!(matches!(err, WatchError::Timeout { fallback: None }));
        assert_eq!(arbiter.cache().get(), None);
    }

    #[tokio::test]
    async fn late_polling_result_is_discarded() {
        let spawner = Arc::new(RecordingSpawner::default());
        let api = MockApi::new(vec![Ok(JobStatus::Pending), Ok(JobStatus::Completed)])
            .pushing(Duration::from_millis(10), r#"{"status":"completed"}"#);
        let mut s = settings(Duration::from_secs(5));
        s.schedule.base = Duration::from_millis(300);
        let arbiter =
            Arbiter::new(api, s).with_spawner(Arc::clone(&spawner) as Arc<dyn TaskSpawner>);

        let resolution = arbiter.resolve().await.unwrap();
        assert_eq!(resolution.source, DetectionSource::Webhook);
        assert!(arbiter.api.fetches.load(Ordering::SeqCst) <= 1);

        // The poller keeps going after the race and finds the terminal status.
        let pollers = spawner.take();
        assert_eq!(pollers.len(), 1);
        for poller in pollers {
            poller.await.unwrap();
        }
        assert_eq!(arbiter.api.fetches.load(Ordering::SeqCst), 2);

        // Its result went nowhere: the next attempt starts empty.
        let next = arbiter.slot.arm();
        assert_eq!(next.wait(Duration::from_millis(50)).await, None);
    }

    #[tokio::test]
    async fn receiver_is_started_once_across_resolutions() {
        let spawner = Arc::new(CountingSpawner::default());
        let api = MockApi::new(vec![Ok(JobStatus::Completed)]);
        let arbiter = Arbiter::new(api, settings(Duration::from_secs(5)))
            .with_spawner(Arc::clone(&spawner) as Arc<dyn TaskSpawner>);

        arbiter.resolve().await.unwrap();
        let port = arbiter.receiver().unwrap().local_addr().port();
        arbiter.resolve().await.unwrap();

        assert_eq!(arbiter.receiver().unwrap().local_addr().port(), port);
        assert!(arbiter.receiver().unwrap().is_running());
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);

        let registered = arbiter.api.registered.lock().unwrap();
        assert_eq!(registered.len(), 2);
        assert_eq!(registered[0], registered[1]);
    }
}
