//! # Snippet Engine
//!
//! Composes the loader, cache, connectivity monitor and push channel into a
//! single replay-of-latest outcome stream.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SnippetEngine Architecture                       │
//! │                                                                         │
//! │  subscribe() ──► OutcomeStream ◄── replay latest + broadcast ──┐        │
//! │  subscribe() ──► OutcomeStream ◄───────────────────────────────┤        │
//! │                                                                │        │
//! │  ┌─────────────────────────────────────────────────────────────┴──┐    │
//! │  │                    Session task (one per engine)               │    │
//! │  │                                                                │    │
//! │  │  start: cache ──► Progress(cached) ──► load                    │    │
//! │  │                                                                │    │
//! │  │  triggers ──────────────┐                                      │    │
//! │  │   • reconnect           │   Loading? ──► pending = true        │    │
//! │  │   • push event          ├─► Offline? ──► Error(Offline) once   │    │
//! │  │   • refresh()           │   else     ──► Progress, load        │    │
//! │  │                         ┘                                      │    │
//! │  │  load ok  ──► cache.save ──► Success(fresh)                    │    │
//! │  │  load err ──► Error(last known, cause)                         │    │
//! │  │  pending? ──► one trailing load                                │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  Last OutcomeStream dropped ──► task aborted, registration released,   │
//! │  in-flight load abandoned. Next subscribe() starts again from cache.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use snippet_core::{Configuration, Outcome, ProjectSnapshot, SyncPhase};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use crate::auth::{HttpAuthApi, TokenAuthority};
use crate::cache::SnapshotCache;
use crate::config::SdkConfig;
use crate::connectivity::{ConnectivityMonitor, ProbeReachability};
use crate::credentials::FileCredentialStore;
use crate::error::{SyncError, SyncResult};
use crate::http::build_client;
use crate::loader::{HttpRemoteLoader, SnapshotLoader};
use crate::push::{PushChannel, PushConfig, PushEvent, PushHandle, PushStatus};

/// Outcomes buffered per subscriber before it starts lagging.
const OUTCOME_CHANNEL_CAPACITY: usize = 32;

/// Outcome type delivered by the engine.
pub type SnapshotOutcome = Outcome<ProjectSnapshot>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Error Reporter
// =============================================================================

/// Receives errors that indicate a bug or a misbehaving backend.
///
/// Subscribers still get an `Error` outcome; this is the side channel for
/// crash reporting.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &SyncError);
}

/// Default reporter: logs at `error!`.
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &SyncError) {
        error!(error = %error, "Unexpected snippet engine error");
    }
}

// =============================================================================
// Snippet Engine
// =============================================================================

struct ActiveSession {
    id: u64,
    subscribers: usize,
    outcomes: broadcast::Sender<SnapshotOutcome>,
    latest: Arc<Mutex<Option<SnapshotOutcome>>>,
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

struct EngineInner {
    configuration: Configuration,
    loader: Arc<dyn SnapshotLoader>,
    cache: SnapshotCache,
    connectivity: ConnectivityMonitor,
    push: Option<PushHandle>,
    reporter: Arc<dyn ErrorReporter>,
    authority: Option<Arc<TokenAuthority>>,
    session: Mutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,
    shut_down: AtomicBool,
}

/// Cache-first, self-refreshing view of one project.
///
/// ## Usage
/// ```rust,ignore
/// let engine = SnippetEngine::from_config(&SdkConfig::load(None)?)?;
///
/// let mut outcomes = engine.subscribe();
/// while let Some(outcome) = outcomes.next().await {
///     render(outcome.data());
/// }
/// ```
#[derive(Clone)]
pub struct SnippetEngine {
    inner: Arc<EngineInner>,
}

impl SnippetEngine {
    /// Starts building an engine for one project.
    pub fn builder(configuration: Configuration) -> SnippetEngineBuilder {
        SnippetEngineBuilder::new(configuration)
    }

    /// Wires the HTTP stack described by `config`.
    ///
    /// Must be called within a Tokio runtime when a push URL is configured.
    pub fn from_config(config: &SdkConfig) -> SyncResult<Self> {
        config.validate()?;
        let project = config.project()?.clone();

        let client = build_client(config.request_timeout(), config.connect_timeout())?;
        let auth_api = Arc::new(HttpAuthApi::new(
            client.clone(),
            config.api.auth_url.clone(),
            project.api_key(),
        ));
        let store = Arc::new(FileCredentialStore::new(config.credentials_path()));
        let authority = Arc::new(TokenAuthority::new(
            auth_api,
            store,
            config.auth.strategy,
            config.device_id(),
        ));

        let loader = HttpRemoteLoader::new(
            client,
            &config.api.base_url,
            project.clone(),
            authority.clone(),
        )?;

        let probe = ProbeReachability::new(
            config.probe_addr()?,
            Duration::from_secs(config.connectivity.probe_interval_secs),
            Duration::from_millis(config.connectivity.probe_timeout_ms),
        );

        let mut builder = SnippetEngine::builder(project)
            .loader(Arc::new(loader))
            .cache(SnapshotCache::new(config.cache_dir(), &config.cache.tag))
            .connectivity(ConnectivityMonitor::new(Arc::new(probe)))
            .token_authority(authority);

        if let Some(ref url) = config.push.url {
            builder = builder.push(PushChannel::spawn(PushConfig {
                url: url.clone(),
                connect_timeout: config.connect_timeout(),
                initial_backoff: Duration::from_millis(config.push.initial_backoff_ms),
                max_backoff: Duration::from_secs(config.push.max_backoff_secs),
                ping_interval: Duration::from_secs(config.push.ping_interval_secs),
            }));
        }

        builder.build()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.inner.configuration
    }

    /// Token authority, when the engine was wired with one.
    pub fn token_authority(&self) -> Option<&Arc<TokenAuthority>> {
        self.inner.authority.as_ref()
    }

    /// Follows the push channel's status, when the engine has one.
    pub fn push_status_changes(&self) -> Option<watch::Receiver<PushStatus>> {
        self.inner.push.as_ref().map(PushHandle::status_changes)
    }

    /// Point-in-time reachability as seen by the engine.
    pub fn is_connected(&self) -> bool {
        self.inner.connectivity.is_connected()
    }

    /// Subscribes to outcomes.
    ///
    /// The stream first replays the latest outcome (if any), then yields every
    /// later one. The first subscriber starts the session; dropping the last
    /// one stops it. Must be called within a Tokio runtime.
    pub fn subscribe(&self) -> OutcomeStream {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            debug!("Subscribe after shutdown, returning closed stream");
            return OutcomeStream::closed();
        }

        let mut slot = lock(&self.inner.session);
        let session = slot.get_or_insert_with(|| self.start_session());
        session.subscribers += 1;

        let (replay, rx) = {
            let latest = lock(&session.latest);
            (latest.clone(), session.outcomes.subscribe())
        };

        debug!(session = session.id, subscribers = session.subscribers, "Subscriber added");
        OutcomeStream {
            replay,
            rx: BroadcastStream::new(rx),
            _guard: Some(SubscriberGuard {
                inner: self.inner.clone(),
                session_id: session.id,
            }),
        }
    }

    /// Requests a re-fetch. Coalesced with any load already in flight.
    pub fn refresh(&self) {
        match lock(&self.inner.session).as_ref() {
            Some(session) => {
                debug!(session = session.id, "Manual refresh requested");
                session.trigger.notify_one();
            }
            None => debug!("Refresh ignored, no active subscription"),
        }
    }

    /// Phase of the active session (`Idle` when nobody is subscribed).
    pub fn phase(&self) -> SyncPhase {
        match lock(&self.inner.session).as_ref() {
            Some(session) => lock(&session.latest)
                .as_ref()
                .map(Outcome::phase)
                .unwrap_or(SyncPhase::Loading),
            None => SyncPhase::Idle,
        }
    }

    /// Stops the session and the push channel. Existing streams end.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.inner.shut_down.store(true, Ordering::SeqCst);

        let session = lock(&self.inner.session).take();
        if let Some(session) = session {
            session.task.abort();
        }

        if let Some(ref push) = self.inner.push {
            if let Err(e) = push.shutdown().await {
                warn!(error = %e, "Push channel already stopped");
            }
        }

        info!(project = %self.inner.configuration, "Snippet engine stopped");
        Ok(())
    }

    fn start_session(&self) -> ActiveSession {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        let latest = Arc::new(Mutex::new(None));
        let trigger = Arc::new(Notify::new());

        let driver = SessionDriver {
            id,
            configuration: self.inner.configuration.clone(),
            loader: self.inner.loader.clone(),
            cache: self.inner.cache.clone(),
            reporter: self.inner.reporter.clone(),
            outcomes: outcomes.clone(),
            latest: latest.clone(),
            last_known: None,
            in_flight: None,
            pending: false,
            deferred: false,
            online: true,
        };

        let connectivity = self.inner.connectivity.clone();
        let push = self.inner.push.clone();
        let task = tokio::spawn(driver.run(connectivity, push, trigger.clone()));

        info!(session = id, project = %self.inner.configuration, "Session started");
        ActiveSession {
            id,
            subscribers: 0,
            outcomes,
            latest,
            trigger,
            task,
        }
    }
}

// =============================================================================
// Outcome Stream
// =============================================================================

struct SubscriberGuard {
    inner: Arc<EngineInner>,
    session_id: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let released = {
            let mut slot = lock(&self.inner.session);
            match slot.as_mut() {
                Some(session) if session.id == self.session_id => {
                    debug_assert!(session.subscribers > 0);
                    session.subscribers = session.subscribers.saturating_sub(1);
                    if session.subscribers == 0 {
                        slot.take()
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(session) = released {
            session.task.abort();
            info!(session = session.id, "Last subscriber gone, session stopped");
        }
    }
}

/// Subscriber view of the engine's outcomes.
pub struct OutcomeStream {
    replay: Option<SnapshotOutcome>,
    rx: BroadcastStream<SnapshotOutcome>,
    _guard: Option<SubscriberGuard>,
}

impl OutcomeStream {
    fn closed() -> Self {
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        OutcomeStream {
            replay: None,
            rx: BroadcastStream::new(rx),
            _guard: None,
        }
    }

    /// Projects every payload, keeping each outcome's tag.
    pub fn map_data<U, F>(self, mut f: F) -> impl Stream<Item = Outcome<U>> + Send + Unpin
    where
        F: FnMut(ProjectSnapshot) -> U + Send + Unpin + 'static,
        U: Send + 'static,
    {
        self.map(move |outcome| outcome.map_data(&mut f))
    }
}

impl Stream for OutcomeStream {
    type Item = SnapshotOutcome;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(outcome) = this.replay.take() {
            return Poll::Ready(Some(outcome));
        }

        loop {
            match Pin::new(&mut this.rx).poll_next(cx) {
                Poll::Ready(Some(Ok(outcome))) => return Poll::Ready(Some(outcome)),
                Poll::Ready(Some(Err(lagged))) => {
                    warn!(error = %lagged, "Outcome subscriber lagging, skipping ahead");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// =============================================================================
// Session Driver
// =============================================================================

/// State owned by the session task.
struct SessionDriver {
    id: u64,
    configuration: Configuration,
    loader: Arc<dyn SnapshotLoader>,
    cache: SnapshotCache,
    reporter: Arc<dyn ErrorReporter>,
    outcomes: broadcast::Sender<SnapshotOutcome>,
    latest: Arc<Mutex<Option<SnapshotOutcome>>>,

    last_known: Option<ProjectSnapshot>,
    in_flight: Option<BoxFuture<'static, SyncResult<ProjectSnapshot>>>,
    /// A trigger arrived while loading.
    pending: bool,
    /// A trigger arrived while offline.
    deferred: bool,
    online: bool,
}

impl SessionDriver {
    async fn run(
        mut self,
        connectivity: ConnectivityMonitor,
        push: Option<PushHandle>,
        trigger: Arc<Notify>,
    ) {
        let mut push_rx = push.map(|handle| handle.subscribe());
        let mut status = connectivity.status_stream();
        if let Some(initial) = status.next().await {
            self.online = initial.is_connected();
        }

        self.last_known = restore_cached(self.id, &self.cache, &self.configuration).await;
        self.trigger("subscribe");

        loop {
            tokio::select! {
                result = poll_in_flight(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.complete(result).await;
                    if self.pending {
                        self.pending = false;
                        self.trigger("coalesced");
                    }
                }

                Some(next) = status.next() => {
                    let was_online = self.online;
                    self.online = next.is_connected();
                    if self.online && !was_online {
                        info!(session = self.id, "Connectivity restored");
                        self.deferred = false;
                        self.trigger("reconnect");
                    } else if !self.online && was_online {
                        info!(session = self.id, "Connectivity lost");
                    }
                }

                event = next_push(&mut push_rx) => {
                    match event {
                        Ok(event) => {
                            if let PushEvent::SnippetsUpdated { ref ids } = event {
                                debug!(session = self.id, ?ids, "Snippets updated remotely");
                            }
                            self.trigger("push");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(session = self.id, skipped, "Push events lagged");
                            self.trigger("push");
                        }
                        Err(RecvError::Closed) => {
                            debug!(session = self.id, "Push channel closed");
                            push_rx = None;
                        }
                    }
                }

                _ = trigger.notified() => {
                    self.trigger("refresh");
                }
            }
        }
    }

    /// Starts a load, or records the trigger when one cannot start now.
    fn trigger(&mut self, reason: &'static str) {
        if self.in_flight.is_some() {
            debug!(session = self.id, reason, "Load in flight, coalescing trigger");
            self.pending = true;
            return;
        }

        if !self.online {
            if !self.deferred {
                debug!(session = self.id, reason, "Offline, deferring load");
                self.deferred = true;
                self.emit(Outcome::Error {
                    data: self.last_known.clone(),
                    cause: SyncError::Offline.to_failure(),
                });
            }
            return;
        }

        debug!(session = self.id, reason, "Loading project");
        self.emit(Outcome::Progress {
            data: self.last_known.clone(),
        });
        let loader = self.loader.clone();
        self.in_flight = Some(Box::pin(async move { loader.load().await }));
    }

    async fn complete(&mut self, result: SyncResult<ProjectSnapshot>) {
        match result {
            Ok(snapshot) => {
                self.cache
                    .save_snapshot(self.configuration.cache_key(), &snapshot)
                    .await;
                self.last_known = Some(snapshot.clone());
                self.emit(Outcome::Success { data: snapshot });
            }
            Err(e) => {
                if e.is_unexpected() {
                    self.reporter.report(&e);
                }
                warn!(session = self.id, error = %e, retryable = e.is_retryable(), "Load failed");
                self.emit(Outcome::Error {
                    data: self.last_known.clone(),
                    cause: e.to_failure(),
                });
            }
        }
    }

    fn emit(&self, outcome: SnapshotOutcome) {
        let mut latest = lock(&self.latest);
        *latest = Some(outcome.clone());
        let _ = self.outcomes.send(outcome);
    }
}

/// Cached snapshot for the session start. A shared link without a persisted
/// snippet id falls back to the shared id.
async fn restore_cached(
    session: u64,
    cache: &SnapshotCache,
    configuration: &Configuration,
) -> Option<ProjectSnapshot> {
    let key = configuration.cache_key();
    let entry = cache.load_entry(key).await?;
    debug!(session, key, count = entry.snippets.len(), "Serving cached snapshot");

    let snapshot = ProjectSnapshot::new(entry.snippets, entry.saved_at);
    Some(match (configuration, entry.shared_snippet_id) {
        (Configuration::SharedLink { .. }, Some(resolved)) => {
            snapshot.with_shared_snippet_id(resolved)
        }
        (Configuration::SharedLink { shared_id, .. }, None) => {
            snapshot.with_shared_snippet_id(shared_id.clone())
        }
        (Configuration::Direct { .. }, _) => snapshot,
    })
}

async fn poll_in_flight(
    in_flight: &mut Option<BoxFuture<'static, SyncResult<ProjectSnapshot>>>,
) -> SyncResult<ProjectSnapshot> {
    match in_flight {
        Some(load) => load.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_push(
    rx: &mut Option<broadcast::Receiver<PushEvent>>,
) -> Result<PushEvent, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`SnippetEngine`] with injectable collaborators.
pub struct SnippetEngineBuilder {
    configuration: Configuration,
    loader: Option<Arc<dyn SnapshotLoader>>,
    cache: Option<SnapshotCache>,
    connectivity: Option<ConnectivityMonitor>,
    push: Option<PushHandle>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    authority: Option<Arc<TokenAuthority>>,
}

impl SnippetEngineBuilder {
    pub fn new(configuration: Configuration) -> Self {
        SnippetEngineBuilder {
            configuration,
            loader: None,
            cache: None,
            connectivity: None,
            push: None,
            reporter: None,
            authority: None,
        }
    }

    /// Sets the snapshot loader (required).
    pub fn loader(mut self, loader: Arc<dyn SnapshotLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Sets the cache. Defaults to the platform cache directory, tag `default`.
    pub fn cache(mut self, cache: SnapshotCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the connectivity monitor. Defaults to always connected.
    pub fn connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Sets the push channel. Defaults to none.
    pub fn push(mut self, push: PushHandle) -> Self {
        self.push = Some(push);
        self
    }

    /// Sets the error reporter. Defaults to [`TracingReporter`].
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Attaches the token authority so embedders can sign out.
    pub fn token_authority(mut self, authority: Arc<TokenAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Validates the configuration and builds the engine.
    pub fn build(self) -> SyncResult<SnippetEngine> {
        self.configuration.validate()?;

        let loader = self
            .loader
            .ok_or_else(|| SyncError::InvalidConfig("Snapshot loader required".into()))?;

        let cache = self.cache.unwrap_or_else(|| {
            let defaults = SdkConfig::default();
            SnapshotCache::new(defaults.cache_dir(), &defaults.cache.tag)
        });

        Ok(SnippetEngine {
            inner: Arc::new(EngineInner {
                configuration: self.configuration,
                loader,
                cache,
                connectivity: self
                    .connectivity
                    .unwrap_or_else(ConnectivityMonitor::always_connected),
                push: self.push,
                reporter: self.reporter.unwrap_or_else(|| Arc::new(TracingReporter)),
                authority: self.authority,
                session: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use snippet_core::Snippet;

    struct StaticLoader;

    #[async_trait]
    impl SnapshotLoader for StaticLoader {
        async fn load(&self) -> SyncResult<ProjectSnapshot> {
            Ok(ProjectSnapshot::new(vec![Snippet::new("hero")], Utc::now()))
        }
    }

    #[test]
    fn test_build_rejects_invalid_configuration() {
        let result = SnippetEngine::builder(Configuration::direct("acme", "", "k"))
            .loader(Arc::new(StaticLoader))
            .build();
        assert!(matches!(result, Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_build_requires_loader() {
        let result = SnippetEngine::builder(Configuration::direct("acme", "site1", "k")).build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SnippetEngine::builder(Configuration::direct("acme", "site1", "k"))
            .loader(Arc::new(StaticLoader))
            .cache(SnapshotCache::new(dir.path(), "default"))
            .build()
            .unwrap();

        assert_eq!(engine.phase(), SyncPhase::Idle);
        engine.shutdown().await.unwrap();

        let mut stream = engine.subscribe();
        assert!(stream.next().await.is_none());
        assert_eq!(engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_from_config_wires_http_stack() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SdkConfig::new(Configuration::shared_link("xyz", "k"));
        config.cache.dir = Some(dir.path().join("cache"));
        config.auth.credentials_path = Some(dir.path().join("credentials.json"));

        let engine = SnippetEngine::from_config(&config).unwrap();
        assert_eq!(engine.configuration(), &Configuration::shared_link("xyz", "k"));
        assert!(engine.token_authority().is_some());
        assert_eq!(engine.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_from_config_requires_project() {
        let result = SnippetEngine::from_config(&SdkConfig::default());
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_tracing_reporter_does_not_panic() {
        TracingReporter.report(&SyncError::Internal("boom".into()));
    }
}
