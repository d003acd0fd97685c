//! # Connectivity Monitor
//!
//! Reports network reachability now and as a stream of transitions.
//!
//! ## Registration Lifetime
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Reachability Registration                           │
//! │                                                                         │
//! │  status_stream() #1 ──► first subscriber: source.register(sink)         │
//! │  status_stream() #2 ──► shares the registration                         │
//! │                                                                         │
//! │  source ──sink──► broadcast ──► StatusStream #1 (dedup)                 │
//! │                             └──► StatusStream #2 (dedup)                │
//! │                                                                         │
//! │  drop #1 ──► still one subscriber, registration kept                    │
//! │  drop #2 ──► last subscriber gone: Registration dropped                 │
//! │              (probe task aborted / sink removed)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::Stream;
use snippet_core::NetworkStatus;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Callback a source invokes on every status it observes.
pub type StatusSink = Arc<dyn Fn(NetworkStatus) + Send + Sync>;

/// Capacity of the per-monitor status channel.
const STATUS_CHANNEL_CAPACITY: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Source Interface
// =============================================================================

/// Platform reachability provider.
pub trait ReachabilitySource: Send + Sync {
    /// Point-in-time status.
    fn current(&self) -> NetworkStatus;

    /// Starts delivering statuses to `sink` until the registration is dropped.
    fn register(&self, sink: StatusSink) -> Registration;
}

/// Releases a source registration when dropped.
pub struct Registration {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Registration {
            release: Some(Box::new(release)),
        }
    }

    /// A registration with nothing to release.
    pub fn noop() -> Self {
        Registration { release: None }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

// =============================================================================
// Monitor
// =============================================================================

struct LeaseState {
    subscribers: usize,
    registration: Option<Registration>,
}

struct MonitorInner {
    source: Arc<dyn ReachabilitySource>,
    tx: broadcast::Sender<NetworkStatus>,
    lease: Mutex<LeaseState>,
}

/// Shared view over a [`ReachabilitySource`].
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    pub fn new(source: Arc<dyn ReachabilitySource>) -> Self {
        let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        ConnectivityMonitor {
            inner: Arc::new(MonitorInner {
                source,
                tx,
                lease: Mutex::new(LeaseState {
                    subscribers: 0,
                    registration: None,
                }),
            }),
        }
    }

    /// A monitor that always reports `Connected`.
    pub fn always_connected() -> Self {
        Self::new(Arc::new(ManualReachability::new(NetworkStatus::Connected)))
    }

    /// Point-in-time reachability.
    pub fn is_connected(&self) -> bool {
        self.inner.source.current().is_connected()
    }

    /// Current status first, then every transition.
    pub fn status_stream(&self) -> StatusStream {
        let rx = self.inner.tx.subscribe();
        let lease = Lease::acquire(self.inner.clone());
        StatusStream {
            initial: Some(self.inner.source.current()),
            last: None,
            rx: BroadcastStream::new(rx),
            inner: self.inner.clone(),
            _lease: lease,
        }
    }

    /// Number of live status streams.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.lease).subscribers
    }
}

/// Holds the source registration while at least one stream is alive.
struct Lease {
    inner: Arc<MonitorInner>,
}

impl Lease {
    fn acquire(inner: Arc<MonitorInner>) -> Self {
        let mut state = lock(&inner.lease);
        state.subscribers += 1;
        if state.subscribers == 1 {
            let tx = inner.tx.clone();
            let sink: StatusSink = Arc::new(move |status| {
                let _ = tx.send(status);
            });
            state.registration = Some(inner.source.register(sink));
            debug!("Reachability source registered");
        }
        drop(state);
        Lease { inner }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let released = {
            let mut state = lock(&self.inner.lease);
            state.subscribers = state.subscribers.saturating_sub(1);
            if state.subscribers == 0 {
                state.registration.take()
            } else {
                None
            }
        };
        if released.is_some() {
            debug!("Reachability source released");
        }
        drop(released);
    }
}

/// Deduplicated status stream. Dropping it releases its share of the registration.
pub struct StatusStream {
    initial: Option<NetworkStatus>,
    last: Option<NetworkStatus>,
    rx: BroadcastStream<NetworkStatus>,
    inner: Arc<MonitorInner>,
    _lease: Lease,
}

impl StatusStream {
    fn accept(&mut self, status: NetworkStatus) -> Option<NetworkStatus> {
        if self.last == Some(status) {
            None
        } else {
            self.last = Some(status);
            Some(status)
        }
    }
}

impl Stream for StatusStream {
    type Item = NetworkStatus;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(status) = this.initial.take() {
            if let Some(status) = this.accept(status) {
                return Poll::Ready(Some(status));
            }
        }

        loop {
            match Pin::new(&mut this.rx).poll_next(cx) {
                Poll::Ready(Some(Ok(status))) => {
                    if let Some(status) = this.accept(status) {
                        return Poll::Ready(Some(status));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    debug!(skipped, "Status stream lagged, resampling source");
                    let status = this.inner.source.current();
                    if let Some(status) = this.accept(status) {
                        return Poll::Ready(Some(status));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// =============================================================================
// TCP Probe Source
// =============================================================================

/// Periodically opens a TCP connection to a known address.
///
/// Starts optimistic (`Connected`) so the first fetch is not deferred
/// before the first probe completes.
pub struct ProbeReachability {
    addr: String,
    interval: Duration,
    timeout: Duration,
    reachable: Arc<AtomicBool>,
}

impl ProbeReachability {
    pub fn new(addr: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        ProbeReachability {
            addr: addr.into(),
            interval,
            timeout,
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    async fn probe(addr: &str, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

impl ReachabilitySource for ProbeReachability {
    fn current(&self) -> NetworkStatus {
        NetworkStatus::from(self.reachable.load(Ordering::SeqCst))
    }

    fn register(&self, sink: StatusSink) -> Registration {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime, reachability probe not started");
                return Registration::noop();
            }
        };

        let addr = self.addr.clone();
        let interval = self.interval;
        let timeout = self.timeout;
        let reachable = self.reachable.clone();

        info!(%addr, ?interval, "Starting reachability probe");
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let up = Self::probe(&addr, timeout).await;
                let was = reachable.swap(up, Ordering::SeqCst);
                if was != up {
                    info!(%addr, reachable = up, "Reachability changed");
                    sink(NetworkStatus::from(up));
                }
            }
        });

        Registration::new(move || task.abort())
    }
}

// =============================================================================
// Manual Source
// =============================================================================

struct ManualState {
    status: NetworkStatus,
    sinks: HashMap<u64, StatusSink>,
    next_id: u64,
}

/// Source driven by the embedder (or tests) through [`ManualReachability::set`].
#[derive(Clone)]
pub struct ManualReachability {
    state: Arc<Mutex<ManualState>>,
}

impl ManualReachability {
    pub fn new(initial: NetworkStatus) -> Self {
        ManualReachability {
            state: Arc::new(Mutex::new(ManualState {
                status: initial,
                sinks: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Records a new status and notifies every registered sink.
    pub fn set(&self, status: NetworkStatus) {
        let sinks: Vec<StatusSink> = {
            let mut state = lock(&self.state);
            state.status = status;
            state.sinks.values().cloned().collect()
        };
        for sink in sinks {
            sink(status);
        }
    }

    /// Number of live registrations.
    pub fn registration_count(&self) -> usize {
        lock(&self.state).sinks.len()
    }
}

impl ReachabilitySource for ManualReachability {
    fn current(&self) -> NetworkStatus {
        lock(&self.state).status
    }

    fn register(&self, sink: StatusSink) -> Registration {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.sinks.insert(id, sink);
            id
        };

        let state = self.state.clone();
        Registration::new(move || {
            lock(&state).sinks.remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn next(stream: &mut StatusStream) -> NetworkStatus {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("status within 1s")
            .expect("stream open")
    }

    #[tokio::test]
    async fn test_stream_starts_with_current_status() {
        let source = ManualReachability::new(NetworkStatus::Disconnected);
        let monitor = ConnectivityMonitor::new(Arc::new(source.clone()));

        assert!(!monitor.is_connected());
        let mut stream = monitor.status_stream();
        assert_eq!(next(&mut stream).await, NetworkStatus::Disconnected);

        source.set(NetworkStatus::Connected);
        assert_eq!(next(&mut stream).await, NetworkStatus::Connected);
        assert!(monitor.is_connected());
    }

    #[tokio::test]
    async fn test_duplicates_suppressed() {
        let source = ManualReachability::new(NetworkStatus::Connected);
        let monitor = ConnectivityMonitor::new(Arc::new(source.clone()));
        let mut stream = monitor.status_stream();
        assert_eq!(next(&mut stream).await, NetworkStatus::Connected);

        source.set(NetworkStatus::Connected);
        source.set(NetworkStatus::Disconnected);
        source.set(NetworkStatus::Disconnected);
        source.set(NetworkStatus::Connected);

        assert_eq!(next(&mut stream).await, NetworkStatus::Disconnected);
        assert_eq!(next(&mut stream).await, NetworkStatus::Connected);
    }

    #[tokio::test]
    async fn test_registration_follows_subscribers() {
        let source = ManualReachability::new(NetworkStatus::Connected);
        let monitor = ConnectivityMonitor::new(Arc::new(source.clone()));
        assert_eq!(source.registration_count(), 0);

        let first = monitor.status_stream();
        let second = monitor.status_stream();
        assert_eq!(source.registration_count(), 1);
        assert_eq!(monitor.subscriber_count(), 2);

        drop(first);
        assert_eq!(source.registration_count(), 1);

        drop(second);
        assert_eq!(source.registration_count(), 0);
        assert_eq!(monitor.subscriber_count(), 0);

        // Re-subscribing registers again
        let _third = monitor.status_stream();
        assert_eq!(source.registration_count(), 1);
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable_address() {
        // Bind then drop a listener to get a local port with nothing behind it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let source = ProbeReachability::new(addr, Duration::from_millis(20), Duration::from_millis(200));
        assert_eq!(source.current(), NetworkStatus::Connected);

        let monitor = ConnectivityMonitor::new(Arc::new(source));
        let mut stream = monitor.status_stream();
        assert_eq!(next(&mut stream).await, NetworkStatus::Connected);
        assert_eq!(next(&mut stream).await, NetworkStatus::Disconnected);
        assert!(!monitor.is_connected());
    }

    #[tokio::test]
    async fn test_probe_reaches_listening_address() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let connected = ProbeReachability::probe(&addr, Duration::from_millis(500)).await;
        assert!(connected);
    }
}
