use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use snippet_core::{
    Configuration, FailureKind, NetworkStatus, Outcome, ProjectSnapshot, Snippet, SyncPhase,
};
use snippet_sync::{
    ConnectivityMonitor, ErrorReporter, ManualReachability, PushEvent, PushHandle, PushStatus,
    SnapshotCache, SnapshotLoader, SnippetEngine, SyncError, SyncResult,
};
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────

/// Loader that counts calls, optionally sleeps, and replays scripted results
/// before falling back to a single `hero` snippet.
struct ScriptedLoader {
    calls: AtomicUsize,
    delay: Duration,
    script: Mutex<VecDeque<SyncResult<ProjectSnapshot>>>,
}

impl ScriptedLoader {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(ScriptedLoader {
            calls: AtomicUsize::new(0),
            delay,
            script: Mutex::new(VecDeque::new()),
        })
    }

    fn script(self: &Arc<Self>, result: SyncResult<ProjectSnapshot>) -> Arc<Self> {
        self.script.lock().unwrap().push_back(result);
        self.clone()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotLoader for ScriptedLoader {
    async fn load(&self) -> SyncResult<ProjectSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(hero()))
    }
}

#[derive(Default)]
struct RecordingReporter {
    reported: Mutex<Vec<String>>,
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &SyncError) {
        self.reported.lock().unwrap().push(error.to_string());
    }
}

fn hero() -> ProjectSnapshot {
    ProjectSnapshot::new(vec![Snippet::new("hero")], Utc::now())
}

fn ids(outcome: &Outcome<ProjectSnapshot>) -> Option<Vec<String>> {
    outcome
        .data()
        .map(|snapshot| snapshot.snippets.iter().map(|s| s.id.clone()).collect())
}

fn direct() -> Configuration {
    Configuration::direct("acme", "site1", "k")
}

fn cache(dir: &TempDir) -> SnapshotCache {
    SnapshotCache::new(dir.path(), "default")
}

async fn next<S>(stream: &mut S) -> Outcome<ProjectSnapshot>
where
    S: Stream<Item = Outcome<ProjectSnapshot>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for outcome")
        .expect("outcome stream ended")
}

async fn assert_quiet<S>(stream: &mut S)
where
    S: Stream<Item = Outcome<ProjectSnapshot>> + Unpin,
{
    let extra = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
    assert!(extra.is_err(), "unexpected outcome: {:?}", extra);
}

// ── Start-up ────────────────────────────────────────────────────

#[tokio::test]
async fn empty_cache_yields_progress_then_success_and_writes_cache() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ScriptedLoader::new();
    let engine = SnippetEngine::builder(direct())
        .loader(loader.clone())
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();

    let first = next(&mut outcomes).await;
    assert_eq!(first, Outcome::Progress { data: None });

    let second = next(&mut outcomes).await;
    assert!(second.is_success());
    assert_eq!(ids(&second), Some(vec!["hero".to_string()]));

    let written = std::fs::read_to_string(cache(&dir).entry_path("site1")).unwrap();
    assert_eq!(written, r#"[{"id":"hero"}]"#);
    assert_eq!(loader.calls(), 1);
    assert_eq!(engine.phase(), SyncPhase::Fresh);
}

#[tokio::test]
async fn cached_snapshot_is_served_before_the_fetch() {
    let dir = tempfile::tempdir().unwrap();
    cache(&dir).save("site1", &[Snippet::new("old")]).await;

    let engine = SnippetEngine::builder(direct())
        .loader(ScriptedLoader::new())
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();

    let first = next(&mut outcomes).await;
    assert!(first.is_progress());
    assert_eq!(ids(&first), Some(vec!["old".to_string()]));

    let second = next(&mut outcomes).await;
    assert_eq!(second.phase(), SyncPhase::Fresh);
    assert_eq!(ids(&second), Some(vec!["hero".to_string()]));
    assert_eq!(cache(&dir).load("site1").await, Some(vec![Snippet::new("hero")]));
}

#[tokio::test]
async fn corrupt_cache_is_treated_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = cache(&dir);
    std::fs::create_dir_all(store.root()).unwrap();
    std::fs::write(store.entry_path("site1"), "{ not json").unwrap();

    let engine = SnippetEngine::builder(direct())
        .loader(ScriptedLoader::new())
        .cache(store)
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert_eq!(next(&mut outcomes).await, Outcome::Progress { data: None });
    assert!(next(&mut outcomes).await.is_success());
}

#[tokio::test]
async fn shared_link_cache_carries_shared_id() {
    let dir = tempfile::tempdir().unwrap();
    cache(&dir).save("xyz", &[Snippet::new("hero")]).await;

    let engine = SnippetEngine::builder(Configuration::shared_link("xyz", "k"))
        .loader(ScriptedLoader::with_delay(Duration::from_millis(100)))
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    let first = next(&mut outcomes).await;
    assert_eq!(
        first.data().and_then(|s| s.shared_snippet_id.as_deref()),
        Some("xyz")
    );
}

#[tokio::test]
async fn shared_link_restart_keeps_resolved_snippet_id() {
    let dir = tempfile::tempdir().unwrap();
    let resolved = ProjectSnapshot::new(vec![Snippet::new("hero")], Utc::now())
        .with_shared_snippet_id("hero");
    let engine = SnippetEngine::builder(Configuration::shared_link("xyz", "k"))
        .loader(ScriptedLoader::new().script(Ok(resolved)))
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert!(next(&mut outcomes).await.is_progress());
    let fresh = next(&mut outcomes).await;
    assert_eq!(fresh.data().and_then(|s| s.shared_snippet_id.as_deref()), Some("hero"));
    drop(outcomes);

    let restarted = SnippetEngine::builder(Configuration::shared_link("xyz", "k"))
        .loader(ScriptedLoader::with_delay(Duration::from_millis(100)))
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = restarted.subscribe();
    let cached = next(&mut outcomes).await;
    assert!(cached.is_progress());
    assert_eq!(cached.data().and_then(|s| s.shared_snippet_id.as_deref()), Some("hero"));
}

// ── Triggers ────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_burst_during_load_coalesces_into_one_trailing_load() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ScriptedLoader::with_delay(Duration::from_millis(200));
    let engine = SnippetEngine::builder(direct())
        .loader(loader.clone())
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert!(next(&mut outcomes).await.is_progress());

    engine.refresh();
    engine.refresh();
    engine.refresh();

    assert!(next(&mut outcomes).await.is_success());
    assert!(next(&mut outcomes).await.is_progress());
    assert!(next(&mut outcomes).await.is_success());
    assert_quiet(&mut outcomes).await;

    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn reconnect_triggers_exactly_one_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let reachability = ManualReachability::new(NetworkStatus::Connected);
    let loader = ScriptedLoader::new();
    let engine = SnippetEngine::builder(direct())
        .loader(loader.clone())
        .cache(cache(&dir))
        .connectivity(ConnectivityMonitor::new(Arc::new(reachability.clone())))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert!(next(&mut outcomes).await.is_progress());
    assert!(next(&mut outcomes).await.is_success());

    reachability.set(NetworkStatus::Disconnected);
    reachability.set(NetworkStatus::Connected);

    assert!(next(&mut outcomes).await.is_progress());
    assert!(next(&mut outcomes).await.is_success());
    assert_quiet(&mut outcomes).await;

    assert_eq!(loader.calls(), 2);
}

#[tokio::test]
async fn offline_start_reports_one_error_until_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    cache(&dir).save("site1", &[Snippet::new("old")]).await;

    let reachability = ManualReachability::new(NetworkStatus::Disconnected);
    let loader = ScriptedLoader::new();
    let engine = SnippetEngine::builder(direct())
        .loader(loader.clone())
        .cache(cache(&dir))
        .connectivity(ConnectivityMonitor::new(Arc::new(reachability.clone())))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    let first = next(&mut outcomes).await;
    assert!(first.is_error());
    assert_eq!(ids(&first), Some(vec!["old".to_string()]));
    let cause = first.cause().unwrap();
    assert_eq!(cause.kind, FailureKind::Offline);
    assert!(cause.retryable);

    engine.refresh();
    engine.refresh();
    assert_quiet(&mut outcomes).await;
    assert_eq!(loader.calls(), 0);

    reachability.set(NetworkStatus::Connected);
    assert!(next(&mut outcomes).await.is_progress());
    let fresh = next(&mut outcomes).await;
    assert!(fresh.is_success());
    assert_eq!(ids(&fresh), Some(vec!["hero".to_string()]));
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn push_event_triggers_refetch() {
    let dir = tempfile::tempdir().unwrap();
    let push = PushHandle::new();
    let loader = ScriptedLoader::new();
    let engine = SnippetEngine::builder(direct())
        .loader(loader.clone())
        .cache(cache(&dir))
        .push(push.clone())
        .build()
        .unwrap();
    let status = engine.push_status_changes().expect("push configured");
    assert_eq!(*status.borrow(), PushStatus::Stopped);

    let mut outcomes = engine.subscribe();
    assert!(next(&mut outcomes).await.is_progress());
    assert!(next(&mut outcomes).await.is_success());

    push.publish(PushEvent::SnippetsUpdated {
        ids: vec!["hero".to_string()],
    });

    assert!(next(&mut outcomes).await.is_progress());
    assert!(next(&mut outcomes).await.is_success());
    assert_eq!(loader.calls(), 2);
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test]
async fn failed_refresh_keeps_last_known_data() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ScriptedLoader::new()
        .script(Ok(hero()))
        .script(Err(SyncError::Http {
            status: 500,
            message: "boom".into(),
        }));
    let engine = SnippetEngine::builder(direct())
        .loader(loader)
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert!(next(&mut outcomes).await.is_progress());
    assert!(next(&mut outcomes).await.is_success());

    engine.refresh();
    let progress = next(&mut outcomes).await;
    assert_eq!(ids(&progress), Some(vec!["hero".to_string()]));

    let failed = next(&mut outcomes).await;
    assert_eq!(failed.phase(), SyncPhase::Stale);
    assert_eq!(ids(&failed), Some(vec!["hero".to_string()]));
    let cause = failed.cause().unwrap();
    assert_eq!(cause.kind, FailureKind::Server);
    assert_eq!(cause.status, Some(500));
    assert!(cause.retryable);
}

#[tokio::test]
async fn unexpected_errors_reach_the_reporter() {
    let dir = tempfile::tempdir().unwrap();
    let reporter = Arc::new(RecordingReporter::default());
    let loader = ScriptedLoader::new()
        .script(Err(SyncError::MalformedResponse("missing field `snippets`".into())))
        .script(Err(SyncError::ConnectionFailed("refused".into())));
    let engine = SnippetEngine::builder(direct())
        .loader(loader)
        .cache(cache(&dir))
        .reporter(reporter.clone())
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert!(next(&mut outcomes).await.is_progress());
    let malformed = next(&mut outcomes).await;
    assert_eq!(malformed.cause().unwrap().kind, FailureKind::MalformedResponse);
    assert_eq!(malformed.phase(), SyncPhase::Failed);

    engine.refresh();
    assert!(next(&mut outcomes).await.is_progress());
    let network = next(&mut outcomes).await;
    assert_eq!(network.cause().unwrap().kind, FailureKind::Network);

    let reported = reporter.reported.lock().unwrap().clone();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("snippets"));
}

// ── Subscription lifecycle ──────────────────────────────────────

#[tokio::test]
async fn late_subscriber_receives_latest_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ScriptedLoader::new();
    let engine = SnippetEngine::builder(direct())
        .loader(loader.clone())
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut first = engine.subscribe();
    assert!(next(&mut first).await.is_progress());
    assert!(next(&mut first).await.is_success());

    let mut late = engine.subscribe();
    let replayed = next(&mut late).await;
    assert!(replayed.is_success());
    assert_eq!(ids(&replayed), Some(vec!["hero".to_string()]));
    assert_quiet(&mut late).await;
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn last_unsubscribe_releases_connectivity_and_restarts_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let reachability = ManualReachability::new(NetworkStatus::Connected);
    let engine = SnippetEngine::builder(direct())
        .loader(ScriptedLoader::new())
        .cache(cache(&dir))
        .connectivity(ConnectivityMonitor::new(Arc::new(reachability.clone())))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert!(next(&mut outcomes).await.is_progress());
    assert!(next(&mut outcomes).await.is_success());
    assert_eq!(reachability.registration_count(), 1);

    drop(outcomes);
    assert_eq!(engine.phase(), SyncPhase::Idle);

    let released = tokio::time::timeout(Duration::from_secs(2), async {
        while reachability.registration_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "registration was not released");

    let mut again = engine.subscribe();
    let first = next(&mut again).await;
    assert!(first.is_progress());
    assert_eq!(ids(&first), Some(vec!["hero".to_string()]));
}

#[tokio::test]
async fn unsubscribe_mid_fetch_discards_the_late_result() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ScriptedLoader::with_delay(Duration::from_millis(200));
    let engine = SnippetEngine::builder(direct())
        .loader(loader.clone())
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert_eq!(next(&mut outcomes).await, Outcome::Progress { data: None });
    drop(outcomes);
    assert_eq!(engine.phase(), SyncPhase::Idle);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(loader.calls(), 1);
    assert!(cache(&dir).load("site1").await.is_none());
    assert!(!cache(&dir).entry_path("site1").exists());
}

#[tokio::test]
async fn one_of_two_subscribers_leaving_keeps_session() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SnippetEngine::builder(direct())
        .loader(ScriptedLoader::new())
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut a = engine.subscribe();
    let mut b = engine.subscribe();
    assert!(next(&mut a).await.is_progress());
    assert!(next(&mut a).await.is_success());

    drop(a);
    assert_ne!(engine.phase(), SyncPhase::Idle);

    assert!(next(&mut b).await.is_progress());
    assert!(next(&mut b).await.is_success());

    engine.refresh();
    let refreshing = next(&mut b).await;
    assert!(refreshing.is_progress());
    assert_eq!(ids(&refreshing), Some(vec!["hero".to_string()]));
    assert!(next(&mut b).await.is_success());
}

#[tokio::test]
async fn map_data_projects_payload_and_keeps_tags() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SnippetEngine::builder(direct())
        .loader(ScriptedLoader::new())
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut counts = engine.subscribe().map_data(|snapshot| snapshot.len());

    let first = tokio::time::timeout(Duration::from_secs(2), counts.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, Outcome::Progress { data: None });

    let second = tokio::time::timeout(Duration::from_secs(2), counts.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, Outcome::Success { data: 1 });
}

#[tokio::test]
async fn shutdown_ends_streams_and_refuses_new_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = SnippetEngine::builder(direct())
        .loader(ScriptedLoader::new())
        .cache(cache(&dir))
        .build()
        .unwrap();

    let mut outcomes = engine.subscribe();
    assert!(next(&mut outcomes).await.is_progress());
    assert!(next(&mut outcomes).await.is_success());

    engine.shutdown().await.unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(2), outcomes.next())
        .await
        .unwrap();
    assert!(ended.is_none());

    let mut after = engine.subscribe();
    assert!(after.next().await.is_none());
    assert_eq!(engine.phase(), SyncPhase::Idle);
}
