//! # snippet-watch
//!
//! Watches one snippet project and prints each outcome as it arrives.
//! Push channel status changes are logged.
//!
//! ```text
//! snippet-watch [CONFIG]
//!
//!   CONFIG   path to an sdk.toml (defaults to the platform config dir)
//!
//!   SNIPPET_ORGANIZATION_ID / SNIPPET_PROJECT_ID / SNIPPET_SHARED_ID /
//!   SNIPPET_API_KEY override the project section.
//!   RUST_LOG overrides the log filter.
//! ```

use std::path::PathBuf;

use futures_util::StreamExt;
use snippet_core::{Outcome, ProjectSnapshot};
use snippet_sync::{PushStatus, SdkConfig, SnippetEngine};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Property used to order snippets for display.
const ORDER_PROP: &str = "order";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = SdkConfig::load(config_path)?;
    let engine = SnippetEngine::from_config(&config)?;

    info!(
        project = %engine.configuration(),
        device = %config.device_id(),
        "Watching project"
    );

    let mut outcomes = engine
        .subscribe()
        .map_data(|snapshot| snapshot.sorted_by_prop(ORDER_PROP));

    let mut push_status = engine.push_status_changes();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            next = outcomes.next() => match next {
                Some(outcome) => print_outcome(&outcome),
                None => break,
            },
            status = next_push_status(&mut push_status) => match status {
                Some(status) if status.is_live() => info!(%status, "Live updates on"),
                Some(status) => warn!(%status, "Live updates paused"),
                None => push_status = None,
            },
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    drop(outcomes);
    engine.shutdown().await?;
    Ok(())
}

/// Initializes the tracing subscriber for logging.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,snippet_sync=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn print_outcome(outcome: &Outcome<ProjectSnapshot>) {
    let phase = outcome.phase();
    match outcome.cause() {
        Some(cause) => println!("[{}] {}", phase, cause),
        None => println!("[{}]", phase),
    }

    let Some(snapshot) = outcome.data() else {
        return;
    };
    for snippet in snapshot.visible() {
        match snippet.prop(ORDER_PROP) {
            Some(order) => println!("  {:>4}  {}", order, snippet.id),
            None => println!("     -  {}", snippet.id),
        }
    }
    if let Some(ref shared) = snapshot.shared_snippet_id {
        println!("  shared snippet: {}", shared);
    }
    println!("  fetched at {}", snapshot.fetched_at);
}

/// Next push status transition; pends forever without a push channel.
async fn next_push_status(rx: &mut Option<watch::Receiver<PushStatus>>) -> Option<PushStatus> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
