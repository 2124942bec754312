//! Annotate a saved page once and print the annotated container
//!
//! Usage: `live-region-annotator <url> <html-file> [config-file]`

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::LocalSet;
use tracing::{info, warn};

use live_region_annotator::application::{MetadataResolver, RouteDispatcher, WatcherEvent};
use live_region_annotator::infrastructure::logging::{init_logging_with_config, log_system_info};
use live_region_annotator::infrastructure::{AniListClient, ConfigManager, MemoryDocument};

/// Upper bound on waiting for the first applied pass, on top of the request timeout
const SETTLE_GRACE_SECONDS: u64 = 5;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (url, html_path, config_path) = match args.as_slice() {
        [url, html] => (url.clone(), html.clone(), None),
        [url, html, config] => (url.clone(), html.clone(), Some(config.clone())),
        _ => bail!("usage: live-region-annotator <url> <html-file> [config-file]"),
    };

    let manager = match &config_path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(),
    };
    let config = manager.load_config().context("failed to load configuration")?;
    init_logging_with_config(config.logging.clone())?;
    log_system_info();

    let markup = std::fs::read_to_string(&html_path).with_context(|| format!("failed to read {}", html_path))?;
    let doc = MemoryDocument::parse(&markup);

    let client = AniListClient::with_config(config.catalog.clone())?;
    let resolver = Arc::new(MetadataResolver::new(Arc::new(client)));
    let wait = Duration::from_secs(config.catalog.request_timeout_seconds + SETTLE_GRACE_SECONDS);

    let local = LocalSet::new();
    local
        .run_until(async move {
            let mut dispatcher = RouteDispatcher::from_config(doc.clone(), &config, resolver)?;
            let Some(handle) = dispatcher.navigate(&url).await? else {
                warn!("No route matches {}; nothing to annotate", url);
                return Ok(());
            };
            let mut events = handle.subscribe();

            let settled = tokio::select! {
                outcome = tokio::time::timeout(wait, async {
                    loop {
                        match events.recv().await {
                            Ok(WatcherEvent::PassApplied { report, .. }) => return Some(report),
                            Ok(_) | Err(RecvError::Lagged(_)) => {}
                            Err(RecvError::Closed) => return None,
                        }
                    }
                }) => outcome.ok().flatten(),
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    None
                }
            };

            match (settled, handle.container().and_then(|node| doc.outer_html(node))) {
                (Some(report), Some(container)) => {
                    info!("✅ Pass applied: {:?}", report);
                    println!("{}", container);
                }
                (None, Some(container)) => {
                    warn!("No pass applied within {:?}", wait);
                    println!("{}", container);
                }
                (_, None) => warn!("The container never appeared in {}", html_path),
            }

            dispatcher.shutdown().await;
            Ok::<(), anyhow::Error>(())
        })
        .await
}
