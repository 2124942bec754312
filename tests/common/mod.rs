//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};

use live_region_annotator::application::WatcherEvent;
use live_region_annotator::domain::TitleVariants;
use live_region_annotator::{CatalogClient, CatalogRecord, LookupFailure};

/// Catalog with a fixed title list; lookups can be held until released
pub struct ScriptedCatalog {
    records: HashMap<String, CatalogRecord>,
    gate: Option<Semaphore>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedCatalog {
    pub fn new(titles: &[(&str, u64)]) -> Self {
        let records = titles
            .iter()
            .map(|(title, id)| ((*title).to_string(), record(*id, title)))
            .collect();
        Self {
            records,
            gate: None,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Every lookup waits for `release`
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1000);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogClient for ScriptedCatalog {
    async fn search(&self, query: &str) -> Result<CatalogRecord, LookupFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.records
            .get(query)
            .cloned()
            .ok_or_else(|| LookupFailure::no_match(query))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn record(id: u64, title: &str) -> CatalogRecord {
    CatalogRecord::new(
        id,
        TitleVariants {
            english: Some(title.to_string()),
            ..TitleVariants::default()
        },
        format!("https://anilist.co/anime/{}", id),
    )
}

/// Next event accepted by `pick`, failing the test after five seconds
pub async fn wait_for<T>(
    events: &mut broadcast::Receiver<WatcherEvent>,
    mut pick: impl FnMut(WatcherEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for watcher event")
}

/// Yield to local tasks until `done` holds, failing the test after five seconds
pub async fn settle_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never held");
}

/// Nothing more arrives on the event channel for a short while
pub async fn assert_quiet(events: &mut broadcast::Receiver<WatcherEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)),
        "unexpected watcher event"
    );
}
