//! End-to-end reconciliation behaviour of a watcher over a live document

mod common;

use std::sync::Arc;

use scraper::Selector;
use tokio::task::LocalSet;

use common::{assert_quiet, settle_until, wait_for, ScriptedCatalog};
use live_region_annotator::application::{
    EntryExtractor, ExtractorProfile, LinkAnnotationFactory, MetadataResolver, ReconcileReport,
    SelectorAnchorPolicy, WatchProfile, Watcher, WatcherEvent,
};
use live_region_annotator::infrastructure::config::{AnchorPosition, AnchorScope, PassOrdering, WatcherConfig};
use live_region_annotator::{LiveDocument, MemoryDocument};

const EMPTY_PAGE: &str = r#"<html><body><main id="app"></main><aside id="ads"></aside></body></html>"#;

fn card(title: &str) -> String {
    format!(r#"<li class="card"><h4>{}</h4><div class="footer"></div></li>"#, title)
}

fn grid(titles: &[&str]) -> String {
    let cards: String = titles.iter().map(|t| card(t)).collect();
    format!(r#"<ul class="grid">{}</ul>"#, cards)
}

fn profile() -> WatchProfile<MemoryDocument> {
    WatchProfile {
        name: "grid".to_string(),
        container: Selector::parse(".grid").unwrap(),
        extractor: EntryExtractor::new(ExtractorProfile::from_selectors(Some(".card"), Some("h4")).unwrap()),
        anchors: Arc::new(SelectorAnchorPolicy::new(
            Some(Selector::parse(".footer").unwrap()),
            AnchorScope::Entry,
            AnchorPosition::Append,
            0,
        )),
        factory: Arc::new(LinkAnnotationFactory::default()),
    }
}

fn applied(event: WatcherEvent) -> Option<(usize, usize, ReconcileReport)> {
    match event {
        WatcherEvent::PassApplied {
            entries,
            failed_lookups,
            report,
            ..
        } => Some((entries, failed_lookups, report)),
        _ => None,
    }
}

fn sequential() -> WatcherConfig {
    WatcherConfig::default()
}

#[tokio::test]
async fn container_inserted_later_gets_one_annotation_per_entry() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("Title X", 10), ("Title Y", 20)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();

            let app = doc.query("#app").unwrap();
            doc.append_html(app, &grid(&["Title X", "Title Y"]));

            let (entries, failed, report) = wait_for(&mut events, applied).await;
            assert_eq!((entries, failed, report.mounted), (2, 0, 2));

            let cards = doc.select_within(doc.query(".grid").unwrap(), &Selector::parse(".card").unwrap());
            let x = doc.outer_html(handle.annotation_for(cards[0]).unwrap()).unwrap();
            let y = doc.outer_html(handle.annotation_for(cards[1]).unwrap()).unwrap();
            assert!(x.contains(r#"href="https://anilist.co/anime/10""#));
            assert!(y.contains(r#"href="https://anilist.co/anime/20""#));
            assert_eq!(doc.count(".footer > a.catalog-annotation"), 2);
        })
        .await;
}

#[tokio::test]
async fn removed_entry_loses_its_annotation_and_others_stay() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1), ("B", 2)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            doc.append_html(doc.query("#app").unwrap(), &grid(&["A", "B"]));

            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();
            wait_for(&mut events, applied).await;

            let grid_node = doc.query(".grid").unwrap();
            let cards = doc.children(grid_node);
            let a_annotation = handle.annotation_for(cards[0]).unwrap();

            doc.remove(cards[1]);
            let (entries, _, report) = wait_for(&mut events, applied).await;
            assert_eq!(entries, 1);
            assert_eq!((report.retained, report.unmounted), (1, 1));
            assert_eq!(handle.mounted_count(), 1);
            assert_eq!(handle.annotation_for(cards[0]), Some(a_annotation));
            assert!(handle.annotation_for(cards[1]).is_none());
            assert_eq!(doc.count("a.catalog-annotation"), 1);
            assert_eq!(catalog.calls(), 2);
        })
        .await;
}

#[tokio::test]
async fn unknown_title_gets_no_annotation() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("Known Show", 3)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            let handle = Watcher::spawn(doc.clone(), profile(), resolver.clone(), sequential()).unwrap();
            let mut events = handle.subscribe();

            doc.append_html(doc.query("#app").unwrap(), &grid(&["Known Show", "Unknown Show"]));

            let (entries, failed, report) = wait_for(&mut events, applied).await;
            assert_eq!((entries, failed, report.mounted), (2, 1, 1));
            assert_eq!(doc.count("a.catalog-annotation"), 1);
            assert!(resolver.cache().get("Unknown Show").is_none());
            assert!(handle.is_tracking());
        })
        .await;
}

#[tokio::test]
async fn container_lost_during_lookups_stays_empty_after_late_completions() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1), ("B", 2)]).gated());
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            let handle = Watcher::spawn(doc.clone(), profile(), resolver.clone(), sequential()).unwrap();
            let mut events = handle.subscribe();

            doc.append_html(doc.query("#app").unwrap(), &grid(&["A", "B"]));
            settle_until(|| catalog.calls() == 2).await;

            doc.remove(doc.query(".grid").unwrap());
            let removed = wait_for(&mut events, |e| match e {
                WatcherEvent::TornDown { removed, .. } => Some(removed),
                _ => None,
            })
            .await;
            assert_eq!(removed, 0);
            assert!(!handle.is_tracking());

            catalog.release();
            wait_for(&mut events, |e| matches!(e, WatcherEvent::PassDiscarded { .. }).then_some(())).await;

            assert_eq!(handle.mounted_count(), 0);
            assert_eq!(doc.count("a.catalog-annotation"), 0);
            // The late results are still cached for the next appearance
            assert_eq!(resolver.cache().len(), 2);
        })
        .await;
}

#[tokio::test]
async fn container_removal_tears_down_mounted_annotations() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1), ("B", 2)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            doc.append_html(doc.query("#app").unwrap(), &grid(&["A", "B"]));
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();
            wait_for(&mut events, applied).await;

            let grid_node = doc.query(".grid").unwrap();
            doc.remove(grid_node);
            let removed = wait_for(&mut events, |e| match e {
                WatcherEvent::TornDown { removed, .. } => Some(removed),
                _ => None,
            })
            .await;
            assert_eq!(removed, 2);
            assert_eq!(handle.mounted_count(), 0);
            assert_eq!(doc.select_within(grid_node, &Selector::parse("a.catalog-annotation").unwrap()).len(), 0);

            // A later reappearance starts over and is served from the cache
            doc.append_html(doc.query("#app").unwrap(), &grid(&["A", "B"]));
            let (_, _, report) = wait_for(&mut events, applied).await;
            assert_eq!(report.mounted, 2);
            assert_eq!(catalog.calls(), 2);
        })
        .await;
}

#[tokio::test]
async fn replaced_container_is_tracked_afresh() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1), ("B", 2), ("C", 3)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            let app = doc.query("#app").unwrap();
            doc.append_html(app, &grid(&["A", "B"]));
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();
            wait_for(&mut events, applied).await;
            let first = handle.container().unwrap();

            doc.replace_children(app, &grid(&["C"]));

            let generation = wait_for(&mut events, |e| match e {
                WatcherEvent::Tracking { generation } => Some(generation),
                _ => None,
            })
            .await;
            assert!(generation > 1);
            let (entries, _, report) = wait_for(&mut events, applied).await;
            assert_eq!((entries, report.mounted), (1, 1));
            assert_ne!(handle.container(), Some(first));
            assert_eq!(doc.count("a.catalog-annotation"), 1);
        })
        .await;
}

#[tokio::test]
async fn unrelated_mutations_are_ignored() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            doc.append_html(doc.query("#app").unwrap(), &grid(&["A"]));
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();
            wait_for(&mut events, applied).await;

            let ads = doc.query("#ads").unwrap();
            doc.append_html(ads, "<div>banner</div>");
            doc.set_text(ads, "another banner");
            assert_quiet(&mut events).await;
            assert_eq!(handle.mounted_count(), 1);
        })
        .await;
}

#[tokio::test]
async fn host_detached_annotation_is_mounted_again() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            doc.append_html(doc.query("#app").unwrap(), &grid(&["A"]));
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();
            wait_for(&mut events, applied).await;

            let card_node = doc.query(".card").unwrap();
            let annotation = handle.annotation_for(card_node).unwrap();
            doc.remove(annotation);

            let (_, _, report) = wait_for(&mut events, applied).await;
            assert_eq!(report.mounted, 1);
            assert_ne!(handle.annotation_for(card_node), Some(annotation));
            assert_eq!(doc.count("a.catalog-annotation"), 1);
        })
        .await;
}

#[tokio::test]
async fn retitled_entry_links_the_new_record() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1), ("B", 2)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            doc.append_html(doc.query("#app").unwrap(), &grid(&["A"]));
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();
            wait_for(&mut events, applied).await;

            let card_node = doc.query(".card").unwrap();
            let before = handle.annotation_for(card_node).unwrap();
            doc.set_text(doc.query(".card h4").unwrap(), "B");

            let (_, _, report) = wait_for(&mut events, applied).await;
            assert_eq!((report.mounted, report.unmounted, report.retained), (1, 1, 0));
            let after = handle.annotation_for(card_node).unwrap();
            assert_ne!(after, before);
            assert!(!doc.is_connected(before));
            let markup = doc.outer_html(after).unwrap();
            assert!(markup.contains(r#"href="https://anilist.co/anime/2""#));
            assert_eq!(doc.count("a.catalog-annotation"), 1);
            assert_quiet(&mut events).await;
        })
        .await;
}

#[tokio::test]
async fn identical_titles_share_one_lookup() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1)]));
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            let handle = Watcher::spawn(doc.clone(), profile(), resolver.clone(), sequential()).unwrap();
            let mut events = handle.subscribe();

            doc.append_html(doc.query("#app").unwrap(), &grid(&["A", " A ", "A"]));
            let (_, _, report) = wait_for(&mut events, applied).await;
            assert_eq!(report.mounted, 3);
            assert_eq!(catalog.calls(), 1);
            let stats = resolver.cache().stats();
            assert_eq!(stats.hits + stats.coalesced, 2);
        })
        .await;
}

#[tokio::test]
async fn sequential_passes_coalesce_mutations_seen_mid_pass() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1), ("B", 2), ("C", 3)]).gated());
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();

            doc.append_html(doc.query("#app").unwrap(), &grid(&["A"]));
            settle_until(|| catalog.calls() == 1).await;

            let grid_node = doc.query(".grid").unwrap();
            doc.append_html(grid_node, &card("B"));
            doc.append_html(grid_node, &card("C"));
            tokio::task::yield_now().await;
            // Nothing new starts while the first pass is in flight
            assert_eq!(catalog.calls(), 1);

            catalog.release();
            let (first, _, _) = wait_for(&mut events, applied).await;
            let (second, _, report) = wait_for(&mut events, applied).await;
            assert_eq!((first, second), (1, 3));
            assert_eq!((report.retained, report.mounted), (1, 2));
            assert_quiet(&mut events).await;
        })
        .await;
}

#[tokio::test]
async fn overlapping_passes_let_the_last_completion_win() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1), ("B", 2)]).gated());
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            let config = WatcherConfig {
                pass_ordering: PassOrdering::Overlapping,
                ..WatcherConfig::default()
            };
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, config).unwrap();
            let mut events = handle.subscribe();

            doc.append_html(doc.query("#app").unwrap(), &grid(&["A"]));
            settle_until(|| catalog.calls() == 1).await;

            doc.append_html(doc.query(".grid").unwrap(), &card("B"));
            // The second pass starts right away and joins the lookup for A
            settle_until(|| catalog.calls() == 2).await;

            catalog.release();
            wait_for(&mut events, applied).await;
            let (last_entries, _, _) = wait_for(&mut events, applied).await;
            assert_eq!(handle.mounted_count(), last_entries);
        })
        .await;
}

#[tokio::test]
async fn stop_during_lookups_mounts_nothing() {
    LocalSet::new()
        .run_until(async {
            let catalog = Arc::new(ScriptedCatalog::new(&[("A", 1)]).gated());
            let resolver = Arc::new(MetadataResolver::new(catalog.clone()));
            let doc = MemoryDocument::parse(EMPTY_PAGE);
            doc.append_html(doc.query("#app").unwrap(), &grid(&["A"]));
            let handle = Watcher::spawn(doc.clone(), profile(), resolver, sequential()).unwrap();
            let mut events = handle.subscribe();
            settle_until(|| catalog.calls() == 1).await;

            handle.stop();
            handle.stop();
            wait_for(&mut events, |e| matches!(e, WatcherEvent::Stopped).then_some(())).await;

            catalog.release();
            wait_for(&mut events, |e| matches!(e, WatcherEvent::PassDiscarded { .. }).then_some(())).await;
            handle.join().await;

            assert_eq!(handle.mounted_count(), 0);
            assert_eq!(doc.count("a.catalog-annotation"), 0);
            assert_eq!(doc.observer_count(), 0);

            // Later mutations are not observed any more
            doc.append_html(doc.query(".grid").unwrap(), &card("A"));
            assert_quiet(&mut events).await;
        })
        .await;
}
