//! Watcher integration tests.
//!
//! These rely on the readiness contract of `start_watching`: once the future
//! resolves, the OS watcher is observing events, so no sleep-based setup is
//! needed before touching files.

use roux_common::warnings::WarningBuffer;
use roux_core::watcher::{start_watching, ChangeCallback};
use roux_core::Store;
use roux_test_helpers::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(100);

struct Fixture {
    store: Arc<Mutex<Store>>,
    warnings: WarningBuffer,
}

fn fixture(root: &std::path::Path) -> Fixture {
    init_test_logging();
    let config = roux_config::Config::load(root).unwrap();
    let warnings = WarningBuffer::new();
    let store = Store::open(&config, warnings.clone()).unwrap();
    Fixture {
        store: Arc::new(Mutex::new(store)),
        warnings,
    }
}

fn counting_callback() -> (ChangeCallback, tokio::sync::mpsc::UnboundedReceiver<Vec<String>>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let callback: ChangeCallback = Arc::new(move |ids| {
        let _ = tx.send(ids);
    });
    (callback, rx)
}

/// Drain commits until the watcher has been quiet for a while.
async fn settle(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<Vec<String>>,
    quiet: Duration,
) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    while let Ok(Some(batch)) = tokio::time::timeout(quiet, rx.recv()).await {
        batches.push(batch);
    }
    batches
}

#[tokio::test]
async fn test_watcher_picks_up_new_file() {
    let vault = temp_vault();
    let fx = fixture(vault.path());
    let (callback, mut rx) = counting_callback();

    let _handle = start_watching(
        Arc::clone(&fx.store),
        vec!["md".to_string()],
        DEBOUNCE,
        fx.warnings.clone(),
        callback,
    )
    .await
    .unwrap();

    write_note(vault.path(), "fresh.md", "# Fresh\n\nwith [[link]]");

    let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watcher did not commit in time")
        .unwrap();
    assert!(batch.contains(&"fresh.md".to_string()));

    let store = fx.store.lock().unwrap();
    let node = store.get_node("fresh.md").unwrap().unwrap();
    assert_eq!(node.title, "Fresh");
    assert_eq!(node.outgoing_links, vec!["link.md"]);
}

#[tokio::test]
async fn test_debounce_batches_rapid_rewrites() {
    let vault = temp_vault();
    let fx = fixture(vault.path());
    let (callback, mut rx) = counting_callback();

    let _handle = start_watching(
        Arc::clone(&fx.store),
        vec!["md".to_string()],
        DEBOUNCE,
        fx.warnings.clone(),
        callback,
    )
    .await
    .unwrap();

    // Three rewrites well inside one debounce window.
    for version in 0..3 {
        write_note(vault.path(), "x.md", &format!("version {}", version));
    }

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watcher did not commit in time")
        .unwrap();
    assert!(first.contains(&"x.md".to_string()));

    // At most one reconcile per write, not one per raw event.
    let rest = settle(&mut rx, Duration::from_millis(500)).await;
    assert!(
        rest.len() + 1 <= 3,
        "expected at most 3 reconciles, saw {}",
        rest.len() + 1
    );

    // Last write wins.
    let store = fx.store.lock().unwrap();
    let node = store.get_node("x.md").unwrap().unwrap();
    assert_eq!(node.content.as_deref(), Some("version 2"));
}

#[tokio::test]
async fn test_transient_file_collapses_to_noop() {
    let vault = temp_vault();
    let fx = fixture(vault.path());
    let (callback, mut rx) = counting_callback();

    let _handle = start_watching(
        Arc::clone(&fx.store),
        vec!["md".to_string()],
        DEBOUNCE,
        fx.warnings.clone(),
        callback,
    )
    .await
    .unwrap();

    // Created and deleted inside one debounce window.
    write_note(vault.path(), "blink.md", "here and gone");
    std::fs::remove_file(vault.path().join("blink.md")).unwrap();

    let batches = settle(&mut rx, Duration::from_millis(800)).await;
    assert!(!batches.is_empty(), "debounce flush should still commit");
    // Net no-op for the id: nothing materialized.
    for batch in &batches {
        assert!(batch.is_empty(), "transient file leaked changes: {:?}", batch);
    }

    let store = fx.store.lock().unwrap();
    assert!(store.get_node("blink.md").unwrap().is_none());
}

#[tokio::test]
async fn test_watcher_ignores_sidecar_and_foreign_files() {
    let vault = temp_vault();
    let fx = fixture(vault.path());
    let (callback, mut rx) = counting_callback();

    let _handle = start_watching(
        Arc::clone(&fx.store),
        vec!["md".to_string()],
        DEBOUNCE,
        fx.warnings.clone(),
        callback,
    )
    .await
    .unwrap();

    write_note(vault.path(), ".obsidian/workspace.json", "{}");
    write_note(vault.path(), "image.png", "not markdown");
    write_note(vault.path(), "real.md", "counts");

    let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watcher did not commit in time")
        .unwrap();
    assert_eq!(batch, vec!["real.md".to_string()]);
}

#[tokio::test]
async fn test_watcher_observes_deletes() {
    let vault = vault_with_files(&[("doomed.md", "short lived")]);
    let fx = fixture(vault.path());
    let (callback, mut rx) = counting_callback();

    let _handle = start_watching(
        Arc::clone(&fx.store),
        vec!["md".to_string()],
        DEBOUNCE,
        fx.warnings.clone(),
        callback,
    )
    .await
    .unwrap();

    std::fs::remove_file(vault.path().join("doomed.md")).unwrap();

    let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watcher did not commit in time")
        .unwrap();
    assert!(batch.contains(&"doomed.md".to_string()));

    let store = fx.store.lock().unwrap();
    assert!(store.get_node("doomed.md").unwrap().is_none());
}
