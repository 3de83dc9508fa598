//! Filesystem watcher feeding the reconcile loop.
//!
//! Raw notify events are normalized to vault-relative paths, accumulated
//! while events keep arriving, and handed to the store as one batch after
//! the debounce window of quiescence. A file created and deleted inside the
//! window collapses to a single stat-driven reconcile of its id.

use crate::store::Store;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use roux_common::warnings::WarningBuffer;
use roux_common::{Result, RouxError};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Invoked with the changed ids after each committed reconcile batch.
pub type ChangeCallback = Arc<dyn Fn(Vec<String>) + Send + Sync>;

/// Keeps the OS watcher and its debounce task alive. Dropping the handle
/// stops both.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching the store's source root.
///
/// The returned future resolves only once the underlying OS watcher is
/// registered and observing events; callers never need a sleep to know the
/// watcher is live.
pub async fn start_watching(
    store: Arc<Mutex<Store>>,
    extensions: Vec<String>,
    debounce: Duration,
    warnings: WarningBuffer,
    on_change: ChangeCallback,
) -> Result<WatchHandle> {
    let root = store.lock().expect("store poisoned").root().to_path_buf();
    let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_relevant(&event.kind) => {
            for path in event.paths {
                let _ = tx.send(path);
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("watcher event error: {}", e),
    })
    .map_err(|e| RouxError::Provider(format!("failed to create file watcher: {}", e)))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| RouxError::Provider(format!("failed to watch {:?}: {}", root, e)))?;
    tracing::info!(root = ?root, "watcher ready");

    let task = tokio::spawn(debounce_loop(
        rx, store, root, extensions, debounce, warnings, on_change,
    ));

    Ok(WatchHandle {
        _watcher: watcher,
        task,
    })
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    store: Arc<Mutex<Store>>,
    root: PathBuf,
    extensions: Vec<String>,
    debounce: Duration,
    warnings: WarningBuffer,
    on_change: ChangeCallback,
) {
    let mut pending: BTreeSet<String> = BTreeSet::new();

    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(path) => accumulate(&mut pending, &root, &extensions, path),
                None => break,
            }
        } else {
            // The timer resets while events keep arriving; silence flushes.
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(path)) => accumulate(&mut pending, &root, &extensions, path),
                Ok(None) => {
                    flush(&store, &mut pending, &warnings, &on_change);
                    break;
                }
                Err(_) => flush(&store, &mut pending, &warnings, &on_change),
            }
        }
    }

    tracing::debug!("watcher debounce loop stopped");
}

fn accumulate(
    pending: &mut BTreeSet<String>,
    root: &PathBuf,
    extensions: &[String],
    path: PathBuf,
) {
    let Ok(rel) = path.strip_prefix(root) else {
        return;
    };
    let rel = rel.to_string_lossy().replace('\\', "/");
    if rel.is_empty() {
        return;
    }
    // Side-car, editor, and VCS churn all live in dot-directories.
    if rel.split('/').any(|part| part.starts_with('.')) {
        return;
    }
    if !extension_enabled(&rel, extensions) {
        return;
    }
    pending.insert(rel);
}

fn flush(
    store: &Arc<Mutex<Store>>,
    pending: &mut BTreeSet<String>,
    warnings: &WarningBuffer,
    on_change: &ChangeCallback,
) {
    let batch: Vec<String> = std::mem::take(pending).into_iter().collect();
    tracing::debug!(batch_size = batch.len(), "debounce window closed");

    let result = {
        let mut store = store.lock().expect("store poisoned");
        store.reconcile(batch)
    };

    match result {
        Ok(changed) => on_change(changed),
        Err(e) => warnings.push(format!("watcher reconcile failed: {}", e)),
    }
}

fn extension_enabled(rel: &str, extensions: &[String]) -> bool {
    let base = rel.rsplit('/').next().unwrap_or(rel);
    match base.rfind('.') {
        Some(dot) if dot > 0 => {
            let ext = base[dot + 1..].to_lowercase();
            extensions.iter().any(|e| e == &ext)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_filters_noise() {
        let root = PathBuf::from("/vault");
        let extensions = vec!["md".to_string()];
        let mut pending = BTreeSet::new();

        accumulate(&mut pending, &root, &extensions, PathBuf::from("/vault/a.md"));
        accumulate(&mut pending, &root, &extensions, PathBuf::from("/vault/.roux/cache.db"));
        accumulate(&mut pending, &root, &extensions, PathBuf::from("/vault/.git/HEAD"));
        accumulate(&mut pending, &root, &extensions, PathBuf::from("/vault/notes/.b.md.tmp"));
        accumulate(&mut pending, &root, &extensions, PathBuf::from("/vault/image.png"));
        accumulate(&mut pending, &root, &extensions, PathBuf::from("/elsewhere/c.md"));
        accumulate(&mut pending, &root, &extensions, PathBuf::from("/vault/Notes/B.md"));

        let got: Vec<_> = pending.iter().cloned().collect();
        assert_eq!(got, vec!["Notes/B.md", "a.md"]);
    }

    #[test]
    fn test_relevant_kinds() {
        assert!(is_relevant(&EventKind::Create(notify::event::CreateKind::File)));
        assert!(is_relevant(&EventKind::Remove(notify::event::RemoveKind::File)));
        assert!(is_relevant(&EventKind::Any));
        assert!(!is_relevant(&EventKind::Access(
            notify::event::AccessKind::Read
        )));
    }

    #[test]
    fn test_extension_enabled() {
        let exts = vec!["md".to_string()];
        assert!(extension_enabled("a.md", &exts));
        assert!(extension_enabled("A.MD", &exts));
        assert!(!extension_enabled("a.txt", &exts));
        assert!(!extension_enabled("no-extension", &exts));
    }
}
