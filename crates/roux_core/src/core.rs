//! Core orchestration: store + embedder.
//!
//! The tool handlers talk to [`RouxCore`] only. It composes the store with
//! an optional embedding provider, owns the watcher lifecycle, and carries
//! the warning buffer drained into tool responses.

use crate::cache::{ListPage, TagMode};
use crate::embedder::Embedder;
use crate::mirror::{HubMetric, NeighborDirection};
use crate::store::{
    CandidateFilter, CreateNode, NodeContext, ResolveMatch, ResolveStrategy, Store, UpdateNode,
    VaultStats,
};
use crate::watcher::{self, ChangeCallback, WatchHandle};
use crate::vector;
use roux_common::warnings::WarningBuffer;
use roux_common::{Node, Result, RouxError};
use roux_config::Config;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Name-resolution strategy at the tool boundary; `Semantic` requires an
/// embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategyKind {
    Exact,
    Fuzzy,
    Semantic,
}

/// One semantic search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub node: Node,
    pub score: f32,
}

pub struct RouxCore {
    store: Arc<Mutex<Store>>,
    embedder: Option<Arc<dyn Embedder>>,
    warnings: WarningBuffer,
    config: Config,
    watch: Mutex<Option<WatchHandle>>,
    watch_callback: Mutex<Option<ChangeCallback>>,
}

impl RouxCore {
    /// Open the vault: cache + mirror reconciled against the file tree.
    pub fn open(config: Config, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let warnings = WarningBuffer::new();
        let store = Store::open(&config, warnings.clone())?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            embedder,
            warnings,
            config,
            watch: Mutex::new(None),
            watch_callback: Mutex::new(None),
        })
    }

    /// Whether semantic capability is available. Absence hides the tools
    /// that need it; it is not an error.
    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn warnings(&self) -> &WarningBuffer {
        &self.warnings
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drain accumulated sync warnings for inclusion in a tool response.
    pub fn drain_warnings(&self) -> Vec<String> {
        self.warnings.drain()
    }

    pub fn store(&self) -> Arc<Mutex<Store>> {
        Arc::clone(&self.store)
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("store poisoned")
    }

    // ------------------------------------------------------------------
    // Watcher lifecycle
    // ------------------------------------------------------------------

    /// Start watching the source root. Resolves once the OS watcher is
    /// observing events. On failure the callback is retained and setup is
    /// retried on the next reconcile-inducing call.
    pub async fn start_watching(&self, on_change: ChangeCallback) -> Result<()> {
        *self.watch_callback.lock().expect("watch state poisoned") = Some(on_change);
        self.try_start_watcher().await
    }

    async fn try_start_watcher(&self) -> Result<()> {
        let callback = self
            .watch_callback
            .lock()
            .expect("watch state poisoned")
            .clone();
        let Some(callback) = callback else {
            return Ok(());
        };

        let result = watcher::start_watching(
            Arc::clone(&self.store),
            self.config.watcher.extensions.clone(),
            Duration::from_millis(self.config.watcher.debounce_ms),
            self.warnings.clone(),
            callback,
        )
        .await;

        match result {
            Ok(handle) => {
                *self.watch.lock().expect("watch state poisoned") = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.warnings.push(format!(
                    "watcher unavailable, serving from current state: {}",
                    e
                ));
                Err(e)
            }
        }
    }

    async fn ensure_watcher(&self) {
        let wants_watcher = {
            self.watch_callback
                .lock()
                .expect("watch state poisoned")
                .is_some()
                && self.watch.lock().expect("watch state poisoned").is_none()
        };
        if wants_watcher {
            let _ = self.try_start_watcher().await;
        }
    }

    // ------------------------------------------------------------------
    // Embedding
    // ------------------------------------------------------------------

    fn embed_timeout(&self) -> Duration {
        let secs = self
            .config
            .providers
            .embedding
            .as_ref()
            .map(|e| e.timeout_secs)
            .unwrap_or(30);
        Duration::from_secs(secs)
    }

    /// Embed text on the blocking pool with the provider timeout applied.
    async fn embed_text(&self, text: String) -> Result<Vec<f32>> {
        let embedder = self
            .embedder
            .clone()
            .ok_or_else(|| RouxError::Provider("no embedder registered".to_string()))?;

        let task = tokio::task::spawn_blocking(move || embedder.embed(&text));
        match tokio::time::timeout(self.embed_timeout(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(RouxError::Provider(format!("embedder panicked: {}", join))),
            Err(_) => Err(RouxError::Provider("embedder timed out".to_string())),
        }
    }

    /// Embed a node's content and write the vector through. Embedding is
    /// derived data, so failures degrade to warnings.
    async fn embed_node(&self, node: &Node) {
        if self.embedder.is_none() {
            return;
        }
        let Some(content) = node.content.clone() else {
            return;
        };
        let model = self
            .embedder
            .as_ref()
            .map(|e| e.model_id().to_string())
            .unwrap_or_default();

        match self.embed_text(content).await {
            Ok(vector) => {
                let result = self.lock_store().store_embedding(&node.id, &vector, &model);
                if let Err(e) = result {
                    self.warnings
                        .push(format!("{}: embedding not stored: {}", node.id, e));
                }
            }
            Err(e) => {
                self.warnings
                    .push(format!("{}: embedding failed: {}", node.id, e));
            }
        }
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Semantic search: embed the query, scan the vector index, hydrate the
    /// hits. Scores are `1 − distance` clamped to [0, 1].
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query_vec = self.embed_text(query.to_string()).await?;

        let store = self.lock_store();
        let scored = store.search_by_vector(&query_vec, limit)?;
        let ids: Vec<String> = scored.iter().map(|(id, _)| id.clone()).collect();
        let distances: HashMap<String, f32> = scored.into_iter().collect();
        let nodes = store.get_nodes(&ids)?;
        drop(store);

        Ok(nodes
            .into_iter()
            .map(|node| {
                let distance = distances.get(&node.id).copied().unwrap_or(1.0);
                SearchHit {
                    score: (1.0 - distance).clamp(0.0, 1.0),
                    node,
                }
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    pub async fn create_node(&self, req: CreateNode) -> Result<Node> {
        self.ensure_watcher().await;
        let node = self.lock_store().create_node(req)?;
        self.embed_node(&node).await;
        Ok(node)
    }

    pub async fn update_node(&self, id: &str, patch: UpdateNode) -> Result<Node> {
        self.ensure_watcher().await;
        let content_touched = patch.content.is_some();
        let before_hash = self
            .lock_store()
            .get_node(id)?
            .and_then(|n| n.content_hash);

        let node = self.lock_store().update_node(id, patch)?;

        if content_touched && node.content_hash != before_hash {
            self.embed_node(&node).await;
        }
        Ok(node)
    }

    pub async fn delete_node(&self, id: &str) -> Result<bool> {
        self.ensure_watcher().await;
        self.lock_store().delete_node(id)
    }

    // ------------------------------------------------------------------
    // Query pass-throughs
    // ------------------------------------------------------------------

    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        self.lock_store().get_node(id)
    }

    pub fn node_context(&self, id: &str) -> Result<Option<NodeContext>> {
        self.lock_store().node_context(id)
    }

    pub fn neighbors(
        &self,
        id: &str,
        direction: NeighborDirection,
        limit: Option<usize>,
    ) -> Result<Vec<Node>> {
        self.lock_store().neighbors(id, direction, limit)
    }

    pub fn find_path(&self, source: &str, target: &str) -> Result<Option<Vec<String>>> {
        self.lock_store().find_path(source, target)
    }

    pub fn hubs(&self, metric: HubMetric, limit: i64) -> Result<Vec<(String, usize)>> {
        self.lock_store().hubs(metric, limit)
    }

    pub fn list_nodes(
        &self,
        tag: Option<&str>,
        path_prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<ListPage> {
        self.lock_store().list_nodes(tag, path_prefix, limit, offset)
    }

    pub fn search_by_tags(
        &self,
        tags: &[String],
        mode: TagMode,
        limit: Option<usize>,
    ) -> Result<Vec<Node>> {
        self.lock_store().search_by_tags(tags, mode, limit)
    }

    pub fn random_node(&self, tags: &[String]) -> Result<Option<Node>> {
        self.lock_store().random_node(tags)
    }

    pub fn nodes_exist(&self, ids: &[String]) -> Result<BTreeMap<String, bool>> {
        self.lock_store().nodes_exist(ids)
    }

    pub fn resolve_titles(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        self.lock_store().resolve_titles(ids)
    }

    pub fn stats(&self) -> Result<VaultStats> {
        self.lock_store().stats()
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    pub async fn resolve_nodes(
        &self,
        names: &[String],
        strategy: ResolveStrategyKind,
        threshold: f64,
        filter: &CandidateFilter,
    ) -> Result<Vec<ResolveMatch>> {
        match strategy {
            ResolveStrategyKind::Exact => {
                self.lock_store()
                    .resolve_nodes(names, ResolveStrategy::Exact, threshold, filter)
            }
            ResolveStrategyKind::Fuzzy => {
                self.lock_store()
                    .resolve_nodes(names, ResolveStrategy::Fuzzy, threshold, filter)
            }
            ResolveStrategyKind::Semantic => self.resolve_semantic(names, threshold, filter).await,
        }
    }

    /// Cosine similarity between the query embedding and each candidate
    /// title embedding; accept at or above the threshold.
    async fn resolve_semantic(
        &self,
        names: &[String],
        threshold: f64,
        filter: &CandidateFilter,
    ) -> Result<Vec<ResolveMatch>> {
        if self.embedder.is_none() {
            return Err(RouxError::InvalidInput(
                "strategy 'semantic' requires an embedder".to_string(),
            ));
        }

        let candidates = self.lock_store().resolve_candidates(filter)?;
        let mut candidate_vecs: Vec<(String, Vec<f32>)> = Vec::with_capacity(candidates.len());
        for (id, title) in candidates {
            let vec = self.embed_text(title).await?;
            candidate_vecs.push((id, vec));
        }

        let mut matches = Vec::with_capacity(names.len());
        for name in names {
            let query_vec = self.embed_text(name.clone()).await?;
            let mut best: Option<(&String, f64)> = None;
            for (id, vec) in &candidate_vecs {
                let similarity = 1.0 - f64::from(vector::cosine_distance(&query_vec, vec));
                if best.map(|(_, s)| similarity > s).unwrap_or(true) {
                    best = Some((id, similarity));
                }
            }
            matches.push(match best {
                Some((id, score)) if score >= threshold => ResolveMatch {
                    query: name.clone(),
                    match_id: Some(id.clone()),
                    score,
                },
                Some((_, score)) => ResolveMatch {
                    query: name.clone(),
                    match_id: None,
                    score,
                },
                None => ResolveMatch {
                    query: name.clone(),
                    match_id: None,
                    score: 0.0,
                },
            });
        }
        Ok(matches)
    }
}
