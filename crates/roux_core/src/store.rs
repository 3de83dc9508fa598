//! The store: public contract over parser, resolver, cache, vector index,
//! and graph mirror.
//!
//! Owns the reconciliation primitive used by both the watcher and the CRUD
//! paths. CRUD writes go to disk first, then reconcile the touched id, so a
//! successful write is queryable before the call returns.

use crate::cache::{Cache, CentralityRow, ListPage, TagMode};
use crate::mirror::{GraphMirror, HubMetric, NeighborDirection};
use crate::parser::{self, ParsedDocument};
use crate::resolver;
use rayon::prelude::*;
use roux_common::warnings::WarningBuffer;
use roux_common::{id_stem, normalize_id, Node, Result, RouxError, SourceRef};
use roux_config::Config;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Options record for `create_node`.
#[derive(Debug, Clone, Default)]
pub struct CreateNode {
    pub id: String,
    pub content: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Options record for `update_node`. At least one field must be set.
#[derive(Debug, Clone, Default)]
pub struct UpdateNode {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Name-resolution strategy. `Semantic` embeds titles and is orchestrated by
/// the core, which supplies candidate titles from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    Exact,
    Fuzzy,
}

/// Candidate filter for name resolution.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub tag: Option<String>,
    pub path: Option<String>,
}

/// One resolution outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveMatch {
    pub query: String,
    pub match_id: Option<String>,
    pub score: f64,
}

/// A node plus its immediate neighborhood, for depth-1 reads.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node: Node,
    pub incoming: Vec<Node>,
    pub outgoing: Vec<Node>,
    pub incoming_count: usize,
    pub outgoing_count: usize,
}

/// Vault-level counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultStats {
    pub nodes: usize,
    pub ghosts: usize,
    pub edges: usize,
    pub tags: usize,
}

/// Neighbor arrays in a `NodeContext` are capped here; counts stay exact.
pub const CONTEXT_NEIGHBOR_CAP: usize = 20;

enum ScanOutcome {
    Missing(String),
    Skipped(String),
    Parsed {
        id: String,
        rel_path: String,
        modified_ms: i64,
        doc: ParsedDocument,
    },
}

pub struct Store {
    root: PathBuf,
    extensions: Vec<String>,
    cache: Cache,
    mirror: GraphMirror,
    warnings: WarningBuffer,
}

impl Store {
    /// Open the store for a vault and bring cache + mirror up to date with
    /// the file tree.
    pub fn open(config: &Config, warnings: WarningBuffer) -> Result<Self> {
        let cache = Cache::open(&config.sidecar_path().join("cache.db"))?;
        let mut store = Self {
            root: config.root.clone(),
            extensions: config.watcher.extensions.clone(),
            cache,
            mirror: GraphMirror::new(),
            warnings,
        };
        store.reconcile_all()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn warnings(&self) -> &WarningBuffer {
        &self.warnings
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Bring cache, mirror, vector index, and centrality into a consistent
    /// state for a batch of vault-relative paths (on-disk casing). Returns
    /// the ids whose state changed.
    #[tracing::instrument(skip_all, fields(batch_size))]
    pub fn reconcile<I>(&mut self, paths: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = String>,
    {
        // id -> disk path. Two distinct paths folding to one id while both
        // files exist is the case-collision error.
        let mut batch: BTreeMap<String, String> = BTreeMap::new();
        for raw in paths {
            let rel = raw.replace('\\', "/");
            let rel = rel.strip_prefix("./").unwrap_or(&rel).to_string();
            let id = normalize_id(&rel);
            if id.is_empty() {
                continue;
            }
            if let Some(existing) = batch.get(&id) {
                if existing != &rel
                    && self.root.join(existing).exists()
                    && self.root.join(&rel).exists()
                {
                    return Err(RouxError::CaseCollision {
                        a: existing.clone(),
                        b: rel,
                    });
                }
                if !self.root.join(existing).exists() {
                    batch.insert(id, rel);
                }
            } else {
                batch.insert(id, rel);
            }
        }
        tracing::Span::current().record("batch_size", batch.len() as u64);
        if batch.is_empty() {
            // Still make sure the mirror exists for an empty vault.
            if !self.mirror.is_ready() {
                self.rebuild_derived_state(&[])?;
            }
            return Ok(Vec::new());
        }

        self.check_case_collisions(&batch)?;

        // Stat + read + parse, in parallel; resolution follows serially.
        let root = self.root.clone();
        let outcomes: Vec<ScanOutcome> = batch
            .par_iter()
            .map(|(id, rel)| scan_one(&root, id, rel))
            .collect();

        let current_ids: BTreeSet<String> = self.cache.all_ids()?.into_iter().collect();
        let mut known: BTreeSet<String> = current_ids.clone();
        for outcome in &outcomes {
            if let ScanOutcome::Parsed { id, .. } = outcome {
                known.insert(id.clone());
            }
        }

        let mut upserts: Vec<Node> = Vec::new();
        let mut deletes: Vec<String> = Vec::new();
        let mut changed: Vec<String> = Vec::new();

        for outcome in outcomes {
            match outcome {
                ScanOutcome::Missing(id) => {
                    if current_ids.contains(&id) {
                        changed.push(id.clone());
                    }
                    deletes.push(id);
                }
                ScanOutcome::Skipped(warning) => self.warnings.push(warning),
                ScanOutcome::Parsed {
                    id,
                    rel_path,
                    modified_ms,
                    doc,
                } => {
                    for warning in &doc.warnings {
                        self.warnings.push(warning.clone());
                    }

                    let mut outgoing: Vec<String> = Vec::new();
                    for raw in &doc.raw_links {
                        let target = resolver::resolve_target(&raw.target, &known);
                        if !known.contains(&target) {
                            self.warnings.push(format!(
                                "{}: link [[{}]] has no target; ghost {} created",
                                rel_path, raw.target, target
                            ));
                        }
                        if !outgoing.contains(&target) {
                            outgoing.push(target);
                        }
                    }

                    changed.push(id.clone());
                    upserts.push(Node {
                        id,
                        title: doc.title,
                        content: Some(doc.content),
                        tags: doc.tags,
                        outgoing_links: outgoing,
                        properties: doc.properties,
                        source: SourceRef::File {
                            path: rel_path,
                            modified_ms,
                        },
                        content_hash: Some(doc.content_hash),
                    });
                }
            }
        }

        self.cache.apply_batch(&upserts, &deletes)?;

        let nodes = self.cache.all_nodes()?;
        self.rebuild_derived_state(&nodes)?;

        for id in &deletes {
            self.cache.delete_embedding(id)?;
        }

        changed.sort();
        changed.dedup();
        Ok(changed)
    }

    /// Reconcile a single path or id.
    pub fn reconcile_one(&mut self, rel_path: &str) -> Result<Vec<String>> {
        self.reconcile([rel_path.to_string()])
    }

    /// Full-tree reconcile: every source file on disk plus every cached id
    /// whose file may have vanished while we were not watching.
    #[tracing::instrument(skip(self))]
    pub fn reconcile_all(&mut self) -> Result<Vec<String>> {
        let mut paths: Vec<String> = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !is_hidden_component(e.file_name().to_string_lossy().as_ref()) || e.depth() == 0)
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if self.extension_enabled(&rel) {
                paths.push(rel);
            }
        }

        for node in self.cache.all_nodes()? {
            let rel = match &node.source {
                SourceRef::File { path, .. } => path.clone(),
                _ => node.id.clone(),
            };
            paths.push(rel);
        }

        self.reconcile(paths)
    }

    fn rebuild_derived_state(&mut self, nodes: &[Node]) -> Result<()> {
        self.mirror.build(nodes);
        let centrality = self.mirror.compute_centrality()?;
        let mut rows: Vec<(String, usize, usize)> = centrality
            .into_iter()
            .map(|(id, (ind, outd))| (id, ind, outd))
            .collect();
        rows.sort();
        self.cache
            .replace_centrality(&rows, chrono::Utc::now().timestamp_millis())?;
        Ok(())
    }

    /// I7: two distinct on-disk paths must not fold to one id.
    fn check_case_collisions(&self, batch: &BTreeMap<String, String>) -> Result<()> {
        for (id, rel) in batch {
            let Some(node) = self.cache.get_node(id)? else {
                continue;
            };
            let SourceRef::File { path: old, .. } = &node.source else {
                continue;
            };
            if old == rel {
                continue;
            }
            let old_abs = self.root.join(old);
            let new_abs = self.root.join(rel);
            if old_abs.exists() && new_abs.exists() {
                // On a case-insensitive filesystem both names reach the same
                // inode; only a genuine pair of files is a collision.
                let same = match (old_abs.canonicalize(), new_abs.canonicalize()) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                };
                if !same {
                    return Err(RouxError::CaseCollision {
                        a: old.clone(),
                        b: rel.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn extension_enabled(&self, rel: &str) -> bool {
        let base = rel.rsplit('/').next().unwrap_or(rel);
        match base.rfind('.') {
            Some(dot) if dot > 0 => {
                let ext = base[dot + 1..].to_lowercase();
                self.extensions.iter().any(|e| e == &ext)
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a new node file and reconcile it synchronously.
    pub fn create_node(&mut self, req: CreateNode) -> Result<Node> {
        let rel = validate_rel_path(&req.id)?;
        if !self.extension_enabled(&rel) {
            return Err(RouxError::InvalidInput(format!(
                "id must end in an enabled source extension: {}",
                req.id
            )));
        }
        let id = normalize_id(&rel);

        if self.cache.get_node(&id)?.is_some() || self.root.join(&rel).exists() {
            return Err(RouxError::NodeExists { id });
        }

        let title = req
            .title
            .clone()
            .unwrap_or_else(|| id_stem(&rel).to_string());
        let tags = normalize_tag_list(&req.tags);

        let body = render_document(&title, &tags, &req.properties, &req.content)?;
        let path = self.root.join(&rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body)?;
        tracing::info!(id = %id, "node created");

        self.reconcile_one(&rel)?;
        self.cache.get_node(&id)?.ok_or_else(|| {
            RouxError::Provider(format!("created node {} missing after reconcile", id))
        })
    }

    /// Update an existing node file in place (write-temp-then-rename) and
    /// reconcile it synchronously.
    pub fn update_node(&mut self, id: &str, patch: UpdateNode) -> Result<Node> {
        if patch.title.is_none()
            && patch.content.is_none()
            && patch.tags.is_none()
            && patch.properties.is_none()
        {
            return Err(RouxError::InvalidInput(
                "update requires at least one field".to_string(),
            ));
        }

        let id = normalize_id(id);
        let current = self
            .cache
            .get_node(&id)?
            .ok_or_else(|| RouxError::NodeNotFound { id: id.clone() })?;

        if let Some(new_title) = &patch.title {
            if new_title != &current.title {
                let incoming =
                    self.mirror
                        .neighbor_count(&id, NeighborDirection::In, false)?;
                if incoming > 0 {
                    return Err(RouxError::LinkIntegrity(format!(
                        "cannot retitle {}: {} incoming link(s) reference it",
                        id, incoming
                    )));
                }
            }
        }

        let rel = match &current.source {
            SourceRef::File { path, .. } => path.clone(),
            _ => id.clone(),
        };

        let title = patch.title.unwrap_or_else(|| current.title.clone());
        let tags = patch
            .tags
            .map(|t| normalize_tag_list(&t))
            .unwrap_or_else(|| current.tags.clone());
        let properties = patch.properties.unwrap_or_else(|| current.properties.clone());
        let content = patch
            .content
            .unwrap_or_else(|| current.content.clone().unwrap_or_default());

        let body = render_document(&title, &tags, &properties, &content)?;
        let path = self.root.join(&rel);
        write_atomic(&path, body.as_bytes())?;
        tracing::info!(id = %id, "node updated");

        self.reconcile_one(&rel)?;
        self.cache
            .get_node(&id)?
            .ok_or_else(|| RouxError::Provider(format!("updated node {} missing after reconcile", id)))
    }

    /// Remove the backing file (if any) and reconcile. Absent ids report
    /// `deleted: false` rather than erroring.
    pub fn delete_node(&mut self, id: &str) -> Result<bool> {
        let id = normalize_id(id);
        let current = self.cache.get_node(&id)?;
        let rel = match current.as_ref().map(|n| &n.source) {
            Some(SourceRef::File { path, .. }) => path.clone(),
            _ => id.clone(),
        };

        let path = self.root.join(&rel);
        let file_existed = path.exists();
        if file_existed {
            std::fs::remove_file(&path)?;
            tracing::info!(id = %id, "node file removed");
        }

        self.reconcile_one(&rel)?;
        Ok(file_existed || current.is_some())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        self.cache.get_node(&normalize_id(id))
    }

    pub fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>> {
        let normalized: Vec<String> = ids.iter().map(|i| normalize_id(i)).collect();
        self.cache.get_nodes(&normalized)
    }

    pub fn nodes_exist(&self, ids: &[String]) -> Result<BTreeMap<String, bool>> {
        let mut out = BTreeMap::new();
        for id in ids {
            let id = normalize_id(id);
            let exists = self.cache.get_node(&id)?.is_some();
            out.insert(id, exists);
        }
        Ok(out)
    }

    pub fn list_nodes(
        &self,
        tag: Option<&str>,
        path_prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<ListPage> {
        self.cache.list_nodes(tag, path_prefix, limit, offset)
    }

    pub fn search_by_tags(
        &self,
        tags: &[String],
        mode: TagMode,
        limit: Option<usize>,
    ) -> Result<Vec<Node>> {
        self.cache.search_by_tags(tags, mode, limit)
    }

    /// Uniformly random real node, optionally restricted by tags (any-match).
    pub fn random_node(&self, tags: &[String]) -> Result<Option<Node>> {
        use rand::Rng;
        let candidates = if tags.is_empty() {
            self.cache.find_candidates(None, None)?
        } else {
            self.cache.search_by_tags(tags, TagMode::Any, None)?
        };
        if candidates.is_empty() {
            return Ok(None);
        }
        let pick = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates.into_iter().nth(pick))
    }

    /// Hydrated neighbor nodes. Ghost neighbors are collapsed out, so the
    /// result holds real nodes only; `limit` applies after hydration.
    pub fn neighbors(
        &self,
        id: &str,
        direction: NeighborDirection,
        limit: Option<usize>,
    ) -> Result<Vec<Node>> {
        let ids = self.mirror.neighbors(&normalize_id(id), direction, None)?;
        let mut nodes = self.cache.get_nodes(&ids)?;
        if let Some(limit) = limit {
            nodes.truncate(limit);
        }
        Ok(nodes)
    }

    /// A node with both neighborhoods, for depth-1 reads. Arrays cap at
    /// [`CONTEXT_NEIGHBOR_CAP`]; counts are exact totals of real neighbors.
    pub fn node_context(&self, id: &str) -> Result<Option<NodeContext>> {
        let id = normalize_id(id);
        let Some(node) = self.cache.get_node(&id)? else {
            return Ok(None);
        };

        let incoming_count = self
            .mirror
            .neighbor_count(&id, NeighborDirection::In, true)?;
        let outgoing_count = self
            .mirror
            .neighbor_count(&id, NeighborDirection::Out, true)?;

        let mut incoming = self.neighbors(&id, NeighborDirection::In, None)?;
        incoming.truncate(CONTEXT_NEIGHBOR_CAP);
        let mut outgoing = self.neighbors(&id, NeighborDirection::Out, None)?;
        outgoing.truncate(CONTEXT_NEIGHBOR_CAP);

        Ok(Some(NodeContext {
            node,
            incoming,
            outgoing,
            incoming_count,
            outgoing_count,
        }))
    }

    /// Shortest out-edge path between two real nodes, or None. Ghost
    /// endpoints are not paths.
    pub fn find_path(&self, source: &str, target: &str) -> Result<Option<Vec<String>>> {
        let source = normalize_id(source);
        let target = normalize_id(target);
        if self.cache.get_node(&source)?.is_none() || self.cache.get_node(&target)?.is_none() {
            return Ok(None);
        }
        self.mirror.shortest_path(&source, &target)
    }

    pub fn hubs(&self, metric: HubMetric, limit: i64) -> Result<Vec<(String, usize)>> {
        self.mirror.hubs(metric, limit)
    }

    pub fn get_centrality(&self, id: &str) -> Result<Option<CentralityRow>> {
        self.cache.get_centrality(&normalize_id(id))
    }

    /// Vector-index pass-throughs.
    pub fn store_embedding(&mut self, id: &str, vec: &[f32], model: &str) -> Result<()> {
        self.cache.store_embedding(&normalize_id(id), vec, model)
    }

    pub fn search_by_vector(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.cache.search_by_vector(query, k, &self.warnings)
    }

    pub fn has_embedding(&self, id: &str) -> Result<bool> {
        self.cache.has_embedding(&normalize_id(id))
    }

    pub fn embedding_model(&self, id: &str) -> Result<Option<String>> {
        self.cache.embedding_model(&normalize_id(id))
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Candidate (id, title) pairs under a filter; the semantic strategy in
    /// the core embeds these titles.
    pub fn resolve_candidates(&self, filter: &CandidateFilter) -> Result<Vec<(String, String)>> {
        Ok(self
            .cache
            .find_candidates(filter.tag.as_deref(), filter.path.as_deref())?
            .into_iter()
            .map(|n| (n.id, n.title))
            .collect())
    }

    /// Resolve display names to node ids with the exact or fuzzy strategy.
    pub fn resolve_nodes(
        &self,
        names: &[String],
        strategy: ResolveStrategy,
        threshold: f64,
        filter: &CandidateFilter,
    ) -> Result<Vec<ResolveMatch>> {
        let candidates = self.resolve_candidates(filter)?;
        Ok(names
            .iter()
            .map(|query| match strategy {
                ResolveStrategy::Exact => {
                    let hit = candidates
                        .iter()
                        .find(|(_, title)| title.eq_ignore_ascii_case(query));
                    match hit {
                        Some((id, _)) => ResolveMatch {
                            query: query.clone(),
                            match_id: Some(id.clone()),
                            score: 1.0,
                        },
                        None => ResolveMatch {
                            query: query.clone(),
                            match_id: None,
                            score: 0.0,
                        },
                    }
                }
                ResolveStrategy::Fuzzy => {
                    let mut best: Option<(&String, f64)> = None;
                    for (id, title) in &candidates {
                        let score =
                            dice_coefficient(&query.to_lowercase(), &title.to_lowercase());
                        if best.map(|(_, s)| score > s).unwrap_or(true) {
                            best = Some((id, score));
                        }
                    }
                    match best {
                        Some((id, score)) if score >= threshold => ResolveMatch {
                            query: query.clone(),
                            match_id: Some(id.clone()),
                            score,
                        },
                        Some((_, score)) => ResolveMatch {
                            query: query.clone(),
                            match_id: None,
                            score,
                        },
                        None => ResolveMatch {
                            query: query.clone(),
                            match_id: None,
                            score: 0.0,
                        },
                    }
                }
            })
            .collect())
    }

    /// Display titles for a set of ids. Ids without a cache row (ghosts) get
    /// their filename stem.
    pub fn resolve_titles(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let mut titles = HashMap::with_capacity(ids.len());
        for id in ids {
            let id = normalize_id(id);
            let title = match self.cache.get_node(&id)? {
                Some(node) => node.title,
                None => id_stem(&id).to_string(),
            };
            titles.insert(id, title);
        }
        Ok(titles)
    }

    pub fn stats(&self) -> Result<VaultStats> {
        Ok(VaultStats {
            nodes: self.cache.node_count()?,
            ghosts: self.mirror.ghost_count(),
            edges: self.mirror.edge_count(),
            tags: self.cache.distinct_tag_count()?,
        })
    }
}

fn scan_one(root: &Path, id: &str, rel: &str) -> ScanOutcome {
    let path = root.join(rel);
    let metadata = match std::fs::metadata(&path) {
        Ok(m) if m.is_file() => m,
        _ => return ScanOutcome::Missing(id.to_string()),
    };

    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            return ScanOutcome::Skipped(format!("{}: unreadable, skipped: {}", rel, e));
        }
    };

    match parser::parse_source(&bytes, rel) {
        Ok(doc) => ScanOutcome::Parsed {
            id: id.to_string(),
            rel_path: rel.to_string(),
            modified_ms,
            doc,
        },
        Err(e) => ScanOutcome::Skipped(format!("{}: parse failed, skipped: {}", rel, e)),
    }
}

/// Reject ids that would escape the source root.
fn validate_rel_path(raw: &str) -> Result<String> {
    let rel = raw.replace('\\', "/");
    let rel = rel.strip_prefix("./").unwrap_or(&rel).to_string();
    if rel.is_empty() {
        return Err(RouxError::InvalidInput("id must not be empty".to_string()));
    }
    if rel.starts_with('/') || rel.contains(':') {
        return Err(RouxError::InvalidInput(format!(
            "id must be relative to the source root: {}",
            raw
        )));
    }
    if rel.split('/').any(|part| part == ".." || part.is_empty()) {
        return Err(RouxError::InvalidInput(format!(
            "id must not contain '..' or empty segments: {}",
            raw
        )));
    }
    Ok(rel)
}

fn normalize_tag_list(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Frontmatter + body, as written to disk. Reserved keys beyond title/tags
/// never serialize from `properties`.
fn render_document(
    title: &str,
    tags: &[String],
    properties: &serde_json::Map<String, serde_json::Value>,
    content: &str,
) -> Result<String> {
    let mut mapping = serde_yaml::Mapping::new();
    mapping.insert(
        serde_yaml::Value::String("title".to_string()),
        serde_yaml::Value::String(title.to_string()),
    );
    if !tags.is_empty() {
        mapping.insert(
            serde_yaml::Value::String("tags".to_string()),
            serde_yaml::Value::Sequence(
                tags.iter()
                    .map(|t| serde_yaml::Value::String(t.clone()))
                    .collect(),
            ),
        );
    }
    for (key, value) in properties {
        if roux_common::RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let yaml: serde_yaml::Value = serde_yaml::to_value(value)
            .map_err(|e| RouxError::InvalidInput(format!("property '{}': {}", key, e)))?;
        mapping.insert(serde_yaml::Value::String(key.clone()), yaml);
    }

    let yaml = serde_yaml::to_string(&serde_yaml::Value::Mapping(mapping))
        .map_err(|e| RouxError::Provider(format!("frontmatter serialization: {}", e)))?;
    Ok(format!("---\n{}---\n{}", yaml, content))
}

/// Write-temp-then-rename in the target's directory; the dot prefix keeps
/// the temp file invisible to the watcher.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| RouxError::InvalidInput(format!("no parent directory for {:?}", path)))?;
    let name = path
        .file_name()
        .ok_or_else(|| RouxError::InvalidInput(format!("no file name in {:?}", path)))?;
    let tmp = dir.join(format!(".{}.tmp", name.to_string_lossy()));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn is_hidden_component(name: &str) -> bool {
    name.starts_with('.')
}

/// Dice coefficient over character bigrams of the two strings.
fn dice_coefficient(a: &str, b: &str) -> f64 {
    let bigrams = |s: &str| -> Vec<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };

    let a_grams = bigrams(a);
    let b_grams = bigrams(b);
    if a_grams.is_empty() && b_grams.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    if a_grams.is_empty() || b_grams.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for gram in &a_grams {
        *counts.entry(*gram).or_default() += 1;
    }
    let mut overlap = 0usize;
    for gram in &b_grams {
        if let Some(count) = counts.get_mut(gram) {
            if *count > 0 {
                *count -= 1;
                overlap += 1;
            }
        }
    }

    (2.0 * overlap as f64) / (a_grams.len() + b_grams.len()) as f64
}
