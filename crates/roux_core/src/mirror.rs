//! In-memory graph mirror.
//!
//! A directed graph over node ids, rebuilt wholesale from the cache snapshot
//! at the end of every reconcile. Link targets without a backing file become
//! ghost vertices so that backlink queries work while a note is still being
//! authored. Query operations before the first build return `NotReady`.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use roux_common::{Node, Result, RouxError};
use std::collections::{HashMap, HashSet, VecDeque};

/// Traversal direction for neighbor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborDirection {
    In,
    Out,
    Both,
}

/// Hub ranking metric. The public contract exposes degree metrics only; a
/// `pagerank` request upstream maps to `InDegree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMetric {
    InDegree,
    OutDegree,
}

#[derive(Debug, Clone)]
struct Vertex {
    id: String,
    ghost: bool,
}

/// The mirror itself. Single-owner; callers receive id snapshots, never
/// references into the graph.
pub struct GraphMirror {
    graph: DiGraph<Vertex, ()>,
    index: HashMap<String, NodeIndex>,
    ready: bool,
}

impl Default for GraphMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphMirror {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            ready: false,
        }
    }

    /// Total rebuild from the committed node set. Every id in `nodes` is a
    /// real vertex; link targets outside that set become ghosts.
    #[tracing::instrument(skip_all, fields(node_count = nodes.len()))]
    pub fn build(&mut self, nodes: &[Node]) {
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();

        for node in nodes {
            let vertex = graph.add_node(Vertex {
                id: node.id.clone(),
                ghost: false,
            });
            index.insert(node.id.clone(), vertex);
        }

        for node in nodes {
            let from = index[&node.id];
            for target in &node.outgoing_links {
                let to = *index.entry(target.clone()).or_insert_with(|| {
                    graph.add_node(Vertex {
                        id: target.clone(),
                        ghost: true,
                    })
                });
                graph.add_edge(from, to, ());
            }
        }

        self.graph = graph;
        self.index = index;
        self.ready = true;
        tracing::debug!(
            vertices = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "graph mirror rebuilt"
        );
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(RouxError::NotReady)
        }
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        Ok(self.index.contains_key(id))
    }

    pub fn is_ghost(&self, id: &str) -> Result<bool> {
        self.ensure_ready()?;
        Ok(self
            .index
            .get(id)
            .map(|&v| self.graph[v].ghost)
            .unwrap_or(false))
    }

    /// Ids adjacent to `id` in the requested direction, deduplicated, sorted
    /// for determinism. Unknown ids have no neighbors.
    pub fn neighbors(
        &self,
        id: &str,
        direction: NeighborDirection,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        self.ensure_ready()?;
        let Some(&vertex) = self.index.get(id) else {
            return Ok(Vec::new());
        };

        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let collect = |dir: Direction, seen: &mut HashSet<NodeIndex>| {
            self.graph
                .neighbors_directed(vertex, dir)
                .filter(|v| seen.insert(*v))
                .collect::<Vec<_>>()
        };

        let mut found = match direction {
            NeighborDirection::In => collect(Direction::Incoming, &mut seen),
            NeighborDirection::Out => collect(Direction::Outgoing, &mut seen),
            NeighborDirection::Both => {
                let mut all = collect(Direction::Incoming, &mut seen);
                all.extend(collect(Direction::Outgoing, &mut seen));
                all
            }
        };

        found.sort_by(|a, b| self.graph[*a].id.cmp(&self.graph[*b].id));
        let mut ids: Vec<String> = found.into_iter().map(|v| self.graph[v].id.clone()).collect();
        if let Some(limit) = limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    /// Count of distinct neighbors, optionally restricted to real vertices.
    pub fn neighbor_count(
        &self,
        id: &str,
        direction: NeighborDirection,
        real_only: bool,
    ) -> Result<usize> {
        let ids = self.neighbors(id, direction, None)?;
        if !real_only {
            return Ok(ids.len());
        }
        Ok(ids
            .iter()
            .filter(|id| self.index.get(*id).map(|&v| !self.graph[v].ghost).unwrap_or(false))
            .count())
    }

    /// Breadth-first shortest path over out-edges. `[source]` when source and
    /// target coincide; None when either endpoint is unknown or unreachable.
    pub fn shortest_path(&self, source: &str, target: &str) -> Result<Option<Vec<String>>> {
        self.ensure_ready()?;
        let (Some(&start), Some(&goal)) = (self.index.get(source), self.index.get(target)) else {
            return Ok(None);
        };

        if start == goal {
            return Ok(Some(vec![source.to_string()]));
        }

        let mut predecessor: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);

        while let Some(current) = queue.pop_front() {
            for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if !visited.insert(next) {
                    continue;
                }
                predecessor.insert(next, current);
                if next == goal {
                    let mut path = vec![self.graph[next].id.clone()];
                    let mut cursor = next;
                    while let Some(&prev) = predecessor.get(&cursor) {
                        path.push(self.graph[prev].id.clone());
                        cursor = prev;
                    }
                    path.reverse();
                    return Ok(Some(path));
                }
                queue.push_back(next);
            }
        }

        Ok(None)
    }

    /// Real nodes ranked by degree, score descending then id ascending.
    /// Non-positive limits return empty.
    pub fn hubs(&self, metric: HubMetric, limit: i64) -> Result<Vec<(String, usize)>> {
        self.ensure_ready()?;
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(String, usize)> = self
            .graph
            .node_indices()
            .filter(|&v| !self.graph[v].ghost)
            .map(|v| {
                let dir = match metric {
                    HubMetric::InDegree => Direction::Incoming,
                    HubMetric::OutDegree => Direction::Outgoing,
                };
                (
                    self.graph[v].id.clone(),
                    self.graph.edges_directed(v, dir).count(),
                )
            })
            .collect();

        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit as usize);
        Ok(ranked)
    }

    /// Degree centrality for every real vertex. A self-loop counts once in
    /// and once out.
    pub fn compute_centrality(&self) -> Result<HashMap<String, (usize, usize)>> {
        self.ensure_ready()?;
        Ok(self
            .graph
            .node_indices()
            .filter(|&v| !self.graph[v].ghost)
            .map(|v| {
                (
                    self.graph[v].id.clone(),
                    (
                        self.graph.edges_directed(v, Direction::Incoming).count(),
                        self.graph.edges_directed(v, Direction::Outgoing).count(),
                    ),
                )
            })
            .collect())
    }

    pub fn real_count(&self) -> usize {
        self.graph
            .node_indices()
            .filter(|&v| !self.graph[v].ghost)
            .count()
    }

    pub fn ghost_count(&self) -> usize {
        self.graph
            .node_indices()
            .filter(|&v| self.graph[v].ghost)
            .count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
