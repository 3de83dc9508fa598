//! Tool catalog, input validation, and response shaping.
//!
//! Each handler validates its params before touching the core, then shapes
//! the result into the tight response schemas. Ids are normalized to
//! lowercase on entry. Content is truncated per surface: 10 000 chars for a
//! primary node, 500 for list rows, 200 for neighbors inside a depth-1 read.

use roux_common::{normalize_id, Node, Result, RouxError};
use roux_core::{
    CandidateFilter, CreateNode, HubMetric, NeighborDirection, ResolveStrategyKind, RouxCore,
    TagMode, UpdateNode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TRUNCATE_PRIMARY: usize = 10_000;
const TRUNCATE_ROW: usize = 500;
const TRUNCATE_NESTED: usize = 200;
const TRUNCATION_SUFFIX: &str = "... [truncated]";

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct LinkInfo {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub tags: Vec<String>,
    pub links: Vec<LinkInfo>,
}

#[derive(Debug, Serialize)]
pub struct NodeWithContextResponse {
    #[serde(flatten)]
    pub node: NodeResponse,
    pub incoming_neighbors: Vec<NodeResponse>,
    pub outgoing_neighbors: Vec<NodeResponse>,
    pub incoming_count: usize,
    pub outgoing_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResultResponse {
    #[serde(flatten)]
    pub node: NodeResponse,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct HubResponse {
    pub id: String,
    pub title: String,
    pub score: usize,
}

#[derive(Debug, Serialize)]
pub struct PathResponse {
    pub path: Vec<String>,
    pub length: usize,
}

#[derive(Debug, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
}

/// Truncate to a character budget, appending the marker when cut.
fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let cut: String = content.chars().take(max_chars).collect();
    format!("{}{}", cut, TRUNCATION_SUFFIX)
}

/// Shape one node. `content_limit = None` omits content entirely.
fn node_response(core: &RouxCore, node: &Node, content_limit: Option<usize>) -> Result<NodeResponse> {
    let titles = core.resolve_titles(&node.outgoing_links)?;
    let links = node
        .outgoing_links
        .iter()
        .map(|id| LinkInfo {
            id: id.clone(),
            title: titles
                .get(id)
                .cloned()
                .unwrap_or_else(|| roux_common::id_stem(id).to_string()),
        })
        .collect();

    let content = match content_limit {
        Some(max) => node.content.as_deref().map(|c| truncate(c, max)),
        None => None,
    };

    Ok(NodeResponse {
        id: node.id.clone(),
        title: node.title.clone(),
        content,
        tags: node.tags.clone(),
        links,
    })
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The dynamic tool catalog. Tools whose capability is unavailable (the
/// semantic `search` without an embedder) are omitted entirely; to the
/// client they do not exist.
pub fn catalog(core: &RouxCore) -> Vec<Value> {
    let mut tools = Vec::new();

    if core.has_embedder() {
        tools.push(serde_json::json!({
            "name": "search",
            "description": "Semantic search over the vault by meaning, not keywords",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Natural-language query" },
                    "limit": { "type": "integer", "description": "Max results (1-50, default 10)" },
                    "include_content": { "type": "boolean", "description": "Include truncated content (default false)" }
                },
                "required": ["query"]
            }
        }));
    }

    tools.extend([
        serde_json::json!({
            "name": "get_node",
            "description": "Fetch one node by id, optionally with its immediate neighborhood",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Node id (path relative to the vault)" },
                    "depth": { "type": "integer", "enum": [0, 1], "description": "0 = node only, 1 = with neighbors (default 0)" }
                },
                "required": ["id"]
            }
        }),
        serde_json::json!({
            "name": "get_neighbors",
            "description": "Nodes linked to or from the given id",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "direction": { "type": "string", "enum": ["in", "out", "both"], "description": "Default both" },
                    "limit": { "type": "integer", "description": "Max results (1-50, default 20)" },
                    "include_content": { "type": "boolean", "description": "Include truncated content (default false)" }
                },
                "required": ["id"]
            }
        }),
        serde_json::json!({
            "name": "find_path",
            "description": "Shortest link path from source to target",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "source": { "type": "string" },
                    "target": { "type": "string" }
                },
                "required": ["source", "target"]
            }
        }),
        serde_json::json!({
            "name": "get_hubs",
            "description": "Most-linked nodes by degree centrality",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "metric": { "type": "string", "enum": ["in_degree", "out_degree"], "description": "Default in_degree" },
                    "limit": { "type": "integer", "description": "Max results (1-50, default 10)" }
                }
            }
        }),
        serde_json::json!({
            "name": "search_by_tags",
            "description": "Nodes carrying the given tags",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tags": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
                    "mode": { "type": "string", "enum": ["any", "all"], "description": "Default any" },
                    "limit": { "type": "integer", "description": "Max results (1-100, default 20)" }
                },
                "required": ["tags"]
            }
        }),
        serde_json::json!({
            "name": "random_node",
            "description": "A uniformly random node, optionally filtered by tags",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tags": { "type": "array", "items": { "type": "string" } }
                }
            }
        }),
        serde_json::json!({
            "name": "list_nodes",
            "description": "Paginated node listing with tag and path filters",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tag": { "type": "string" },
                    "path": { "type": "string", "description": "Path prefix filter" },
                    "limit": { "type": "integer", "description": "Page size (1-1000, default 100)" },
                    "offset": { "type": "integer", "description": "Rows to skip (default 0)" }
                }
            }
        }),
        serde_json::json!({
            "name": "resolve_nodes",
            "description": "Resolve display names to node ids",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "names": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
                    "strategy": { "type": "string", "enum": ["exact", "fuzzy", "semantic"], "description": "Default fuzzy" },
                    "threshold": { "type": "number", "description": "Acceptance threshold in [0,1], default 0.7" },
                    "tag": { "type": "string", "description": "Candidate filter: tag" },
                    "path": { "type": "string", "description": "Candidate filter: path prefix" }
                },
                "required": ["names"]
            }
        }),
        serde_json::json!({
            "name": "nodes_exist",
            "description": "Check which of the given ids are real nodes",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "ids": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["ids"]
            }
        }),
        serde_json::json!({
            "name": "create_node",
            "description": "Create a new markdown node file",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Vault-relative path, must end in .md" },
                    "content": { "type": "string" },
                    "title": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["id", "content"]
            }
        }),
        serde_json::json!({
            "name": "update_node",
            "description": "Update an existing node's title, content, or tags",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "title": { "type": "string" },
                    "content": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["id"]
            }
        }),
        serde_json::json!({
            "name": "delete_node",
            "description": "Delete a node and its backing file",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" }
                },
                "required": ["id"]
            }
        }),
        serde_json::json!({
            "name": "get_stats",
            "description": "Vault statistics: node, ghost, edge, and tag counts",
            "inputSchema": { "type": "object", "properties": {} }
        }),
    ]);

    tools
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Route a tools/call to its handler. Tools hidden by capability gating are
/// indistinguishable from tools that never existed.
pub async fn dispatch(core: &RouxCore, name: &str, args: Option<Value>) -> Result<Value> {
    match name {
        "search" if core.has_embedder() => handle_search(core, args).await,
        "get_node" => handle_get_node(core, args),
        "get_neighbors" => handle_get_neighbors(core, args),
        "find_path" => handle_find_path(core, args),
        "get_hubs" => handle_get_hubs(core, args),
        "search_by_tags" => handle_search_by_tags(core, args),
        "random_node" => handle_random_node(core, args),
        "list_nodes" => handle_list_nodes(core, args),
        "resolve_nodes" => handle_resolve_nodes(core, args).await,
        "nodes_exist" => handle_nodes_exist(core, args),
        "create_node" => handle_create_node(core, args).await,
        "update_node" => handle_update_node(core, args).await,
        "delete_node" => handle_delete_node(core, args).await,
        "get_stats" => handle_get_stats(core),
        _ => Err(RouxError::InvalidInput(format!("unknown tool: {}", name))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(args: Option<Value>) -> Result<T> {
    let value = args.unwrap_or_else(|| serde_json::json!({}));
    serde_json::from_value(value)
        .map_err(|e| RouxError::InvalidInput(format!("invalid params: {}", e)))
}

fn check_range(value: i64, min: i64, max: i64, field: &str) -> Result<usize> {
    if value < min || value > max {
        return Err(RouxError::InvalidInput(format!(
            "'{}' must be between {} and {}, got {}",
            field, min, max, value
        )));
    }
    Ok(value as usize)
}

/// Configured cap on `limit` for the search-shaped tools. Wider surfaces
/// (tag search, listing) scale it; the defaults reproduce 50/100/1000.
fn search_cap(core: &RouxCore, factor: i64) -> i64 {
    (core.config().mcp.max_search_limit as i64).saturating_mul(factor).max(1)
}

fn parse_direction(raw: &str) -> Result<NeighborDirection> {
    match raw {
        "in" => Ok(NeighborDirection::In),
        "out" => Ok(NeighborDirection::Out),
        "both" => Ok(NeighborDirection::Both),
        other => Err(RouxError::InvalidInput(format!(
            "'direction' must be one of in, out, both; got {}",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_search(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        query: String,
        limit: Option<i64>,
        #[serde(default)]
        include_content: bool,
    }

    let params: Params = parse_params(args)?;
    if params.query.trim().is_empty() {
        return Err(RouxError::InvalidInput("'query' must not be empty".to_string()));
    }
    let max = search_cap(core, 1);
    let limit = check_range(params.limit.unwrap_or(10.min(max)), 1, max, "limit")?;

    let hits = core.search(&params.query, limit).await?;
    let content_limit = params.include_content.then_some(TRUNCATE_ROW);
    let results = hits
        .iter()
        .map(|hit| {
            Ok(SearchResultResponse {
                node: node_response(core, &hit.node, content_limit)?,
                score: hit.score,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(serde_json::to_value(results)?)
}

fn handle_get_node(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        id: String,
        depth: Option<i64>,
    }

    let params: Params = parse_params(args)?;
    let depth = params.depth.unwrap_or(0);
    if !(0..=1).contains(&depth) {
        return Err(RouxError::InvalidInput(format!(
            "'depth' must be 0 or 1, got {}",
            depth
        )));
    }
    let id = normalize_id(&params.id);

    if depth == 0 {
        return match core.get_node(&id)? {
            Some(node) => Ok(serde_json::to_value(node_response(
                core,
                &node,
                Some(TRUNCATE_PRIMARY),
            )?)?),
            None => Ok(Value::Null),
        };
    }

    match core.node_context(&id)? {
        Some(context) => {
            let shape_neighbors = |nodes: &[Node]| -> Result<Vec<NodeResponse>> {
                nodes
                    .iter()
                    .map(|n| node_response(core, n, Some(TRUNCATE_NESTED)))
                    .collect()
            };
            let response = NodeWithContextResponse {
                node: node_response(core, &context.node, Some(TRUNCATE_PRIMARY))?,
                incoming_neighbors: shape_neighbors(&context.incoming)?,
                outgoing_neighbors: shape_neighbors(&context.outgoing)?,
                incoming_count: context.incoming_count,
                outgoing_count: context.outgoing_count,
            };
            Ok(serde_json::to_value(response)?)
        }
        None => Ok(Value::Null),
    }
}

fn handle_get_neighbors(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        id: String,
        direction: Option<String>,
        limit: Option<i64>,
        #[serde(default)]
        include_content: bool,
    }

    let params: Params = parse_params(args)?;
    let direction = parse_direction(params.direction.as_deref().unwrap_or("both"))?;
    let max = search_cap(core, 1);
    let limit = check_range(params.limit.unwrap_or(20.min(max)), 1, max, "limit")?;
    let id = normalize_id(&params.id);

    let neighbors = core.neighbors(&id, direction, Some(limit))?;
    let content_limit = params.include_content.then_some(TRUNCATE_ROW);
    let results = neighbors
        .iter()
        .map(|n| node_response(core, n, content_limit))
        .collect::<Result<Vec<_>>>()?;

    Ok(serde_json::to_value(results)?)
}

fn handle_find_path(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        source: String,
        target: String,
    }

    let params: Params = parse_params(args)?;
    let source = normalize_id(&params.source);
    let target = normalize_id(&params.target);

    match core.find_path(&source, &target)? {
        Some(path) => {
            let length = path.len().saturating_sub(1);
            Ok(serde_json::to_value(PathResponse { path, length })?)
        }
        None => Ok(Value::Null),
    }
}

fn handle_get_hubs(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        metric: Option<String>,
        limit: Option<i64>,
    }

    let params: Params = parse_params(args)?;
    let metric = match params.metric.as_deref().unwrap_or("in_degree") {
        "in_degree" => HubMetric::InDegree,
        "out_degree" => HubMetric::OutDegree,
        // Documented fallback: the contract exposes degree metrics only.
        "pagerank" => HubMetric::InDegree,
        other => {
            return Err(RouxError::InvalidInput(format!(
                "'metric' must be in_degree or out_degree, got {}",
                other
            )))
        }
    };
    let limit = check_range(params.limit.unwrap_or(10), 1, 50, "limit")?;

    let hubs = core.hubs(metric, limit as i64)?;
    let ids: Vec<String> = hubs.iter().map(|(id, _)| id.clone()).collect();
    let titles = core.resolve_titles(&ids)?;

    let results: Vec<HubResponse> = hubs
        .into_iter()
        .map(|(id, score)| HubResponse {
            title: titles
                .get(&id)
                .cloned()
                .unwrap_or_else(|| roux_common::id_stem(&id).to_string()),
            id,
            score,
        })
        .collect();

    Ok(serde_json::to_value(results)?)
}

fn handle_search_by_tags(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        tags: Vec<String>,
        mode: Option<String>,
        limit: Option<i64>,
    }

    let params: Params = parse_params(args)?;
    if params.tags.is_empty() {
        return Err(RouxError::InvalidInput("'tags' must not be empty".to_string()));
    }
    let mode = match params.mode.as_deref().unwrap_or("any") {
        "any" => TagMode::Any,
        "all" => TagMode::All,
        other => {
            return Err(RouxError::InvalidInput(format!(
                "'mode' must be any or all, got {}",
                other
            )))
        }
    };
    let max = search_cap(core, 2);
    let limit = check_range(params.limit.unwrap_or(20.min(max)), 1, max, "limit")?;

    let nodes = core.search_by_tags(&params.tags, mode, Some(limit))?;
    let results = nodes
        .iter()
        .map(|n| node_response(core, n, None))
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_value(results)?)
}

fn handle_random_node(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        #[serde(default)]
        tags: Vec<String>,
    }

    let params: Params = parse_params(args)?;
    match core.random_node(&params.tags)? {
        Some(node) => Ok(serde_json::to_value(node_response(
            core,
            &node,
            Some(TRUNCATE_PRIMARY),
        )?)?),
        None => Ok(Value::Null),
    }
}

fn handle_list_nodes(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        tag: Option<String>,
        path: Option<String>,
        limit: Option<i64>,
        offset: Option<i64>,
    }

    let params: Params = parse_params(args)?;
    let max = search_cap(core, 20);
    let limit = check_range(params.limit.unwrap_or(100.min(max)), 1, max, "limit")?;
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(RouxError::InvalidInput(format!(
            "'offset' must be >= 0, got {}",
            offset
        )));
    }

    let page = core.list_nodes(
        params.tag.as_deref(),
        params.path.as_deref(),
        limit,
        offset as usize,
    )?;

    let summaries: Vec<NodeSummary> = page
        .nodes
        .into_iter()
        .map(|n| NodeSummary {
            id: n.id,
            title: n.title,
            tags: n.tags,
        })
        .collect();

    Ok(serde_json::json!({ "nodes": summaries, "total": page.total }))
}

async fn handle_resolve_nodes(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        names: Vec<String>,
        strategy: Option<String>,
        threshold: Option<f64>,
        tag: Option<String>,
        path: Option<String>,
    }

    let params: Params = parse_params(args)?;
    if params.names.is_empty() {
        return Err(RouxError::InvalidInput("'names' must not be empty".to_string()));
    }
    let strategy = match params.strategy.as_deref().unwrap_or("fuzzy") {
        "exact" => ResolveStrategyKind::Exact,
        "fuzzy" => ResolveStrategyKind::Fuzzy,
        "semantic" => ResolveStrategyKind::Semantic,
        other => {
            return Err(RouxError::InvalidInput(format!(
                "'strategy' must be exact, fuzzy, or semantic; got {}",
                other
            )))
        }
    };
    let threshold = params.threshold.unwrap_or(0.7);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(RouxError::InvalidInput(format!(
            "'threshold' must be within [0, 1], got {}",
            threshold
        )));
    }

    let filter = CandidateFilter {
        tag: params.tag,
        path: params.path,
    };
    let matches = core
        .resolve_nodes(&params.names, strategy, threshold, &filter)
        .await?;

    let results: Vec<Value> = matches
        .into_iter()
        .map(|m| {
            serde_json::json!({
                "query": m.query,
                "match_id": m.match_id,
                "score": m.score,
            })
        })
        .collect();
    Ok(Value::Array(results))
}

fn handle_nodes_exist(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        ids: Vec<String>,
    }

    let params: Params = parse_params(args)?;
    let exists = core.nodes_exist(&params.ids)?;
    Ok(serde_json::to_value(exists)?)
}

async fn handle_create_node(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        id: String,
        content: String,
        title: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
    }

    let params: Params = parse_params(args)?;
    if !params.id.to_lowercase().ends_with(".md") {
        return Err(RouxError::InvalidInput(format!(
            "'id' must end in .md, got {}",
            params.id
        )));
    }

    let node = core
        .create_node(CreateNode {
            id: params.id,
            content: params.content,
            title: params.title,
            tags: params.tags,
            properties: serde_json::Map::new(),
        })
        .await?;

    Ok(serde_json::to_value(node_response(
        core,
        &node,
        Some(TRUNCATE_PRIMARY),
    )?)?)
}

async fn handle_update_node(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        id: String,
        title: Option<String>,
        content: Option<String>,
        tags: Option<Vec<String>>,
    }

    let params: Params = parse_params(args)?;
    if params.title.is_none() && params.content.is_none() && params.tags.is_none() {
        return Err(RouxError::InvalidInput(
            "update requires at least one of title, content, tags".to_string(),
        ));
    }

    let node = core
        .update_node(
            &params.id,
            UpdateNode {
                title: params.title,
                content: params.content,
                tags: params.tags,
                properties: None,
            },
        )
        .await?;

    Ok(serde_json::to_value(node_response(
        core,
        &node,
        Some(TRUNCATE_PRIMARY),
    )?)?)
}

async fn handle_delete_node(core: &RouxCore, args: Option<Value>) -> Result<Value> {
    #[derive(Deserialize)]
    struct Params {
        id: String,
    }

    let params: Params = parse_params(args)?;
    let deleted = core.delete_node(&params.id).await?;
    Ok(serde_json::json!({ "deleted": deleted }))
}

fn handle_get_stats(core: &RouxCore) -> Result<Value> {
    let stats = core.stats()?;
    Ok(serde_json::json!({
        "nodes": stats.nodes,
        "ghosts": stats.ghosts,
        "edges": stats.edges,
        "tags": stats.tags,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_marks_cut_content() {
        assert_eq!(truncate("short", 10), "short");
        let long = "x".repeat(30);
        let cut = truncate(&long, 10);
        assert_eq!(cut, format!("{}... [truncated]", "x".repeat(10)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllö wörld döcument";
        let cut = truncate(text, 5);
        assert!(cut.starts_with("héllö"));
        assert!(cut.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn test_check_range() {
        assert_eq!(check_range(10, 1, 50, "limit").unwrap(), 10);
        assert!(check_range(0, 1, 50, "limit").is_err());
        assert!(check_range(51, 1, 50, "limit").is_err());
        let err = check_range(-3, 1, 50, "limit").unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn test_parse_direction() {
        assert_eq!(parse_direction("in").unwrap(), NeighborDirection::In);
        assert_eq!(parse_direction("both").unwrap(), NeighborDirection::Both);
        assert!(parse_direction("sideways").is_err());
    }
}
