//! SQLite side-car cache.
//!
//! Authoritative persistence for nodes, link adjacency, tags, embeddings,
//! and centrality. Lives at `<sidecar>/cache.db`; the schema is applied on
//! open and the whole file is regenerable from the source tree.

use crate::vector;
use roux_common::warnings::WarningBuffer;
use roux_common::{Node, Result, RouxError, SourceRef};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;

/// Tag-filter combination mode for `search_by_tags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMode {
    Any,
    All,
}

/// One page of `list_nodes` results plus the pre-pagination total.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub nodes: Vec<Node>,
    pub total: usize,
}

/// Persisted centrality row.
#[derive(Debug, Clone, PartialEq)]
pub struct CentralityRow {
    pub in_degree: i64,
    pub out_degree: i64,
    pub pagerank: f64,
    pub computed_at_ms: i64,
}

/// Cache manager over a single rusqlite connection.
pub struct Cache {
    conn: Connection,
}

impl Cache {
    /// Open or create the cache database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory cache, used by unit tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute_batch(include_str!("schema.sql"))?;
        tracing::debug!("cache schema ready");
        Ok(Self { conn })
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Insert or replace a node in a single transaction, rebuilding its
    /// tags_index rows.
    pub fn upsert_node(&mut self, node: &Node) -> Result<()> {
        let tx = self.conn.transaction()?;
        upsert_node_tx(&tx, node)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a node; cascades to tags_index, embeddings, and centrality.
    /// No-op when the id is absent.
    pub fn delete_node(&mut self, id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM nodes WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Apply a reconcile batch atomically: every upsert and delete commits
    /// together or not at all.
    pub fn apply_batch(&mut self, upserts: &[Node], deletes: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for id in deletes {
            tx.execute("DELETE FROM nodes WHERE id = ?1", [id.as_str()])?;
        }
        for node in upserts {
            upsert_node_tx(&tx, node)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        self.conn
            .query_row(
                "SELECT id, title, content, tags_json, outgoing_links_json,
                        properties_json, source_kind, source_path,
                        source_modified_ms, content_hash
                 FROM nodes WHERE id = ?1",
                [id],
                row_to_node,
            )
            .optional()
            .map_err(RouxError::from)
    }

    /// Fetch nodes in request order; missing ids are collapsed out.
    pub fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.get_node(id)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// Filtered, paginated listing. `total` counts matches before LIMIT and
    /// OFFSET are applied.
    pub fn list_nodes(
        &self,
        tag: Option<&str>,
        path_prefix: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<ListPage> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(tag) = tag {
            clauses.push(
                "EXISTS (SELECT 1 FROM tags_index t WHERE t.node_id = nodes.id AND t.tag = ?)"
                    .to_string(),
            );
            args.push(Box::new(tag.to_lowercase()));
        }
        if let Some(prefix) = path_prefix {
            clauses.push("id LIKE ? ESCAPE '\\'".to_string());
            args.push(Box::new(format!("{}%", escape_like(&prefix.to_lowercase()))));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let params_ref: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM nodes{}", where_sql),
            params_ref.as_slice(),
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, title, content, tags_json, outgoing_links_json,
                    properties_json, source_kind, source_path,
                    source_modified_ms, content_hash
             FROM nodes{} ORDER BY id LIMIT {} OFFSET {}",
            where_sql, limit as i64, offset as i64
        ))?;

        let nodes = stmt
            .query_map(params_ref.as_slice(), row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ListPage {
            nodes,
            total: total as usize,
        })
    }

    /// Distinct nodes carrying the given tags. `All` intersects at the SQL
    /// level; `limit` is applied in SQL too.
    pub fn search_by_tags(
        &self,
        tags: &[String],
        mode: TagMode,
        limit: Option<usize>,
    ) -> Result<Vec<Node>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let lowered: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        let placeholders = vec!["?"; lowered.len()].join(", ");
        let limit_sql = match limit {
            Some(n) => format!(" LIMIT {}", n as i64),
            None => String::new(),
        };

        let sql = match mode {
            TagMode::Any => format!(
                "SELECT DISTINCT n.id, n.title, n.content, n.tags_json,
                        n.outgoing_links_json, n.properties_json, n.source_kind,
                        n.source_path, n.source_modified_ms, n.content_hash
                 FROM nodes n JOIN tags_index t ON t.node_id = n.id
                 WHERE t.tag IN ({}) ORDER BY n.id{}",
                placeholders, limit_sql
            ),
            TagMode::All => format!(
                "SELECT n.id, n.title, n.content, n.tags_json,
                        n.outgoing_links_json, n.properties_json, n.source_kind,
                        n.source_path, n.source_modified_ms, n.content_hash
                 FROM nodes n JOIN tags_index t ON t.node_id = n.id
                 WHERE t.tag IN ({})
                 GROUP BY n.id HAVING COUNT(DISTINCT t.tag) = {}
                 ORDER BY n.id{}",
                placeholders,
                lowered.len(),
                limit_sql
            ),
        };

        let params_ref: Vec<&dyn rusqlite::ToSql> =
            lowered.iter().map(|t| t as &dyn rusqlite::ToSql).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params_ref.as_slice(), row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Every stored node, ordered by id. Feeds the graph mirror rebuild.
    pub fn all_nodes(&self) -> Result<Vec<Node>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, tags_json, outgoing_links_json,
                    properties_json, source_kind, source_path,
                    source_modified_ms, content_hash
             FROM nodes ORDER BY id",
        )?;
        let nodes = stmt
            .query_map([], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Every stored id, ordered. The resolver snapshot.
    pub fn all_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM nodes ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Unpaginated filtered listing, used to gather resolution candidates.
    pub fn find_candidates(
        &self,
        tag: Option<&str>,
        path_prefix: Option<&str>,
    ) -> Result<Vec<Node>> {
        // SQLite treats LIMIT -1 as unlimited.
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, tags_json, outgoing_links_json,
                    properties_json, source_kind, source_path,
                    source_modified_ms, content_hash
             FROM nodes
             WHERE (?1 IS NULL
                    OR EXISTS (SELECT 1 FROM tags_index t
                               WHERE t.node_id = nodes.id AND t.tag = ?1))
               AND (?2 IS NULL OR id LIKE ?2 ESCAPE '\\')
             ORDER BY id",
        )?;
        let tag = tag.map(|t| t.to_lowercase());
        let prefix = path_prefix.map(|p| format!("{}%", escape_like(&p.to_lowercase())));
        let nodes = stmt
            .query_map(params![tag, prefix], row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    pub fn node_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn distinct_tag_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(DISTINCT tag) FROM tags_index", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Embeddings (the brute-force vector index)
    // ------------------------------------------------------------------

    /// Store or replace a node's embedding.
    ///
    /// The first stored vector fixes the index dimension; later stores must
    /// match it unless they overwrite an existing id (the migration path) or
    /// the index is empty again.
    pub fn store_embedding(&mut self, id: &str, vec: &[f32], model: &str) -> Result<()> {
        vector::validate_vector(vec, "stored")?;

        if let Some(dim) = self.embedding_dimension()? {
            if vec.len() != dim && !self.has_embedding(id)? {
                return Err(RouxError::Provider(format!(
                    "embedding dimension mismatch: index holds {}-dim vectors, got {}",
                    dim,
                    vec.len()
                )));
            }
        }

        self.conn.execute(
            "INSERT INTO embeddings (node_id, model, vector) VALUES (?1, ?2, ?3)
             ON CONFLICT(node_id) DO UPDATE SET
                model = excluded.model,
                vector = excluded.vector",
            params![id, model, vector::encode_vector(vec)],
        )?;
        Ok(())
    }

    /// Top-k scan by ascending cosine distance. `k = 0` returns empty.
    pub fn search_by_vector(
        &self,
        query: &[f32],
        k: usize,
        warnings: &WarningBuffer,
    ) -> Result<Vec<(String, f32)>> {
        vector::validate_vector(query, "query")?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare("SELECT node_id, model, vector FROM embeddings")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut scored: Vec<(String, f32)> = Vec::new();
        let mut models: std::collections::HashSet<String> = std::collections::HashSet::new();

        for row in rows {
            let (node_id, model, blob) = row?;
            let stored = vector::decode_vector(&blob)?;
            if stored.len() != query.len() {
                return Err(RouxError::Provider(format!(
                    "query dimension {} does not match stored dimension {}",
                    query.len(),
                    stored.len()
                )));
            }
            models.insert(model);
            scored.push((node_id, vector::cosine_distance(&stored, query)));
        }

        if models.len() > 1 {
            vector::warn_mixed_models_once(warnings);
        }

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Idempotent embedding removal.
    pub fn delete_embedding(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM embeddings WHERE node_id = ?1", [id])?;
        Ok(())
    }

    pub fn has_embedding(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM embeddings WHERE node_id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn embedding_model(&self, id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT model FROM embeddings WHERE node_id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(RouxError::from)
    }

    /// Dimension of the stored vectors, or None when the index is empty.
    pub fn embedding_dimension(&self) -> Result<Option<usize>> {
        let len: Option<i64> = self
            .conn
            .query_row("SELECT LENGTH(vector) FROM embeddings LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(len.map(|bytes| bytes as usize / 4))
    }

    // ------------------------------------------------------------------
    // Centrality
    // ------------------------------------------------------------------

    /// Replace the whole centrality table with the rows of the latest
    /// reconcile. `rows` maps id -> (in_degree, out_degree).
    pub fn replace_centrality(
        &mut self,
        rows: &[(String, usize, usize)],
        computed_at_ms: i64,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM centrality", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO centrality (node_id, in_degree, out_degree, pagerank, computed_at_ms)
                 VALUES (?1, ?2, ?3, 0.0, ?4)",
            )?;
            for (id, in_degree, out_degree) in rows {
                stmt.execute(params![
                    id,
                    *in_degree as i64,
                    *out_degree as i64,
                    computed_at_ms
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_centrality(&self, id: &str) -> Result<Option<CentralityRow>> {
        self.conn
            .query_row(
                "SELECT in_degree, out_degree, pagerank, computed_at_ms
                 FROM centrality WHERE node_id = ?1",
                [id],
                |row| {
                    Ok(CentralityRow {
                        in_degree: row.get(0)?,
                        out_degree: row.get(1)?,
                        pagerank: row.get(2)?,
                        computed_at_ms: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(RouxError::from)
    }
}

fn upsert_node_tx(tx: &Transaction<'_>, node: &Node) -> Result<()> {
    let content = node.content.as_deref().ok_or_else(|| {
        RouxError::InvalidInput(format!("refusing to persist ghost node {}", node.id))
    })?;

    let (source_kind, source_path, source_modified_ms) = match &node.source {
        SourceRef::File { path, modified_ms } => ("file", Some(path.clone()), Some(*modified_ms)),
        SourceRef::Api => ("api", None, None),
        SourceRef::Manual => ("manual", None, None),
    };

    tx.execute(
        "INSERT INTO nodes (id, title, content, tags_json, outgoing_links_json,
                            properties_json, source_kind, source_path,
                            source_modified_ms, content_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            tags_json = excluded.tags_json,
            outgoing_links_json = excluded.outgoing_links_json,
            properties_json = excluded.properties_json,
            source_kind = excluded.source_kind,
            source_path = excluded.source_path,
            source_modified_ms = excluded.source_modified_ms,
            content_hash = excluded.content_hash",
        params![
            node.id,
            node.title,
            content,
            serde_json::to_string(&node.tags)?,
            serde_json::to_string(&node.outgoing_links)?,
            serde_json::to_string(&node.properties)?,
            source_kind,
            source_path,
            source_modified_ms,
            node.content_hash,
        ],
    )?;

    tx.execute("DELETE FROM tags_index WHERE node_id = ?1", [node.id.as_str()])?;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO tags_index (node_id, tag) VALUES (?1, ?2)")?;
        for tag in &node.tags {
            stmt.execute(params![node.id, tag])?;
        }
    }
    Ok(())
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let tags_json: String = row.get(3)?;
    let links_json: String = row.get(4)?;
    let properties_json: String = row.get(5)?;
    let source_kind: String = row.get(6)?;

    let source = match source_kind.as_str() {
        "file" => SourceRef::File {
            path: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            modified_ms: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
        },
        "manual" => SourceRef::Manual,
        _ => SourceRef::Api,
    };

    Ok(Node {
        id: row.get(0)?,
        title: row.get(1)?,
        content: Some(row.get::<_, String>(2)?),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        outgoing_links: serde_json::from_str(&links_json).unwrap_or_default(),
        properties: serde_json::from_str(&properties_json).unwrap_or_default(),
        source,
        content_hash: row.get(9)?,
    })
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
