//! Common types and errors for Roux
//!
//! This crate provides the node data model, error taxonomy, and shared
//! utilities used across all Roux components.

pub mod warnings;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error types for Roux operations
#[derive(Error, Debug)]
pub enum RouxError {
    #[error("node already exists: {id}")]
    NodeExists { id: String },

    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    #[error("link integrity violation: {0}")]
    LinkIntegrity(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("graph mirror not ready; reconcile has not run yet")]
    NotReady,

    #[error("case collision between files: {a} and {b}")]
    CaseCollision { a: String, b: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Cache(#[from] rusqlite::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RouxError>;

/// Origin tag for a node: a watched file, or a direct write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceRef {
    /// Backed by a file under the source root. `path` keeps the on-disk
    /// casing; the node id is the lowercased form.
    File { path: String, modified_ms: i64 },
    /// Written through the create/update tools.
    Api,
    /// Injected programmatically (tests, scripts).
    Manual,
}

impl SourceRef {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceRef::File { .. } => "file",
            SourceRef::Api => "api",
            SourceRef::Manual => "manual",
        }
    }
}

/// The canonical node record.
///
/// `content = None` is the ghost sentinel: the id is referenced by at least
/// one outgoing link but has no backing file. Ghosts live only in the graph
/// mirror and are never persisted to the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Lowercase path relative to the source root, extension included.
    pub id: String,

    /// Display name: frontmatter `title`, else first ATX heading, else the
    /// filename stem.
    pub title: String,

    /// Full text body after stripping frontmatter.
    pub content: Option<String>,

    /// Lowercased tags, duplicates removed, insertion order kept.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Resolved outgoing link ids, duplicates removed, order kept. Targets
    /// without a backing file still appear here as ghost ids.
    #[serde(default)]
    pub outgoing_links: Vec<String>,

    /// Frontmatter fields minus the reserved keys `id`, `title`, `tags`.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,

    /// Where this node came from.
    pub source: SourceRef,

    /// SHA256 of `content`; used to skip re-embedding unchanged text.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl Node {
    pub fn is_ghost(&self) -> bool {
        self.content.is_none()
    }
}

/// Frontmatter keys extracted into dedicated node fields; they never appear
/// in `properties`.
pub const RESERVED_KEYS: [&str; 3] = ["id", "title", "tags"];

/// Normalize a raw id or vault-relative path to canonical form: lowercase,
/// forward slashes, no leading `./`.
pub fn normalize_id(raw: &str) -> String {
    let mut s = raw.replace('\\', "/").to_lowercase();
    while let Some(stripped) = s.strip_prefix("./") {
        s = stripped.to_string();
    }
    s
}

/// Filename stem of an id: the final path component with its extension
/// removed. Used for ghost titles and as the title fallback of last resort.
pub fn id_stem(id: &str) -> &str {
    let base = id.rsplit('/').next().unwrap_or(id);
    match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id("Notes/Research.md"), "notes/research.md");
        assert_eq!(normalize_id(r"Notes\Research.md"), "notes/research.md");
        assert_eq!(normalize_id("./a/b.md"), "a/b.md");
        assert_eq!(normalize_id("././a.md"), "a.md");
    }

    #[test]
    fn test_id_stem() {
        assert_eq!(id_stem("notes/research.md"), "research");
        assert_eq!(id_stem("a.md"), "a");
        assert_eq!(id_stem("no-extension"), "no-extension");
        assert_eq!(id_stem(".hidden"), ".hidden");
    }

    #[test]
    fn test_source_ref_kind() {
        let file = SourceRef::File {
            path: "A.md".to_string(),
            modified_ms: 0,
        };
        assert_eq!(file.kind(), "file");
        assert_eq!(SourceRef::Api.kind(), "api");
        assert_eq!(SourceRef::Manual.kind(), "manual");
    }
}
