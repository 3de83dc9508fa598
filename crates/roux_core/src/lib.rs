//! Core engine for Roux
//!
//! This crate projects a vault of interlinked markdown files into a typed
//! graph: parsing, link resolution, the SQLite side-car cache with its
//! embedded vector index, the in-memory graph mirror, the reconcile loop,
//! and the orchestration layer consumed by the MCP tool handlers.

pub mod cache;
pub mod core;
pub mod embedder;
pub mod mirror;
pub mod parser;
pub mod resolver;
pub mod store;
pub mod vector;
pub mod watcher;

// Re-exports
pub use crate::core::{ResolveStrategyKind, RouxCore, SearchHit};
pub use cache::{Cache, CentralityRow, ListPage, TagMode};
pub use embedder::Embedder;
pub use mirror::{GraphMirror, HubMetric, NeighborDirection};
pub use store::{
    CandidateFilter, CreateNode, NodeContext, ResolveMatch, Store, UpdateNode, VaultStats,
    CONTEXT_NEIGHBOR_CAP,
};
pub use watcher::{ChangeCallback, WatchHandle};

#[cfg(feature = "embeddings")]
pub use embedder::LocalEmbedder;
