//! trellis-core: Shared types, configuration, and error handling for Trellis.
//!
//! This crate provides the foundational types used across all Trellis components:
//! - Owner-namespaced URIs and the namespace that mints them
//! - Share levels and per-tier neighbor counters
//! - Graph elements (vertices, edges, tags, schemas) and subgraph snapshots
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod types;
pub mod uri;

pub use error::CoreError;
pub use types::{
    Edge, EdgeStub, ElementKind, GraphElement, Image, NeighborCounts, Schema, ShareLevel,
    SubGraph, Suggestion, Tag, TierDelta, Vertex, VertexStub,
};
pub use uri::{Uri, UserUris};
