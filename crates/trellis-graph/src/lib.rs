//! trellis-graph: the graph-consistency engine.
//!
//! Bounded, visibility-filtered subgraph extraction, cycle-safe forking
//! into another owner's graph, and per-tier neighbor counters kept exact
//! on every edge mutation. Storage sits behind [`GraphStore`], with a Neo4j
//! backend ([`GraphClient`]) and an in-memory one ([`MemoryStore`]).

pub mod client;
pub mod error;
pub mod extractor;
pub mod fields;
pub mod fork;
pub mod locks;
pub mod neighbors;
pub mod operators;
pub mod store;
pub mod user_graph;

pub use client::{GraphClient, GraphConfig};
pub use error::{ErrorKind, GraphError, Result};
pub use extractor::{extract, SubGraphQuery};
pub use fork::{ForkCache, ForkEngine, ForkOptions, ForkSource, ForkedElement};
pub use locks::VertexLocks;
pub use operators::{
    CounterCheck, EdgeCreation, EdgeOperator, ElementCreation, ElementState, GraphContext,
    SchemaCreation, SchemaOperator, VertexCreation, VertexOperator,
};
pub use store::{
    ElementPatch, Endpoint, GraphStore, MemoryStore, Mutation, Snapshot, WriteBatch,
};
pub use user_graph::UserGraph;
