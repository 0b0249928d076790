#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{Edge, ShareLevel, Uri, UserUris, Vertex};
use trellis_graph::neighbors::recount;
use trellis_graph::{ElementCreation, GraphContext, MemoryStore, UserGraph};

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub ctx: GraphContext,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let ctx = GraphContext::new(store.clone());
        Self { store, ctx }
    }

    pub fn graph_of(&self, username: &str) -> UserGraph {
        UserGraph::new(self.ctx.clone(), UserUris::for_username(username).unwrap())
    }
}

pub async fn vertex(graph: &UserGraph, label: &str, level: ShareLevel) -> Vertex {
    graph
        .create_vertex(ElementCreation::labeled(label).share_level(level))
        .await
        .unwrap()
}

pub async fn edge(graph: &UserGraph, source: &Vertex, destination: &Vertex, level: ShareLevel) -> Edge {
    graph
        .create_edge(
            source.uri(),
            destination.uri(),
            ElementCreation::default().share_level(level),
        )
        .await
        .unwrap()
}

pub fn stored_vertex(store: &MemoryStore, uri: &Uri) -> Vertex {
    store
        .all_vertices()
        .into_iter()
        .find(|v| v.uri() == uri)
        .unwrap()
}

/// Every stored counter equals a recount from the stored edges.
pub fn assert_counters_exact(store: &MemoryStore) {
    let vertices = store.all_vertices();
    let edges = store.all_edges();
    let levels: HashMap<Uri, ShareLevel> = vertices
        .iter()
        .map(|v| (v.uri().clone(), v.share_level()))
        .collect();
    for vertex in &vertices {
        let expected = recount(vertex.uri(), &edges, &levels);
        assert_eq!(
            vertex.neighbor_counts, expected,
            "counters of {} ({}) drifted",
            vertex.element.label,
            vertex.uri()
        );
        assert!(vertex.neighbor_counts.is_consistent());
    }
}
