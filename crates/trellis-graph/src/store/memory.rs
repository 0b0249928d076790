//! In-memory graph element store.
//!
//! Records live in hash maps behind a single `RwLock`, shared through an
//! `Arc` so a [`Snapshot`] is a cheap handle on the state it was opened
//! against. A batch is applied in place while a journal records the prior
//! value of every record it touches; if any mutation fails the journal is
//! replayed backwards and the batch leaves no trace. Writing while a
//! snapshot is open copies the maps once, leaving the snapshot untouched.
//!
//! Use this backend for:
//! - Exercising the engine without a Neo4j server
//! - Embedding Trellis where persistence is not needed

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use trellis_core::{Edge, GraphElement, Schema, Tag, Uri, Vertex};

use super::{Endpoint, GraphStore, Mutation, Snapshot, WriteBatch};
use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    vertices: HashMap<Uri, Vertex>,
    edges: HashMap<Uri, Edge>,
    /// Tag registry; elements hold copies of the tags they are linked to.
    tags: HashMap<Uri, Tag>,
    /// Schemas own their properties.
    schemas: HashMap<Uri, Schema>,
}

/// In-memory implementation of [`GraphStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Arc<MemoryState>>,
    /// Fail the next batch once this many of its mutations have been applied.
    fail_after: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` fail with `StoreUnavailable` after `mutations`
    /// mutations, as a dropped connection mid-transaction would.
    pub fn fail_after(&self, mutations: usize) {
        *self.fail_after.lock() = Some(mutations);
    }

    pub fn vertex_count(&self) -> usize {
        self.state.read().vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }

    pub fn schema_count(&self) -> usize {
        self.state.read().schemas.len()
    }

    /// Every stored vertex, ordered by URI.
    pub fn all_vertices(&self) -> Vec<Vertex> {
        let state = self.state.read();
        let mut vertices: Vec<Vertex> = state.vertices.values().cloned().collect();
        vertices.sort_by(|a, b| a.uri().cmp(b.uri()));
        vertices
    }

    /// Every stored edge, ordered by URI.
    pub fn all_edges(&self) -> Vec<Edge> {
        let state = self.state.read();
        let mut edges: Vec<Edge> = state.edges.values().cloned().collect();
        edges.sort_by(|a, b| a.uri().cmp(b.uri()));
        edges
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn vertices(&self, uris: &[Uri]) -> Result<Vec<Vertex>> {
        Ok(self.state.read().vertices_of(uris))
    }

    async fn edges(&self, uris: &[Uri]) -> Result<Vec<Edge>> {
        let state = self.state.read();
        let mut seen = BTreeSet::new();
        Ok(uris
            .iter()
            .filter(|uri| seen.insert(*uri))
            .filter_map(|uri| state.edges.get(uri).cloned())
            .collect())
    }

    async fn incident_edges(&self, vertices: &[Uri]) -> Result<Vec<Edge>> {
        Ok(self.state.read().incident_edges_of(vertices))
    }

    async fn schemas(&self, uris: &[Uri]) -> Result<Vec<Schema>> {
        let state = self.state.read();
        let mut seen = BTreeSet::new();
        Ok(uris
            .iter()
            .filter(|uri| seen.insert(*uri))
            .filter_map(|uri| state.schemas.get(uri).cloned())
            .collect())
    }

    async fn element_exists(&self, uri: &Uri) -> Result<bool> {
        let state = self.state.read();
        Ok(state.slot_of(uri).is_some() || state.tags.contains_key(uri))
    }

    async fn any_vertex_of(&self, username: &str) -> Result<Option<Uri>> {
        let state = self.state.read();
        Ok(state
            .vertices
            .keys()
            .filter(|uri| uri.owner_username() == username)
            .min()
            .cloned())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let fail_after = self.fail_after.lock().take();

        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut guard);
        let mut journal = Journal::default();
        for (applied, mutation) in batch.into_iter().enumerate() {
            let outcome = if fail_after == Some(applied) {
                Err(GraphError::StoreUnavailable(
                    "injected failure: connection lost".to_string(),
                ))
            } else {
                state.apply(mutation, &mut journal)
            };
            if let Err(err) = outcome {
                tracing::debug!(
                    applied,
                    undone = journal.len(),
                    "Batch failed, restoring prior records"
                );
                state.restore(journal);
                return Err(err);
            }
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<Box<dyn Snapshot>> {
        Ok(Box::new(MemorySnapshot {
            state: Arc::clone(&self.state.read()),
        }))
    }
}

/// The state as it was when the snapshot was opened.
struct MemorySnapshot {
    state: Arc<MemoryState>,
}

#[async_trait]
impl Snapshot for MemorySnapshot {
    async fn vertices(&mut self, uris: &[Uri]) -> Result<Vec<Vertex>> {
        Ok(self.state.vertices_of(uris))
    }

    async fn incident_edges(&mut self, vertices: &[Uri]) -> Result<Vec<Edge>> {
        Ok(self.state.incident_edges_of(vertices))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

// ── Undo journal ─────────────────────────────────────────────────

/// A record as it was before the batch first touched it.
#[derive(Debug)]
enum Prior {
    Vertex(Uri, Option<Vertex>),
    Edge(Uri, Option<Edge>),
    Tag(Uri, Option<Tag>),
    Schema(Uri, Option<Schema>),
}

#[derive(Debug, Default)]
struct Journal(Vec<Prior>);

impl Journal {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn vertex(&mut self, uri: &Uri, state: &MemoryState) {
        self.0
            .push(Prior::Vertex(uri.clone(), state.vertices.get(uri).cloned()));
    }

    fn edge(&mut self, uri: &Uri, state: &MemoryState) {
        self.0.push(Prior::Edge(uri.clone(), state.edges.get(uri).cloned()));
    }

    fn tag(&mut self, uri: &Uri, state: &MemoryState) {
        self.0.push(Prior::Tag(uri.clone(), state.tags.get(uri).cloned()));
    }

    fn schema(&mut self, uri: &Uri, state: &MemoryState) {
        self.0
            .push(Prior::Schema(uri.clone(), state.schemas.get(uri).cloned()));
    }
}

fn put_back<T>(map: &mut HashMap<Uri, T>, uri: Uri, prior: Option<T>) {
    match prior {
        Some(record) => {
            map.insert(uri, record);
        }
        None => {
            map.remove(&uri);
        }
    }
}

/// Where an element URI is stored.
enum Slot {
    Vertex,
    Edge,
    /// The schema itself or one of its properties; holds the schema URI.
    Schema(Uri),
}

// ── State ────────────────────────────────────────────────────────

impl MemoryState {
    fn vertices_of(&self, uris: &[Uri]) -> Vec<Vertex> {
        let mut seen = BTreeSet::new();
        uris.iter()
            .filter(|uri| seen.insert(*uri))
            .filter_map(|uri| self.vertices.get(uri).cloned())
            .collect()
    }

    fn incident_edges_of(&self, vertices: &[Uri]) -> Vec<Edge> {
        let wanted: BTreeSet<&Uri> = vertices.iter().collect();
        let mut edges: Vec<Edge> = self
            .edges
            .values()
            .filter(|e| wanted.contains(&e.source) || wanted.contains(&e.destination))
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.uri().cmp(b.uri()));
        edges
    }

    fn slot_of(&self, uri: &Uri) -> Option<Slot> {
        if self.vertices.contains_key(uri) {
            Some(Slot::Vertex)
        } else if self.edges.contains_key(uri) {
            Some(Slot::Edge)
        } else {
            self.schemas
                .values()
                .find(|s| s.uri() == uri || s.properties.contains_key(uri))
                .map(|s| Slot::Schema(s.uri().clone()))
        }
    }

    fn apply(&mut self, mutation: Mutation, journal: &mut Journal) -> Result<()> {
        match mutation {
            Mutation::CreateVertex(vertex) => {
                self.ensure_unused(vertex.uri())?;
                self.register_tags(&vertex.element.tags, journal);
                journal.vertex(vertex.uri(), self);
                self.vertices.insert(vertex.uri().clone(), vertex);
            }
            Mutation::CreateEdge(edge) => {
                self.ensure_unused(edge.uri())?;
                for end in [&edge.source, &edge.destination] {
                    if !self.vertices.contains_key(end) {
                        return Err(GraphError::missing_vertex(end));
                    }
                }
                self.register_tags(&edge.element.tags, journal);
                journal.edge(edge.uri(), self);
                self.edges.insert(edge.uri().clone(), edge);
            }
            Mutation::UpdateElement { uri, patch, at } => {
                patch.apply_to(self.element_mut(&uri, journal)?, at);
            }
            Mutation::AdjustNeighborCounts { vertex, delta } => {
                journal.vertex(&vertex, self);
                let target = self
                    .vertices
                    .get_mut(&vertex)
                    .ok_or_else(|| GraphError::missing_vertex(&vertex))?;
                target.neighbor_counts.apply(delta);
            }
            Mutation::SetEndpoint {
                edge,
                endpoint,
                vertex,
                at,
            } => {
                if !self.vertices.contains_key(&vertex) {
                    return Err(GraphError::missing_vertex(&vertex));
                }
                journal.edge(&edge, self);
                let target = self
                    .edges
                    .get_mut(&edge)
                    .ok_or_else(|| GraphError::not_found(&edge))?;
                match endpoint {
                    Endpoint::Source => target.source = vertex,
                    Endpoint::Destination => target.destination = vertex,
                }
                target.element.last_modification_date = at;
            }
            Mutation::SwapEndpoints { edge, at } => {
                journal.edge(&edge, self);
                let target = self
                    .edges
                    .get_mut(&edge)
                    .ok_or_else(|| GraphError::not_found(&edge))?;
                std::mem::swap(&mut target.source, &mut target.destination);
                target.element.last_modification_date = at;
            }
            Mutation::AttachTag { element, tag } => {
                journal.tag(&tag.uri, self);
                let tag = self.tags.entry(tag.uri.clone()).or_insert(tag).clone();
                let target = self.element_mut(&element, journal)?;
                target.tags.insert(tag.uri.clone(), tag);
            }
            Mutation::DetachTag { element, tag } => {
                self.element_mut(&element, journal)?.tags.remove(&tag);
            }
            Mutation::DeleteEdge(uri) => {
                journal.edge(&uri, self);
                self.edges
                    .remove(&uri)
                    .ok_or_else(|| GraphError::not_found(&uri))?;
            }
            Mutation::DeleteVertex(uri) => {
                if self.edges.values().any(|e| e.touches(&uri)) {
                    return Err(GraphError::ReferentialIntegrity {
                        uri: uri.to_string(),
                        reason: "vertex still has edges".to_string(),
                    });
                }
                journal.vertex(&uri, self);
                self.vertices
                    .remove(&uri)
                    .ok_or_else(|| GraphError::not_found(&uri))?;
            }
            Mutation::CreateSchema(schema) => {
                self.ensure_unused(schema.uri())?;
                for property in schema.properties.keys() {
                    self.ensure_unused(property)?;
                }
                self.register_tags(&schema.element.tags, journal);
                for property in schema.properties.values() {
                    self.register_tags(&property.tags, journal);
                }
                journal.schema(schema.uri(), self);
                self.schemas.insert(schema.uri().clone(), schema);
            }
            Mutation::AddSchemaProperty { schema, property } => {
                self.ensure_unused(&property.uri)?;
                if !self.schemas.contains_key(&schema) {
                    return Err(GraphError::not_found(&schema));
                }
                self.register_tags(&property.tags, journal);
                journal.schema(&schema, self);
                if let Some(target) = self.schemas.get_mut(&schema) {
                    target.add_property(property);
                }
            }
        }
        Ok(())
    }

    /// Undo a partially applied batch, newest change first.
    fn restore(&mut self, journal: Journal) {
        for prior in journal.0.into_iter().rev() {
            match prior {
                Prior::Vertex(uri, v) => put_back(&mut self.vertices, uri, v),
                Prior::Edge(uri, e) => put_back(&mut self.edges, uri, e),
                Prior::Tag(uri, t) => put_back(&mut self.tags, uri, t),
                Prior::Schema(uri, s) => put_back(&mut self.schemas, uri, s),
            }
        }
    }

    fn ensure_unused(&self, uri: &Uri) -> Result<()> {
        if self.slot_of(uri).is_some() {
            return Err(GraphError::ReferentialIntegrity {
                uri: uri.to_string(),
                reason: "element already exists".to_string(),
            });
        }
        Ok(())
    }

    fn register_tags(&mut self, tags: &BTreeMap<Uri, Tag>, journal: &mut Journal) {
        for (uri, tag) in tags {
            if !self.tags.contains_key(uri) {
                journal.tag(uri, self);
                self.tags.insert(uri.clone(), tag.clone());
            }
        }
    }

    /// Journal the record holding `uri` and borrow its element.
    fn element_mut(&mut self, uri: &Uri, journal: &mut Journal) -> Result<&mut GraphElement> {
        let element = match self.slot_of(uri) {
            Some(Slot::Vertex) => {
                journal.vertex(uri, self);
                self.vertices.get_mut(uri).map(|v| &mut v.element)
            }
            Some(Slot::Edge) => {
                journal.edge(uri, self);
                self.edges.get_mut(uri).map(|e| &mut e.element)
            }
            Some(Slot::Schema(owner)) => {
                journal.schema(&owner, self);
                self.schemas.get_mut(&owner).and_then(|schema| {
                    if schema.uri() == uri {
                        Some(&mut schema.element)
                    } else {
                        schema.properties.get_mut(uri)
                    }
                })
            }
            None => None,
        };
        element.ok_or_else(|| GraphError::not_found(uri))
    }
}
