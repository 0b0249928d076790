//! Edge, vertex and schema mutation operators.
//!
//! An operator wraps one element URI and walks it through
//! `uncreated -> created -> removed`. Every topology or share-level change
//! locks the vertices whose counters it touches, re-reads them under the
//! lock, and commits the element change together with its counter deltas
//! in a single batch.

mod edge;
mod schema;
mod vertex;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use trellis_core::types::truncate_to_millis;
use trellis_core::{Edge, GraphElement, Image, ShareLevel, Tag, Uri, Vertex};

use crate::error::{GraphError, Result};
use crate::locks::{VertexLockGuard, VertexLocks};
use crate::store::{ElementPatch, GraphStore, Mutation, WriteBatch};

pub use edge::EdgeOperator;
pub use schema::SchemaOperator;
pub use vertex::{CounterCheck, VertexOperator};

/// Lock attempts before giving up on a neighborhood that keeps changing.
const MAX_LOCK_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Uncreated,
    Created,
    Removed,
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uncreated => "uncreated",
            Self::Created => "created",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Initial properties of a new vertex or edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementCreation {
    pub label: String,
    pub comment: String,
    pub share_level: ShareLevel,
    pub images: Vec<Image>,
    pub colors: Option<String>,
    pub font: Option<String>,
    pub tags: Vec<Tag>,
}

pub type VertexCreation = ElementCreation;
pub type EdgeCreation = ElementCreation;
pub type SchemaCreation = ElementCreation;

impl ElementCreation {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn share_level(mut self, share_level: ShareLevel) -> Self {
        self.share_level = share_level;
        self
    }

    fn apply_to(self, element: &mut GraphElement) {
        element.label = self.label;
        element.comment = self.comment;
        element.share_level = self.share_level;
        element.images = self.images;
        element.colors = self.colors;
        element.font = self.font;
        element.tags = self
            .tags
            .into_iter()
            .map(|tag| (tag.uri.clone(), tag))
            .collect();
    }
}

/// Store and lock table shared by every operator of one graph.
#[derive(Clone)]
pub struct GraphContext {
    store: Arc<dyn GraphStore>,
    locks: VertexLocks,
}

impl GraphContext {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            locks: VertexLocks::new(),
        }
    }

    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }

    pub fn locks(&self) -> &VertexLocks {
        &self.locks
    }

    // ── Shared element writes ────────────────────────────────────

    async fn update_element(&self, uri: &Uri, patch: ElementPatch) -> Result<()> {
        if patch.share_level.is_some() {
            return Err(GraphError::InvalidArgument {
                argument: "share_level".to_string(),
                reason: "share level changes go through set_share_level".to_string(),
            });
        }
        if patch.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        batch.push(Mutation::UpdateElement {
            uri: uri.clone(),
            patch,
            at: now(),
        });
        self.store.apply(batch).await
    }

    async fn attach_tag(&self, element: &Uri, tag: Tag) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.push(Mutation::AttachTag {
            element: element.clone(),
            tag,
        });
        self.store.apply(batch).await
    }

    async fn detach_tag(&self, element: &Uri, tag: &Uri) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.push(Mutation::DetachTag {
            element: element.clone(),
            tag: tag.clone(),
        });
        self.store.apply(batch).await
    }

    async fn read_vertex(&self, uri: &Uri) -> Result<Vertex> {
        self.store
            .vertices(std::slice::from_ref(uri))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::not_found(uri))
    }

    async fn read_edge(&self, uri: &Uri) -> Result<Edge> {
        self.store
            .edges(std::slice::from_ref(uri))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::not_found(uri))
    }

    /// Read `uris`, failing with `ReferentialIntegrity` if any is missing.
    async fn read_endpoints(&self, uris: &[&Uri]) -> Result<HashMap<Uri, Vertex>> {
        let wanted: Vec<Uri> = uris.iter().map(|u| (*u).clone()).collect();
        let found: HashMap<Uri, Vertex> = self
            .store
            .vertices(&wanted)
            .await?
            .into_iter()
            .map(|v| (v.uri().clone(), v))
            .collect();
        if let Some(missing) = wanted.iter().find(|u| !found.contains_key(*u)) {
            return Err(GraphError::missing_vertex(missing));
        }
        Ok(found)
    }

    // ── Locking ──────────────────────────────────────────────────

    /// Lock an edge's endpoints (plus `extra`) and read them. The edge is
    /// re-read under the lock and the attempt retried if it was rewired in
    /// between.
    async fn lock_edge(&self, uri: &Uri, extra: Option<&Uri>) -> Result<LockedEdge> {
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let seen = self.read_edge(uri).await?;
            let mut wanted = vec![&seen.source, &seen.destination];
            wanted.extend(extra);
            let guard = self.locks.lock(wanted.iter().copied()).await;

            let edge = self.read_edge(uri).await?;
            if edge.source != seen.source || edge.destination != seen.destination {
                tracing::debug!(edge = %uri, "Endpoints changed while locking, retrying");
                continue;
            }
            let vertices = self.read_endpoints(&wanted).await?;
            return Ok(LockedEdge {
                _guard: guard,
                edge,
                vertices,
            });
        }
        Err(contended(uri))
    }

    /// Lock a vertex and all its current neighbors, then read them.
    async fn lock_neighborhood(&self, uri: &Uri) -> Result<LockedNeighborhood> {
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let seen = endpoint_set(uri, &self.store.incident_edges(std::slice::from_ref(uri)).await?);
            let guard = self.locks.lock(&seen).await;

            let incident = self.store.incident_edges(std::slice::from_ref(uri)).await?;
            if endpoint_set(uri, &incident) != seen {
                tracing::debug!(vertex = %uri, "Neighborhood changed while locking, retrying");
                continue;
            }
            let wanted: Vec<Uri> = seen.into_iter().collect();
            let mut vertices: HashMap<Uri, Vertex> = self
                .store
                .vertices(&wanted)
                .await?
                .into_iter()
                .map(|v| (v.uri().clone(), v))
                .collect();
            let vertex = vertices
                .remove(uri)
                .ok_or_else(|| GraphError::not_found(uri))?;
            return Ok(LockedNeighborhood {
                _guard: guard,
                vertex,
                incident,
                neighbors: vertices,
            });
        }
        Err(contended(uri))
    }
}

/// An edge with its endpoint vertices, read while their locks are held.
struct LockedEdge {
    _guard: VertexLockGuard,
    edge: Edge,
    vertices: HashMap<Uri, Vertex>,
}

impl LockedEdge {
    fn level_of(&self, uri: &Uri) -> ShareLevel {
        self.vertices
            .get(uri)
            .map(Vertex::share_level)
            .unwrap_or_default()
    }
}

/// A vertex with its incident edges and neighbors, read under lock.
struct LockedNeighborhood {
    _guard: VertexLockGuard,
    vertex: Vertex,
    incident: Vec<Edge>,
    neighbors: HashMap<Uri, Vertex>,
}

impl LockedNeighborhood {
    fn level_of(&self, uri: &Uri) -> ShareLevel {
        if uri == self.vertex.uri() {
            return self.vertex.share_level();
        }
        self.neighbors
            .get(uri)
            .map(Vertex::share_level)
            .unwrap_or_default()
    }
}

fn endpoint_set(vertex: &Uri, incident: &[Edge]) -> BTreeSet<Uri> {
    let mut set = BTreeSet::new();
    set.insert(vertex.clone());
    for edge in incident {
        set.insert(edge.source.clone());
        set.insert(edge.destination.clone());
    }
    set
}

fn contended(uri: &Uri) -> GraphError {
    GraphError::StoreUnavailable(format!(
        "{uri} kept changing across {MAX_LOCK_ATTEMPTS} lock attempts"
    ))
}

fn now() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

fn ensure_state(uri: &Uri, state: ElementState, expected: ElementState) -> Result<()> {
    if state != expected {
        return Err(GraphError::IllegalState {
            uri: uri.to_string(),
            state,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_display_lowercase() {
        assert_eq!(ElementState::Uncreated.to_string(), "uncreated");
        assert_eq!(ElementState::Removed.to_string(), "removed");
    }

    #[test]
    fn creation_replaces_element_fields() {
        let uri = trellis_core::UserUris::for_username("alice")
            .unwrap()
            .generate_vertex_uri();
        let mut element = GraphElement::new(uri);
        ElementCreation::labeled("idea")
            .share_level(ShareLevel::Friend)
            .apply_to(&mut element);
        assert_eq!(element.label, "idea");
        assert_eq!(element.share_level, ShareLevel::Friend);
    }
}
