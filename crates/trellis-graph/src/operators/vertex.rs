use std::collections::HashMap;

use trellis_core::{Edge, NeighborCounts, ShareLevel, Tag, Uri, UserUris, Vertex};

use super::{ensure_state, now, ElementState, GraphContext, VertexCreation};
use crate::error::Result;
use crate::neighbors::{self, CounterDeltas, VertexLevel};
use crate::store::{ElementPatch, Mutation, WriteBatch};

/// Stored counters next to counters recomputed from incident edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterCheck {
    pub stored: NeighborCounts,
    pub recomputed: NeighborCounts,
}

impl CounterCheck {
    pub fn drifted(&self) -> bool {
        self.stored != self.recomputed
    }
}

pub struct VertexOperator {
    ctx: GraphContext,
    uri: Uri,
    state: ElementState,
}

impl VertexOperator {
    /// Operator for a vertex not yet stored, with a freshly minted URI.
    pub fn for_new(ctx: GraphContext, owner: &UserUris) -> Self {
        Self {
            ctx,
            uri: owner.generate_vertex_uri(),
            state: ElementState::Uncreated,
        }
    }

    /// Operator for a stored vertex.
    pub fn existing(ctx: GraphContext, uri: Uri) -> Self {
        Self {
            ctx,
            uri,
            state: ElementState::Created,
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn state(&self) -> ElementState {
        self.state
    }

    pub async fn create(&mut self, creation: VertexCreation) -> Result<Vertex> {
        ensure_state(&self.uri, self.state, ElementState::Uncreated)?;

        let mut vertex = Vertex::new(self.uri.clone());
        creation.apply_to(&mut vertex.element);

        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateVertex(vertex.clone()));
        self.ctx.store().apply(batch).await?;

        self.state = ElementState::Created;
        tracing::info!(uri = %self.uri, share_level = %vertex.share_level(), "Created vertex");
        Ok(vertex)
    }

    pub async fn read(&self) -> Result<Vertex> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx.read_vertex(&self.uri).await
    }

    pub async fn update(&self, patch: ElementPatch) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx.update_element(&self.uri, patch).await
    }

    pub async fn add_tag(&self, tag: Tag) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx.attach_tag(&self.uri, tag).await
    }

    pub async fn remove_tag(&self, tag: &Uri) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx.detach_tag(&self.uri, tag).await
    }

    pub async fn connected_edges(&self) -> Result<Vec<Edge>> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx
            .store()
            .incident_edges(std::slice::from_ref(&self.uri))
            .await
    }

    /// Change this vertex's share level and re-tier every neighbor.
    pub async fn set_share_level(&self, level: ShareLevel) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        let locked = self.ctx.lock_neighborhood(&self.uri).await?;
        let old = locked.vertex.share_level();
        if old == level {
            return Ok(());
        }

        let mut deltas = CounterDeltas::new();
        deltas.vertex_share_level_changed(&self.uri, old, level, &locked.incident);

        let mut batch = WriteBatch::new();
        batch.push(Mutation::UpdateElement {
            uri: self.uri.clone(),
            patch: ElementPatch {
                share_level: Some(level),
                ..ElementPatch::default()
            },
            at: now(),
        });
        let touched = deltas.vertices().count();
        deltas.write_into(&mut batch);
        self.ctx.store().apply(batch).await?;

        tracing::info!(
            uri = %self.uri,
            from = %old,
            to = %level,
            neighbors = touched,
            "Changed vertex share level"
        );
        Ok(())
    }

    /// Remove every incident edge, adjusting the far endpoints, then the
    /// vertex itself.
    pub async fn remove(&mut self) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        let locked = self.ctx.lock_neighborhood(&self.uri).await?;

        let mut deltas = CounterDeltas::new();
        for edge in &locked.incident {
            deltas.edge_removed(
                edge.share_level(),
                VertexLevel::new(&edge.source, locked.level_of(&edge.source)),
                VertexLevel::new(&edge.destination, locked.level_of(&edge.destination)),
            );
        }

        let mut batch = WriteBatch::new();
        deltas.write_into(&mut batch);
        for edge in &locked.incident {
            batch.push(Mutation::DeleteEdge(edge.uri().clone()));
        }
        batch.push(Mutation::DeleteVertex(self.uri.clone()));
        self.ctx.store().apply(batch).await?;

        self.state = ElementState::Removed;
        tracing::info!(uri = %self.uri, edges = locked.incident.len(), "Removed vertex");
        Ok(())
    }

    /// Compare stored counters against a recount from incident edges.
    pub async fn verify_neighbor_counts(&self) -> Result<CounterCheck> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        let locked = self.ctx.lock_neighborhood(&self.uri).await?;

        let mut levels: HashMap<Uri, ShareLevel> = locked
            .neighbors
            .iter()
            .map(|(uri, v)| (uri.clone(), v.share_level()))
            .collect();
        levels.insert(self.uri.clone(), locked.vertex.share_level());

        let check = CounterCheck {
            stored: locked.vertex.neighbor_counts,
            recomputed: neighbors::recount(&self.uri, &locked.incident, &levels),
        };
        if check.drifted() {
            tracing::warn!(
                uri = %self.uri,
                stored = ?check.stored,
                recomputed = ?check.recomputed,
                "Neighbor counters drifted"
            );
        }
        Ok(check)
    }
}
