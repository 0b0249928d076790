use std::collections::BTreeMap;

use trellis_core::{Edge, ShareLevel, Tag, Uri, UserUris, Vertex};

use super::{ensure_state, now, EdgeCreation, ElementState, GraphContext};
use crate::error::{GraphError, Result};
use crate::neighbors::{CounterDeltas, VertexLevel};
use crate::store::{ElementPatch, Endpoint, Mutation, WriteBatch};

pub struct EdgeOperator {
    ctx: GraphContext,
    uri: Uri,
    state: ElementState,
}

impl EdgeOperator {
    /// Operator for an edge not yet stored, with a freshly minted URI.
    pub fn for_new(ctx: GraphContext, owner: &UserUris) -> Self {
        Self {
            ctx,
            uri: owner.generate_edge_uri(),
            state: ElementState::Uncreated,
        }
    }

    /// Operator for a stored edge.
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

    /// Store the edge and count it on both endpoints.
    pub async fn create(
        &mut self,
        source: &Uri,
        destination: &Uri,
        creation: EdgeCreation,
    ) -> Result<Edge> {
        ensure_state(&self.uri, self.state, ElementState::Uncreated)?;

        let _guard = self.ctx.locks().lock([source, destination]).await;
        let endpoints = self.ctx.read_endpoints(&[source, destination]).await?;

        let mut edge = Edge::new(self.uri.clone(), source.clone(), destination.clone());
        creation.apply_to(&mut edge.element);

        let level = |uri: &Uri| endpoints.get(uri).map(Vertex::share_level).unwrap_or_default();
        let mut deltas = CounterDeltas::new();
        deltas.edge_created(
            edge.share_level(),
            VertexLevel::new(source, level(source)),
            VertexLevel::new(destination, level(destination)),
        );

        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateEdge(edge.clone()));
        deltas.write_into(&mut batch);
        self.ctx.store().apply(batch).await?;

        self.state = ElementState::Created;
        tracing::info!(
            uri = %self.uri,
            source = %source,
            destination = %destination,
            "Created edge"
        );
        Ok(edge)
    }

    pub async fn read(&self) -> Result<Edge> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx.read_edge(&self.uri).await
    }

    pub async fn source_vertex(&self) -> Result<Vertex> {
        let edge = self.read().await?;
        self.ctx.read_vertex(&edge.source).await
    }

    pub async fn destination_vertex(&self) -> Result<Vertex> {
        let edge = self.read().await?;
        self.ctx.read_vertex(&edge.destination).await
    }

    /// The endpoint across from `vertex`.
    pub async fn other_vertex(&self, vertex: &Uri) -> Result<Vertex> {
        let edge = self.read().await?;
        let other = edge.other_vertex(vertex).ok_or_else(|| GraphError::InvalidArgument {
            argument: vertex.to_string(),
            reason: format!("not an endpoint of {}", self.uri),
        })?;
        self.ctx.read_vertex(other).await
    }

    pub async fn tags(&self) -> Result<BTreeMap<Uri, Tag>> {
        Ok(self.read().await?.element.tags)
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

    pub async fn change_source_vertex(&self, vertex: &Uri) -> Result<Edge> {
        self.change_endpoint(Endpoint::Source, vertex).await
    }

    pub async fn change_destination_vertex(&self, vertex: &Uri) -> Result<Edge> {
        self.change_endpoint(Endpoint::Destination, vertex).await
    }

    async fn change_endpoint(&self, endpoint: Endpoint, new: &Uri) -> Result<Edge> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        let locked = self.ctx.lock_edge(&self.uri, Some(new)).await?;

        let mut edge = locked.edge.clone();
        let (old, kept) = match endpoint {
            Endpoint::Source => (&edge.source, &edge.destination),
            Endpoint::Destination => (&edge.destination, &edge.source),
        };
        if old == new {
            return Ok(edge);
        }

        let mut deltas = CounterDeltas::new();
        deltas.endpoint_changed(
            edge.share_level(),
            VertexLevel::new(kept, locked.level_of(kept)),
            VertexLevel::new(old, locked.level_of(old)),
            VertexLevel::new(new, locked.level_of(new)),
        );
        let old = old.clone();

        let at = now();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::SetEndpoint {
            edge: self.uri.clone(),
            endpoint,
            vertex: new.clone(),
            at,
        });
        deltas.write_into(&mut batch);
        self.ctx.store().apply(batch).await?;

        match endpoint {
            Endpoint::Source => edge.source = new.clone(),
            Endpoint::Destination => edge.destination = new.clone(),
        }
        edge.element.last_modification_date = at;
        tracing::info!(
            uri = %self.uri,
            endpoint = ?endpoint,
            from = %old,
            to = %new,
            "Rewired edge"
        );
        Ok(edge)
    }

    /// Swap source and destination. Counters are unaffected.
    pub async fn inverse(&self) -> Result<Edge> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        let locked = self.ctx.lock_edge(&self.uri, None).await?;

        let at = now();
        let mut batch = WriteBatch::new();
        batch.push(Mutation::SwapEndpoints {
            edge: self.uri.clone(),
            at,
        });
        self.ctx.store().apply(batch).await?;

        let mut edge = locked.edge.clone();
        std::mem::swap(&mut edge.source, &mut edge.destination);
        edge.element.last_modification_date = at;
        tracing::info!(uri = %self.uri, "Inverted edge");
        Ok(edge)
    }

    /// Change this edge's share level and re-tier both endpoints.
    pub async fn set_share_level(&self, level: ShareLevel) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        let locked = self.ctx.lock_edge(&self.uri, None).await?;
        let edge = &locked.edge;
        let old = edge.share_level();
        if old == level {
            return Ok(());
        }

        let mut deltas = CounterDeltas::new();
        deltas.edge_share_level_changed(
            old,
            level,
            VertexLevel::new(&edge.source, locked.level_of(&edge.source)),
            VertexLevel::new(&edge.destination, locked.level_of(&edge.destination)),
        );

        let mut batch = WriteBatch::new();
        batch.push(Mutation::UpdateElement {
            uri: self.uri.clone(),
            patch: ElementPatch {
                share_level: Some(level),
                ..ElementPatch::default()
            },
            at: now(),
        });
        deltas.write_into(&mut batch);
        self.ctx.store().apply(batch).await?;

        tracing::info!(uri = %self.uri, from = %old, to = %level, "Changed edge share level");
        Ok(())
    }

    /// Uncount the edge on both endpoints, then delete it.
    pub async fn remove(&mut self) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        let locked = self.ctx.lock_edge(&self.uri, None).await?;
        let edge = &locked.edge;

        let mut deltas = CounterDeltas::new();
        deltas.edge_removed(
            edge.share_level(),
            VertexLevel::new(&edge.source, locked.level_of(&edge.source)),
            VertexLevel::new(&edge.destination, locked.level_of(&edge.destination)),
        );

        let mut batch = WriteBatch::new();
        deltas.write_into(&mut batch);
        batch.push(Mutation::DeleteEdge(self.uri.clone()));
        self.ctx.store().apply(batch).await?;

        self.state = ElementState::Removed;
        tracing::info!(uri = %self.uri, "Removed edge");
        Ok(())
    }
}
