//! Per-owner entry point to the engine.

use trellis_core::{Edge, Schema, SubGraph, Uri, UserUris, Vertex};

use crate::error::{GraphError, Result};
use crate::extractor::{self, SubGraphQuery};
use crate::fork::{ForkCache, ForkEngine, ForkOptions, ForkSource, ForkedElement};
use crate::operators::{
    EdgeCreation, EdgeOperator, GraphContext, SchemaCreation, SchemaOperator, VertexCreation,
    VertexOperator,
};

/// The graph of one user. New elements are minted in that user's namespace
/// and forks land there.
#[derive(Clone)]
pub struct UserGraph {
    ctx: GraphContext,
    owner: UserUris,
    fork_options: ForkOptions,
}

impl UserGraph {
    pub fn new(ctx: GraphContext, owner: UserUris) -> Self {
        Self {
            ctx,
            owner,
            fork_options: ForkOptions::default(),
        }
    }

    pub fn with_fork_options(mut self, options: ForkOptions) -> Self {
        self.fork_options = options;
        self
    }

    pub fn owner(&self) -> &UserUris {
        &self.owner
    }

    pub async fn extract(&self, query: &SubGraphQuery) -> Result<SubGraph> {
        extractor::extract(self.ctx.store(), query).await
    }

    pub async fn graph_with_depth_and_center(&self, depth: i64, center: &Uri) -> Result<SubGraph> {
        self.extract(&SubGraphQuery::with_depth(center.clone(), depth))
            .await
    }

    /// Extract around whichever of the owner's vertices the store yields
    /// first.
    pub async fn graph_with_any_vertex_and_depth(&self, depth: i64) -> Result<SubGraph> {
        let center = self
            .ctx
            .store()
            .any_vertex_of(self.owner.username())
            .await?
            .ok_or_else(|| GraphError::not_found(self.owner.graph_prefix()))?;
        self.graph_with_depth_and_center(depth, &center).await
    }

    pub async fn have_element_with_uri(&self, uri: &Uri) -> Result<bool> {
        self.ctx.store().element_exists(uri).await
    }

    pub fn vertex_with_uri(&self, uri: &Uri) -> VertexOperator {
        VertexOperator::existing(self.ctx.clone(), uri.clone())
    }

    pub fn edge_with_uri(&self, uri: &Uri) -> EdgeOperator {
        EdgeOperator::existing(self.ctx.clone(), uri.clone())
    }

    pub async fn create_vertex(&self, creation: VertexCreation) -> Result<Vertex> {
        VertexOperator::for_new(self.ctx.clone(), &self.owner)
            .create(creation)
            .await
    }

    pub async fn create_edge(
        &self,
        source: &Uri,
        destination: &Uri,
        creation: EdgeCreation,
    ) -> Result<Edge> {
        EdgeOperator::for_new(self.ctx.clone(), &self.owner)
            .create(source, destination, creation)
            .await
    }

    pub async fn create_schema(&self, creation: SchemaCreation) -> Result<Schema> {
        SchemaOperator::for_new(self.ctx.clone(), &self.owner)
            .create(creation)
            .await
    }

    pub fn schema_with_uri(&self, uri: &Uri) -> SchemaOperator {
        SchemaOperator::existing(self.ctx.clone(), uri.clone())
    }

    /// Read a schema with its properties.
    pub async fn schema(&self, uri: &Uri) -> Result<Schema> {
        self.schema_with_uri(uri).read().await
    }

    pub async fn fork_subgraph(&self, source: &SubGraph, cache: &mut ForkCache) -> Result<SubGraph> {
        self.fork_engine().fork_subgraph(source, cache).await
    }

    pub async fn fork_element(&self, source: ForkSource, cache: &mut ForkCache) -> Result<ForkedElement> {
        self.fork_engine().fork_element(source, cache).await
    }

    /// Extract `depth` hops around `center` (any owner's) and fork the
    /// result into this graph.
    pub async fn fork_from_center(
        &self,
        center: &Uri,
        depth: i64,
        cache: &mut ForkCache,
    ) -> Result<SubGraph> {
        let source = self.graph_with_depth_and_center(depth, center).await?;
        self.fork_subgraph(&source, cache).await
    }

    fn fork_engine(&self) -> ForkEngine {
        ForkEngine::new(self.ctx.clone(), self.owner.clone(), self.fork_options)
    }
}
