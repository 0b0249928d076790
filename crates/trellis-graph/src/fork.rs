//! Subgraph forking: deep clone into another owner's namespace.
//!
//! A [`ForkCache`] maps every source URI to its clone and is passed by the
//! caller, so several fork calls can share structure. The entry for an
//! element is installed before its edges' endpoints are resolved; a second
//! path to the same element resolves through the cache instead of cloning
//! it again. Each call stages its clones in memory and commits them as one
//! batch, together with the neighbor counters they imply.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use trellis_core::{
    Edge, EdgeStub, ElementKind, GraphElement, ShareLevel, SubGraph, Uri, UserUris, Vertex,
    VertexStub,
};

use crate::error::{GraphError, Result};
use crate::neighbors::{CounterDeltas, VertexLevel};
use crate::operators::GraphContext;
use crate::store::{Mutation, WriteBatch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForkOptions {
    /// Level given to every clone.
    pub share_level: ShareLevel,
}

/// Handle on one clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkedElement {
    pub uri: Uri,
    pub kind: ElementKind,
    pub share_level: ShareLevel,
    /// False while the clone is staged in an uncommitted fork call.
    pub committed: bool,
}

/// Source URI to clone, for the lifetime of one logical fork.
#[derive(Debug, Clone, Default)]
pub struct ForkCache {
    entries: HashMap<Uri, ForkedElement>,
}

impl ForkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &Uri) -> Option<&ForkedElement> {
        self.entries.get(source)
    }

    pub fn clone_of(&self, source: &Uri) -> Option<&Uri> {
        self.entries.get(source).map(|forked| &forked.uri)
    }

    pub fn contains(&self, source: &Uri) -> bool {
        self.entries.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn install(&mut self, source: Uri, forked: ForkedElement) {
        self.entries.insert(source, forked);
    }
}

/// What to fork with [`ForkEngine::fork_element`].
#[derive(Debug, Clone)]
pub enum ForkSource {
    Vertex(Vertex),
    Edge(Edge),
}

pub struct ForkEngine {
    ctx: GraphContext,
    owner: UserUris,
    options: ForkOptions,
}

impl ForkEngine {
    pub fn new(ctx: GraphContext, owner: UserUris, options: ForkOptions) -> Self {
        Self {
            ctx,
            owner,
            options,
        }
    }

    /// Clone every vertex and edge of `source`. Returns the clones of all
    /// of them, including ones an earlier call already committed.
    pub async fn fork_subgraph(&self, source: &SubGraph, cache: &mut ForkCache) -> Result<SubGraph> {
        let mut plan = ForkPlan::new(self, Some(source), cache);
        let staged = plan.stage_subgraph(source).await;
        let outcome = match staged {
            Ok(()) => plan.commit().await,
            Err(e) => Err(e),
        };
        let created = plan.finish(outcome)?;

        let mut cloned = SubGraph::new();
        let mut reused_vertices = Vec::new();
        let mut reused_edges = Vec::new();
        for uri in source.vertices.keys() {
            match cache.clone_of(uri) {
                Some(clone) if !created.vertices.contains_key(clone) => {
                    reused_vertices.push(clone.clone())
                }
                _ => {}
            }
        }
        for uri in source.edges.keys() {
            match cache.clone_of(uri) {
                Some(clone) if !created.edges.contains_key(clone) => reused_edges.push(clone.clone()),
                _ => {}
            }
        }
        for vertex in created.vertices.into_values() {
            cloned.add_vertex(vertex);
        }
        for edge in created.edges.into_values() {
            cloned.add_edge(edge);
        }
        for vertex in self.ctx.store().vertices(&reused_vertices).await? {
            cloned.add_vertex(vertex);
        }
        for edge in self.ctx.store().edges(&reused_edges).await? {
            cloned.add_edge(edge);
        }

        tracing::info!(
            owner = %self.owner.username(),
            vertices = cloned.number_of_vertices(),
            edges = cloned.number_of_edges(),
            cached = cache.len(),
            "Forked subgraph"
        );
        Ok(cloned)
    }

    /// Clone one element. An edge's endpoints come from the cache or are
    /// read from the store and cloned first.
    pub async fn fork_element(&self, source: ForkSource, cache: &mut ForkCache) -> Result<ForkedElement> {
        let source_uri = match &source {
            ForkSource::Vertex(v) => v.uri().clone(),
            ForkSource::Edge(e) => e.uri().clone(),
        };

        let mut plan = ForkPlan::new(self, None, cache);
        let staged = match source {
            ForkSource::Vertex(vertex) => plan.fork_vertex(&vertex).map(|_| ()),
            ForkSource::Edge(edge) => plan.fork_edge(&edge).await.map(|_| ()),
        };
        let outcome = match staged {
            Ok(()) => plan.commit().await,
            Err(e) => Err(e),
        };
        plan.finish(outcome)?;

        cache
            .get(&source_uri)
            .cloned()
            .ok_or_else(|| GraphError::not_found(&source_uri))
    }
}

/// Clones staged by one fork call.
#[derive(Debug, Default)]
struct Staged {
    vertices: BTreeMap<Uri, Vertex>,
    edges: BTreeMap<Uri, Edge>,
}

struct ForkPlan<'a> {
    engine: &'a ForkEngine,
    snapshot: Option<&'a SubGraph>,
    cache: &'a mut ForkCache,
    /// Source URIs whose cache entries this call installed.
    installed: Vec<Uri>,
    staged: Staged,
}

impl<'a> ForkPlan<'a> {
    fn new(engine: &'a ForkEngine, snapshot: Option<&'a SubGraph>, cache: &'a mut ForkCache) -> Self {
        Self {
            engine,
            snapshot,
            cache,
            installed: Vec::new(),
            staged: Staged::default(),
        }
    }

    async fn stage_subgraph(&mut self, source: &SubGraph) -> Result<()> {
        for vertex in source.vertices.values() {
            self.fork_vertex(vertex)?;
        }
        for edge in source.edges.values() {
            self.fork_edge(edge).await?;
        }
        Ok(())
    }

    fn fork_vertex(&mut self, source: &Vertex) -> Result<Uri> {
        if let Some(clone) = self.cache.clone_of(source.uri()) {
            return Ok(clone.clone());
        }
        let uri = self.engine.owner.generate_vertex_uri();
        self.install(source.uri(), &uri, ElementKind::Vertex);

        let mut clone = Vertex::new(uri.clone());
        clone.element = self.clone_element(&source.element, uri.clone());
        clone.included_vertices = source.included_vertices.clone();
        clone.included_edges = source.included_edges.clone();
        self.staged.vertices.insert(uri.clone(), clone);
        Ok(uri)
    }

    async fn fork_edge(&mut self, source: &Edge) -> Result<Uri> {
        if let Some(clone) = self.cache.clone_of(source.uri()) {
            return Ok(clone.clone());
        }
        let uri = self.engine.owner.generate_edge_uri();
        self.install(source.uri(), &uri, ElementKind::Edge);

        let clone_source = self.resolve_endpoint(&source.source).await?;
        let clone_destination = self.resolve_endpoint(&source.destination).await?;

        let mut clone = Edge::new(uri.clone(), clone_source, clone_destination);
        clone.element = self.clone_element(&source.element, uri.clone());
        self.staged.edges.insert(uri.clone(), clone);
        Ok(uri)
    }

    /// Clone of an edge endpoint: from the cache, else the source vertex is
    /// taken from the snapshot or the store and cloned now.
    async fn resolve_endpoint(&mut self, source: &Uri) -> Result<Uri> {
        if let Some(clone) = self.cache.clone_of(source) {
            return Ok(clone.clone());
        }
        let vertex = match self.snapshot.and_then(|s| s.vertex(source)) {
            Some(vertex) => vertex.clone(),
            None => self
                .engine
                .ctx
                .store()
                .vertices(std::slice::from_ref(source))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| GraphError::not_found(source))?,
        };
        self.fork_vertex(&vertex)
    }

    fn install(&mut self, source: &Uri, clone: &Uri, kind: ElementKind) {
        self.cache.install(
            source.clone(),
            ForkedElement {
                uri: clone.clone(),
                kind,
                share_level: self.engine.options.share_level,
                committed: false,
            },
        );
        self.installed.push(source.clone());
    }

    fn clone_element(&self, source: &GraphElement, uri: Uri) -> GraphElement {
        let mut element = GraphElement::new(uri);
        element.label = source.label.clone();
        element.comment = source.comment.clone();
        element.images = source.images.clone();
        element.colors = source.colors.clone();
        element.font = source.font.clone();
        element.tags = source.tags.clone();
        element.share_level = self.engine.options.share_level;
        element.pattern_uri = source.pattern_uri.clone();
        // Owner notes and child ordering stay with the source.
        element
    }

    /// Point included stubs of staged vertices at clones made in this fork.
    fn remap_included(&mut self) {
        let cache = &*self.cache;
        let vertex_stub = |stub: &VertexStub| VertexStub {
            uri: cache.clone_of(&stub.uri).cloned().unwrap_or_else(|| stub.uri.clone()),
            label: stub.label.clone(),
        };
        for vertex in self.staged.vertices.values_mut() {
            vertex.included_vertices = vertex
                .included_vertices
                .values()
                .map(vertex_stub)
                .map(|stub| (stub.uri.clone(), stub))
                .collect();
            vertex.included_edges = vertex
                .included_edges
                .values()
                .map(|stub| EdgeStub {
                    uri: cache.clone_of(&stub.uri).cloned().unwrap_or_else(|| stub.uri.clone()),
                    label: stub.label.clone(),
                    source: vertex_stub(&stub.source),
                    destination: vertex_stub(&stub.destination),
                })
                .map(|stub| (stub.uri.clone(), stub))
                .collect();
        }
    }

    /// Write every staged clone in one batch. Counters of clones staged here
    /// are computed up front; counters of clones committed by earlier calls
    /// are adjusted under their locks.
    async fn commit(&mut self) -> Result<()> {
        if self.staged.vertices.is_empty() && self.staged.edges.is_empty() {
            return Ok(());
        }
        self.remap_included();

        let existing: BTreeSet<Uri> = self
            .staged
            .edges
            .values()
            .flat_map(|e| [e.source.clone(), e.destination.clone()])
            .filter(|uri| !self.staged.vertices.contains_key(uri))
            .collect();

        let ctx = &self.engine.ctx;
        let _guard = ctx.locks().lock(&existing).await;

        let mut levels: HashMap<Uri, ShareLevel> = self
            .staged
            .vertices
            .iter()
            .map(|(uri, v)| (uri.clone(), v.share_level()))
            .collect();
        if !existing.is_empty() {
            let wanted: Vec<Uri> = existing.iter().cloned().collect();
            for vertex in ctx.store().vertices(&wanted).await? {
                levels.insert(vertex.uri().clone(), vertex.share_level());
            }
            if let Some(missing) = existing.iter().find(|u| !levels.contains_key(*u)) {
                return Err(GraphError::missing_vertex(missing));
            }
        }

        let mut deltas = CounterDeltas::new();
        for edge in self.staged.edges.values() {
            let level = |uri: &Uri| levels.get(uri).copied().unwrap_or_default();
            deltas.edge_created(
                edge.share_level(),
                VertexLevel::new(&edge.source, level(&edge.source)),
                VertexLevel::new(&edge.destination, level(&edge.destination)),
            );
        }

        let mut batch = WriteBatch::new();
        let mut adjustments = CounterDeltas::new();
        for vertex in self.staged.vertices.values_mut() {
            vertex.neighbor_counts.apply(deltas.get(vertex.uri()));
            batch.push(Mutation::CreateVertex(vertex.clone()));
        }
        for edge in self.staged.edges.values() {
            batch.push(Mutation::CreateEdge(edge.clone()));
        }
        for uri in &existing {
            adjustments.add(uri, deltas.get(uri));
        }
        adjustments.write_into(&mut batch);

        ctx.store().apply(batch).await
    }

    /// Settle the cache: mark this call's entries committed on success,
    /// evict them on failure.
    fn finish(self, outcome: Result<()>) -> Result<Staged> {
        match outcome {
            Ok(()) => {
                for source in &self.installed {
                    if let Some(entry) = self.cache.entries.get_mut(source) {
                        entry.committed = true;
                    }
                }
                Ok(self.staged)
            }
            Err(e) => {
                for source in &self.installed {
                    self.cache.entries.remove(source);
                }
                tracing::warn!(
                    owner = %self.engine.owner.username(),
                    evicted = self.installed.len(),
                    error = %e,
                    "Fork aborted"
                );
                Err(e)
            }
        }
    }
}
