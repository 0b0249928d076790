//! Neighbor-count bookkeeping.
//!
//! Each vertex carries four counters, one per share-level tier. An incident
//! edge is visible from a vertex at the coarser of the edge's level and the
//! neighbor's level, and counts once on every tier at or below that. Every
//! write that changes an edge, an endpoint, or a share level computes its
//! counter deltas here so they can be committed in the same batch.

use std::collections::{BTreeMap, HashMap};

use trellis_core::{Edge, NeighborCounts, ShareLevel, TierDelta, Uri, Vertex};

use crate::store::WriteBatch;

/// Level at which an edge counts for the vertex across from `neighbor`.
pub fn effective_visibility(edge: ShareLevel, neighbor: ShareLevel) -> ShareLevel {
    edge.coarsest(neighbor)
}

fn contribution(edge: ShareLevel, neighbor: ShareLevel) -> TierDelta {
    TierDelta::contribution(effective_visibility(edge, neighbor))
}

/// A vertex URI paired with its share level.
#[derive(Debug, Clone, Copy)]
pub struct VertexLevel<'a> {
    pub uri: &'a Uri,
    pub share_level: ShareLevel,
}

impl<'a> VertexLevel<'a> {
    pub fn new(uri: &'a Uri, share_level: ShareLevel) -> Self {
        Self { uri, share_level }
    }

    pub fn of(vertex: &'a Vertex) -> Self {
        Self::new(vertex.uri(), vertex.share_level())
    }
}

/// Counter adjustments accumulated per vertex.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterDeltas {
    deltas: BTreeMap<Uri, TierDelta>,
}

impl CounterDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, vertex: &Uri, delta: TierDelta) {
        *self.deltas.entry(vertex.clone()).or_default() += delta;
    }

    pub fn get(&self, vertex: &Uri) -> TierDelta {
        self.deltas.get(vertex).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.values().all(TierDelta::is_zero)
    }

    /// Vertices with a non-zero adjustment.
    pub fn vertices(&self) -> impl Iterator<Item = &Uri> {
        self.deltas
            .iter()
            .filter(|(_, delta)| !delta.is_zero())
            .map(|(uri, _)| uri)
    }

    pub fn merge(&mut self, other: CounterDeltas) {
        for (uri, delta) in other.deltas {
            self.add(&uri, delta);
        }
    }

    /// Queue one `AdjustNeighborCounts` per vertex with a non-zero delta.
    pub fn write_into(self, batch: &mut WriteBatch) {
        for (uri, delta) in self.deltas {
            batch.adjust(&uri, delta);
        }
    }

    // ── Events ───────────────────────────────────────────────────

    pub fn edge_created(&mut self, edge: ShareLevel, source: VertexLevel, destination: VertexLevel) {
        self.add(source.uri, contribution(edge, destination.share_level));
        self.add(destination.uri, contribution(edge, source.share_level));
    }

    pub fn edge_removed(&mut self, edge: ShareLevel, source: VertexLevel, destination: VertexLevel) {
        self.add(source.uri, -contribution(edge, destination.share_level));
        self.add(destination.uri, -contribution(edge, source.share_level));
    }

    /// One endpoint of an edge moves from `old` to `new` while `kept` stays.
    pub fn endpoint_changed(
        &mut self,
        edge: ShareLevel,
        kept: VertexLevel,
        old: VertexLevel,
        new: VertexLevel,
    ) {
        self.add(old.uri, -contribution(edge, kept.share_level));
        self.add(new.uri, contribution(edge, kept.share_level));
        self.add(
            kept.uri,
            contribution(edge, new.share_level) + -contribution(edge, old.share_level),
        );
    }

    /// `vertex` changes share level; every neighbor across `incident` sees it.
    pub fn vertex_share_level_changed(
        &mut self,
        vertex: &Uri,
        old: ShareLevel,
        new: ShareLevel,
        incident: &[Edge],
    ) {
        if old == new {
            return;
        }
        for edge in incident {
            let level = edge.share_level();
            let delta = contribution(level, new) + -contribution(level, old);
            if edge.is_loop() {
                self.add(vertex, delta + delta);
            } else if let Some(other) = edge.other_vertex(vertex) {
                self.add(other, delta);
            }
        }
    }

    pub fn edge_share_level_changed(
        &mut self,
        old: ShareLevel,
        new: ShareLevel,
        source: VertexLevel,
        destination: VertexLevel,
    ) {
        if old == new {
            return;
        }
        self.add(
            source.uri,
            contribution(new, destination.share_level) + -contribution(old, destination.share_level),
        );
        self.add(
            destination.uri,
            contribution(new, source.share_level) + -contribution(old, source.share_level),
        );
    }
}

/// Counters of `vertex` recomputed from its incident edges. `levels` must
/// hold the share level of every neighbor.
pub fn recount(
    vertex: &Uri,
    incident: &[Edge],
    levels: &HashMap<Uri, ShareLevel>,
) -> NeighborCounts {
    let mut counts = NeighborCounts::default();
    for edge in incident.iter().filter(|e| e.touches(vertex)) {
        let incidences = if edge.is_loop() { 2 } else { 1 };
        let Some(other) = edge.other_vertex(vertex) else {
            continue;
        };
        let neighbor = levels.get(other).copied().unwrap_or_default();
        for _ in 0..incidences {
            counts.apply(contribution(edge.share_level(), neighbor));
        }
    }
    counts
}
