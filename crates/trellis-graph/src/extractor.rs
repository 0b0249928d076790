//! Subgraph extraction.
//!
//! Breadth-first expansion from a center vertex, one batched read per
//! traversal level: the incident edges of the whole frontier, then the
//! vertices newly discovered through them. Tags, suggestions and included
//! stubs come back with the vertex read. Every read goes through one store
//! [`Snapshot`].
//!
//! The frontier at the hop bound still has its incident edges read, but is
//! not expanded. An edge is part of the result when it passes the
//! share-level filter and both its endpoints made it into the vertex set,
//! so edges between two vertices at the bound are kept. Extracting at
//! depth 0 yields the center and its self-loops.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use trellis_core::{Edge, ShareLevel, SubGraph, Uri};

use crate::error::{GraphError, Result};
use crate::store::{GraphStore, Snapshot};

/// Parameters of one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGraphQuery {
    pub center: Uri,
    /// Hop bound. `None` traverses everything reachable through the filter.
    pub depth: Option<i64>,
    /// Admitted share levels. `None` admits every level.
    pub share_levels: Option<BTreeSet<ShareLevel>>,
    /// Vertex cap applied after traversal.
    pub results_limit: Option<usize>,
}

impl SubGraphQuery {
    pub fn with_depth(center: Uri, depth: i64) -> Self {
        Self {
            center,
            depth: Some(depth),
            share_levels: None,
            results_limit: None,
        }
    }

    pub fn with_share_levels<I>(center: Uri, levels: I) -> Self
    where
        I: IntoIterator<Item = ShareLevel>,
    {
        Self {
            center,
            depth: None,
            share_levels: Some(levels.into_iter().collect()),
            results_limit: None,
        }
    }

    pub fn with_share_levels_and_depth<I>(center: Uri, levels: I, depth: i64) -> Self
    where
        I: IntoIterator<Item = ShareLevel>,
    {
        Self {
            depth: Some(depth),
            ..Self::with_share_levels(center, levels)
        }
    }

    pub fn with_depth_and_limit(center: Uri, depth: i64, results_limit: usize) -> Self {
        Self {
            results_limit: Some(results_limit),
            ..Self::with_depth(center, depth)
        }
    }

    pub fn limit(mut self, results_limit: usize) -> Self {
        self.results_limit = Some(results_limit);
        self
    }

    /// Only public levels: what an anonymous reader may see.
    pub fn public_only(center: Uri, depth: i64) -> Self {
        Self::with_share_levels_and_depth(
            center,
            [ShareLevel::PublicWithLink, ShareLevel::Public],
            depth,
        )
    }

    fn admits(&self, level: ShareLevel) -> bool {
        self.share_levels
            .as_ref()
            .map_or(true, |levels| levels.contains(&level))
    }

    fn within_bound(&self, hop: i64) -> bool {
        self.depth.map_or(true, |depth| hop < depth)
    }

    fn validate(&self) -> Result<()> {
        if let Some(depth) = self.depth {
            if depth < 0 {
                return Err(GraphError::InvalidDepth {
                    depth,
                    center: self.center.to_string(),
                });
            }
        }
        if self.results_limit == Some(0) {
            return Err(GraphError::InvalidArgument {
                argument: "results_limit".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Read the subgraph around `query.center` from one store snapshot. Never
/// writes.
pub async fn extract<S>(store: &S, query: &SubGraphQuery) -> Result<SubGraph>
where
    S: GraphStore + ?Sized,
{
    query.validate()?;

    let mut snapshot = store.snapshot().await?;
    let traversed = traverse(&mut *snapshot, query).await;
    let closed = snapshot.close().await;
    let graph = match (traversed, closed) {
        (Ok(graph), Ok(())) => graph,
        (Ok(_), Err(e)) => return Err(e),
        (Err(e), closed) => {
            if let Err(close) = closed {
                tracing::warn!(center = %query.center, error = %close, "Snapshot close failed");
            }
            return Err(e);
        }
    };

    tracing::debug!(
        center = %query.center,
        vertices = graph.number_of_vertices(),
        edges = graph.number_of_edges(),
        "Extracted subgraph"
    );
    Ok(graph)
}

async fn traverse(snapshot: &mut dyn Snapshot, query: &SubGraphQuery) -> Result<SubGraph> {
    let center = snapshot
        .vertices(std::slice::from_ref(&query.center))
        .await?
        .into_iter()
        .next()
        .filter(|v| query.admits(v.share_level()))
        .ok_or_else(|| GraphError::not_found(&query.center))?;

    let mut graph = SubGraph::new();
    let mut hops: HashMap<Uri, i64> = HashMap::new();
    let mut excluded: HashSet<Uri> = HashSet::new();
    let mut traversed: BTreeMap<Uri, Edge> = BTreeMap::new();

    hops.insert(center.uri().clone(), 0);
    let mut frontier = vec![center.uri().clone()];
    graph.add_vertex(center);

    let mut hop = 0;
    while !frontier.is_empty() {
        let expand = query.within_bound(hop);
        let mut discovered = BTreeSet::new();
        for edge in snapshot.incident_edges(&frontier).await? {
            if !query.admits(edge.share_level()) {
                continue;
            }
            if expand {
                for end in [&edge.source, &edge.destination] {
                    if !hops.contains_key(end) && !excluded.contains(end) {
                        discovered.insert(end.clone());
                    }
                }
            }
            traversed.insert(edge.uri().clone(), edge);
        }
        if !expand {
            break;
        }

        let discovered: Vec<Uri> = discovered.into_iter().collect();
        let mut next = Vec::new();
        for vertex in snapshot.vertices(&discovered).await? {
            if query.admits(vertex.share_level()) {
                hops.insert(vertex.uri().clone(), hop + 1);
                next.push(vertex.uri().clone());
                graph.add_vertex(vertex);
            } else {
                excluded.insert(vertex.uri().clone());
            }
        }

        hop += 1;
        tracing::debug!(
            center = %query.center,
            hop,
            discovered = next.len(),
            vertices = graph.number_of_vertices(),
            "Expanded traversal level"
        );
        frontier = next;
    }

    for edge in traversed.into_values() {
        if graph.contains_vertex(&edge.source) && graph.contains_vertex(&edge.destination) {
            graph.add_edge(edge);
        }
    }

    if let Some(limit) = query.results_limit {
        truncate(&mut graph, &hops, limit);
    }
    Ok(graph)
}

/// Keep the `limit` vertices closest to the center (ties by URI) and drop
/// edges left dangling.
fn truncate(graph: &mut SubGraph, hops: &HashMap<Uri, i64>, limit: usize) {
    if graph.number_of_vertices() <= limit {
        return;
    }
    let mut ranked: Vec<(i64, Uri)> = graph
        .vertices
        .keys()
        .map(|uri| (hops.get(uri).copied().unwrap_or(i64::MAX), uri.clone()))
        .collect();
    ranked.sort();

    for (_, uri) in ranked.into_iter().skip(limit) {
        graph.vertices.remove(&uri);
    }
    let kept = &graph.vertices;
    graph
        .edges
        .retain(|_, e| kept.contains_key(&e.source) && kept.contains_key(&e.destination));
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::UserUris;

    fn center() -> Uri {
        UserUris::for_username("alice").unwrap().generate_vertex_uri()
    }

    #[test]
    fn negative_depth_is_rejected() {
        let err = SubGraphQuery::with_depth(center(), -1).validate().unwrap_err();
        assert!(matches!(err, GraphError::InvalidDepth { depth: -1, .. }));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let query = SubGraphQuery::with_depth(center(), 1).limit(0);
        assert!(matches!(
            query.validate(),
            Err(GraphError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn share_level_only_query_is_unbounded() {
        let query = SubGraphQuery::with_share_levels(center(), [ShareLevel::Public]);
        assert!(query.within_bound(1_000));
        assert!(query.admits(ShareLevel::Public));
        assert!(!query.admits(ShareLevel::Friend));
    }

    #[test]
    fn public_only_admits_link_sharing() {
        let query = SubGraphQuery::public_only(center(), 2);
        assert!(query.admits(ShareLevel::PublicWithLink));
        assert!(!query.admits(ShareLevel::Private));
        assert!(!query.within_bound(2));
    }
}
