//! Integration tests for trellis-graph against a live Neo4j instance.
//!
//! Run with: cargo test --package trellis-graph --test integration -- --ignored
//!
//! Skipped automatically if Neo4j is not available.

use std::sync::Arc;

use trellis_core::{EdgeStub, ShareLevel, Tag, UserUris, Vertex, VertexStub};
use trellis_graph::fields::{ElementField, NodeLabel};
use trellis_graph::{
    ElementCreation, ElementPatch, ErrorKind, ForkCache, GraphClient, GraphConfig, GraphContext,
    GraphStore, Mutation, UserGraph, WriteBatch,
};

async fn connect_or_skip() -> Option<GraphClient> {
    let config = GraphConfig::default();
    match GraphClient::connect(&config).await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test (Neo4j not available): {e}");
            None
        }
    }
}

/// A user namespace no other test run shares.
fn unique_owner(prefix: &str) -> UserUris {
    let scratch = UserUris::for_username(prefix).unwrap().generate_vertex_uri();
    UserUris::for_username(&format!("{prefix}-{}", scratch.short_id())).unwrap()
}

async fn cleanup(client: &GraphClient, owner: &UserUris) {
    let cypher = format!(
        "MATCH (n:{} {{{}: $owner}}) DETACH DELETE n",
        NodeLabel::GraphElement.key(),
        ElementField::Owner.key(),
    );
    let q = neo4rs::query(&cypher).param("owner", owner.username().to_string());
    let _ = client.run(q).await;
}

fn graph_for(client: &GraphClient, owner: &UserUris) -> UserGraph {
    let ctx = GraphContext::new(Arc::new(client.clone()));
    UserGraph::new(ctx, owner.clone())
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_ensure_schema_is_idempotent() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    client.ensure_schema().await.unwrap();
    client.ensure_schema().await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_vertex_round_trip() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let owner = unique_owner("rt");
    let g = graph_for(&client, &owner);

    let tag = Tag {
        uri: owner.generate_tag_uri(),
        external_uri: "https://www.wikidata.org/wiki/Q141488".to_string(),
        label: "Graph theory".to_string(),
        comment: String::new(),
        images: Vec::new(),
    };
    let mut creation = ElementCreation::labeled("idea").share_level(ShareLevel::Friend);
    creation.colors = Some("#00ff00".to_string());
    creation.tags.push(tag.clone());
    let created = g.create_vertex(creation).await.unwrap();

    let read = g.vertex_with_uri(created.uri()).read().await.unwrap();
    assert_eq!(read.element.label, "idea");
    assert_eq!(read.share_level(), ShareLevel::Friend);
    assert_eq!(read.element.colors.as_deref(), Some("#00ff00"));
    assert_eq!(read.element.font, None);
    assert_eq!(read.element.creation_date, created.element.creation_date);
    assert_eq!(read.element.tags.get(&tag.uri), Some(&tag));

    cleanup(&client, &owner).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_extract_depth_one_and_zero() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let owner = unique_owner("ex");
    let g = graph_for(&client, &owner);

    let v0 = g.create_vertex(ElementCreation::labeled("v0")).await.unwrap();
    let v1 = g
        .create_vertex(ElementCreation::labeled("v1").share_level(ShareLevel::Public))
        .await
        .unwrap();
    let v2 = g.create_vertex(ElementCreation::labeled("v2")).await.unwrap();
    g.create_edge(v0.uri(), v1.uri(), ElementCreation::default())
        .await
        .unwrap();
    g.create_edge(v0.uri(), v2.uri(), ElementCreation::default())
        .await
        .unwrap();
    let across = g
        .create_edge(v1.uri(), v2.uri(), ElementCreation::default())
        .await
        .unwrap();

    let one = g.graph_with_depth_and_center(1, v0.uri()).await.unwrap();
    assert_eq!(one.number_of_vertices(), 3);
    assert_eq!(one.number_of_edges(), 3);
    assert!(one.edge(across.uri()).is_some());

    let zero = g.graph_with_depth_and_center(0, v0.uri()).await.unwrap();
    assert_eq!(zero.number_of_vertices(), 1);
    assert_eq!(zero.number_of_edges(), 0);

    let missing = owner.generate_vertex_uri();
    let err = g.graph_with_depth_and_center(1, &missing).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    cleanup(&client, &owner).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_rewire_updates_counters() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let owner = unique_owner("rw");
    let g = graph_for(&client, &owner);

    let public = ElementCreation::default().share_level(ShareLevel::Public);
    let kept = g.create_vertex(public.clone()).await.unwrap();
    let old = g.create_vertex(ElementCreation::default()).await.unwrap();
    let new = g.create_vertex(public.clone()).await.unwrap();
    let e = g.create_edge(kept.uri(), old.uri(), public).await.unwrap();

    g.edge_with_uri(e.uri())
        .change_destination_vertex(new.uri())
        .await
        .unwrap();

    for (vertex, expected_public) in [(&kept, 1), (&old, 0), (&new, 1)] {
        let check = g
            .vertex_with_uri(vertex.uri())
            .verify_neighbor_counts()
            .await
            .unwrap();
        assert!(!check.drifted());
        assert_eq!(check.stored.public, expected_public);
    }

    let ghost = owner.generate_vertex_uri();
    let err = g
        .edge_with_uri(e.uri())
        .change_destination_vertex(&ghost)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReferentialIntegrity);

    cleanup(&client, &owner).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_fork_into_other_owner() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let alice = unique_owner("fa");
    let bob = unique_owner("fb");
    let source_graph = graph_for(&client, &alice);
    let target_graph = graph_for(&client, &bob);

    let public = ElementCreation::default().share_level(ShareLevel::Public);
    let a = source_graph.create_vertex(public.clone()).await.unwrap();
    let b = source_graph.create_vertex(public.clone()).await.unwrap();
    let c = source_graph.create_vertex(public.clone()).await.unwrap();
    source_graph
        .create_edge(a.uri(), b.uri(), public.clone())
        .await
        .unwrap();
    source_graph
        .create_edge(c.uri(), b.uri(), public)
        .await
        .unwrap();

    let mut cache = ForkCache::new();
    let cloned = target_graph
        .fork_from_center(a.uri(), 2, &mut cache)
        .await
        .unwrap();
    assert_eq!(cloned.number_of_vertices(), 3);
    assert_eq!(cloned.number_of_edges(), 2);

    let b_clone = cache.clone_of(b.uri()).unwrap();
    let stored = client.vertices(std::slice::from_ref(b_clone)).await.unwrap();
    assert_eq!(stored[0].share_level(), ShareLevel::Private);
    assert_eq!(stored[0].neighbor_counts.private, 2);
    assert_eq!(stored[0].element.owner_username(), bob.username());

    cleanup(&client, &alice).await;
    cleanup(&client, &bob).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_included_stubs_round_trip() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let owner = unique_owner("inc");
    let g = graph_for(&client, &owner);

    let a = g.create_vertex(ElementCreation::labeled("a")).await.unwrap();
    let b = g.create_vertex(ElementCreation::labeled("b")).await.unwrap();
    let ab = g
        .create_edge(a.uri(), b.uri(), ElementCreation::labeled("ab"))
        .await
        .unwrap();

    let stub = |v: &Vertex| VertexStub {
        uri: v.uri().clone(),
        label: v.element.label.clone(),
    };
    let mut pattern = Vertex::new(owner.generate_vertex_uri());
    pattern.included_vertices.insert(a.uri().clone(), stub(&a));
    pattern.included_vertices.insert(b.uri().clone(), stub(&b));
    pattern.included_edges.insert(
        ab.uri().clone(),
        EdgeStub {
            uri: ab.uri().clone(),
            label: "ab".to_string(),
            source: stub(&a),
            destination: stub(&b),
        },
    );
    let mut batch = WriteBatch::new();
    batch.push(Mutation::CreateVertex(pattern.clone()));
    client.apply(batch).await.unwrap();

    let stored = client
        .vertices(std::slice::from_ref(pattern.uri()))
        .await
        .unwrap();
    assert_eq!(stored[0].included_vertices, pattern.included_vertices);
    assert_eq!(stored[0].included_edges, pattern.included_edges);

    let sub = g.graph_with_depth_and_center(0, pattern.uri()).await.unwrap();
    assert_eq!(sub.vertex(pattern.uri()).unwrap().included_edges.len(), 1);

    cleanup(&client, &owner).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_schema_round_trip() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let owner = unique_owner("sc");
    let g = graph_for(&client, &owner);

    let schema = g
        .create_schema(ElementCreation::labeled("Person"))
        .await
        .unwrap();
    let op = g.schema_with_uri(schema.uri());
    let name = op
        .add_property(ElementCreation::labeled("name"))
        .await
        .unwrap();
    let tag = Tag {
        uri: owner.generate_tag_uri(),
        external_uri: "https://www.wikidata.org/wiki/Q5".to_string(),
        label: "human".to_string(),
        comment: String::new(),
        images: Vec::new(),
    };
    op.add_property_tag(&name.uri, tag.clone()).await.unwrap();
    op.update(ElementPatch::children_index("[]")).await.unwrap();

    let read = g.schema(schema.uri()).await.unwrap();
    assert_eq!(read.element.label, "Person");
    assert_eq!(read.element.children_index.as_deref(), Some("[]"));
    assert_eq!(read.element.private_context, None);
    let property = read.property(&name.uri).unwrap();
    assert_eq!(property.label, "name");
    assert_eq!(property.tags.get(&tag.uri), Some(&tag));

    cleanup(&client, &owner).await;
}
