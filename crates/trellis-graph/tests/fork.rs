//! Forking subgraphs and single elements into another owner's graph.

mod common;

use std::collections::BTreeSet;

use trellis_core::{ShareLevel, Tag, Uri, VertexStub};
use trellis_graph::{
    ElementCreation, ElementPatch, ErrorKind, ForkCache, ForkOptions, ForkSource, GraphStore,
    Mutation, WriteBatch,
};

use common::{assert_counters_exact, edge, stored_vertex, vertex, Fixture};

#[tokio::test]
async fn test_fork_clones_every_element_once() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let a = vertex(&alice, "a", ShareLevel::Public).await;
    let b = vertex(&alice, "b", ShareLevel::Friend).await;
    let c = vertex(&alice, "c", ShareLevel::Public).await;
    edge(&alice, &a, &b, ShareLevel::Public).await;
    edge(&alice, &b, &c, ShareLevel::Public).await;
    edge(&alice, &c, &a, ShareLevel::PublicWithLink).await;

    let source = alice.graph_with_depth_and_center(3, a.uri()).await.unwrap();
    let mut cache = ForkCache::new();
    let cloned = bob.fork_subgraph(&source, &mut cache).await.unwrap();

    assert_eq!(cloned.number_of_vertices(), 3);
    assert_eq!(cloned.number_of_edges(), 3);
    assert_eq!(fx.store.vertex_count(), 6);
    assert_eq!(fx.store.edge_count(), 6);

    for vertex in cloned.vertices.values() {
        assert_eq!(vertex.element.owner_username(), "bob");
        assert_eq!(vertex.share_level(), ShareLevel::Private);
        assert!(!source.contains_vertex(vertex.uri()));
    }
    for edge in cloned.edges.values() {
        assert_eq!(edge.share_level(), ShareLevel::Private);
        assert!(cloned.contains_vertex(&edge.source));
        assert!(cloned.contains_vertex(&edge.destination));
    }
    assert_eq!(cache.len(), 6);
    assert!(cache.get(a.uri()).unwrap().committed);
    assert_counters_exact(&fx.store);
}

#[tokio::test]
async fn test_shared_vertex_maps_to_one_clone() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let a = vertex(&alice, "a", ShareLevel::Private).await;
    let hub = vertex(&alice, "hub", ShareLevel::Private).await;
    let c = vertex(&alice, "c", ShareLevel::Private).await;
    let e1 = edge(&alice, &a, &hub, ShareLevel::Private).await;
    let e2 = edge(&alice, &c, &hub, ShareLevel::Private).await;

    let source = alice.graph_with_depth_and_center(2, a.uri()).await.unwrap();
    let mut cache = ForkCache::new();
    let cloned = bob.fork_subgraph(&source, &mut cache).await.unwrap();

    let clone_e1 = cloned.edge(cache.clone_of(e1.uri()).unwrap()).unwrap();
    let clone_e2 = cloned.edge(cache.clone_of(e2.uri()).unwrap()).unwrap();
    assert_eq!(clone_e1.destination, clone_e2.destination);
    assert_eq!(Some(&clone_e1.destination), cache.clone_of(hub.uri()));

    let hub_clone = stored_vertex(&fx.store, &clone_e1.destination);
    assert_eq!(hub_clone.neighbor_counts.private, 2);
}

#[tokio::test]
async fn test_explicit_share_level_override() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx
        .graph_of("bob")
        .with_fork_options(ForkOptions {
            share_level: ShareLevel::Friend,
        });

    let a = vertex(&alice, "a", ShareLevel::Public).await;
    let b = vertex(&alice, "b", ShareLevel::Private).await;
    edge(&alice, &a, &b, ShareLevel::Public).await;

    let mut cache = ForkCache::new();
    let cloned = bob.fork_from_center(a.uri(), 1, &mut cache).await.unwrap();
    for v in cloned.vertices.values() {
        assert_eq!(v.share_level(), ShareLevel::Friend);
        assert_eq!(v.neighbor_counts.friend, 1);
        assert_eq!(v.neighbor_counts.public_with_link, 0);
    }
    assert_counters_exact(&fx.store);
}

#[tokio::test]
async fn test_edge_fork_reuses_clones_from_earlier_calls() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let a = vertex(&alice, "a", ShareLevel::Private).await;
    let b = vertex(&alice, "b", ShareLevel::Private).await;
    let ab = edge(&alice, &a, &b, ShareLevel::Private).await;

    let mut cache = ForkCache::new();
    let a_clone = bob
        .fork_element(ForkSource::Vertex(a.clone()), &mut cache)
        .await
        .unwrap();
    let b_clone = bob
        .fork_element(ForkSource::Vertex(b.clone()), &mut cache)
        .await
        .unwrap();
    assert_eq!(fx.store.vertex_count(), 4);

    let ab_clone = bob
        .fork_element(ForkSource::Edge(ab.clone()), &mut cache)
        .await
        .unwrap();
    assert_eq!(fx.store.vertex_count(), 4);

    let stored = fx.store.edges(&[ab_clone.uri.clone()]).await.unwrap();
    assert_eq!(stored[0].source, a_clone.uri);
    assert_eq!(stored[0].destination, b_clone.uri);
    assert_eq!(stored_vertex(&fx.store, &a_clone.uri).neighbor_counts.private, 1);
    assert_counters_exact(&fx.store);
}

#[tokio::test]
async fn test_edge_fork_pulls_missing_endpoints_from_store() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let a = vertex(&alice, "a", ShareLevel::Private).await;
    let b = vertex(&alice, "b", ShareLevel::Private).await;
    let ab = edge(&alice, &a, &b, ShareLevel::Private).await;

    let mut cache = ForkCache::new();
    let forked = bob
        .fork_element(ForkSource::Edge(ab), &mut cache)
        .await
        .unwrap();
    assert!(forked.committed);
    assert!(cache.contains(a.uri()));
    assert!(cache.contains(b.uri()));
    assert_eq!(fx.store.vertex_count(), 4);
    assert_eq!(fx.store.edge_count(), 2);
    assert_counters_exact(&fx.store);
}

#[tokio::test]
async fn test_refork_with_same_cache_creates_nothing() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let a = vertex(&alice, "a", ShareLevel::Private).await;
    let b = vertex(&alice, "b", ShareLevel::Private).await;
    edge(&alice, &a, &b, ShareLevel::Private).await;
    let source = alice.graph_with_depth_and_center(1, a.uri()).await.unwrap();

    let mut cache = ForkCache::new();
    let first = bob.fork_subgraph(&source, &mut cache).await.unwrap();
    let second = bob.fork_subgraph(&source, &mut cache).await.unwrap();

    let first_uris: BTreeSet<&Uri> = first.vertices.keys().collect();
    let second_uris: BTreeSet<&Uri> = second.vertices.keys().collect();
    assert_eq!(first_uris, second_uris);
    assert_eq!(second.number_of_edges(), 1);
    assert_eq!(fx.store.vertex_count(), 4);
    assert_eq!(fx.store.edge_count(), 2);
}

#[tokio::test]
async fn test_failed_fork_rolls_back_everything() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let a = vertex(&alice, "a", ShareLevel::Private).await;
    let b = vertex(&alice, "b", ShareLevel::Private).await;
    edge(&alice, &a, &b, ShareLevel::Private).await;
    let source = alice.graph_with_depth_and_center(1, a.uri()).await.unwrap();

    let before = (fx.store.all_vertices(), fx.store.all_edges());
    fx.store.fail_after(2);
    let mut cache = ForkCache::new();
    let err = bob.fork_subgraph(&source, &mut cache).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(cache.is_empty());
    assert_eq!((fx.store.all_vertices(), fx.store.all_edges()), before);

    // The same cache works for a retry once the store is back.
    let cloned = bob.fork_subgraph(&source, &mut cache).await.unwrap();
    assert_eq!(cloned.number_of_vertices(), 2);
    assert_counters_exact(&fx.store);
}

#[tokio::test]
async fn test_failed_fork_keeps_earlier_entries() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let a = vertex(&alice, "a", ShareLevel::Private).await;
    let b = vertex(&alice, "b", ShareLevel::Private).await;
    let ab = edge(&alice, &a, &b, ShareLevel::Private).await;

    let mut cache = ForkCache::new();
    bob.fork_element(ForkSource::Vertex(a.clone()), &mut cache)
        .await
        .unwrap();

    fx.store.fail_after(0);
    let err = bob
        .fork_element(ForkSource::Edge(ab), &mut cache)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(a.uri()));
    assert!(!cache.contains(b.uri()));
}

#[tokio::test]
async fn test_clone_copies_description_and_relinks_tags() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let tag = Tag {
        uri: alice.owner().generate_tag_uri(),
        external_uri: "https://www.wikidata.org/wiki/Q141488".to_string(),
        label: "Graph theory".to_string(),
        comment: String::new(),
        images: Vec::new(),
    };
    let mut creation = ElementCreation::labeled("idea").share_level(ShareLevel::Public);
    creation.comment = "first draft".to_string();
    creation.colors = Some("#ff8800".to_string());
    creation.tags.push(tag.clone());
    let source = alice.create_vertex(creation).await.unwrap();

    let mut cache = ForkCache::new();
    let forked = bob
        .fork_element(ForkSource::Vertex(source.clone()), &mut cache)
        .await
        .unwrap();
    let clone = stored_vertex(&fx.store, &forked.uri);

    assert_eq!(clone.element.label, "idea");
    assert_eq!(clone.element.comment, "first draft");
    assert_eq!(clone.element.colors.as_deref(), Some("#ff8800"));
    assert_eq!(clone.share_level(), ShareLevel::Private);
    assert_eq!(clone.element.tags.get(&tag.uri), Some(&tag));
    assert!(alice.have_element_with_uri(&tag.uri).await.unwrap());
}

#[tokio::test]
async fn test_owner_notes_stay_behind() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");
    let source = vertex(&alice, "idea", ShareLevel::Public).await;
    let op = alice.vertex_with_uri(source.uri());
    op.update(ElementPatch::private_context("call Carol first"))
        .await
        .unwrap();
    op.update(ElementPatch::children_index("{\"order\":[]}"))
        .await
        .unwrap();
    let source = stored_vertex(&fx.store, source.uri());
    assert_eq!(
        source.element.private_context.as_deref(),
        Some("call Carol first")
    );

    let mut cache = ForkCache::new();
    let forked = bob
        .fork_element(ForkSource::Vertex(source), &mut cache)
        .await
        .unwrap();
    let clone = stored_vertex(&fx.store, &forked.uri);
    assert_eq!(clone.element.label, "idea");
    assert_eq!(clone.element.private_context, None);
    assert_eq!(clone.element.children_index, None);
}

#[tokio::test]
async fn test_pattern_instance_stubs_follow_their_clones() {
    let fx = Fixture::new();
    let alice = fx.graph_of("alice");
    let bob = fx.graph_of("bob");

    let member = vertex(&alice, "member", ShareLevel::Private).await;
    let pattern = alice.owner().generate_vertex_uri();

    let mut instance = trellis_core::Vertex::new(alice.owner().generate_vertex_uri());
    instance.element.label = "instance".to_string();
    instance.element.is_under_pattern = true;
    instance.element.pattern_uri = Some(pattern.clone());
    instance
        .included_vertices
        .insert(member.uri().clone(), member.stub());
    let mut batch = WriteBatch::new();
    batch.push(Mutation::CreateVertex(instance.clone()));
    fx.store.apply(batch).await.unwrap();
    edge(&alice, &instance, &member, ShareLevel::Private).await;

    let mut cache = ForkCache::new();
    bob.fork_from_center(instance.uri(), 1, &mut cache)
        .await
        .unwrap();

    let clone = stored_vertex(&fx.store, cache.clone_of(instance.uri()).unwrap());
    let member_clone = cache.clone_of(member.uri()).unwrap();
    assert!(!clone.element.is_under_pattern);
    assert_eq!(clone.element.pattern_uri, Some(pattern));
    assert_eq!(
        clone.included_vertices.get(member_clone),
        Some(&VertexStub {
            uri: member_clone.clone(),
            label: "member".to_string(),
        })
    );
    assert!(!clone.included_vertices.contains_key(member.uri()));
}
