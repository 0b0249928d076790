//! Schemas and their properties against the in-memory store.

mod common;

use trellis_core::{ShareLevel, Tag};
use trellis_graph::{ElementCreation, ElementPatch, ElementState, ErrorKind};

use common::{vertex, Fixture};

fn tag(graph: &trellis_graph::UserGraph, label: &str) -> Tag {
    Tag {
        uri: graph.owner().generate_tag_uri(),
        external_uri: format!("https://www.wikidata.org/wiki/{label}"),
        label: label.to_string(),
        comment: String::new(),
        images: Vec::new(),
    }
}

#[tokio::test]
async fn test_create_schema_in_owner_namespace() {
    let fx = Fixture::new();
    let g = fx.graph_of("alice");

    let schema = g
        .create_schema(ElementCreation::labeled("Person"))
        .await
        .unwrap();
    assert_eq!(schema.uri().owner_username(), "alice");
    assert!(schema.properties.is_empty());
    assert!(g.have_element_with_uri(schema.uri()).await.unwrap());

    let read = g.schema(schema.uri()).await.unwrap();
    assert_eq!(read.element.label, "Person");
    assert_eq!(fx.store.schema_count(), 1);
    assert_eq!(fx.store.vertex_count(), 0);
}

#[tokio::test]
async fn test_properties_and_tags_come_back_with_the_schema() {
    let fx = Fixture::new();
    let g = fx.graph_of("alice");
    let schema = g
        .create_schema(ElementCreation::labeled("Book"))
        .await
        .unwrap();
    let op = g.schema_with_uri(schema.uri());

    let title = op
        .add_property(ElementCreation::labeled("title"))
        .await
        .unwrap();
    let author = op
        .add_property(ElementCreation::labeled("author"))
        .await
        .unwrap();
    let book = tag(&g, "Q571");
    let person = tag(&g, "Q5");
    op.add_tag(book.clone()).await.unwrap();
    op.add_property_tag(&author.uri, person.clone()).await.unwrap();
    op.update_property(&title.uri, ElementPatch::comment("as printed"))
        .await
        .unwrap();

    let read = g.schema(schema.uri()).await.unwrap();
    assert_eq!(read.properties.len(), 2);
    assert_eq!(read.element.tags.get(&book.uri), Some(&book));
    assert_eq!(read.property(&title.uri).unwrap().comment, "as printed");
    assert_eq!(
        read.property(&author.uri).unwrap().tags.get(&person.uri),
        Some(&person)
    );
    assert_eq!(title.uri.owner_username(), "alice");
}

#[tokio::test]
async fn test_foreign_property_is_rejected() {
    let fx = Fixture::new();
    let g = fx.graph_of("alice");
    let first = g
        .create_schema(ElementCreation::labeled("first"))
        .await
        .unwrap();
    let second = g
        .create_schema(ElementCreation::labeled("second"))
        .await
        .unwrap();
    let property = g
        .schema_with_uri(first.uri())
        .add_property(ElementCreation::labeled("p"))
        .await
        .unwrap();

    let err = g
        .schema_with_uri(second.uri())
        .update_property(&property.uri, ElementPatch::label("stolen"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_missing_schema_is_not_found() {
    let fx = Fixture::new();
    let g = fx.graph_of("alice");
    let ghost = g.owner().generate_schema_uri();

    let err = g.schema(&ghost).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = g
        .schema_with_uri(&ghost)
        .add_property(ElementCreation::labeled("p"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_schema_is_not_a_vertex() {
    let fx = Fixture::new();
    let g = fx.graph_of("alice");
    vertex(&g, "v", ShareLevel::Private).await;
    let schema = g
        .create_schema(ElementCreation::labeled("S"))
        .await
        .unwrap();

    let err = g
        .graph_with_depth_and_center(1, schema.uri())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        g.schema_with_uri(schema.uri()).state(),
        ElementState::Created
    );
}
