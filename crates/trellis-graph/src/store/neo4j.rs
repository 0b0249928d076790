//! Neo4j-backed [`GraphStore`].
//!
//! Layout:
//! - vertices are `(:Resource:GraphElement:Vertex)` nodes
//! - edges are `(:Resource:GraphElement:Edge)` nodes linked to their
//!   endpoints by `SOURCE_VERTEX` and `DESTINATION_VERTEX`
//! - tags are `(:Resource:Meta)` nodes reached through `IDENTIFIED_TO`
//! - included stubs hang off a vertex via `INCLUDED_VERTEX` / `INCLUDED_EDGE`
//! - schemas are `(:Resource:GraphElement:Schema)` nodes owning
//!   `(:Resource:GraphElement:Property)` nodes through `HAS_PROPERTY`
//!
//! Every label, relationship type and property key in the Cypher below
//! comes from [`crate::fields`]. Timestamps are stored as epoch
//! milliseconds, share levels as their integer index, and
//! images/suggestions as JSON strings. Absent optional strings are stored
//! as `""`.
//!
//! Snapshots are read transactions. Neo4j runs them at read-committed
//! isolation, so they pin every read of a traversal to one transaction
//! rather than freezing the data.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, BoltType, Query};
use serde::Deserialize;

use trellis_core::{
    Edge, EdgeStub, GraphElement, Image, NeighborCounts, Schema, ShareLevel, Suggestion, Tag,
    Uri, Vertex, VertexStub,
};

use super::{ElementPatch, Endpoint, GraphStore, Mutation, Snapshot, WriteBatch};
use crate::client::GraphClient;
use crate::error::{GraphError, Result};
use crate::fields::{ElementField, NodeLabel, Rel, TagField, VertexField};

#[async_trait]
impl GraphStore for GraphClient {
    async fn vertices(&self, uris: &[Uri]) -> Result<Vec<Vertex>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.query_rows(vertices_query(uris)).await?;
        vertices_from_rows(uris, &rows)
    }

    async fn edges(&self, uris: &[Uri]) -> Result<Vec<Edge>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let cypher = format!(
            "UNWIND $uris AS target
             MATCH (e:{edge} {{{uri}: target}})
             {hydrate}",
            edge = NodeLabel::Edge.key(),
            uri = ElementField::Uri.key(),
            hydrate = hydrate_edge(),
        );
        let rows = self
            .query_rows(query(&cypher).param("uris", uri_strings(uris)))
            .await?;
        let mut by_uri = HashMap::with_capacity(rows.len());
        for row in &rows {
            let edge = edge_from_row(row)?;
            by_uri.insert(edge.uri().clone(), edge);
        }
        Ok(in_request_order(uris, by_uri))
    }

    async fn incident_edges(&self, vertices: &[Uri]) -> Result<Vec<Edge>> {
        if vertices.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.query_rows(incident_edges_query(vertices)).await?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn schemas(&self, uris: &[Uri]) -> Result<Vec<Schema>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let schema_rows = self.query_rows(schemas_query(uris)).await?;
        let property_rows = self.query_rows(schema_properties_query(uris)).await?;

        let mut by_uri = HashMap::with_capacity(schema_rows.len());
        for row in &schema_rows {
            let node: neo4rs::Node = decode(row, "s")?;
            let tags: Vec<neo4rs::Node> = decode(row, "tags")?;
            let element = element_from_node(&node, &tags)?;
            by_uri.insert(
                element.uri.clone(),
                Schema {
                    element,
                    properties: BTreeMap::new(),
                },
            );
        }
        for row in &property_rows {
            let owner = parse_stored_uri(&decode::<String>(row, "schema")?)?;
            let node: neo4rs::Node = decode(row, "p")?;
            let tags: Vec<neo4rs::Node> = decode(row, "tags")?;
            if let Some(schema) = by_uri.get_mut(&owner) {
                schema.add_property(element_from_node(&node, &tags)?);
            }
        }
        Ok(in_request_order(uris, by_uri))
    }

    async fn element_exists(&self, uri: &Uri) -> Result<bool> {
        let cypher = format!(
            "MATCH (n:{resource} {{{uri_key}: $uri}}) RETURN count(n) AS found",
            resource = NodeLabel::Resource.key(),
            uri_key = ElementField::Uri.key(),
        );
        let q = query(&cypher).param("uri", uri.to_string());
        let found = match self.query_one(q).await? {
            Some(row) => row.get::<i64>("found").unwrap_or(0),
            None => 0,
        };
        Ok(found > 0)
    }

    async fn any_vertex_of(&self, username: &str) -> Result<Option<Uri>> {
        let cypher = format!(
            "MATCH (n:{vertex} {{{owner}: $owner}})
             RETURN n.{uri} AS uri
             ORDER BY uri
             LIMIT 1",
            vertex = NodeLabel::Vertex.key(),
            owner = ElementField::Owner.key(),
            uri = ElementField::Uri.key(),
        );
        let q = query(&cypher).param("owner", username.to_string());

        match self.query_one(q).await? {
            Some(row) => {
                let raw: String = decode(&row, "uri")?;
                Ok(Some(parse_stored_uri(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mutations = batch.len();
        let mut statements = Vec::with_capacity(mutations);
        let mut links = Vec::new();
        for mutation in batch {
            statements.extend(statements_for(mutation, &mut links)?);
        }
        // Included-element links may target records created later in the batch.
        statements.extend(links);

        let mut txn = self.start_txn().await?;
        for statement in statements {
            if let Err(e) = execute(&mut txn, statement).await {
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        }
        txn.commit().await?;

        tracing::debug!(mutations, "Applied write batch");
        Ok(())
    }

    async fn snapshot(&self) -> Result<Box<dyn Snapshot>> {
        let txn = self.start_txn().await?;
        Ok(Box::new(TxnSnapshot { txn }))
    }
}

/// Reads issued through one open transaction, rolled back on close.
struct TxnSnapshot {
    txn: neo4rs::Txn,
}

#[async_trait]
impl Snapshot for TxnSnapshot {
    async fn vertices(&mut self, uris: &[Uri]) -> Result<Vec<Vertex>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let rows = txn_rows(&mut self.txn, vertices_query(uris)).await?;
        vertices_from_rows(uris, &rows)
    }

    async fn incident_edges(&mut self, vertices: &[Uri]) -> Result<Vec<Edge>> {
        if vertices.is_empty() {
            return Ok(Vec::new());
        }
        let rows = txn_rows(&mut self.txn, incident_edges_query(vertices)).await?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let TxnSnapshot { txn } = *self;
        txn.rollback().await?;
        Ok(())
    }
}

async fn txn_rows(txn: &mut neo4rs::Txn, q: Query) -> Result<Vec<neo4rs::Row>> {
    let mut stream = txn.execute(q).await?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next(txn.handle()).await? {
        rows.push(row);
    }
    Ok(rows)
}

// ── Read Queries ─────────────────────────────────────────────────

fn vertices_query(uris: &[Uri]) -> Query {
    let cypher = format!(
        "UNWIND $uris AS target
         MATCH (n:{vertex} {{{uri}: target}})
         OPTIONAL MATCH (n)-[:{identified_to}]->(t:{meta})
         WITH n, collect(DISTINCT t) AS tags
         OPTIONAL MATCH (n)-[:{included_vertex}]->(iv:{vertex})
         WITH n, tags,
              collect(DISTINCT CASE WHEN iv IS NULL THEN NULL
                      ELSE {{uri: iv.{uri}, label: iv.{label}}} END) AS included_vertices
         OPTIONAL MATCH (n)-[:{included_edge}]->(ie:{edge}),
                        (ie)-[:{source}]->(ies:{vertex}),
                        (ie)-[:{destination}]->(ied:{vertex})
         RETURN n, tags, included_vertices,
                collect(DISTINCT CASE WHEN ie IS NULL THEN NULL
                        ELSE {{uri: ie.{uri}, label: ie.{label},
                              source_uri: ies.{uri}, source_label: ies.{label},
                              destination_uri: ied.{uri}, destination_label: ied.{label}}}
                        END) AS included_edges",
        vertex = NodeLabel::Vertex.key(),
        edge = NodeLabel::Edge.key(),
        meta = NodeLabel::Meta.key(),
        uri = ElementField::Uri.key(),
        label = ElementField::Label.key(),
        identified_to = Rel::IdentifiedTo.key(),
        included_vertex = Rel::IncludedVertex.key(),
        included_edge = Rel::IncludedEdge.key(),
        source = Rel::SourceVertex.key(),
        destination = Rel::DestinationVertex.key(),
    );
    query(&cypher).param("uris", uri_strings(uris))
}

fn incident_edges_query(vertices: &[Uri]) -> Query {
    let cypher = format!(
        "UNWIND $uris AS target
         MATCH (:{vertex} {{{uri}: target}})<-[:{source}|{destination}]-(e:{edge})
         WITH DISTINCT e
         {hydrate}
         ORDER BY e.{uri}",
        vertex = NodeLabel::Vertex.key(),
        edge = NodeLabel::Edge.key(),
        uri = ElementField::Uri.key(),
        source = Rel::SourceVertex.key(),
        destination = Rel::DestinationVertex.key(),
        hydrate = hydrate_edge(),
    );
    query(&cypher).param("uris", uri_strings(vertices))
}

/// Tail shared by edge reads: endpoints and tags of a bound `e`.
fn hydrate_edge() -> String {
    format!(
        "MATCH (s:{vertex})<-[:{source}]-(e)-[:{destination}]->(d:{vertex})
         OPTIONAL MATCH (e)-[:{identified_to}]->(t:{meta})
         RETURN e, s.{uri} AS source, d.{uri} AS destination, collect(DISTINCT t) AS tags",
        vertex = NodeLabel::Vertex.key(),
        meta = NodeLabel::Meta.key(),
        uri = ElementField::Uri.key(),
        source = Rel::SourceVertex.key(),
        destination = Rel::DestinationVertex.key(),
        identified_to = Rel::IdentifiedTo.key(),
    )
}

fn schemas_query(uris: &[Uri]) -> Query {
    let cypher = format!(
        "UNWIND $uris AS target
         MATCH (s:{schema} {{{uri}: target}})
         OPTIONAL MATCH (s)-[:{identified_to}]->(t:{meta})
         RETURN s, collect(DISTINCT t) AS tags",
        schema = NodeLabel::Schema.key(),
        meta = NodeLabel::Meta.key(),
        uri = ElementField::Uri.key(),
        identified_to = Rel::IdentifiedTo.key(),
    );
    query(&cypher).param("uris", uri_strings(uris))
}

fn schema_properties_query(uris: &[Uri]) -> Query {
    let cypher = format!(
        "UNWIND $uris AS target
         MATCH (s:{schema} {{{uri}: target}})-[:{has_property}]->(p:{property})
         OPTIONAL MATCH (p)-[:{identified_to}]->(t:{meta})
         RETURN s.{uri} AS schema, p, collect(DISTINCT t) AS tags",
        schema = NodeLabel::Schema.key(),
        property = NodeLabel::Property.key(),
        meta = NodeLabel::Meta.key(),
        uri = ElementField::Uri.key(),
        has_property = Rel::HasProperty.key(),
        identified_to = Rel::IdentifiedTo.key(),
    );
    query(&cypher).param("uris", uri_strings(uris))
}

fn vertices_from_rows(uris: &[Uri], rows: &[neo4rs::Row]) -> Result<Vec<Vertex>> {
    let mut by_uri = HashMap::with_capacity(rows.len());
    for row in rows {
        let vertex = vertex_from_row(row)?;
        by_uri.insert(vertex.uri().clone(), vertex);
    }
    Ok(in_request_order(uris, by_uri))
}

// ── Statements ───────────────────────────────────────────────────

/// One Cypher statement of a batch. When `on_zero` is set, the statement
/// returns an `affected` count and a count of zero aborts the batch.
struct Statement {
    query: Query,
    on_zero: Option<GraphError>,
}

impl Statement {
    fn plain(query: Query) -> Self {
        Self {
            query,
            on_zero: None,
        }
    }

    fn checked(query: Query, on_zero: GraphError) -> Self {
        Self {
            query,
            on_zero: Some(on_zero),
        }
    }
}

async fn execute(txn: &mut neo4rs::Txn, statement: Statement) -> Result<()> {
    let Some(on_zero) = statement.on_zero else {
        txn.run(statement.query).await?;
        return Ok(());
    };

    let affected: i64 = txn_rows(txn, statement.query)
        .await?
        .iter()
        .map(|row| row.get::<i64>("affected").unwrap_or(0))
        .sum();
    if affected == 0 {
        return Err(on_zero);
    }
    Ok(())
}

fn statements_for(mutation: Mutation, links: &mut Vec<Statement>) -> Result<Vec<Statement>> {
    let vertex_label = NodeLabel::Vertex.key();
    let edge_label = NodeLabel::Edge.key();
    let uri_key = ElementField::Uri.key();
    let modified_key = ElementField::LastModificationDate.key();

    let statements = match mutation {
        Mutation::CreateVertex(vertex) => create_vertex(vertex, links)?,
        Mutation::CreateEdge(edge) => create_edge(edge)?,
        Mutation::UpdateElement { uri, patch, at } => update_element(&uri, patch, at)?,
        Mutation::AdjustNeighborCounts { vertex, delta } => {
            let assignments: Vec<String> = ShareLevel::ALL
                .iter()
                .map(|tier| {
                    let key = VertexField::neighbor_count(*tier).key();
                    format!("n.{key} = coalesce(n.{key}, 0) + $d{}", tier.ordinal())
                })
                .collect();
            let cypher = format!(
                "MATCH (n:{vertex_label} {{{uri_key}: $uri}})
                 SET {}
                 RETURN count(n) AS affected",
                assignments.join(", ")
            );
            let mut q = query(&cypher).param("uri", vertex.to_string());
            for tier in ShareLevel::ALL {
                q = q.param(&format!("d{}", tier.ordinal()), delta.get(tier));
            }
            vec![Statement::checked(q, GraphError::missing_vertex(&vertex))]
        }
        Mutation::SetEndpoint {
            edge,
            endpoint,
            vertex,
            at,
        } => {
            let rel = match endpoint {
                Endpoint::Source => Rel::SourceVertex.key(),
                Endpoint::Destination => Rel::DestinationVertex.key(),
            };
            let cypher = format!(
                "MATCH (e:{edge_label} {{{uri_key}: $edge}})-[r:{rel}]->(:{vertex_label}),
                       (v:{vertex_label} {{{uri_key}: $vertex}})
                 DELETE r
                 CREATE (e)-[:{rel}]->(v)
                 SET e.{modified_key} = $at
                 RETURN count(e) AS affected"
            );
            let q = query(&cypher)
                .param("edge", edge.to_string())
                .param("vertex", vertex.to_string())
                .param("at", at.timestamp_millis());
            vec![Statement::checked(
                q,
                GraphError::ReferentialIntegrity {
                    uri: edge.to_string(),
                    reason: format!("edge or vertex {vertex} does not exist"),
                },
            )]
        }
        Mutation::SwapEndpoints { edge, at } => {
            let cypher = format!(
                "MATCH (s:{vertex_label})<-[rs:{source}]-(e:{edge_label} {{{uri_key}: $edge}})-[rd:{destination}]->(d:{vertex_label})
                 DELETE rs, rd
                 CREATE (e)-[:{source}]->(d)
                 CREATE (e)-[:{destination}]->(s)
                 SET e.{modified_key} = $at
                 RETURN count(e) AS affected",
                source = Rel::SourceVertex.key(),
                destination = Rel::DestinationVertex.key(),
            );
            let q = query(&cypher)
                .param("edge", edge.to_string())
                .param("at", at.timestamp_millis());
            vec![Statement::checked(q, GraphError::not_found(&edge))]
        }
        Mutation::AttachTag { element, tag } => vec![attach_tag(&element, &tag)?],
        Mutation::DetachTag { element, tag } => {
            let cypher = format!(
                "MATCH (n:{graph_element} {{{uri_key}: $element}})
                 OPTIONAL MATCH (n)-[r:{identified_to}]->(:{meta} {{{tag_uri}: $tag}})
                 DELETE r
                 RETURN count(n) AS affected",
                graph_element = NodeLabel::GraphElement.key(),
                meta = NodeLabel::Meta.key(),
                identified_to = Rel::IdentifiedTo.key(),
                tag_uri = TagField::Uri.key(),
            );
            let q = query(&cypher)
                .param("element", element.to_string())
                .param("tag", tag.to_string());
            vec![Statement::checked(q, GraphError::not_found(&element))]
        }
        Mutation::DeleteEdge(uri) => {
            let cypher = format!(
                "MATCH (e:{edge_label} {{{uri_key}: $uri}})
                 DETACH DELETE e
                 RETURN count(*) AS affected"
            );
            let q = query(&cypher).param("uri", uri.to_string());
            vec![Statement::checked(q, GraphError::not_found(&uri))]
        }
        Mutation::DeleteVertex(uri) => {
            let cypher = format!(
                "MATCH (v:{vertex_label} {{{uri_key}: $uri}})
                 WHERE NOT (v)<-[:{source}|{destination}]-(:{edge_label})
                 DETACH DELETE v
                 RETURN count(*) AS affected",
                source = Rel::SourceVertex.key(),
                destination = Rel::DestinationVertex.key(),
            );
            let q = query(&cypher).param("uri", uri.to_string());
            vec![Statement::checked(
                q,
                GraphError::ReferentialIntegrity {
                    uri: uri.to_string(),
                    reason: "vertex is missing or still has edges".to_string(),
                },
            )]
        }
        Mutation::CreateSchema(schema) => create_schema(schema)?,
        Mutation::AddSchemaProperty { schema, property } => add_property(&schema, &property)?,
    };
    Ok(statements)
}

/// `CREATE` guarded by a uniqueness check on the new node's URI.
fn create_unique(labels: &[NodeLabel]) -> String {
    let labels: Vec<&str> = labels.iter().map(|l| l.key()).collect();
    format!(
        "OPTIONAL MATCH (existing:{resource} {{{uri}: $uri}})
         WITH existing WHERE existing IS NULL
         CREATE (n:{labels})
         SET n = $props
         RETURN count(n) AS affected",
        resource = NodeLabel::Resource.key(),
        uri = ElementField::Uri.key(),
        labels = labels.join(":"),
    )
}

fn already_exists(uri: &Uri) -> GraphError {
    GraphError::ReferentialIntegrity {
        uri: uri.to_string(),
        reason: "element already exists".to_string(),
    }
}

fn create_vertex(vertex: Vertex, links: &mut Vec<Statement>) -> Result<Vec<Statement>> {
    let uri = vertex.uri().clone();
    let mut props = element_props(&vertex.element)?;
    for tier in ShareLevel::ALL {
        props.insert(
            VertexField::neighbor_count(tier).key().to_string(),
            vertex.neighbor_counts.get(tier).into(),
        );
    }
    props.insert(
        VertexField::IsPublic.key().to_string(),
        vertex.is_public().into(),
    );
    props.insert(
        VertexField::Suggestions.key().to_string(),
        to_json(&vertex.suggestions)?.into(),
    );

    let cypher = create_unique(&[NodeLabel::Resource, NodeLabel::GraphElement, NodeLabel::Vertex]);
    let create = query(&cypher)
        .param("uri", uri.to_string())
        .param("props", props);
    let mut statements = vec![Statement::checked(create, already_exists(&uri))];

    let included = [
        (
            Rel::IncludedVertex,
            NodeLabel::Vertex,
            vertex.included_vertices.keys().collect::<Vec<_>>(),
        ),
        (
            Rel::IncludedEdge,
            NodeLabel::Edge,
            vertex.included_edges.keys().collect::<Vec<_>>(),
        ),
    ];
    for (rel, target_label, targets) in included {
        if targets.is_empty() {
            continue;
        }
        let cypher = format!(
            "MATCH (n:{vertex} {{{uri_key}: $uri}})
             UNWIND $targets AS target
             MATCH (t:{target_label} {{{uri_key}: target}})
             MERGE (n)-[:{rel}]->(t)",
            vertex = NodeLabel::Vertex.key(),
            uri_key = ElementField::Uri.key(),
            target_label = target_label.key(),
            rel = rel.key(),
        );
        let targets: Vec<String> = targets.iter().map(|u| u.to_string()).collect();
        links.push(Statement::plain(
            query(&cypher)
                .param("uri", uri.to_string())
                .param("targets", targets),
        ));
    }
    for tag in vertex.element.tags.values() {
        statements.push(attach_tag(&uri, tag)?);
    }
    Ok(statements)
}

fn create_edge(edge: Edge) -> Result<Vec<Statement>> {
    let uri = edge.uri().clone();
    let cypher = format!(
        "MATCH (s:{vertex} {{{uri_key}: $source}}), (d:{vertex} {{{uri_key}: $destination}})
         CREATE (s)<-[:{source}]-(e:{resource}:{graph_element}:{edge})-[:{destination}]->(d)
         SET e = $props
         RETURN count(e) AS affected",
        vertex = NodeLabel::Vertex.key(),
        edge = NodeLabel::Edge.key(),
        resource = NodeLabel::Resource.key(),
        graph_element = NodeLabel::GraphElement.key(),
        uri_key = ElementField::Uri.key(),
        source = Rel::SourceVertex.key(),
        destination = Rel::DestinationVertex.key(),
    );
    let create = query(&cypher)
        .param("source", edge.source.to_string())
        .param("destination", edge.destination.to_string())
        .param("props", element_props(&edge.element)?);

    let mut statements = vec![Statement::checked(
        create,
        GraphError::ReferentialIntegrity {
            uri: uri.to_string(),
            reason: "endpoint vertex does not exist".to_string(),
        },
    )];
    for tag in edge.element.tags.values() {
        statements.push(attach_tag(&uri, tag)?);
    }
    Ok(statements)
}

fn create_schema(schema: Schema) -> Result<Vec<Statement>> {
    let uri = schema.uri().clone();
    let cypher = create_unique(&[NodeLabel::Resource, NodeLabel::GraphElement, NodeLabel::Schema]);
    let create = query(&cypher)
        .param("uri", uri.to_string())
        .param("props", element_props(&schema.element)?);

    let mut statements = vec![Statement::checked(create, already_exists(&uri))];
    for tag in schema.element.tags.values() {
        statements.push(attach_tag(&uri, tag)?);
    }
    for property in schema.properties.values() {
        statements.extend(add_property(&uri, property)?);
    }
    Ok(statements)
}

fn add_property(schema: &Uri, property: &GraphElement) -> Result<Vec<Statement>> {
    let cypher = format!(
        "MATCH (s:{schema_label} {{{uri_key}: $schema}})
         OPTIONAL MATCH (existing:{resource} {{{uri_key}: $uri}})
         WITH s, existing WHERE existing IS NULL
         CREATE (s)-[:{has_property}]->(p:{resource}:{graph_element}:{property_label})
         SET p = $props
         RETURN count(p) AS affected",
        schema_label = NodeLabel::Schema.key(),
        property_label = NodeLabel::Property.key(),
        resource = NodeLabel::Resource.key(),
        graph_element = NodeLabel::GraphElement.key(),
        uri_key = ElementField::Uri.key(),
        has_property = Rel::HasProperty.key(),
    );
    let create = query(&cypher)
        .param("schema", schema.to_string())
        .param("uri", property.uri.to_string())
        .param("props", element_props(property)?);

    let mut statements = vec![Statement::checked(
        create,
        GraphError::ReferentialIntegrity {
            uri: property.uri.to_string(),
            reason: format!("schema {schema} is missing or the property already exists"),
        },
    )];
    for tag in property.tags.values() {
        statements.push(attach_tag(&property.uri, tag)?);
    }
    Ok(statements)
}

fn update_element(uri: &Uri, patch: ElementPatch, at: DateTime<Utc>) -> Result<Vec<Statement>> {
    let mut props: HashMap<String, BoltType> = HashMap::new();
    let mut set = |field: ElementField, value: BoltType| {
        props.insert(field.key().to_string(), value);
    };
    if let Some(label) = patch.label {
        set(ElementField::Label, label.into());
    }
    if let Some(comment) = patch.comment {
        set(ElementField::Comment, comment.into());
    }
    if let Some(colors) = patch.colors {
        set(ElementField::Colors, colors.into());
    }
    if let Some(font) = patch.font {
        set(ElementField::Font, font.into());
    }
    if let Some(images) = &patch.images {
        set(ElementField::Images, to_json(images)?.into());
    }
    if let Some(level) = patch.share_level {
        set(ElementField::ShareLevel, level.index().into());
    }
    if let Some(index) = patch.children_index {
        set(ElementField::ChildrenIndex, index.into());
    }
    if let Some(context) = patch.private_context {
        set(ElementField::PrivateContext, context.into());
    }
    set(ElementField::LastModificationDate, at.timestamp_millis().into());

    let cypher = format!(
        "MATCH (n:{graph_element} {{{uri_key}: $uri}})
         SET n += $props
         RETURN count(n) AS affected",
        graph_element = NodeLabel::GraphElement.key(),
        uri_key = ElementField::Uri.key(),
    );
    let update = query(&cypher)
        .param("uri", uri.to_string())
        .param("props", props);

    let mut statements = vec![Statement::checked(update, GraphError::not_found(uri))];
    if let Some(level) = patch.share_level {
        let flag = format!(
            "MATCH (n:{vertex} {{{uri_key}: $uri}}) SET n.{is_public} = $is_public",
            vertex = NodeLabel::Vertex.key(),
            uri_key = ElementField::Uri.key(),
            is_public = VertexField::IsPublic.key(),
        );
        statements.push(Statement::plain(
            query(&flag)
                .param("uri", uri.to_string())
                .param("is_public", level.is_public()),
        ));
    }
    Ok(statements)
}

fn attach_tag(element: &Uri, tag: &Tag) -> Result<Statement> {
    let cypher = format!(
        "MATCH (n:{graph_element} {{{uri_key}: $element}})
         MERGE (t:{resource}:{meta} {{{tag_uri}: $tag}})
         ON CREATE SET t = $props
         MERGE (n)-[:{identified_to}]->(t)
         RETURN count(n) AS affected",
        graph_element = NodeLabel::GraphElement.key(),
        resource = NodeLabel::Resource.key(),
        meta = NodeLabel::Meta.key(),
        uri_key = ElementField::Uri.key(),
        tag_uri = TagField::Uri.key(),
        identified_to = Rel::IdentifiedTo.key(),
    );
    let q = query(&cypher)
        .param("element", element.to_string())
        .param("tag", tag.uri.to_string())
        .param("props", tag_props(tag)?);
    Ok(Statement::checked(q, GraphError::not_found(element)))
}

// ── Property Encoding ────────────────────────────────────────────

fn element_props(element: &GraphElement) -> Result<HashMap<String, BoltType>> {
    let mut props = HashMap::with_capacity(ElementField::ALL.len());
    for field in ElementField::ALL {
        let value: BoltType = match field {
            ElementField::Uri => element.uri.to_string().into(),
            ElementField::Owner => element.owner_username().to_string().into(),
            ElementField::Label => element.label.clone().into(),
            ElementField::Comment => element.comment.clone().into(),
            ElementField::CreationDate => element.creation_date.timestamp_millis().into(),
            ElementField::LastModificationDate => {
                element.last_modification_date.timestamp_millis().into()
            }
            ElementField::Images => to_json(&element.images)?.into(),
            ElementField::Colors => element.colors.clone().unwrap_or_default().into(),
            ElementField::Font => element.font.clone().unwrap_or_default().into(),
            ElementField::ShareLevel => element.share_level.index().into(),
            ElementField::IsUnderPattern => element.is_under_pattern.into(),
            ElementField::PatternUri => element
                .pattern_uri
                .as_ref()
                .map(|u| u.to_string())
                .unwrap_or_default()
                .into(),
            ElementField::ChildrenIndex => element.children_index.clone().unwrap_or_default().into(),
            ElementField::PrivateContext => {
                element.private_context.clone().unwrap_or_default().into()
            }
        };
        props.insert(field.key().to_string(), value);
    }
    Ok(props)
}

fn tag_props(tag: &Tag) -> Result<HashMap<String, BoltType>> {
    let mut props: HashMap<String, BoltType> = HashMap::new();
    props.insert(TagField::Uri.key().to_string(), tag.uri.to_string().into());
    props.insert(
        TagField::ExternalUri.key().to_string(),
        tag.external_uri.clone().into(),
    );
    props.insert(TagField::Label.key().to_string(), tag.label.clone().into());
    props.insert(TagField::Comment.key().to_string(), tag.comment.clone().into());
    props.insert(TagField::Images.key().to_string(), to_json(&tag.images)?.into());
    Ok(props)
}

fn to_json<T: serde::Serialize>(val: &T) -> Result<String> {
    serde_json::to_string(val).map_err(|e| GraphError::Serialization(e.to_string()))
}

// ── Row Decoding ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct VertexStubRow {
    uri: String,
    label: Option<String>,
}

#[derive(Deserialize)]
struct EdgeStubRow {
    uri: String,
    label: Option<String>,
    source_uri: String,
    source_label: Option<String>,
    destination_uri: String,
    destination_label: Option<String>,
}

fn vertex_from_row(row: &neo4rs::Row) -> Result<Vertex> {
    let node: neo4rs::Node = decode(row, "n")?;
    let tags: Vec<neo4rs::Node> = decode(row, "tags")?;
    let element = element_from_node(&node, &tags)?;

    let mut neighbor_counts = NeighborCounts::default();
    let mut delta = trellis_core::TierDelta::default();
    for tier in ShareLevel::ALL {
        delta.0[tier.ordinal()] = node
            .get::<i64>(VertexField::neighbor_count(tier).key())
            .unwrap_or(0);
    }
    neighbor_counts.apply(delta);

    let suggestions: BTreeMap<String, Suggestion> =
        from_json(&string_prop(&node, VertexField::Suggestions.key()))?;

    let mut included_vertices = BTreeMap::new();
    for stub in decode::<Vec<VertexStubRow>>(row, "included_vertices")? {
        let stub = VertexStub {
            uri: parse_stored_uri(&stub.uri)?,
            label: stub.label.unwrap_or_default(),
        };
        included_vertices.insert(stub.uri.clone(), stub);
    }

    let mut included_edges = BTreeMap::new();
    for stub in decode::<Vec<EdgeStubRow>>(row, "included_edges")? {
        let stub = EdgeStub {
            uri: parse_stored_uri(&stub.uri)?,
            label: stub.label.unwrap_or_default(),
            source: VertexStub {
                uri: parse_stored_uri(&stub.source_uri)?,
                label: stub.source_label.unwrap_or_default(),
            },
            destination: VertexStub {
                uri: parse_stored_uri(&stub.destination_uri)?,
                label: stub.destination_label.unwrap_or_default(),
            },
        };
        included_edges.insert(stub.uri.clone(), stub);
    }

    Ok(Vertex {
        element,
        neighbor_counts,
        suggestions,
        included_vertices,
        included_edges,
    })
}

fn edge_from_row(row: &neo4rs::Row) -> Result<Edge> {
    let node: neo4rs::Node = decode(row, "e")?;
    let tags: Vec<neo4rs::Node> = decode(row, "tags")?;
    let source: String = decode(row, "source")?;
    let destination: String = decode(row, "destination")?;
    Ok(Edge {
        element: element_from_node(&node, &tags)?,
        source: parse_stored_uri(&source)?,
        destination: parse_stored_uri(&destination)?,
    })
}

fn element_from_node(node: &neo4rs::Node, tags: &[neo4rs::Node]) -> Result<GraphElement> {
    let uri = parse_stored_uri(&string_prop(node, ElementField::Uri.key()))?;
    let share_index = node
        .get::<i64>(ElementField::ShareLevel.key())
        .unwrap_or(ShareLevel::Private.index());
    let share_level = ShareLevel::from_index(share_index).ok_or_else(|| {
        GraphError::Serialization(format!("unknown share level index {share_index} on {uri}"))
    })?;

    let mut element = GraphElement::new(uri);
    element.label = string_prop(node, ElementField::Label.key());
    element.comment = string_prop(node, ElementField::Comment.key());
    element.creation_date = millis_prop(node, ElementField::CreationDate.key());
    element.last_modification_date = millis_prop(node, ElementField::LastModificationDate.key());
    element.images = from_json(&string_prop(node, ElementField::Images.key()))?;
    element.colors = non_empty(string_prop(node, ElementField::Colors.key()));
    element.font = non_empty(string_prop(node, ElementField::Font.key()));
    element.share_level = share_level;
    element.is_under_pattern = node
        .get::<bool>(ElementField::IsUnderPattern.key())
        .unwrap_or(false);
    element.pattern_uri = match non_empty(string_prop(node, ElementField::PatternUri.key())) {
        Some(raw) => Some(parse_stored_uri(&raw)?),
        None => None,
    };
    element.children_index = non_empty(string_prop(node, ElementField::ChildrenIndex.key()));
    element.private_context = non_empty(string_prop(node, ElementField::PrivateContext.key()));
    for tag in tags {
        let tag = tag_from_node(tag)?;
        element.tags.insert(tag.uri.clone(), tag);
    }
    Ok(element)
}

fn tag_from_node(node: &neo4rs::Node) -> Result<Tag> {
    let images: Vec<Image> = from_json(&string_prop(node, TagField::Images.key()))?;
    Ok(Tag {
        uri: parse_stored_uri(&string_prop(node, TagField::Uri.key()))?,
        external_uri: string_prop(node, TagField::ExternalUri.key()),
        label: string_prop(node, TagField::Label.key()),
        comment: string_prop(node, TagField::Comment.key()),
        images,
    })
}

fn decode<T: serde::de::DeserializeOwned>(row: &neo4rs::Row, key: &str) -> Result<T> {
    row.get::<T>(key)
        .map_err(|e| GraphError::Serialization(format!("Failed to decode column {key}: {e}")))
}

fn string_prop(node: &neo4rs::Node, key: &str) -> String {
    node.get::<String>(key).unwrap_or_default()
}

fn millis_prop(node: &neo4rs::Node, key: &str) -> DateTime<Utc> {
    node.get::<i64>(key)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn from_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> Result<T> {
    if raw.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(|e| GraphError::Serialization(e.to_string()))
}

fn parse_stored_uri(raw: &str) -> Result<Uri> {
    Uri::parse(raw).map_err(|e| GraphError::Serialization(e.to_string()))
}

fn uri_strings(uris: &[Uri]) -> Vec<String> {
    uris.iter().map(|u| u.to_string()).collect()
}

fn in_request_order<T>(uris: &[Uri], mut by_uri: HashMap<Uri, T>) -> Vec<T> {
    uris.iter().filter_map(|uri| by_uri.remove(uri)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::UserUris;

    #[test]
    fn element_props_cover_every_field() {
        let uri = UserUris::for_username("alice").unwrap().generate_vertex_uri();
        let element = GraphElement::new(uri);
        let props = element_props(&element).unwrap();
        for field in ElementField::ALL {
            assert!(props.contains_key(field.key()), "missing {}", field.key());
        }
    }

    #[test]
    fn empty_json_decodes_to_default() {
        let images: Vec<Image> = from_json("").unwrap();
        assert!(images.is_empty());
        assert!(from_json::<Vec<Image>>("not json").is_err());
    }

    #[test]
    fn request_order_is_kept() {
        let ns = UserUris::for_username("alice").unwrap();
        let a = ns.generate_vertex_uri();
        let b = ns.generate_vertex_uri();
        let mut by_uri = HashMap::new();
        by_uri.insert(a.clone(), 1);
        by_uri.insert(b.clone(), 2);
        assert_eq!(in_request_order(&[b, a], by_uri), vec![2, 1]);
    }

    #[test]
    fn cypher_is_built_from_the_registries() {
        let tail = hydrate_edge();
        assert!(tail.contains(&format!("-[:{}]->", Rel::DestinationVertex.key())));
        assert!(tail.contains(&format!("(t:{})", NodeLabel::Meta.key())));

        let create = create_unique(&[
            NodeLabel::Resource,
            NodeLabel::GraphElement,
            NodeLabel::Schema,
        ]);
        assert!(create.contains("CREATE (n:Resource:GraphElement:Schema)"));
        assert!(create.contains("{uri: $uri}"));
    }

    #[test]
    fn schema_creation_writes_properties_after_the_schema() {
        let ns = UserUris::for_username("alice").unwrap();
        let mut schema = Schema::new(ns.generate_schema_uri());
        schema.add_property(GraphElement::new(ns.generate_property_uri()));
        schema.add_property(GraphElement::new(ns.generate_property_uri()));

        let mut links = Vec::new();
        let statements = statements_for(Mutation::CreateSchema(schema), &mut links).unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|s| s.on_zero.is_some()));
        assert!(links.is_empty());
    }
}
