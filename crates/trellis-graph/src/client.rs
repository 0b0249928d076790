//! Neo4j connection pool and the low-level query helpers the store
//! backend is built on.

use neo4rs::{query, ConfigBuilder, Graph, Query};

use trellis_core::config::Neo4jSettings;

use crate::error::Result;
use crate::fields::{ElementField, NodeLabel, TagField};

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::from_settings(&Neo4jSettings::default())
    }
}

impl GraphConfig {
    pub fn from_settings(settings: &Neo4jSettings) -> Self {
        Self {
            uri: settings.uri.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            max_connections: settings.max_connections,
            fetch_size: settings.fetch_size,
        }
    }
}

/// Pooled Neo4j connection implementing
/// [`GraphStore`](crate::store::GraphStore). Clones share the pool.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Open the pool. Connection and configuration failures surface as
    /// `StoreUnavailable`.
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let pool = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()?;
        let graph = Graph::connect(pool).await?;

        tracing::info!(
            uri = %config.uri,
            max_connections = config.max_connections,
            "Connected to Neo4j"
        );
        Ok(Self { graph })
    }

    /// Run a statement outside any batch, discarding its result. Used for
    /// index maintenance and administrative cleanup.
    pub async fn run(&self, query: Query) -> Result<()> {
        self.graph.run(query).await?;
        Ok(())
    }

    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// First row of a read query, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    pub async fn start_txn(&self) -> Result<neo4rs::Txn> {
        Ok(self.graph.start_txn().await?)
    }

    // ── Schema ───────────────────────────────────────────────────

    /// Create the lookup indexes the engine's queries rely on. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        let indexes = [
            (NodeLabel::Resource, ElementField::Uri.key()),
            (NodeLabel::GraphElement, ElementField::Owner.key()),
            (NodeLabel::GraphElement, ElementField::ShareLevel.key()),
            (NodeLabel::GraphElement, ElementField::IsUnderPattern.key()),
            (NodeLabel::Meta, TagField::ExternalUri.key()),
            (NodeLabel::Schema, ElementField::Owner.key()),
        ];

        for (label, property) in indexes {
            let label = label.key();
            let name = format!("{}_{}", label.to_ascii_lowercase(), property);
            let cypher = format!(
                "CREATE INDEX {name} IF NOT EXISTS FOR (n:{label}) ON (n.{property})"
            );
            self.run(query(&cypher)).await?;
            tracing::debug!(index = %name, "Ensured index");
        }

        tracing::info!(indexes = indexes.len(), "Schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn unusable_uri_is_store_unavailable() {
        let config = GraphConfig {
            uri: "not a uri".to_string(),
            ..GraphConfig::default()
        };
        match GraphClient::connect(&config).await {
            Ok(_) => panic!("connected to an unusable uri"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::StoreUnavailable),
        }
    }
}
