//! CLI entry point for Trellis.
//!
//! Every command acts on behalf of one user (`--user`) and prints its
//! result as JSON on stdout. Logs go to stderr.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use trellis_core::config::TrellisConfig;
use trellis_core::{ShareLevel, Uri, UserUris};
use trellis_graph::{
    ElementCreation, ForkCache, ForkOptions, GraphClient, GraphConfig, GraphContext,
    SubGraphQuery, UserGraph,
};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Query, edit, and fork Trellis user graphs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Acting username.
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Config file prefix (default: trellis).
    #[arg(short, long, default_value = "trellis", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create the store's indexes.
    InitSchema,
    /// Extract the subgraph around a vertex.
    Extract {
        #[arg(long)]
        center: Uri,
        /// Hop bound (default from config).
        #[arg(long)]
        depth: Option<i64>,
        /// Admitted share levels, comma separated.
        #[arg(long, value_delimiter = ',')]
        share_levels: Vec<ShareLevel>,
        /// Maximum number of vertices returned.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Extract the subgraph around a vertex and fork it into the acting user's graph.
    Fork {
        #[arg(long)]
        center: Uri,
        #[arg(long)]
        depth: Option<i64>,
    },
    /// Create a vertex.
    CreateVertex {
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long, default_value = "private")]
        share_level: ShareLevel,
    },
    /// Create an edge between two existing vertices.
    CreateEdge {
        #[arg(long)]
        source: Uri,
        #[arg(long)]
        destination: Uri,
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long, default_value = "private")]
        share_level: ShareLevel,
    },
    /// Move one endpoint of an edge.
    Rewire {
        #[arg(long)]
        edge: Uri,
        /// New source vertex.
        #[arg(long, conflicts_with = "destination", required_unless_present = "destination")]
        source: Option<Uri>,
        /// New destination vertex.
        #[arg(long)]
        destination: Option<Uri>,
    },
    /// Recount a vertex's neighbor counters and compare with the stored ones.
    Verify {
        #[arg(long)]
        vertex: Uri,
    },
    /// Create an empty schema.
    CreateSchema {
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Add a property to a schema.
    AddProperty {
        #[arg(long)]
        schema: Uri,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Print a schema with its properties.
    ShowSchema {
        #[arg(long)]
        schema: Uri,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = TrellisConfig::load(&cli.config)?;

    let client = GraphClient::connect(&GraphConfig::from_settings(&config.neo4j)).await?;
    if let Command::InitSchema = cli.command {
        client.ensure_schema().await?;
        println!("{}", serde_json::json!({ "schema": "ok" }));
        return Ok(());
    }

    let ctx = GraphContext::new(Arc::new(client));
    let graph = UserGraph::new(ctx, resolve_user(&cli)?).with_fork_options(ForkOptions {
        share_level: config.fork.share_level,
    });
    let default_depth = i64::from(config.extract.default_depth);

    match cli.command {
        Command::InitSchema => {}
        Command::Extract {
            center,
            depth,
            share_levels,
            limit,
        } => {
            let mut query = SubGraphQuery::with_depth(center, depth.unwrap_or(default_depth));
            if !share_levels.is_empty() {
                query.share_levels = Some(share_levels.into_iter().collect());
            }
            query.results_limit = limit.or(config.extract.results_limit);
            let subgraph = graph.extract(&query).await?;
            println!("{}", serde_json::to_string(&subgraph)?);
        }
        Command::Fork { center, depth } => {
            let mut cache = ForkCache::new();
            let cloned = graph
                .fork_from_center(&center, depth.unwrap_or(default_depth), &mut cache)
                .await?;
            tracing::info!(
                center = %center,
                cloned = cache.len(),
                "Fork committed"
            );
            println!("{}", serde_json::to_string(&cloned)?);
        }
        Command::CreateVertex { label, share_level } => {
            let vertex = graph
                .create_vertex(ElementCreation::labeled(label).share_level(share_level))
                .await?;
            println!("{}", serde_json::to_string(&vertex)?);
        }
        Command::CreateEdge {
            source,
            destination,
            label,
            share_level,
        } => {
            let edge = graph
                .create_edge(
                    &source,
                    &destination,
                    ElementCreation::labeled(label).share_level(share_level),
                )
                .await?;
            println!("{}", serde_json::to_string(&edge)?);
        }
        Command::Rewire {
            edge,
            source,
            destination,
        } => {
            let operator = graph.edge_with_uri(&edge);
            let rewired = match (source, destination) {
                (Some(source), _) => operator.change_source_vertex(&source).await?,
                (None, Some(destination)) => operator.change_destination_vertex(&destination).await?,
                (None, None) => anyhow::bail!("--source or --destination is required"),
            };
            println!("{}", serde_json::to_string(&rewired)?);
        }
        Command::Verify { vertex } => {
            let check = graph.vertex_with_uri(&vertex).verify_neighbor_counts().await?;
            println!(
                "{}",
                serde_json::json!({
                    "vertex": vertex.to_string(),
                    "stored": check.stored,
                    "recomputed": check.recomputed,
                    "drifted": check.drifted(),
                })
            );
        }
        Command::CreateSchema { label } => {
            let schema = graph.create_schema(ElementCreation::labeled(label)).await?;
            println!("{}", serde_json::to_string(&schema)?);
        }
        Command::AddProperty { schema, label } => {
            let property = graph
                .schema_with_uri(&schema)
                .add_property(ElementCreation::labeled(label))
                .await?;
            println!("{}", serde_json::to_string(&property)?);
        }
        Command::ShowSchema { schema } => {
            println!("{}", serde_json::to_string(&graph.schema(&schema).await?)?);
        }
    }

    Ok(())
}

fn resolve_user(cli: &Cli) -> anyhow::Result<UserUris> {
    let raw = cli
        .user
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--user is required for this command"))?;
    Ok(UserUris::for_username(raw)?)
}
