//! Configuration management for Trellis services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (TRELLIS_ prefix, `__` between sections)
//! 2. Config file (trellis.toml)
//! 3. Defaults

use serde::Deserialize;

use crate::error::CoreError;
use crate::types::ShareLevel;

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrellisConfig {
    #[serde(default)]
    pub neo4j: Neo4jSettings,

    #[serde(default)]
    pub extract: ExtractSettings,

    #[serde(default)]
    pub fork: ForkSettings,
}

/// Connection parameters for the backing Neo4j instance.
#[derive(Debug, Clone, Deserialize)]
pub struct Neo4jSettings {
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

/// Defaults for subgraph extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractSettings {
    /// Hop bound used when a caller does not give one.
    #[serde(default = "default_depth")]
    pub default_depth: u32,

    /// Vertex cap applied when a caller does not give one.
    #[serde(default)]
    pub results_limit: Option<usize>,
}

/// Defaults for forking.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForkSettings {
    /// Share level given to every clone.
    #[serde(default)]
    pub share_level: ShareLevel,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "trellis-dev".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_depth() -> u32 {
    1
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            default_depth: default_depth(),
            results_limit: None,
        }
    }
}

impl TrellisConfig {
    /// Load from `<file_prefix>.toml` (optional) and `TRELLIS_*` variables.
    pub fn load(file_prefix: &str) -> Result<Self, CoreError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TRELLIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: TrellisConfig = cfg.try_deserialize()?;
        tracing::debug!(
            neo4j_uri = %loaded.neo4j.uri,
            default_depth = loaded.extract.default_depth,
            "Loaded configuration"
        );
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrellisConfig::default();
        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
        assert_eq!(config.neo4j.max_connections, 16);
        assert_eq!(config.extract.default_depth, 1);
        assert_eq!(config.extract.results_limit, None);
        assert_eq!(config.fork.share_level, ShareLevel::Private);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trellis.toml");
        std::fs::write(
            &path,
            r#"
[neo4j]
uri = "bolt://graph.internal:7687"
user = "trellis"

[extract]
default_depth = 3
results_limit = 500

[fork]
share_level = "FRIEND"
"#,
        )
        .unwrap();

        let prefix = dir.path().join("trellis");
        let config = TrellisConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.neo4j.uri, "bolt://graph.internal:7687");
        assert_eq!(config.neo4j.user, "trellis");
        assert_eq!(config.neo4j.password, "trellis-dev");
        assert_eq!(config.extract.default_depth, 3);
        assert_eq!(config.extract.results_limit, Some(500));
        assert_eq!(config.fork.share_level, ShareLevel::Friend);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = TrellisConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.extract.default_depth, 1);
    }
}
