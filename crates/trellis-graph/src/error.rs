//! Error types for the graph-consistency engine.

use thiserror::Error;

use trellis_core::CoreError;

use crate::operators::ElementState;

/// Coarse classification callers branch on. None of these are retried
/// inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    ReferentialIntegrity,
    StoreUnavailable,
    IllegalState,
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid argument {argument}: {reason}")]
    InvalidArgument { argument: String, reason: String },

    #[error("Invalid depth {depth} for center vertex {center}")]
    InvalidDepth { depth: i64, center: String },

    #[error("Resource not found: {uri}")]
    NotFound { uri: String },

    #[error("Referential integrity violation on {uri}: {reason}")]
    ReferentialIntegrity { uri: String, reason: String },

    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Element {uri} is {state}")]
    IllegalState { uri: String, state: ElementState },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidDepth { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ReferentialIntegrity { .. } => ErrorKind::ReferentialIntegrity,
            Self::StoreUnavailable(_) | Self::Serialization(_) => ErrorKind::StoreUnavailable,
            Self::IllegalState { .. } => ErrorKind::IllegalState,
        }
    }

    pub fn not_found(uri: impl ToString) -> Self {
        Self::NotFound {
            uri: uri.to_string(),
        }
    }

    pub fn missing_vertex(uri: impl ToString) -> Self {
        Self::ReferentialIntegrity {
            uri: uri.to_string(),
            reason: "vertex does not exist".to_string(),
        }
    }
}

impl From<neo4rs::Error> for GraphError {
    fn from(e: neo4rs::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<CoreError> for GraphError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::MalformedUri { uri, reason } => Self::InvalidArgument {
                argument: uri,
                reason,
            },
            other => Self::InvalidArgument {
                argument: "input".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_errors_are_invalid_arguments() {
        let err = GraphError::InvalidDepth {
            depth: -1,
            center: "/service/users/u/graph/vertex/a".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("-1"));
    }

    #[test]
    fn malformed_uris_become_invalid_arguments() {
        let core = trellis_core::Uri::parse("nope").unwrap_err();
        let err: GraphError = core.into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
