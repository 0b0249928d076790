//! Owner-namespaced element URIs.
//!
//! Every graph element lives under its owner's namespace:
//! `/service/users/{username}/graph/{kind}/{id}`. The owner of any element
//! can therefore be read back from its URI without a store lookup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::ElementKind;

const USERS_PREFIX: &str = "/service/users/";
const GRAPH_SEGMENT: &str = "graph";

/// A validated, owner-namespaced element URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri(String);

impl Uri {
    /// Parse and validate a URI.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let malformed = |reason: &str| CoreError::MalformedUri {
            uri: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix(USERS_PREFIX)
            .ok_or_else(|| malformed("missing /service/users/ prefix"))?;
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != 4 {
            return Err(malformed("expected {username}/graph/{kind}/{id}"));
        }
        if !is_valid_username(segments[0]) {
            return Err(malformed("invalid username segment"));
        }
        if segments[1] != GRAPH_SEGMENT {
            return Err(malformed("missing graph segment"));
        }
        ElementKind::from_segment(segments[2]).ok_or_else(|| malformed("unknown element kind"))?;
        if segments[3].is_empty() {
            return Err(malformed("empty identifier"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Username of the owner this element belongs to.
    pub fn owner_username(&self) -> &str {
        self.segment(0)
    }

    pub fn kind(&self) -> ElementKind {
        // Validated in `parse`.
        ElementKind::from_segment(self.segment(2)).unwrap_or(ElementKind::Vertex)
    }

    /// Trailing identifier segment.
    pub fn short_id(&self) -> &str {
        self.segment(3)
    }

    fn segment(&self, index: usize) -> &str {
        self.0[USERS_PREFIX.len()..]
            .split('/')
            .nth(index)
            .unwrap_or_default()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uri {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Uri {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.0
    }
}

// ── Owner Namespace ───────────────────────────────────────────────

/// The URI namespace of one user. Mints fresh element URIs for that owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserUris {
    username: String,
}

impl UserUris {
    /// Resolve a username to its namespace.
    pub fn for_username(username: &str) -> Result<Self, CoreError> {
        if !is_valid_username(username) {
            return Err(CoreError::InvalidUsername(username.to_string()));
        }
        Ok(Self {
            username: username.to_string(),
        })
    }

    /// Namespace of the owner of an existing element.
    pub fn of(uri: &Uri) -> Self {
        Self {
            username: uri.owner_username().to_string(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Base path under which this owner's graph elements live.
    pub fn graph_prefix(&self) -> String {
        format!("{USERS_PREFIX}{}/{GRAPH_SEGMENT}", self.username)
    }

    pub fn generate_vertex_uri(&self) -> Uri {
        self.generate(ElementKind::Vertex)
    }

    pub fn generate_edge_uri(&self) -> Uri {
        self.generate(ElementKind::Edge)
    }

    pub fn generate_tag_uri(&self) -> Uri {
        self.generate(ElementKind::Tag)
    }

    pub fn generate_schema_uri(&self) -> Uri {
        self.generate(ElementKind::Schema)
    }

    pub fn generate_property_uri(&self) -> Uri {
        self.generate(ElementKind::Property)
    }

    pub fn generate(&self, kind: ElementKind) -> Uri {
        Uri(format!(
            "{}/{}/{}",
            self.graph_prefix(),
            kind.segment(),
            Uuid::new_v4()
        ))
    }
}

fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
