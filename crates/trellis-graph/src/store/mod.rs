//! The Graph Element Store contract.
//!
//! The engine reads through batched calls (one round trip per traversal
//! level, never per vertex) and writes through `apply`, which commits an
//! ordered [`WriteBatch`] as a single transaction. Multi-read traversals go
//! through a [`Snapshot`] so every level sees the same state.
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `GraphClient` | `neo4j` | External Neo4j via Bolt |
//! | `MemoryStore` | `memory` | In-process, for embedding and tests |

pub mod memory;
pub mod neo4j;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use trellis_core::{Edge, GraphElement, Image, Schema, ShareLevel, Tag, TierDelta, Uri, Vertex};

use crate::error::Result;

pub use memory::MemoryStore;

#[async_trait]
pub trait GraphStore: Send + Sync + 'static {
    /// Hydrate vertices, including tags, suggestions and included stubs.
    /// Unknown URIs are skipped.
    async fn vertices(&self, uris: &[Uri]) -> Result<Vec<Vertex>>;

    /// Hydrate edges with endpoint URIs and tags. Unknown URIs are skipped.
    async fn edges(&self, uris: &[Uri]) -> Result<Vec<Edge>>;

    /// Every edge touching any of `vertices`, each listed once.
    async fn incident_edges(&self, vertices: &[Uri]) -> Result<Vec<Edge>>;

    /// Hydrate schemas with their properties and tags. Unknown URIs are skipped.
    async fn schemas(&self, uris: &[Uri]) -> Result<Vec<Schema>>;

    async fn element_exists(&self, uri: &Uri) -> Result<bool>;

    /// Any vertex owned by `username`.
    async fn any_vertex_of(&self, username: &str) -> Result<Option<Uri>>;

    /// Apply every mutation of `batch` atomically, in order.
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    /// Open a read view that stays fixed across several reads.
    async fn snapshot(&self) -> Result<Box<dyn Snapshot>>;
}

/// A read-only view of the store taken at one point in time.
///
/// Writes committed after the view was opened are not visible through it.
/// Call [`Snapshot::close`] when done; dropping an open view releases it
/// without reporting errors.
#[async_trait]
pub trait Snapshot: Send {
    async fn vertices(&mut self, uris: &[Uri]) -> Result<Vec<Vertex>>;

    async fn incident_edges(&mut self, vertices: &[Uri]) -> Result<Vec<Edge>>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Which end of an edge a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Destination,
}

impl Endpoint {
    pub fn opposite(self) -> Self {
        match self {
            Self::Source => Self::Destination,
            Self::Destination => Self::Source,
        }
    }
}

/// Changes to an element's descriptive properties. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementPatch {
    pub label: Option<String>,
    pub comment: Option<String>,
    pub colors: Option<String>,
    pub font: Option<String>,
    pub images: Option<Vec<Image>>,
    pub share_level: Option<ShareLevel>,
    pub children_index: Option<String>,
    pub private_context: Option<String>,
}

impl ElementPatch {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn comment(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Self::default()
        }
    }

    pub fn children_index(index: impl Into<String>) -> Self {
        Self {
            children_index: Some(index.into()),
            ..Self::default()
        }
    }

    pub fn private_context(context: impl Into<String>) -> Self {
        Self {
            private_context: Some(context.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Write the set fields onto `element`.
    pub fn apply_to(self, element: &mut GraphElement, at: DateTime<Utc>) {
        if let Some(label) = self.label {
            element.label = label;
        }
        if let Some(comment) = self.comment {
            element.comment = comment;
        }
        if let Some(colors) = self.colors {
            element.colors = Some(colors);
        }
        if let Some(font) = self.font {
            element.font = Some(font);
        }
        if let Some(images) = self.images {
            element.images = images;
        }
        if let Some(level) = self.share_level {
            element.share_level = level;
        }
        if let Some(index) = self.children_index {
            element.children_index = Some(index);
        }
        if let Some(context) = self.private_context {
            element.private_context = Some(context);
        }
        element.last_modification_date = at;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateVertex(Vertex),
    CreateEdge(Edge),
    UpdateElement {
        uri: Uri,
        patch: ElementPatch,
        at: DateTime<Utc>,
    },
    AdjustNeighborCounts {
        vertex: Uri,
        delta: TierDelta,
    },
    SetEndpoint {
        edge: Uri,
        endpoint: Endpoint,
        vertex: Uri,
        at: DateTime<Utc>,
    },
    SwapEndpoints {
        edge: Uri,
        at: DateTime<Utc>,
    },
    AttachTag {
        element: Uri,
        tag: Tag,
    },
    DetachTag {
        element: Uri,
        tag: Uri,
    },
    DeleteEdge(Uri),
    DeleteVertex(Uri),
    /// Store a schema node and any properties it already carries.
    CreateSchema(Schema),
    AddSchemaProperty {
        schema: Uri,
        property: GraphElement,
    },
}

/// An ordered list of mutations committed as one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Queue a counter adjustment, skipping no-ops.
    pub fn adjust(&mut self, vertex: &Uri, delta: TierDelta) {
        if !delta.is_zero() {
            self.push(Mutation::AdjustNeighborCounts {
                vertex: vertex.clone(),
                delta,
            });
        }
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Vertices whose counters this batch adjusts.
    pub fn counter_targets(&self) -> Vec<Uri> {
        self.mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::AdjustNeighborCounts { vertex, .. } => Some(vertex.clone()),
                _ => None,
            })
            .collect()
    }
}

impl IntoIterator for WriteBatch {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

impl Extend<Mutation> for WriteBatch {
    fn extend<T: IntoIterator<Item = Mutation>>(&mut self, iter: T) {
        self.mutations.extend(iter);
    }
}
