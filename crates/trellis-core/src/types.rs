//! Core domain types for the Trellis property graph.
//!
//! Vertices, edges and tags are all graph elements sharing the same
//! descriptive properties. Edges reference their endpoints by URI and never
//! own them.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Neg};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::uri::Uri;

// ── Element Kind ──────────────────────────────────────────────────

/// The kind of record a URI designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Vertex,
    Edge,
    Tag,
    Schema,
    Property,
}

impl ElementKind {
    /// URI path segment for this kind.
    pub fn segment(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Edge => "edge",
            Self::Tag => "identification",
            Self::Schema => "schema",
            Self::Property => "property",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "vertex" => Some(Self::Vertex),
            "edge" => Some(Self::Edge),
            "identification" => Some(Self::Tag),
            "schema" => Some(Self::Schema),
            "property" => Some(Self::Property),
            _ => None,
        }
    }
}

// ── Share Level ───────────────────────────────────────────────────

/// Ordered visibility tier. `Private < Friend < PublicWithLink < Public`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareLevel {
    #[default]
    Private,
    Friend,
    PublicWithLink,
    Public,
}

impl ShareLevel {
    /// All tiers, most restrictive first.
    pub const ALL: [ShareLevel; 4] = [
        ShareLevel::Private,
        ShareLevel::Friend,
        ShareLevel::PublicWithLink,
        ShareLevel::Public,
    ];

    /// Stored integer representation.
    pub fn index(&self) -> i64 {
        match self {
            Self::Private => 10,
            Self::Friend => 20,
            Self::PublicWithLink => 30,
            Self::Public => 40,
        }
    }

    pub fn from_index(index: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.index() == index)
    }

    /// Position in `ALL`.
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    pub fn is_public(&self) -> bool {
        *self >= ShareLevel::PublicWithLink
    }

    /// The more restrictive of two levels.
    pub fn coarsest(self, other: ShareLevel) -> ShareLevel {
        self.min(other)
    }
}

impl fmt::Display for ShareLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Private => "PRIVATE",
            Self::Friend => "FRIEND",
            Self::PublicWithLink => "PUBLIC_WITH_LINK",
            Self::Public => "PUBLIC",
        };
        f.write_str(name)
    }
}

impl FromStr for ShareLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "PRIVATE" => Ok(Self::Private),
            "FRIEND" => Ok(Self::Friend),
            "PUBLIC_WITH_LINK" => Ok(Self::PublicWithLink),
            "PUBLIC" => Ok(Self::Public),
            _ => Err(CoreError::UnknownShareLevel(s.to_string())),
        }
    }
}

// ── Neighbor Counters ─────────────────────────────────────────────

/// Per-tier signed adjustment of a vertex's neighbor counters, indexed by
/// `ShareLevel::ordinal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierDelta(pub [i64; 4]);

impl TierDelta {
    /// +1 on every tier at or below `level`.
    pub fn contribution(level: ShareLevel) -> Self {
        let mut tiers = [0; 4];
        for tier in tiers.iter_mut().take(level.ordinal() + 1) {
            *tier = 1;
        }
        Self(tiers)
    }

    pub fn get(&self, tier: ShareLevel) -> i64 {
        self.0[tier.ordinal()]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|d| *d == 0)
    }
}

impl Add for TierDelta {
    type Output = TierDelta;

    fn add(mut self, rhs: TierDelta) -> TierDelta {
        self += rhs;
        self
    }
}

impl AddAssign for TierDelta {
    fn add_assign(&mut self, rhs: TierDelta) {
        for (lhs, rhs) in self.0.iter_mut().zip(rhs.0) {
            *lhs += rhs;
        }
    }
}

impl Neg for TierDelta {
    type Output = TierDelta;

    fn neg(self) -> TierDelta {
        TierDelta(self.0.map(|d| -d))
    }
}

/// Number of incident edges visible at each tier.
///
/// `private >= friend >= public_with_link >= public` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborCounts {
    pub private: i64,
    pub friend: i64,
    pub public_with_link: i64,
    pub public: i64,
}

impl NeighborCounts {
    pub fn get(&self, tier: ShareLevel) -> i64 {
        match tier {
            ShareLevel::Private => self.private,
            ShareLevel::Friend => self.friend,
            ShareLevel::PublicWithLink => self.public_with_link,
            ShareLevel::Public => self.public,
        }
    }

    fn slot(&mut self, tier: ShareLevel) -> &mut i64 {
        match tier {
            ShareLevel::Private => &mut self.private,
            ShareLevel::Friend => &mut self.friend,
            ShareLevel::PublicWithLink => &mut self.public_with_link,
            ShareLevel::Public => &mut self.public,
        }
    }

    pub fn apply(&mut self, delta: TierDelta) {
        for tier in ShareLevel::ALL {
            *self.slot(tier) += delta.get(tier);
        }
    }

    /// Whether the tiers are monotonic and non-negative.
    pub fn is_consistent(&self) -> bool {
        self.public >= 0
            && self.private >= self.friend
            && self.friend >= self.public_with_link
            && self.public_with_link >= self.public
    }
}

// ── Descriptive Attachments ───────────────────────────────────────

/// An image attached to a graph element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Image {
    pub url_for_small: String,
    pub url_for_bigger: String,
}

/// A labeled reference resource graph elements can be identified with.
///
/// Tags are shared: forking an element re-links the same tag rather than
/// copying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub uri: Uri,
    pub external_uri: String,
    pub label: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// A suggested neighbor attached to a vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub uri: String,
    pub label: String,
    pub same_as_uri: String,
    #[serde(default)]
    pub origins: Vec<String>,
}

// ── Graph Elements ────────────────────────────────────────────────

/// Properties shared by every vertex and edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphElement {
    pub uri: Uri,
    pub label: String,
    pub comment: String,
    pub creation_date: DateTime<Utc>,
    pub last_modification_date: DateTime<Utc>,
    pub images: Vec<Image>,
    pub colors: Option<String>,
    pub font: Option<String>,
    pub share_level: ShareLevel,
    pub tags: BTreeMap<Uri, Tag>,
    pub is_under_pattern: bool,
    pub pattern_uri: Option<Uri>,
    /// Client-maintained ordering of the element's children, opaque here.
    #[serde(default)]
    pub children_index: Option<String>,
    /// Owner-only note; never copied into forks.
    #[serde(default)]
    pub private_context: Option<String>,
}

impl GraphElement {
    /// A fresh, unlabeled, private element.
    pub fn new(uri: Uri) -> Self {
        let now = truncate_to_millis(Utc::now());
        Self {
            uri,
            label: String::new(),
            comment: String::new(),
            creation_date: now,
            last_modification_date: now,
            images: Vec::new(),
            colors: None,
            font: None,
            share_level: ShareLevel::Private,
            tags: BTreeMap::new(),
            is_under_pattern: false,
            pattern_uri: None,
            children_index: None,
            private_context: None,
        }
    }

    pub fn owner_username(&self) -> &str {
        self.uri.owner_username()
    }

    pub fn has_label(&self) -> bool {
        !self.label.is_empty()
    }
}

/// Minimal vertex reference: URI and label only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexStub {
    pub uri: Uri,
    pub label: String,
}

/// Minimal edge reference with stub endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStub {
    pub uri: Uri,
    pub label: String,
    pub source: VertexStub,
    pub destination: VertexStub,
}

/// A vertex with its incrementally maintained neighbor counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    #[serde(flatten)]
    pub element: GraphElement,
    pub neighbor_counts: NeighborCounts,
    #[serde(default)]
    pub suggestions: BTreeMap<String, Suggestion>,
    #[serde(default)]
    pub included_vertices: BTreeMap<Uri, VertexStub>,
    #[serde(default)]
    pub included_edges: BTreeMap<Uri, EdgeStub>,
}

impl Vertex {
    pub fn new(uri: Uri) -> Self {
        Self {
            element: GraphElement::new(uri),
            neighbor_counts: NeighborCounts::default(),
            suggestions: BTreeMap::new(),
            included_vertices: BTreeMap::new(),
            included_edges: BTreeMap::new(),
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.element.uri
    }

    pub fn share_level(&self) -> ShareLevel {
        self.element.share_level
    }

    pub fn is_public(&self) -> bool {
        self.element.share_level.is_public()
    }

    pub fn stub(&self) -> VertexStub {
        VertexStub {
            uri: self.element.uri.clone(),
            label: self.element.label.clone(),
        }
    }
}

/// A directed relationship with exactly one source and one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(flatten)]
    pub element: GraphElement,
    pub source: Uri,
    pub destination: Uri,
}

impl Edge {
    pub fn new(uri: Uri, source: Uri, destination: Uri) -> Self {
        Self {
            element: GraphElement::new(uri),
            source,
            destination,
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.element.uri
    }

    pub fn share_level(&self) -> ShareLevel {
        self.element.share_level
    }

    /// The endpoint opposite `vertex`, if `vertex` is an endpoint at all.
    pub fn other_vertex(&self, vertex: &Uri) -> Option<&Uri> {
        if &self.source == vertex {
            Some(&self.destination)
        } else if &self.destination == vertex {
            Some(&self.source)
        } else {
            None
        }
    }

    pub fn touches(&self, vertex: &Uri) -> bool {
        &self.source == vertex || &self.destination == vertex
    }

    pub fn is_loop(&self) -> bool {
        self.source == self.destination
    }
}

// ── Schemas ───────────────────────────────────────────────────────

/// A reusable description of a kind of thing: a labeled element carrying
/// labeled property elements. Properties belong to exactly one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(flatten)]
    pub element: GraphElement,
    #[serde(default)]
    pub properties: BTreeMap<Uri, GraphElement>,
}

impl Schema {
    pub fn new(uri: Uri) -> Self {
        Self {
            element: GraphElement::new(uri),
            properties: BTreeMap::new(),
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.element.uri
    }

    pub fn add_property(&mut self, property: GraphElement) {
        self.properties.insert(property.uri.clone(), property);
    }

    pub fn property(&self, uri: &Uri) -> Option<&GraphElement> {
        self.properties.get(uri)
    }
}

// ── Subgraph ──────────────────────────────────────────────────────

/// One traversal snapshot: a vertex set and an edge set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubGraph {
    pub vertices: BTreeMap<Uri, Vertex>,
    pub edges: BTreeMap<Uri, Edge>,
}

impl SubGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, vertex: Vertex) {
        self.vertices.insert(vertex.uri().clone(), vertex);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.uri().clone(), edge);
    }

    pub fn vertex(&self, uri: &Uri) -> Option<&Vertex> {
        self.vertices.get(uri)
    }

    pub fn edge(&self, uri: &Uri) -> Option<&Edge> {
        self.edges.get(uri)
    }

    pub fn contains_vertex(&self, uri: &Uri) -> bool {
        self.vertices.contains_key(uri)
    }

    pub fn number_of_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn number_of_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Stored timestamps have millisecond precision.
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
