//! Typed registry of stored property keys, node labels, and relationship types.
//!
//! Store code refers to properties through these enums so a misspelled key
//! is a compile error rather than a silently missing value.

use trellis_core::ShareLevel;

/// Properties every graph element record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementField {
    Uri,
    Owner,
    Label,
    Comment,
    CreationDate,
    LastModificationDate,
    Images,
    Colors,
    Font,
    ShareLevel,
    IsUnderPattern,
    PatternUri,
    ChildrenIndex,
    PrivateContext,
}

impl ElementField {
    pub const ALL: [ElementField; 14] = [
        Self::Uri,
        Self::Owner,
        Self::Label,
        Self::Comment,
        Self::CreationDate,
        Self::LastModificationDate,
        Self::Images,
        Self::Colors,
        Self::Font,
        Self::ShareLevel,
        Self::IsUnderPattern,
        Self::PatternUri,
        Self::ChildrenIndex,
        Self::PrivateContext,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Uri => "uri",
            Self::Owner => "owner",
            Self::Label => "label",
            Self::Comment => "comment",
            Self::CreationDate => "creation_date",
            Self::LastModificationDate => "last_modification_date",
            Self::Images => "images",
            Self::Colors => "colors",
            Self::Font => "font",
            Self::ShareLevel => "share_level",
            Self::IsUnderPattern => "is_under_pattern",
            Self::PatternUri => "pattern_uri",
            Self::ChildrenIndex => "children_index",
            Self::PrivateContext => "private_context",
        }
    }
}

/// Vertex-only properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexField {
    NbPrivateNeighbors,
    NbFriendNeighbors,
    NbPublicWithLinkNeighbors,
    NbPublicNeighbors,
    IsPublic,
    Suggestions,
}

impl VertexField {
    pub fn key(self) -> &'static str {
        match self {
            Self::NbPrivateNeighbors => "nb_private_neighbors",
            Self::NbFriendNeighbors => "nb_friend_neighbors",
            Self::NbPublicWithLinkNeighbors => "nb_public_with_link_neighbors",
            Self::NbPublicNeighbors => "nb_public_neighbors",
            Self::IsPublic => "is_public",
            Self::Suggestions => "suggestions",
        }
    }

    /// Counter holding the number of neighbors visible at `tier`.
    pub fn neighbor_count(tier: ShareLevel) -> Self {
        match tier {
            ShareLevel::Private => Self::NbPrivateNeighbors,
            ShareLevel::Friend => Self::NbFriendNeighbors,
            ShareLevel::PublicWithLink => Self::NbPublicWithLinkNeighbors,
            ShareLevel::Public => Self::NbPublicNeighbors,
        }
    }
}

/// Tag (`Meta`) node properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagField {
    Uri,
    ExternalUri,
    Label,
    Comment,
    Images,
}

impl TagField {
    pub fn key(self) -> &'static str {
        match self {
            Self::Uri => "uri",
            Self::ExternalUri => "external_uri",
            Self::Label => "label",
            Self::Comment => "comment",
            Self::Images => "images",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLabel {
    Resource,
    GraphElement,
    Vertex,
    Edge,
    Meta,
    Schema,
    Property,
}

impl NodeLabel {
    pub fn key(self) -> &'static str {
        match self {
            Self::Resource => "Resource",
            Self::GraphElement => "GraphElement",
            Self::Vertex => "Vertex",
            Self::Edge => "Edge",
            Self::Meta => "Meta",
            Self::Schema => "Schema",
            Self::Property => "Property",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    SourceVertex,
    DestinationVertex,
    IdentifiedTo,
    IncludedVertex,
    IncludedEdge,
    HasProperty,
}

impl Rel {
    pub fn key(self) -> &'static str {
        match self {
            Self::SourceVertex => "SOURCE_VERTEX",
            Self::DestinationVertex => "DESTINATION_VERTEX",
            Self::IdentifiedTo => "IDENTIFIED_TO",
            Self::IncludedVertex => "INCLUDED_VERTEX",
            Self::IncludedEdge => "INCLUDED_EDGE",
            Self::HasProperty => "HAS_PROPERTY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_keys_are_unique() {
        let mut keys: Vec<&str> = ElementField::ALL.iter().map(|f| f.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), ElementField::ALL.len());
    }

    #[test]
    fn each_tier_has_its_own_counter() {
        let keys: Vec<&str> = ShareLevel::ALL
            .iter()
            .map(|tier| VertexField::neighbor_count(*tier).key())
            .collect();
        assert_eq!(
            keys,
            vec![
                "nb_private_neighbors",
                "nb_friend_neighbors",
                "nb_public_with_link_neighbors",
                "nb_public_neighbors",
            ]
        );
    }
}
