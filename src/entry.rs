//! Vector entries, dynamic metadata, and search results.
//!
//! Entries carry a printable string id, a fixed-dimension embedding, and a
//! typed `MetadataValue` map, per spec §3.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single value in a [`VectorEntry`]'s metadata map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// A UTF-8 string.
    String(String),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A boolean.
    Bool(bool),
    /// An ordered list of metadata values.
    List(Vec<MetadataValue>),
    /// A nested string-keyed map.
    Map(HashMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Converts to a `serde_json::Value`.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Int(i) => JsonValue::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => {
                JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }

    /// Builds a `MetadataValue` from a `serde_json::Value`.
    ///
    /// Returns `None` for `JsonValue::Null`, which has no [`MetadataValue`]
    /// counterpart.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::Bool(b) => Some(Self::Bool(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            JsonValue::String(s) => Some(Self::String(s.clone())),
            JsonValue::Array(items) => {
                Some(Self::List(items.iter().filter_map(Self::from_json).collect()))
            }
            JsonValue::Object(map) => Some(Self::Map(
                map.iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }
}

/// Dynamic metadata attached to a [`VectorEntry`]: a string-keyed map of
/// [`MetadataValue`]s.
pub type Metadata = HashMap<String, MetadataValue>;

/// A vector plus its identity and optional metadata.
///
/// An id is unique within an index; re-insertion under an existing id
/// overwrites the prior entry (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Printable string identifier, unique within an index.
    pub id: String,
    /// The fixed-dimension embedding.
    pub vector: Vec<f32>,
    /// Optional typed metadata.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl VectorEntry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(id: impl Into<String>, vector: Vec<f32>, metadata: Option<Metadata>) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }

    /// Creates a new entry with no metadata.
    #[must_use]
    pub fn without_metadata(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self::new(id, vector, None)
    }

    /// Dimension of the entry's vector.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// One row of a search result: an id, its distance score, and (a copy of)
/// its vector and metadata.
///
/// Results are freshly allocated on every search; callers may mutate freely
/// (spec §3 Ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Matching entry's id.
    pub id: String,
    /// Distance to the query under the index's configured metric (smaller
    /// is better, spec §4.1).
    pub score: f32,
    /// Copy of the matching entry's vector.
    pub vector: Vec<f32>,
    /// Copy of the matching entry's metadata, if any.
    pub metadata: Option<Metadata>,
}

impl SearchResult {
    /// Creates a new search result.
    #[must_use]
    pub fn new(id: impl Into<String>, score: f32, vector: Vec<f32>, metadata: Option<Metadata>) -> Self {
        Self {
            id: id.into(),
            score,
            vector,
            metadata,
        }
    }
}
