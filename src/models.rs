//! Core data structures for RU decoding.
//!
//! Defines the decoded node tree, per-point records before and after
//! normalization, station locations, and processing statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One node of the self-describing body tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Ordered members with unique names
    Struct(Vec<(String, Node)>),
    /// Members all share one variant
    Array(Vec<Node>),
    /// Integer-encoded value awaiting scale/offset decoding
    Scalar(i64),
    String(String),
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Struct(_) => "struct",
            Node::Array(_) => "array",
            Node::Scalar(_) => "scalar",
            Node::String(_) => "string",
        }
    }

    /// Look up a struct member by name
    pub fn get(&self, name: &str) -> Option<&Node> {
        match self {
            Node::Struct(members) => members
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, node)| node),
            _ => None,
        }
    }

    /// Convert the tree into plain JSON for inspection
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Node::Struct(members) => serde_json::Value::Object(
                members
                    .iter()
                    .map(|(name, node)| (name.clone(), node.to_json()))
                    .collect(),
            ),
            Node::Array(items) => {
                serde_json::Value::Array(items.iter().map(Node::to_json).collect())
            }
            Node::Scalar(value) => serde_json::Value::from(*value),
            Node::String(text) => serde_json::Value::from(text.as_str()),
        }
    }
}

/// A point field as stored in the container
#[derive(Debug, Clone, PartialEq)]
pub enum RawField {
    Integer(i64),
    Text(String),
}

/// One point before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub time: DateTime<Utc>,
    pub announced: DateTime<Utc>,
    pub fields: Vec<(String, RawField)>,
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Physically-scaled reading; NaN marks a missing or rejected value
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            Value::Text(_) => None,
        }
    }

    pub fn is_finite_number(&self) -> bool {
        matches!(self, Value::Number(value) if value.is_finite())
    }
}

/// One decoded, normalized observation point
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub time: DateTime<Utc>,
    pub announced: DateTime<Utc>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub values: Vec<(String, Value)>,
}

impl ObservationRecord {
    pub fn get(&self, code: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == code)
            .map(|(_, value)| value)
    }

    /// A record with no finite numeric reading carries no information.
    /// Coordinates are kept outside `values`, so they never count.
    pub fn has_reading(&self) -> bool {
        self.values.iter().any(|(_, value)| value.is_finite_number())
    }
}

/// Geographic position of a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationLocation {
    pub station_id: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
}

/// Counters from value normalization
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationStats {
    /// Numeric values seen
    pub values: usize,
    /// Values at or above the sentinel magnitude
    pub sentinel_missing: usize,
    /// Values rejected by a physical range guard
    pub out_of_range: usize,
}

impl NormalizationStats {
    pub fn merge(&mut self, other: &NormalizationStats) {
        self.values += other.values;
        self.sentinel_missing += other.sentinel_missing;
        self.out_of_range += other.out_of_range;
    }
}

/// Processing statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub total_rows: usize,
    pub rows_dropped: usize,
    pub normalization: NormalizationStats,
    pub failed_files: Vec<PathBuf>,
    pub processing_time_ms: u128,
}
