//! Integration tests for the processor module
//!
//! Containers are synthesized with the crate's own encoder and written into
//! temporary station directories.

pub mod error_handling;

use crate::header::ContainerHeader;
use crate::models::Node;
use crate::tree::encode_container;
use std::fs;
use std::path::{Path, PathBuf};

/// Observation tree with one point per entry of `points`
pub fn observation_tree(observation_date: i64, points: Vec<Vec<(&str, Node)>>) -> Node {
    Node::Struct(vec![
        (
            "observation_date".to_string(),
            Node::Scalar(observation_date),
        ),
        (
            "point_data".to_string(),
            Node::Array(
                points
                    .into_iter()
                    .map(|fields| {
                        Node::Struct(
                            fields
                                .into_iter()
                                .map(|(name, node)| (name.to_string(), node))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
        ),
    ])
}

/// Encoded container for an observation tree
pub fn observation_container(observation_date: i64, points: Vec<Vec<(&str, Node)>>) -> Vec<u8> {
    let header = ContainerHeader::new().with("data_name", "surface_observations");
    encode_container(&header, &observation_tree(observation_date, points)).unwrap()
}

/// Write bytes to `dir/name`, creating `dir`
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// FeatureCollection with one point feature per station
pub fn location_geojson(stations: &[(&str, f64, f64)]) -> String {
    let features: Vec<serde_json::Value> = stations
        .iter()
        .map(|(id, lat, lon)| {
            serde_json::json!({
                "type": "Feature",
                "properties": {"LCLID": id},
                "geometry": {"type": "Point", "coordinates": [lon, lat]}
            })
        })
        .collect();
    serde_json::json!({"type": "FeatureCollection", "features": features}).to_string()
}
