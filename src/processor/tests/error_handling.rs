//! Error handling integration tests

use super::{observation_container, write_file};
use crate::config::RuConfig;
use crate::error::{FormatError, RuError, SchemaError};
use crate::header::ContainerHeader;
use crate::models::Node;
use crate::processor::ContainerProcessor;
use crate::tree::encode_container;
use tempfile::TempDir;

fn processor() -> ContainerProcessor {
    ContainerProcessor::new(RuConfig::default()).unwrap()
}

#[test]
fn test_structural_faults_abort_the_container() {
    let processor = processor();

    match processor.decode_bytes(b"not a container").unwrap_err() {
        RuError::Format(FormatError::NotAContainer) => {}
        other => panic!("Expected NotAContainer, got {:?}", other),
    }

    match processor.decode_bytes(b"WN\ncompress_type=gzip\n").unwrap_err() {
        RuError::Format(FormatError::MissingTerminator) => {}
        other => panic!("Expected MissingTerminator, got {:?}", other),
    }

    match processor
        .decode_bytes(b"WN\ncompress_type=gzip\n\x04\x1anot gzip at all")
        .unwrap_err()
    {
        RuError::Format(FormatError::Decompression(_)) => {}
        other => panic!("Expected Decompression, got {:?}", other),
    }
}

#[test]
fn test_geojson_container_is_not_observation_data() {
    let bytes = b"WN\nformat=GJSON\n\x04\x1a{\"type\": \"FeatureCollection\", \"features\": []}";

    match processor().decode_bytes(bytes).unwrap_err() {
        RuError::Schema(SchemaError::NotObservationData) => {}
        other => panic!("Expected NotObservationData, got {:?}", other),
    }
}

#[test]
fn test_missing_point_data() {
    let root = Node::Struct(vec![(
        "observation_date".to_string(),
        Node::Scalar(1_744_904_347),
    )]);
    let bytes = encode_container(&ContainerHeader::new(), &root).unwrap();

    match processor().decode_bytes(&bytes).unwrap_err() {
        RuError::Schema(SchemaError::MissingField { name }) => assert_eq!(name, "point_data"),
        other => panic!("Expected MissingField, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bad_files_do_not_abort_the_batch() {
    let temp_dir = TempDir::new().unwrap();
    let good = write_file(
        temp_dir.path(),
        "20250417150000.bin",
        &observation_container(1_744_902_000, vec![vec![("AIRTMP", Node::Scalar(120))]]),
    );
    let corrupt = write_file(temp_dir.path(), "20250417151000.bin", b"WN\nbroken");
    let missing = temp_dir.path().join("20250417152000.bin");

    let (data, stats) = processor()
        .process_files(&[good, corrupt.clone(), missing.clone()])
        .await
        .unwrap();

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 2);
    assert_eq!(stats.failed_files, vec![corrupt, missing]);
    assert_eq!(data.height(), 1);
}

#[tokio::test]
async fn test_enrichment_failure_keeps_dataset() {
    let temp_dir = TempDir::new().unwrap();
    let metadata = write_file(temp_dir.path(), "metadata.json", b"[]");
    let file = write_file(
        &temp_dir.path().join("441000205"),
        "20250417150000.bin",
        &observation_container(1_744_902_000, vec![vec![("AIRTMP", Node::Scalar(120))]]),
    );

    let processor = ContainerProcessor::new(RuConfig::default().with_station_metadata(&metadata))
        .unwrap();
    let (data, stats) = processor.process_files(&[file]).await.unwrap();

    assert_eq!(stats.files_processed, 1);
    assert_eq!(data.height(), 1);
    assert!(data.column("lat").is_err());
}

#[test]
fn test_invalid_configuration() {
    let result = ContainerProcessor::new(RuConfig::default().with_fuzzy_threshold(150));
    assert!(matches!(result, Err(RuError::Configuration { .. })));
}
