//! RU Processor Library
//!
//! Decodes archived weather-station observation files stored in the RU
//! container format into physically-scaled, geolocated Polars tables.
//!
//! This library provides tools for:
//! - Reading the `WN\n` container header and selecting the body branch
//! - Inflating and parsing the binary node tree
//! - Building per-point records stamped with observation and announce times
//! - Sentinel detection, scale/offset decoding and range guards
//! - Attaching station coordinates from inline columns, aliases or metadata
//! - Resolving variable codes from codes, Japanese or English names
//!
//! ```no_run
//! use ru_processor::{RuConfig, processor::ContainerProcessor};
//!
//! # fn main() -> ru_processor::Result<()> {
//! let processor = ContainerProcessor::new(RuConfig::default())?;
//! let decoded = processor.decode_file(std::path::Path::new("20250417153907.ru"))?;
//! println!("{}", decoded.data);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod geo;
pub mod header;
pub mod models;
pub mod normalizer;
pub mod processor;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod tree;
pub mod variables;

pub use config::RuConfig;
pub use error::{FormatError, ResolutionError, Result, RuError, SchemaError};
pub use geo::{GeoEnricher, StationLookup};
pub use header::{Container, ContainerBody, ContainerHeader, read_container};
pub use models::{Node, ObservationRecord, StationLocation, Value};
pub use processor::{ContainerProcessor, DecodedFile, decode_container};
pub use resolver::VariableResolver;
pub use tree::{decode_tree, encode_container};
pub use variables::{VariableMeta, VariableTable};
