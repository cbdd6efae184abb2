//! Application constants for the RU processor
//!
//! Byte-level format markers, tree grammar tags, value conventions of the
//! source instrumentation, and column names shared across the pipeline.

// =============================================================================
// Container Layout
// =============================================================================

/// Every container starts with these three bytes
pub const CONTAINER_MAGIC: &[u8] = b"WN\n";

/// Two-byte sequence separating the text header from the body
pub const HEADER_TERMINATOR: &[u8] = &[0x04, 0x1A];

/// Header keys recognized by the reader
pub mod header_keys {
    pub const FORMAT: &str = "format";
    pub const COMPRESS_TYPE: &str = "compress_type";
    pub const ANNOUNCED: &str = "announced";
    pub const DATA_NAME: &str = "data_name";
}

/// `format` value selecting the GeoJSON branch
pub const FORMAT_GEOJSON: &str = "GJSON";

/// `compress_type` value selecting the binary tree branch
pub const COMPRESS_GZIP: &str = "gzip";

// =============================================================================
// Tree Grammar
// =============================================================================

/// Node type discriminators
pub mod node_tags {
    pub const STRUCT: u8 = 0x01;
    pub const ARRAY: u8 = 0x02;
    pub const SCALAR: u8 = 0x03;
    pub const STRING: u8 = 0x04;
}

/// Scalar payload widths in bytes
pub const SCALAR_WIDTHS: &[u8] = &[1, 2, 4, 8];

/// Deepest nesting accepted before the tree is rejected
pub const MAX_TREE_DEPTH: usize = 64;

/// Root struct members read by the record builder
pub const OBSERVATION_DATE_FIELD: &str = "observation_date";
pub const POINT_DATA_FIELD: &str = "point_data";

/// Separator for flattened nested struct members
pub const NESTED_FIELD_SEPARATOR: &str = ".";

// =============================================================================
// Value Conventions
// =============================================================================

/// Raw magnitudes at or above this value mean "no reading"
pub const MISSING_SENTINEL_MAGNITUDE: i64 = 32_000;

/// Decimal places kept after scale/offset decoding
pub const DECODED_DECIMALS: i32 = 3;

/// Canonical code for air temperature
pub const AIR_TEMPERATURE_CODE: &str = "AIRTMP";

/// Plausible air temperature range in degrees Celsius, inclusive
pub const AIR_TEMPERATURE_MIN: f64 = -80.0;
pub const AIR_TEMPERATURE_MAX: f64 = 70.0;

/// Minimum fuzzy similarity (0-100) accepted by the variable resolver
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 90;

// =============================================================================
// Column Names
// =============================================================================

pub mod columns {
    pub const TIME: &str = "time";
    pub const ANNOUNCED: &str = "announced";
    pub const LAT: &str = "lat";
    pub const LON: &str = "lon";

    /// Columns preceding the variable columns, in output order
    pub const LEADING: &[&str] = &[TIME, ANNOUNCED, LAT, LON];

    /// Case-insensitive aliases accepted for the coordinate columns
    pub const LAT_ALIASES: &[&str] = &["latitude", "lat"];
    pub const LON_ALIASES: &[&str] = &["longitude", "lon"];
}

// =============================================================================
// Timestamps and File Names
// =============================================================================

/// Formats accepted for textual timestamps, tried in order
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y%m%d%H%M%S",
    "%Y%m%d%H%M",
];

/// Container file names begin with a `%Y%m%d%H%M%S` stamp
pub const FILE_STAMP_PATTERN: &str = r"^(\d{14})";
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// File extension used for standalone containers
pub const CONTAINER_EXTENSION: &str = "ru";

/// Station ids are nine-digit runs
pub const STATION_ID_PATTERN: &str = r"\b(\d{9})\b";

/// A single-time request accepts the nearest file within this many seconds
pub const NEAREST_FILE_WINDOW_SECS: i64 = 30 * 60;

/// Embedded variable metadata table
pub const BUILTIN_VARIABLES_JSON: &str = include_str!("../data/variables_map.json");
