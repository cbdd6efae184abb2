//! Geospatial enrichment.
//!
//! Makes sure a decoded dataset carries `lat`/`lon` columns. Resolution order
//! is fixed: existing columns, then case-insensitive aliases, then the
//! station's location resource found through station metadata.
//!
//! Location resources are GeoJSON FeatureCollections (bare, or wrapped in a
//! `format=GJSON` container) whose features carry `properties.LCLID` and
//! `geometry.coordinates = [lon, lat, alt?]`.

use crate::constants::{STATION_ID_PATTERN, columns};
use crate::error::{Result, RuError};
use crate::header::{ContainerBody, has_container_magic, read_container};
use crate::models::StationLocation;
use polars::prelude::*;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.trim().to_string()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    id_to_string(&value)
        .ok_or_else(|| D::Error::custom(format!("station id must be a string or number, got {}", value)))
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<serde_json::Map<String, serde_json::Value>>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: serde_json::Value,
}

/// Extract station locations from a GeoJSON FeatureCollection.
///
/// Features without an `LCLID` or without a numeric `[lon, lat]` pair are
/// skipped with a warning.
pub fn parse_station_locations(geojson: &serde_json::Value) -> Result<Vec<StationLocation>> {
    let collection = FeatureCollection::deserialize(geojson)?;
    if collection.kind != "FeatureCollection" {
        return Err(RuError::geo(format!(
            "expected a FeatureCollection, found type '{}'",
            collection.kind
        )));
    }

    let mut locations = Vec::with_capacity(collection.features.len());
    for (index, feature) in collection.features.iter().enumerate() {
        let Some(station_id) = feature
            .properties
            .as_ref()
            .and_then(|properties| properties.get("LCLID"))
            .and_then(id_to_string) else {
            warn!("Feature {} has no LCLID, skipping", index);
            continue;
        };

        let coordinates = feature
            .geometry
            .as_ref()
            .and_then(|geometry| geometry.coordinates.as_array())
            .map(|values| values.iter().map(|v| v.as_f64()).collect::<Vec<_>>())
            .unwrap_or_default();

        // GeoJSON order is [lon, lat, alt?]
        match coordinates.as_slice() {
            [Some(lon), Some(lat), rest @ ..] => locations.push(StationLocation {
                station_id,
                lat: *lat,
                lon: *lon,
                alt: rest.first().copied().flatten(),
            }),
            _ => warn!(
                "Feature {} (LCLID {}) has no usable coordinates, skipping",
                index, station_id
            ),
        }
    }

    Ok(locations)
}

/// Decode a location resource: a GJSON container or bare GeoJSON
pub fn locations_from_bytes(bytes: &[u8]) -> Result<Vec<StationLocation>> {
    let geojson = if has_container_magic(bytes) {
        match read_container(bytes)?.body {
            ContainerBody::GeoJson(json) => json,
            ContainerBody::Tree(_) => {
                return Err(RuError::geo("location resource is not a GeoJSON container"));
            }
        }
    } else {
        serde_json::from_slice(bytes)?
    };

    parse_station_locations(&geojson)
}

static STATION_ID_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(STATION_ID_PATTERN).ok());

/// First standalone nine-digit run in a path, taken as a station id
pub fn guess_station_id(path: &Path) -> Option<String> {
    let pattern = STATION_ID_REGEX.as_ref()?;
    let text = path.to_string_lossy();
    pattern
        .captures(&text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// One row of the station metadata table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    #[serde(rename = "TagID", alias = "tag_id", deserialize_with = "deserialize_id")]
    pub tag_id: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Locator of the station's location resource
    pub location: String,
}

/// Station id -> location resource locator
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: HashMap<String, StationMetadata>,
}

impl StationRegistry {
    pub fn new(entries: Vec<StationMetadata>) -> Self {
        let stations = entries
            .into_iter()
            .map(|entry| (entry.tag_id.clone(), entry))
            .collect();
        Self { stations }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: Vec<StationMetadata> = serde_json::from_str(json)?;
        Ok(Self::new(entries))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let registry = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        debug!(
            "Loaded {} stations from {}",
            registry.station_count(),
            path.display()
        );
        Ok(registry)
    }

    pub fn get(&self, tag_id: &str) -> Option<&StationMetadata> {
        self.stations.get(tag_id)
    }

    pub fn locator(&self, tag_id: &str) -> Option<&str> {
        self.get(tag_id).map(|station| station.location.as_str())
    }

    /// Station ids in a country, compared case-insensitively, sorted
    pub fn tag_ids_by_country(&self, country: &str) -> Vec<String> {
        let wanted = country.trim().to_lowercase();
        let mut ids: Vec<String> = self
            .stations
            .values()
            .filter(|station| {
                station
                    .country
                    .as_deref()
                    .is_some_and(|c| c.trim().to_lowercase() == wanted)
            })
            .map(|station| station.tag_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }
}

/// Source of raw bytes for a locator. Retry and caching belong to implementors.
pub trait ByteProvider: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>>;
}

/// Reads locators as paths relative to a root directory
#[derive(Debug, Clone)]
pub struct LocalByteProvider {
    root: PathBuf,
}

impl LocalByteProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ByteProvider for LocalByteProvider {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
        let path = self.root.join(locator);
        debug!("Reading location resource {}", path.display());
        Ok(std::fs::read(path)?)
    }
}

/// Anything that can turn a station id into a coordinate
pub trait StationLookup: Send + Sync {
    fn locate(&self, station_id: &str) -> Result<StationLocation>;
}

/// In-memory station index, e.g. built from one FeatureCollection
#[derive(Debug, Clone, Default)]
pub struct StationIndex {
    locations: HashMap<String, StationLocation>,
}

impl StationIndex {
    pub fn from_locations(locations: Vec<StationLocation>) -> Self {
        Self {
            locations: locations
                .into_iter()
                .map(|location| (location.station_id.clone(), location))
                .collect(),
        }
    }

    pub fn from_geojson(geojson: &serde_json::Value) -> Result<Self> {
        Ok(Self::from_locations(parse_station_locations(geojson)?))
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl StationLookup for StationIndex {
    fn locate(&self, station_id: &str) -> Result<StationLocation> {
        self.locations
            .get(station_id)
            .cloned()
            .ok_or_else(|| RuError::geo(format!("station {} not in index", station_id)))
    }
}

/// Station metadata plus a byte provider for the location resources
#[derive(Clone)]
pub struct StationLocator {
    registry: Arc<StationRegistry>,
    provider: Arc<dyn ByteProvider>,
}

impl StationLocator {
    pub fn new(registry: Arc<StationRegistry>, provider: Arc<dyn ByteProvider>) -> Self {
        Self { registry, provider }
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }
}

impl StationLookup for StationLocator {
    fn locate(&self, station_id: &str) -> Result<StationLocation> {
        let locator = self.registry.locator(station_id).ok_or_else(|| {
            RuError::geo(format!("station {} not in station metadata", station_id))
        })?;

        let bytes = self.provider.fetch(locator)?;
        locations_from_bytes(&bytes)?
            .into_iter()
            .find(|location| location.station_id == station_id)
            .ok_or_else(|| {
                RuError::geo(format!(
                    "location resource '{}' has no feature for station {}",
                    locator, station_id
                ))
            })
    }
}

/// Column named exactly `canonical`, else the first matching alias
fn find_coordinate_column(names: &[String], canonical: &str, aliases: &[&str]) -> Option<String> {
    if names.iter().any(|name| name == canonical) {
        return Some(canonical.to_string());
    }
    names
        .iter()
        .find(|name| aliases.contains(&name.to_lowercase().as_str()))
        .cloned()
}

/// Move the leading columns that exist to the front, keeping the rest in order
pub fn reorder_leading_columns(df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut order: Vec<String> = columns::LEADING
        .iter()
        .filter(|leading| names.iter().any(|name| name == *leading))
        .map(|leading| leading.to_string())
        .collect();
    order.extend(
        names
            .into_iter()
            .filter(|name| !columns::LEADING.contains(&name.as_str())),
    );

    Ok(df.select(order)?)
}

/// Attaches coordinates to datasets
#[derive(Clone, Default)]
pub struct GeoEnricher {
    lookup: Option<Arc<dyn StationLookup>>,
}

impl GeoEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn StationLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn has_lookup(&self) -> bool {
        self.lookup.is_some()
    }

    /// Ensure `lat` and `lon` columns exist. Idempotent.
    pub fn ensure_lat_lon(&self, mut df: DataFrame, station_id: Option<&str>) -> Result<DataFrame> {
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        if names.iter().any(|n| n == columns::LAT) && names.iter().any(|n| n == columns::LON) {
            return Ok(df);
        }

        let lat_column = find_coordinate_column(&names, columns::LAT, columns::LAT_ALIASES);
        let lon_column = find_coordinate_column(&names, columns::LON, columns::LON_ALIASES);
        if let (Some(lat_column), Some(lon_column)) = (lat_column, lon_column) {
            debug!(
                "Using coordinate aliases '{}'/'{}'",
                lat_column, lon_column
            );
            if lat_column != columns::LAT {
                df.rename(&lat_column, columns::LAT.into())?;
            }
            if lon_column != columns::LON {
                df.rename(&lon_column, columns::LON.into())?;
            }
            return reorder_leading_columns(df);
        }

        let Some(station_id) = station_id else {
            return Err(RuError::geo(
                "no lat/lon columns or aliases, and no station id given",
            ));
        };
        let Some(lookup) = &self.lookup else {
            return Err(RuError::geo(format!(
                "no lat/lon columns, and no station metadata to locate station {}",
                station_id
            )));
        };

        let location = lookup.locate(station_id)?;
        debug!(
            "Station {} located at lat={}, lon={}",
            station_id, location.lat, location.lon
        );

        let height = df.height();
        df.with_column(Column::new(columns::LAT.into(), vec![location.lat; height]))?;
        df.with_column(Column::new(columns::LON.into(), vec![location.lon; height]))?;
        reorder_leading_columns(df)
    }
}
