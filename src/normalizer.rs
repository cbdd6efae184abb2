//! Semantic value normalization.
//!
//! Converts stored integers into physical values: sentinel magnitudes become
//! NaN, everything else is scaled, offset and rounded to three decimals.
//! Air temperature additionally passes a plausibility guard. A bad value
//! never fails the record; it becomes NaN.

use crate::constants::{
    AIR_TEMPERATURE_CODE, AIR_TEMPERATURE_MAX, AIR_TEMPERATURE_MIN, DECODED_DECIMALS,
    MISSING_SENTINEL_MAGNITUDE, columns,
};
use crate::models::{NormalizationStats, ObservationRecord, RawField, RawRecord, Value};
use crate::variables::VariableTable;
use tracing::debug;

/// Round half away from zero to the decoded precision
pub fn round_decoded(value: f64) -> f64 {
    let factor = 10f64.powi(DECODED_DECIMALS);
    (value * factor).round() / factor
}

pub fn is_missing_sentinel(raw: i64) -> bool {
    raw.unsigned_abs() >= MISSING_SENTINEL_MAGNITUDE as u64
}

/// Physical range guard for a code, if one applies.
///
/// Only air temperature carries a guard; whether other variables warrant one
/// is not settled, so none are assumed.
pub fn physical_range(code: &str) -> Option<(f64, f64)> {
    (code == AIR_TEMPERATURE_CODE).then_some((AIR_TEMPERATURE_MIN, AIR_TEMPERATURE_MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Lat,
    Lon,
}

/// Coordinate axis a field name stands for, and whether it is the exact
/// column name rather than an alias
fn coordinate_axis(name: &str) -> Option<(Axis, bool)> {
    if name == columns::LAT {
        return Some((Axis::Lat, true));
    }
    if name == columns::LON {
        return Some((Axis::Lon, true));
    }

    let is_alias = |aliases: &[&str]| aliases.iter().any(|a| a.eq_ignore_ascii_case(name));
    if is_alias(columns::LAT_ALIASES) {
        Some((Axis::Lat, false))
    } else if is_alias(columns::LON_ALIASES) {
        Some((Axis::Lon, false))
    } else {
        None
    }
}

fn coordinate_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(v) => Some(*v),
        Value::Text(text) => text.trim().parse::<f64>().ok(),
    }
}

#[derive(Debug, Default)]
struct Coordinate {
    exact: Option<f64>,
    alias: Option<f64>,
}

impl Coordinate {
    fn set(&mut self, value: Option<f64>, exact: bool) {
        let slot = if exact { &mut self.exact } else { &mut self.alias };
        if slot.is_none() {
            *slot = value;
        }
    }

    fn value(&self) -> Option<f64> {
        self.exact.or(self.alias)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Decoded,
    Sentinel,
    OutOfRange,
}

pub struct Normalizer<'a> {
    table: &'a VariableTable,
    stats: NormalizationStats,
}

impl<'a> Normalizer<'a> {
    pub fn new(table: &'a VariableTable) -> Self {
        Self {
            table,
            stats: NormalizationStats::default(),
        }
    }

    pub fn stats(&self) -> NormalizationStats {
        self.stats
    }

    /// Decode one stored integer for `code`
    pub fn decode_value(&mut self, code: &str, raw: i64) -> f64 {
        let (value, outcome) = self.decode_with_outcome(code, raw);
        self.stats.values += 1;
        match outcome {
            Outcome::Decoded => {}
            Outcome::Sentinel => self.stats.sentinel_missing += 1,
            Outcome::OutOfRange => self.stats.out_of_range += 1,
        }
        value
    }

    fn decode_with_outcome(&self, code: &str, raw: i64) -> (f64, Outcome) {
        if is_missing_sentinel(raw) {
            return (f64::NAN, Outcome::Sentinel);
        }

        let (scale, offset) = self.table.scale_offset(code);
        let decoded = round_decoded(raw as f64 * scale + offset);

        match physical_range(code) {
            Some((min, max)) if !(min..=max).contains(&decoded) => {
                debug!(
                    "{} decoded to {} outside [{}, {}], treating as missing",
                    code, decoded, min, max
                );
                (f64::NAN, Outcome::OutOfRange)
            }
            _ => (decoded, Outcome::Decoded),
        }
    }

    /// Normalize every field of a raw record.
    ///
    /// `lat`/`lon` and their aliases become the record coordinates whatever
    /// their node kind; an exact name wins over an alias. Text that is not a
    /// number leaves the coordinate unset.
    pub fn normalize_record(&mut self, raw: RawRecord) -> ObservationRecord {
        let mut lat = Coordinate::default();
        let mut lon = Coordinate::default();
        let mut values = Vec::with_capacity(raw.fields.len());

        for (code, field) in raw.fields {
            let value = match field {
                RawField::Integer(stored) => Value::Number(self.decode_value(&code, stored)),
                RawField::Text(text) => Value::Text(text),
            };

            match coordinate_axis(&code) {
                Some((Axis::Lat, exact)) => lat.set(coordinate_value(&value), exact),
                Some((Axis::Lon, exact)) => lon.set(coordinate_value(&value), exact),
                None => values.push((code, value)),
            }
        }

        ObservationRecord {
            time: raw.time,
            announced: raw.announced,
            lat: lat.value(),
            lon: lon.value(),
            values,
        }
    }

    pub fn normalize_records(&mut self, raw: Vec<RawRecord>) -> Vec<ObservationRecord> {
        raw.into_iter()
            .map(|record| self.normalize_record(record))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn table() -> VariableTable {
        VariableTable::from_json_str(
            r#"{
                "AIRTMP": {"jp": "気温", "en": "air temperature", "scale": 0.1, "offset": 0},
                "PRS": {"jp": "気圧", "en": "pressure", "scale": 0.1, "offset": 900},
                "ODD": {"jp": "奇数", "en": "odd", "scale": 0.0001, "offset": 0}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_scale_and_offset() {
        let table = table();
        let mut normalizer = Normalizer::new(&table);

        assert_eq!(normalizer.decode_value("AIRTMP", 327), 32.7);
        assert_eq!(normalizer.decode_value("PRS", 1132), 1013.2);
        assert_eq!(normalizer.decode_value("ODD", 12345), 1.235);
    }

    #[test]
    fn test_unknown_code_passes_through() {
        let table = table();
        let mut normalizer = Normalizer::new(&table);
        assert_eq!(normalizer.decode_value("UNLISTED", 4711), 4711.0);
        assert_eq!(normalizer.decode_value("UNLISTED", -31_999), -31_999.0);
    }

    #[test]
    fn test_sentinel_magnitudes_are_missing() {
        let table = table();
        let mut normalizer = Normalizer::new(&table);

        for raw in [32_000, -32_000, 32_767, -32_768, i64::MIN, i64::MAX] {
            assert!(normalizer.decode_value("PRS", raw).is_nan(), "raw {}", raw);
            assert!(normalizer.decode_value("UNLISTED", raw).is_nan(), "raw {}", raw);
        }
        assert_eq!(normalizer.stats().sentinel_missing, 12);
    }

    #[test]
    fn test_air_temperature_guard_boundaries() {
        let table = table();
        let mut normalizer = Normalizer::new(&table);

        assert_eq!(normalizer.decode_value("AIRTMP", -800), -80.0);
        assert_eq!(normalizer.decode_value("AIRTMP", 700), 70.0);
        assert!(normalizer.decode_value("AIRTMP", -801).is_nan());
        assert!(normalizer.decode_value("AIRTMP", 701).is_nan());
        assert_eq!(normalizer.stats().out_of_range, 2);

        // no guard for other codes
        assert_eq!(normalizer.decode_value("PRS", 7_000), 1600.0);
    }

    #[test]
    fn test_normalize_record_moves_coordinates() {
        let table = table();
        let mut normalizer = Normalizer::new(&table);
        let time = DateTime::from_timestamp(1_744_904_347, 0).unwrap();

        let record = normalizer.normalize_record(RawRecord {
            time,
            announced: time,
            fields: vec![
                ("lat".to_string(), RawField::Integer(35)),
                ("lon".to_string(), RawField::Integer(139)),
                ("AIRTMP".to_string(), RawField::Integer(32_001)),
                ("LCLID".to_string(), RawField::Text("441000205".to_string())),
            ],
        });

        assert_eq!(record.lat, Some(35.0));
        assert_eq!(record.lon, Some(139.0));
        assert!(record.get("AIRTMP").and_then(Value::as_f64).unwrap().is_nan());
        assert_eq!(
            record.get("LCLID"),
            Some(&Value::Text("441000205".to_string()))
        );
        assert!(!record.has_reading());
    }

    #[test]
    fn test_text_and_alias_coordinates_never_become_variables() {
        let table = table();
        let mut normalizer = Normalizer::new(&table);
        let time = DateTime::from_timestamp(1_744_904_347, 0).unwrap();

        let record = normalizer.normalize_record(RawRecord {
            time,
            announced: time,
            fields: vec![
                ("AIRTMP".to_string(), RawField::Integer(200)),
                ("lat".to_string(), RawField::Text(" 35.6".to_string())),
                ("Longitude".to_string(), RawField::Integer(139)),
                ("lon".to_string(), RawField::Text("n/a".to_string())),
                ("Latitude".to_string(), RawField::Integer(10)),
            ],
        });

        // exact name wins over the alias; unparseable text falls back to it
        assert_eq!(record.lat, Some(35.6));
        assert_eq!(record.lon, Some(139.0));
        assert_eq!(record.values.len(), 1);
        assert_eq!(record.get("AIRTMP"), Some(&Value::Number(20.0)));
    }

    #[test]
    fn test_coordinates_alone_are_not_a_reading() {
        let table = table();
        let mut normalizer = Normalizer::new(&table);
        let time = DateTime::from_timestamp(1_744_904_347, 0).unwrap();

        let record = normalizer.normalize_record(RawRecord {
            time,
            announced: time,
            fields: vec![
                ("AIRTMP".to_string(), RawField::Integer(32_000)),
                ("latitude".to_string(), RawField::Integer(35)),
                ("longitude".to_string(), RawField::Integer(139)),
            ],
        });

        assert_eq!((record.lat, record.lon), (Some(35.0), Some(139.0)));
        assert!(record.get("latitude").is_none());
        assert!(!record.has_reading());
    }

    #[test]
    fn test_round_decoded() {
        assert_eq!(round_decoded(1.23449), 1.234);
        assert_eq!(round_decoded(-0.0005), -0.001);
        assert_eq!(round_decoded(2.0), 2.0);
    }
}
