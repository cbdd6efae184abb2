//! Observation record building.
//!
//! Walks a decoded tree into one flat field map per element of `point_data`,
//! stamping each with the observation time and the header's announce time.

use crate::constants::{
    NESTED_FIELD_SEPARATOR, OBSERVATION_DATE_FIELD, POINT_DATA_FIELD, TIMESTAMP_FORMATS, columns,
};
use crate::error::{Result, RuError};
use crate::header::ContainerHeader;
use crate::models::{Node, RawField, RawRecord};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

/// Parse a textual timestamp in any of the accepted layouts
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in TIMESTAMP_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc());
        }
    }

    // Plain epoch seconds, after the compact digit layouts had their chance
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
    }

    None
}

fn node_timestamp(node: &Node) -> Option<DateTime<Utc>> {
    match node {
        Node::Scalar(secs) => DateTime::from_timestamp(*secs, 0),
        Node::String(text) => parse_timestamp(text),
        _ => None,
    }
}

/// Build raw records from a decoded tree
pub fn build_records(root: &Node, header: &ContainerHeader) -> Result<Vec<RawRecord>> {
    let date_node = root
        .get(OBSERVATION_DATE_FIELD)
        .ok_or_else(|| RuError::missing_field(OBSERVATION_DATE_FIELD))?;
    let points = root
        .get(POINT_DATA_FIELD)
        .ok_or_else(|| RuError::missing_field(POINT_DATA_FIELD))?;

    let time = node_timestamp(date_node).ok_or_else(|| {
        RuError::invalid_field(
            OBSERVATION_DATE_FIELD,
            format!("{} value is not a timestamp", date_node.kind()),
        )
    })?;

    let announced = match header.announced() {
        Some(text) => parse_timestamp(text).unwrap_or_else(|| {
            warn!(
                "Unparseable announced '{}', using observation time instead",
                text
            );
            time
        }),
        None => time,
    };

    let Node::Array(items) = points else {
        return Err(RuError::invalid_field(
            POINT_DATA_FIELD,
            format!("expected array, found {}", points.kind()),
        ));
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        let Node::Struct(members) = item else {
            return Err(RuError::invalid_field(
                POINT_DATA_FIELD,
                format!("expected struct members, found {}", item.kind()),
            ));
        };

        let mut fields = Vec::with_capacity(members.len());
        flatten_members(members, None, &mut fields);
        records.push(RawRecord {
            time,
            announced,
            fields,
        });
    }

    debug!(
        "Built {} records for observation time {}",
        records.len(),
        time
    );
    Ok(records)
}

fn flatten_members(
    members: &[(String, Node)],
    prefix: Option<&str>,
    fields: &mut Vec<(String, RawField)>,
) {
    for (name, node) in members {
        let key = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, NESTED_FIELD_SEPARATOR, name),
            None => name.clone(),
        };

        if prefix.is_none() && (key == columns::TIME || key == columns::ANNOUNCED) {
            debug!("Ignoring point member '{}' shadowing a stamped column", key);
            continue;
        }

        match node {
            Node::Scalar(value) => fields.push((key, RawField::Integer(*value))),
            Node::String(text) => fields.push((key, RawField::Text(text.clone()))),
            Node::Struct(children) => flatten_members(children, Some(&key), fields),
            Node::Array(_) => fields.push((key, RawField::Text(node.to_json().to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;

    fn point(fields: Vec<(&str, Node)>) -> Node {
        Node::Struct(
            fields
                .into_iter()
                .map(|(name, node)| (name.to_string(), node))
                .collect(),
        )
    }

    fn root(date: Node, points: Vec<Node>) -> Node {
        Node::Struct(vec![
            ("observation_date".to_string(), date),
            ("point_data".to_string(), Node::Array(points)),
        ])
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        let expected = DateTime::parse_from_rfc3339("2025-04-17T15:39:07Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(parse_timestamp("2025-04-17T15:39:07Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-04-17 15:39:07"), Some(expected));
        assert_eq!(parse_timestamp("2025/04/17 15:39:07"), Some(expected));
        assert_eq!(parse_timestamp("20250417153907"), Some(expected));
        assert_eq!(parse_timestamp("1744904347"), Some(expected));
        assert_eq!(parse_timestamp("not a time"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_records_are_stamped() {
        let tree = root(
            Node::Scalar(1_744_904_347),
            vec![
                point(vec![("AIRTMP", Node::Scalar(327))]),
                point(vec![("AIRTMP", Node::Scalar(301))]),
            ],
        );
        let header = ContainerHeader::new().with("announced", "2025-04-17 15:45:00");

        let records = build_records(&tree, &header).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time.timestamp(), 1_744_904_347);
        assert_eq!(
            records[1].announced,
            parse_timestamp("2025-04-17 15:45:00").unwrap()
        );
        assert_eq!(
            records[1].fields,
            vec![("AIRTMP".to_string(), RawField::Integer(301))]
        );
    }

    #[test]
    fn test_announced_defaults_to_time() {
        let tree = root(
            Node::String("20250417153907".to_string()),
            vec![point(vec![("RHUM", Node::Scalar(550))])],
        );

        let records = build_records(&tree, &ContainerHeader::new()).unwrap();
        assert_eq!(records[0].announced, records[0].time);

        let garbled = ContainerHeader::new().with("announced", "yesterday");
        let records = build_records(&tree, &garbled).unwrap();
        assert_eq!(records[0].announced, records[0].time);
    }

    #[test]
    fn test_missing_subtrees() {
        let no_points = Node::Struct(vec![(
            "observation_date".to_string(),
            Node::Scalar(0),
        )]);
        match build_records(&no_points, &ContainerHeader::new()).unwrap_err() {
            RuError::Schema(SchemaError::MissingField { name }) => assert_eq!(name, "point_data"),
            other => panic!("Expected MissingField, got {:?}", other),
        }

        let no_date = Node::Struct(vec![("point_data".to_string(), Node::Array(vec![]))]);
        match build_records(&no_date, &ContainerHeader::new()).unwrap_err() {
            RuError::Schema(SchemaError::MissingField { name }) => {
                assert_eq!(name, "observation_date")
            }
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_non_struct_points_rejected() {
        let tree = root(Node::Scalar(0), vec![Node::Scalar(1)]);
        assert!(matches!(
            build_records(&tree, &ContainerHeader::new()).unwrap_err(),
            RuError::Schema(SchemaError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_nested_members_are_flattened() {
        let tree = root(
            Node::Scalar(0),
            vec![point(vec![
                ("time", Node::String("ignored".to_string())),
                (
                    "wind",
                    point(vec![("speed", Node::Scalar(30)), ("dir", Node::Scalar(270))]),
                ),
                ("flags", Node::Array(vec![Node::Scalar(1), Node::Scalar(2)])),
            ])],
        );

        let records = build_records(&tree, &ContainerHeader::new()).unwrap();
        assert_eq!(
            records[0].fields,
            vec![
                ("wind.speed".to_string(), RawField::Integer(30)),
                ("wind.dir".to_string(), RawField::Integer(270)),
                ("flags".to_string(), RawField::Text("[1,2]".to_string())),
            ]
        );
    }
}
