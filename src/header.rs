//! RU container reading and header parsing.
//!
//! A container is the magic prefix `WN\n`, a block of `key=value` text lines,
//! the two-byte terminator `0x04 0x1A`, then a body whose encoding is chosen
//! by the header: GeoJSON text when `format=GJSON`, otherwise a gzip-compressed
//! node tree when `compress_type=gzip`.

use crate::constants::{
    COMPRESS_GZIP, CONTAINER_MAGIC, FORMAT_GEOJSON, HEADER_TERMINATOR, header_keys,
};
use crate::error::{FormatError, Result};
use crate::models::Node;
use crate::tree;
use std::collections::BTreeMap;
use tracing::debug;

/// Header fields parsed from `key=value` lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerHeader {
    fields: BTreeMap<String, String>,
}

impl ContainerHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse header text into fields. Later duplicates of a key win.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = BTreeMap::new();

        for (index, raw_line) in text.split('\n').enumerate() {
            let line = raw_line.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| FormatError::HeaderDecode {
                    line: index + 1,
                    reason: format!("expected key=value, found '{}'", line),
                })?;

            let key = key.trim();
            if key.is_empty() {
                return Err(FormatError::HeaderDecode {
                    line: index + 1,
                    reason: "empty key".to_string(),
                }
                .into());
            }

            fields.insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self { fields })
    }

    /// Parse the raw header bytes, replacing invalid UTF-8 sequences
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Store a field the way it would parse back: trimmed, with line breaks
    /// folded into spaces
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields
            .insert(single_line(&key.into()), single_line(&value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn format(&self) -> Option<&str> {
        self.get(header_keys::FORMAT)
    }

    pub fn compress_type(&self) -> Option<&str> {
        self.get(header_keys::COMPRESS_TYPE)
    }

    pub fn announced(&self) -> Option<&str> {
        self.get(header_keys::ANNOUNCED)
    }

    pub fn data_name(&self) -> Option<&str> {
        self.get(header_keys::DATA_NAME)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as header lines; parsing the result yields an equal header
    pub fn to_text(&self) -> String {
        self.fields
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    /// Choose the body decoding branch
    pub fn mode(&self) -> Result<ContainerMode> {
        if self.format() == Some(FORMAT_GEOJSON) {
            Ok(ContainerMode::GeoJson)
        } else if self.compress_type() == Some(COMPRESS_GZIP) {
            Ok(ContainerMode::GzipTree)
        } else {
            Err(FormatError::UnsupportedContainerMode {
                format: self.format().map(str::to_string),
                compress_type: self.compress_type().map(str::to_string),
            }
            .into())
        }
    }
}

fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Body decoding branch selected by the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerMode {
    GeoJson,
    GzipTree,
}

/// Decoded container body
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerBody {
    GeoJson(serde_json::Value),
    Tree(Node),
}

/// A fully read container
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub header: ContainerHeader,
    pub body: ContainerBody,
}

/// Check only the magic prefix
pub fn has_container_magic(buffer: &[u8]) -> bool {
    buffer.starts_with(CONTAINER_MAGIC)
}

/// Split a container into its header bytes and body bytes
pub fn split_container(buffer: &[u8]) -> Result<(&[u8], &[u8])> {
    if !has_container_magic(buffer) {
        return Err(FormatError::NotAContainer.into());
    }

    let after_magic = &buffer[CONTAINER_MAGIC.len()..];
    let terminator_at = after_magic
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .ok_or(FormatError::MissingTerminator)?;

    let header = &after_magic[..terminator_at];
    let body = &after_magic[terminator_at + HEADER_TERMINATOR.len()..];
    Ok((header, body))
}

/// Parse the header and return it with the undecoded body
pub fn read_header(buffer: &[u8]) -> Result<(ContainerHeader, &[u8])> {
    let (header_bytes, body) = split_container(buffer)?;
    let header = ContainerHeader::parse_bytes(header_bytes)?;
    Ok((header, body))
}

/// Read a container and decode its body according to the header
pub fn read_container(buffer: &[u8]) -> Result<Container> {
    let (header, body_bytes) = read_header(buffer)?;
    let mode = header.mode()?;

    debug!(
        "Reading container: mode={:?}, data_name={:?}, header_fields={}, body_bytes={}",
        mode,
        header.data_name(),
        header.len(),
        body_bytes.len()
    );

    let body = match mode {
        ContainerMode::GeoJson => ContainerBody::GeoJson(serde_json::from_slice(body_bytes)?),
        ContainerMode::GzipTree => ContainerBody::Tree(tree::decode_body(body_bytes)?),
    };

    Ok(Container { header, body })
}
