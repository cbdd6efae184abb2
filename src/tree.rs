//! Binary node tree decoding and encoding.
//!
//! The gzip-inflated body of a container is a single self-describing node.
//! Every node starts with a one-byte tag; integers are big-endian:
//!
//! ```text
//! struct  0x01 u32:count { u16:name_len name node }*
//! array   0x02 u32:count { node }*
//! scalar  0x03 u8:width  i{8,16,32,64}
//! string  0x04 u32:len   bytes
//! ```

use crate::constants::{
    COMPRESS_GZIP, CONTAINER_MAGIC, HEADER_TERMINATOR, MAX_TREE_DEPTH, SCALAR_WIDTHS, header_keys,
    node_tags,
};
use crate::error::{FormatError, Result, RuError};
use crate::header::{ContainerHeader, read_header};
use crate::models::Node;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::collections::HashSet;
use std::io::{Read, Write};
use tracing::debug;

/// Header and root node of a decoded binary container
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTree {
    pub header: ContainerHeader,
    pub root: Node,
}

/// Decode a whole container buffer down to its node tree.
///
/// The header is parsed here as well so callers get `announced` and friends
/// without a second pass; the body is always treated as gzip.
pub fn decode_tree(buffer: &[u8]) -> Result<DecodedTree> {
    let (header, body) = read_header(buffer)?;
    let root = decode_body(body)?;
    Ok(DecodedTree { header, root })
}

/// Inflate a gzip body and parse the node tree inside
pub fn decode_body(body: &[u8]) -> Result<Node> {
    let inflated = inflate(body)?;
    debug!(
        "Inflated body: {} -> {} bytes",
        body.len(),
        inflated.len()
    );
    parse_tree(&inflated)
}

/// Concatenated gzip members inflate to one stream
fn inflate(body: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(body);
    let mut inflated = Vec::with_capacity(body.len() * 4);
    decoder
        .read_to_end(&mut inflated)
        .map_err(FormatError::Decompression)?;
    Ok(inflated)
}

/// Parse an inflated byte sequence holding exactly one root node
pub fn parse_tree(bytes: &[u8]) -> Result<Node> {
    let mut parser = TreeParser::new(bytes);
    let root = parser.parse_node(0)?;

    if parser.remaining() > 0 {
        return Err(RuError::malformed_tree(
            parser.pos,
            format!("{} trailing bytes after root node", parser.remaining()),
        ));
    }

    Ok(root)
}

struct TreeParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> TreeParser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(RuError::malformed_tree(
                self.pos,
                format!(
                    "truncated {}: need {} bytes, {} left",
                    what,
                    len,
                    self.remaining()
                ),
            ));
        }
        let slice = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn read_u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a member count and reject counts the remaining input cannot hold
    fn read_count(&mut self, min_member_size: usize, what: &str) -> Result<usize> {
        let at = self.pos;
        let count = self.read_u32(what)? as usize;
        if count.saturating_mul(min_member_size) > self.remaining() {
            return Err(RuError::malformed_tree(
                at,
                format!(
                    "{} declares {} members but only {} bytes remain",
                    what,
                    count,
                    self.remaining()
                ),
            ));
        }
        Ok(count)
    }

    fn parse_node(&mut self, depth: usize) -> Result<Node> {
        if depth > MAX_TREE_DEPTH {
            return Err(RuError::malformed_tree(
                self.pos,
                format!("nesting deeper than {} levels", MAX_TREE_DEPTH),
            ));
        }

        let tag_at = self.pos;
        match self.read_u8("node tag")? {
            node_tags::STRUCT => self.parse_struct(depth),
            node_tags::ARRAY => self.parse_array(depth),
            node_tags::SCALAR => self.parse_scalar(),
            node_tags::STRING => self.parse_string(),
            other => Err(RuError::malformed_tree(
                tag_at,
                format!("unknown node tag 0x{:02x}", other),
            )),
        }
    }

    fn parse_struct(&mut self, depth: usize) -> Result<Node> {
        // name length (2) + empty name + tag (1)
        let count = self.read_count(3, "struct")?;
        let mut members = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);

        for _ in 0..count {
            let name_at = self.pos;
            let name_len = self.read_u16("member name length")? as usize;
            let name_bytes = self.take(name_len, "member name")?;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|e| {
                    RuError::malformed_tree(name_at, format!("member name is not UTF-8: {}", e))
                })?
                .to_string();

            if !seen.insert(name.clone()) {
                return Err(RuError::malformed_tree(
                    name_at,
                    format!("duplicate member name '{}'", name),
                ));
            }

            let child = self.parse_node(depth + 1)?;
            members.push((name, child));
        }

        Ok(Node::Struct(members))
    }

    fn parse_array(&mut self, depth: usize) -> Result<Node> {
        let count = self.read_count(1, "array")?;
        let mut items: Vec<Node> = Vec::with_capacity(count);

        for _ in 0..count {
            let item_at = self.pos;
            let item = self.parse_node(depth + 1)?;
            if let Some(first) = items.first() {
                if first.kind() != item.kind() {
                    return Err(RuError::malformed_tree(
                        item_at,
                        format!(
                            "array mixes {} and {} members",
                            first.kind(),
                            item.kind()
                        ),
                    ));
                }
            }
            items.push(item);
        }

        Ok(Node::Array(items))
    }

    fn parse_scalar(&mut self) -> Result<Node> {
        let width_at = self.pos;
        let width = self.read_u8("scalar width")?;
        let bytes = self.take(width as usize, "scalar payload")?;

        let value = match width {
            1 => i8::from_be_bytes([bytes[0]]) as i64,
            2 => i16::from_be_bytes([bytes[0], bytes[1]]) as i64,
            4 => i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
            8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                i64::from_be_bytes(buf)
            }
            other => {
                return Err(RuError::malformed_tree(
                    width_at,
                    format!(
                        "scalar width {} not one of {:?}",
                        other, SCALAR_WIDTHS
                    ),
                ));
            }
        };

        Ok(Node::Scalar(value))
    }

    fn parse_string(&mut self) -> Result<Node> {
        let len = self.read_u32("string length")? as usize;
        let bytes = self.take(len, "string payload")?;
        Ok(Node::String(String::from_utf8_lossy(bytes).into_owned()))
    }
}

impl Node {
    /// Append this node's binary encoding to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Node::Struct(members) => {
                out.push(node_tags::STRUCT);
                write_count(out, members.len())?;
                for (name, child) in members {
                    let name_len = u16::try_from(name.len()).map_err(|_| {
                        RuError::malformed_tree(
                            out.len(),
                            format!("member name of {} bytes is too long", name.len()),
                        )
                    })?;
                    out.extend_from_slice(&name_len.to_be_bytes());
                    out.extend_from_slice(name.as_bytes());
                    child.encode(out)?;
                }
            }
            Node::Array(items) => {
                out.push(node_tags::ARRAY);
                write_count(out, items.len())?;
                for item in items {
                    item.encode(out)?;
                }
            }
            Node::Scalar(value) => {
                out.push(node_tags::SCALAR);
                let value = *value;
                if let Ok(v) = i8::try_from(value) {
                    out.push(1);
                    out.extend_from_slice(&v.to_be_bytes());
                } else if let Ok(v) = i16::try_from(value) {
                    out.push(2);
                    out.extend_from_slice(&v.to_be_bytes());
                } else if let Ok(v) = i32::try_from(value) {
                    out.push(4);
                    out.extend_from_slice(&v.to_be_bytes());
                } else {
                    out.push(8);
                    out.extend_from_slice(&value.to_be_bytes());
                }
            }
            Node::String(text) => {
                out.push(node_tags::STRING);
                write_count(out, text.len())?;
                out.extend_from_slice(text.as_bytes());
            }
        }
        Ok(())
    }
}

fn write_count(out: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| RuError::malformed_tree(out.len(), format!("count {} exceeds u32", count)))?;
    out.extend_from_slice(&count.to_be_bytes());
    Ok(())
}

/// Encode a full gzip-branch container around `root`.
///
/// `compress_type=gzip` is set on the written header regardless of what
/// `header` holds, so the result always decodes through the tree branch.
pub fn encode_container(header: &ContainerHeader, root: &Node) -> Result<Vec<u8>> {
    let header = header
        .clone()
        .with(header_keys::COMPRESS_TYPE, COMPRESS_GZIP);

    let mut tree = Vec::new();
    root.encode(&mut tree)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tree)?;
    let body = encoder.finish()?;

    let mut buffer = CONTAINER_MAGIC.to_vec();
    buffer.extend_from_slice(header.to_text().as_bytes());
    buffer.extend_from_slice(HEADER_TERMINATOR);
    buffer.extend_from_slice(&body);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Node {
        Node::Struct(vec![
            ("observation_date".to_string(), Node::Scalar(1_744_904_347)),
            (
                "point_data".to_string(),
                Node::Array(vec![
                    Node::Struct(vec![
                        ("AIRTMP".to_string(), Node::Scalar(327)),
                        ("ARPRSS".to_string(), Node::Scalar(10_132)),
                        ("LCLID".to_string(), Node::String("441000205".to_string())),
                    ]),
                    Node::Struct(vec![
                        ("AIRTMP".to_string(), Node::Scalar(-32_768)),
                        ("ARPRSS".to_string(), Node::Scalar(i64::MAX)),
                        ("LCLID".to_string(), Node::String("気象台".to_string())),
                    ]),
                ]),
            ),
        ])
    }

    #[test]
    fn test_container_decodes_to_same_tree() {
        let header = ContainerHeader::new().with("announced", "20250417153907");
        let buffer = encode_container(&header, &sample_tree()).unwrap();

        let decoded = decode_tree(&buffer).unwrap();
        assert_eq!(decoded.root, sample_tree());
        assert_eq!(decoded.header.announced(), Some("20250417153907"));
        assert_eq!(decoded.header.compress_type(), Some("gzip"));
    }

    #[test]
    fn test_scalar_widths() {
        // tag, width, payload
        assert_eq!(parse_tree(&[0x03, 1, 0xFF]).unwrap(), Node::Scalar(-1));
        assert_eq!(parse_tree(&[0x03, 2, 0x01, 0x47]).unwrap(), Node::Scalar(327));
        assert_eq!(
            parse_tree(&[0x03, 4, 0xFF, 0xFF, 0x83, 0x00]).unwrap(),
            Node::Scalar(-32_000)
        );
        assert!(parse_tree(&[0x03, 3, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        let err = parse_tree(&[0x09]).unwrap_err();
        assert!(err.to_string().contains("unknown node tag 0x09"));
    }

    #[test]
    fn test_truncated_string() {
        let err = parse_tree(&[0x04, 0, 0, 0, 5, b'a', b'b']).unwrap_err();
        assert!(matches!(
            err,
            RuError::Format(FormatError::MalformedTree { offset: 5, .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let err = parse_tree(&[0x03, 1, 0x05, 0x00]).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_oversized_count_rejected_before_allocation() {
        let err = parse_tree(&[0x02, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(err.to_string().contains("declares"));
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let mut bytes = Vec::new();
        Node::Struct(vec![
            ("a".to_string(), Node::Scalar(1)),
            ("b".to_string(), Node::Scalar(2)),
        ])
        .encode(&mut bytes)
        .unwrap();
        // rename member "b" to "a"
        let b_at = bytes.iter().rposition(|&b| b == b'b').unwrap();
        bytes[b_at] = b'a';

        let err = parse_tree(&bytes).unwrap_err();
        assert!(err.to_string().contains("duplicate member name 'a'"));
    }

    #[test]
    fn test_heterogeneous_array_rejected() {
        let mut bytes = Vec::new();
        Node::Array(vec![Node::Scalar(1), Node::String("x".to_string())])
            .encode(&mut bytes)
            .unwrap();

        let err = parse_tree(&bytes).unwrap_err();
        assert!(err.to_string().contains("mixes scalar and string"));
    }

    #[test]
    fn test_excessive_nesting_rejected() {
        let mut node = Node::Scalar(0);
        for _ in 0..(MAX_TREE_DEPTH + 2) {
            node = Node::Array(vec![node]);
        }
        let mut bytes = Vec::new();
        node.encode(&mut bytes).unwrap();

        let err = parse_tree(&bytes).unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }

    #[test]
    fn test_corrupt_gzip_body() {
        let mut buffer = b"WN\ncompress_type=gzip\n".to_vec();
        buffer.extend_from_slice(&[0x04, 0x1A]);
        buffer.extend_from_slice(b"definitely not gzip");

        assert!(matches!(
            decode_tree(&buffer).unwrap_err(),
            RuError::Format(FormatError::Decompression(_))
        ));
    }

    #[test]
    fn test_concatenated_gzip_members() {
        let mut tree = Vec::new();
        sample_tree().encode(&mut tree).unwrap();
        let (first, second) = tree.split_at(tree.len() / 2);

        let mut body = Vec::new();
        for part in [first, second] {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(part).unwrap();
            body.extend_from_slice(&encoder.finish().unwrap());
        }

        assert_eq!(decode_body(&body).unwrap(), sample_tree());
    }
}
