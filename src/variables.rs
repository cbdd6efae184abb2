//! Variable metadata table.
//!
//! Maps canonical codes to display names and the scale/offset used to turn
//! stored integers into physical values. Loaded once and shared read-only
//! (`Arc<VariableTable>`) across decode calls.

use crate::constants::BUILTIN_VARIABLES_JSON;
use crate::error::{Result, RuError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

fn default_scale() -> f64 {
    1.0
}

/// Metadata for one canonical variable code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMeta {
    #[serde(rename = "jp")]
    pub jp_name: String,
    #[serde(rename = "en")]
    pub en_name: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl VariableMeta {
    /// Identity decoding for codes without metadata
    pub const PASSTHROUGH_SCALE: f64 = 1.0;
    pub const PASSTHROUGH_OFFSET: f64 = 0.0;
}

#[derive(Debug, Clone)]
pub struct VariableTable {
    entries: BTreeMap<String, VariableMeta>,
    /// lowercase code -> code
    codes_folded: HashMap<String, String>,
    /// lowercase jp/en name -> code
    names_folded: HashMap<String, String>,
}

impl VariableTable {
    /// Build a table, rejecting display names shared by two codes
    pub fn new(entries: BTreeMap<String, VariableMeta>) -> Result<Self> {
        let mut codes_folded = HashMap::with_capacity(entries.len());
        let mut names_folded = HashMap::with_capacity(entries.len() * 2);

        for (code, meta) in &entries {
            if let Some(previous) = codes_folded.insert(code.to_lowercase(), code.clone()) {
                return Err(RuError::configuration(format!(
                    "variable codes '{}' and '{}' differ only in case",
                    previous, code
                )));
            }

            for name in [&meta.jp_name, &meta.en_name] {
                let folded = name.trim().to_lowercase();
                if folded.is_empty() {
                    continue;
                }
                match names_folded.get(&folded) {
                    Some(owner) if owner != code => {
                        return Err(RuError::configuration(format!(
                            "display name '{}' is used by both '{}' and '{}'",
                            name, owner, code
                        )));
                    }
                    _ => {
                        names_folded.insert(folded, code.clone());
                    }
                }
            }
        }

        Ok(Self {
            entries,
            codes_folded,
            names_folded,
        })
    }

    /// Table compiled into the binary
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_VARIABLES_JSON)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: BTreeMap<String, VariableMeta> = serde_json::from_str(json)?;
        Self::new(entries)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&json)?;
        debug!(
            "Loaded {} variables from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Load from `path` when given, the builtin table otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    pub fn get(&self, code: &str) -> Option<&VariableMeta> {
        self.entries.get(code)
    }

    /// Scale and offset for a code, identity when the code is unknown
    pub fn scale_offset(&self, code: &str) -> (f64, f64) {
        self.get(code)
            .map(|meta| (meta.scale, meta.offset))
            .unwrap_or((
                VariableMeta::PASSTHROUGH_SCALE,
                VariableMeta::PASSTHROUGH_OFFSET,
            ))
    }

    /// Exact case-insensitive code match
    pub fn code_ignore_case(&self, query: &str) -> Option<&str> {
        self.codes_folded
            .get(&query.to_lowercase())
            .map(String::as_str)
    }

    /// Exact case-insensitive jp/en display name match
    pub fn code_for_name(&self, query: &str) -> Option<&str> {
        self.names_folded
            .get(&query.to_lowercase())
            .map(String::as_str)
    }

    /// Every code with its jp and en names, in code order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableMeta)> {
        self.entries.iter().map(|(code, meta)| (code.as_str(), meta))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
