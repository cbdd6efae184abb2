//! File discovery module for RU containers
//!
//! Walks a directory tree for container files and narrows them to a time
//! window using the `%Y%m%d%H%M%S` stamp that starts each file name.

use crate::constants::{
    CONTAINER_EXTENSION, FILE_STAMP_FORMAT, FILE_STAMP_PATTERN, NEAREST_FILE_WINDOW_SECS,
};
use crate::error::{Result, RuError};
use crate::geo::guess_station_id;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

/// File discovery component for container archives
#[derive(Debug)]
pub struct FileDiscovery {
    root: PathBuf,
    station_count: usize,
}

impl FileDiscovery {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            station_count: 0,
        }
    }

    /// Distinct station ids seen in discovered paths
    pub fn station_count(&self) -> usize {
        self.station_count
    }

    /// Discover container files under the root, sorted by path.
    ///
    /// A root that is itself a file is returned as the only entry.
    pub fn discover(&mut self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Err(RuError::DatasetNotFound {
                path: self.root.clone(),
            });
        }

        let mut files = if self.root.is_file() {
            vec![self.root.clone()]
        } else {
            let mut found = Vec::new();
            for entry in WalkDir::new(&self.root).follow_links(true) {
                let entry = entry.map_err(|e| RuError::Io(e.into()))?;
                if entry.file_type().is_file() && is_container_file(entry.path()) {
                    found.push(entry.into_path());
                }
            }
            found
        };
        files.sort();

        let stations: HashSet<String> = files.iter().filter_map(|p| guess_station_id(p)).collect();
        self.station_count = stations.len();
        debug!(
            "Found {} container files from {} stations under {}",
            files.len(),
            self.station_count,
            self.root.display()
        );

        Ok(files)
    }
}

static FILE_STAMP_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(FILE_STAMP_PATTERN).ok());

/// Stamp at the start of a file name, if any
pub fn file_stamp(path: &Path) -> Option<DateTime<Utc>> {
    let pattern = FILE_STAMP_REGEX.as_ref()?;
    let name = path.file_name()?.to_str()?;
    let digits = pattern.captures(name)?.get(1)?.as_str();
    NaiveDateTime::parse_from_str(digits, FILE_STAMP_FORMAT)
        .ok()
        .map(|stamp| stamp.and_utc())
}

/// Stamped names or the container extension
pub fn is_container_file(path: &Path) -> bool {
    file_stamp(path).is_some()
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(CONTAINER_EXTENSION))
}

/// Narrow files to a time window.
///
/// - `start` and `end`: stamped files inside `[start, end]`, in stamp order
/// - `start` only: the single stamped file nearest to `start`, if within 30 minutes
/// - `end` only: stamped files at or before `end`, in stamp order
/// - neither: every file, unchanged
pub fn select_window(
    files: &[PathBuf],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<PathBuf> {
    if start.is_none() && end.is_none() {
        return files.to_vec();
    }

    let mut stamped: Vec<(DateTime<Utc>, &PathBuf)> = files
        .iter()
        .filter_map(|path| file_stamp(path).map(|stamp| (stamp, path)))
        .collect();
    stamped.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    match (start, end) {
        (Some(start), Some(end)) => stamped
            .into_iter()
            .filter(|(stamp, _)| (start..=end).contains(stamp))
            .map(|(_, path)| path.clone())
            .collect(),
        (Some(start), None) => stamped
            .into_iter()
            .map(|(stamp, path)| ((stamp - start).num_seconds().abs(), path))
            .filter(|(distance, _)| *distance <= NEAREST_FILE_WINDOW_SECS)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, path)| vec![path.clone()])
            .unwrap_or_default(),
        (None, Some(end)) => stamped
            .into_iter()
            .filter(|(stamp, _)| *stamp <= end)
            .map(|(_, path)| path.clone())
            .collect(),
        (None, None) => Vec::new(),
    }
}
