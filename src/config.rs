//! Configuration management and validation.
//!
//! Holds the decode parameters shared by the library and the CLI: resolver
//! threshold, batch concurrency, and where variable and station metadata
//! come from.

use crate::constants::DEFAULT_FUZZY_THRESHOLD;
use crate::error::{Result, RuError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Main configuration for the RU processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuConfig {
    /// Minimum similarity (0-100) for fuzzy variable resolution
    pub fuzzy_threshold: u8,

    /// Maximum number of files decoded concurrently
    pub max_concurrent_files: usize,

    /// Variable table to use instead of the embedded one
    pub variables_path: Option<PathBuf>,

    /// Station metadata table (JSON array of TagID/location entries)
    pub station_metadata_path: Option<PathBuf>,

    /// Root directory that location locators are relative to
    pub location_root: Option<PathBuf>,

    /// Station id applied to every decoded file
    pub station_id: Option<String>,

    /// Guess the station id from each file path when none is set
    pub guess_station_from_path: bool,
}

impl Default for RuConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            max_concurrent_files: num_cpus::get(),
            variables_path: None,
            station_metadata_path: None,
            location_root: None,
            station_id: None,
            guess_station_from_path: true,
        }
    }
}

impl RuConfig {
    pub fn with_fuzzy_threshold(mut self, threshold: u8) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn with_max_concurrent_files(mut self, max_files: usize) -> Self {
        self.max_concurrent_files = max_files;
        self
    }

    pub fn with_variables_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.variables_path = Some(path.into());
        self
    }

    pub fn with_station_metadata(mut self, path: impl Into<PathBuf>) -> Self {
        self.station_metadata_path = Some(path.into());
        self
    }

    pub fn with_location_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.location_root = Some(root.into());
        self
    }

    pub fn with_station_id(mut self, station_id: impl Into<String>) -> Self {
        self.station_id = Some(station_id.into());
        self
    }

    pub fn without_station_guessing(mut self) -> Self {
        self.guess_station_from_path = false;
        self
    }

    /// Directory location locators resolve against: the explicit root, else
    /// the directory holding the station metadata table
    pub fn effective_location_root(&self) -> Option<PathBuf> {
        self.location_root.clone().or_else(|| {
            self.station_metadata_path
                .as_ref()
                .and_then(|path| path.parent())
                .map(|parent| parent.to_path_buf())
        })
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.fuzzy_threshold > 100 {
            return Err(RuError::configuration(format!(
                "fuzzy_threshold must be within 0-100, got {}",
                self.fuzzy_threshold
            )));
        }

        if self.max_concurrent_files == 0 {
            return Err(RuError::configuration(
                "max_concurrent_files must be greater than 0",
            ));
        }

        if let Some(station_id) = &self.station_id {
            if station_id.trim().is_empty() {
                return Err(RuError::configuration("station_id must not be empty"));
            }
        }

        for path in [&self.variables_path, &self.station_metadata_path]
            .into_iter()
            .flatten()
        {
            if !path.is_file() {
                return Err(RuError::configuration(format!(
                    "{} is not a readable file",
                    path.display()
                )));
            }
        }

        debug!("Configuration validated: {:?}", self);
        Ok(())
    }
}
