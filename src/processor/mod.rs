//! Batch decoding engine.
//!
//! Ties the pipeline together: container reading, tree decoding, record
//! building, normalization, assembly and optional geospatial enrichment.
//! Single containers decode synchronously; `process_files` decodes many
//! concurrently on the blocking pool while keeping input order.

pub mod discovery;

#[cfg(test)]
pub mod tests;

use crate::config::RuConfig;
use crate::error::{Result, RuError, SchemaError};
use crate::geo::{
    GeoEnricher, LocalByteProvider, StationLocator, StationLookup, StationRegistry,
    guess_station_id,
};
use crate::header::{ContainerBody, read_container};
use crate::models::{NormalizationStats, ProcessingStats};
use crate::normalizer::Normalizer;
use crate::record::build_records;
use crate::resolver::VariableResolver;
use crate::schema::{Assembled, assemble};
use crate::variables::VariableTable;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tracing::{debug, error, info, warn};

/// One decoded container
#[derive(Debug, Clone)]
pub struct DecodedFile {
    pub data: DataFrame,
    pub rows_dropped: usize,
    pub normalization: NormalizationStats,
}

/// Decode a container buffer into a dataset, without enrichment
pub fn decode_container(bytes: &[u8], variables: &VariableTable) -> Result<DecodedFile> {
    let container = read_container(bytes)?;
    let root = match container.body {
        ContainerBody::Tree(root) => root,
        ContainerBody::GeoJson(_) => return Err(SchemaError::NotObservationData.into()),
    };

    let raw = build_records(&root, &container.header)?;
    let mut normalizer = Normalizer::new(variables);
    let records = normalizer.normalize_records(raw);
    let normalization = normalizer.stats();
    debug!(
        "Normalized {} values ({} sentinel, {} out of range)",
        normalization.values, normalization.sentinel_missing, normalization.out_of_range
    );

    let Assembled { data, rows_dropped } = assemble(records)?;
    Ok(DecodedFile {
        data,
        rows_dropped,
        normalization,
    })
}

/// Decoder for single containers and batches of container files
#[derive(Clone)]
pub struct ContainerProcessor {
    config: RuConfig,
    variables: Arc<VariableTable>,
    enricher: GeoEnricher,
    show_progress: bool,
}

impl ContainerProcessor {
    /// Build from configuration, loading the variable table and, when a
    /// station metadata table is configured, a station locator
    pub fn new(config: RuConfig) -> Result<Self> {
        config.validate()?;
        let variables = Arc::new(VariableTable::load(config.variables_path.as_deref())?);
        let mut processor = Self::with_variables(config, variables);

        if let Some(metadata_path) = processor.config.station_metadata_path.clone() {
            let registry = StationRegistry::from_path(&metadata_path)?;
            let root = processor
                .config
                .effective_location_root()
                .unwrap_or_else(|| PathBuf::from("."));
            info!(
                "Station lookup enabled: {} stations, locations under {}",
                registry.station_count(),
                root.display()
            );
            let locator = StationLocator::new(
                Arc::new(registry),
                Arc::new(LocalByteProvider::new(root)),
            );
            processor = processor.with_lookup(Arc::new(locator));
        }

        Ok(processor)
    }

    /// Build around an already loaded variable table
    pub fn with_variables(config: RuConfig, variables: Arc<VariableTable>) -> Self {
        Self {
            config,
            variables,
            enricher: GeoEnricher::new(),
            show_progress: false,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn StationLookup>) -> Self {
        self.enricher = self.enricher.with_lookup(lookup);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &RuConfig {
        &self.config
    }

    pub fn variables(&self) -> &Arc<VariableTable> {
        &self.variables
    }

    /// Resolver over this processor's table with the configured threshold
    pub fn resolver(&self) -> VariableResolver {
        VariableResolver::new(Arc::clone(&self.variables))
            .with_threshold(self.config.fuzzy_threshold)
    }

    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<DecodedFile> {
        decode_container(bytes, &self.variables)
    }

    /// Read, decode and enrich one container file
    pub fn decode_file(&self, path: &Path) -> Result<DecodedFile> {
        debug!("Decoding {}", path.display());
        let bytes = std::fs::read(path)?;
        let mut decoded = self.decode_bytes(&bytes)?;
        decoded.data = self.enrich(decoded.data, Some(path));
        Ok(decoded)
    }

    /// Station id for a file: configured id first, then a guess from the path
    pub fn station_id_for(&self, path: Option<&Path>) -> Option<String> {
        self.config.station_id.clone().or_else(|| {
            path.filter(|_| self.config.guess_station_from_path)
                .and_then(guess_station_id)
        })
    }

    /// Attach coordinates when a lookup is configured. Failures keep the
    /// dataset unenriched.
    fn enrich(&self, data: DataFrame, path: Option<&Path>) -> DataFrame {
        if !self.enricher.has_lookup() {
            return data;
        }

        let station_id = self.station_id_for(path);
        match self.enricher.ensure_lat_lon(data.clone(), station_id.as_deref()) {
            Ok(enriched) => enriched,
            Err(e) => {
                warn!(
                    "Keeping {} without coordinates: {}",
                    path.map(|p| p.display().to_string())
                        .unwrap_or_else(|| "dataset".to_string()),
                    e
                );
                data
            }
        }
    }

    /// Decode many files concurrently into one dataset.
    ///
    /// Row order follows `files`. Files that fail are counted and logged;
    /// they never abort the batch.
    pub async fn process_files(&self, files: &[PathBuf]) -> Result<(DataFrame, ProcessingStats)> {
        let start_time = Instant::now();
        let mut stats = ProcessingStats::default();

        let pb = if self.show_progress {
            ProgressBar::new(files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .map(|style| style.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message("Decoding containers");

        let concurrent_limit = self.config.max_concurrent_files.min(files.len()).max(1);
        debug!(
            "Decoding {} files with concurrency {}",
            files.len(),
            concurrent_limit
        );

        let results: Vec<(PathBuf, Result<DecodedFile>)> = stream::iter(files.iter().cloned())
            .map(|path| {
                let processor = self.clone();
                let pb = pb.clone();
                async move {
                    if let Some(file_name) = path.file_name() {
                        pb.set_message(format!("Decoding: {}", file_name.to_string_lossy()));
                    }

                    let task_path = path.clone();
                    let result = task::spawn_blocking(move || processor.decode_file(&task_path))
                        .await
                        .map_err(|e| RuError::ProcessingFailed {
                            path: path.clone(),
                            reason: format!("decode task failed: {}", e),
                        })
                        .and_then(|result| result);
                    pb.inc(1);
                    (path, result)
                }
            })
            .buffered(concurrent_limit)
            .collect()
            .await;

        pb.finish_with_message("All containers decoded");

        let mut frames = Vec::with_capacity(results.len());
        for (path, result) in results {
            match result {
                Ok(decoded) => {
                    stats.files_processed += 1;
                    stats.rows_dropped += decoded.rows_dropped;
                    stats.normalization.merge(&decoded.normalization);
                    frames.push(decoded.data.lazy());
                }
                Err(e) => {
                    error!("Failed to decode {}: {}", path.display(), e);
                    stats.files_failed += 1;
                    stats.failed_files.push(path);
                }
            }
        }

        let data = match frames.len() {
            0 => assemble(Vec::new())?.data,
            1 => frames.remove(0).collect()?,
            _ => concat_lf_diagonal(
                frames,
                UnionArgs {
                    to_supertypes: true,
                    ..Default::default()
                },
            )?
            .collect()?,
        };

        stats.total_rows = data.height();
        stats.processing_time_ms = start_time.elapsed().as_millis();
        info!(
            "Decoded {} files ({} failed), {} rows",
            stats.files_processed, stats.files_failed, stats.total_rows
        );

        Ok((data, stats))
    }
}
