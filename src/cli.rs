//! Command-line interface components.

use crate::config::RuConfig;
use crate::constants::DEFAULT_FUZZY_THRESHOLD;
use crate::record::parse_timestamp;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ru_processor")]
#[command(about = "Decode archived weather-station RU containers into observation tables")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Minimum similarity (0-100) for fuzzy variable name matches
    #[arg(long, global = true, default_value_t = DEFAULT_FUZZY_THRESHOLD,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    pub fuzzy_threshold: u8,

    /// Variable table JSON to use instead of the built-in one
    #[arg(long, global = true, value_name = "FILE")]
    pub variables_table: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode container files or directories into one table
    Decode(DecodeArgs),

    /// Print a container's header and node tree as JSON
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Resolve variable names to canonical codes
    Resolve {
        #[arg(value_name = "QUERY", required = true)]
        queries: Vec<String>,
    },

    /// Look up a station's coordinates in station metadata
    Locate(LocateArgs),
}

#[derive(clap::Args, Debug)]
pub struct DecodeArgs {
    /// Container files or directories to search
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Window start; alone, selects the file nearest to this time
    #[arg(long, value_parser = parse_time_arg)]
    pub start: Option<DateTime<Utc>>,

    /// Window end (inclusive)
    #[arg(long, value_parser = parse_time_arg)]
    pub end: Option<DateTime<Utc>>,

    /// Station id used for coordinate lookup
    #[arg(long)]
    pub station_id: Option<String>,

    /// Variables to keep, by code or name (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub variables: Vec<String>,

    /// Station metadata table (JSON)
    #[arg(long, value_name = "FILE")]
    pub stations: Option<PathBuf>,

    /// Directory that location locators are relative to
    #[arg(long, value_name = "DIR")]
    pub location_root: Option<PathBuf>,

    /// Maximum files decoded at once
    #[arg(short = 'j', long)]
    pub max_concurrent_files: Option<usize>,

    /// Do not guess station ids from file paths
    #[arg(long)]
    pub no_guess_station: bool,
}

#[derive(clap::Args, Debug)]
pub struct LocateArgs {
    pub station_id: String,

    /// Station metadata table (JSON)
    #[arg(long, value_name = "FILE")]
    pub stations: PathBuf,

    /// Directory that location locators are relative to
    #[arg(long, value_name = "DIR")]
    pub location_root: Option<PathBuf>,
}

fn parse_time_arg(text: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(text).ok_or_else(|| format!("unrecognized timestamp '{}'", text))
}

impl Args {
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }

    /// Configuration shared by every subcommand
    pub fn base_config(&self) -> RuConfig {
        let mut config = RuConfig::default().with_fuzzy_threshold(self.fuzzy_threshold);
        if let Some(path) = &self.variables_table {
            config = config.with_variables_path(path);
        }
        config
    }
}

impl DecodeArgs {
    pub fn apply(&self, mut config: RuConfig) -> RuConfig {
        if let Some(station_id) = &self.station_id {
            config = config.with_station_id(station_id);
        }
        if let Some(path) = &self.stations {
            config = config.with_station_metadata(path);
        }
        if let Some(root) = &self.location_root {
            config = config.with_location_root(root);
        }
        if let Some(max_files) = self.max_concurrent_files {
            config = config.with_max_concurrent_files(max_files);
        }
        if self.no_guess_station {
            config = config.without_station_guessing();
        }
        config
    }
}

/// Subcommand implementations
pub mod commands {
    use super::*;
    use crate::geo::{LocalByteProvider, StationLocator, StationLookup, StationRegistry};
    use crate::header::{ContainerBody, read_container};
    use crate::processor::ContainerProcessor;
    use crate::processor::discovery::{FileDiscovery, select_window};
    use crate::resolver::VariableResolver;
    use crate::schema::select_variables;
    use crate::variables::VariableTable;
    use anyhow::{Context, Result};
    use colored::*;
    use std::path::Path;
    use std::sync::Arc;
    use tracing::debug;

    /// Set up structured logging on stderr
    pub fn setup_logging(args: &Args) {
        use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("ru_processor={}", args.log_level())));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    pub async fn run(args: Args) -> Result<()> {
        let config = args.base_config();
        match &args.command {
            Command::Decode(decode) => run_decode(decode, decode.apply(config)).await,
            Command::Inspect { file } => run_inspect(file),
            Command::Resolve { queries } => run_resolve(queries, &config),
            Command::Locate(locate) => run_locate(locate),
        }
    }

    async fn run_decode(args: &DecodeArgs, config: RuConfig) -> Result<()> {
        println!("{}", "Decoding RU containers".bright_green().bold());

        let mut files = Vec::new();
        let mut stations = 0;
        for path in &args.paths {
            let mut discovery = FileDiscovery::new(path.clone());
            files.extend(
                discovery
                    .discover()
                    .with_context(|| format!("Failed to search {}", path.display()))?,
            );
            stations += discovery.station_count();
        }
        let files = select_window(&files, args.start, args.end);
        println!(
            "  {} {} files from {} stations",
            "Found".bright_green(),
            files.len().to_string().bright_white().bold(),
            stations.to_string().bright_white().bold()
        );

        if files.is_empty() {
            println!("{}", "No container files matched".bright_yellow());
            return Ok(());
        }

        let processor = ContainerProcessor::new(config)
            .context("Invalid configuration")?
            .with_progress(true);
        let (mut data, stats) = processor.process_files(&files).await?;

        if !args.variables.is_empty() {
            data = select_variables(&data, &args.variables, &processor.resolver())?;
        }

        println!("\n{}", "Decode Summary".bright_green().bold());
        println!(
            "  {} {}ms",
            "Time elapsed:".bright_cyan(),
            stats.processing_time_ms.to_string().bright_white()
        );
        println!(
            "  {} {}",
            "Files decoded:".bright_cyan(),
            stats.files_processed.to_string().bright_white()
        );
        if stats.files_failed > 0 {
            println!(
                "  {} {}",
                "Files failed:".bright_red(),
                stats.files_failed.to_string().bright_red().bold()
            );
            for path in &stats.failed_files {
                println!("    {}", path.display().to_string().bright_black());
            }
        }
        println!(
            "  {} {} ({} without readings dropped)",
            "Rows:".bright_cyan(),
            stats.total_rows.to_string().bright_white().bold(),
            stats.rows_dropped
        );
        println!(
            "  {} {} sentinel, {} out of range, of {}",
            "Missing values:".bright_cyan(),
            stats.normalization.sentinel_missing,
            stats.normalization.out_of_range,
            stats.normalization.values
        );
        println!("\n{}", data);

        Ok(())
    }

    fn run_inspect(file: &Path) -> Result<()> {
        let bytes =
            std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let container = read_container(&bytes)
            .with_context(|| format!("{} is not a readable container", file.display()))?;

        println!("{}", "Header".bright_green().bold());
        for (key, value) in container.header.iter() {
            println!("  {} {}", format!("{}=", key).bright_cyan(), value);
        }

        let body = match container.body {
            ContainerBody::Tree(root) => root.to_json(),
            ContainerBody::GeoJson(json) => json,
        };
        println!("\n{}", "Body".bright_green().bold());
        println!("{}", serde_json::to_string_pretty(&body)?);
        Ok(())
    }

    fn run_resolve(queries: &[String], config: &RuConfig) -> Result<()> {
        let table = Arc::new(VariableTable::load(config.variables_path.as_deref())?);
        let resolver = VariableResolver::new(table).with_threshold(config.fuzzy_threshold);
        debug!("Resolving with threshold {}", resolver.threshold());

        let mut failures = 0;
        for query in queries {
            match resolver.resolve(query) {
                Ok(code) => {
                    let names = resolver
                        .table()
                        .get(&code)
                        .map(|meta| format!("{} / {}", meta.en_name, meta.jp_name))
                        .unwrap_or_default();
                    println!(
                        "  {} -> {} {}",
                        query,
                        code.bright_white().bold(),
                        names.bright_black()
                    );
                }
                Err(e) => {
                    failures += 1;
                    println!("  {} -> {}", query, e.to_string().bright_red());
                }
            }
        }

        if failures > 0 {
            anyhow::bail!("{} of {} queries did not resolve", failures, queries.len());
        }
        Ok(())
    }

    fn run_locate(args: &LocateArgs) -> Result<()> {
        let registry = StationRegistry::from_path(&args.stations)
            .with_context(|| format!("Failed to load {}", args.stations.display()))?;
        let root = args
            .location_root
            .clone()
            .or_else(|| args.stations.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let locator = StationLocator::new(
            Arc::new(registry),
            Arc::new(LocalByteProvider::new(root)),
        );
        let location = locator.locate(&args.station_id)?;

        println!(
            "{} {}",
            "Station".bright_green().bold(),
            location.station_id.bright_white().bold()
        );
        println!("  {} {}", "lat:".bright_cyan(), location.lat);
        println!("  {} {}", "lon:".bright_cyan(), location.lon);
        if let Some(alt) = location.alt {
            println!("  {} {}", "alt:".bright_cyan(), alt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_arguments() {
        let args = Args::try_parse_from([
            "ru_processor",
            "decode",
            "archive/",
            "--start",
            "2025-04-17 15:00:00",
            "--variables",
            "AIRTMP,気温",
            "--station-id",
            "441000205",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.log_level(), "debug");
        let Command::Decode(decode) = &args.command else {
            panic!("Expected decode command");
        };
        assert_eq!(decode.variables, vec!["AIRTMP", "気温"]);
        assert_eq!(decode.start.map(|t| t.timestamp()), Some(1_744_902_000));

        let config = decode.apply(args.base_config());
        assert_eq!(config.station_id.as_deref(), Some("441000205"));
        assert_eq!(config.fuzzy_threshold, 90);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Args::try_parse_from(["ru_processor", "decode", "x", "--start", "soon"]).is_err());
        assert!(
            Args::try_parse_from(["ru_processor", "resolve", "a", "--fuzzy-threshold", "101"])
                .is_err()
        );
        assert!(Args::try_parse_from(["ru_processor", "resolve"]).is_err());
        assert!(Args::try_parse_from(["ru_processor", "-v", "-q", "resolve", "a"]).is_err());
    }
}
