//! CLI argument definitions.

use crate::cli::validators;
use crate::config::{EstimationMethod, OutputFormat};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Plant population counting from nursery container photos.
#[derive(Debug, Parser)]
#[command(name = "canopy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Input photo to process.
    pub image: Option<PathBuf>,

    /// Common options for counting.
    #[command(flatten)]
    pub count: CountArgs,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage configuration.
    Config {
        /// Configuration action to perform.
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage models.
    Models {
        /// Models action to perform.
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Resolve a GPS point against a spatial hierarchy snapshot.
    Resolve {
        /// Longitude in degrees (west negative).
        #[arg(long, allow_hyphen_values = true, value_parser = validators::parse_longitude)]
        lon: f64,
        /// Latitude in degrees (south negative).
        #[arg(long, allow_hyphen_values = true, value_parser = validators::parse_latitude)]
        lat: f64,
        /// Path to the hierarchy snapshot (JSON).
        #[arg(long)]
        hierarchy: PathBuf,
    },
}

/// Config subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Create default configuration file.
    Init,
    /// Display current configuration.
    Show,
    /// Print configuration file path.
    Path,
}

/// Models subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ModelsAction {
    /// Verify configured model files exist and are valid.
    Check,
}

/// Arguments for the count command.
#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct CountArgs {
    /// Session identifier (default: derived from the file name).
    #[arg(long, env = "CANOPY_SESSION_ID")]
    pub session_id: Option<String>,

    /// Longitude of the photo in degrees (west negative).
    #[arg(long, allow_hyphen_values = true, requires = "lat", value_parser = validators::parse_longitude)]
    pub lon: Option<f64>,

    /// Latitude of the photo in degrees (south negative).
    #[arg(long, allow_hyphen_values = true, requires = "lon", value_parser = validators::parse_latitude)]
    pub lat: Option<f64>,

    /// Path to a spatial hierarchy snapshot (JSON).
    #[arg(long, env = "CANOPY_HIERARCHY")]
    pub hierarchy: Option<PathBuf>,

    /// Report formats (comma-separated: csv,json).
    #[arg(short, long, value_delimiter = ',', env = "CANOPY_FORMAT")]
    pub format: Option<Vec<OutputFormat>>,

    /// Output directory (default: same as input).
    #[arg(short, long, env = "CANOPY_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Minimum detection confidence threshold.
    #[arg(long, value_parser = validators::parse_confidence)]
    pub min_confidence: Option<f32>,

    /// Tile edge length in pixels.
    #[arg(long)]
    pub tile_size: Option<u32>,

    /// Tile overlap fraction.
    #[arg(long, value_parser = validators::parse_overlap)]
    pub overlap: Option<f32>,

    /// Estimation method (band or density).
    #[arg(long)]
    pub method: Option<EstimationMethod>,

    /// Force GPU inference.
    #[arg(long)]
    pub gpu: bool,

    /// Force CPU inference.
    #[arg(long, conflicts_with = "gpu")]
    pub cpu: bool,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-warning output.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable the progress spinner.
    #[arg(long)]
    pub no_progress: bool,
}
