//! Canopy - plant population counting from nursery container photos.
//!
//! This crate turns a field photograph into per-region plant counts: a
//! segmentation model proposes container regions, a detection model runs
//! over overlapping tiles of each region, merged detections are
//! extrapolated to a population estimate, and a GPS point is resolved
//! against a nested polygon hierarchy.

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod constants;
pub mod detect;
pub mod error;
pub mod estimate;
pub mod imaging;
pub mod inference;
pub mod output;
pub mod pipeline;
pub mod segment;
pub mod spatial;
pub mod store;

use clap::Parser;
use cli::{Cli, Command, ConfigAction, CountArgs, ModelsAction};
use config::{
    Config, InferenceDevice, config_file_path, load_default_config, save_default_config,
    validate_config, validate_model_config,
};
use inference::OnnxModelLoader;
use output::{SessionReport, write_reports};
use pipeline::{CancelFlag, Orchestrator, SessionId, SessionRequest};
use spatial::{GpsPoint, SpatialHierarchy, resolve};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::{BlobRole, BlobStore, InMemoryBlobStore, InMemoryRecordStore, RecordStore};
use tracing::{info, warn};

pub use error::{Error, Result};

/// Main entry point for the canopy CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.count.verbose, cli.count.quiet);

    // Load configuration
    let config = load_default_config()?;

    // Handle subcommands
    if let Some(command) = cli.command {
        return handle_command(command, &config);
    }

    // Default: process a photo
    let Some(image) = cli.image else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    count_image(&image, &cli.count, config)
}

/// Process a single photo end to end and write session reports.
fn count_image(input: &Path, args: &CountArgs, mut config: Config) -> Result<()> {
    use std::time::Instant;

    let start = Instant::now();

    // Apply CLI overrides, then validate the effective configuration.
    if let Some(value) = args.min_confidence {
        config.defaults.min_confidence = value;
    }
    if let Some(value) = args.tile_size {
        config.tiling.tile_size = value;
    }
    if let Some(value) = args.overlap {
        config.tiling.overlap = value;
    }
    if let Some(method) = args.method {
        config.estimation.method = method;
    }
    if let Some(ref formats) = args.format {
        config.defaults.formats = formats.clone();
    }
    if args.gpu {
        config.inference.device = InferenceDevice::Gpu;
    } else if args.cpu {
        config.inference.device = InferenceDevice::Cpu;
    }
    validate_config(&config)?;

    let session_id = SessionId::new(args.session_id.clone().unwrap_or_else(|| {
        input.file_stem().map_or_else(
            || "session".to_string(),
            |stem| stem.to_string_lossy().into_owned(),
        )
    }));

    // Ctrl+C requests cooperative cancellation: dispatched children run
    // to completion and the callback discards their results.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            cancel.request();
        }) {
            warn!("Failed to install Ctrl+C handler: {e}");
        }
    }

    let hierarchy = match args.hierarchy.as_ref() {
        Some(path) => {
            info!("Loading spatial hierarchy: {}", path.display());
            Some(Arc::new(SpatialHierarchy::from_json_file(path)?))
        }
        None => None,
    };

    let gps = match (args.lon, args.lat) {
        (Some(longitude), Some(latitude)) => Some(GpsPoint {
            longitude,
            latitude,
        }),
        _ => None,
    };

    info!("Processing: {}", input.display());
    let bytes = std::fs::read(input)?;

    let blob = Arc::new(InMemoryBlobStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let loader = Arc::new(OnnxModelLoader::new(
        config.models.clone(),
        config.inference.device,
    ));

    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::Internal {
        message: format!("failed to create async runtime: {e}"),
    })?;

    let progress = progress_spinner(!args.quiet && !args.no_progress);

    let formats = config.defaults.formats.clone();
    let mut orchestrator =
        Orchestrator::new(config, Arc::clone(&blob), Arc::clone(&records), loader);
    if let Some(hierarchy) = hierarchy {
        orchestrator = orchestrator.with_hierarchy(hierarchy);
    }

    let (session, estimations) = runtime.block_on(async {
        let image_ref = blob.put(&session_id, BlobRole::Original, bytes).await?;
        let session = orchestrator
            .process_session(SessionRequest {
                session_id: session_id.clone(),
                image: image_ref,
                gps,
                cancel,
            })
            .await?;
        let estimations = records.estimations_for_session(&session.id).await?;
        Ok::<_, Error>((session, estimations))
    })?;

    if let Some(progress) = &progress {
        progress.finish_and_clear();
    }

    let output_dir = args.output_dir.clone().unwrap_or_else(|| {
        input
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    });
    let report = SessionReport::build(session, &estimations);
    let written = write_reports(&report, &formats, &output_dir)?;
    for path in &written {
        info!("Wrote report: {}", path.display());
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Session {}: {} ({} region(s), {} detected, {} estimated) in {elapsed:.2}s",
        report.session.id,
        report.session.status,
        report.session.totals.regions,
        report.session.totals.detected,
        report.session.totals.estimated,
    );
    for reason in &report.session.reasons {
        warn!(kind = ?reason.kind, region = ?reason.region_id, "{}", reason.message);
    }

    Ok(())
}

/// Progress spinner for the CLI path.
fn progress_spinner(enabled: bool) -> Option<indicatif::ProgressBar> {
    if !enabled {
        return None;
    }
    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_message("Processing session...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(spinner)
}

fn init_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    // ORT logging is suppressed by default; -v raises it together with
    // our own level.
    let filter_str = if quiet {
        "warn,ort=off".to_string()
    } else {
        match verbose {
            0 => "info,ort=off".to_string(),
            1 => "debug,ort=warn".to_string(),
            2 => "trace,ort=info".to_string(),
            _ => "trace".to_string(),
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    fmt().with_env_filter(filter).init();
}

fn handle_command(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Config { action } => handle_config_command(action),
        Command::Models { action } => handle_models_command(action, config),
        Command::Resolve {
            lon,
            lat,
            hierarchy,
        } => handle_resolve_command(lon, lat, &hierarchy),
    }
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config_file_path()?;
            if path.exists() {
                println!("Configuration file already exists: {}", path.display());
            } else {
                let config = Config::default();
                let saved_path = save_default_config(&config)?;
                println!("Created configuration file: {}", saved_path.display());
                println!("\nNext steps: set [models.segmentation] and [models.detection] paths.");
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_default_config()?;
            println!("{config:#?}");
            Ok(())
        }
        ConfigAction::Path => {
            let path = config_file_path()?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn handle_models_command(action: ModelsAction, config: &Config) -> Result<()> {
    match action {
        ModelsAction::Check => {
            let mut checked = 0;
            if let Some(ref model) = config.models.segmentation {
                validate_model_config(model)?;
                println!("  segmentation: OK ({})", model.path.display());
                checked += 1;
            }
            if let Some(ref model) = config.models.detection {
                validate_model_config(model)?;
                println!("  detection: OK ({})", model.path.display());
                checked += 1;
            }
            if checked == 0 {
                println!("No models configured.");
            }
            Ok(())
        }
    }
}

fn handle_resolve_command(lon: f64, lat: f64, hierarchy_path: &Path) -> Result<()> {
    let hierarchy = SpatialHierarchy::from_json_file(hierarchy_path)?;
    let point = GpsPoint {
        longitude: lon,
        latitude: lat,
    };

    match resolve(&hierarchy, &point)? {
        Some(node) => {
            println!("{} ({})", node.id, node.level);
            if let Some(ref parent) = node.parent {
                println!("  parent: {parent}");
            }
        }
        None => println!("no location resolved for {point}"),
    }
    Ok(())
}
