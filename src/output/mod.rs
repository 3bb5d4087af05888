//! Session report writers.

mod csv;
mod json;
mod types;
mod writer;

pub use csv::CsvReportWriter;
pub use json::write_json_report;
pub use types::{RegionReport, SessionReport};
pub use writer::ReportWriter;

use crate::config::OutputFormat;
use crate::constants::output_extensions;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Output path for a session report in the given format.
pub fn report_path_for(output_dir: &Path, session_id: &str, format: OutputFormat) -> PathBuf {
    let extension = match format {
        OutputFormat::Csv => output_extensions::CSV,
        OutputFormat::Json => output_extensions::JSON,
    };
    output_dir.join(format!("{session_id}{extension}"))
}

/// Write a session report in every requested format.
pub fn write_reports(
    report: &SessionReport,
    formats: &[OutputFormat],
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)?;

    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let path = report_path_for(output_dir, report.session.id.as_str(), *format);
        debug!(format = %format, path = %path.display(), "Writing report");

        match format {
            OutputFormat::Json => write_json_report(report, &path)?,
            OutputFormat::Csv => {
                let mut writer = CsvReportWriter::new(&path)?;
                writer.write_header()?;
                for region in &report.regions {
                    writer.write_region(report, region)?;
                }
                writer.finalize()?;
            }
        }
        written.push(path);
    }
    Ok(written)
}
