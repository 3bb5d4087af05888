//! CSV report writer.

use crate::error::{Error, Result};
use crate::output::{RegionReport, ReportWriter, SessionReport};
use std::path::{Path, PathBuf};

/// Writes one row per estimated region.
pub struct CsvReportWriter {
    path: PathBuf,
    writer: csv::Writer<std::fs::File>,
}

impl CsvReportWriter {
    /// Create a writer targeting the given path.
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: csv::Writer::from_writer(file),
        })
    }

    fn report_err(&self, e: csv::Error) -> Error {
        Error::ReportWrite {
            path: self.path.clone(),
            source: Box::new(e),
        }
    }
}

impl ReportWriter for CsvReportWriter {
    fn write_header(&mut self) -> Result<()> {
        self.writer
            .write_record([
                "session_id",
                "status",
                "location",
                "region_id",
                "method",
                "detected",
                "estimated",
                "low",
                "high",
            ])
            .map_err(|e| self.report_err(e))
    }

    fn write_region(&mut self, report: &SessionReport, region: &RegionReport) -> Result<()> {
        let location = report
            .session
            .location
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        self.writer
            .write_record([
                report.session.id.to_string(),
                report.session.status.to_string(),
                location,
                region.region_id.clone(),
                region.method.to_string(),
                region.detected.to_string(),
                region.estimated.to_string(),
                region.low.to_string(),
                region.high.to_string(),
            ])
            .map_err(|e| self.report_err(e))
    }

    fn finalize(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
