//! Report writer trait definition.

use crate::error::Result;
use crate::output::{RegionReport, SessionReport};

/// Trait for writing session reports.
pub trait ReportWriter {
    /// Write the file header (if applicable).
    fn write_header(&mut self) -> Result<()>;

    /// Write a single region row.
    fn write_region(&mut self, report: &SessionReport, region: &RegionReport) -> Result<()>;

    /// Finalize the output (flush, close, etc.).
    fn finalize(&mut self) -> Result<()>;
}
