//! JSON report envelope.

use crate::error::{Error, Result};
use crate::output::SessionReport;
use std::path::Path;

/// Write the full session report as a JSON envelope.
pub fn write_json_report(report: &SessionReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| Error::ReportSerialize { source: e })?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pipeline::{ProcessingSession, SessionId, SessionStatus};
    use crate::store::BlobRef;

    #[test]
    fn test_json_envelope_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut session =
            ProcessingSession::new(SessionId::new("lot-2"), BlobRef::new("mem:lot-2/original/0"));
        session.status = SessionStatus::Warning;
        let report = SessionReport {
            session,
            regions: Vec::new(),
        };

        write_json_report(&report, &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["session"]["status"], "warning");
        assert!(value["regions"].as_array().unwrap().is_empty());
    }
}
