//! JSON report generation.
//!
//! [`JsonGenerator`] serializes a [`LessonReport`] either compact, for other
//! programs, or pretty-printed, for people.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{LessonReport, ReportError, Result};

/// JSON report generator.
///
/// # Example
///
/// ```rust
/// use synapse_report::json::JsonGenerator;
/// # use synapse_report::{LessonReport, ReportInput, ReportStatus};
/// # let input = ReportInput {
/// #     topic: "Tides".to_string(),
/// #     difficulty: "beginner".to_string(),
/// #     status: ReportStatus::InProgress,
/// #     completed_cycles: 0,
/// #     completed_at: None,
/// #     generated_at: chrono::Utc::now(),
/// #     nodes: vec![],
/// #     attempts: vec![],
/// # };
/// let report = LessonReport::build(&input).unwrap();
/// let json = JsonGenerator::new(&report).generate_pretty().unwrap();
/// assert!(json.contains("\"topic\": \"Tides\""));
/// ```
#[derive(Debug)]
pub struct JsonGenerator<'a> {
    report: &'a LessonReport,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a generator for the given report.
    #[must_use]
    pub const fn new(report: &'a LessonReport) -> Self {
        Self { report }
    }

    /// Compact, single-line JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(ReportError::from)
    }

    /// Pretty-printed JSON with two-space indentation.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(ReportError::from)
    }

    /// Writes the report to `path`, replacing any existing file. Parent
    /// directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::sample_input;

    fn sample_report() -> LessonReport {
        LessonReport::build(&sample_input()).unwrap()
    }

    #[test]
    fn test_generate_is_single_line() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate().unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains("\"status\":\"completed\""));
    }

    #[test]
    fn test_generate_pretty_is_indented() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate_pretty().unwrap();
        assert!(json.contains('\n'));
        assert!(json.contains("  \"topic\": \"Plate Tectonics\""));
    }

    #[test]
    fn test_output_parses_back() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate().unwrap();
        let parsed: LessonReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.weak_nodes.len(), report.weak_nodes.len());
        assert_eq!(parsed.summary.total_attempts, 4);
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!(
            "synapse_report_{}.json",
            std::process::id()
        ));
        let report = sample_report();

        JsonGenerator::new(&report).write_to_file(&path, true).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(written.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["summary"]["total_nodes"], 3);
    }

    #[test]
    fn test_write_to_missing_directory_is_io_error() {
        let path = std::env::temp_dir()
            .join("synapse_report_missing_dir")
            .join("nested")
            .join("report.json");
        let report = sample_report();

        let result = JsonGenerator::new(&report).write_to_file(&path, false);
        assert!(matches!(result, Err(ReportError::Io(_))));
    }
}
