//! Result aggregation and report sinks

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use vigil_core::{ControlResult, ControlStatus, Error, Impact, OsFacts, Result, Severity};

/// Summary of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Controls in the report
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Total impact of failed and errored controls
    pub score: f64,
    /// Total impact of every applicable control
    pub max_score: f64,
    /// Passed controls as a percentage of completed controls
    pub pass_rate: f64,
    /// Failed and errored controls by severity
    pub failures_by_severity: BTreeMap<Severity, usize>,
}

impl RunSummary {
    /// Summarize results; the outcome does not depend on their order
    pub fn from_results(results: &[ControlResult]) -> Self {
        let mut summary = RunSummary {
            total: results.len(),
            ..Default::default()
        };
        let mut score_millis = 0u64;
        let mut max_millis = 0u64;

        for result in results {
            match result.status {
                ControlStatus::Pass => summary.passed += 1,
                ControlStatus::Fail => summary.failed += 1,
                ControlStatus::Error => summary.errors += 1,
                ControlStatus::Skipped => summary.skipped += 1,
                ControlStatus::Cancelled => summary.cancelled += 1,
            }
            if result.applicable {
                max_millis += u64::from(result.impact.millis());
            }
            if result.is_failing() {
                score_millis += u64::from(result.impact.millis());
                *summary.failures_by_severity.entry(result.severity).or_insert(0) += 1;
            }
        }

        summary.score = Impact::score_from_millis(score_millis);
        summary.max_score = Impact::score_from_millis(max_millis);
        let completed = summary.passed + summary.failed + summary.errors;
        if completed > 0 {
            summary.pass_rate = (summary.passed as f64 / completed as f64) * 100.0;
        }
        summary
    }
}

/// Report of one run, in control registration order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub profile: String,
    pub hostname: Option<String>,
    pub os: OsFacts,
    /// The run was stopped before every control completed
    pub cancelled: bool,
    pub summary: RunSummary,
    pub controls: Vec<ControlResult>,
}

impl RunReport {
    /// Combine per-control results into a report
    pub fn aggregate(results: Vec<ControlResult>) -> Self {
        Self {
            cancelled: results.iter().any(|r| r.status == ControlStatus::Cancelled),
            summary: RunSummary::from_results(&results),
            controls: results,
            ..Default::default()
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_os(mut self, os: OsFacts) -> Self {
        self.os = os;
        self
    }

    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }

    /// Failed and errored controls
    pub fn failures(&self) -> impl Iterator<Item = &ControlResult> {
        self.controls.iter().filter(|r| r.is_failing())
    }

    /// Every control passed or was skipped
    pub fn is_compliant(&self) -> bool {
        !self.cancelled && self.summary.failed == 0 && self.summary.errors == 0
    }

    /// `Err(Cancelled)` if the run was stopped early
    pub fn ensure_complete(&self) -> Result<()> {
        if self.cancelled {
            return Err(Error::Cancelled {
                reason: format!(
                    "{} of {} controls did not complete",
                    self.summary.cancelled, self.summary.total
                ),
            });
        }
        Ok(())
    }
}

/// Destination for a finished report
pub trait ReportSink {
    fn emit(&mut self, report: &RunReport) -> Result<()>;
}

/// Writes the report as pretty-printed JSON
pub struct JsonSink<W: Write> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for JsonSink<W> {
    fn emit(&mut self, report: &RunReport) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.out, report)?;
        writeln!(self.out)?;
        Ok(())
    }
}
