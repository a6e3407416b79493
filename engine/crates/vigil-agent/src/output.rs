//! Human-readable report sinks

use std::io::Write;
use vigil_audit::{ReportSink, RunReport, RunSummary};
use vigil_core::{ControlResult, ControlStatus, OutcomeStatus, Result};

/// Which controls a sink prints
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultFilter {
    pub failures_only: bool,
}

impl ResultFilter {
    pub fn keep(&self, result: &ControlResult) -> bool {
        !self.failures_only || result.is_failing()
    }

    /// Copy of the report holding only the kept controls; the summary is untouched
    pub fn apply(&self, report: &RunReport) -> RunReport {
        let mut filtered = report.clone();
        filtered.controls.retain(|r| self.keep(r));
        filtered
    }
}

/// Detailed per-control listing
pub struct TextSink<W: Write> {
    out: W,
    filter: ResultFilter,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W, filter: ResultFilter) -> Self {
        Self { out, filter }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for TextSink<W> {
    fn emit(&mut self, report: &RunReport) -> Result<()> {
        let filter = self.filter;
        let out = &mut self.out;
        writeln!(out, "\n=== Compliance Audit: {} ===", report.profile)?;
        writeln!(
            out,
            "Host: {} ({})\n",
            report.hostname.as_deref().unwrap_or("unknown"),
            report.os.family
        )?;

        for r in report.controls.iter().filter(|r| filter.keep(r)) {
            writeln!(out, "[{}] {} - {}", r.status, r.control_id, r.title)?;
            if !r.applicable {
                continue;
            }
            writeln!(out, "    Severity: {} (impact {})", r.severity, r.impact)?;

            for o in &r.outcomes {
                let icon = match o.status {
                    OutcomeStatus::Pass => "✓",
                    OutcomeStatus::Fail => "✗",
                    OutcomeStatus::Error => "!",
                };
                writeln!(out, "    {} {}", icon, o.expectation)?;
                if o.status != OutcomeStatus::Pass {
                    writeln!(out, "        {}", o.message)?;
                }
            }
            if r.status == ControlStatus::Cancelled {
                writeln!(out, "    (cancelled after {} expectations)", r.outcomes.len())?;
            }
            writeln!(out)?;
        }

        write_summary(out, &report.summary)
    }
}

/// One line per control
pub struct TableSink<W: Write> {
    out: W,
    filter: ResultFilter,
    color: bool,
}

impl<W: Write> TableSink<W> {
    pub fn new(out: W, filter: ResultFilter) -> Self {
        Self {
            out,
            filter,
            color: true,
        }
    }

    pub fn without_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn status_color(&self, status: ControlStatus) -> (&'static str, &'static str) {
        if !self.color {
            return ("", "");
        }
        let code = match status {
            ControlStatus::Pass => "\x1b[32m",
            ControlStatus::Fail | ControlStatus::Error => "\x1b[31m",
            ControlStatus::Skipped | ControlStatus::Cancelled => "\x1b[33m",
        };
        (code, "\x1b[0m")
    }
}

impl<W: Write> ReportSink for TableSink<W> {
    fn emit(&mut self, report: &RunReport) -> Result<()> {
        writeln!(
            self.out,
            "\n{:<22} {:<48} {:<10} {:<10}",
            "CONTROL", "TITLE", "STATUS", "SEVERITY"
        )?;
        writeln!(self.out, "{}", "-".repeat(92))?;

        let filter = self.filter;
        for r in report.controls.iter().filter(|r| filter.keep(r)) {
            let (start, end) = self.status_color(r.status);
            writeln!(
                self.out,
                "{:<22} {:<48} {}{:<10}{} {:<10}",
                r.control_id,
                truncate(&r.title, 46),
                start,
                r.status.as_str(),
                end,
                r.severity.as_str()
            )?;
        }

        writeln!(self.out, "\n{}", "-".repeat(92))?;
        write_summary(&mut self.out, &report.summary)
    }
}

fn write_summary(out: &mut impl Write, summary: &RunSummary) -> Result<()> {
    writeln!(out, "Summary:")?;
    writeln!(out, "  Total:     {}", summary.total)?;
    writeln!(out, "  Passed:    {} ({:.1}%)", summary.passed, summary.pass_rate)?;
    writeln!(out, "  Failed:    {}", summary.failed)?;
    writeln!(out, "  Errors:    {}", summary.errors)?;
    writeln!(out, "  Skipped:   {}", summary.skipped)?;
    if summary.cancelled > 0 {
        writeln!(out, "  Cancelled: {}", summary.cancelled)?;
    }
    writeln!(out, "  Score:     {:.1} / {:.1}", summary.score, summary.max_score)?;

    if !summary.failures_by_severity.is_empty() {
        writeln!(out, "\nFailures by severity:")?;
        for (severity, count) in summary.failures_by_severity.iter().rev() {
            writeln!(out, "  {:<9} {}", severity.as_str(), count)?;
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
