//! Expectation outcomes and per-control results

use crate::control::Control;
use crate::severity::{Impact, Severity};
use serde::{Deserialize, Serialize};

/// Status of a single expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// The target system satisfied the matcher
    Pass,
    /// The matcher legitimately evaluated false
    Fail,
    /// The attribute could not be produced or matched
    Error,
}

/// Result of evaluating one expectation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Human-readable form of the expectation
    pub expectation: String,
    pub status: OutcomeStatus,
    pub message: String,
}

impl Outcome {
    pub fn pass(expectation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expectation: expectation.into(),
            status: OutcomeStatus::Pass,
            message: message.into(),
        }
    }

    pub fn fail(expectation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expectation: expectation.into(),
            status: OutcomeStatus::Fail,
            message: message.into(),
        }
    }

    pub fn error(expectation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expectation: expectation.into(),
            status: OutcomeStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == OutcomeStatus::Pass
    }
}

/// Overall status of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Pass,
    Fail,
    Error,
    /// The applicability predicate was false
    Skipped,
    /// The run was cancelled before the control completed
    Cancelled,
}

impl ControlStatus {
    /// Status of a fully evaluated control: any error wins, then any failure
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        if outcomes.iter().any(|o| o.status == OutcomeStatus::Error) {
            ControlStatus::Error
        } else if outcomes.iter().any(|o| o.status == OutcomeStatus::Fail) {
            ControlStatus::Fail
        } else {
            ControlStatus::Pass
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlStatus::Pass => "PASS",
            ControlStatus::Fail => "FAIL",
            ControlStatus::Error => "ERROR",
            ControlStatus::Skipped => "SKIP",
            ControlStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of evaluating one control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResult {
    pub control_id: String,
    pub title: String,
    pub impact: Impact,
    pub severity: Severity,
    pub applicable: bool,
    pub status: ControlStatus,
    /// Outcomes in expectation declaration order
    pub outcomes: Vec<Outcome>,
}

impl ControlResult {
    fn base(control: &Control, applicable: bool, status: ControlStatus, outcomes: Vec<Outcome>) -> Self {
        Self {
            control_id: control.id.clone(),
            title: control.title.clone(),
            impact: control.impact,
            severity: Severity::from_impact(control.impact),
            applicable,
            status,
            outcomes,
        }
    }

    /// The control did not apply to this system
    pub fn skipped(control: &Control) -> Self {
        Self::base(control, false, ControlStatus::Skipped, Vec::new())
    }

    /// The control ran every expectation
    pub fn evaluated(control: &Control, outcomes: Vec<Outcome>) -> Self {
        let status = ControlStatus::from_outcomes(&outcomes);
        Self::base(control, true, status, outcomes)
    }

    /// The run was cancelled mid-control; `outcomes` holds what completed before the stop
    pub fn cancelled(control: &Control, outcomes: Vec<Outcome>) -> Self {
        Self::base(control, true, ControlStatus::Cancelled, outcomes)
    }

    /// The run was cancelled before this control was scheduled, so its
    /// applicability was never decided
    pub fn unscheduled(control: &Control) -> Self {
        Self::base(control, false, ControlStatus::Cancelled, Vec::new())
    }

    /// The control's task died before producing a result
    pub fn aborted(control: &Control, message: impl Into<String>) -> Self {
        let outcome = Outcome::error(control.id.clone(), message);
        Self::base(control, true, ControlStatus::Error, vec![outcome])
    }

    /// Failed or errored: the target did not demonstrate compliance
    pub fn is_failing(&self) -> bool {
        matches!(self.status, ControlStatus::Fail | ControlStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> Control {
        Control::new("syslog-2.0", "syslogd should be running", Impact::new(0.7).unwrap())
    }

    #[test]
    fn test_status_precedence() {
        let outcomes = vec![
            Outcome::pass("a", "ok"),
            Outcome::fail("b", "nope"),
            Outcome::error("c", "unreadable"),
        ];
        assert_eq!(ControlStatus::from_outcomes(&outcomes), ControlStatus::Error);
        assert_eq!(ControlStatus::from_outcomes(&outcomes[..2]), ControlStatus::Fail);
        assert_eq!(ControlStatus::from_outcomes(&outcomes[..1]), ControlStatus::Pass);
        assert_eq!(ControlStatus::from_outcomes(&[]), ControlStatus::Pass);
    }

    #[test]
    fn test_skipped_has_no_outcomes() {
        let result = ControlResult::skipped(&control());
        assert_eq!(result.status, ControlStatus::Skipped);
        assert!(!result.applicable);
        assert!(result.outcomes.is_empty());
        assert!(!result.is_failing());
    }

    #[test]
    fn test_cancelled_applicability() {
        let started = ControlResult::cancelled(&control(), vec![Outcome::pass("a", "ok")]);
        assert!(started.applicable);
        assert_eq!(started.status, ControlStatus::Cancelled);

        let unscheduled = ControlResult::unscheduled(&control());
        assert!(!unscheduled.applicable);
        assert_eq!(unscheduled.status, ControlStatus::Cancelled);
        assert!(unscheduled.outcomes.is_empty());
        assert!(!unscheduled.is_failing());
    }

    #[test]
    fn test_severity_follows_impact() {
        let result = ControlResult::evaluated(&control(), vec![Outcome::fail("a", "b")]);
        assert_eq!(result.severity, Severity::High);
        assert!(result.is_failing());
    }
}
