//! Vigil Core - Foundation types and error handling
//!
//! This crate provides the data model shared by every Vigil crate:
//! - `Control`, `Expectation`, `Resource`, `Matcher`: declarative checks
//! - `Predicate`: control applicability over `OsFacts` and inputs
//! - `InputDecl`, `Value`, `InputSource`: defaulted, overridable inputs
//! - `Outcome`, `ControlResult`: evaluation results
//! - `Impact`, `Severity`, `Error`: weights and error taxonomy

pub mod control;
pub mod error;
pub mod inputs;
pub mod outcome;
pub mod platform;
pub mod severity;

// Re-export commonly used types at crate root
pub use control::{Control, Expectation, InputRef, Matcher, Mode, PatternSource, Predicate, Profile, Resource};
pub use error::{Error, ErrorKind, MatcherError, ProbeError, Result};
pub use inputs::{InputDecl, InputSource, NoOverrides, ResolvedInputs, Value};
pub use outcome::{ControlResult, ControlStatus, Outcome, OutcomeStatus};
pub use platform::{OsFacts, OsFamily, PlatformSignals, VirtualizationRole};
pub use severity::{Impact, Severity};
