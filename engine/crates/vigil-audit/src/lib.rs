//! Vigil Audit - Control evaluation runtime
//!
//! This crate provides:
//! - `SystemSnapshot`: the provider interface over files, processes and platform
//! - `MemorySnapshot` for captured snapshots, `LocalSnapshot` for the live host
//! - The OS classifier, input resolver, probe layer and matcher engine
//! - `Auditor`: bounded-concurrency evaluation with cancellation
//! - `RunReport` aggregation and report sinks

pub mod auditor;
pub mod cancel;
pub mod classifier;
pub mod inputs;
#[cfg(unix)]
pub mod local;
pub mod matcher;
pub mod probe;
pub mod report;
pub mod snapshot;

pub use auditor::{AuditOptions, Auditor};
pub use cancel::CancelToken;
pub use classifier::classify;
#[cfg(unix)]
pub use local::LocalSnapshot;
pub use report::{JsonSink, ReportSink, RunReport, RunSummary};
pub use snapshot::{FileKind, FileStat, MemoryFile, MemorySnapshot, ProcessEntry, SystemSnapshot};
