//! Vigil Common - Shared utilities: logging and configuration
//!
//! This crate provides common functionality used across the Vigil crates.

pub mod config;
pub mod logging;

pub use config::{AuditConfig, Config, ConfigBuilder, LoggingConfig};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogFormat};
