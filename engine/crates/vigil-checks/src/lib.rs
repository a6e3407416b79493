//! Vigil Checks - Control registry, profile loader and built-in profiles
//!
//! This crate provides:
//! - `ControlRegistry`: validated index of a profile's controls and inputs
//! - YAML loader for declarative profile definitions
//! - The built-in syslog profile

pub mod loader;
pub mod registry;
pub mod syslog;

pub use loader::{load_profile_from_file, load_profiles_from_dir, parse_profile};
pub use registry::ControlRegistry;
pub use syslog::{syslog_profile, syslog_registry};
