//! Profile loader - loads profile definitions from YAML files

use crate::ControlRegistry;
use std::path::Path;
use tracing::{debug, info};
use vigil_core::{Error, Profile, Result};

/// Parse a profile from a YAML string
pub fn parse_profile(yaml: &str) -> Result<Profile> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Load and validate a single profile file
pub fn load_profile_from_file(path: impl AsRef<Path>) -> Result<ControlRegistry> {
    let path = path.as_ref();
    let profile = read_profile(path)?;
    let registry = ControlRegistry::from_profile(profile).map_err(|e| in_file(path, e))?;

    info!(
        "Loaded profile {} from {} ({} controls, {} inputs)",
        registry.name(),
        path.display(),
        registry.len(),
        registry.inputs().len()
    );
    Ok(registry)
}

/// Load every YAML profile under a directory into one registry.
///
/// Files are merged in path order; any invalid file aborts the load, since a
/// partially loaded profile would silently drop controls.
pub fn load_profiles_from_dir(dir: impl AsRef<Path>) -> Result<ControlRegistry> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Err(Error::FileNotFound {
            path: dir.display().to_string(),
        });
    }

    info!("Loading profiles from: {}", dir.display());
    let mut paths = Vec::new();
    collect_yaml(dir, &mut paths)?;
    paths.sort();

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string());
    let mut registry = ControlRegistry::new(name);

    for path in &paths {
        let profile = read_profile(path)?;
        debug!(
            "Merging profile {} from {} ({} controls)",
            profile.name,
            path.display(),
            profile.controls.len()
        );
        registry.extend(profile).map_err(|e| in_file(path, e))?;
    }

    info!("Loaded {} controls", registry.len());
    Ok(registry)
}

fn collect_yaml(dir: &Path, paths: &mut Vec<std::path::PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            collect_yaml(&path, paths)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                paths.push(path);
            }
        }
    }
    Ok(())
}

fn read_profile(path: &Path) -> Result<Profile> {
    let content = std::fs::read_to_string(path)?;

    parse_profile(&content).map_err(|e| Error::InvalidProfile {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Attach the file name to configuration errors that don't carry one
fn in_file(path: &Path, err: Error) -> Error {
    Error::InvalidProfile {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
