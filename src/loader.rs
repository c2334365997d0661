//! Suite configuration loader.
//!
//! Finds and parses `resolvecheck.yaml` (or `.toml`) for a project directory.

use crate::compare::ComparePolicy;
use crate::error::LoadError;
use crate::host::normalize_path;
use crate::schema::{CONFIG_VERSION, HarnessConfig};
use std::path::{Path, PathBuf};

/// Config file names probed in a project directory, in order.
pub const CONFIG_FILENAMES: [&str; 3] = [
    "resolvecheck.yaml",
    "resolvecheck.yml",
    "resolvecheck.toml",
];

/// Load a suite configuration from a file path.
pub fn load_config(path: &Path) -> Result<HarnessConfig, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: HarnessConfig = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents)?,
        "toml" => toml::from_str(&contents)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    validate(&config)?;
    Ok(config)
}

/// Locate the config file in a project directory.
pub fn find_config(project_dir: &Path) -> Result<PathBuf, LoadError> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| project_dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| LoadError::NotFound(project_dir.to_path_buf()))
}

fn validate(config: &HarnessConfig) -> Result<(), LoadError> {
    if config.version != CONFIG_VERSION {
        return Err(LoadError::UnsupportedVersion {
            found: config.version,
            expected: CONFIG_VERSION,
        });
    }
    // Containment in other project paths is checked once the project dir is known.
    if config.output_dir.is_relative() && normalize_path(&config.output_dir).as_os_str().is_empty()
    {
        return Err(LoadError::UnsafeOutputDir {
            path: config.output_dir.clone(),
            reason: "it is the project directory",
        });
    }
    ComparePolicy::from_config(&config.compare).map(drop)
}
