//! Error types for harness-level failures.
//!
//! Test-case failures never surface here; they are recorded as messages on a
//! [`TestResult`](crate::result::TestResult). These errors end the run.

use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Failed to read the file.
    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse YAML.
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Failed to parse TOML.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    /// Unsupported file extension.
    #[error("unsupported config format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
    /// No config file in the project directory.
    #[error("no resolvecheck.yaml or resolvecheck.toml found in {0}")]
    NotFound(std::path::PathBuf),
    /// The config declares a format version this build does not read.
    #[error("unsupported config version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    /// Cleaning `output_dir` would delete project files.
    #[error("refusing to use output_dir {path}: {reason}")]
    UnsafeOutputDir {
        path: std::path::PathBuf,
        reason: &'static str,
    },
    /// An `ignore` pattern is not a valid regex.
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Faults in infrastructure shared by every test case.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The environment never signalled that it was ready.
    #[error("environment did not become ready: {0}")]
    EnvironmentNotReady(String),
    /// The suite configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] LoadError),
}
