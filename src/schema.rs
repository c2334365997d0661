//! Schema definitions for the resolvecheck suite configuration.
//!
//! The configuration describes the project under test: where the resolver
//! writes its output, where the expected reference trees live, how to invoke
//! the resolver, and which build options the host supports.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Suite configuration loaded from `resolvecheck.yaml` in the project directory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HarnessConfig {
    /// Config format version. Only [`CONFIG_VERSION`] is accepted.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory the resolver writes resolved artifacts into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Root of the expected reference trees, one subdirectory per scenario.
    #[serde(default = "default_expected_dir")]
    pub expected_dir: PathBuf,

    /// YAML file holding the host build settings.
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,

    /// YAML file holding the declared dependencies.
    #[serde(default = "default_dependencies_file")]
    pub dependencies_file: PathBuf,

    /// Build systems available in this host.
    #[serde(default = "default_build_systems")]
    pub build_systems: Vec<BuildSystem>,

    /// Settings the host accepts writes for but never changes.
    #[serde(default)]
    pub locked_settings: Vec<String>,

    /// Dependencies declared before every resolution.
    #[serde(default = "default_dependencies")]
    pub dependencies: Vec<Dependency>,

    /// Remove the output directory before each resolution (default: true).
    #[serde(default = "default_true")]
    pub clean_output: bool,

    /// How to invoke the resolver.
    pub resolver: ResolverCommand,

    /// Steps that prepare the environment before the suite starts.
    #[serde(default)]
    pub setup: Vec<SetupStep>,

    /// Artifact comparison policy.
    #[serde(default)]
    pub compare: CompareConfig,
}

/// The only config format version this build reads.
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("Assets/Plugins/Android")
}

fn default_expected_dir() -> PathBuf {
    PathBuf::from("ExpectedArtifacts")
}

fn default_settings_file() -> PathBuf {
    PathBuf::from("ProjectSettings/BuildSettings.yaml")
}

fn default_dependencies_file() -> PathBuf {
    PathBuf::from("ProjectSettings/Dependencies.yaml")
}

fn default_build_systems() -> Vec<BuildSystem> {
    vec![BuildSystem::Gradle, BuildSystem::Internal]
}

fn default_dependencies() -> Vec<Dependency> {
    vec![
        Dependency::new("com.android.support", "support-annotations", "26.1.0"),
        Dependency::new("com.google.firebase", "firebase-common", "16.0.0"),
    ]
}

/// Android build system selected in the host build settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    /// The host's legacy in-process build pipeline.
    Internal,
    /// Gradle-based build.
    Gradle,
}

impl BuildSystem {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildSystem::Internal => "internal",
            BuildSystem::Gradle => "gradle",
        }
    }
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Maven-style dependency coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Dependency {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl Dependency {
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    /// Returns true if both coordinates name the same artifact, ignoring version.
    pub fn same_artifact(&self, other: &Dependency) -> bool {
        self.group == other.group && self.artifact == other.artifact
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

/// External command that performs dependency resolution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResolverCommand {
    /// The command/binary to execute.
    pub cmd: String,

    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the resolver.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Kill the resolver after this many seconds. Waits forever when unset.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Artifact comparison policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompareConfig {
    /// File extensions treated as zip-format archives.
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,

    /// Regex patterns for host sidecar files excluded from comparison.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            archive_extensions: default_archive_extensions(),
            ignore: default_ignore(),
        }
    }
}

fn default_archive_extensions() -> Vec<String> {
    ["aar", "jar", "srcaar", "zip"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_ignore() -> Vec<String> {
    vec![r"\.meta$".to_string()]
}

/// An environment preparation step.
///
/// Each step is a single-key map where the key determines the action.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct SetupStep {
    /// Write a file with the given contents.
    #[serde(default)]
    pub write_file: Option<WriteFile>,

    /// Create a directory.
    #[serde(default)]
    pub create_dir: Option<PathBuf>,

    /// Copy a file from source to destination.
    #[serde(default)]
    pub copy_file: Option<CopyPaths>,

    /// Copy a directory recursively from source to destination.
    #[serde(default)]
    pub copy_dir: Option<CopyPaths>,

    /// Run an arbitrary command.
    #[serde(default)]
    pub run: Option<RunStep>,
}

/// Write a file with specific contents.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WriteFile {
    /// Path to the file (relative to the project).
    pub path: PathBuf,

    /// File contents.
    pub contents: String,
}

/// Source and destination of a copy step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CopyPaths {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// A command run during setup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunStep {
    /// The command/binary to execute.
    pub cmd: String,

    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Generate the JSON Schema for the suite configuration.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(HarnessConfig)
}
