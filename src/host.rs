//! Host environment collaborators.
//!
//! The harness never talks to the build system directly. It reads and writes
//! build settings, declares dependencies and triggers resolution through the
//! traits below. The file- and command-backed implementations let the binary
//! drive a real project directory.

use crate::error::LoadError;
use crate::schema::{BuildSystem, Dependency, HarnessConfig, ResolverCommand, SetupStep};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Setting selecting the Android build system.
pub const BUILD_SYSTEM: &str = "buildSystem";
/// Setting controlling whether the build exports a standalone project.
pub const EXPORT_PROJECT: &str = "exportAndroidProject";

/// A typed build setting value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Text(String),
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<BuildSystem> for SettingValue {
    fn from(value: BuildSystem) -> Self {
        SettingValue::Text(value.as_str().to_string())
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{b}"),
            SettingValue::Text(s) => f.write_str(s),
        }
    }
}

/// Read/write access to the host's build settings.
pub trait BuildSettings: Send + Sync {
    fn get(&self, name: &str) -> Option<SettingValue>;

    /// Request a change. `true` means the host accepted the request, not that
    /// the value changed; callers read the value back to confirm.
    fn set(&self, name: &str, value: SettingValue) -> bool;

    /// Whether the host can apply `value` to `name` at all.
    fn supports(&self, name: &str, value: &SettingValue) -> bool;
}

/// Registers dependencies for the resolver to pick up. Idempotent.
pub trait DependencyRegistry: Send + Sync {
    fn declare(&self, dependency: &Dependency) -> Result<()>;
}

/// Completion handler receiving whether resolution succeeded.
pub type ResolveCallback = Box<dyn FnOnce(bool) + Send>;

/// Runs dependency resolution asynchronously.
pub trait Resolver: Send + Sync {
    /// Start resolving. `on_complete` runs exactly once, after output is written.
    fn resolve(&self, on_complete: ResolveCallback);
}

/// Absolute locations of everything the harness touches in a project.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub project_dir: PathBuf,
    pub output_dir: PathBuf,
    pub expected_dir: PathBuf,
    pub settings_file: PathBuf,
    pub dependencies_file: PathBuf,
}

impl ProjectLayout {
    /// Resolve the configured paths against `project_dir`.
    ///
    /// Fails when cleaning `output_dir` would remove the project itself, the
    /// expected trees, or the files the host settings live in.
    pub fn new(project_dir: &Path, config: &HarnessConfig) -> Result<Self, LoadError> {
        let project_dir = std::path::absolute(project_dir)
            .map(|dir| normalize_path(&dir))
            .map_err(|source| LoadError::Io {
                path: project_dir.to_path_buf(),
                source,
            })?;
        let resolve = |path: &Path| normalize_path(&project_dir.join(path));
        let layout = Self {
            output_dir: resolve(&config.output_dir),
            expected_dir: resolve(&config.expected_dir),
            settings_file: resolve(&config.settings_file),
            dependencies_file: resolve(&config.dependencies_file),
            project_dir,
        };
        layout.check_output_dir()?;
        Ok(layout)
    }

    fn check_output_dir(&self) -> Result<(), LoadError> {
        let output = &self.output_dir;
        let reason = if self.project_dir.starts_with(output) {
            Some("it is or contains the project directory")
        } else if self.expected_dir.starts_with(output) || output.starts_with(&self.expected_dir) {
            Some("it overlaps expected_dir")
        } else if self.settings_file.starts_with(output) {
            Some("it contains settings_file")
        } else if self.dependencies_file.starts_with(output) {
            Some("it contains dependencies_file")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(LoadError::UnsafeOutputDir {
                path: output.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// The set of collaborators a scenario runs against.
#[derive(Clone)]
pub struct Host {
    pub settings: Arc<dyn BuildSettings>,
    pub registry: Arc<dyn DependencyRegistry>,
    pub resolver: Arc<dyn Resolver>,
}

impl Host {
    /// File- and command-backed collaborators for a project on disk.
    pub fn from_config(config: &HarnessConfig, layout: &ProjectLayout) -> Self {
        Self {
            settings: Arc::new(FileBuildSettings::new(
                &layout.settings_file,
                config.build_systems.clone(),
                config.locked_settings.iter().cloned(),
            )),
            registry: Arc::new(FileDependencyRegistry::new(&layout.dependencies_file)),
            resolver: Arc::new(CommandResolver::new(config.resolver.clone(), layout.clone())),
        }
    }
}

/// Build settings stored as a YAML map.
#[derive(Debug)]
pub struct FileBuildSettings {
    path: PathBuf,
    build_systems: Vec<BuildSystem>,
    locked: HashSet<String>,
}

impl FileBuildSettings {
    pub fn new(
        path: impl Into<PathBuf>,
        build_systems: Vec<BuildSystem>,
        locked: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            path: path.into(),
            build_systems,
            locked: locked.into_iter().collect(),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, SettingValue>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid settings file {}", self.path.display()))
    }

    fn store(&self, settings: &BTreeMap<String, SettingValue>) -> Result<()> {
        write_yaml(&self.path, settings)
    }
}

impl BuildSettings for FileBuildSettings {
    fn get(&self, name: &str) -> Option<SettingValue> {
        match self.load() {
            Ok(mut settings) => settings.remove(name),
            Err(e) => {
                tracing::warn!("Unable to read build setting {name}: {e:#}");
                None
            }
        }
    }

    fn set(&self, name: &str, value: SettingValue) -> bool {
        if self.locked.contains(name) {
            tracing::debug!("Ignoring write to locked setting {name}");
            return true;
        }
        let result = self.load().and_then(|mut settings| {
            settings.insert(name.to_string(), value);
            self.store(&settings)
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Unable to write build setting {name}: {e:#}");
                false
            }
        }
    }

    fn supports(&self, name: &str, value: &SettingValue) -> bool {
        match (name, value) {
            (BUILD_SYSTEM, SettingValue::Text(requested)) => self
                .build_systems
                .iter()
                .any(|system| system.as_str() == requested),
            (BUILD_SYSTEM, SettingValue::Bool(_)) => false,
            _ => true,
        }
    }
}

/// Declared dependencies stored as a YAML list.
#[derive(Debug)]
pub struct FileDependencyRegistry {
    path: PathBuf,
}

impl FileDependencyRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn declared(&self) -> Result<Vec<Dependency>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid dependencies file {}", self.path.display()))
    }
}

impl DependencyRegistry for FileDependencyRegistry {
    fn declare(&self, dependency: &Dependency) -> Result<()> {
        let mut declared = self.declared()?;
        if declared.contains(dependency) {
            return Ok(());
        }
        match declared.iter_mut().find(|d| d.same_artifact(dependency)) {
            Some(existing) => {
                tracing::debug!("Replacing {existing} with {dependency}");
                *existing = dependency.clone();
            }
            None => declared.push(dependency.clone()),
        }
        write_yaml(&self.path, &declared)
    }
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let yaml = serde_yaml::to_string(value)?;
    std::fs::write(path, yaml).with_context(|| format!("failed to write {}", path.display()))
}

/// Resolver that runs an external command on its own thread.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    command: ResolverCommand,
    layout: ProjectLayout,
}

impl CommandResolver {
    pub fn new(command: ResolverCommand, layout: ProjectLayout) -> Self {
        Self { command, layout }
    }

    fn run(&self) -> Result<bool> {
        let mut cmd = Command::new(&self.command.cmd);
        cmd.args(&self.command.args)
            .current_dir(&self.layout.project_dir)
            .envs(&self.command.env)
            .env("RESOLVECHECK_OUTPUT_DIR", &self.layout.output_dir)
            .env("RESOLVECHECK_SETTINGS", &self.layout.settings_file)
            .env("RESOLVECHECK_DEPENDENCIES", &self.layout.dependencies_file)
            .stdin(Stdio::null())
            // Keep stdout free for machine-readable reports.
            .stdout(std::io::stderr())
            .stderr(std::io::stderr());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.command.cmd))?;

        let Some(timeout) = self.command.timeout.map(Duration::from_secs) else {
            return Ok(child.wait()?.success());
        };

        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status.success());
            }
            if start.elapsed() > timeout {
                let _ = child.kill();
                let _ = child.wait();
                bail!("resolver timed out after {}s", timeout.as_secs());
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Resolver for CommandResolver {
    fn resolve(&self, on_complete: ResolveCallback) {
        let resolver = self.clone();
        std::thread::spawn(move || {
            tracing::info!("Resolving with {}", resolver.command.cmd);
            let success = match resolver.run() {
                Ok(success) => success,
                Err(e) => {
                    tracing::error!("Resolver did not run: {e:#}");
                    false
                }
            };
            on_complete(success);
        });
    }
}

/// Run environment setup steps in order, stopping at the first failure.
pub fn run_setup(steps: &[SetupStep], project_dir: &Path) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        run_setup_step(step, project_dir).with_context(|| format!("setup step {}", index + 1))?;
    }
    Ok(())
}

fn run_setup_step(step: &SetupStep, project_dir: &Path) -> Result<()> {
    if let Some(write_file) = &step.write_file {
        let path = resolve_path(project_dir, &write_file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, &write_file.contents)
            .with_context(|| format!("failed to write {}", write_file.path.display()))?;
    }

    if let Some(dir_path) = &step.create_dir {
        let path = resolve_path(project_dir, dir_path);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create directory {}", dir_path.display()))?;
    }

    if let Some(copy) = &step.copy_file {
        let from = resolve_path(project_dir, &copy.from);
        let to = resolve_path(project_dir, &copy.to);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::copy(&from, &to).with_context(|| {
            format!(
                "failed to copy {} to {}",
                copy.from.display(),
                copy.to.display()
            )
        })?;
    }

    if let Some(copy) = &step.copy_dir {
        let from = resolve_path(project_dir, &copy.from);
        let to = resolve_path(project_dir, &copy.to);
        copy_dir_recursive(&from, &to).with_context(|| {
            format!(
                "failed to copy {} to {}",
                copy.from.display(),
                copy.to.display()
            )
        })?;
    }

    if let Some(run) = &step.run {
        let output = Command::new(&run.cmd)
            .args(&run.args)
            .current_dir(project_dir)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", run.cmd))?;
        if !output.status.success() {
            bail!(
                "command {} failed with exit code {:?}: {}",
                run.cmd,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
    }

    Ok(())
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
