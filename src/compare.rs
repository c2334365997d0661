//! Recursive artifact comparison.
//!
//! Compares a resolved output tree against an expected reference tree. Files
//! with an archive extension are unpacked and compared by content, since
//! repackaging the same files produces different archive bytes.

use crate::error::LoadError;
use crate::schema::CompareConfig;
use anyhow::Context;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// A single difference between the expected and actual trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    /// Present in the actual tree but not in the expected one.
    Unexpected { path: PathBuf },
    /// The expected tree itself is absent or not a directory.
    MissingTree { path: PathBuf },
    /// Present in the expected tree but not in the actual one.
    Missing { path: PathBuf },
    /// Both files exist and their bytes differ.
    ContentMismatch { expected: PathBuf, actual: PathBuf },
    /// Both archives exist and their extracted contents differ.
    ArchiveMismatch {
        expected: PathBuf,
        actual: PathBuf,
        nested: Vec<Discrepancy>,
    },
    /// An archive could not be unpacked.
    ExtractionFailed { archive: PathBuf, reason: String },
    /// A regular file could not be read.
    Unreadable { path: PathBuf, reason: String },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::Unexpected { path } => {
                write!(f, "Found unexpected artifact {}", path.display())
            }
            Discrepancy::MissingTree { path } => {
                write!(f, "Expected artifact tree {} does not exist", path.display())
            }
            Discrepancy::Missing { path } => {
                write!(f, "Missing expected artifact {}", path.display())
            }
            Discrepancy::ContentMismatch { expected, actual } => write!(
                f,
                "Artifact {} does not match expected {}",
                actual.display(),
                expected.display()
            ),
            Discrepancy::ArchiveMismatch {
                expected,
                actual,
                nested,
            } => {
                write!(
                    f,
                    "Archive {} does not match expected {}:",
                    actual.display(),
                    expected.display()
                )?;
                for inner in nested {
                    let text = inner.to_string().replace('\n', "\n  ");
                    write!(f, "\n  {text}")?;
                }
                Ok(())
            }
            Discrepancy::ExtractionFailed { archive, reason } => {
                write!(f, "Failed to extract {}: {reason}", archive.display())
            }
            Discrepancy::Unreadable { path, reason } => {
                write!(f, "Failed to read {}: {reason}", path.display())
            }
        }
    }
}

/// Rules deciding which files are archives and which are noise.
#[derive(Debug, Clone)]
pub struct ComparePolicy {
    archive_extensions: Vec<String>,
    ignore: Vec<Regex>,
    temp_root: Option<PathBuf>,
}

impl ComparePolicy {
    pub fn from_config(config: &CompareConfig) -> Result<Self, LoadError> {
        let ignore = config
            .ignore
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| LoadError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            archive_extensions: config
                .archive_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignore,
            temp_root: None,
        })
    }

    /// Extract archives under `root` instead of the system temp directory.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    fn is_archive(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.archive_extensions.iter().any(|a| *a == ext)
            })
    }

    fn is_ignored(&self, relative: &Path) -> bool {
        let normalized = relative.to_string_lossy().replace('\\', "/");
        self.ignore.iter().any(|re| re.is_match(&normalized))
    }

    fn extraction_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("resolvecheck-");
        match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

impl Default for ComparePolicy {
    fn default() -> Self {
        Self::from_config(&CompareConfig::default())
            .expect("default ignore patterns are valid")
    }
}

/// Compare two trees with the default policy.
#[cfg_attr(not(test), allow(dead_code))]
pub fn compare_trees(expected_dir: &Path, actual_dir: &Path) -> Vec<Discrepancy> {
    compare_trees_with(expected_dir, actual_dir, &ComparePolicy::default())
}

/// Compare two trees. An empty result means the trees are equivalent.
pub fn compare_trees_with(
    expected_dir: &Path,
    actual_dir: &Path,
    policy: &ComparePolicy,
) -> Vec<Discrepancy> {
    // Without a reference tree there is nothing to pass against.
    if !expected_dir.is_dir() {
        return vec![Discrepancy::MissingTree {
            path: expected_dir.to_path_buf(),
        }];
    }
    let roots = Roots {
        expected: expected_dir,
        actual: actual_dir,
        expected_label: expected_dir,
        actual_label: actual_dir,
    };
    compare_roots(&roots, policy)
}

/// Where files are read from, and how their paths are reported.
///
/// Inside an archive the files live in a temp directory, but discrepancies
/// name them relative to the archive itself.
struct Roots<'a> {
    expected: &'a Path,
    actual: &'a Path,
    expected_label: &'a Path,
    actual_label: &'a Path,
}

fn compare_roots(roots: &Roots<'_>, policy: &ComparePolicy) -> Vec<Discrepancy> {
    let expected = collect_artifacts(roots.expected, policy);
    let actual = collect_artifacts(roots.actual, policy);
    let mut discrepancies = Vec::new();

    for relative in actual.keys().filter(|p| !expected.contains_key(*p)) {
        discrepancies.push(Discrepancy::Unexpected {
            path: roots.actual_label.join(relative),
        });
    }

    for relative in expected.keys().filter(|p| !actual.contains_key(*p)) {
        discrepancies.push(Discrepancy::Missing {
            path: roots.expected_label.join(relative),
        });
    }

    for (relative, expected_path) in &expected {
        let Some(actual_path) = actual.get(relative) else {
            continue;
        };
        let labels = (
            roots.expected_label.join(relative),
            roots.actual_label.join(relative),
        );
        if policy.is_archive(relative) {
            discrepancies.extend(compare_archives(
                expected_path,
                actual_path,
                labels,
                policy,
            ));
        } else if let Some(d) = compare_bytes(expected_path, actual_path, labels) {
            discrepancies.push(d);
        }
    }

    discrepancies
}

/// Map every regular file under `root` by its path relative to `root`.
fn collect_artifacts(root: &Path, policy: &ComparePolicy) -> BTreeMap<PathBuf, PathBuf> {
    let mut files = BTreeMap::new();
    if !root.is_dir() {
        return files;
    }
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping unreadable entry under {}: {e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root)
            && !policy.is_ignored(relative)
        {
            files.insert(relative.to_path_buf(), entry.path().to_path_buf());
        }
    }
    files
}

fn compare_bytes(
    expected: &Path,
    actual: &Path,
    (expected_label, actual_label): (PathBuf, PathBuf),
) -> Option<Discrepancy> {
    let read = |path: &Path, label: &Path| {
        std::fs::read(path).map_err(|e| Discrepancy::Unreadable {
            path: label.to_path_buf(),
            reason: e.to_string(),
        })
    };
    let expected_bytes = match read(expected, &expected_label) {
        Ok(bytes) => bytes,
        Err(d) => return Some(d),
    };
    let actual_bytes = match read(actual, &actual_label) {
        Ok(bytes) => bytes,
        Err(d) => return Some(d),
    };
    (expected_bytes != actual_bytes).then(|| Discrepancy::ContentMismatch {
        expected: expected_label,
        actual: actual_label,
    })
}

fn compare_archives(
    expected: &Path,
    actual: &Path,
    (expected_label, actual_label): (PathBuf, PathBuf),
    policy: &ComparePolicy,
) -> Vec<Discrepancy> {
    // Byte-identical archives cannot differ once extracted.
    if let (Ok(a), Ok(b)) = (std::fs::read(expected), std::fs::read(actual))
        && a == b
    {
        return Vec::new();
    }

    let (expected_dir, actual_dir) = match (
        extract_archive(expected, policy),
        extract_archive(actual, policy),
    ) {
        (Ok(e), Ok(a)) => (e, a),
        (e, a) => {
            return [(e, expected_label), (a, actual_label)]
                .into_iter()
                .filter_map(|(dir, archive)| {
                    dir.err().map(|e| Discrepancy::ExtractionFailed {
                        archive,
                        reason: format!("{e:#}"),
                    })
                })
                .collect();
        }
    };

    let nested = compare_roots(
        &Roots {
            expected: expected_dir.path(),
            actual: actual_dir.path(),
            expected_label: &expected_label,
            actual_label: &actual_label,
        },
        policy,
    );
    if nested.is_empty() {
        return Vec::new();
    }
    vec![Discrepancy::ArchiveMismatch {
        expected: expected_label,
        actual: actual_label,
        nested,
    }]
}

/// Unpack a zip-format archive into a fresh temp directory.
///
/// The directory is removed when the returned handle drops, including when
/// extraction fails partway.
fn extract_archive(archive: &Path, policy: &ComparePolicy) -> anyhow::Result<TempDir> {
    let dir = policy
        .extraction_dir()
        .context("failed to create extraction directory")?;
    let file =
        File::open(archive).with_context(|| format!("failed to open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("not a valid zip archive")?;
    zip.extract(dir.path()).context("failed to unpack entries")?;
    tracing::debug!("Extracted {} into {}", archive.display(), dir.path().display());
    Ok(dir)
}
