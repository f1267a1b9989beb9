// Copyright 2025 Chisomo Makombo Sakala
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Directory-role resolution and file-importance classification.
//!
//! Every file a parse function opens goes through [`ArtifactDir::register_read`],
//! so the set of files a results directory actually needed can be audited
//! against the workload's declared important-file list.

use glob::Pattern;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::declaration::ArtifactRoles;
use crate::declaration::WorkloadDecl;
use crate::error::ConfigError;
use crate::error::ReadError;

/// File names every results directory is expected to carry.
pub const MANDATORY_FILES: [&str; 4] = ["settings", "exit_code", "config.yaml", "skip"];

/// Role name → path relative to the results directory, `None` when the role
/// did not resolve.
pub type ResolvedArtifactPaths = BTreeMap<String, Option<PathBuf>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
  Mandatory,
  Important,
  Cache,
  Untracked,
}

impl fmt::Display for FileClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FileClass::Mandatory => f.write_str("mandatory"),
      FileClass::Important => f.write_str("important"),
      FileClass::Cache => f.write_str("cache"),
      FileClass::Untracked => f.write_str("untracked"),
    }
  }
}

/// Resolves every role of `roles` inside `results_dir`.
///
/// A literal match wins; otherwise the pattern is globbed and, when several
/// entries match, the lexicographically last one is kept. Roles with no
/// match resolve to `None`.
pub fn resolve_roles(results_dir: &Path, roles: &ArtifactRoles) -> ResolvedArtifactPaths {
  roles
    .iter()
    .map(|(role, pattern)| (role.clone(), resolve_role(results_dir, role, pattern)))
    .collect()
}

fn resolve_role(results_dir: &Path, role: &str, pattern: &str) -> Option<PathBuf> {
  if results_dir.join(pattern).exists() {
    return Some(PathBuf::from(pattern));
  }

  // glob drops `./` and keeps `..`, so matches are taken relative to the folded base
  let base = lexical_normalize(results_dir);
  let full_pattern = if base.as_os_str().is_empty() {
    pattern.to_string()
  } else {
    format!("{}/{}", Pattern::escape(&base.to_string_lossy()), pattern)
  };

  let paths = match glob::glob(&full_pattern) {
    Ok(paths) => paths,
    Err(e) => {
      tracing::warn!(role, pattern, error = %e, "Cannot glob artifact role pattern");
      return None;
    }
  };

  let mut resolutions: Vec<PathBuf> = paths
    .filter_map(Result::ok)
    .filter_map(|path| {
      lexical_normalize(&path)
        .strip_prefix(&base)
        .ok()
        .map(Path::to_path_buf)
    })
    .collect();
  resolutions.sort();

  match resolutions.len() {
    0 => {
      tracing::warn!(
        "Cannot resolve {} glob '{}' in '{}'",
        role,
        pattern,
        results_dir.display()
      );
      None
    }
    1 => resolutions.pop(),
    _ => {
      tracing::debug!(
        "Found multiple resolutions for {} glob '{}' in '{}': {:?}. Taking the last one",
        role,
        pattern,
        results_dir.display(),
        resolutions
      );
      resolutions.pop()
    }
  }
}

/// Classifies paths (relative to a results directory) against a workload declaration.
#[derive(Debug, Clone)]
pub struct FileClassifier {
  important_files: BTreeSet<String>,
  important_patterns: Vec<Pattern>,
  extra_mandatory_files: BTreeSet<String>,
  cache_filename: String,
}

impl FileClassifier {
  pub fn new(decl: &WorkloadDecl) -> Result<Self, ConfigError> {
    let important_patterns = decl
      .important_files
      .iter()
      .filter(|entry| entry.contains('*'))
      .map(|entry| {
        Pattern::new(entry).map_err(|source| ConfigError::InvalidPattern {
          pattern: entry.clone(),
          source,
        })
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(FileClassifier {
      important_files: decl.important_files.iter().cloned().collect(),
      important_patterns,
      extra_mandatory_files: decl.extra_mandatory_files.iter().cloned().collect(),
      cache_filename: decl.cache_filename.clone(),
    })
  }

  pub fn cache_filename(&self) -> &str {
    &self.cache_filename
  }

  pub fn is_mandatory_file(&self, path: &Path) -> bool {
    let Some(name) = file_name(path) else {
      return false;
    };

    MANDATORY_FILES.contains(&name)
      || self.extra_mandatory_files.contains(name)
      || name.starts_with("settings.")
  }

  pub fn is_important_file(&self, path: &Path) -> bool {
    let path = path.to_string_lossy();
    if self.important_files.contains(path.as_ref()) {
      return true;
    }

    self
      .important_patterns
      .iter()
      .any(|pattern| pattern.matches(&path))
  }

  pub fn is_cache_file(&self, path: &Path) -> bool {
    file_name(path) == Some(self.cache_filename.as_str())
  }

  /// Classifies `path`, also trying its `..`-free form relative to `results_dir`.
  pub fn classify(&self, results_dir: &Path, path: &Path) -> FileClass {
    if self.is_mandatory_file(path) {
      return FileClass::Mandatory;
    }

    if self.is_important_file(path) {
      return FileClass::Important;
    }

    if let Some(normalized) = normalize_relative(results_dir, path) {
      if self.is_important_file(&normalized) {
        return FileClass::Important;
      }
    }

    if self.is_cache_file(path) {
      return FileClass::Cache;
    }

    FileClass::Untracked
  }
}

fn file_name(path: &Path) -> Option<&str> {
  path.file_name().and_then(|name| name.to_str())
}

/// Lexically folds `..` and `.` out of `results_dir/path` and returns it
/// relative to `results_dir`, or `None` if it escapes the directory.
fn normalize_relative(results_dir: &Path, path: &Path) -> Option<PathBuf> {
  let base = lexical_normalize(results_dir);
  let full = lexical_normalize(&results_dir.join(path));

  full.strip_prefix(&base).ok().map(Path::to_path_buf)
}

fn lexical_normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => match out.components().next_back() {
        Some(Component::Normal(_)) => {
          out.pop();
        }
        Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
        _ => out.push(component),
      },
      other => out.push(other),
    }
  }
  out
}

/// The compiled form of a [`WorkloadDecl`], shared by every directory of a run.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
  roles: ArtifactRoles,
  classifier: FileClassifier,
}

impl ArtifactLocator {
  pub fn new(decl: &WorkloadDecl) -> Result<Self, ConfigError> {
    Ok(ArtifactLocator {
      roles: decl.artifact_dirnames.clone(),
      classifier: FileClassifier::new(decl)?,
    })
  }

  pub fn classifier(&self) -> &FileClassifier {
    &self.classifier
  }

  pub fn classify(&self, results_dir: &Path, path: &Path) -> FileClass {
    self.classifier.classify(results_dir, path)
  }

  /// Resolves the roles of `results_dir` and opens the per-directory context.
  pub fn open(&self, results_dir: &Path) -> ArtifactDir<'_> {
    let resolved = resolve_roles(results_dir, &self.roles);

    ArtifactDir {
      path: results_dir.to_path_buf(),
      resolved,
      classifier: &self.classifier,
      reads: RefCell::new(BTreeSet::new()),
    }
  }
}

/// One results directory as seen by the parse functions.
#[derive(Debug)]
pub struct ArtifactDir<'a> {
  path: PathBuf,
  resolved: ResolvedArtifactPaths,
  classifier: &'a FileClassifier,
  reads: RefCell<BTreeSet<PathBuf>>,
}

impl ArtifactDir<'_> {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn resolved_roles(&self) -> &ResolvedArtifactPaths {
    &self.resolved
  }

  /// The resolved relative path of `role`, if it resolved in this directory.
  pub fn role(&self, role: &str) -> Option<&Path> {
    self.resolved.get(role).and_then(|path| path.as_deref())
  }

  /// `role/file`, or [`ReadError::RoleUnresolved`].
  pub fn role_path(&self, role: &str, file: impl AsRef<Path>) -> Result<PathBuf, ReadError> {
    self
      .role(role)
      .map(|dir| dir.join(file))
      .ok_or_else(|| ReadError::RoleUnresolved {
        role: role.to_string(),
      })
  }

  /// Records that a parse function is about to read `path` and returns the
  /// full path to open.
  pub fn register_read(&self, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    if self.classifier.classify(&self.path, path) == FileClass::Untracked {
      tracing::warn!(
        dir = %self.path.display(),
        "File '{}' not part of the important file list",
        path.display()
      );
      if path.is_absolute() {
        tracing::warn!(
          "File '{}' is an absolute path. Should be relative to {}.",
          path.display(),
          self.path.display()
        );
      }
    }

    self.reads.borrow_mut().insert(path.to_path_buf());

    self.path.join(path)
  }

  pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String, ReadError> {
    let full_path = self.register_read(path);

    fs::read_to_string(&full_path).map_err(|source| {
      if source.kind() == std::io::ErrorKind::NotFound {
        ReadError::MissingFile(full_path)
      } else {
        ReadError::Io {
          path: full_path,
          source,
        }
      }
    })
  }

  /// Every path registered so far, relative to the directory.
  pub fn files_read(&self) -> Vec<PathBuf> {
    self.reads.borrow().iter().cloned().collect()
  }
}

/// Lets a call site turn "artifact absent" into `None` instead of failing.
pub trait ReadResultExt<T> {
  fn or_absent(self) -> Result<Option<T>, ReadError>;
}

impl<T> ReadResultExt<T> for Result<T, ReadError> {
  fn or_absent(self) -> Result<Option<T>, ReadError> {
    match self {
      Ok(value) => Ok(Some(value)),
      Err(e) if e.is_absent() => {
        tracing::warn!(error = %e, "Artifact absent");
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }
}
