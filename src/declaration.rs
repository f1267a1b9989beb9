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
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Default name of the per-directory cache file.
pub const DEFAULT_CACHE_FILENAME: &str = "cache.json";

/// Role name → unresolved glob pattern, e.g.
/// `CLUSTER_CAPTURE_ENV_DIR = "*__cluster__capture_environment"`.
pub type ArtifactRoles = BTreeMap<String, String>;

/// Static description of what a workload expects to find in a results directory.
///
/// Usually written as a `storefile.toml`:
///
/// ```toml
/// name = "skeleton"
/// cache_filename = "cache.json"
/// important_files = ["config.yaml", "{CLUSTER_CAPTURE_ENV_DIR}/nodes.json"]
///
/// [artifact_dirnames]
/// CLUSTER_CAPTURE_ENV_DIR = "*__cluster__capture_environment"
/// ```
///
/// `{ROLE}` placeholders in `important_files` are replaced by the role's
/// glob pattern when the declaration is loaded.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkloadDecl {
  pub name: String,

  #[serde(default = "default_cache_filename")]
  pub cache_filename: String,

  #[serde(default)]
  pub important_files: Vec<String>,

  #[serde(default)]
  pub extra_mandatory_files: Vec<String>,

  #[serde(default)]
  pub artifact_dirnames: ArtifactRoles,
}

fn default_cache_filename() -> String {
  DEFAULT_CACHE_FILENAME.to_string()
}

impl WorkloadDecl {
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let decl: WorkloadDecl = toml::from_str(content)?;
    decl.expanded()
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadDeclaration {
      path: path.to_path_buf(),
      source,
    })?;

    let decl = Self::from_toml_str(&content)?;
    tracing::debug!(workload = %decl.name, path = %path.display(), "Loaded workload declaration");

    Ok(decl)
  }

  /// Substitutes `{ROLE}` placeholders in the important-file list.
  pub fn expanded(mut self) -> Result<Self, ConfigError> {
    let mut important_files = Vec::with_capacity(self.important_files.len());
    for entry in &self.important_files {
      important_files.push(expand_placeholders(entry, &self.artifact_dirnames)?);
    }
    self.important_files = important_files;

    Ok(self)
  }
}

fn expand_placeholders(entry: &str, roles: &ArtifactRoles) -> Result<String, ConfigError> {
  let mut out = String::with_capacity(entry.len());
  let mut rest = entry;

  while let Some(start) = rest.find('{') {
    let Some(len) = rest[start..].find('}') else {
      break;
    };
    let role = &rest[start + 1..start + len];
    let pattern = roles.get(role).ok_or_else(|| ConfigError::UnknownRole {
      entry: entry.to_string(),
      role: role.to_string(),
    })?;

    out.push_str(&rest[..start]);
    out.push_str(pattern);
    rest = &rest[start + len + 1..];
  }
  out.push_str(rest);

  Ok(out)
}
