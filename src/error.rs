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
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;
use crate::schema::SchemaViolation;

/// Boxed error returned by workload collaborators, kept as the source of a
/// directory failure.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error enum for the artifact-store library.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("Configuration error")]
  Config(#[from] ConfigError),

  #[error("LTS payload validation failed")]
  Schema(#[from] SchemaError),

  #[error("Results tree processing failed")]
  Driver(#[from] DriverError),

  #[error("Failed to parse results directory {dir} during {stage}")]
  DirectoryParse {
    dir: PathBuf,
    stage: Stage,
    #[source]
    source: CollaboratorError,
  },

  #[error("Failed to build the LTS payload of {dir}")]
  LtsBuild {
    dir: PathBuf,
    #[source]
    source: CollaboratorError,
  },
}

/// Errors raised by the file-reading helpers handed to parse functions.
///
/// `MissingFile` and `RoleUnresolved` mean "feature absent for this
/// directory"; call sites decide whether to degrade or propagate.
#[derive(Error, Debug)]
pub enum ReadError {
  #[error("File not found: {0}")]
  MissingFile(PathBuf),

  #[error("Artifact role '{role}' did not resolve in this directory")]
  RoleUnresolved { role: String },

  #[error("Failed to read {path}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl ReadError {
  /// Whether this error only means the artifact is absent.
  pub fn is_absent(&self) -> bool {
    matches!(
      self,
      ReadError::MissingFile(_) | ReadError::RoleUnresolved { .. }
    )
  }
}

/// Errors related to the per-directory cache file (src/cache.rs).
#[derive(Error, Debug)]
pub enum CacheError {
  #[error("Failed to read cache file: {path}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to decode cache file: {path}")]
  Decode {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("Failed to serialize cache entry")]
  Encode(#[source] serde_json::Error),

  #[error("Failed to write cache file: {path}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Errors related to LTS payload validation (src/schema.rs).
#[derive(Error, Debug)]
pub enum SchemaError {
  #[error("Couldn't dump the LTS payload into JSON")]
  Dump(#[source] serde_json::Error),

  #[error("LTS payload does not match schema {schema_version} (settings: {settings}): {violations:?}")]
  Violations {
    schema_version: String,
    settings: String,
    violations: Vec<SchemaViolation>,
  },

  #[error("Cannot export LTS payloads: the workload defines no LTS schema")]
  NoSchema,
}

/// Errors related to engine configuration and workload declarations.
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to load engine configuration")]
  Figment(#[from] Box<figment::Error>),

  #[error("Failed to read workload declaration: {path}")]
  ReadDeclaration {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse workload declaration TOML")]
  ParseDeclaration(#[from] toml::de::Error),

  #[error("Invalid glob pattern '{pattern}'")]
  InvalidPattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  #[error("Important file '{entry}' references unknown artifact role '{role}'")]
  UnknownRole { entry: String, role: String },
}

/// Errors related to walking a results tree (src/driver.rs).
#[derive(Error, Debug)]
pub enum DriverError {
  #[error("Results directory not found: {0}")]
  RootNotFound(PathBuf),

  #[error("Failed to walk results tree")]
  Walk(#[from] walkdir::Error),

  #[error("Failed to read import settings from {path}")]
  ReadSettings {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse import settings in {path}")]
  ParseSettings {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("Malformed settings line in {path}: {line}")]
  SettingsLine { path: PathBuf, line: String },
}
