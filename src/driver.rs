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
use chrono::DateTime;
use chrono::Utc;
use serde_json::Map;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;
use walkdir::WalkDir;

use crate::error::DriverError;
use crate::error::SchemaError;
use crate::error::StoreError;
use crate::lts::LtsBuilder;
use crate::matrix::ImportSettings;
use crate::matrix::Matrix;
use crate::matrix::warn_duplicate;
use crate::pipeline::Pipeline;
use crate::pipeline::ProcessedDirectory;
use crate::pipeline::Workload;
use crate::pipeline::WorkloadPayload;

/// Legacy `key=value` settings file.
pub const SETTINGS_FILE: &str = "settings";
pub const SETTINGS_YAML_FILE: &str = "settings.yaml";
pub const EXIT_CODE_FILE: &str = "exit_code";
pub const SKIP_FILE: &str = "skip";

pub fn is_results_directory(dir: &Path) -> bool {
  dir.join(SETTINGS_YAML_FILE).is_file() || dir.join(SETTINGS_FILE).is_file()
}

/// Finds the results directories under `root`, in file-name order.
///
/// Descent stops at a results directory: its sub-directories are artifacts.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>, DriverError> {
  if !root.is_dir() {
    return Err(DriverError::RootNotFound(root.to_path_buf()));
  }

  let mut directories = Vec::new();
  let mut walker = WalkDir::new(root)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter();

  while let Some(entry) = walker.next() {
    let entry = entry?;
    if !entry.file_type().is_dir() {
      continue;
    }

    if is_results_directory(entry.path()) {
      directories.push(entry.path().to_path_buf());
      walker.skip_current_dir();
    }
  }

  tracing::info!(count = directories.len(), root = %root.display(), "Discovered results directories");

  Ok(directories)
}

/// Merges `settings`, `settings.yaml` and `settings.*.yaml`, in that order.
pub fn read_import_settings(dir: &Path) -> Result<ImportSettings, DriverError> {
  let mut settings = ImportSettings::new();

  let legacy = dir.join(SETTINGS_FILE);
  if legacy.is_file() {
    let content = read_settings_file(&legacy)?;
    for line in content.lines().map(str::trim) {
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let Some((key, value)) = line.split_once('=') else {
        return Err(DriverError::SettingsLine {
          path: legacy.clone(),
          line: line.to_string(),
        });
      };
      settings.insert(key.trim().to_string(), scalar_from_str(value.trim()));
    }
  }

  let mut yaml_files: Vec<PathBuf> = fs::read_dir(dir)
    .map_err(|source| DriverError::ReadSettings {
      path: dir.to_path_buf(),
      source,
    })?
    .filter_map(Result::ok)
    .map(|entry| entry.path())
    .filter(|path| {
      path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("settings.") && name.ends_with(".yaml"))
    })
    .collect();
  // settings.yaml first, then the others by name
  yaml_files.sort_by_key(|path| (!path.ends_with(SETTINGS_YAML_FILE), path.clone()));

  for path in yaml_files {
    let content = read_settings_file(&path)?;
    let document: Value =
      serde_yaml::from_str(&content).map_err(|source| DriverError::ParseSettings {
        path: path.clone(),
        source,
      })?;

    match document {
      Value::Object(map) => flatten_into(&mut settings, "", map),
      Value::Null => {}
      other => {
        tracing::warn!(path = %path.display(), "Settings file is not a mapping, ignoring: {}", other);
      }
    }
  }

  Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<String, DriverError> {
  fs::read_to_string(path).map_err(|source| DriverError::ReadSettings {
    path: path.to_path_buf(),
    source,
  })
}

fn scalar_from_str(value: &str) -> Value {
  match serde_json::from_str::<Value>(value) {
    Ok(parsed @ (Value::Bool(_) | Value::Number(_))) => parsed,
    _ => Value::String(value.to_string()),
  }
}

fn flatten_into(settings: &mut ImportSettings, prefix: &str, map: Map<String, Value>) {
  for (key, value) in map {
    let key = if prefix.is_empty() {
      key
    } else {
      format!("{prefix}.{key}")
    };

    match value {
      Value::Object(nested) => flatten_into(settings, &key, nested),
      scalar => {
        settings.insert(key, scalar);
      }
    }
  }
}

/// The integer in `exit_code`, if present and readable.
pub fn read_exit_code(dir: &Path) -> Option<i32> {
  let path = dir.join(EXIT_CODE_FILE);
  let content = fs::read_to_string(&path).ok()?;

  match content.trim().parse() {
    Ok(code) => Some(code),
    Err(e) => {
      tracing::warn!(path = %path.display(), error = %e, "Cannot parse the exit code");
      None
    }
  }
}

/// Reads the inputs of one directory and runs the pipeline over it.
///
/// `Ok(None)` means the directory carries a `skip` marker.
pub fn process_directory<W: Workload>(
  pipeline: &Pipeline<W>,
  dir: &Path,
) -> Result<Option<ProcessedDirectory<W>>, StoreError> {
  if dir.join(SKIP_FILE).exists() {
    tracing::info!(dir = %dir.display(), "Found a skip marker, ignoring the directory");
    return Ok(None);
  }

  let import_settings = read_import_settings(dir)?;
  let exit_code = read_exit_code(dir);

  pipeline.process(dir, import_settings, exit_code).map(Some)
}

/// Parses every results directory under `root` into a new matrix.
///
/// Up to `jobs` directories are parsed at once on blocking workers; their
/// results are added to the matrix in discovery order. A directory that
/// fails is logged and left out.
pub async fn parse_results<W: Workload>(
  root: &Path,
  pipeline: Pipeline<W>,
) -> Result<Matrix<ProcessedDirectory<W>>, DriverError> {
  let directories = discover(root)?;
  let jobs = pipeline.config().jobs.max(1);

  let workload = Arc::clone(pipeline.workload_arc());
  let mut matrix = Matrix::with_rewrite(move |settings| workload.rewrite_settings(settings));

  let span = tracing::info_span!("parse_results", root = %root.display(), jobs);

  async {
    for chunk in directories.chunks(jobs) {
      let handles: Vec<_> = chunk
        .iter()
        .map(|dir| {
          let pipeline = pipeline.clone();
          let dir = dir.clone();
          tokio::task::spawn_blocking(move || {
            let outcome = process_directory(&pipeline, &dir);
            (dir, outcome)
          })
        })
        .collect();

      for handle in handles {
        match handle.await {
          Ok((dir, Ok(Some(processed)))) => {
            let import_settings = processed.import_settings.clone();
            matrix.add(import_settings, &dir, processed, warn_duplicate);
          }
          Ok((_, Ok(None))) => {}
          Ok((dir, Err(e))) => {
            tracing::error!(dir = %dir.display(), error = %error_chain(&e), "Failed to parse the directory, skipping it");
          }
          Err(e) => {
            tracing::error!(error = %e, "Directory worker panicked, skipping the directory");
          }
        }
      }
    }

    tracing::info!(entries = matrix.len(), "--- Results tree parsed ---");
  }
  .instrument(span)
  .await;

  Ok(matrix)
}

/// `error: cause: cause`, for log lines.
pub fn error_chain(error: &dyn std::error::Error) -> String {
  let mut out = error.to_string();
  let mut source = error.source();
  while let Some(cause) = source {
    out.push_str(": ");
    out.push_str(&cause.to_string());
    source = cause.source();
  }
  out
}

/// One payload ready for long-term storage.
#[derive(Debug)]
pub struct LtsExport<'a, P> {
  pub payload: &'a P,
  pub start: Option<DateTime<Utc>>,
  pub end: Option<DateTime<Utc>>,
}

/// Final export stage: every payload of the matrix, validated strictly.
///
/// The first payload failing validation aborts the export.
pub fn export_lts_payloads<'a, W: Workload>(
  workload: &W,
  matrix: &'a Matrix<ProcessedDirectory<W>>,
) -> Result<Vec<LtsExport<'a, WorkloadPayload<W>>>, StoreError> {
  let builder = workload.lts().ok_or(SchemaError::NoSchema)?;

  let mut exports = Vec::with_capacity(matrix.len());
  for entry in matrix.iter() {
    let Some(payload) = &entry.value.lts else {
      tracing::warn!(dir = %entry.location.display(), "No LTS payload for this entry");
      continue;
    };

    builder
      .schema()
      .validate(payload, &entry.import_settings, true)?;

    exports.push(LtsExport {
      payload,
      start: payload.metadata.start,
      end: payload.metadata.end,
    });
  }

  Ok(exports)
}
