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

//! The aggregate of every processed results directory, keyed by its settings.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;

/// Flat map of scalar facts about a run (test parameters, platform, ...).
pub type ImportSettings = BTreeMap<String, Value>;

/// Workload hook normalizing import settings before they become a key.
pub type RewriteFn = Box<dyn Fn(ImportSettings) -> ImportSettings + Send + Sync>;

/// Canonical, ordered form of a run's (rewritten) import settings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SettingsKey(BTreeMap<String, String>);

impl SettingsKey {
  pub fn from_settings(settings: &ImportSettings) -> Self {
    SettingsKey(
      settings
        .iter()
        .map(|(key, value)| (key.clone(), display_value(value)))
        .collect(),
    )
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }
}

fn display_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

impl fmt::Display for SettingsKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    for (key, value) in &self.0 {
      if !first {
        f.write_str("|")?;
      }
      write!(f, "{key}={value}")?;
      first = false;
    }
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct MatrixEntry<T> {
  pub key: SettingsKey,
  pub location: PathBuf,
  pub import_settings: ImportSettings,
  pub value: T,
}

/// Settings-keyed registry of processed directories.
///
/// Entries are only ever added or overwritten; nothing is removed during a run.
pub struct Matrix<T> {
  entries: BTreeMap<SettingsKey, MatrixEntry<T>>,
  rewrite: Option<RewriteFn>,
}

impl<T> Default for Matrix<T> {
  fn default() -> Self {
    Matrix {
      entries: BTreeMap::new(),
      rewrite: None,
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for Matrix<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_map().entries(self.entries.iter()).finish()
  }
}

impl<T> Matrix<T> {
  pub fn new() -> Self {
    Self::default()
  }

  /// A matrix applying `rewrite` to the settings of every added entry.
  pub fn with_rewrite<F>(rewrite: F) -> Self
  where
    F: Fn(ImportSettings) -> ImportSettings + Send + Sync + 'static,
  {
    Matrix {
      entries: BTreeMap::new(),
      rewrite: Some(Box::new(rewrite)),
    }
  }

  /// Inserts `value` under the key derived from the rewritten `import_settings`.
  ///
  /// On a duplicate key, `on_duplicate(key, old_location, new_location)` is
  /// called once and the new entry replaces the old one. Returns the key.
  pub fn add<F>(
    &mut self,
    import_settings: ImportSettings,
    location: &Path,
    value: T,
    on_duplicate: F,
  ) -> SettingsKey
  where
    F: FnOnce(&SettingsKey, &Path, &Path),
  {
    let import_settings = match &self.rewrite {
      Some(rewrite) => rewrite(import_settings),
      None => import_settings,
    };
    let key = SettingsKey::from_settings(&import_settings);

    if let Some(previous) = self.entries.get(&key) {
      on_duplicate(&key, &previous.location, location);
    }

    self.entries.insert(
      key.clone(),
      MatrixEntry {
        key: key.clone(),
        location: location.to_path_buf(),
        import_settings,
        value,
      },
    );

    key
  }

  pub fn get(&self, key: &SettingsKey) -> Option<&MatrixEntry<T>> {
    self.entries.get(key)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Iterates the current entries in key order. Can be called any number of times.
  pub fn iter(&self) -> impl Iterator<Item = &MatrixEntry<T>> {
    self.entries.values()
  }
}

/// Duplicate callback logging a warning; the usual choice for `Matrix::add`.
pub fn warn_duplicate(key: &SettingsKey, old_location: &Path, new_location: &Path) {
  tracing::warn!(
    settings = %key,
    "Duplicate entry: {} overrides {}",
    new_location.display(),
    old_location.display()
  );
}
