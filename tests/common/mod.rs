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
#![allow(dead_code)]

use artifact_store::declaration::WorkloadDecl;
use artifact_store::locator::ArtifactDir;
use artifact_store::locator::ReadResultExt;
use artifact_store::lts::NoLts;
use artifact_store::matrix::ImportSettings;
use artifact_store::pipeline::Workload;
use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

pub const COUNTING_DECLARATION: &str = r#"
name = "counting"
important_files = ["answer.txt", "{LOGS}/run.log"]

[artifact_dirnames]
LOGS = "logs-*"
"#;

pub fn write_file(dir: &Path, relative: &str, content: &str) {
  let path = dir.join(relative);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, content).unwrap();
}

/// A results directory with a `settings` file and the given extra files.
/// `path` as seen from the current directory, e.g. `../../tmp/.tmpXYZ`.
pub fn relative_to_cwd(path: &Path) -> std::path::PathBuf {
  let cwd = std::env::current_dir().unwrap();
  Path::new(".").join(pathdiff::diff_paths(path, cwd).unwrap())
}

pub fn results_dir(root: &Path, name: &str, settings: &str, files: &[(&str, &str)]) -> std::path::PathBuf {
  let dir = root.join(name);
  write_file(&dir, "settings", settings);
  for (relative, content) in files {
    write_file(&dir, relative, content);
  }
  dir
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountingResults {
  pub answer: Option<String>,
  pub log_lines: Option<usize>,
  #[serde(skip)]
  pub seen_settings: usize,
}

/// Counts how often each parse phase runs. A directory holding a `fail`
/// file makes `parse_once` fail.
#[derive(Debug)]
pub struct CountingWorkload {
  decl: WorkloadDecl,
  pub parse_once_calls: AtomicUsize,
  pub parse_always_calls: AtomicUsize,
}

impl CountingWorkload {
  pub fn new() -> Self {
    CountingWorkload {
      decl: WorkloadDecl::from_toml_str(COUNTING_DECLARATION).unwrap(),
      parse_once_calls: AtomicUsize::new(0),
      parse_always_calls: AtomicUsize::new(0),
    }
  }

  pub fn parse_once_calls(&self) -> usize {
    self.parse_once_calls.load(Ordering::SeqCst)
  }

  pub fn parse_always_calls(&self) -> usize {
    self.parse_always_calls.load(Ordering::SeqCst)
  }
}

impl Workload for CountingWorkload {
  type Results = CountingResults;
  type Lts = NoLts<CountingResults>;

  fn declaration(&self) -> &WorkloadDecl {
    &self.decl
  }

  fn parse_once(&self, dir: &ArtifactDir<'_>) -> anyhow::Result<CountingResults> {
    self.parse_once_calls.fetch_add(1, Ordering::SeqCst);

    if dir.path().join("fail").exists() {
      anyhow::bail!("cannot parse this directory");
    }

    let answer = dir
      .read_to_string("answer.txt")
      .or_absent()?
      .map(|content| content.trim().to_string());

    let log_lines = dir
      .role_path("LOGS", "run.log")
      .and_then(|path| dir.read_to_string(path))
      .or_absent()?
      .map(|content| content.lines().count());

    Ok(CountingResults {
      answer,
      log_lines,
      seen_settings: 0,
    })
  }

  fn parse_always(
    &self,
    results: &mut CountingResults,
    _dir: &ArtifactDir<'_>,
    import_settings: &ImportSettings,
  ) -> anyhow::Result<()> {
    self.parse_always_calls.fetch_add(1, Ordering::SeqCst);
    results.seen_settings = import_settings.len();
    Ok(())
  }
}
