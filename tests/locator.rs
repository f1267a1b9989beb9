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
mod common;

use artifact_store::declaration::ArtifactRoles;
use artifact_store::declaration::WorkloadDecl;
use artifact_store::error::ConfigError;
use artifact_store::error::ReadError;
use artifact_store::locator::ArtifactLocator;
use artifact_store::locator::FileClass;
use artifact_store::locator::ReadResultExt;
use artifact_store::locator::resolve_roles;
use common::COUNTING_DECLARATION;
use common::relative_to_cwd;
use common::write_file;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tempfile::tempdir;

fn roles(entries: &[(&str, &str)]) -> ArtifactRoles {
  entries
    .iter()
    .map(|(role, pattern)| (role.to_string(), pattern.to_string()))
    .collect()
}

#[test]
fn test_role_resolves_to_the_last_match() {
  let temp = tempdir().unwrap();
  for name in ["a-010", "a-001", "a-002"] {
    fs::create_dir(temp.path().join(name)).unwrap();
  }

  let resolved = resolve_roles(temp.path(), &roles(&[("A", "a-*")]));

  assert_eq!(resolved["A"], Some(PathBuf::from("a-010")));
}

#[test]
fn test_role_resolves_under_unnormalized_directories() {
  let temp = tempdir().unwrap();
  for name in ["a-001", "a-010"] {
    fs::create_dir_all(temp.path().join("rel").join(name)).unwrap();
  }
  let relative = relative_to_cwd(temp.path());

  for dir in [
    relative.join("rel"),
    relative.join("rel/../rel"),
    temp.path().join("./rel/../rel"),
  ] {
    let resolved = resolve_roles(&dir, &roles(&[("A", "a-*")]));

    assert_eq!(resolved["A"], Some(PathBuf::from("a-010")), "{}", dir.display());
  }
}

#[test]
fn test_unmatched_role_resolves_to_none() {
  let temp = tempdir().unwrap();
  fs::create_dir(temp.path().join("b-001")).unwrap();

  let resolved = resolve_roles(temp.path(), &roles(&[("A", "a-*"), ("B", "b-*")]));

  assert_eq!(resolved["A"], None);
  assert_eq!(resolved["B"], Some(PathBuf::from("b-001")));
}

#[test]
fn test_literal_role_path_wins_over_glob() {
  let temp = tempdir().unwrap();
  fs::create_dir(temp.path().join("logs")).unwrap();
  fs::create_dir(temp.path().join("logs-2")).unwrap();

  let resolved = resolve_roles(temp.path(), &roles(&[("LOGS", "logs")]));

  assert_eq!(resolved["LOGS"], Some(PathBuf::from("logs")));
}

#[test]
fn test_classify() {
  let decl = WorkloadDecl::from_toml_str(
    r#"
name = "classify"
important_files = ["config.yaml", "{ENV}/nodes.json", "prom/prometheus.t*"]
extra_mandatory_files = ["metadata.json"]

[artifact_dirnames]
ENV = "*__capture_environment"
"#,
  )
  .unwrap();
  let locator = ArtifactLocator::new(&decl).unwrap();
  let dir = Path::new("/results/run");

  let cases = [
    ("settings", FileClass::Mandatory),
    ("settings.mode.yaml", FileClass::Mandatory),
    ("exit_code", FileClass::Mandatory),
    ("skip", FileClass::Mandatory),
    ("metadata.json", FileClass::Mandatory),
    ("001__capture_environment/nodes.json", FileClass::Important),
    ("prom/prometheus.tar", FileClass::Important),
    ("other/../001__capture_environment/nodes.json", FileClass::Important),
    ("cache.json", FileClass::Cache),
    ("notes.txt", FileClass::Untracked),
    ("../elsewhere/nodes.json", FileClass::Untracked),
  ];

  for (path, expected) in cases {
    assert_eq!(locator.classify(dir, Path::new(path)), expected, "{path}");
  }
}

#[test]
fn test_unknown_role_placeholder_is_rejected() {
  let result = WorkloadDecl::from_toml_str(
    r#"
name = "broken"
important_files = ["{MISSING}/file.log"]
"#,
  );

  match result {
    Err(ConfigError::UnknownRole { role, .. }) => assert_eq!(role, "MISSING"),
    other => panic!("unexpected result: {other:?}"),
  }
}

#[test]
fn test_declaration_defaults() {
  let decl = WorkloadDecl::from_toml_str(COUNTING_DECLARATION).unwrap();

  assert_eq!(decl.cache_filename, "cache.json");
  assert_eq!(decl.important_files, vec!["answer.txt", "logs-*/run.log"]);
  assert!(decl.extra_mandatory_files.is_empty());
}

#[test]
fn test_reads_are_registered() {
  let temp = tempdir().unwrap();
  write_file(temp.path(), "answer.txt", "42");
  write_file(temp.path(), "logs-7/run.log", "line\n");
  write_file(temp.path(), "stray.txt", "?");

  let decl = WorkloadDecl::from_toml_str(COUNTING_DECLARATION).unwrap();
  let locator = ArtifactLocator::new(&decl).unwrap();
  let dir = locator.open(temp.path());

  assert_eq!(dir.register_read("answer.txt"), temp.path().join("answer.txt"));
  let log = dir.role_path("LOGS", "run.log").unwrap();
  assert_eq!(dir.read_to_string(&log).unwrap(), "line\n");
  // untracked reads are only reported
  assert_eq!(dir.read_to_string("stray.txt").unwrap(), "?");

  assert_eq!(
    dir.files_read(),
    vec![
      PathBuf::from("answer.txt"),
      PathBuf::from("logs-7/run.log"),
      PathBuf::from("stray.txt"),
    ]
  );
}

#[test]
fn test_missing_artifacts() {
  let temp = tempdir().unwrap();
  let decl = WorkloadDecl::from_toml_str(COUNTING_DECLARATION).unwrap();
  let locator = ArtifactLocator::new(&decl).unwrap();
  let dir = locator.open(temp.path());

  let missing = dir.read_to_string("answer.txt");
  assert!(matches!(missing, Err(ReadError::MissingFile(_))));
  assert_eq!(dir.read_to_string("answer.txt").or_absent().unwrap(), None);

  let unresolved = dir.role_path("LOGS", "run.log");
  assert!(matches!(&unresolved, Err(ReadError::RoleUnresolved { role }) if role == "LOGS"));
  assert!(unresolved.unwrap_err().is_absent());
  assert_eq!(dir.role("LOGS"), None);
}
