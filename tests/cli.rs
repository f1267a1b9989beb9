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
use assert_cmd::cargo;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;
use tempfile::tempdir;

use fs_extra::dir::CopyOptions;
use fs_extra::dir::copy;
use std::fs;

use serde_json::Value;

/// Copies `tests/fixtures/results` into a fresh temp dir.
fn fixture_tree() -> (TempDir, PathBuf) {
  let temp = tempdir().unwrap();
  let options = CopyOptions::new();
  copy("tests/fixtures/results", temp.path(), &options).unwrap();
  let root = temp.path().join("results");
  (temp, root)
}

fn artstore(artifact_dir: &Path) -> Command {
  let mut cmd = Command::new(cargo::cargo_bin!("artstore"));
  cmd
    .env("CLICOLOR", "0")
    .env("RUST_LOG", "info")
    .env("ARTIFACT_DIR", artifact_dir)
    .env_remove("JOB_NAME_SAFE")
    .env_remove("ARTSTORE_LOG_FILE")
    .env_remove("ARTSTORE_JOBS")
    .env_remove("MATBENCH_STORE_IGNORE_CACHE");
  cmd
}

#[test]
fn test_parse_missing_root() {
  let temp = tempdir().unwrap();

  artstore(temp.path())
    .arg("parse")
    .arg(temp.path().join("nowhere"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Results directory not found"));
}

#[test]
fn test_parse_then_reuse_cache() {
  let (temp, root) = fixture_tree();

  artstore(temp.path())
    .arg("parse")
    .arg(&root)
    .assert()
    .success()
    .stdout(predicate::str::contains(r#""cache":"miss""#))
    .stdout(predicate::str::contains(r#""settings":"expe=smoke|platform=p1""#))
    .stdout(predicate::str::contains(r#""settings":"expe=smoke|platform=p2""#))
    .stdout(predicate::str::contains(r#""lts_valid":true"#));

  assert!(root.join("run-p1/cache.json").is_file());
  assert!(root.join("run-p2/cache.json").is_file());

  artstore(temp.path())
    .arg("parse")
    .arg(&root)
    .arg("--jobs")
    .arg("2")
    .assert()
    .success()
    .stdout(predicate::str::contains(r#""cache":"hit""#))
    .stdout(predicate::str::contains(r#""cache":"miss""#).not());
}

#[test]
fn test_parse_ignore_cache() {
  let (temp, root) = fixture_tree();

  for _ in 0..2 {
    artstore(temp.path())
      .arg("parse")
      .arg(&root)
      .arg("--ignore-cache")
      .assert()
      .success()
      .stdout(predicate::str::contains(r#""cache":"bypassed""#));
  }

  artstore(temp.path())
    .arg("parse")
    .arg(&root)
    .env("MATBENCH_STORE_IGNORE_CACHE", "y")
    .assert()
    .success()
    .stdout(predicate::str::contains(r#""cache":"bypassed""#));
}

#[test]
fn test_export_e2e() {
  let (temp, root) = fixture_tree();

  let output = artstore(temp.path())
    .arg("export")
    .arg(&root)
    .output()
    .unwrap();
  assert!(output.status.success());

  let payloads: Vec<Value> = String::from_utf8(output.stdout)
    .unwrap()
    .lines()
    .map(|line| serde_json::from_str(line).unwrap())
    .collect();

  assert_eq!(payloads.len(), 2);

  let p1 = &payloads[0];
  assert_eq!(p1["metadata"]["settings"]["platform"], "p1");
  assert_eq!(p1["metadata"]["settings"]["ocp_version"], "4.15.3");
  assert_eq!(p1["metadata"]["test_uuid"], "11111111-1111-1111-1111-111111111111");
  assert_eq!(p1["metadata"]["exit_code"], 0);
  assert_eq!(p1["metadata"]["presets"][0], "light");
  assert_eq!(p1["results"]["node_count"], 2);
  assert_eq!(p1["kpis"]["skeleton_test_duration"]["value"], 100.0);
  assert_eq!(p1["kpis"]["skeleton_test_duration"]["polarity"], "lower_better");
  assert_eq!(p1["kpis"]["skeleton_node_count"]["platform"], "p1");

  let p2 = &payloads[1];
  assert_eq!(p2["metadata"]["settings"]["platform"], "p2");
  assert_eq!(p2["metadata"]["exit_code"], 1);
  assert_eq!(p2["kpis"]["skeleton_test_duration"]["value"], Value::Null);
}

#[test]
fn test_export_fails_on_invalid_payload() {
  let (temp, root) = fixture_tree();
  fs::write(root.join("run-p2/config.yaml"), "test: {}\n").unwrap();

  artstore(temp.path())
    .arg("export")
    .arg(&root)
    .assert()
    .failure()
    .stderr(predicate::str::contains("LTS payload validation failed"))
    .stderr(predicate::str::contains("lts-error"));
}

#[test]
fn test_classify() {
  let (temp, root) = fixture_tree();

  artstore(temp.path())
    .arg("classify")
    .arg(root.join("run-p1"))
    .arg("settings")
    .arg("config.yaml")
    .arg("001__cluster__capture_environment/nodes.json")
    .arg("cache.json")
    .arg("notes.txt")
    .assert()
    .success()
    .stdout(predicate::str::contains("settings: mandatory"))
    .stdout(predicate::str::contains("config.yaml: mandatory"))
    .stdout(predicate::str::contains(
      "001__cluster__capture_environment/nodes.json: important",
    ))
    .stdout(predicate::str::contains("cache.json: cache"))
    .stdout(predicate::str::contains("notes.txt: untracked"));
}

#[test]
fn test_classify_with_declaration() {
  let (temp, root) = fixture_tree();
  let declaration = temp.path().join("storefile.toml");
  fs::write(
    &declaration,
    "name = \"custom\"\ncache_filename = \"store.json\"\nimportant_files = [\"notes.txt\"]\n",
  )
  .unwrap();

  artstore(temp.path())
    .arg("classify")
    .arg(root.join("run-p1"))
    .arg("notes.txt")
    .arg("store.json")
    .arg("--declaration")
    .arg(&declaration)
    .assert()
    .success()
    .stdout(predicate::str::contains("notes.txt: important"))
    .stdout(predicate::str::contains("store.json: cache"));
}

fn node_counts(output: &[u8]) -> Vec<Value> {
  String::from_utf8(output.to_vec())
    .unwrap()
    .lines()
    .map(|line| serde_json::from_str::<Value>(line).unwrap()["results"]["node_count"].clone())
    .collect()
}

#[test]
fn test_export_from_a_relative_root() {
  let (temp, _) = fixture_tree();

  for root in ["./results", "results/../results", "results"] {
    let output = artstore(temp.path())
      .current_dir(temp.path())
      .arg("export")
      .arg(root)
      .output()
      .unwrap();
    assert!(output.status.success(), "{root}");

    assert_eq!(node_counts(&output.stdout), vec![Value::from(2), Value::from(0)], "{root}");
  }
}
