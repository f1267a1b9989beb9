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

use artifact_store::cache;
use artifact_store::cache::Fingerprint;
use artifact_store::config::EngineConfig;
use artifact_store::error::StoreError;
use artifact_store::matrix::ImportSettings;
use artifact_store::pipeline::CacheOutcome;
use artifact_store::pipeline::Pipeline;
use artifact_store::pipeline::Stage;
use common::CountingWorkload;
use common::relative_to_cwd;
use common::results_dir;
use common::write_file;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::tempdir;

fn settings() -> ImportSettings {
  ImportSettings::from([("platform".to_string(), json!("p1"))])
}

fn pipeline(config: EngineConfig) -> (Arc<CountingWorkload>, Pipeline<CountingWorkload>) {
  let workload = Arc::new(CountingWorkload::new());
  let pipeline = Pipeline::new(Arc::clone(&workload), config).unwrap();
  (workload, pipeline)
}

#[test]
fn test_second_run_hits_the_cache() {
  let temp = tempdir().unwrap();
  let dir = results_dir(
    temp.path(),
    "run",
    "platform=p1\n",
    &[("answer.txt", "42\n"), ("logs-003/run.log", "a\nb\nc\n")],
  );
  let (workload, pipeline) = pipeline(EngineConfig::default());

  let first = pipeline.process(&dir, settings(), Some(0)).unwrap();
  assert_eq!(first.cache, CacheOutcome::Miss);
  assert!(dir.join("cache.json").is_file());

  let second = pipeline.process(&dir, settings(), Some(0)).unwrap();
  assert_eq!(second.cache, CacheOutcome::Hit);

  assert_eq!(workload.parse_once_calls(), 1);
  assert_eq!(workload.parse_always_calls(), 2);
  assert_eq!(first.results, second.results);
  assert_eq!(second.results.answer.as_deref(), Some("42"));
  assert_eq!(second.results.log_lines, Some(3));
  assert_eq!(second.results.seen_settings, 1);
  assert_eq!(second.exit_code, Some(0));
}

#[test]
fn test_ignore_cache_parses_every_time() {
  let temp = tempdir().unwrap();
  let dir = results_dir(temp.path(), "run", "platform=p1\n", &[("answer.txt", "42")]);
  let config = EngineConfig {
    ignore_cache: true,
    ..EngineConfig::default()
  };
  let (workload, pipeline) = pipeline(config);

  let first = pipeline.process(&dir, settings(), None).unwrap();
  let second = pipeline.process(&dir, settings(), None).unwrap();

  assert_eq!(workload.parse_once_calls(), 2);
  assert_eq!(first.cache, CacheOutcome::Bypassed);
  assert_eq!(second.cache, CacheOutcome::Bypassed);
  assert_eq!(first.results, second.results);
  // the cache is still refreshed
  assert!(dir.join("cache.json").is_file());
}

#[test]
fn test_parse_failure_leaves_no_cache() {
  let temp = tempdir().unwrap();
  let dir = results_dir(temp.path(), "run", "platform=p1\n", &[("fail", "")]);
  let (_, pipeline) = pipeline(EngineConfig::default());

  let result = pipeline.process(&dir, settings(), None);

  match result {
    Err(StoreError::DirectoryParse { stage, dir: failed, .. }) => {
      assert_eq!(stage, Stage::ParseOnce);
      assert_eq!(failed, dir);
    }
    Err(other) => panic!("unexpected error: {other}"),
    Ok(_) => panic!("parsing should have failed"),
  }
  assert!(!dir.join("cache.json").exists());
}

#[test]
fn test_changed_mandatory_file_invalidates_the_cache() {
  let temp = tempdir().unwrap();
  let dir = results_dir(temp.path(), "run", "platform=p1\n", &[("answer.txt", "42")]);
  let (workload, pipeline) = pipeline(EngineConfig::default());

  pipeline.process(&dir, settings(), None).unwrap();
  write_file(&dir, "settings", "platform=p1\nrepeat=2\n");
  write_file(&dir, "answer.txt", "43");

  let rerun = pipeline.process(&dir, settings(), None).unwrap();

  assert_eq!(rerun.cache, CacheOutcome::Miss);
  assert_eq!(workload.parse_once_calls(), 2);
  assert_eq!(rerun.results.answer.as_deref(), Some("43"));
}

#[test]
fn test_fingerprint_can_be_disabled() {
  let temp = tempdir().unwrap();
  let dir = results_dir(temp.path(), "run", "platform=p1\n", &[("answer.txt", "42")]);
  let config = EngineConfig {
    verify_fingerprint: false,
    ..EngineConfig::default()
  };
  let (workload, pipeline) = pipeline(config);

  pipeline.process(&dir, settings(), None).unwrap();
  write_file(&dir, "settings", "platform=p1\nrepeat=2\n");

  let rerun = pipeline.process(&dir, settings(), None).unwrap();

  assert_eq!(rerun.cache, CacheOutcome::Hit);
  assert_eq!(workload.parse_once_calls(), 1);
}

#[test]
fn test_corrupt_cache_is_reparsed_and_rewritten() {
  let temp = tempdir().unwrap();
  let dir = results_dir(temp.path(), "run", "platform=p1\n", &[("answer.txt", "42")]);
  write_file(&dir, "cache.json", "{ not json");
  let (workload, pipeline) = pipeline(EngineConfig::default());

  let first = pipeline.process(&dir, settings(), None).unwrap();
  let second = pipeline.process(&dir, settings(), None).unwrap();

  assert_eq!(first.cache, CacheOutcome::Miss);
  assert_eq!(second.cache, CacheOutcome::Hit);
  assert_eq!(workload.parse_once_calls(), 1);
}

#[test]
fn test_files_read_are_recorded() {
  let temp = tempdir().unwrap();
  let dir = results_dir(
    temp.path(),
    "run",
    "platform=p1\n",
    &[("answer.txt", "42"), ("logs-001/run.log", "a\n")],
  );
  let (_, pipeline) = pipeline(EngineConfig::default());

  let processed = pipeline.process(&dir, settings(), None).unwrap();

  assert_eq!(
    processed.files_read,
    vec![PathBuf::from("answer.txt"), PathBuf::from("logs-001/run.log")]
  );
  assert!(processed.lts.is_none());
  assert!(!processed.lts_valid);
}

#[test]
fn test_absent_artifacts_degrade_to_none() {
  let temp = tempdir().unwrap();
  let dir = results_dir(temp.path(), "run", "platform=p1\n", &[]);
  let (_, pipeline) = pipeline(EngineConfig::default());

  let processed = pipeline.process(&dir, settings(), None).unwrap();

  assert_eq!(processed.results.answer, None);
  assert_eq!(processed.results.log_lines, None);
}

#[test]
fn test_relative_directory_parses_like_the_absolute_one() {
  let temp = tempdir().unwrap();
  let dir = results_dir(
    temp.path(),
    "run",
    "platform=p1\n",
    &[("answer.txt", "42\n"), ("logs-003/run.log", "a\nb\nc\n")],
  );
  let (workload, pipeline) = pipeline(EngineConfig::default());

  let relative = pipeline
    .process(&relative_to_cwd(&dir), settings(), None)
    .unwrap();

  assert_eq!(relative.cache, CacheOutcome::Miss);
  assert_eq!(relative.results.log_lines, Some(3));

  let absolute = pipeline.process(&dir, settings(), None).unwrap();

  assert_eq!(absolute.cache, CacheOutcome::Hit);
  assert_eq!(absolute.results, relative.results);
  assert_eq!(workload.parse_once_calls(), 1);
}

#[test]
fn test_failed_cache_write_leaves_no_temp_file() {
  let temp = tempdir().unwrap();
  let dir = results_dir(temp.path(), "run", "platform=p1\n", &[]);
  // a directory squatting on the cache name makes the final rename fail
  write_file(&dir, "cache.json/keep", "");

  let result = cache::store(&dir.join("cache.json"), Fingerprint::default(), &json!({"answer": 1}));

  assert!(result.is_err());
  let leftovers: Vec<_> = std::fs::read_dir(&dir)
    .unwrap()
    .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
    .filter(|name| name.contains(".tmp-"))
    .collect();
  assert!(leftovers.is_empty(), "{leftovers:?}");
}
