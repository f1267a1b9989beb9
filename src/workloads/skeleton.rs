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

//! The reference workload: cluster capture plus a test configuration file.

use anyhow::Context;
use anyhow::Result;
use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use uuid::Uuid;

use crate::declaration::WorkloadDecl;
use crate::error::ConfigError;
use crate::kpi::KpiDefinition;
use crate::kpi::KpiRegistry;
use crate::kpi::Polarity;
use crate::locator::ArtifactDir;
use crate::locator::ReadResultExt;
use crate::lts::LtsBuilder;
use crate::lts::Metadata;
use crate::lts::Payload;
use crate::matrix::ImportSettings;
use crate::pipeline::Workload;
use crate::schema::PlainKind;
use crate::schema::Schema;
use crate::schema::SchemaViolation;

pub const CLUSTER_CAPTURE_ENV_DIR: &str = "CLUSTER_CAPTURE_ENV_DIR";
pub const CLUSTER_DUMP_PROM_DB_DIR: &str = "CLUSTER_DUMP_PROM_DB_DIR";

pub const LTS_SCHEMA_VERSION: &str = "1.0";
/// Bumped each time a KPI or a KPI label is added.
pub const KPI_SETTINGS_VERSION: &str = "1.0";

pub const DECLARATION: &str = r#"
name = "skeleton"
cache_filename = "cache.json"
important_files = [
  "config.yaml",
  ".uuid",
  "{CLUSTER_DUMP_PROM_DB_DIR}/prometheus.t*",
  "{CLUSTER_CAPTURE_ENV_DIR}/_ansible.log",
  "{CLUSTER_CAPTURE_ENV_DIR}/nodes.json",
  "{CLUSTER_CAPTURE_ENV_DIR}/ocp_version.yml",
]

[artifact_dirnames]
CLUSTER_CAPTURE_ENV_DIR = "*__cluster__capture_environment"
CLUSTER_DUMP_PROM_DB_DIR = "*__cluster__dump_prometheus_db"
"#;

const ANSIBLE_LOG_TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkeletonResults {
  pub test_uuid: Option<Uuid>,
  pub nodes_info: BTreeMap<String, NodeInfo>,
  pub cluster_info: ClusterInfo,
  pub ocp_version: Option<String>,
  pub test_start_end_time: Option<StartEndTime>,
  pub test_config: TestConfig,
  /// Depends on the process environment; never cached.
  #[serde(skip)]
  pub from_local_env: LocalEnv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
  pub name: String,
  pub managed: bool,
  pub instance_type: String,
  pub control_plane: bool,
  pub infra: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
  pub node_count: usize,
  pub control_plane: Vec<String>,
  pub infra: Vec<String>,
}

impl ClusterInfo {
  fn from_nodes(nodes_info: &BTreeMap<String, NodeInfo>) -> Self {
    ClusterInfo {
      node_count: nodes_info.len(),
      control_plane: nodes_info
        .values()
        .filter(|node| node.control_plane)
        .map(|node| node.name.clone())
        .collect(),
      infra: nodes_info
        .values()
        .filter(|node| node.infra)
        .map(|node| node.name.clone())
        .collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartEndTime {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

/// The parsed `config.yaml` with a dotted-key index over it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
  pub filepath: PathBuf,
  pub yaml: Value,
  #[serde(skip)]
  index: BTreeMap<String, Value>,
}

impl TestConfig {
  pub fn new(filepath: PathBuf, yaml: Value) -> Self {
    let mut config = TestConfig {
      filepath,
      yaml,
      index: BTreeMap::new(),
    };
    config.reindex();
    config
  }

  /// Rebuilds the dotted-key index from `yaml`.
  pub fn reindex(&mut self) {
    self.index.clear();
    index_value(&mut self.index, String::new(), &self.yaml);
  }

  fn clear_index(&mut self) {
    self.index.clear();
  }

  /// Looks `key` up, e.g. `test.platform`.
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.index.get(key)
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.get(key).and_then(Value::as_str)
  }
}

fn index_value(index: &mut BTreeMap<String, Value>, prefix: String, value: &Value) {
  if !prefix.is_empty() {
    index.insert(prefix.clone(), value.clone());
  }

  if let Value::Object(map) = value {
    for (key, child) in map {
      let path = if prefix.is_empty() {
        key.clone()
      } else {
        format!("{prefix}.{key}")
      };
      index_value(index, path, child);
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalEnv {
  pub artifacts_basedir: Option<PathBuf>,
  pub source_url: Option<String>,
  pub is_interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonSettings {
  pub kpi_settings_version: String,
  pub platform: Option<String>,
  pub ocp_version: Option<String>,
  pub control_plane_nodes: usize,
  pub infra_nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonOutcome {
  pub node_count: usize,
  /// Seconds between the first and the last line of the Ansible log.
  pub test_duration: Option<f64>,
}

pub type SkeletonPayload = Payload<SkeletonLts>;

pub struct SkeletonLts {
  schema: Schema<SkeletonPayload>,
  kpis: KpiRegistry<SkeletonPayload>,
}

impl Default for SkeletonLts {
  fn default() -> Self {
    let schema = Schema::new(LTS_SCHEMA_VERSION)
      .required("metadata.lts_schema_version", PlainKind::String)
      .required("metadata.settings.kpi_settings_version", PlainKind::String)
      .required("metadata.settings.platform", PlainKind::String)
      .optional("metadata.settings.ocp_version", PlainKind::String)
      .optional("metadata.start", PlainKind::Timestamp)
      .optional("metadata.end", PlainKind::Timestamp)
      .optional("metadata.test_uuid", PlainKind::String)
      .optional("metadata.exit_code", PlainKind::Integer)
      .required("results.node_count", PlainKind::Integer)
      .optional("results.test_duration", PlainKind::Number)
      .check(|payload: &SkeletonPayload| match (payload.metadata.start, payload.metadata.end) {
        (Some(start), Some(end)) if end < start => vec![SchemaViolation::new(
          "metadata.end",
          "test ends before it starts",
        )],
        _ => Vec::new(),
      });

    let kpis = KpiRegistry::new()
      .register(KpiDefinition::new(
        "skeleton_node_count",
        "Number of nodes in the cluster under test",
        "nodes",
        Polarity::HigherBetter,
        |payload: &SkeletonPayload| Ok(payload.results.node_count),
      ))
      .register(KpiDefinition::new(
        "skeleton_test_duration",
        "Duration of the test",
        "sec",
        Polarity::LowerBetter,
        |payload: &SkeletonPayload| {
          payload
            .results
            .test_duration
            .context("test duration not available")
        },
      ));

    SkeletonLts { schema, kpis }
  }
}

impl LtsBuilder for SkeletonLts {
  type Results = SkeletonResults;
  type Settings = SkeletonSettings;
  type Outcome = SkeletonOutcome;

  fn schema(&self) -> &Schema<SkeletonPayload> {
    &self.schema
  }

  fn metadata(
    &self,
    results: &SkeletonResults,
    _import_settings: &ImportSettings,
  ) -> Result<Metadata<SkeletonSettings>> {
    let presets = match results.test_config.get("ci_presets.names") {
      Some(Value::Array(names)) if !names.is_empty() => names
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect(),
      _ => vec!["no_preset_defined".to_string()],
    };

    let settings = SkeletonSettings {
      kpi_settings_version: KPI_SETTINGS_VERSION.to_string(),
      platform: results.test_config.get_str("test.platform").map(str::to_string),
      ocp_version: results.ocp_version.clone(),
      control_plane_nodes: results.cluster_info.control_plane.len(),
      infra_nodes: results.cluster_info.infra.len(),
    };

    Ok(Metadata {
      lts_schema_version: LTS_SCHEMA_VERSION.to_string(),
      start: results.test_start_end_time.as_ref().map(|t| t.start),
      end: results.test_start_end_time.as_ref().map(|t| t.end),
      test_uuid: results.test_uuid,
      exit_code: None,
      presets,
      config: serde_yaml::to_string(&results.test_config.yaml).ok(),
      settings,
    })
  }

  fn results(&self, results: &SkeletonResults) -> Result<SkeletonOutcome> {
    let test_duration = results
      .test_start_end_time
      .as_ref()
      .map(|t| (t.end - t.start).num_milliseconds() as f64 / 1000.0);

    Ok(SkeletonOutcome {
      node_count: results.cluster_info.node_count,
      test_duration,
    })
  }

  fn kpis(&self) -> &KpiRegistry<SkeletonPayload> {
    &self.kpis
  }
}

pub struct SkeletonWorkload {
  decl: WorkloadDecl,
  lts: SkeletonLts,
  generate: bool,
}

impl SkeletonWorkload {
  /// `generate` selects report-generation mode over interactive mode; it
  /// changes how local links are resolved.
  pub fn new(generate: bool) -> Result<Self, ConfigError> {
    Ok(Self::with_declaration(WorkloadDecl::from_toml_str(DECLARATION)?, generate))
  }

  pub fn with_declaration(decl: WorkloadDecl, generate: bool) -> Self {
    SkeletonWorkload {
      decl,
      lts: SkeletonLts::default(),
      generate,
    }
  }
}

impl Workload for SkeletonWorkload {
  type Results = SkeletonResults;
  type Lts = SkeletonLts;

  fn declaration(&self) -> &WorkloadDecl {
    &self.decl
  }

  fn parse_once(&self, dir: &ArtifactDir<'_>) -> Result<SkeletonResults> {
    let nodes_info = parse_nodes_info(dir)?.unwrap_or_default();
    let cluster_info = ClusterInfo::from_nodes(&nodes_info);

    Ok(SkeletonResults {
      test_uuid: parse_test_uuid(dir)?,
      nodes_info,
      cluster_info,
      ocp_version: parse_ocp_version(dir)?,
      test_start_end_time: parse_start_end_time(dir)?,
      test_config: TestConfig::default(),
      from_local_env: LocalEnv::default(),
    })
  }

  fn parse_always(
    &self,
    results: &mut SkeletonResults,
    dir: &ArtifactDir<'_>,
    _import_settings: &ImportSettings,
  ) -> Result<()> {
    results.from_local_env = parse_local_env(dir.path(), self.generate);
    results.test_config = parse_test_config(dir)?;
    Ok(())
  }

  fn before_cache(&self, results: &mut SkeletonResults) {
    results.test_config.clear_index();
  }

  fn after_cache(&self, results: &mut SkeletonResults) {
    results.test_config.reindex();
  }

  fn lts(&self) -> Option<&SkeletonLts> {
    Some(&self.lts)
  }

  fn rewrite_settings(&self, mut settings: ImportSettings) -> ImportSettings {
    settings.remove("hyper_parameters.raw_lists");
    if let Some(platform) = settings.remove("test.platform") {
      settings.entry("platform".to_string()).or_insert(platform);
    }
    settings
  }
}

fn parse_test_config(dir: &ArtifactDir<'_>) -> Result<TestConfig> {
  let filename = Path::new("config.yaml");
  let content = dir.read_to_string(filename)?;

  let mut yaml: Value = serde_yaml::from_str(&content)
    .with_context(|| format!("Failed to parse {}", filename.display()))?;
  if yaml.is_null() {
    tracing::error!("Config file '{}' is empty", filename.display());
    yaml = Value::Object(Default::default());
  }

  Ok(TestConfig::new(dir.path().join(filename), yaml))
}

fn parse_test_uuid(dir: &ArtifactDir<'_>) -> Result<Option<Uuid>> {
  let Some(content) = dir.read_to_string(".uuid").or_absent()? else {
    return Ok(None);
  };

  let uuid = Uuid::parse_str(content.trim()).context("Invalid test UUID in .uuid")?;
  Ok(Some(uuid))
}

#[derive(Deserialize)]
struct NodeList {
  items: Vec<NodeItem>,
}

#[derive(Deserialize)]
struct NodeItem {
  metadata: NodeMetadata,
}

#[derive(Deserialize)]
struct NodeMetadata {
  name: String,
  #[serde(default)]
  annotations: BTreeMap<String, String>,
  #[serde(default)]
  labels: BTreeMap<String, String>,
}

fn parse_nodes_info(dir: &ArtifactDir<'_>) -> Result<Option<BTreeMap<String, NodeInfo>>> {
  let content = dir
    .role_path(CLUSTER_CAPTURE_ENV_DIR, "nodes.json")
    .and_then(|path| dir.read_to_string(path))
    .or_absent()?;
  let Some(content) = content else {
    return Ok(None);
  };

  let node_list: NodeList = serde_json::from_str(&content).context("Failed to parse nodes.json")?;

  let nodes_info = node_list
    .items
    .into_iter()
    .map(|node| {
      let NodeMetadata {
        name,
        annotations,
        labels,
      } = node.metadata;

      let control_plane = labels.contains_key("node-role.kubernetes.io/control-plane")
        || labels.contains_key("node-role.kubernetes.io/master");

      let info = NodeInfo {
        name: name.clone(),
        managed: annotations.contains_key("managed.openshift.com/customlabels"),
        instance_type: labels
          .get("node.kubernetes.io/instance-type")
          .cloned()
          .unwrap_or_else(|| "N/A".to_string()),
        control_plane,
        infra: !control_plane,
      };
      (name, info)
    })
    .collect();

  Ok(Some(nodes_info))
}

#[derive(Deserialize)]
struct OcpVersion {
  #[serde(rename = "openshiftVersion")]
  openshift_version: String,
}

fn parse_ocp_version(dir: &ArtifactDir<'_>) -> Result<Option<String>> {
  let content = dir
    .role_path(CLUSTER_CAPTURE_ENV_DIR, "ocp_version.yml")
    .and_then(|path| dir.read_to_string(path))
    .or_absent()?;
  let Some(content) = content else {
    return Ok(None);
  };

  let version: OcpVersion =
    serde_yaml::from_str(&content).context("Failed to parse ocp_version.yml")?;
  Ok(Some(version.openshift_version))
}

fn parse_start_end_time(dir: &ArtifactDir<'_>) -> Result<Option<StartEndTime>> {
  let content = dir
    .role_path(CLUSTER_CAPTURE_ENV_DIR, "_ansible.log")
    .and_then(|path| dir.read_to_string(path))
    .or_absent()?;
  let Some(content) = content else {
    return Ok(None);
  };

  let mut times = content
    .lines()
    .filter(|line| !line.trim().is_empty())
    .map(|line| {
      // ignore the milliseconds
      let time_str = line.split_once(',').map_or(line, |(time, _)| time);
      NaiveDateTime::parse_from_str(time_str.trim(), ANSIBLE_LOG_TIME_FMT)
        .map(|time| time.and_utc())
        .with_context(|| format!("Invalid Ansible log timestamp '{time_str}'"))
    });

  let Some(start) = times.next().transpose()? else {
    anyhow::bail!("Ansible log file is empty");
  };
  let end = times.last().transpose()?.unwrap_or(start);

  Ok(Some(StartEndTime { start, end }))
}

/// Where the artifacts are served from, which depends on how the process runs.
fn parse_local_env(dirname: &Path, generate: bool) -> LocalEnv {
  let mut from_local_env = LocalEnv::default();

  // not an artifact: written by the CI job that published the directory
  if let Ok(source_url) = fs::read_to_string(dirname.join("source_url")) {
    let source_url = source_url.trim().to_string();
    from_local_env.artifacts_basedir = Some(PathBuf::from(url_path(&source_url)));
    from_local_env.source_url = Some(source_url);
  }

  tracing::debug!(
    source_url = ?from_local_env.source_url,
    artifacts_basedir = ?from_local_env.artifacts_basedir,
    "Local environment"
  );

  if !generate {
    from_local_env.is_interactive = true;
    from_local_env.artifacts_basedir = Some(dirname.to_path_buf());
    return from_local_env;
  }

  let job_name = env::var("JOB_NAME_SAFE").unwrap_or_default();

  if job_name.ends_with("-plot") {
    if from_local_env.source_url.is_none() {
      tracing::warn!("The source URL should be available when running from '{}'", job_name);
      from_local_env.source_url = Some("/missing/source/url".to_string());
      from_local_env.artifacts_basedir = Some(dirname.to_path_buf());
    }
  } else if let Ok(artifact_dir) = env::var("ARTIFACT_DIR") {
    let dirname = std::path::absolute(dirname).unwrap_or_else(|_| dirname.to_path_buf());
    let artifact_dir = std::path::absolute(&artifact_dir).unwrap_or_else(|_| artifact_dir.into());
    let relative = pathdiff::diff_paths(dirname, artifact_dir);
    from_local_env.source_url = relative.as_ref().map(|path| path.display().to_string());
    from_local_env.artifacts_basedir = relative;
  } else {
    tracing::warn!(
      "Unknown execution environment: JOB_NAME_SAFE={} ARTIFACT_DIR unset",
      job_name
    );
    from_local_env.artifacts_basedir =
      Some(std::path::absolute(dirname).unwrap_or_else(|_| dirname.to_path_buf()));
  }

  from_local_env
}

/// The path component of `url` (`https://host/a/b` → `/a/b`).
fn url_path(url: &str) -> &str {
  let Some((_, rest)) = url.split_once("://") else {
    return url;
  };
  rest.find('/').map_or("/", |index| &rest[index..])
}
