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

//! Long-term-storage payloads: `{metadata, results, kpis}`.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use uuid::Uuid;

use crate::kpi::KpiLabels;
use crate::kpi::KpiRecord;
use crate::kpi::KpiRegistry;
use crate::matrix::ImportSettings;
use crate::schema::Schema;

/// Format of the `@timestamp` KPI label.
pub const KPI_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata<S> {
  pub lts_schema_version: String,
  pub start: Option<DateTime<Utc>>,
  pub end: Option<DateTime<Utc>>,
  pub test_uuid: Option<Uuid>,
  #[serde(default)]
  pub exit_code: Option<i32>,
  #[serde(default)]
  pub presets: Vec<String>,
  /// The test configuration file, dumped as text.
  #[serde(default)]
  pub config: Option<String>,
  pub settings: S,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtsPayload<S, O> {
  pub metadata: Metadata<S>,
  pub results: O,
  #[serde(default)]
  pub kpis: BTreeMap<String, KpiRecord>,
}

/// Payload type produced by the builder `B`.
pub type Payload<B> = LtsPayload<<B as LtsBuilder>::Settings, <B as LtsBuilder>::Outcome>;

/// Workload-supplied construction of the LTS payload.
pub trait LtsBuilder: Send + Sync {
  /// The workload's parsed-result type.
  type Results;
  /// `metadata.settings`.
  type Settings: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
  /// `results`.
  type Outcome: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

  fn schema(&self) -> &Schema<Payload<Self>>;

  fn metadata(
    &self,
    results: &Self::Results,
    import_settings: &ImportSettings,
  ) -> anyhow::Result<Metadata<Self::Settings>>;

  fn results(&self, results: &Self::Results) -> anyhow::Result<Self::Outcome>;

  fn kpis(&self) -> &KpiRegistry<Payload<Self>>;

  fn kpi_labels(&self, payload: &Payload<Self>) -> KpiLabels {
    default_kpi_labels(payload)
  }
}

/// Builds the payload: metadata, then results, then KPIs, then the exit code.
pub fn build<B: LtsBuilder>(
  builder: &B,
  results: &B::Results,
  import_settings: &ImportSettings,
  exit_code: Option<i32>,
) -> anyhow::Result<Payload<B>> {
  let metadata = builder.metadata(results, import_settings)?;
  let outcome = builder.results(results)?;

  let mut payload = LtsPayload {
    metadata,
    results: outcome,
    kpis: BTreeMap::new(),
  };

  if !builder.kpis().is_empty() {
    payload.kpis = builder
      .kpis()
      .generate(&payload, |payload| builder.kpi_labels(payload));
  }

  payload.metadata.exit_code = exit_code;

  Ok(payload)
}

/// `metadata.settings` flattened, plus `@timestamp` and `test_uuid`.
pub fn default_kpi_labels<S: Serialize, O>(payload: &LtsPayload<S, O>) -> KpiLabels {
  let mut labels: KpiLabels = match serde_json::to_value(&payload.metadata.settings) {
    Ok(Value::Object(map)) => map.into_iter().collect(),
    _ => KpiLabels::new(),
  };

  labels.insert(
    "@timestamp".to_string(),
    payload
      .metadata
      .start
      .map(|start| start.format(KPI_TIMESTAMP_FORMAT).to_string())
      .into(),
  );
  labels.insert(
    "test_uuid".to_string(),
    payload.metadata.test_uuid.map(|uuid| uuid.to_string()).into(),
  );

  labels
}

/// Builder of workloads that declare no LTS schema; never invoked.
pub struct NoLts<R> {
  schema: Schema<LtsPayload<(), ()>>,
  kpis: KpiRegistry<LtsPayload<(), ()>>,
  _results: PhantomData<fn() -> R>,
}

impl<R> Default for NoLts<R> {
  fn default() -> Self {
    NoLts {
      schema: Schema::new("none"),
      kpis: KpiRegistry::new(),
      _results: PhantomData,
    }
  }
}

impl<R> LtsBuilder for NoLts<R> {
  type Results = R;
  type Settings = ();
  type Outcome = ();

  fn schema(&self) -> &Schema<Payload<Self>> {
    &self.schema
  }

  fn metadata(&self, _results: &R, _import_settings: &ImportSettings) -> anyhow::Result<Metadata<()>> {
    anyhow::bail!("This workload defines no LTS payload")
  }

  fn results(&self, _results: &R) -> anyhow::Result<()> {
    anyhow::bail!("This workload defines no LTS payload")
  }

  fn kpis(&self) -> &KpiRegistry<Payload<Self>> {
    &self.kpis
  }
}
