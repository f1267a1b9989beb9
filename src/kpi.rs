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

//! Named KPI functions evaluated over an LTS payload.
//!
//! A failing KPI (an `Err` or a panic) is logged and recorded with a `null`
//! value; its siblings are still evaluated.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;

/// Labels merged into every KPI record (settings, `@timestamp`, `test_uuid`).
pub type KpiLabels = BTreeMap<String, Value>;

/// Keys owned by [`KpiRecord`] itself; labels with these names are dropped.
const RECORD_FIELDS: [&str; 4] = ["help", "unit", "polarity", "value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
  LowerBetter,
  HigherBetter,
}

type ComputeFn<P> = Box<dyn Fn(&P) -> anyhow::Result<Value> + Send + Sync>;

pub struct KpiDefinition<P> {
  pub name: String,
  pub help: String,
  pub unit: String,
  pub polarity: Polarity,
  compute: ComputeFn<P>,
}

impl<P> KpiDefinition<P> {
  pub fn new<F, V>(
    name: impl Into<String>,
    help: impl Into<String>,
    unit: impl Into<String>,
    polarity: Polarity,
    compute: F,
  ) -> Self
  where
    F: Fn(&P) -> anyhow::Result<V> + Send + Sync + 'static,
    V: Serialize,
  {
    KpiDefinition {
      name: name.into(),
      help: help.into(),
      unit: unit.into(),
      polarity,
      compute: Box::new(move |payload: &P| Ok(serde_json::to_value(compute(payload)?)?)),
    }
  }

  fn evaluate(&self, payload: &P) -> Option<Value> {
    match catch_unwind(AssertUnwindSafe(|| (self.compute)(payload))) {
      Ok(Ok(value)) => Some(value),
      Ok(Err(e)) => {
        tracing::error!(kpi = %self.name, error = %e, "Failed to generate KPI");
        None
      }
      Err(_) => {
        tracing::error!(kpi = %self.name, "KPI function panicked");
        None
      }
    }
  }
}

impl<P> fmt::Debug for KpiDefinition<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KpiDefinition")
      .field("name", &self.name)
      .field("unit", &self.unit)
      .field("polarity", &self.polarity)
      .finish_non_exhaustive()
  }
}

/// One computed KPI, labelled with the settings it was measured under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRecord {
  pub help: String,
  pub unit: String,
  pub polarity: Polarity,
  pub value: Option<Value>,
  #[serde(flatten)]
  pub labels: KpiLabels,
}

/// KPI definitions of one workload, in registration order.
pub struct KpiRegistry<P> {
  definitions: Vec<KpiDefinition<P>>,
}

impl<P> Default for KpiRegistry<P> {
  fn default() -> Self {
    KpiRegistry {
      definitions: Vec::new(),
    }
  }
}

impl<P> fmt::Debug for KpiRegistry<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(&self.definitions).finish()
  }
}

impl<P> KpiRegistry<P> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(mut self, definition: KpiDefinition<P>) -> Self {
    if self.definitions.iter().any(|d| d.name == definition.name) {
      tracing::warn!(kpi = %definition.name, "KPI registered twice, replacing the first definition");
      self.definitions.retain(|d| d.name != definition.name);
    }
    self.definitions.push(definition);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.definitions.is_empty()
  }

  pub fn len(&self) -> usize {
    self.definitions.len()
  }

  pub fn definitions(&self) -> impl Iterator<Item = &KpiDefinition<P>> {
    self.definitions.iter()
  }

  /// Evaluates every definition over `payload` and labels the records with
  /// `label_fn(payload)`.
  pub fn generate<F>(&self, payload: &P, label_fn: F) -> BTreeMap<String, KpiRecord>
  where
    F: FnOnce(&P) -> KpiLabels,
  {
    let labels: KpiLabels = label_fn(payload)
      .into_iter()
      .filter(|(key, _)| {
        let clashes = RECORD_FIELDS.contains(&key.as_str());
        if clashes {
          tracing::debug!(label = %key, "Dropping KPI label clashing with a record field");
        }
        !clashes
      })
      .collect();

    self
      .definitions
      .iter()
      .map(|definition| {
        let record = KpiRecord {
          help: definition.help.clone(),
          unit: definition.unit.clone(),
          polarity: definition.polarity,
          value: definition.evaluate(payload),
          labels: labels.clone(),
        };
        (definition.name.clone(), record)
      })
      .collect()
  }
}
