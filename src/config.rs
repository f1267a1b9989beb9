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
use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Json;
use figment::providers::Serialized;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use std::path::Path;

use crate::error::ConfigError;

/// Process-wide switch forcing every directory to be re-parsed.
pub const IGNORE_CACHE_ENV: &str = "MATBENCH_STORE_IGNORE_CACHE";

/// Prefix of the environment variables overriding [`EngineConfig`] fields.
pub const ENV_PREFIX: &str = "ARTSTORE_";

/// Engine settings, resolved once per process and passed down by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
  /// Skip cache lookups; every directory goes through `parse_once`.
  #[serde(deserialize_with = "deserialize_flag")]
  pub ignore_cache: bool,

  /// Treat a cache as stale when the mandatory files changed since it was written.
  #[serde(deserialize_with = "deserialize_flag")]
  pub verify_fingerprint: bool,

  /// Number of directories parsed concurrently.
  pub jobs: usize,

  /// Running in "generate" (report export) mode rather than interactively.
  #[serde(deserialize_with = "deserialize_flag")]
  pub generate: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      ignore_cache: false,
      verify_fingerprint: true,
      jobs: 1,
      generate: false,
    }
  }
}

impl EngineConfig {
  /// Layers defaults, an optional JSON file, `ARTSTORE_*` variables and
  /// finally `MATBENCH_STORE_IGNORE_CACHE`.
  pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(path) = config_file {
      figment = figment.merge(Json::file(path));
    }

    let config: EngineConfig = figment
      .merge(Env::prefixed(ENV_PREFIX))
      .merge(
        Env::raw()
          .only(&[IGNORE_CACHE_ENV])
          .map(|_| "ignore_cache".into()),
      )
      .extract()
      .map_err(Box::new)?;

    if config.ignore_cache {
      tracing::info!("{} is set, not processing the cache files.", IGNORE_CACHE_ENV);
    }

    Ok(config)
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
  Bool(bool),
  Int(i64),
  Text(String),
}

/// Accepts booleans as well as the `yes`/`y`/`true`/`True` spellings used by CI jobs.
/// Any other value, numbers included, leaves the flag off.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Flag::deserialize(deserializer)? {
    Flag::Bool(value) => value,
    Flag::Int(_) => false,
    Flag::Text(value) => matches!(value.as_str(), "yes" | "y" | "true" | "True"),
  })
}
