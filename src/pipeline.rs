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

//! The per-directory parse/cache state machine.
//!
//! ```text
//! RESOLVE_ROLES → CACHE_CHECK ─┬─ hit ──→ LOAD_CACHE → POST_CACHE_HOOK → PARSE_ALWAYS → BUILD_LTS
//!                              └─ miss ─→ PARSE_ONCE → PARSE_ALWAYS → BUILD_LTS
//!                                         → PRE_CACHE_HOOK → PERSIST_CACHE → POST_CACHE_HOOK
//! ```
//!
//! `parse_once` reads the artifacts and is skipped on a cache hit.
//! `parse_always` depends on the process environment and runs on every pass.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache;
use crate::cache::CacheLookup;
use crate::cache::Fingerprint;
use crate::config::EngineConfig;
use crate::declaration::WorkloadDecl;
use crate::error::ConfigError;
use crate::error::StoreError;
use crate::locator::ArtifactDir;
use crate::locator::ArtifactLocator;
use crate::lts;
use crate::lts::LtsBuilder;
use crate::lts::Payload;
use crate::matrix::ImportSettings;

/// A workload plugged into the engine.
pub trait Workload: Send + Sync + 'static {
  /// The parsed result. Fields that must not be cached are `#[serde(skip)]`
  /// and rebuilt in [`Workload::after_cache`].
  type Results: Serialize + DeserializeOwned + Send + 'static;

  /// LTS payload construction; use [`lts::NoLts`] when there is none.
  type Lts: LtsBuilder<Results = Self::Results>;

  fn declaration(&self) -> &WorkloadDecl;

  /// Expensive, artifact-reading phase. Skipped when a valid cache exists.
  fn parse_once(&self, dir: &ArtifactDir<'_>) -> anyhow::Result<Self::Results>;

  /// Environment-dependent phase, run on every pass.
  fn parse_always(
    &self,
    results: &mut Self::Results,
    dir: &ArtifactDir<'_>,
    import_settings: &ImportSettings,
  ) -> anyhow::Result<()>;

  /// Strips what should not be written to the cache.
  fn before_cache(&self, _results: &mut Self::Results) {}

  /// Rebuilds derived fields after a cache write or load.
  fn after_cache(&self, _results: &mut Self::Results) {}

  fn lts(&self) -> Option<&Self::Lts> {
    None
  }

  /// Normalizes import settings before they key the matrix.
  fn rewrite_settings(&self, settings: ImportSettings) -> ImportSettings {
    settings
  }
}

/// LTS payload type of workload `W`.
pub type WorkloadPayload<W> = Payload<<W as Workload>::Lts>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  ResolveRoles,
  CacheCheck,
  LoadCache,
  ParseOnce,
  ParseAlways,
  BuildLts,
  PreCacheHook,
  PersistCache,
  PostCacheHook,
  Done,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::ResolveRoles => "RESOLVE_ROLES",
      Stage::CacheCheck => "CACHE_CHECK",
      Stage::LoadCache => "LOAD_CACHE",
      Stage::ParseOnce => "PARSE_ONCE",
      Stage::ParseAlways => "PARSE_ALWAYS",
      Stage::BuildLts => "BUILD_LTS",
      Stage::PreCacheHook => "PRE_CACHE_HOOK",
      Stage::PersistCache => "PERSIST_CACHE",
      Stage::PostCacheHook => "POST_CACHE_HOOK",
      Stage::Done => "DONE",
    };
    f.write_str(name)
  }
}

/// How the results of a directory were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
  /// Loaded from the cache file.
  Hit,
  /// No usable cache; parsed and written.
  Miss,
  /// Caching disabled for this process; parsed and written.
  Bypassed,
}

/// Everything the engine produced for one results directory.
pub struct ProcessedDirectory<W: Workload> {
  pub location: PathBuf,
  pub import_settings: ImportSettings,
  pub exit_code: Option<i32>,
  pub results: W::Results,
  pub lts: Option<WorkloadPayload<W>>,
  /// Whether `lts` passed validation.
  pub lts_valid: bool,
  pub files_read: Vec<PathBuf>,
  pub cache: CacheOutcome,
}

/// Runs workload `W` over results directories.
pub struct Pipeline<W: Workload> {
  workload: Arc<W>,
  locator: Arc<ArtifactLocator>,
  config: EngineConfig,
}

impl<W: Workload> Clone for Pipeline<W> {
  fn clone(&self) -> Self {
    Pipeline {
      workload: Arc::clone(&self.workload),
      locator: Arc::clone(&self.locator),
      config: self.config.clone(),
    }
  }
}

fn transition(stage: Stage) {
  tracing::debug!(%stage, "Pipeline stage");
}

impl<W: Workload> Pipeline<W> {
  pub fn new(workload: Arc<W>, config: EngineConfig) -> Result<Self, ConfigError> {
    let locator = ArtifactLocator::new(workload.declaration())?;

    Ok(Pipeline {
      workload,
      locator: Arc::new(locator),
      config,
    })
  }

  pub fn workload(&self) -> &W {
    &self.workload
  }

  pub fn workload_arc(&self) -> &Arc<W> {
    &self.workload
  }

  pub fn locator(&self) -> &ArtifactLocator {
    &self.locator
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  fn cache_path(&self, dir: &Path) -> PathBuf {
    dir.join(self.locator.classifier().cache_filename())
  }

  /// Processes one results directory.
  ///
  /// Parse failures abort this directory only and leave its cache untouched.
  pub fn process(
    &self,
    location: &Path,
    import_settings: ImportSettings,
    exit_code: Option<i32>,
  ) -> Result<ProcessedDirectory<W>, StoreError> {
    let span = tracing::info_span!("process", dir = %location.display());
    let _enter = span.enter();

    transition(Stage::ResolveRoles);
    let dir = self.locator.open(location);

    transition(Stage::CacheCheck);
    let fingerprint = self.fingerprint(location);
    let cached = if self.config.ignore_cache {
      None
    } else {
      transition(Stage::LoadCache);
      self.load_cache(location, fingerprint.as_ref())
    };

    if let Some(mut results) = cached {
      transition(Stage::PostCacheHook);
      self.workload.after_cache(&mut results);

      self.parse_always(&mut results, &dir, &import_settings)?;
      let (lts, lts_valid) = self.build_lts(location, &results, &import_settings, exit_code)?;

      transition(Stage::Done);
      return Ok(ProcessedDirectory {
        location: location.to_path_buf(),
        import_settings,
        exit_code,
        results,
        lts,
        lts_valid,
        files_read: dir.files_read(),
        cache: CacheOutcome::Hit,
      });
    }

    transition(Stage::ParseOnce);
    let mut results = self
      .workload
      .parse_once(&dir)
      .map_err(|e| StoreError::DirectoryParse {
        dir: location.to_path_buf(),
        stage: Stage::ParseOnce,
        source: e.into(),
      })?;

    self.parse_always(&mut results, &dir, &import_settings)?;
    let (lts, lts_valid) = self.build_lts(location, &results, &import_settings, exit_code)?;

    transition(Stage::PreCacheHook);
    self.workload.before_cache(&mut results);

    transition(Stage::PersistCache);
    self.persist_cache(location, fingerprint, &results);

    transition(Stage::PostCacheHook);
    self.workload.after_cache(&mut results);

    tracing::info!("parsing done");
    transition(Stage::Done);

    Ok(ProcessedDirectory {
      location: location.to_path_buf(),
      import_settings,
      exit_code,
      results,
      lts,
      lts_valid,
      files_read: dir.files_read(),
      cache: if self.config.ignore_cache {
        CacheOutcome::Bypassed
      } else {
        CacheOutcome::Miss
      },
    })
  }

  fn fingerprint(&self, location: &Path) -> Option<Fingerprint> {
    if !self.config.verify_fingerprint {
      return Some(Fingerprint::default());
    }

    match Fingerprint::compute(location, self.locator.classifier()) {
      Ok(fingerprint) => Some(fingerprint),
      Err(e) => {
        tracing::warn!(error = %e, "Cannot fingerprint the mandatory files, the cache will not be trusted");
        None
      }
    }
  }

  /// `None` sends the directory to `parse_once`.
  fn load_cache(&self, location: &Path, fingerprint: Option<&Fingerprint>) -> Option<W::Results> {
    let fingerprint = fingerprint?;
    let expected = self.config.verify_fingerprint.then_some(fingerprint);
    let path = self.cache_path(location);

    match cache::load::<W::Results>(&path, expected) {
      Ok(CacheLookup::Hit(results)) => {
        tracing::debug!(path = %path.display(), "Reloaded from the cache");
        Some(results)
      }
      Ok(CacheLookup::Missing) => None,
      Ok(CacheLookup::Stale(reason)) => {
        tracing::info!(path = %path.display(), reason, "Ignoring stale cache file");
        None
      }
      Err(e) => {
        tracing::error!(error = %e, "Could not reload the cache file, parsing the artifacts");
        None
      }
    }
  }

  fn persist_cache(&self, location: &Path, fingerprint: Option<Fingerprint>, results: &W::Results) {
    let path = self.cache_path(location);
    let fingerprint = fingerprint.unwrap_or_default();

    match cache::store(&path, fingerprint, results) {
      Ok(()) => tracing::debug!(path = %path.display(), "Cache file written"),
      Err(e) => tracing::warn!(error = %e, "Failed to write the cache file"),
    }
  }

  fn parse_always(
    &self,
    results: &mut W::Results,
    dir: &ArtifactDir<'_>,
    import_settings: &ImportSettings,
  ) -> Result<(), StoreError> {
    transition(Stage::ParseAlways);
    self
      .workload
      .parse_always(results, dir, import_settings)
      .map_err(|e| StoreError::DirectoryParse {
        dir: dir.path().to_path_buf(),
        stage: Stage::ParseAlways,
        source: e.into(),
      })
  }

  fn build_lts(
    &self,
    location: &Path,
    results: &W::Results,
    import_settings: &ImportSettings,
    exit_code: Option<i32>,
  ) -> Result<(Option<WorkloadPayload<W>>, bool), StoreError> {
    transition(Stage::BuildLts);
    let Some(builder) = self.workload.lts() else {
      return Ok((None, false));
    };

    let payload = lts::build(builder, results, import_settings, exit_code).map_err(|e| {
      StoreError::LtsBuild {
        dir: location.to_path_buf(),
        source: e.into(),
      }
    })?;

    let valid = builder.schema().validate(&payload, import_settings, false)?;

    Ok((Some(payload), valid))
  }
}
