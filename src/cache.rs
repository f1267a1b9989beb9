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
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use crate::error::CacheError;
use crate::locator::FileClassifier;

/// Bumped whenever the envelope layout changes; older caches are re-parsed.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Size and modification time of one mandatory file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
  pub name: String,
  pub len: u64,
  pub modified_ns: Option<u128>,
}

/// Stamps of the mandatory files at the top of a results directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint(pub Vec<FileStamp>);

impl Fingerprint {
  pub fn compute(dir: &Path, classifier: &FileClassifier) -> std::io::Result<Self> {
    let mut stamps = Vec::new();

    for entry in fs::read_dir(dir)? {
      let entry = entry?;
      let path = entry.path();
      let name = PathBuf::from(entry.file_name());

      if !classifier.is_mandatory_file(&name) {
        continue;
      }

      let metadata = entry.metadata()?;
      if !metadata.is_file() {
        continue;
      }

      let modified_ns = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos());

      tracing::trace!(path = %path.display(), len = metadata.len(), "Fingerprinting");
      stamps.push(FileStamp {
        name: name.to_string_lossy().into_owned(),
        len: metadata.len(),
        modified_ns,
      });
    }

    stamps.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Fingerprint(stamps))
  }
}

/// What is actually written to the cache file.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEnvelope<R> {
  pub format_version: u32,
  pub fingerprint: Fingerprint,
  pub results: R,
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup<R> {
  Hit(R),
  Missing,
  Stale(&'static str),
}

/// Reads the cache envelope at `path`.
///
/// `expected` is `None` when fingerprints are not verified.
pub fn load<R: DeserializeOwned>(
  path: &Path,
  expected: Option<&Fingerprint>,
) -> Result<CacheLookup<R>, CacheError> {
  let content = match fs::read(path) {
    Ok(content) => content,
    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheLookup::Missing),
    Err(source) => {
      return Err(CacheError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  let envelope: CacheEnvelope<R> =
    serde_json::from_slice(&content).map_err(|source| CacheError::Decode {
      path: path.to_path_buf(),
      source,
    })?;

  if envelope.format_version != CACHE_FORMAT_VERSION {
    return Ok(CacheLookup::Stale("cache format version changed"));
  }

  if let Some(expected) = expected {
    if &envelope.fingerprint != expected {
      return Ok(CacheLookup::Stale("mandatory files changed since the cache was written"));
    }
  }

  Ok(CacheLookup::Hit(envelope.results))
}

/// Writes the envelope next to its final location, then renames it into place.
pub fn store<R: Serialize>(
  path: &Path,
  fingerprint: Fingerprint,
  results: &R,
) -> Result<(), CacheError> {
  let envelope = CacheEnvelope {
    format_version: CACHE_FORMAT_VERSION,
    fingerprint,
    results,
  };

  let json = serde_json::to_vec(&envelope).map_err(CacheError::Encode)?;

  let mut tmp_name = path.as_os_str().to_owned();
  tmp_name.push(format!(".tmp-{:08x}", rand::rng().next_u32()));
  let tmp_path = PathBuf::from(tmp_name);

  // a partial temp file is removed whichever step fails
  if let Err(source) = fs::write(&tmp_path, json).and_then(|()| fs::rename(&tmp_path, path)) {
    let _ = fs::remove_file(&tmp_path);
    return Err(CacheError::Write {
      path: path.to_path_buf(),
      source,
    });
  }

  Ok(())
}
