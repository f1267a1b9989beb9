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

//! Validation of LTS payloads.
//!
//! A payload is first dumped to plain JSON (numbers, strings, booleans,
//! lists, maps, RFC 3339 timestamps), then checked three ways:
//!
//! 1. the declared field rules, reported by dotted path,
//! 2. typed deserialization back into the payload type,
//! 3. the cross-field checks registered on the [`Schema`].

use chrono::DateTime;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

use crate::error::SchemaError;
use crate::matrix::ImportSettings;

/// Plain-data type a field must have once dumped to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlainKind {
  String,
  Number,
  Integer,
  Bool,
  List,
  Map,
  /// An RFC 3339 string.
  Timestamp,
  Any,
}

impl PlainKind {
  fn accepts(self, value: &Value) -> bool {
    match self {
      PlainKind::String => value.is_string(),
      PlainKind::Number => value.is_number(),
      PlainKind::Integer => value.is_i64() || value.is_u64(),
      PlainKind::Bool => value.is_boolean(),
      PlainKind::List => value.is_array(),
      PlainKind::Map => value.is_object(),
      PlainKind::Timestamp => value
        .as_str()
        .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
      PlainKind::Any => true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
  /// Dotted path; `*` walks every element of a list or value of a map.
  pub path: String,
  pub kind: PlainKind,
  pub required: bool,
}

/// One reason a payload failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
  pub path: String,
  pub message: String,
}

impl SchemaViolation {
  pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
    SchemaViolation {
      path: path.into(),
      message: message.into(),
    }
  }
}

impl fmt::Display for SchemaViolation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.path, self.message)
  }
}

type CrossCheck<P> = Box<dyn Fn(&P) -> Vec<SchemaViolation> + Send + Sync>;

/// Shape an LTS payload of type `P` must satisfy.
pub struct Schema<P> {
  version: String,
  fields: Vec<FieldRule>,
  checks: Vec<CrossCheck<P>>,
}

impl<P> fmt::Debug for Schema<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Schema")
      .field("version", &self.version)
      .field("fields", &self.fields)
      .field("checks", &self.checks.len())
      .finish()
  }
}

impl<P> Schema<P> {
  pub fn new(version: impl Into<String>) -> Self {
    Schema {
      version: version.into(),
      fields: Vec::new(),
      checks: Vec::new(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn fields(&self) -> &[FieldRule] {
    &self.fields
  }

  pub fn required(mut self, path: impl Into<String>, kind: PlainKind) -> Self {
    self.fields.push(FieldRule {
      path: path.into(),
      kind,
      required: true,
    });
    self
  }

  pub fn optional(mut self, path: impl Into<String>, kind: PlainKind) -> Self {
    self.fields.push(FieldRule {
      path: path.into(),
      kind,
      required: false,
    });
    self
  }

  /// Registers an invariant the field rules cannot express, e.g. "enum-like
  /// string must be one of N values".
  pub fn check<F>(mut self, check: F) -> Self
  where
    F: Fn(&P) -> Vec<SchemaViolation> + Send + Sync + 'static,
  {
    self.checks.push(Box::new(check));
    self
  }
}

impl<P: Serialize + DeserializeOwned> Schema<P> {
  /// Returns every violation of `payload`, or the dump error.
  pub fn violations(&self, payload: &P) -> Result<Vec<SchemaViolation>, SchemaError> {
    let plain = to_plain_data(payload)?;

    let mut violations = Vec::new();
    for rule in &self.fields {
      check_rule(&plain, rule, &mut violations);
    }

    match serde_json::from_value::<P>(plain) {
      Ok(reparsed) => {
        for check in &self.checks {
          violations.extend(check(&reparsed));
        }
      }
      Err(e) => violations.push(SchemaViolation::new("$", e.to_string())),
    }

    Ok(violations)
  }

  /// Validates `payload`.
  ///
  /// With `reraise`, any failure is returned as an error (final export stage).
  /// Otherwise it is logged as a warning and `Ok(false)` is returned, so an
  /// unvalidated payload stays usable.
  pub fn validate(
    &self,
    payload: &P,
    import_settings: &ImportSettings,
    reraise: bool,
  ) -> Result<bool, SchemaError> {
    let violations = match self.violations(payload) {
      Ok(violations) => violations,
      Err(e) => {
        tracing::error!(error = %e, "Couldn't dump the lts_payload into JSON");
        return if reraise { Err(e) } else { Ok(false) };
      }
    };

    if violations.is_empty() {
      return Ok(true);
    }

    let settings = serde_json::to_string(import_settings).unwrap_or_default();

    if reraise {
      tracing::error!("lts-error: Failed to validate the generated LTS payload against the model");
      tracing::error!("lts-error: entry settings: {}", settings);
      return Err(SchemaError::Violations {
        schema_version: self.version.clone(),
        settings,
        violations,
      });
    }

    tracing::warn!("lts-error: Failed to validate the generated LTS payload against the model");
    tracing::warn!("lts-error: entry settings: {}", settings);
    for violation in &violations {
      tracing::warn!("lts-error: validation issue: {}", violation);
    }

    Ok(false)
  }
}

/// Dumps `payload` to JSON text and reads it back, so only plain data remains.
fn to_plain_data<P: Serialize>(payload: &P) -> Result<Value, SchemaError> {
  let json = serde_json::to_string(payload).map_err(SchemaError::Dump)?;
  serde_json::from_str(&json).map_err(SchemaError::Dump)
}

fn check_rule(plain: &Value, rule: &FieldRule, violations: &mut Vec<SchemaViolation>) {
  let segments: Vec<&str> = rule.path.split('.').collect();
  walk(plain, &segments, String::new(), rule, violations);
}

fn walk(
  value: &Value,
  segments: &[&str],
  at: String,
  rule: &FieldRule,
  violations: &mut Vec<SchemaViolation>,
) {
  let Some((segment, rest)) = segments.split_first() else {
    check_leaf(value, &at, rule, violations);
    return;
  };

  if *segment == "*" {
    match value {
      Value::Array(items) => {
        for (index, item) in items.iter().enumerate() {
          walk(item, rest, child_path(&at, &index.to_string()), rule, violations);
        }
      }
      Value::Object(map) => {
        for (key, item) in map {
          walk(item, rest, child_path(&at, key), rule, violations);
        }
      }
      Value::Null if !rule.required => {}
      _ => violations.push(SchemaViolation::new(
        child_path(&at, "*"),
        "expected a list or a map",
      )),
    }
    return;
  }

  match value.get(*segment) {
    Some(child) => walk(child, rest, child_path(&at, segment), rule, violations),
    None if rule.required => {
      violations.push(SchemaViolation::new(child_path(&at, segment), "field required"));
    }
    None => {}
  }
}

fn child_path(at: &str, key: &str) -> String {
  if at.is_empty() {
    key.to_string()
  } else {
    format!("{at}.{key}")
  }
}

fn check_leaf(value: &Value, at: &str, rule: &FieldRule, violations: &mut Vec<SchemaViolation>) {
  if value.is_null() {
    if rule.required {
      violations.push(SchemaViolation::new(at, "field required"));
    }
    return;
  }

  if !rule.kind.accepts(value) {
    violations.push(SchemaViolation::new(
      at,
      format!("expected {:?}, got {}", rule.kind, value),
    ));
  }
}
