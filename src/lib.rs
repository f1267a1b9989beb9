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

//! # Artifact Store
//!
//! `artifact-store` turns trees of benchmark results directories into a
//! matrix of parsed results keyed by their import settings. Each directory is
//! parsed by a pluggable [`pipeline::Workload`], cached next to its artifacts,
//! and optionally turned into a validated long-term-storage (LTS) payload
//! carrying KPIs.
//!
//! ## Core Modules
//!
//! * [`declaration`]: The static `WorkloadDecl` (important files, artifact
//!   roles, cache file name), usually loaded from TOML.
//! * [`locator`]: Resolves artifact roles, classifies files, and audits the
//!   reads of the parse functions.
//! * [`cache`]: The per-directory cache file and its freshness fingerprint.
//! * [`pipeline`]: The per-directory parse/cache state machine.
//! * [`lts`], [`kpi`], [`schema`]: LTS payload construction, KPI evaluation
//!   and payload validation.
//! * [`matrix`]: The settings-keyed result matrix.
//! * [`driver`]: Walks a results tree and fills a matrix; exports payloads.
//! * [`workloads`]: Workloads shipped with the engine.
//! * [`cli`], [`config`], [`error`], [`logging`]: The `artstore` CLI, engine
//!   configuration, error types and the `setup_tracing` utility.

pub mod cache;
pub mod cli;
pub mod config;
pub mod declaration;
pub mod driver;
pub mod error;
pub mod kpi;
pub mod locator;
pub mod logging;
pub mod lts;
pub mod matrix;
pub mod pipeline;
pub mod schema;
pub mod workloads;
