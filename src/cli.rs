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
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Parse, cache and export benchmark results directories")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Parse every results directory under ROOT, refreshing the caches.
  Parse(StoreArgs),

  /// Parse ROOT and print its validated LTS payloads, one JSON object per line.
  Export(StoreArgs),

  /// Classify files of a results directory (mandatory, important, cache, untracked).
  Classify {
    /// The results directory.
    dir: PathBuf,

    /// Files to classify, relative to DIR.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Workload declaration (TOML) replacing the built-in one.
    #[arg(long)]
    declaration: Option<PathBuf>,
  },
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
  /// Root of the results tree.
  pub root: PathBuf,

  /// Parse the artifacts even when a cache file exists.
  #[arg(long)]
  pub ignore_cache: bool,

  /// Number of directories parsed concurrently.
  #[arg(long, short = 'j')]
  pub jobs: Option<usize>,

  /// JSON file with engine settings.
  #[arg(long, env = "ARTSTORE_CONFIG")]
  pub config: Option<PathBuf>,

  /// Workload declaration (TOML) replacing the built-in one.
  #[arg(long)]
  pub declaration: Option<PathBuf>,
}
