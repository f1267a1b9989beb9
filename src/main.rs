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
use Commands::Classify;
use Commands::Export;
use Commands::Parse;
use anyhow::Result;
use artifact_store::cli::Cli;
use artifact_store::cli::Commands;
use artifact_store::cli::StoreArgs;
use artifact_store::config::EngineConfig;
use artifact_store::declaration::WorkloadDecl;
use artifact_store::driver::export_lts_payloads;
use artifact_store::driver::parse_results;
use artifact_store::locator::ArtifactLocator;
use artifact_store::logging::setup_tracing;
use artifact_store::pipeline::Pipeline;
use artifact_store::pipeline::Workload;
use artifact_store::workloads::skeleton::SkeletonWorkload;
use clap::Parser;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
  let _guard = setup_tracing()?;

  let Cli { command } = Cli::parse();
  let main_span = tracing::info_span!("artstore");
  let _enter = main_span.enter();

  let mut stdout = std::io::stdout().lock();

  match command {
    Parse(args) => {
      let pipeline = build_pipeline(&args, false)?;
      let matrix = parse_results(&args.root, pipeline).await?;

      for entry in matrix.iter() {
        let line = json!({
          "location": entry.location,
          "settings": entry.key.to_string(),
          "cache": entry.value.cache,
          "lts_valid": entry.value.lts_valid,
        });
        writeln!(stdout, "{line}")?;
      }
    }
    Export(args) => {
      let pipeline = build_pipeline(&args, true)?;
      let workload = Arc::clone(pipeline.workload_arc());
      let matrix = parse_results(&args.root, pipeline).await?;

      let exports = export_lts_payloads(workload.as_ref(), &matrix)?;
      for export in &exports {
        writeln!(stdout, "{}", serde_json::to_string(export.payload)?)?;
      }

      tracing::info!(count = exports.len(), "LTS payloads exported");
    }
    Classify {
      dir,
      files,
      declaration,
    } => {
      let workload = load_workload(declaration.as_deref(), false)?;
      let locator = ArtifactLocator::new(workload.declaration())?;

      for file in files {
        writeln!(stdout, "{}: {}", file.display(), locator.classify(&dir, &file))?;
      }
    }
  }

  Ok(())
}

fn load_workload(declaration: Option<&Path>, generate: bool) -> Result<SkeletonWorkload> {
  let workload = match declaration {
    Some(path) => SkeletonWorkload::with_declaration(WorkloadDecl::load(path)?, generate),
    None => SkeletonWorkload::new(generate)?,
  };

  Ok(workload)
}

fn build_pipeline(args: &StoreArgs, generate: bool) -> Result<Pipeline<SkeletonWorkload>> {
  let mut config = EngineConfig::load(args.config.as_deref())?;
  if args.ignore_cache {
    config.ignore_cache = true;
  }
  if let Some(jobs) = args.jobs {
    config.jobs = jobs;
  }
  config.generate |= generate;

  tracing::debug!(?config, "Engine configuration");

  let workload = load_workload(args.declaration.as_deref(), config.generate)?;
  Ok(Pipeline::new(Arc::new(workload), config)?)
}
