// Copyright 2025 Sushanth (https://github.com/sushanthpy)
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

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragscore_evals::{
    Dispatch, EvaluationConfig, EvaluationRequest, InMemoryRecorder, Interaction,
    JsonFileRecorder, Orchestrator, ResultRecorder, SamplingController,
};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long shutdown waits for abandoned provider calls
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about = "Answer-quality evaluation for retrieval-augmented chat", long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true, env = "RAGSCORE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate interactions read as JSON Lines and print one record per line
    Evaluate {
        /// Input file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Also write one `<id>.json` record per interaction here
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print Prometheus metrics to stderr when done
        #[arg(long)]
        metrics: bool,

        /// Sample rate (overrides config file and environment)
        #[arg(long)]
        sample_rate: Option<f64>,

        /// Seed the sampler for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate configuration and resolve the backend, then exit
    CheckConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    match args.command {
        Command::Evaluate {
            input,
            output_dir,
            metrics,
            sample_rate,
            seed,
        } => {
            let config = load_config(args.config, sample_rate)?;

            let recorder: Arc<dyn ResultRecorder> = match output_dir {
                Some(dir) => Arc::new(JsonFileRecorder::new(dir)?),
                None => Arc::new(InMemoryRecorder::new()),
            };
            let mut builder = Orchestrator::builder(config.clone()).recorder(recorder);
            if let Some(seed) = seed {
                builder = builder.sampler(Arc::new(SamplingController::with_seed(
                    seed,
                    Duration::from_secs(config.decision_ttl_secs),
                )));
            }

            // Provider clients are blocking; resolve them before the runtime starts
            let engine = Arc::new(builder.build()?);
            let requests = read_requests(&input)?;

            let records = run_evaluations(Arc::clone(&engine), requests)?;

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for record in &records {
                serde_json::to_writer(&mut out, record)?;
                writeln!(out)?;
            }
            out.flush()?;

            if metrics {
                eprint!("{}", engine.metrics().render_prometheus()?);
            }
            tracing::info!(evaluated = records.len(), "Evaluation run finished");
            Ok(())
        }
        Command::CheckConfig => {
            let config = load_config(args.config, None)?;
            let engine = Orchestrator::from_config(config)?;
            println!("{}", serde_json::to_string_pretty(&redacted(engine.config()))?);
            println!("configuration OK");
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ragscore=info,ragscore_evals=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries the records
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// File > defaults, then environment, then command-line overrides
fn load_config(path: Option<PathBuf>, sample_rate: Option<f64>) -> Result<EvaluationConfig> {
    EvaluationConfig::load_with(path.clone(), |config| {
        if let Some(rate) = sample_rate {
            config.sample_rate = rate;
        }
    })
    .with_context(|| format!("invalid configuration ({:?})", path))
}

fn read_requests(input: &str) -> Result<Vec<EvaluationRequest>> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(input).with_context(|| format!("cannot open {}", input))?;
        Box::new(BufReader::new(file))
    };

    let mut requests = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("cannot read {}", input))?;
        if line.trim().is_empty() {
            continue;
        }
        let request: EvaluationRequest = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: not an interaction", input, index + 1))?;
        requests.push(request);
    }
    Ok(requests)
}

/// Evaluate on a fresh runtime. Shutdown does not wait for judge calls that
/// were abandoned on timeout and may still be running on the blocking pool.
fn run_evaluations(
    engine: Arc<Orchestrator>,
    requests: Vec<EvaluationRequest>,
) -> Result<Vec<Interaction>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let records = runtime.block_on(evaluate_all(engine, requests));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(records)
}

/// Evaluate concurrently, returning records in input order
async fn evaluate_all(engine: Arc<Orchestrator>, requests: Vec<EvaluationRequest>) -> Vec<Interaction> {
    let mut tasks = tokio::task::JoinSet::new();
    for (index, request) in requests.into_iter().enumerate() {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move {
            let record = match engine.dispatch(request).await {
                Dispatch::Completed(record) => Some(record),
                Dispatch::Detached(handle) => handle.await.ok(),
                Dispatch::Disabled => None,
            };
            (index, record)
        });
    }

    let mut finished = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Some(record))) => finished.push((index, record)),
            Ok((_, None)) => {}
            Err(e) => tracing::error!("Evaluation task failed: {}", e),
        }
    }
    if finished.is_empty() && !engine.config().evaluation_enabled {
        tracing::warn!("evaluation_enabled is false; nothing was evaluated");
    }

    finished.sort_by_key(|(index, _)| *index);
    finished.into_iter().map(|(_, record)| record).collect()
}

/// Copy of the configuration safe to print
fn redacted(config: &EvaluationConfig) -> EvaluationConfig {
    let mut config = config.clone();
    for provider in [
        &mut config.backends.openai,
        &mut config.backends.anthropic,
        &mut config.backends.ollama,
    ] {
        if provider.api_key.is_some() {
            provider.api_key = Some("<redacted>".to_string());
        }
    }
    config
}
