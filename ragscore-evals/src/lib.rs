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

//! # Ragscore answer-quality evaluation
//!
//! Scores every (query, response, contexts) triple of a retrieval-augmented
//! assistant on faithfulness, context precision and answer relevancy.
//!
//! - A deterministic heuristic scorer runs on 100% of traffic
//! - A sampled fraction is judged by an LLM, RAGAS style
//! - LLM verdicts are merged per metric over the heuristic fallback
//! - The orchestrator never fails: every path yields a complete record
//!
//! ## Example
//!
//! ```rust,ignore
//! use ragscore_evals::{EvaluationConfig, EvaluationRequest, Orchestrator};
//!
//! let config = EvaluationConfig::load(Some("ragscore.toml".into()))?;
//! // Builds blocking HTTP clients: do this before entering the runtime
//! let engine = Orchestrator::from_config(config)?;
//!
//! let record = runtime.block_on(engine.evaluate(EvaluationRequest::new(
//!     "conv-1/turn-4",
//!     "How do I configure routing?",
//!     "Routing is configured in settings.yaml.",
//!     vec!["Routing is configured in settings.yaml under the routing section.".into()],
//! )));
//! println!("overall = {:?}", record.scores.overall);
//! ```

use std::time::Duration;
use thiserror::Error;

pub mod backends;
pub mod config;
pub mod evaluators;
pub mod heuristic;
pub mod interaction;
pub mod llm_client;
pub mod metrics;
pub mod orchestrator;
pub mod recorder;
pub mod sampling;

pub use config::{EvaluationConfig, EvaluationMode, HeuristicConfig, UnavailablePolicy};
pub use heuristic::{HeuristicScorer, HeuristicScores};
pub use interaction::{
    EvaluationMethod, EvaluationOutcome, EvaluationRequest, Interaction, Metric, MetricSources,
    MetricWeights, QualityScores, ScoreSource, UserFeedback,
};
pub use llm_client::{BackendAdapter, GenerateOptions, LLMBackend, LLMError};
pub use metrics::EvaluationMetrics;
pub use orchestrator::{Dispatch, Orchestrator, OrchestratorBuilder};
pub use recorder::{InMemoryRecorder, JsonFileRecorder, ResultRecorder};
pub use sampling::{SamplingController, SamplingDecision};

/// Errors that can occur during evaluation
#[derive(Debug, Error)]
pub enum EvalError {
    /// Invalid configuration; raised at startup only
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Unparseable judge verdict
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task panicked: {0}")]
    Panic(String),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LLMError> for EvalError {
    fn from(e: LLMError) -> Self {
        EvalError::BackendUnavailable(e.to_string())
    }
}
