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

//! Interaction records and score types
//!
//! An [`Interaction`] is the unit of evaluation: one (query, response, contexts)
//! triple handed over by the retrieval pipeline, plus the scores produced for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three scored quality dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Faithfulness,
    ContextPrecision,
    AnswerRelevancy,
}

impl Metric {
    pub const ALL: [Metric; 3] = [
        Metric::Faithfulness,
        Metric::ContextPrecision,
        Metric::AnswerRelevancy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Faithfulness => "faithfulness",
            Metric::ContextPrecision => "context_precision",
            Metric::AnswerRelevancy => "answer_relevancy",
        }
    }

    pub fn parse(name: &str) -> Option<Metric> {
        match name.trim().to_ascii_lowercase().as_str() {
            "faithfulness" => Some(Metric::Faithfulness),
            "context_precision" => Some(Metric::ContextPrecision),
            "answer_relevancy" | "answer_relevance" => Some(Metric::AnswerRelevancy),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the final scores of an interaction were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMethod {
    Heuristic,
    Llm,
}

impl EvaluationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMethod::Heuristic => "heuristic",
            EvaluationMethod::Llm => "llm",
        }
    }
}

/// Terminal outcome of the orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// Not sampled for LLM evaluation
    HeuristicOnly,
    /// Every LLM metric produced a value (or was declared unsupported)
    Success,
    /// Some metrics fell back to the heuristic value
    PartialFailure,
    /// The LLM path exceeded its budget
    Timeout,
    /// The LLM path failed as a whole
    Failed,
}

impl EvaluationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationOutcome::HeuristicOnly => "heuristic_only",
            EvaluationOutcome::Success => "success",
            EvaluationOutcome::PartialFailure => "partial_failure",
            EvaluationOutcome::Timeout => "timeout",
            EvaluationOutcome::Failed => "failed",
        }
    }
}

/// Where a single metric value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Llm,
    Heuristic,
    Unavailable,
}

/// Scores for one interaction. `None` means the metric is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityScores {
    pub faithfulness: Option<f64>,
    pub context_precision: Option<f64>,
    pub answer_relevancy: Option<f64>,
    pub overall: Option<f64>,
}

impl QualityScores {
    /// Build scores from per-metric values, clamping each and recomputing `overall`.
    pub fn from_metrics(
        faithfulness: Option<f64>,
        context_precision: Option<f64>,
        answer_relevancy: Option<f64>,
        weights: &MetricWeights,
    ) -> Self {
        let mut scores = Self {
            faithfulness: faithfulness.map(clamp_score),
            context_precision: context_precision.map(clamp_score),
            answer_relevancy: answer_relevancy.map(clamp_score),
            overall: None,
        };
        scores.overall = scores.weighted_mean(weights);
        scores
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Faithfulness => self.faithfulness,
            Metric::ContextPrecision => self.context_precision,
            Metric::AnswerRelevancy => self.answer_relevancy,
        }
    }

    /// Weighted mean over the available metrics only.
    ///
    /// Unavailable metrics are dropped from both numerator and denominator.
    pub fn weighted_mean(&self, weights: &MetricWeights) -> Option<f64> {
        let mut sum = 0.0;
        let mut total_weight = 0.0;
        for metric in Metric::ALL {
            if let Some(value) = self.get(metric) {
                let w = weights.get(metric);
                sum += w * value;
                total_weight += w;
            }
        }
        if total_weight > 0.0 {
            Some(clamp_score(sum / total_weight))
        } else {
            None
        }
    }
}

/// Weights used to aggregate `overall`. Equal weights by default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricWeights {
    pub faithfulness: f64,
    pub context_precision: f64,
    pub answer_relevancy: f64,
}

impl MetricWeights {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Faithfulness => self.faithfulness,
            Metric::ContextPrecision => self.context_precision,
            Metric::AnswerRelevancy => self.answer_relevancy,
        }
    }
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            faithfulness: 1.0,
            context_precision: 1.0,
            answer_relevancy: 1.0,
        }
    }
}

/// Per-metric provenance of the final scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSources {
    pub faithfulness: ScoreSource,
    pub context_precision: ScoreSource,
    pub answer_relevancy: ScoreSource,
}

impl MetricSources {
    pub fn uniform(source: ScoreSource) -> Self {
        Self {
            faithfulness: source,
            context_precision: source,
            answer_relevancy: source,
        }
    }

    pub fn get(&self, metric: Metric) -> ScoreSource {
        match metric {
            Metric::Faithfulness => self.faithfulness,
            Metric::ContextPrecision => self.context_precision,
            Metric::AnswerRelevancy => self.answer_relevancy,
        }
    }

    pub fn set(&mut self, metric: Metric, source: ScoreSource) {
        match metric {
            Metric::Faithfulness => self.faithfulness = source,
            Metric::ContextPrecision => self.context_precision = source,
            Metric::AnswerRelevancy => self.answer_relevancy = source,
        }
    }
}

/// Input handed over by the retrieval pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Caller-assigned identifier
    pub id: String,
    pub query: String,
    pub response: String,
    /// Passages in retrieval rank order
    #[serde(default)]
    pub contexts: Vec<String>,
}

impl EvaluationRequest {
    pub fn new(
        id: impl Into<String>,
        query: impl Into<String>,
        response: impl Into<String>,
        contexts: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            response: response.into(),
            contexts,
        }
    }
}

/// Feedback attached after the record is written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeedback {
    pub rating: Option<i8>,
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// A fully evaluated interaction, as written to the result recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub query: String,
    pub response: String,
    pub contexts: Vec<String>,
    pub evaluation_method: EvaluationMethod,
    /// Only set when `evaluation_method` is `llm`
    pub backend_name: Option<String>,
    pub scores: QualityScores,
    pub sources: MetricSources,
    pub outcome: EvaluationOutcome,
    pub latency_ms: u64,
    /// Failure reason, only present on fallback
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    /// Append-only
    #[serde(default)]
    pub user_feedback: Vec<UserFeedback>,
}

/// Clamp to `[0, 1]`, mapping NaN to 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
