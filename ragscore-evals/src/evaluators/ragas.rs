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

//! RAGAS-style LLM-as-judge evaluation
//!
//! Each metric is judged by `samples_per_metric` independent calls. A call
//! whose verdict does not parse is dropped; the metric is the mean of the calls
//! that parsed. All calls of an interaction run concurrently.

use crate::interaction::{EvaluationRequest, Metric};
use crate::llm_client::{BackendAdapter, GenerateOptions};
use crate::EvalError;
use futures::future::join_all;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Outcome of judging one metric
#[derive(Debug, Clone, PartialEq)]
pub enum MetricVerdict {
    /// Mean of the parsed samples
    Scored {
        value: f64,
        samples: usize,
        dropped: usize,
    },
    /// No sample parsed; the caller substitutes the heuristic value
    Unparsed { attempts: usize },
    /// The backend declared the metric unsupported; no call was made
    Unavailable,
}

/// Per-metric verdicts of one LLM-backed evaluation
#[derive(Debug, Clone)]
pub struct LlmEvaluation {
    pub backend_name: String,
    pub model: String,
    pub faithfulness: MetricVerdict,
    pub context_precision: MetricVerdict,
    pub answer_relevancy: MetricVerdict,
    pub calls_attempted: usize,
    /// Calls that failed at the backend (network, auth, rate limit)
    pub calls_failed: usize,
    /// Calls that returned text that did not parse
    pub calls_unparsed: usize,
    pub last_error: Option<String>,
}

impl LlmEvaluation {
    pub fn get(&self, metric: Metric) -> &MetricVerdict {
        match metric {
            Metric::Faithfulness => &self.faithfulness,
            Metric::ContextPrecision => &self.context_precision,
            Metric::AnswerRelevancy => &self.answer_relevancy,
        }
    }

    /// Every attempted call failed at the backend
    pub fn backend_down(&self) -> bool {
        self.calls_attempted > 0 && self.calls_failed == self.calls_attempted
    }
}

/// RAGAS evaluator for RAG interactions
pub struct RagasEvaluator {
    adapter: BackendAdapter,
    samples_per_metric: usize,
    temperature: f64,
    max_tokens: u32,
}

impl RagasEvaluator {
    pub fn new(adapter: BackendAdapter, samples_per_metric: usize) -> Self {
        Self {
            adapter,
            samples_per_metric: samples_per_metric.max(1),
            temperature: 0.7,
            max_tokens: 512,
        }
    }

    /// Non-zero temperature keeps repeated samples independent
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.adapter.name()
    }

    /// Judge all three metrics.
    ///
    /// `guard` is cloned into every provider call and released when the last
    /// call returns, even if this future is dropped first.
    pub async fn evaluate<G>(&self, request: &EvaluationRequest, guard: Arc<G>) -> LlmEvaluation
    where
        G: Send + Sync + 'static,
    {
        let options = GenerateOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_mode: true,
        };

        let mut calls = Vec::new();
        for metric in Metric::ALL {
            if !self.adapter.supports_metric(metric) {
                debug!(
                    interaction_id = %request.id,
                    backend = self.adapter.name(),
                    %metric,
                    "Metric unsupported by backend"
                );
                continue;
            }
            let prompt = prompt_for(metric, request);
            for _ in 0..self.samples_per_metric {
                let adapter = self.adapter.clone();
                let prompt = prompt.clone();
                let options = options.clone();
                let guard = Arc::clone(&guard);
                calls.push(async move {
                    let result = adapter.generate_guarded(prompt, options, guard).await;
                    (metric, result)
                });
            }
        }

        let calls_attempted = calls.len();
        let results = join_all(calls).await;

        let mut samples: [Vec<f64>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let mut attempts = [0usize; 3];
        let mut calls_failed = 0;
        let mut calls_unparsed = 0;
        let mut last_error = None;

        for (metric, result) in results {
            let slot = metric_index(metric);
            attempts[slot] += 1;
            match result.map_err(EvalError::from).and_then(|text| parse_verdict(&text)) {
                Ok(score) => samples[slot].push(score),
                Err(EvalError::Parse(msg)) => {
                    calls_unparsed += 1;
                    debug!(interaction_id = %request.id, %metric, "Dropping unparsed verdict: {}", msg);
                }
                Err(e) => {
                    calls_failed += 1;
                    warn!(
                        interaction_id = %request.id,
                        backend = self.adapter.name(),
                        %metric,
                        "Judge call failed: {}",
                        e
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        let verdict = |metric: Metric| {
            let slot = metric_index(metric);
            if !self.adapter.supports_metric(metric) {
                return MetricVerdict::Unavailable;
            }
            let parsed = &samples[slot];
            if parsed.is_empty() {
                MetricVerdict::Unparsed {
                    attempts: attempts[slot],
                }
            } else {
                MetricVerdict::Scored {
                    value: parsed.iter().sum::<f64>() / parsed.len() as f64,
                    samples: parsed.len(),
                    dropped: attempts[slot] - parsed.len(),
                }
            }
        };

        LlmEvaluation {
            backend_name: self.adapter.name().to_string(),
            model: self.adapter.model_name().to_string(),
            faithfulness: verdict(Metric::Faithfulness),
            context_precision: verdict(Metric::ContextPrecision),
            answer_relevancy: verdict(Metric::AnswerRelevancy),
            calls_attempted,
            calls_failed,
            calls_unparsed,
            last_error,
        }
    }
}

fn metric_index(metric: Metric) -> usize {
    match metric {
        Metric::Faithfulness => 0,
        Metric::ContextPrecision => 1,
        Metric::AnswerRelevancy => 2,
    }
}

/// Parse a judge verdict into a score in `[0, 1]`.
///
/// Accepts a JSON object with a numeric `score` (possibly wrapped in prose or a
/// code fence), or a bare `score: 0.7` line. Anything out of range is rejected
/// rather than clamped, since it usually means the judge used another scale.
pub fn parse_verdict(text: &str) -> Result<f64, EvalError> {
    static JSON_OBJECT: OnceLock<Regex> = OnceLock::new();
    static SCORE_LINE: OnceLock<Regex> = OnceLock::new();

    let trimmed = text.trim();

    let from_json = serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .or_else(|| {
            let re = JSON_OBJECT.get_or_init(|| {
                Regex::new(r"(?s)\{.*\}").expect("JSON object pattern is valid")
            });
            re.find(trimmed)
                .and_then(|m| serde_json::from_str::<serde_json::Value>(m.as_str()).ok())
        })
        .and_then(|json| score_field(&json));

    let score = match from_json {
        Some(score) => score,
        None => {
            let re = SCORE_LINE.get_or_init(|| {
                Regex::new(r#"(?i)"?score"?\s*[:=]\s*"?(-?[0-9]*\.?[0-9]+)"#)
                    .expect("score pattern is valid")
            });
            re.captures(trimmed)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .ok_or_else(|| EvalError::Parse(format!("no score in verdict: {:.80}", trimmed)))?
        }
    };

    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(EvalError::Parse(format!("score {} outside [0, 1]", score)));
    }
    Ok(score)
}

fn score_field(json: &serde_json::Value) -> Option<f64> {
    let value = json.get("score")?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn prompt_for(metric: Metric, request: &EvaluationRequest) -> String {
    match metric {
        Metric::Faithfulness => faithfulness_prompt(&request.contexts, &request.response),
        Metric::ContextPrecision => context_precision_prompt(&request.query, &request.contexts),
        Metric::AnswerRelevancy => answer_relevancy_prompt(&request.query, &request.response),
    }
}

fn format_contexts(contexts: &[String]) -> String {
    if contexts.is_empty() {
        return "(no context retrieved)".to_string();
    }
    contexts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[Chunk {}]: {}", i, c))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn faithfulness_prompt(contexts: &[String], answer: &str) -> String {
    format!(
        r#"Evaluate if the answer is faithful to the context (no hallucinations).

CONTEXT:
{context}

ANSWER:
{answer}

Extract the claims made by the answer and check each one against the context.
The score is the fraction of claims supported by the context. An answer that
declines to answer makes no supported claims.

Respond in JSON:
{{
  "supported_claims": <integer>,
  "total_claims": <integer>,
  "score": <float 0-1>
}}"#,
        context = format_contexts(contexts),
        answer = answer
    )
}

fn context_precision_prompt(question: &str, contexts: &[String]) -> String {
    format!(
        r#"Evaluate the precision of the retrieved context for answering the question.

QUESTION:
{question}

RETRIEVED CONTEXT (in rank order):
{context}

For each chunk, decide whether it is relevant to the question. Relevant chunks
ranked higher should count more than relevant chunks ranked lower.

Respond in JSON:
{{
  "relevant_chunks": [<indices of relevant chunks>],
  "score": <float 0-1>
}}"#,
        question = question,
        context = format_contexts(contexts)
    )
}

fn answer_relevancy_prompt(question: &str, answer: &str) -> String {
    format!(
        r#"Evaluate how relevant the answer is to the question.

QUESTION:
{question}

ANSWER:
{answer}

Determine:
1. Does the answer directly address the question?
2. Is the answer complete?
3. Is there unnecessary or evasive content?

Respond in JSON:
{{
  "addresses_question": <boolean>,
  "is_complete": <boolean>,
  "score": <float 0-1>
}}"#,
        question = question,
        answer = answer
    )
}
