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

//! Evaluation orchestrator
//!
//! Per interaction:
//!
//! ```text
//! Received -> SampledHeuristic -----------------------------> Scored
//! Received -> SampledLLM -> Evaluating -> Success         -> Scored
//!                                      -> PartialFailure  -> Scored
//!                                      -> Timeout/Failed  -> Scored
//! ```
//!
//! The heuristic result is computed first and is always available as the
//! fallback. Nothing escapes [`Orchestrator::evaluate`]: every path returns a
//! complete, clamped [`Interaction`].

use crate::backends;
use crate::config::{EvaluationConfig, EvaluationMode, UnavailablePolicy};
use crate::evaluators::{LlmEvaluation, MetricVerdict, RagasEvaluator};
use crate::heuristic::{HeuristicScorer, HeuristicScores};
use crate::interaction::{
    EvaluationMethod, EvaluationOutcome, EvaluationRequest, Interaction, Metric, MetricSources,
    MetricWeights, QualityScores, ScoreSource, UserFeedback,
};
use crate::llm_client::{BackendAdapter, LLMBackend};
use crate::metrics::EvaluationMetrics;
use crate::recorder::{InMemoryRecorder, ResultRecorder};
use crate::sampling::SamplingController;
use crate::EvalError;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of [`Orchestrator::dispatch`]
#[derive(Debug)]
pub enum Dispatch {
    /// `evaluation_enabled` is off; nothing was scored or recorded
    Disabled,
    /// Inline mode: the finished record
    Completed(Interaction),
    /// Background mode: the detached evaluation task
    Detached(JoinHandle<Interaction>),
}

/// Per-metric merge of LLM verdicts over heuristic scores
#[derive(Debug, Clone, PartialEq)]
pub struct MergedScores {
    pub scores: QualityScores,
    pub sources: MetricSources,
    /// Metrics where no LLM verdict parsed and the heuristic value was used
    pub fallback_metrics: Vec<Metric>,
    /// Metrics whose final value came from the LLM
    pub llm_metrics: usize,
}

/// Merge LLM verdicts with the heuristic result.
///
/// A scored metric uses the LLM value. An unparsed metric falls back to its
/// heuristic value. An unavailable metric follows `policy`. `overall` is
/// recomputed from whichever values ended up populated.
pub fn merge(
    heuristic: &HeuristicScores,
    llm: &LlmEvaluation,
    policy: UnavailablePolicy,
    weights: &MetricWeights,
) -> MergedScores {
    let mut values = [None; 3];
    let mut sources = MetricSources::uniform(ScoreSource::Heuristic);
    let mut fallback_metrics = Vec::new();
    let mut llm_metrics = 0;

    for (slot, metric) in Metric::ALL.into_iter().enumerate() {
        let (value, source) = match llm.get(metric) {
            MetricVerdict::Scored { value, .. } => {
                llm_metrics += 1;
                (Some(*value), ScoreSource::Llm)
            }
            MetricVerdict::Unparsed { .. } => {
                fallback_metrics.push(metric);
                (Some(heuristic.get(metric)), ScoreSource::Heuristic)
            }
            MetricVerdict::Unavailable => match policy {
                UnavailablePolicy::Heuristic => (Some(heuristic.get(metric)), ScoreSource::Heuristic),
                UnavailablePolicy::Omit => (None, ScoreSource::Unavailable),
            },
        };
        values[slot] = value;
        sources.set(metric, source);
    }

    MergedScores {
        scores: QualityScores::from_metrics(values[0], values[1], values[2], weights),
        sources,
        fallback_metrics,
        llm_metrics,
    }
}

/// Assembles an [`Orchestrator`] with injected collaborators
pub struct OrchestratorBuilder {
    config: EvaluationConfig,
    backend: Option<Arc<dyn LLMBackend>>,
    recorder: Option<Arc<dyn ResultRecorder>>,
    metrics: Option<Arc<EvaluationMetrics>>,
    sampler: Option<Arc<SamplingController>>,
}

impl OrchestratorBuilder {
    /// Use this backend instead of resolving `backend_name`
    pub fn backend(mut self, backend: Arc<dyn LLMBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn ResultRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn metrics(mut self, metrics: Arc<EvaluationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn sampler(mut self, sampler: Arc<SamplingController>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Validate the configuration and resolve the backend.
    ///
    /// Resolving a named backend builds a blocking HTTP client, so call this
    /// outside of an async context.
    pub fn build(self) -> Result<Orchestrator, EvalError> {
        let config = self.config;

        let backend = match self.backend {
            Some(backend) => {
                config.validate_scoring()?;
                Some(backend)
            }
            None => {
                config.validate()?;
                backends::build_backend(&config)?
            }
        };

        let heuristic = HeuristicScorer::new(config.heuristic.clone())?;
        let evaluator = backend.map(|backend| {
            RagasEvaluator::new(BackendAdapter::new(backend), config.samples_per_metric)
                .with_temperature(config.sample_temperature)
        });
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(EvaluationMetrics::new()?),
        };
        let sampler = self.sampler.unwrap_or_else(|| {
            Arc::new(SamplingController::new(Duration::from_secs(
                config.decision_ttl_secs,
            )))
        });

        info!(
            sample_rate = config.sample_rate,
            backend = evaluator
                .as_ref()
                .map(|e| e.backend_name())
                .unwrap_or(backends::NONE),
            mode = ?config.mode,
            "Evaluation orchestrator ready"
        );

        Ok(Orchestrator {
            llm_slots: Arc::new(Semaphore::new(config.max_concurrent_llm)),
            heuristic,
            evaluator,
            sampler,
            metrics,
            recorder: self
                .recorder
                .unwrap_or_else(|| Arc::new(InMemoryRecorder::new())),
            in_flight: DashMap::new(),
            config,
        })
    }
}

/// Per-id lock handle. Dropping it, also when the caller abandons the
/// evaluation, removes the map entry once no other request holds it.
struct InFlightSlot<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    id: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn acquire(map: &'a DashMap<String, Arc<Mutex<()>>>, id: &'a str) -> Self {
        let lock = Arc::clone(
            map.entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        Self { map, id, lock }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // The map and this slot are the only holders
        self.map.remove_if(self.id, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

/// Sole entry point of the evaluation engine
pub struct Orchestrator {
    config: EvaluationConfig,
    heuristic: HeuristicScorer,
    evaluator: Option<RagasEvaluator>,
    /// Bounds simultaneous LLM-backed evaluations; excess requests queue
    llm_slots: Arc<Semaphore>,
    sampler: Arc<SamplingController>,
    metrics: Arc<EvaluationMetrics>,
    recorder: Arc<dyn ResultRecorder>,
    /// One evaluation in flight per interaction id
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn builder(config: EvaluationConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            backend: None,
            recorder: None,
            metrics: None,
            sampler: None,
        }
    }

    /// Build from configuration alone, with an in-memory recorder
    pub fn from_config(config: EvaluationConfig) -> Result<Self, EvalError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EvaluationMetrics> {
        &self.metrics
    }

    pub fn recorder(&self) -> &Arc<dyn ResultRecorder> {
        &self.recorder
    }

    pub fn sampler(&self) -> &Arc<SamplingController> {
        &self.sampler
    }

    /// Run per `mode`, or do nothing when evaluation is disabled
    pub async fn dispatch(self: &Arc<Self>, request: EvaluationRequest) -> Dispatch {
        if !self.config.evaluation_enabled {
            debug!(interaction_id = %request.id, "Evaluation disabled");
            return Dispatch::Disabled;
        }

        match self.config.mode {
            EvaluationMode::Inline => Dispatch::Completed(self.evaluate(request).await),
            EvaluationMode::Background => {
                let this = Arc::clone(self);
                Dispatch::Detached(tokio::spawn(async move { this.evaluate(request).await }))
            }
        }
    }

    /// Score, record and account for one interaction.
    ///
    /// Requests for an id already being evaluated wait for it to finish and
    /// then evaluate again, overwriting the earlier record.
    pub async fn evaluate(&self, request: EvaluationRequest) -> Interaction {
        let slot = InFlightSlot::acquire(&self.in_flight, &request.id);
        let _serialized = slot.lock.lock().await;
        self.evaluate_exclusive(&request).await
    }

    pub async fn attach_feedback(&self, id: &str, feedback: UserFeedback) -> Result<(), EvalError> {
        self.recorder.attach_feedback(id, feedback).await
    }

    async fn evaluate_exclusive(&self, request: &EvaluationRequest) -> Interaction {
        let started = Instant::now();
        debug!(interaction_id = %request.id, "Received");

        let heuristic = self.heuristic.score_request(request);
        let decision = self
            .sampler
            .decide_for(&request.id, self.config.sample_rate)
            .await;

        let (mut interaction, backend_label) = match (&self.evaluator, decision.use_llm) {
            (Some(evaluator), true) => {
                debug!(
                    interaction_id = %request.id,
                    reused = decision.reused,
                    backend = evaluator.backend_name(),
                    "SampledLLM"
                );
                let interaction = self.evaluate_with_llm(evaluator, request, &heuristic).await;
                (interaction, evaluator.backend_name().to_string())
            }
            _ => {
                debug!(interaction_id = %request.id, "SampledHeuristic");
                let interaction = heuristic_record(
                    request,
                    &heuristic,
                    EvaluationOutcome::HeuristicOnly,
                    None,
                );
                (interaction, backends::NONE.to_string())
            }
        };

        let elapsed = started.elapsed();
        interaction.latency_ms = elapsed.as_millis() as u64;
        interaction.evaluated_at = Utc::now();
        debug!(
            interaction_id = %request.id,
            method = interaction.evaluation_method.as_str(),
            outcome = interaction.outcome.as_str(),
            latency_ms = interaction.latency_ms,
            "Scored"
        );

        if let Err(e) = self.recorder.record(&interaction).await {
            error!(interaction_id = %request.id, "Failed to record evaluation: {}", e);
        }
        self.metrics.record(&interaction, &backend_label, elapsed);

        interaction
    }

    async fn evaluate_with_llm(
        &self,
        evaluator: &RagasEvaluator,
        request: &EvaluationRequest,
        heuristic: &HeuristicScores,
    ) -> Interaction {
        let budget = self.config.timeout();
        let slots = Arc::clone(&self.llm_slots);

        let work = async move {
            let permit = slots
                .acquire_owned()
                .await
                .map_err(|_| EvalError::Internal("LLM slots closed".to_string()))?;
            debug!(interaction_id = %request.id, "Evaluating");
            Ok::<_, EvalError>(evaluator.evaluate(request, Arc::new(permit)).await)
        };

        let result = match tokio::time::timeout(budget, AssertUnwindSafe(work).catch_unwind()).await
        {
            Err(_) => Err(EvalError::Timeout(budget)),
            Ok(Err(panic)) => Err(EvalError::Panic(panic_message(panic))),
            Ok(Ok(result)) => result,
        };

        let llm = match result {
            Ok(llm) => llm,
            Err(e) => {
                let outcome = match e {
                    EvalError::Timeout(_) => EvaluationOutcome::Timeout,
                    _ => EvaluationOutcome::Failed,
                };
                warn!(
                    interaction_id = %request.id,
                    backend = evaluator.backend_name(),
                    outcome = outcome.as_str(),
                    "LLM evaluation abandoned, using heuristic scores: {}",
                    e
                );
                return heuristic_record(request, heuristic, outcome, Some(e.to_string()));
            }
        };

        if llm.backend_down() {
            let reason = llm
                .last_error
                .clone()
                .unwrap_or_else(|| "backend unavailable".to_string());
            warn!(
                interaction_id = %request.id,
                backend = %llm.backend_name,
                "Every judge call failed, using heuristic scores"
            );
            return heuristic_record(request, heuristic, EvaluationOutcome::Failed, Some(reason));
        }

        let merged = merge(
            heuristic,
            &llm,
            self.config.unavailable_policy,
            &self.config.heuristic.weights,
        );

        if merged.llm_metrics == 0 {
            let reason = llm
                .last_error
                .clone()
                .unwrap_or_else(|| "no judge verdict could be parsed".to_string());
            warn!(
                interaction_id = %request.id,
                backend = %llm.backend_name,
                "No LLM-derived metric, using heuristic scores"
            );
            return heuristic_record(request, heuristic, EvaluationOutcome::Failed, Some(reason));
        }

        let (outcome, error) = if merged.fallback_metrics.is_empty() {
            (EvaluationOutcome::Success, None)
        } else {
            let names: Vec<&str> = merged.fallback_metrics.iter().map(|m| m.as_str()).collect();
            (
                EvaluationOutcome::PartialFailure,
                Some(format!("heuristic fallback for: {}", names.join(", "))),
            )
        };
        debug!(
            interaction_id = %request.id,
            outcome = outcome.as_str(),
            calls = llm.calls_attempted,
            failed = llm.calls_failed,
            unparsed = llm.calls_unparsed,
            "LLM evaluation finished"
        );

        Interaction {
            id: request.id.clone(),
            query: request.query.clone(),
            response: request.response.clone(),
            contexts: request.contexts.clone(),
            evaluation_method: EvaluationMethod::Llm,
            backend_name: Some(llm.backend_name),
            scores: merged.scores,
            sources: merged.sources,
            outcome,
            latency_ms: 0,
            error,
            evaluated_at: Utc::now(),
            user_feedback: Vec::new(),
        }
    }
}

fn heuristic_record(
    request: &EvaluationRequest,
    heuristic: &HeuristicScores,
    outcome: EvaluationOutcome,
    error: Option<String>,
) -> Interaction {
    Interaction {
        id: request.id.clone(),
        query: request.query.clone(),
        response: request.response.clone(),
        contexts: request.contexts.clone(),
        evaluation_method: EvaluationMethod::Heuristic,
        backend_name: None,
        scores: heuristic.scores,
        sources: MetricSources::uniform(ScoreSource::Heuristic),
        outcome,
        latency_ms: 0,
        error,
        evaluated_at: Utc::now(),
        user_feedback: Vec::new(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
