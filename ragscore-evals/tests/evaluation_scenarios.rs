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

//! End-to-end evaluation scenarios through the public API

use ragscore_evals::{
    EvaluationConfig, EvaluationMethod, EvaluationOutcome, EvaluationRequest, GenerateOptions,
    HeuristicConfig, HeuristicScorer, JsonFileRecorder, LLMBackend, LLMError, Metric,
    Orchestrator, ResultRecorder, SamplingController, ScoreSource, UserFeedback,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Judge that answers every prompt with the same verdict
struct FixedJudge {
    verdict: &'static str,
    delay: Duration,
    calls: AtomicUsize,
}

impl FixedJudge {
    fn new(verdict: &'static str) -> Self {
        Self {
            verdict,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }
}

impl LLMBackend for FixedJudge {
    fn name(&self) -> &str {
        "fixed"
    }

    fn model_name(&self) -> &str {
        "fixed-judge"
    }

    fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(self.verdict.to_string())
    }
}

/// Parses for faithfulness and answer relevancy, rambles for context precision
struct RamblingJudge;

impl LLMBackend for RamblingJudge {
    fn name(&self) -> &str {
        "rambling"
    }

    fn model_name(&self) -> &str {
        "rambling-judge"
    }

    fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, LLMError> {
        if prompt.contains("precision of the retrieved context") {
            Ok("Well, it depends on how you look at it.".to_string())
        } else if prompt.contains("faithful to the context") {
            Ok(r#"{"supported_claims": 2, "total_claims": 2, "score": 1.0}"#.to_string())
        } else {
            Ok(r#"{"addresses_question": true, "is_complete": false, "score": 0.5}"#.to_string())
        }
    }
}

fn engine(config: EvaluationConfig, backend: Arc<dyn LLMBackend>, seed: u64) -> Orchestrator {
    Orchestrator::builder(config)
        .backend(backend)
        .sampler(Arc::new(SamplingController::with_seed(
            seed,
            Duration::from_secs(600),
        )))
        .build()
        .expect("valid test configuration")
}

fn routing_request(id: &str) -> EvaluationRequest {
    EvaluationRequest::new(
        id,
        "How do I configure routing?",
        "Routing is configured in settings.yaml under the routing section.",
        vec!["Routing is configured in settings.yaml under the routing section.".to_string()],
    )
}

#[test]
fn evasive_answer_scores_low() {
    let scorer = HeuristicScorer::new(HeuristicConfig::default()).unwrap();
    let result = scorer.score(
        "How do I configure routing?",
        "I don't know.",
        &["Routing is configured in settings.yaml under the routing section.".to_string()],
    );

    let scores = result.scores;
    assert!(scores.faithfulness.unwrap() <= 0.3);
    assert!(scores.answer_relevancy.unwrap() <= 0.3);
    assert!(scores.overall.unwrap() < 0.4);
}

#[test]
fn quoted_answer_with_five_contexts_scores_high() {
    let scorer = HeuristicScorer::new(HeuristicConfig::default()).unwrap();
    let contexts = vec![
        "Routing is configured in the gateway settings.".to_string(),
        "The settings file lives in the config directory.".to_string(),
        "Gateway logs are rotated daily.".to_string(),
        "Retries are disabled by default.".to_string(),
        "TLS certificates are loaded at startup.".to_string(),
    ];
    let result = scorer.score(
        "How is routing configured in the gateway?",
        "Routing is configured in the gateway settings file.",
        &contexts,
    );

    assert!(result.details.verbatim_phrase);
    assert_eq!(result.details.count_bonus, 0.2);
    assert!(result.scores.faithfulness.unwrap() >= 0.8);
    assert!(result.scores.context_precision.unwrap() >= 0.8);
    assert!(result.scores.overall.unwrap() >= 0.7);
}

#[tokio::test]
async fn zero_rate_makes_no_backend_calls() {
    let judge = Arc::new(FixedJudge::new(r#"{"score": 0.9}"#));
    let config = EvaluationConfig {
        sample_rate: 0.0,
        ..Default::default()
    };
    let engine = engine(config, judge.clone(), 17);

    for i in 0..200 {
        let record = engine.evaluate(routing_request(&format!("zero-{}", i))).await;
        assert_eq!(record.evaluation_method, EvaluationMethod::Heuristic);
    }
    assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn full_rate_always_attempts_llm() {
    let judge = Arc::new(FixedJudge::new(r#"{"score": 0.5}"#));
    let config = EvaluationConfig {
        sample_rate: 1.0,
        ..Default::default()
    };
    let engine = engine(config, judge.clone(), 17);

    for i in 0..50 {
        let record = engine.evaluate(routing_request(&format!("full-{}", i))).await;
        assert_eq!(record.evaluation_method, EvaluationMethod::Llm);
        assert_eq!(record.scores.overall, Some(0.5));
    }
    // Three metrics, three samples each
    assert_eq!(judge.calls.load(Ordering::SeqCst), 50 * 9);
}

#[tokio::test]
async fn observed_sampling_ratio_tracks_rate() {
    let judge = Arc::new(FixedJudge::new(r#"{"score": 0.5}"#));
    let config = EvaluationConfig {
        sample_rate: 0.3,
        ..Default::default()
    };
    let engine = engine(config, judge, 2024);

    let n = 2000;
    let mut attempted = 0;
    for i in 0..n {
        let record = engine.evaluate(routing_request(&format!("ratio-{}", i))).await;
        if record.outcome != EvaluationOutcome::HeuristicOnly {
            attempted += 1;
        }
    }

    let observed = attempted as f64 / n as f64;
    // Roughly five standard deviations at n = 2000
    assert!((observed - 0.3).abs() < 0.05, "observed {}", observed);
    assert_eq!(engine.sampler().draws(), n as u64);
}

#[tokio::test]
async fn slow_backend_times_out_to_heuristic() {
    let mut judge = FixedJudge::new(r#"{"score": 0.9}"#);
    judge.delay = Duration::from_secs(2);
    let config = EvaluationConfig {
        sample_rate: 1.0,
        timeout_seconds: 0.25,
        ..Default::default()
    };
    let engine = engine(config, Arc::new(judge), 1);

    let started = Instant::now();
    let record = engine.evaluate(routing_request("slow")).await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(250 + 500), "took {:?}", elapsed);
    assert_eq!(record.evaluation_method, EvaluationMethod::Heuristic);
    assert_eq!(record.outcome, EvaluationOutcome::Timeout);
    assert!(!record.error.unwrap_or_default().is_empty());
    assert_eq!(
        engine
            .metrics()
            .evaluations_total("heuristic", "fixed", "timeout"),
        1
    );
}

#[tokio::test]
async fn unparsed_metric_falls_back_alone() {
    let config = EvaluationConfig {
        sample_rate: 1.0,
        ..Default::default()
    };
    let engine = engine(config, Arc::new(RamblingJudge), 1);
    let heuristic = HeuristicScorer::new(HeuristicConfig::default())
        .unwrap()
        .score_request(&routing_request("partial"));

    let record = engine.evaluate(routing_request("partial")).await;

    assert_eq!(record.evaluation_method, EvaluationMethod::Llm);
    assert_eq!(record.outcome, EvaluationOutcome::PartialFailure);
    assert_eq!(record.scores.faithfulness, Some(1.0));
    assert_eq!(record.scores.answer_relevancy, Some(0.5));
    assert_eq!(
        record.scores.context_precision,
        Some(heuristic.get(Metric::ContextPrecision))
    );
    assert_eq!(record.sources.context_precision, ScoreSource::Heuristic);

    let expected = (1.0 + heuristic.get(Metric::ContextPrecision) + 0.5) / 3.0;
    assert!((record.scores.overall.unwrap() - expected).abs() < 1e-9);
}

#[tokio::test]
async fn records_persist_to_json_files() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(JsonFileRecorder::new(dir.path()).unwrap());
    let config = EvaluationConfig {
        sample_rate: 1.0,
        ..Default::default()
    };
    let engine = Orchestrator::builder(config)
        .backend(Arc::new(FixedJudge::new(r#"{"score": 0.8}"#)))
        .recorder(recorder.clone())
        .build()
        .unwrap();

    engine.evaluate(routing_request("persisted")).await;
    engine
        .attach_feedback(
            "persisted",
            UserFeedback {
                rating: Some(-1),
                comment: Some("missed the point".to_string()),
                submitted_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

    let stored = recorder.get("persisted").await.unwrap().unwrap();
    assert_eq!(stored.backend_name.as_deref(), Some("fixed"));
    assert_eq!(stored.user_feedback.len(), 1);
    assert!(recorder.path_for("persisted").exists());
}
