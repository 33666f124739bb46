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

//! Aggregate evaluation metrics
//!
//! The only state shared across interactions. Series live in a private
//! Prometheus registry, updated once per finished record and exported in the
//! text exposition format.

use crate::interaction::{Interaction, Metric};
use crate::EvalError;
use prometheus::proto::{LabelPair, MetricFamily};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::time::Duration;

const NAMESPACE: &str = "ragscore";

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

const SCORE_BUCKETS: &[f64] = &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

/// Cumulative histogram as gathered from the registry
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub bounds: Vec<f64>,
    /// `counts[i]` is the number of observations `<= bounds[i]`
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl Histogram {
    fn from_proto(histogram: &prometheus::proto::Histogram) -> Self {
        let buckets = histogram.get_bucket();
        Self {
            bounds: buckets.iter().map(|b| b.get_upper_bound()).collect(),
            counts: buckets.iter().map(|b| b.get_cumulative_count()).collect(),
            sum: histogram.get_sample_sum(),
            count: histogram.get_sample_count(),
        }
    }
}

/// Key of `ragscore_evaluations_total`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EvaluationLabels {
    pub method: String,
    pub backend: String,
    pub outcome: String,
}

/// Point-in-time copy of all series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub evaluations: BTreeMap<EvaluationLabels, u64>,
    /// Keyed by (method, backend)
    pub durations: BTreeMap<(String, String), Histogram>,
    pub scores: BTreeMap<Metric, Histogram>,
}

impl MetricsSnapshot {
    pub fn total_evaluations(&self) -> u64 {
        self.evaluations.values().sum()
    }
}

/// Aggregate counters, injected into the orchestrator
#[derive(Clone)]
pub struct EvaluationMetrics {
    registry: Registry,
    evaluations: IntCounterVec,
    durations: HistogramVec,
    scores: HistogramVec,
}

impl EvaluationMetrics {
    pub fn new() -> Result<Self, EvalError> {
        let registry = Registry::new();

        let evaluations = IntCounterVec::new(
            Opts::new("evaluations_total", "Evaluated interactions.").namespace(NAMESPACE),
            &["method", "backend", "outcome"],
        )
        .map_err(metrics_error)?;
        let durations = HistogramVec::new(
            HistogramOpts::new(
                "evaluation_duration_seconds",
                "Wall time per evaluated interaction.",
            )
            .namespace(NAMESPACE)
            .buckets(DURATION_BUCKETS.to_vec()),
            &["method", "backend"],
        )
        .map_err(metrics_error)?;
        let scores = HistogramVec::new(
            HistogramOpts::new("score", "Distribution of final metric scores.")
                .namespace(NAMESPACE)
                .buckets(SCORE_BUCKETS.to_vec()),
            &["metric"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(evaluations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(durations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(scores.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            evaluations,
            durations,
            scores,
        })
    }

    /// Registry holding every series, for hosts that run their own exporter
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Account for one finished record. `backend` is the backend that was
    /// attempted, or `none` when the interaction was not sampled.
    pub fn record(&self, interaction: &Interaction, backend: &str, elapsed: Duration) {
        let method = interaction.evaluation_method.as_str();
        self.evaluations
            .with_label_values(&[method, backend, interaction.outcome.as_str()])
            .inc();
        self.durations
            .with_label_values(&[method, backend])
            .observe(elapsed.as_secs_f64());

        for metric in Metric::ALL {
            if let Some(value) = interaction.scores.get(metric) {
                self.scores
                    .with_label_values(&[metric.as_str()])
                    .observe(value);
            }
        }
    }

    pub fn evaluations_total(&self, method: &str, backend: &str, outcome: &str) -> u64 {
        let labels = EvaluationLabels {
            method: method.to_string(),
            backend: backend.to_string(),
            outcome: outcome.to_string(),
        };
        self.snapshot()
            .evaluations
            .get(&labels)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();
        for family in self.registry.gather() {
            collect_family(&mut snapshot, &family);
        }
        snapshot
    }

    pub fn render_prometheus(&self) -> Result<String, EvalError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| EvalError::Internal(e.to_string()))
    }
}

impl std::fmt::Debug for EvaluationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationMetrics")
            .field("evaluations", &self.snapshot().total_evaluations())
            .finish()
    }
}

fn collect_family(snapshot: &mut MetricsSnapshot, family: &MetricFamily) {
    let name = family.get_name();
    for series in family.get_metric() {
        let labels = series.get_label();
        if name == format!("{}_evaluations_total", NAMESPACE) {
            let key = EvaluationLabels {
                method: label(labels, "method"),
                backend: label(labels, "backend"),
                outcome: label(labels, "outcome"),
            };
            snapshot
                .evaluations
                .insert(key, series.get_counter().get_value() as u64);
        } else if name == format!("{}_evaluation_duration_seconds", NAMESPACE) {
            snapshot.durations.insert(
                (label(labels, "method"), label(labels, "backend")),
                Histogram::from_proto(series.get_histogram()),
            );
        } else if name == format!("{}_score", NAMESPACE) {
            if let Some(metric) = Metric::parse(&label(labels, "metric")) {
                snapshot
                    .scores
                    .insert(metric, Histogram::from_proto(series.get_histogram()));
            }
        }
    }
}

fn label(pairs: &[LabelPair], name: &str) -> String {
    pairs
        .iter()
        .find(|pair| pair.get_name() == name)
        .map(|pair| pair.get_value().to_string())
        .unwrap_or_default()
}

fn metrics_error(err: prometheus::Error) -> EvalError {
    EvalError::Internal(format!("metrics registry: {}", err))
}
