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

//! Sampling controller
//!
//! Decides, once per interaction id, whether the LLM-backed path runs. The
//! random source is owned by the controller and injected into the
//! orchestrator, so tests can seed it and count draws.

use moka::future::Cache;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MAX_REMEMBERED_DECISIONS: u64 = 100_000;

/// Longest time-to-live the decision cache accepts (1000 years)
pub const MAX_DECISION_TTL_SECS: u64 = 1000 * 365 * 24 * 3600;

/// Result of a sampling decision for one interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingDecision {
    pub use_llm: bool,
    /// The decision was made by an earlier attempt for the same id
    pub reused: bool,
}

/// Bernoulli sampler with per-id memoization
pub struct SamplingController {
    rng: Mutex<StdRng>,
    draws: AtomicU64,
    decisions: Cache<String, bool>,
}

impl SamplingController {
    /// Seeded from OS entropy
    pub fn new(decision_ttl: Duration) -> Self {
        Self::with_rng(StdRng::from_entropy(), decision_ttl)
    }

    /// Reproducible sequence of draws
    pub fn with_seed(seed: u64, decision_ttl: Duration) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), decision_ttl)
    }

    fn with_rng(rng: StdRng, decision_ttl: Duration) -> Self {
        let decisions = Cache::builder()
            .max_capacity(MAX_REMEMBERED_DECISIONS)
            .time_to_live(decision_ttl.min(Duration::from_secs(MAX_DECISION_TTL_SECS)))
            .build();

        Self {
            rng: Mutex::new(rng),
            draws: AtomicU64::new(0),
            decisions,
        }
    }

    /// One stateless decision.
    ///
    /// Rates of exactly 0 and 1 short-circuit without touching the random
    /// source. Otherwise one `u ~ Uniform[0, 1)` is drawn and the interaction
    /// is sampled when `u <= rate`.
    pub fn decide(&self, sample_rate: f64) -> bool {
        if sample_rate == 0.0 || sample_rate.is_nan() || sample_rate < 0.0 {
            return false;
        }
        if sample_rate >= 1.0 {
            return true;
        }

        let u: f64 = self.rng.lock().gen();
        self.draws.fetch_add(1, Ordering::Relaxed);
        u <= sample_rate
    }

    /// Decision for `id`, drawn at most once while it is remembered.
    ///
    /// Concurrent first calls for the same id are coalesced into a single draw.
    pub async fn decide_for(&self, id: &str, sample_rate: f64) -> SamplingDecision {
        let entry = self
            .decisions
            .entry(id.to_string())
            .or_insert_with(async { self.decide(sample_rate) })
            .await;

        SamplingDecision {
            use_llm: *entry.value(),
            reused: !entry.is_fresh(),
        }
    }

    /// Random draws consumed so far
    pub fn draws(&self) -> u64 {
        self.draws.load(Ordering::Relaxed)
    }
}

impl Default for SamplingController {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}
