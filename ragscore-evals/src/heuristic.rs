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

//! Deterministic heuristic scorer
//!
//! Scores faithfulness, context precision and answer relevancy from lexical
//! overlap alone. It is free to run, so it is computed for every interaction
//! and doubles as the fallback for the LLM-backed path.
//!
//! ```text
//! faithfulness      = base + overlap_max * |R ∩ C| / |R| + phrase_bonus - evasive_penalty
//! context_precision = base + sim_max * max_i Jaccard(Q, C_i) + count_bonus(n)
//! answer_relevancy  = base + overlap_max * |Q ∩ R| / |Q| + domain_bonus - evasive_penalty
//! ```
//!
//! Every component is clamped to `[0, 1]`.

use crate::config::{CountBonus, HeuristicConfig};
use crate::interaction::{clamp_score, EvaluationRequest, Metric, QualityScores};
use crate::EvalError;
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Intermediate signals behind a heuristic score, useful when debugging a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicDetails {
    pub response_context_overlap: f64,
    pub verbatim_phrase: bool,
    pub evasive: bool,
    pub max_context_similarity: f64,
    pub context_count: usize,
    pub count_bonus: f64,
    pub query_response_overlap: f64,
    pub domain_terms_matched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicScores {
    pub scores: QualityScores,
    pub details: HeuristicDetails,
}

impl HeuristicScores {
    pub fn get(&self, metric: Metric) -> f64 {
        // Heuristic metrics are always available
        self.scores.get(metric).unwrap_or(0.0)
    }
}

/// Lexical-overlap scorer; see the module docs for the formulas
pub struct HeuristicScorer {
    config: HeuristicConfig,
    stop_words: HashSet<String>,
    evasive: RegexSet,
    /// Domain terms, tokenized the same way as the response
    domain_terms: Vec<Vec<String>>,
    /// Sorted by `min_count`, largest first
    count_bonuses: Vec<CountBonus>,
}

impl HeuristicScorer {
    pub fn new(config: HeuristicConfig) -> Result<Self, EvalError> {
        config.validate()?;

        let stop_words = config
            .stop_words
            .iter()
            .map(|w| normalize(w))
            .collect::<HashSet<_>>();

        let evasive = RegexSetBuilder::new(&config.evasive_patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| EvalError::Configuration(format!("invalid evasive pattern: {}", e)))?;

        let mut domain_terms: Vec<Vec<String>> = config
            .domain_terms
            .iter()
            .map(|t| tokenize(t))
            .filter(|t| !t.is_empty())
            .collect();
        domain_terms.dedup();

        let mut count_bonuses = config.context_count_bonuses.clone();
        count_bonuses.sort_by(|a, b| b.min_count.cmp(&a.min_count));

        Ok(Self {
            config,
            stop_words,
            evasive,
            domain_terms,
            count_bonuses,
        })
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    pub fn score_request(&self, request: &EvaluationRequest) -> HeuristicScores {
        self.score(&request.query, &request.response, &request.contexts)
    }

    /// Score one interaction. Pure and deterministic.
    pub fn score(&self, query: &str, response: &str, contexts: &[String]) -> HeuristicScores {
        let query_tokens = tokenize(query);
        let response_tokens = tokenize(response);
        let context_tokens: Vec<Vec<String>> = contexts.iter().map(|c| tokenize(c)).collect();

        let query_terms = self.content_terms(&query_tokens);
        let response_terms = self.content_terms(&response_tokens);
        let context_terms: Vec<HashSet<&str>> = context_tokens
            .iter()
            .map(|tokens| self.content_terms(tokens))
            .collect();
        let context_union: HashSet<&str> = context_terms.iter().flatten().copied().collect();

        let evasive = self.evasive.is_match(&normalize(response));

        // Faithfulness
        let response_context_overlap = coverage(&response_terms, &context_union);
        let verbatim_phrase = self.quotes_context(&response_tokens, &context_tokens);
        let cfg = &self.config;
        let mut faithfulness =
            cfg.faithfulness_baseline + cfg.faithfulness_overlap_max * response_context_overlap;
        if verbatim_phrase {
            faithfulness += cfg.faithfulness_phrase_bonus;
        }
        if evasive {
            faithfulness -= cfg.faithfulness_evasive_penalty;
        }

        // Context precision
        let max_context_similarity = context_terms
            .iter()
            .map(|terms| jaccard(&query_terms, terms))
            .fold(0.0_f64, f64::max);
        let context_count = contexts.len();
        let count_bonus = self.count_bonus(context_count);
        let context_precision = cfg.context_precision_baseline
            + cfg.context_precision_similarity_max * max_context_similarity
            + count_bonus;

        // Answer relevancy
        let query_response_overlap = coverage(&query_terms, &response_terms);
        let domain_terms_matched = self.domain_terms_in(&response_tokens);
        let domain_ratio =
            (domain_terms_matched as f64 / cfg.domain_term_saturation as f64).min(1.0);
        let mut answer_relevancy = cfg.answer_relevancy_baseline
            + cfg.answer_relevancy_overlap_max * query_response_overlap
            + cfg.answer_relevancy_domain_bonus * domain_ratio;
        if evasive {
            answer_relevancy -= cfg.answer_relevancy_evasive_penalty;
        }

        let scores = QualityScores::from_metrics(
            Some(clamp_score(faithfulness)),
            Some(clamp_score(context_precision)),
            Some(clamp_score(answer_relevancy)),
            &cfg.weights,
        );

        HeuristicScores {
            scores,
            details: HeuristicDetails {
                response_context_overlap,
                verbatim_phrase,
                evasive,
                max_context_similarity,
                context_count,
                count_bonus,
                query_response_overlap,
                domain_terms_matched,
            },
        }
    }

    /// Largest threshold first, so a larger bonus is never shadowed by a smaller one.
    fn count_bonus(&self, count: usize) -> f64 {
        self.count_bonuses
            .iter()
            .find(|b| count >= b.min_count)
            .map(|b| b.bonus)
            .unwrap_or(0.0)
    }

    fn content_terms<'a>(&self, tokens: &'a [String]) -> HashSet<&'a str> {
        tokens
            .iter()
            .filter(|t| !self.stop_words.contains(t.as_str()))
            .map(|t| t.as_str())
            .collect()
    }

    /// True when some run of `phrase_min_words` context tokens, containing at
    /// least one content word, appears verbatim in the response.
    fn quotes_context(&self, response_tokens: &[String], context_tokens: &[Vec<String>]) -> bool {
        let n = self.config.phrase_min_words;
        if response_tokens.len() < n {
            return false;
        }

        let response_ngrams: HashSet<String> =
            response_tokens.windows(n).map(|w| w.join(" ")).collect();

        context_tokens.iter().any(|tokens| {
            tokens.windows(n).any(|window| {
                window.iter().any(|t| !self.stop_words.contains(t))
                    && response_ngrams.contains(&window.join(" "))
            })
        })
    }

    fn domain_terms_in(&self, response_tokens: &[String]) -> usize {
        if self.domain_terms.is_empty() {
            return 0;
        }

        let mut lengths: Vec<usize> = self.domain_terms.iter().map(|t| t.len()).collect();
        lengths.sort_unstable();
        lengths.dedup();

        let ngrams: HashSet<String> = lengths
            .iter()
            .filter(|&&n| n <= response_tokens.len())
            .flat_map(|&n| response_tokens.windows(n).map(|w| w.join(" ")))
            .collect();

        self.domain_terms
            .iter()
            .filter(|term| ngrams.contains(&term.join(" ")))
            .count()
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Lowercased alphanumeric runs; apostrophes and punctuation split tokens.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// |a ∩ b| / |a|, zero for an empty `a`
fn coverage(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().filter(|t| b.contains(*t)).count() as f64 / a.len() as f64
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let intersection = a.iter().filter(|t| b.contains(*t)).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
