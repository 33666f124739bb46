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

//! Evaluation engine configuration
//!
//! Loaded with priority: environment > TOML file > defaults. Everything is
//! validated once, at startup, so a bad `sample_rate` or backend name never
//! surfaces at request time.

use crate::backends;
use crate::interaction::{Metric, MetricWeights};
use crate::sampling::MAX_DECISION_TTL_SECS;
use crate::EvalError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where evaluation runs relative to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Caller awaits the record (bounded by the timeout)
    #[default]
    Inline,
    /// Fire-and-forget on a spawned task
    Background,
}

impl FromStr for EvaluationMode {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(EvaluationMode::Inline),
            "background" => Ok(EvaluationMode::Background),
            other => Err(EvalError::Configuration(format!(
                "unknown evaluation mode '{}'",
                other
            ))),
        }
    }
}

/// What to do with a metric the backend declares unsupported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Substitute the heuristic value at merge time
    #[default]
    Heuristic,
    /// Keep the metric unavailable and leave it out of `overall`
    Omit,
}

/// Count-based bonus for context precision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountBonus {
    pub min_count: usize,
    pub bonus: f64,
}

/// Tunable constants of the heuristic scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub faithfulness_baseline: f64,
    pub faithfulness_overlap_max: f64,
    pub faithfulness_phrase_bonus: f64,
    pub faithfulness_evasive_penalty: f64,

    pub context_precision_baseline: f64,
    pub context_precision_similarity_max: f64,
    /// Evaluated largest `min_count` first regardless of declaration order
    pub context_count_bonuses: Vec<CountBonus>,

    pub answer_relevancy_baseline: f64,
    pub answer_relevancy_overlap_max: f64,
    pub answer_relevancy_domain_bonus: f64,
    pub answer_relevancy_evasive_penalty: f64,
    /// Number of distinct domain terms that earns the full domain bonus
    pub domain_term_saturation: usize,

    /// Minimum words in a context phrase quoted verbatim by the response
    pub phrase_min_words: usize,

    pub weights: MetricWeights,
    pub stop_words: Vec<String>,
    /// Case-insensitive regular expressions
    pub evasive_patterns: Vec<String>,
    pub domain_terms: Vec<String>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            faithfulness_baseline: 0.3,
            faithfulness_overlap_max: 0.5,
            faithfulness_phrase_bonus: 0.2,
            faithfulness_evasive_penalty: 0.3,
            context_precision_baseline: 0.4,
            context_precision_similarity_max: 0.3,
            context_count_bonuses: vec![
                CountBonus {
                    min_count: 5,
                    bonus: 0.2,
                },
                CountBonus {
                    min_count: 3,
                    bonus: 0.15,
                },
                CountBonus {
                    min_count: 1,
                    bonus: 0.05,
                },
            ],
            answer_relevancy_baseline: 0.3,
            answer_relevancy_overlap_max: 0.4,
            answer_relevancy_domain_bonus: 0.2,
            answer_relevancy_evasive_penalty: 0.2,
            domain_term_saturation: 2,
            phrase_min_words: 3,
            weights: MetricWeights::default(),
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            evasive_patterns: DEFAULT_EVASIVE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            domain_terms: Vec::new(),
        }
    }
}

const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "did", "do",
    "does", "don", "for", "from", "had", "has", "have", "how", "i", "if", "in", "into", "is", "it",
    "its", "me", "my", "no", "not", "of", "on", "or", "our", "s", "should", "so", "t", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "to", "under", "us", "was",
    "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "would", "you",
    "your",
];

const DEFAULT_EVASIVE_PATTERNS: &[&str] = &[
    r"\bi\s+(?:do\s+not|don'?t)\s+know\b",
    r"\bi(?:'m|\s+am)\s+not\s+sure\b",
    r"\bi\s+(?:cannot|can'?t|am\s+unable\s+to)\s+(?:answer|help|say|find)\b",
    r"\bno\s+(?:relevant\s+)?information\s+(?:is\s+)?available\b",
    r"\bas\s+an\s+ai\b",
    r"\bi\s+have\s+no\s+idea\b",
];

/// Opaque per-provider settings passed through to the backend adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: Option<u64>,
    pub max_tokens: Option<u32>,
    /// Metrics this deployment cannot score structurally
    pub unsupported_metrics: Vec<Metric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub ollama: ProviderSettings,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Master on/off switch
    pub evaluation_enabled: bool,
    /// Fraction of interactions routed to the LLM-backed path
    pub sample_rate: f64,
    /// Provider identifier, resolved at startup
    pub backend_name: String,
    /// Hard budget for the LLM-backed path
    pub timeout_seconds: f64,
    pub mode: EvaluationMode,
    /// Simultaneous LLM-backed evaluations; excess requests queue
    pub max_concurrent_llm: usize,
    /// Independent judge calls per metric
    pub samples_per_metric: usize,
    pub sample_temperature: f64,
    /// How long a sampling decision is remembered for retries
    pub decision_ttl_secs: u64,
    pub unavailable_policy: UnavailablePolicy,
    pub heuristic: HeuristicConfig,
    pub backends: BackendSettings,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            evaluation_enabled: true,
            sample_rate: 0.0,
            backend_name: backends::NONE.to_string(),
            timeout_seconds: 30.0,
            mode: EvaluationMode::Inline,
            max_concurrent_llm: 4,
            samples_per_metric: 3,
            sample_temperature: 0.7,
            decision_ttl_secs: 3600,
            unavailable_policy: UnavailablePolicy::Heuristic,
            heuristic: HeuristicConfig::default(),
            backends: BackendSettings::default(),
        }
    }
}

impl EvaluationConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EvalError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvalError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EvalError> {
        toml::from_str(content).map_err(|e| EvalError::Configuration(e.to_string()))
    }

    /// Load configuration with priority: env > file > defaults, then validate.
    ///
    /// Supported environment variables:
    /// - RAGSCORE_EVALUATION_ENABLED
    /// - RAGSCORE_SAMPLE_RATE
    /// - RAGSCORE_BACKEND
    /// - RAGSCORE_TIMEOUT_SECONDS
    /// - RAGSCORE_MAX_CONCURRENT_LLM
    /// - RAGSCORE_MODE
    /// - OPENAI_API_KEY, ANTHROPIC_API_KEY, OLLAMA_BASE_URL
    pub fn load(config_file: Option<PathBuf>) -> Result<Self, EvalError> {
        Self::load_with(config_file, |_| {})
    }

    /// Like [`EvaluationConfig::load`], with caller overrides (command-line
    /// flags) applied after the environment and before validation.
    pub fn load_with<F>(config_file: Option<PathBuf>, overrides: F) -> Result<Self, EvalError>
    where
        F: FnOnce(&mut Self),
    {
        let config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading evaluation configuration from {:?}", path);
                Self::from_file(&path)?
            }
            Some(path) => {
                return Err(EvalError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )))
            }
            None => Self::default(),
        };

        let mut config = config.merge_with_env(|key| std::env::var(key).ok())?;
        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup. Only variables that are set win.
    pub fn merge_with_env<F>(mut self, lookup: F) -> Result<Self, EvalError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RAGSCORE_EVALUATION_ENABLED") {
            self.evaluation_enabled = parse_env("RAGSCORE_EVALUATION_ENABLED", &v)?;
        }
        if let Some(v) = lookup("RAGSCORE_SAMPLE_RATE") {
            self.sample_rate = parse_env("RAGSCORE_SAMPLE_RATE", &v)?;
        }
        if let Some(v) = lookup("RAGSCORE_BACKEND") {
            self.backend_name = v.trim().to_string();
        }
        if let Some(v) = lookup("RAGSCORE_TIMEOUT_SECONDS") {
            self.timeout_seconds = parse_env("RAGSCORE_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("RAGSCORE_MAX_CONCURRENT_LLM") {
            self.max_concurrent_llm = parse_env("RAGSCORE_MAX_CONCURRENT_LLM", &v)?;
        }
        if let Some(v) = lookup("RAGSCORE_MODE") {
            self.mode = v.parse()?;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.backends.openai.api_key = Some(key);
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.backends.anthropic.api_key = Some(key);
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.backends.ollama.base_url = Some(url);
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds).unwrap_or(Duration::MAX)
    }

    /// Validate configuration, including the backend name
    pub fn validate(&self) -> Result<(), EvalError> {
        if !backends::is_known(&self.backend_name) {
            return Err(EvalError::Configuration(format!(
                "unknown backend '{}' (expected one of: {})",
                self.backend_name,
                backends::KNOWN_BACKENDS.join(", ")
            )));
        }

        if self.sample_rate > 0.0 && self.backend_name == backends::NONE {
            return Err(EvalError::Configuration(
                "sample_rate > 0 requires an LLM backend".to_string(),
            ));
        }

        self.validate_scoring()
    }

    /// Validate everything except backend resolution. Used when the backend
    /// is supplied directly rather than named in configuration.
    pub fn validate_scoring(&self) -> Result<(), EvalError> {
        if !self.sample_rate.is_finite() || !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(EvalError::Configuration(format!(
                "sample_rate must be within [0, 1], got {}",
                self.sample_rate
            )));
        }

        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(EvalError::Configuration(format!(
                "timeout_seconds must be positive, got {}",
                self.timeout_seconds
            )));
        }

        if self.max_concurrent_llm == 0 {
            return Err(EvalError::Configuration(
                "max_concurrent_llm must be at least 1".to_string(),
            ));
        }

        if !(2..=3).contains(&self.samples_per_metric) {
            return Err(EvalError::Configuration(format!(
                "samples_per_metric must be 2 or 3, got {}",
                self.samples_per_metric
            )));
        }

        if self.decision_ttl_secs == 0 || self.decision_ttl_secs > MAX_DECISION_TTL_SECS {
            return Err(EvalError::Configuration(format!(
                "decision_ttl_secs must be within 1..={}, got {}",
                MAX_DECISION_TTL_SECS, self.decision_ttl_secs
            )));
        }

        if !self.sample_temperature.is_finite() || self.sample_temperature < 0.0 {
            return Err(EvalError::Configuration(
                "sample_temperature must be a non-negative number".to_string(),
            ));
        }

        self.heuristic.validate()
    }
}

impl HeuristicConfig {
    pub fn validate(&self) -> Result<(), EvalError> {
        let constants = [
            ("faithfulness_baseline", self.faithfulness_baseline),
            ("faithfulness_overlap_max", self.faithfulness_overlap_max),
            ("faithfulness_phrase_bonus", self.faithfulness_phrase_bonus),
            ("faithfulness_evasive_penalty", self.faithfulness_evasive_penalty),
            ("context_precision_baseline", self.context_precision_baseline),
            (
                "context_precision_similarity_max",
                self.context_precision_similarity_max,
            ),
            ("answer_relevancy_baseline", self.answer_relevancy_baseline),
            ("answer_relevancy_overlap_max", self.answer_relevancy_overlap_max),
            (
                "answer_relevancy_domain_bonus",
                self.answer_relevancy_domain_bonus,
            ),
            (
                "answer_relevancy_evasive_penalty",
                self.answer_relevancy_evasive_penalty,
            ),
            ("weights.faithfulness", self.weights.faithfulness),
            ("weights.context_precision", self.weights.context_precision),
            ("weights.answer_relevancy", self.weights.answer_relevancy),
        ];
        for (name, value) in constants {
            if !value.is_finite() || value < 0.0 {
                return Err(EvalError::Configuration(format!(
                    "heuristic.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        let w = &self.weights;
        if w.faithfulness + w.context_precision + w.answer_relevancy <= 0.0 {
            return Err(EvalError::Configuration(
                "heuristic.weights must not all be zero".to_string(),
            ));
        }

        for bonus in &self.context_count_bonuses {
            if !bonus.bonus.is_finite() || bonus.bonus < 0.0 {
                return Err(EvalError::Configuration(format!(
                    "context count bonus for {} must be non-negative",
                    bonus.min_count
                )));
            }
        }
        let mut thresholds: Vec<usize> = self
            .context_count_bonuses
            .iter()
            .map(|b| b.min_count)
            .collect();
        thresholds.sort_unstable();
        if thresholds.windows(2).any(|w| w[0] == w[1]) {
            return Err(EvalError::Configuration(
                "context count thresholds must be distinct".to_string(),
            ));
        }

        if self.phrase_min_words < 2 {
            return Err(EvalError::Configuration(
                "phrase_min_words must be at least 2".to_string(),
            ));
        }

        if self.domain_term_saturation == 0 {
            return Err(EvalError::Configuration(
                "domain_term_saturation must be at least 1".to_string(),
            ));
        }

        for pattern in &self.evasive_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                EvalError::Configuration(format!("invalid evasive pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, EvalError> {
    value
        .trim()
        .parse()
        .map_err(|_| EvalError::Configuration(format!("invalid value for {}: '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EvaluationConfig::default();
        assert!(config.evaluation_enabled);
        assert_eq!(config.backend_name, "none");
        assert_eq!(config.samples_per_metric, 3);
        assert_eq!(config.heuristic.context_count_bonuses.len(), 3);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EvaluationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_sampling_requires_backend() {
        let config = EvaluationConfig {
            sample_rate: 0.1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }

    #[test]
    fn test_decision_ttl_bounds() {
        for ttl in [0, MAX_DECISION_TTL_SECS + 1, u64::MAX] {
            let config = EvaluationConfig {
                decision_ttl_secs: ttl,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, EvalError::Configuration(_)),
                "ttl {} should be rejected",
                ttl
            );
        }

        let config = EvaluationConfig {
            decision_ttl_secs: MAX_DECISION_TTL_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_rate_out_of_range() {
        for rate in [-0.1, 1.5, f64::NAN] {
            let config = EvaluationConfig {
                sample_rate: rate,
                backend_name: "openai".to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "rate {} should be rejected", rate);
        }
    }

    #[test]
    fn test_unknown_backend_fails() {
        let config = EvaluationConfig {
            sample_rate: 0.5,
            backend_name: "gpt-in-a-box".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gpt-in-a-box"));
    }

    #[test]
    fn test_from_toml() {
        let config = EvaluationConfig::from_toml_str(
            r#"
            sample_rate = 0.25
            backend_name = "anthropic"
            timeout_seconds = 5.0
            mode = "background"

            [heuristic]
            faithfulness_baseline = 0.25
            domain_terms = ["routing", "settings.yaml"]

            [backends.anthropic]
            model = "claude-3-5-haiku-20241022"
            unsupported_metrics = ["answer_relevancy"]
            "#,
        )
        .unwrap();

        assert_eq!(config.sample_rate, 0.25);
        assert_eq!(config.mode, EvaluationMode::Background);
        assert_eq!(config.heuristic.faithfulness_baseline, 0.25);
        // Untouched constants keep their defaults
        assert_eq!(config.heuristic.context_precision_baseline, 0.4);
        assert_eq!(
            config.backends.anthropic.unsupported_metrics,
            vec![Metric::AnswerRelevancy]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = EvaluationConfig::default()
            .merge_with_env(lookup(&[
                ("RAGSCORE_SAMPLE_RATE", "1.0"),
                ("RAGSCORE_BACKEND", "ollama"),
                ("RAGSCORE_MODE", "background"),
                ("OLLAMA_BASE_URL", "http://gpu-box:11434"),
            ]))
            .unwrap();

        assert_eq!(config.sample_rate, 1.0);
        assert_eq!(config.backend_name, "ollama");
        assert_eq!(config.mode, EvaluationMode::Background);
        assert_eq!(
            config.backends.ollama.base_url.as_deref(),
            Some("http://gpu-box:11434")
        );
    }

    #[test]
    fn test_env_garbage_is_configuration_error() {
        let err = EvaluationConfig::default()
            .merge_with_env(lookup(&[("RAGSCORE_SAMPLE_RATE", "half")]))
            .unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }

    #[test]
    fn test_invalid_evasive_pattern() {
        let mut config = EvaluationConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        config.heuristic.evasive_patterns.push("(unclosed".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_count_threshold() {
        let mut heuristic = HeuristicConfig::default();
        heuristic.context_count_bonuses.push(CountBonus {
            min_count: 3,
            bonus: 0.1,
        });
        assert!(heuristic.validate().is_err());
    }

    #[test]
    fn test_samples_per_metric_bounds() {
        let config = EvaluationConfig {
            sample_rate: 0.0,
            samples_per_metric: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_scoring_ignores_backend() {
        let config = EvaluationConfig {
            sample_rate: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(config.validate_scoring().is_ok());
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        assert!(EvaluationConfig::load_with(None, |c| c.sample_rate = 0.0).is_ok());

        let err = EvaluationConfig::load_with(None, |c| c.sample_rate = 1.5).unwrap_err();
        assert!(err.to_string().contains("sample_rate"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = EvaluationConfig::load(Some(PathBuf::from("/nonexistent/ragscore.toml")));
        assert!(err.is_err());
    }
}
