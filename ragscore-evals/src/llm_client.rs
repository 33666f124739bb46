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

//! LLM backend abstraction for LLM-as-judge evaluation
//!
//! Providers implement the synchronous [`LLMBackend`] capability. Async callers
//! go through [`BackendAdapter`], which runs every provider call on tokio's
//! blocking pool and awaits the join handle. The adapter never builds a
//! runtime of its own and never blocks an async worker thread.

use crate::interaction::Metric;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Per-call generation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object when it supports that
    pub json_mode: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
            json_mode: true,
        }
    }
}

/// Capability every provider integration implements
pub trait LLMBackend: Send + Sync {
    /// Provider identifier used in records and metric labels (e.g. "openai")
    fn name(&self) -> &str;

    /// Model used for judging
    fn model_name(&self) -> &str;

    /// Blocking generation. Only ever called from a blocking context.
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LLMError>;

    /// Whether `generate_batch` is implemented natively
    fn supports_batch(&self) -> bool {
        false
    }

    /// Ordered batch generation; output has the same length and order as `prompts`.
    ///
    /// Default implementation serializes calls to `generate`.
    fn generate_batch(
        &self,
        prompts: &[String],
        options: &GenerateOptions,
    ) -> Vec<Result<String, LLMError>> {
        prompts
            .iter()
            .map(|prompt| self.generate(prompt, options))
            .collect()
    }

    /// Whether the provider can structurally score `metric`
    fn supports_metric(&self, _metric: Metric) -> bool {
        true
    }
}

/// Errors from LLM backends
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend worker failed: {0}")]
    Worker(String),
}

/// Async facade over a synchronous backend
#[derive(Clone)]
pub struct BackendAdapter {
    backend: Arc<dyn LLMBackend>,
}

impl BackendAdapter {
    pub fn new(backend: Arc<dyn LLMBackend>) -> Self {
        Self { backend }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn supports_batch(&self) -> bool {
        self.backend.supports_batch()
    }

    pub fn supports_metric(&self, metric: Metric) -> bool {
        self.backend.supports_metric(metric)
    }

    /// Synchronous passthrough, for callers already on a blocking thread
    pub fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LLMError> {
        self.backend.generate(prompt, options)
    }

    /// Generate on the blocking pool and await the result.
    ///
    /// Dropping the returned future abandons the result; the provider call
    /// finishes on its worker thread and its output is discarded.
    pub async fn generate_async(
        &self,
        prompt: String,
        options: GenerateOptions,
    ) -> Result<String, LLMError> {
        self.generate_guarded(prompt, options, ()).await
    }

    /// Like [`generate_async`](Self::generate_async), but keeps `guard` alive
    /// until the provider call has actually returned, even if the caller has
    /// given up waiting. Used to hold a concurrency permit for the real
    /// duration of the call.
    pub async fn generate_guarded<G>(
        &self,
        prompt: String,
        options: GenerateOptions,
        guard: G,
    ) -> Result<String, LLMError>
    where
        G: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || {
            let result = backend.generate(&prompt, &options);
            drop(guard);
            result
        })
        .await
        .map_err(|e| LLMError::Worker(e.to_string()))?
    }

    /// Ordered batch generation on the blocking pool.
    ///
    /// Always returns exactly one result per prompt, in input order.
    pub async fn generate_batch_async(
        &self,
        prompts: Vec<String>,
        options: GenerateOptions,
    ) -> Vec<Result<String, LLMError>> {
        let expected = prompts.len();
        let backend = Arc::clone(&self.backend);

        let joined = tokio::task::spawn_blocking(move || {
            backend.generate_batch(&prompts, &options)
        })
        .await;

        match joined {
            Ok(results) if results.len() == expected => results,
            Ok(results) => {
                tracing::warn!(
                    backend = self.name(),
                    expected,
                    got = results.len(),
                    "Backend returned a batch of the wrong length"
                );
                (0..expected)
                    .map(|_| {
                        Err(LLMError::InvalidResponse(format!(
                            "batch length mismatch: expected {}, got {}",
                            expected,
                            results.len()
                        )))
                    })
                    .collect()
            }
            Err(e) => {
                let message = e.to_string();
                (0..expected)
                    .map(|_| Err(LLMError::Worker(message.clone())))
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct EchoBackend {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl EchoBackend {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl LLMBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        fn model_name(&self) -> &str {
            "echo-1"
        }

        fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, LLMError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(format!("echo: {}", prompt))
        }

        fn supports_metric(&self, metric: Metric) -> bool {
            metric != Metric::AnswerRelevancy
        }
    }

    /// Reverses batch order internally but must still answer in input order.
    struct NativeBatchBackend;

    impl LLMBackend for NativeBatchBackend {
        fn name(&self) -> &str {
            "batch"
        }

        fn model_name(&self) -> &str {
            "batch-1"
        }

        fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, LLMError> {
            Ok(prompt.to_uppercase())
        }

        fn supports_batch(&self) -> bool {
            true
        }

        fn generate_batch(
            &self,
            prompts: &[String],
            options: &GenerateOptions,
        ) -> Vec<Result<String, LLMError>> {
            let mut out: Vec<(usize, Result<String, LLMError>)> = prompts
                .iter()
                .enumerate()
                .rev()
                .map(|(i, p)| (i, self.generate(p, options)))
                .collect();
            out.sort_by_key(|(i, _)| *i);
            out.into_iter().map(|(_, r)| r).collect()
        }
    }

    struct ShortBatchBackend;

    impl LLMBackend for ShortBatchBackend {
        fn name(&self) -> &str {
            "short"
        }

        fn model_name(&self) -> &str {
            "short-1"
        }

        fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, LLMError> {
            Ok(String::new())
        }

        fn generate_batch(
            &self,
            _prompts: &[String],
            _options: &GenerateOptions,
        ) -> Vec<Result<String, LLMError>> {
            vec![Ok("only one".to_string())]
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_generate_async_does_not_block_the_runtime() {
        let adapter = BackendAdapter::new(Arc::new(EchoBackend::new(Duration::from_millis(300))));
        let start = Instant::now();

        let (generated, ticked_at) = tokio::join!(
            adapter.generate_async("hi".to_string(), GenerateOptions::default()),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                start.elapsed()
            }
        );

        assert_eq!(generated.unwrap(), "echo: hi");
        // The single runtime thread stayed free while the backend slept
        assert!(ticked_at < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_serial_batch_preserves_order() {
        let backend = Arc::new(EchoBackend::new(Duration::ZERO));
        let adapter = BackendAdapter::new(backend.clone());
        assert!(!adapter.supports_batch());

        let prompts: Vec<String> = (0..5).map(|i| format!("p{}", i)).collect();
        let results = adapter
            .generate_batch_async(prompts.clone(), GenerateOptions::default())
            .await;

        assert_eq!(results.len(), 5);
        for (prompt, result) in prompts.iter().zip(results) {
            assert_eq!(result.unwrap(), format!("echo: {}", prompt));
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_native_batch_preserves_order() {
        let adapter = BackendAdapter::new(Arc::new(NativeBatchBackend));
        assert!(adapter.supports_batch());

        let results = adapter
            .generate_batch_async(
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                GenerateOptions::default(),
            )
            .await;
        let values: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_batch_length_mismatch_becomes_errors() {
        let adapter = BackendAdapter::new(Arc::new(ShortBatchBackend));
        let results = adapter
            .generate_batch_async(
                vec!["a".to_string(), "b".to_string()],
                GenerateOptions::default(),
            )
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_err()));
    }

    #[tokio::test]
    async fn test_guard_outlives_abandoned_call() {
        let adapter = BackendAdapter::new(Arc::new(EchoBackend::new(Duration::from_millis(200))));
        let guard = Arc::new(());
        let observer = Arc::downgrade(&guard);

        let call = adapter.generate_guarded("x".to_string(), GenerateOptions::default(), guard);
        let timed_out = tokio::time::timeout(Duration::from_millis(20), call).await;
        assert!(timed_out.is_err());

        // The provider call is still running and still holds the guard
        assert!(observer.upgrade().is_some());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(observer.upgrade().is_none());
    }

    #[test]
    fn test_supports_metric() {
        let adapter = BackendAdapter::new(Arc::new(EchoBackend::new(Duration::ZERO)));
        assert!(adapter.supports_metric(Metric::Faithfulness));
        assert!(!adapter.supports_metric(Metric::AnswerRelevancy));
    }
}
