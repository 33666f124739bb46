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

//! Provider adapters and startup resolution
//!
//! Every adapter is a blocking `reqwest` client implementing
//! [`LLMBackend`](crate::llm_client::LLMBackend). They are only driven from
//! tokio's blocking pool through [`BackendAdapter`](crate::llm_client::BackendAdapter).

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAIBackend;

use crate::config::{EvaluationConfig, ProviderSettings};
use crate::interaction::Metric;
use crate::llm_client::{LLMBackend, LLMError};
use crate::EvalError;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Heuristic-only deployments
pub const NONE: &str = "none";

pub const KNOWN_BACKENDS: &[&str] = &[NONE, openai::NAME, anthropic::NAME, ollama::NAME];

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub fn is_known(name: &str) -> bool {
    KNOWN_BACKENDS.contains(&name)
}

/// Resolve the configured provider. Unknown names and missing credentials
/// fail here, at startup, rather than on the first sampled interaction.
///
/// Returns `None` for the `none` backend.
pub fn build_backend(config: &EvaluationConfig) -> Result<Option<Arc<dyn LLMBackend>>, EvalError> {
    let backend: Arc<dyn LLMBackend> = match config.backend_name.as_str() {
        NONE => return Ok(None),
        openai::NAME => Arc::new(OpenAIBackend::from_settings(&config.backends.openai)?),
        anthropic::NAME => Arc::new(AnthropicBackend::from_settings(&config.backends.anthropic)?),
        ollama::NAME => Arc::new(OllamaBackend::from_settings(&config.backends.ollama)?),
        other => {
            return Err(EvalError::Configuration(format!(
                "unknown backend '{}' (expected one of: {})",
                other,
                KNOWN_BACKENDS.join(", ")
            )))
        }
    };

    tracing::info!(
        backend = backend.name(),
        model = backend.model_name(),
        "LLM evaluation backend ready"
    );
    Ok(Some(backend))
}

pub(crate) fn http_client(settings: &ProviderSettings) -> Result<Client, EvalError> {
    let timeout = settings
        .request_timeout_secs
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .map_err(|e| EvalError::Configuration(format!("cannot build HTTP client: {}", e)))
}

pub(crate) fn require_api_key(provider: &str, settings: &ProviderSettings) -> Result<String, EvalError> {
    settings
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| EvalError::Configuration(format!("{} backend requires an api_key", provider)))
}

pub(crate) fn supports(unsupported: &[Metric], metric: Metric) -> bool {
    !unsupported.contains(&metric)
}

/// Map transport failures and non-success statuses onto [`LLMError`].
pub(crate) fn send_checked(request: reqwest::blocking::RequestBuilder) -> Result<Response, LLMError> {
    let response = request.send().map_err(|e| {
        if e.is_connect() || e.is_timeout() {
            LLMError::Unavailable(e.to_string())
        } else {
            LLMError::Http(e)
        }
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().unwrap_or_default();
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(LLMError::RateLimitExceeded),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LLMError::Unavailable(format!(
            "authentication failed ({}): {}",
            status.as_u16(),
            message
        ))),
        s if s.is_server_error() => Err(LLMError::Unavailable(format!(
            "server error ({}): {}",
            s.as_u16(),
            message
        ))),
        s => Err(LLMError::ApiError {
            status: s.as_u16(),
            message,
        }),
    }
}
