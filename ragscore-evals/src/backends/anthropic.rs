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

//! Anthropic messages API backend

use super::{http_client, require_api_key, send_checked, supports};
use crate::config::ProviderSettings;
use crate::interaction::Metric;
use crate::llm_client::{GenerateOptions, LLMBackend, LLMError};
use crate::EvalError;
use reqwest::blocking::Client;

pub const NAME: &str = "anthropic";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const API_VERSION: &str = "2023-06-01";
const SYSTEM_PROMPT: &str = "You are an expert evaluator. Respond only with valid JSON.";

/// Anthropic Claude backend
pub struct AnthropicBackend {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    unsupported: Vec<Metric>,
    client: Client,
}

impl AnthropicBackend {
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, EvalError> {
        let api_key = require_api_key(NAME, settings)?;
        Ok(Self {
            api_key,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_tokens: settings.max_tokens,
            unsupported: settings.unsupported_metrics.clone(),
            client: http_client(settings)?,
        })
    }
}

impl LLMBackend for AnthropicBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LLMError> {
        let request = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens.unwrap_or(options.max_tokens),
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "system": SYSTEM_PROMPT,
            "temperature": options.temperature
        });

        let response = send_checked(
            self.client
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .header("Content-Type", "application/json")
                .json(&request),
        )?;

        let response_data: serde_json::Value = response.json()?;

        // Concatenate text blocks; tool or thinking blocks carry no verdict
        let blocks = response_data["content"]
            .as_array()
            .ok_or_else(|| LLMError::InvalidResponse("Missing content".to_string()))?;
        let text: String = blocks
            .iter()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(LLMError::InvalidResponse("No text content".to_string()));
        }
        Ok(text)
    }

    fn supports_metric(&self, metric: Metric) -> bool {
        supports(&self.unsupported, metric)
    }
}
