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

//! OpenAI-compatible chat completions backend

use super::{http_client, require_api_key, send_checked, supports};
use crate::config::ProviderSettings;
use crate::interaction::Metric;
use crate::llm_client::{GenerateOptions, LLMBackend, LLMError};
use crate::EvalError;
use reqwest::blocking::Client;

pub const NAME: &str = "openai";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const SYSTEM_PROMPT: &str = "You are an expert evaluator. Respond only with valid JSON.";

pub struct OpenAIBackend {
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    unsupported: Vec<Metric>,
    client: Client,
}

impl OpenAIBackend {
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

impl LLMBackend for OpenAIBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LLMError> {
        let mut request = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": SYSTEM_PROMPT
                },
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": options.temperature,
            "max_tokens": self.max_tokens.unwrap_or(options.max_tokens),
        });
        if options.json_mode {
            request["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let response = send_checked(
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request),
        )?;

        let response_data: serde_json::Value = response.json()?;

        response_data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LLMError::InvalidResponse("Missing content".to_string()))
    }

    fn supports_metric(&self, metric: Metric) -> bool {
        supports(&self.unsupported, metric)
    }
}
