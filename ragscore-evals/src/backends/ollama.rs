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

//! Local Ollama backend (`/api/generate`)

use super::{http_client, send_checked, supports};
use crate::config::ProviderSettings;
use crate::interaction::Metric;
use crate::llm_client::{GenerateOptions, LLMBackend, LLMError};
use crate::EvalError;
use reqwest::blocking::Client;

pub const NAME: &str = "ollama";

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";

/// No API key; the endpoint is assumed to be on a trusted network
pub struct OllamaBackend {
    model: String,
    base_url: String,
    max_tokens: Option<u32>,
    unsupported: Vec<Metric>,
    client: Client,
}

impl OllamaBackend {
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, EvalError> {
        Ok(Self {
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_tokens: settings.max_tokens,
            unsupported: settings.unsupported_metrics.clone(),
            client: http_client(settings)?,
        })
    }
}

impl LLMBackend for OllamaBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LLMError> {
        let mut request = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": self.max_tokens.unwrap_or(options.max_tokens),
            }
        });
        if options.json_mode {
            request["format"] = serde_json::json!("json");
        }

        let response = send_checked(
            self.client
                .post(format!("{}/api/generate", self.base_url))
                .json(&request),
        )?;

        let response_data: serde_json::Value = response.json()?;
        response_data["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LLMError::InvalidResponse("Missing response".to_string()))
    }

    fn supports_metric(&self, metric: Metric) -> bool {
        supports(&self.unsupported, metric)
    }
}
