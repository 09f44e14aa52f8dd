// SPDX-License-Identifier: MIT

//! Gemini Model - Google's Gemini API implementation

use super::{Content, GenerationConfig, Model, Part};
use crate::adk::error::{ModelError, TrellisError};
use crate::adk::tool::Tool;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::sync::Arc;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini model implementation
pub struct GeminiModel {
    client: Client,
    api_key: String,
    model_name: String,
    generation: Option<GenerationConfig>,
}

impl GeminiModel {
    /// Create a model with an explicit key
    pub fn new(model_name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model_name: model_name.into(),
            generation: None,
        }
    }

    /// Create a model reading `GOOGLE_API_KEY` from the environment
    pub fn from_env(model_name: impl Into<String>) -> Result<Self, TrellisError> {
        let api_key = env::var("GOOGLE_API_KEY")
            .map_err(|_| ModelError::ApiKeyMissing("gemini (GOOGLE_API_KEY)".to_string()))?;
        Ok(Self::new(model_name, api_key))
    }

    /// Generation settings used when a call passes none
    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation = Some(config);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn request_body(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
        tools: Option<&[Arc<dyn Tool>]>,
    ) -> Value {
        // Gemini takes system text as a separate instruction, not a turn
        let system: Vec<String> = history
            .iter()
            .filter(|c| c.role == "system")
            .map(|c| c.text())
            .collect();

        let contents: Vec<Value> = history
            .iter()
            .filter(|c| c.role != "system")
            .map(|c| {
                let parts: Vec<Value> = c.parts.iter().filter_map(part_to_gemini_json).collect();
                json!({ "role": gemini_role(&c.role), "parts": parts })
            })
            .collect();

        let mut body = json!({ "contents": contents });

        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }

        if let Some(cfg) = config.or(self.generation.as_ref()) {
            let mut gen = serde_json::Map::new();
            if let Some(t) = cfg.temperature {
                gen.insert("temperature".to_string(), json!(t));
            }
            if let Some(m) = cfg.max_output_tokens {
                gen.insert("maxOutputTokens".to_string(), json!(m));
            }
            if let Some(p) = cfg.top_p {
                gen.insert("topP".to_string(), json!(p));
            }
            if let Some(k) = cfg.top_k {
                gen.insert("topK".to_string(), json!(k));
            }
            if !gen.is_empty() {
                body["generationConfig"] = Value::Object(gen);
            }
        }

        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.schema()
                    })
                })
                .collect();
            body["tools"] = json!([{ "function_declarations": declarations }]);
        }

        body
    }
}

fn gemini_role(role: &str) -> &str {
    match role {
        "assistant" | "model" => "model",
        _ => "user",
    }
}

#[async_trait]
impl Model for GeminiModel {
    async fn generate_content(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
        tools: Option<&[Arc<dyn Tool>]>,
    ) -> Result<Content, TrellisError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_ENDPOINT, self.model_name, self.api_key
        );
        let body = self.request_body(history, config, tools);

        log::debug!(
            "Gemini request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self.client.post(&url).json(&body).send().await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ModelError::RateLimited { retry_after_secs }.into());
        }
        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(TrellisError::api("gemini", text));
        }

        let resp_json: Value = resp.json().await?;
        log::debug!("Gemini response: {}", resp_json);
        parse_response(&resp_json)
    }
}

/// Turn a `generateContent` response into a model message
pub fn parse_response(resp_json: &Value) -> Result<Content, TrellisError> {
    let candidate = resp_json["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| ModelError::InvalidResponse("no candidates in response".to_string()))?;

    match candidate.get("finishReason").and_then(|v| v.as_str()) {
        Some("SAFETY") => {
            return Err(ModelError::Blocked("safety filters".to_string()).into());
        }
        Some("UNEXPECTED_TOOL_CALL") => {
            return Err(ModelError::InvalidResponse(
                "unexpected tool call; the tool schema may be incompatible".to_string(),
            )
            .into());
        }
        Some("MALFORMED_FUNCTION_CALL") => {
            // Surface as text so the loop can continue
            let msg = candidate
                .get("finishMessage")
                .and_then(|m| m.as_str())
                .unwrap_or("malformed function call");
            log::warn!("Gemini malformed function call: {}", msg);
            return Ok(Content::model(format!(
                "I tried to use a tool that isn't available. {}",
                msg
            )));
        }
        _ => {}
    }

    let parts_json = candidate["content"]["parts"].as_array().ok_or_else(|| {
        ModelError::InvalidResponse(format!("no content parts in candidate: {}", candidate))
    })?;

    let parts = parts_json.iter().flat_map(parse_gemini_part).collect();
    Ok(Content::new("model", parts))
}

/// Serialize a Part to Gemini API JSON format
/// Returns None for parts that shouldn't be sent (e.g., Thinking)
pub fn part_to_gemini_json(part: &Part) -> Option<Value> {
    match part {
        Part::Text(t) => Some(json!({ "text": t })),
        Part::Thinking(_) => None,
        Part::FunctionCall {
            name,
            args,
            thought_signature,
        } => {
            let mut fc = json!({ "functionCall": { "name": name, "args": args } });
            if let Some(sig) = thought_signature {
                fc["thoughtSignature"] = json!(sig);
            }
            Some(fc)
        }
        Part::FunctionResponse { name, response } => {
            Some(json!({ "functionResponse": { "name": name, "response": response } }))
        }
    }
}

/// Parse a Gemini API JSON part into zero or more Parts
pub fn parse_gemini_part(p: &Value) -> Vec<Part> {
    let mut parts = Vec::new();

    if let Some(thought) = p.get("thought").and_then(|t| t.as_str()) {
        if !thought.is_empty() {
            parts.push(Part::Thinking(thought.to_string()));
        }
    }

    if let Some(text) = p["text"].as_str() {
        parts.push(Part::Text(text.to_string()));
    } else if let Some(fc) = p.get("functionCall") {
        parts.push(Part::FunctionCall {
            name: fc["name"].as_str().unwrap_or_default().to_string(),
            args: fc["args"].clone(),
            thought_signature: p
                .get("thoughtSignature")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string()),
        });
    }

    parts
}
