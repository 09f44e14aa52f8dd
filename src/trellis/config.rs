// SPDX-License-Identifier: MIT

//! Execution limits and model settings
//!
//! Both are plain serde structs so a graph definition's `engine:` / `model:`
//! sections deserialize straight into them. Environment variables override
//! the file values.

use crate::adk::error::TrellisError;
use crate::adk::model::gemini::GeminiModel;
use crate::adk::model::{GenerationConfig, Model};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RECURSION_LIMIT: usize = 25;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Bounds applied to every run of a compiled graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum number of steps before the run fails
    pub recursion_limit: usize,
    /// Wall-clock budget for the whole run, in seconds
    pub run_timeout_secs: Option<f64>,
    /// Wall-clock budget for one node invocation or routing decision
    pub step_timeout_secs: Option<f64>,
    /// Cap on concurrently outstanding branch invocations within a fan-out step
    pub max_concurrency: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            run_timeout_secs: None,
            step_timeout_secs: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}

impl ExecutionConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `TRELLIS_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("TRELLIS_RECURSION_LIMIT") {
            self.recursion_limit = v;
        }
        if let Some(v) = env_parse("TRELLIS_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = Some(v);
        }
        if let Some(v) = env_parse("TRELLIS_STEP_TIMEOUT_SECS") {
            self.step_timeout_secs = Some(v);
        }
        if let Some(v) = env_parse("TRELLIS_MAX_CONCURRENCY") {
            self.max_concurrency = v;
        }
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Concurrency cap, never below one
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// Model selection and generation parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub model_name: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl ModelSettings {
    /// Definition value, then `MODEL_NAME`, then `GEMINI_MODEL`, then the default
    pub fn resolve_model_name(&self) -> String {
        self.model_name
            .clone()
            .or_else(|| env::var("MODEL_NAME").ok())
            .or_else(|| env::var("GEMINI_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            ..Default::default()
        }
    }

    /// Build the Gemini client; needs `GOOGLE_API_KEY`
    pub fn build(&self) -> Result<Arc<dyn Model>, TrellisError> {
        let name = self.resolve_model_name();
        log::info!("Using model {}", name);
        let model = GeminiModel::from_env(name)?.with_generation_config(self.generation_config());
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ExecutionConfig::default();
        assert_eq!(cfg.recursion_limit, 25);
        assert_eq!(cfg.max_concurrency, 4);
        assert!(cfg.run_timeout().is_none());
        assert!(cfg.step_timeout().is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg: ExecutionConfig = serde_yaml::from_str("recursion_limit: 5\nstep_timeout_secs: 0.5").unwrap();
        assert_eq!(cfg.recursion_limit, 5);
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.step_timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_builders_and_concurrency_floor() {
        let cfg = ExecutionConfig::default()
            .with_run_timeout(Duration::from_secs(2))
            .with_max_concurrency(0);
        assert_eq!(cfg.run_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(cfg.concurrency(), 1);
    }

    #[test]
    fn test_explicit_model_name_wins() {
        let settings = ModelSettings {
            model_name: Some("gemini-custom".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.resolve_model_name(), "gemini-custom");
    }

    #[test]
    fn test_generation_config_carries_parameters() {
        let settings = ModelSettings {
            temperature: Some(0.2),
            max_output_tokens: Some(256),
            ..Default::default()
        };
        let gen = settings.generation_config();
        assert_eq!(gen.temperature, Some(0.2));
        assert_eq!(gen.max_output_tokens, Some(256));
    }
}
