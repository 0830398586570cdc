use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::api_connection::endpoints::DEFAULT_MODEL;
use crate::nutrition_db::fuzzy_matcher::DEFAULT_MIN_CONFIDENCE;

pub const API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";
pub const DB_PATH_ENV_VAR: &str = "NUTRITION_DB_PATH";
pub const MIN_CONFIDENCE_ENV_VAR: &str = "NUTRITION_MIN_CONFIDENCE";
pub const MODEL_ENV_VAR: &str = "RECIPE_MODEL";
pub const TIMEOUT_ENV_VAR: &str = "LLM_TIMEOUT_SECS";

pub const DEFAULT_DB_PATH: &str = "data/nutrition.json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Settings for one kind of model call. Passed explicitly to every generation step, so a
/// temperature change never leaks into another step.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// How many times a malformed answer is sent back to the model for repair.
    pub repair_attempts: u32,
}

impl ModelConfig {
    pub fn new(model: &str, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            temperature,
            max_tokens: DEFAULT_MAX_TOKENS,
            repair_attempts: 1,
        }
    }

    pub fn planner(model: &str) -> Self {
        Self::new(model, 0.9)
    }

    pub fn chef(model: &str) -> Self {
        Self::new(model, 1.1)
    }

    pub fn nutrition_chef(model: &str) -> Self {
        Self::new(model, 0.8)
    }

    pub fn estimator(model: &str) -> Self {
        Self::new(model, 0.1)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name of the environment variable holding the API key, not the key itself.
    pub api_key_env_var: String,
    pub db_path: PathBuf,
    pub min_confidence: f64,
    pub model: String,
    pub request_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key_env_var: API_KEY_ENV_VAR.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Ok(path) = env::var(DB_PATH_ENV_VAR) {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(raw) = env::var(MIN_CONFIDENCE_ENV_VAR) {
            let value: f64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number, got '{}'", MIN_CONFIDENCE_ENV_VAR, raw))?;
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0 and 1, got {}", MIN_CONFIDENCE_ENV_VAR, value);
            }
            config.min_confidence = value;
        }
        if let Ok(model) = env::var(MODEL_ENV_VAR) {
            if !model.trim().is_empty() {
                config.model = model.trim().to_string();
            }
        }
        if let Ok(raw) = env::var(TIMEOUT_ENV_VAR) {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds, got '{}'", TIMEOUT_ENV_VAR, raw))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_presets_only_differ_in_temperature() {
        let planner = ModelConfig::planner("m");
        let chef = ModelConfig::chef("m");
        assert_eq!(planner.model, chef.model);
        assert_eq!(planner.max_tokens, chef.max_tokens);
        assert!(chef.temperature > planner.temperature);
        assert_eq!(ModelConfig::estimator("m").temperature, 0.1);
    }

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();
        assert_eq!(config.api_key_env_var, API_KEY_ENV_VAR);
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.min_confidence, 0.3);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
