use dotenv::dotenv;
use reqwest::Client;
use serde_json::json;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::endpoints::{
    ChatCompletionRequest, ChatCompletionResponse, OpenRouterAvailableModel, Provider,
    OPENROUTER_MODELS,
};

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ApiConnectionError {
    #[error("API key not found in environment: {0}")]
    MissingApiKey(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("API error {status}: {error_body}")]
    ApiError {
        status: reqwest::StatusCode,
        error_body: String,
    },
}

impl Provider {
    /// Builds an OpenRouter provider. The HTTP client (and its timeout) lives as long as the
    /// provider; callers own it and pass it to whatever needs model access.
    pub fn openrouter(api_key_env_var_name: &str, timeout: Duration) -> Result<Self, ApiConnectionError> {
        dotenv().ok();
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::OpenRouter {
            api_key: api_key_env_var_name.to_string(),
            available_models: OPENROUTER_MODELS.to_vec(),
            client,
        })
    }

    pub fn get_available_models(&self) -> Vec<OpenRouterAvailableModel> {
        match self {
            Provider::OpenRouter {
                available_models, ..
            } => available_models.clone(),
        }
    }

    fn pinned_source(&self, model: &str) -> Option<&'static str> {
        match self {
            Provider::OpenRouter {
                available_models, ..
            } => available_models
                .iter()
                .find(|m| m.model_name == model && !m.model_source.is_empty())
                .map(|m| m.model_source),
        }
    }

    pub async fn call_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ApiConnectionError> {
        match self {
            Provider::OpenRouter {
                api_key: api_key_env_var_name,
                client,
                ..
            } => {
                dotenv().ok();
                let actual_api_key = env::var(api_key_env_var_name)
                    .map_err(|_| ApiConnectionError::MissingApiKey(api_key_env_var_name.clone()))?;

                let mut request_payload = serde_json::to_value(&request)?;
                if let (Some(obj), Some(source)) =
                    (request_payload.as_object_mut(), self.pinned_source(&request.model))
                {
                    obj.insert("provider".to_string(), json!({ "only": [source] }));
                }

                let site_url = env::var("SITE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
                let app_name = env::var("APP_NAME").unwrap_or_else(|_| "RecipeNutrition".to_string());

                debug!(model = %request.model, messages = request.messages.len(), "sending chat completion");
                let response = client
                    .post(OPENROUTER_URL)
                    .bearer_auth(actual_api_key)
                    .header("Content-Type", "application/json")
                    .header("HTTP-Referer", site_url)
                    .header("X-Title", app_name)
                    .json(&request_payload)
                    .send()
                    .await?;

                if response.status().is_success() {
                    let chat_response = response.json::<ChatCompletionResponse>().await?;
                    Ok(chat_response)
                } else {
                    let status = response.status();
                    let error_body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Failed to read error body".to_string());
                    Err(ApiConnectionError::ApiError { status, error_body })
                }
            }
        }
    }
}
