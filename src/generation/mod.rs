//! Structured generation on top of the chat model.
//!
//! Every step (planner, chef, nutrition estimator) sends a prompt, pulls exactly one JSON
//! object out of the answer, deserializes it and validates it. A malformed answer is sent
//! back to the model with the parse error, up to `ModelConfig::repair_attempts` times.

pub mod chef;
pub mod planner;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api_connection::endpoints::{ChatCompletionRequest, JsonSchemaDefinition, ResponseFormat};
use crate::api_connection::{ApiConnectionError, ChatMessage, Provider};
use crate::config::ModelConfig;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model call failed: {0}")]
    Api(#[from] ApiConnectionError),
    #[error("{step}: model returned an empty response")]
    EmptyResponse { step: String },
    #[error("{step}: no JSON object found in model output:\n{content}")]
    NoJsonObject { step: String, content: String },
    #[error("{step}: could not parse JSON from model output: {source}")]
    InvalidJson {
        step: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{step}: output did not match the expected schema: {reason}")]
    SchemaMismatch { step: String, reason: String },
}

impl GenerationError {
    /// Errors caused by the content of an answer, which a re-prompt may fix.
    fn is_repairable(&self) -> bool {
        !matches!(self, GenerationError::Api(_))
    }
}

/// Post-deserialization checks a type can put on model output.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Anything that turns a conversation into raw text. `Provider` is the production
/// implementation; tests script their own.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        config: &ModelConfig,
        messages: &[ChatMessage],
        response_format: Option<ResponseFormat>,
    ) -> Result<String, GenerationError>;
}

#[async_trait]
impl TextGenerator for Provider {
    async fn generate(
        &self,
        config: &ModelConfig,
        messages: &[ChatMessage],
        response_format: Option<ResponseFormat>,
    ) -> Result<String, GenerationError> {
        let request = ChatCompletionRequest {
            model: config.model.clone(),
            messages: messages.to_vec(),
            response_format,
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
        };
        let response = self.call_chat_completion(request).await?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() >= 6) {
        return trimmed;
    }
    let inner = &trimmed[3..trimmed.len() - 3];
    // Drop the info string ("json") on the opening fence line.
    let inner = match inner.find('\n') {
        Some(newline) if !inner[..newline].trim().contains(['{', '[']) => &inner[newline + 1..],
        _ => inner.trim_start_matches("json"),
    };
    inner.trim()
}

/// The first top-level JSON object in `content`, ignoring code fences and any text before
/// or after it.
pub fn extract_json_object(step: &str, content: &str) -> Result<Value, GenerationError> {
    let stripped = strip_code_fences(content);
    if stripped.is_empty() {
        return Err(GenerationError::EmptyResponse { step: step.to_string() });
    }
    let start = stripped.find('{').ok_or_else(|| GenerationError::NoJsonObject {
        step: step.to_string(),
        content: stripped.to_string(),
    })?;

    let mut stream = serde_json::Deserializer::from_str(&stripped[start..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value @ Value::Object(_))) => Ok(value),
        Some(Ok(_)) | None => Err(GenerationError::NoJsonObject {
            step: step.to_string(),
            content: stripped.to_string(),
        }),
        Some(Err(source)) => Err(GenerationError::InvalidJson { step: step.to_string(), source }),
    }
}

pub fn parse_structured<T: DeserializeOwned + Validate>(step: &str, content: &str) -> Result<T, GenerationError> {
    let value = extract_json_object(step, content)?;
    let parsed: T = serde_json::from_value(value).map_err(|err| GenerationError::SchemaMismatch {
        step: step.to_string(),
        reason: err.to_string(),
    })?;
    parsed
        .validate()
        .map_err(|reason| GenerationError::SchemaMismatch { step: step.to_string(), reason })?;
    Ok(parsed)
}

/// Runs one generation step and returns its validated output.
pub async fn generate_structured<T: DeserializeOwned + Validate>(
    generator: &dyn TextGenerator,
    config: &ModelConfig,
    step: &str,
    mut messages: Vec<ChatMessage>,
    schema: Option<JsonSchemaDefinition>,
) -> Result<T, GenerationError> {
    let mut attempt = 0;
    loop {
        let raw = generator
            .generate(config, &messages, schema.clone().map(ResponseFormat::json_schema))
            .await?;
        debug!(step, attempt, chars = raw.len(), "received model output");

        match parse_structured::<T>(step, &raw) {
            Ok(parsed) => return Ok(parsed),
            Err(err) if err.is_repairable() && attempt < config.repair_attempts => {
                warn!(step, attempt, error = %err, "model output unusable, asking for a corrected answer");
                messages.push(ChatMessage::assistant(raw));
                messages.push(ChatMessage::user(format!(
                    "Your previous answer could not be used: {}. Reply with only the corrected JSON object.",
                    err
                )));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Dish {
        name: String,
    }

    impl Validate for Dish {
        fn validate(&self) -> Result<(), String> {
            if self.name.trim().is_empty() {
                return Err("name must not be empty".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json{\"a\": 1}```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_object_ignores_surrounding_text() {
        let value = extract_json_object("planner", "Sure! Here it is:\n{\"meal\": \"Dahl\"}\nEnjoy {not json}").unwrap();
        assert_eq!(value["meal"], "Dahl");

        let fenced = extract_json_object("chef", "```json\n{\"title\": \"Soup\"}\n```").unwrap();
        assert_eq!(fenced["title"], "Soup");
    }

    #[test]
    fn test_extract_json_object_errors() {
        assert!(matches!(extract_json_object("s", "   "), Err(GenerationError::EmptyResponse { .. })));
        assert!(matches!(extract_json_object("s", "no json here"), Err(GenerationError::NoJsonObject { .. })));
        assert!(matches!(extract_json_object("s", "{\"a\": }"), Err(GenerationError::InvalidJson { .. })));
    }

    #[test]
    fn test_parse_structured_validates() {
        let dish: Dish = parse_structured("s", "{\"name\": \"Dahl\"}").unwrap();
        assert_eq!(dish.name, "Dahl");
        let err = parse_structured::<Dish>("s", "{\"name\": \"  \"}").unwrap_err();
        assert!(err.to_string().contains("name must not be empty"));
        assert!(matches!(parse_structured::<Dish>("s", "{\"title\": 1}"), Err(GenerationError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn test_generate_structured_repairs_once() {
        let generator = ScriptedGenerator::new(&["not json at all", "{\"name\": \"Dahl\"}"]);
        let config = ModelConfig::planner("test-model");
        let dish: Dish = generate_structured(&generator, &config, "planner", vec![ChatMessage::user("plan")], None)
            .await
            .unwrap();
        assert_eq!(dish.name, "Dahl");

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][1].role, "assistant");
    }

    #[tokio::test]
    async fn test_generate_structured_gives_up_after_repairs() {
        let generator = ScriptedGenerator::new(&["nope", "still nope", "{\"name\": \"late\"}"]);
        let config = ModelConfig::planner("test-model");
        let result: Result<Dish, _> =
            generate_structured(&generator, &config, "planner", vec![ChatMessage::user("plan")], None).await;
        assert!(matches!(result, Err(GenerationError::NoJsonObject { .. })));
        assert_eq!(generator.seen.lock().unwrap().len(), 2);
    }
}
