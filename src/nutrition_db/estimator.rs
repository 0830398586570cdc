use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::nutrients::{NutrientField, NutrientValues};
use crate::api_connection::endpoints::{JsonSchema, JsonSchemaDefinition, JsonSchemaProperty, ResponseFormat};
use crate::api_connection::ChatMessage;
use crate::config::ModelConfig;
use crate::generation::{extract_json_object, TextGenerator};

// Relative deviation from the 4/4/9 energy estimate above which a warning is logged.
const ENERGY_MISMATCH_TOLERANCE: f64 = 0.5;

/// Source of synthetic per-100 g nutrition profiles for foods the store does not know.
#[async_trait]
pub trait NutritionEstimator: Send + Sync {
    /// A complete profile, or `None` when no usable estimate could be obtained.
    async fn estimate(&self, ingredient_name: &str) -> Option<NutrientValues>;
}

/// Asks the chat model for a full nutrient profile.
pub struct LlmNutritionEstimator {
    generator: Arc<dyn TextGenerator>,
    config: ModelConfig,
}

impl LlmNutritionEstimator {
    pub fn new(generator: Arc<dyn TextGenerator>, config: ModelConfig) -> Self {
        Self { generator, config }
    }
}

fn estimate_schema() -> JsonSchemaDefinition {
    let schema = NutrientField::ALL.iter().fold(JsonSchema::object(), |schema, field| {
        schema.required_property(field.key(), JsonSchemaProperty::new("number", field.description()))
    });
    JsonSchemaDefinition {
        name: "nutrition_profile".to_string(),
        strict: Some(true),
        schema: JsonSchema {
            additional_properties: Some(false),
            ..schema
        },
    }
}

fn estimate_messages(ingredient_name: &str) -> Vec<ChatMessage> {
    let fields = NutrientField::ALL
        .iter()
        .map(|field| format!("- {}: {}", field.key(), field.description()))
        .collect::<Vec<_>>()
        .join("\n");
    vec![
        ChatMessage::system(format!(
            "You are a nutrition expert. Provide nutrition data for food ingredients per 100 grams.

Base your estimates on USDA data when possible. For processed or prepared foods, estimate from similar ingredients.
- All values are per 100 grams of the ingredient.
- Use 0.0 for nutrients that are truly absent (like vitamin B12 in plant foods).
- Be conservative: underestimate rather than overestimate.

Return one JSON object with exactly these numeric fields:
{}",
            fields
        )),
        ChatMessage::user(format!(
            "Provide complete nutrition data for: {}\n\nConsider the typical form of this ingredient as used in cooking.",
            ingredient_name
        )),
    ]
}

#[async_trait]
impl NutritionEstimator for LlmNutritionEstimator {
    async fn estimate(&self, ingredient_name: &str) -> Option<NutrientValues> {
        let response_format = Some(ResponseFormat::json_schema(estimate_schema()));
        let raw = match self
            .generator
            .generate(&self.config, &estimate_messages(ingredient_name), response_format)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(ingredient = ingredient_name, error = %err, "Nutrition estimate request failed");
                return None;
            }
        };

        let parsed = extract_json_object("nutrition estimate", &raw)
            .map_err(|err| err.to_string())
            .and_then(|value| NutrientValues::from_complete_json(&value));
        match parsed {
            Ok(values) => {
                debug!(ingredient = ingredient_name, "Received nutrition estimate");
                Some(values)
            }
            Err(err) => {
                warn!(ingredient = ingredient_name, error = %err, "Discarding malformed nutrition estimate");
                None
            }
        }
    }
}

/// Plausibility check applied before an estimate is stored. Negative amounts reject the
/// estimate; an energy value far from what the macros imply is only logged.
pub fn validate_estimate(values: &NutrientValues) -> bool {
    let negative = values.negative_fields();
    if !negative.is_empty() {
        warn!(fields = ?negative, "Rejecting nutrition estimate with negative values");
        return false;
    }

    let calories = values.value_or_zero(NutrientField::Calories);
    let from_macros = 4.0 * values.value_or_zero(NutrientField::Protein)
        + 4.0 * values.value_or_zero(NutrientField::Carbs)
        + 9.0 * values.value_or_zero(NutrientField::Fat);
    if from_macros > 0.0 {
        let deviation = (calories - from_macros).abs() / from_macros;
        if deviation > ENERGY_MISMATCH_TOLERANCE {
            warn!(
                stated = calories,
                from_macros = (from_macros * 10.0).round() / 10.0,
                "Calorie mismatch in nutrition estimate, keeping it"
            );
        }
    }
    true
}
