use serde_json::json;

use super::{generate_structured, GenerationError, TextGenerator};
use crate::api_connection::endpoints::{JsonSchema, JsonSchemaDefinition, JsonSchemaProperty};
use crate::api_connection::ChatMessage;
use crate::config::ModelConfig;
use crate::models::{Plan, UserNeeds};

pub(crate) fn ingredient_schema() -> JsonSchema {
    JsonSchema::object()
        .required_property("item", JsonSchemaProperty::new("string", "Ingredient name, e.g. 'red lentils'"))
        .required_property("qty", JsonSchemaProperty::new("string", "Quantity in grams where possible, e.g. '100g'"))
}

fn plan_schema() -> JsonSchemaDefinition {
    JsonSchemaDefinition {
        name: "meal_plan".to_string(),
        strict: Some(false),
        schema: JsonSchema::object()
            .required_property("meal", JsonSchemaProperty::new("string", "Name of the proposed dish"))
            .required_property(
                "ingredients",
                JsonSchemaProperty::new("array", "Ingredients with quantities").with_items(ingredient_schema()),
            )
            .property("dietary_needs", JsonSchemaProperty::new("string", "Dietary needs the meal satisfies")),
    }
}

fn planner_prompt(needs: &UserNeeds) -> String {
    let example = json!({
        "meal": "Red Lentil Dahl",
        "ingredients": [
            {"item": "red lentils", "qty": "100g"},
            {"item": "spinach", "qty": "50g"}
        ],
        "dietary_needs": "vegetarian"
    });
    format!(
        "You are a meal planner.

User constraints:
- Cuisine: {}
- Max prep time: {} minutes
- Dietary needs: {}

If dietary needs are specified (e.g. vegan, vegetarian), the meal and every ingredient must comply.
Give quantities in grams whenever possible.

Produce exactly one JSON object and nothing else, like:
{}",
        needs.cuisine,
        needs.max_prep_time,
        needs.dietary_needs.as_deref().unwrap_or("none"),
        serde_json::to_string_pretty(&example).unwrap_or_default()
    )
}

/// Proposes a dish and its ingredient list for the user's constraints.
pub async fn generate_plan(
    generator: &dyn TextGenerator,
    config: &ModelConfig,
    needs: &UserNeeds,
) -> Result<Plan, GenerationError> {
    let messages = vec![ChatMessage::user(planner_prompt(needs))];
    let mut plan: Plan = generate_structured(generator, config, "planner", messages, Some(plan_schema())).await?;
    if plan.dietary_needs.is_none() {
        plan.dietary_needs = needs.dietary_needs.clone();
    }
    Ok(plan)
}
