use serde_json::json;

use super::planner::ingredient_schema;
use super::{generate_structured, GenerationError, TextGenerator};
use crate::api_connection::endpoints::{JsonSchema, JsonSchemaDefinition, JsonSchemaProperty};
use crate::api_connection::ChatMessage;
use crate::config::ModelConfig;
use crate::models::{Plan, Recipe};

fn recipe_schema() -> JsonSchemaDefinition {
    JsonSchemaDefinition {
        name: "recipe".to_string(),
        strict: Some(false),
        schema: JsonSchema::object()
            .required_property("title", JsonSchemaProperty::new("string", "Recipe title"))
            .required_property("prep_time", JsonSchemaProperty::new("integer", "Preparation time in minutes"))
            .required_property("cook_time", JsonSchemaProperty::new("integer", "Cooking time in minutes"))
            .required_property("servings", JsonSchemaProperty::new("integer", "Number of servings"))
            .required_property(
                "ingredients",
                JsonSchemaProperty::new("array", "Ingredients with quantities").with_items(ingredient_schema()),
            )
            .required_property(
                "steps",
                JsonSchemaProperty::new("array", "Ordered cooking steps").with_items(JsonSchema::of_type("string")),
            ),
    }
}

fn recipe_format() -> String {
    let example = json!({
        "title": "descriptive recipe title",
        "prep_time": 15,
        "cook_time": 30,
        "servings": 4,
        "ingredients": [{"item": "ingredient name", "qty": "200g"}],
        "steps": ["Step 1 description", "Step 2 description"]
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

fn chef_prompt(plan_json: &str) -> String {
    format!(
        "You are a skilled chef. Given this meal plan:

{}

Generate a complete recipe as one JSON object with this format:
{}

If the meal plan includes dietary needs (e.g. vegan, vegetarian), the recipe and its ingredients must comply.
Give ingredient quantities in grams whenever possible.
Return ONLY the JSON object. No other text, no explanations, no markdown formatting.",
        plan_json,
        recipe_format()
    )
}

fn nutrition_chef_prompt(plan_json: &str, goals: &str) -> String {
    format!(
        "You are a nutrition-aware chef. Create a detailed recipe from the meal plan, optimized for the nutrition goals.

MEAL PLAN: {}
NUTRITION GOALS: {}

Instructions:
1. Respect the goals as stated: \"balanced\" keeps it balanced, \"high protein\" adds protein-rich ingredients, \"low carb\" minimizes carbohydrates.
2. Keep the core ingredients of the plan unless the goals require a change.
3. Use realistic quantities in grams and clear cooking steps.

Return ONLY a JSON object with this format:
{}",
        plan_json,
        goals,
        recipe_format()
    )
}

/// Turns a plan into a full recipe. With `goals`, the nutrition-aware prompt is used.
pub async fn generate_recipe(
    generator: &dyn TextGenerator,
    config: &ModelConfig,
    plan: &Plan,
    goals: Option<&str>,
) -> Result<Recipe, GenerationError> {
    let plan_json = serde_json::to_string(plan).map_err(|source| GenerationError::InvalidJson {
        step: "chef".to_string(),
        source,
    })?;
    let prompt = match goals {
        Some(goals) if !goals.trim().is_empty() => nutrition_chef_prompt(&plan_json, goals),
        _ => chef_prompt(&plan_json),
    };
    generate_structured(generator, config, "chef", vec![ChatMessage::user(prompt)], Some(recipe_schema())).await
}
