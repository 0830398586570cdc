//! The nutrition store exposed as named tools taking and returning JSON.
//!
//! Payload shapes are stable: the pipeline, the stdio server and external clients all read
//! the same keys.

pub mod channel;
pub mod server;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::api_connection::endpoints::{JsonSchema, JsonSchemaProperty};
use crate::nutrition_db::NutritionDb;
use crate::recipe_aggregator::{calculate_recipe_nutrition, AggregationOptions, IngredientQuantity};

pub const FIND_INGREDIENT: &str = "find_ingredient";
pub const GET_NUTRITION_BY_ID: &str = "get_nutrition_by_id";
pub const SEARCH_INGREDIENTS: &str = "search_ingredients";
pub const ADD_INGREDIENT: &str = "add_ingredient";
pub const GET_HIGH_PROTEIN_FOODS: &str = "get_high_protein_foods";
pub const GET_DATABASE_STATS: &str = "get_database_stats";
pub const CALCULATE_RECIPE_NUTRITION: &str = "calculate_recipe_nutrition";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("{0}")]
    Failed(String),
    #[error("Tool transport error: {0}")]
    Transport(String),
    #[error("Tool transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed tool message: {0}")]
    Protocol(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonSchema,
}

fn tool(name: &str, description: &str, input_schema: JsonSchema) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    let ingredient_quantity = JsonSchema::object()
        .required_property("name", JsonSchemaProperty::new("string", "Ingredient name"))
        .required_property("quantity_grams", JsonSchemaProperty::new("number", "Quantity in grams"));

    vec![
        tool(
            FIND_INGREDIENT,
            "Find foods matching an ingredient name, best match first",
            JsonSchema::object()
                .required_property("ingredient_name", JsonSchemaProperty::new("string", "Name of the ingredient to find"))
                .property(
                    "max_results",
                    JsonSchemaProperty::new("integer", "Maximum number of results").with_default(json!(5)),
                ),
        ),
        tool(
            GET_NUTRITION_BY_ID,
            "Get the nutrition record for a food id",
            JsonSchema::object().required_property("food_id", JsonSchemaProperty::new("string", "Food identifier")),
        ),
        tool(
            SEARCH_INGREDIENTS,
            "Case-insensitive substring search over food descriptions",
            JsonSchema::object()
                .required_property("description", JsonSchemaProperty::new("string", "Text to look for in descriptions")),
        ),
        tool(
            ADD_INGREDIENT,
            "Look up an ingredient with a confident match; never creates records",
            JsonSchema::object()
                .required_property("ingredient_name", JsonSchemaProperty::new("string", "Name of the ingredient")),
        ),
        tool(
            GET_HIGH_PROTEIN_FOODS,
            "Foods with at least the given protein per 100g",
            JsonSchema::object().property(
                "min_protein",
                JsonSchemaProperty::new("number", "Minimum protein in grams per 100g").with_default(json!(20.0)),
            ),
        ),
        tool(GET_DATABASE_STATS, "Counts of foods by source and data coverage", JsonSchema::object()),
        tool(
            CALCULATE_RECIPE_NUTRITION,
            "Total nutrition of a list of ingredients with gram quantities",
            JsonSchema::object().required_property(
                "ingredients",
                JsonSchemaProperty::new("array", "Ingredients with quantities").with_items(ingredient_quantity),
            ),
        ),
    ]
}

fn default_max_results() -> usize {
    5
}

fn default_min_protein() -> f64 {
    20.0
}

#[derive(Deserialize)]
struct FindIngredientArgs {
    ingredient_name: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

#[derive(Deserialize)]
struct FoodIdArgs {
    food_id: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    description: String,
}

#[derive(Deserialize)]
struct IngredientNameArgs {
    ingredient_name: String,
}

#[derive(Deserialize)]
struct HighProteinArgs {
    #[serde(default = "default_min_protein")]
    min_protein: f64,
}

#[derive(Deserialize)]
struct CalculateArgs {
    ingredients: Vec<IngredientQuantity>,
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments.clone() };
    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: err.to_string(),
    })
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ToolError> {
    Ok(serde_json::to_value(value)?)
}

/// Tool dispatcher over one nutrition database.
pub struct NutritionTools {
    db: NutritionDb,
    options: AggregationOptions,
}

impl NutritionTools {
    /// `options` governs `calculate_recipe_nutrition`; the other tools never estimate.
    pub fn new(db: NutritionDb, options: AggregationOptions) -> Self {
        Self { db, options }
    }

    pub fn db(&self) -> &NutritionDb {
        &self.db
    }

    /// Runs a tool. Failures come back as an `{error, tool, arguments}` payload.
    pub async fn call(&mut self, name: &str, arguments: &Value) -> Value {
        debug!(tool = name, "Tool call");
        match self.dispatch(name, arguments).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(tool = name, error = %err, "Tool call failed");
                json!({
                    "error": err.to_string(),
                    "tool": name,
                    "arguments": arguments,
                })
            }
        }
    }

    async fn dispatch(&mut self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        match name {
            FIND_INGREDIENT => {
                let args: FindIngredientArgs = parse_args(name, arguments)?;
                let matches = self.db.store().find_ingredient(&args.ingredient_name, args.max_results);
                Ok(json!({
                    "ingredient_searched": args.ingredient_name,
                    "results_found": matches.len(),
                    "matches": to_json(&matches)?,
                }))
            }
            GET_NUTRITION_BY_ID => {
                let args: FoodIdArgs = parse_args(name, arguments)?;
                let record = self.db.store().get_by_id(&args.food_id);
                Ok(json!({
                    "food_id": args.food_id,
                    "found": record.is_some(),
                    "data": to_json(record)?,
                }))
            }
            SEARCH_INGREDIENTS => {
                let args: SearchArgs = parse_args(name, arguments)?;
                let matches = self.db.store().search_by_description(&args.description);
                Ok(json!({
                    "search_term": args.description,
                    "results_found": matches.len(),
                    "matches": to_json(&matches)?,
                }))
            }
            ADD_INGREDIENT => {
                let args: IngredientNameArgs = parse_args(name, arguments)?;
                let record = self
                    .db
                    .find_or_create(&args.ingredient_name, false)
                    .await
                    .map_err(|err| ToolError::Failed(format!("{:#}", err)))?;
                Ok(json!({
                    "ingredient_name": args.ingredient_name,
                    "added": record.is_some(),
                    "data": to_json(&record)?,
                }))
            }
            GET_HIGH_PROTEIN_FOODS => {
                let args: HighProteinArgs = parse_args(name, arguments)?;
                let foods = self.db.store().high_protein(args.min_protein);
                Ok(json!({
                    "min_protein_threshold": args.min_protein,
                    "foods_found": foods.len(),
                    "high_protein_foods": to_json(&foods)?,
                }))
            }
            GET_DATABASE_STATS => Ok(json!({ "database_statistics": to_json(self.db.store().stats())? })),
            CALCULATE_RECIPE_NUTRITION => {
                let args: CalculateArgs = parse_args(name, arguments)?;
                if let Some(bad) = args
                    .ingredients
                    .iter()
                    .find(|i| !i.quantity_grams.is_finite() || i.quantity_grams < 0.0)
                {
                    return Err(ToolError::InvalidArguments {
                        tool: name.to_string(),
                        reason: format!("quantity_grams for '{}' must be a non-negative number", bad.name),
                    });
                }
                let nutrition = calculate_recipe_nutrition(&mut self.db, &args.ingredients, self.options).await;
                to_json(nutrition)
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}
