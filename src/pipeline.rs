use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::generation::chef::generate_recipe;
use crate::generation::planner::generate_plan;
use crate::generation::TextGenerator;
use crate::models::{NutritionProfile, Plan, Recipe, UserNeeds};
use crate::nutrition_db::NutrientField;
use crate::recipe_aggregator::{quantities_for, IngredientBreakdown, RecipeNutrition};
use crate::tools::channel::ToolChannel;
use crate::tools::CALCULATE_RECIPE_NUTRITION;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub plan: Plan,
    pub recipe: Recipe,
    pub nutrition: NutritionProfile,
    pub ingredient_breakdown: Vec<IngredientBreakdown>,
}

fn with_units(values: &BTreeMap<String, f64>) -> Value {
    let formatted: Map<String, Value> = values
        .iter()
        .map(|(key, value)| {
            let unit = NutrientField::from_key(key).map(NutrientField::unit).unwrap_or("");
            (key.clone(), Value::String(format!("{} {}", value, unit).trim_end().to_string()))
        })
        .collect();
    Value::Object(formatted)
}

impl PipelineOutput {
    /// Printable report: nutrition values carry their units, the breakdown is left out.
    pub fn report(&self) -> Value {
        json!({
            "plan": self.plan,
            "recipe": self.recipe,
            "nutrition": {
                "calories": format!("{} kcal", self.nutrition.calories),
                "macros": with_units(&self.nutrition.macros),
                "micros": with_units(&self.nutrition.micros),
            },
        })
    }
}

/// Plan, recipe, then nutrition through `channel`. The channel is closed before returning,
/// whatever the outcome.
pub async fn run_pipeline(
    generator: &dyn TextGenerator,
    model: &str,
    needs: &UserNeeds,
    goals: Option<&str>,
    mut channel: Box<dyn ToolChannel>,
    progress_updater: impl Fn(String) + Send + Sync,
) -> Result<PipelineOutput> {
    let result = run_steps(generator, model, needs, goals, channel.as_mut(), &progress_updater).await;
    if let Err(err) = channel.close().await {
        warn!(error = %err, "Failed to close tool channel");
        if result.is_ok() {
            return Err(err).context("Failed to close tool channel");
        }
    }
    result
}

async fn run_steps(
    generator: &dyn TextGenerator,
    model: &str,
    needs: &UserNeeds,
    goals: Option<&str>,
    channel: &mut dyn ToolChannel,
    progress_updater: &(impl Fn(String) + Send + Sync),
) -> Result<PipelineOutput> {
    progress_updater(format!(
        "Planning a {} meal (max {} minutes)...",
        needs.cuisine, needs.max_prep_time
    ));
    let plan = generate_plan(generator, &ModelConfig::planner(model), needs)
        .await
        .context("Meal planning failed")?;
    progress_updater(format!("Plan: {} ({} ingredients)", plan.meal, plan.ingredients.len()));

    let chef_config = match goals {
        Some(_) => ModelConfig::nutrition_chef(model),
        None => ModelConfig::chef(model),
    };
    let recipe = generate_recipe(generator, &chef_config, &plan, goals)
        .await
        .context("Recipe generation failed")?;
    progress_updater(format!("Recipe: {} ({} servings)", recipe.title, recipe.servings));

    let ingredients = quantities_for(&recipe.ingredients);
    progress_updater(format!("Calculating nutrition for {} ingredients...", ingredients.len()));
    let payload = channel
        .call(CALCULATE_RECIPE_NUTRITION, json!({ "ingredients": ingredients }))
        .await
        .context("Nutrition tool call failed")?;
    if let Some(error) = payload.get("error") {
        anyhow::bail!("Nutrition calculation failed: {}", error.as_str().unwrap_or(&error.to_string()));
    }
    let nutrition: RecipeNutrition =
        serde_json::from_value(payload).context("Nutrition tool returned an unexpected payload")?;

    let missing: Vec<&str> = nutrition
        .breakdown
        .iter()
        .filter(|entry| !entry.is_resolved())
        .map(IngredientBreakdown::name)
        .collect();
    if !missing.is_empty() {
        progress_updater(format!("No nutrition data for: {}", missing.join(", ")));
    }
    info!(
        recipe = %recipe.title,
        resolved = nutrition.breakdown.len() - missing.len(),
        missing = missing.len(),
        "Pipeline finished"
    );

    Ok(PipelineOutput {
        plan,
        nutrition: nutrition.to_profile(),
        ingredient_breakdown: nutrition.breakdown,
        recipe,
    })
}
