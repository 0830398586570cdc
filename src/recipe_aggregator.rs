use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::models::{Ingredient, NutritionProfile};
use crate::nutrition_db::food_record::FoodSource;
use crate::nutrition_db::nutrients::{NutrientClass, NutrientField, NutrientValues};
use crate::nutrition_db::NutritionDb;

/// Grams assumed when a quantity has no leading number.
pub const DEFAULT_QUANTITY_GRAMS: f64 = 100.0;
/// Top fuzzy candidates at or above this score are accepted when normal resolution fails.
pub const RELAXED_MATCH_FLOOR: f64 = 0.7;

/// Leading number of the first word of `qty`, read as grams: "200g" and "200 g" are both
/// 200. Anything without a leading number is 100 g.
pub fn parse_quantity_grams(qty: &str) -> f64 {
    let Some(first) = qty.split_whitespace().next() else {
        return DEFAULT_QUANTITY_GRAMS;
    };
    let numeric_len = first
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    first[..numeric_len]
        .parse::<f64>()
        .ok()
        .filter(|grams| grams.is_finite())
        .unwrap_or(DEFAULT_QUANTITY_GRAMS)
}

fn default_quantity_grams() -> f64 {
    DEFAULT_QUANTITY_GRAMS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientQuantity {
    pub name: String,
    #[serde(default = "default_quantity_grams")]
    pub quantity_grams: f64,
}

impl IngredientQuantity {
    pub fn new(name: &str, quantity_grams: f64) -> Self {
        Self {
            name: name.to_string(),
            quantity_grams,
        }
    }
}

impl From<&Ingredient> for IngredientQuantity {
    fn from(ingredient: &Ingredient) -> Self {
        Self::new(&ingredient.item, parse_quantity_grams(&ingredient.qty))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationOptions {
    /// Ask the estimator for foods the store cannot match.
    pub auto_create: bool,
    /// Fallback floor for the top fuzzy candidate when resolution returns nothing.
    pub relaxed_match_floor: Option<f64>,
    /// Bump the usage counter of every food that contributes to the total.
    pub track_usage: bool,
}

impl AggregationOptions {
    /// Store lookups only; nothing is written.
    pub fn lookup_only() -> Self {
        Self {
            auto_create: false,
            relaxed_match_floor: Some(RELAXED_MATCH_FLOOR),
            track_usage: false,
        }
    }

    /// Estimates missing foods and records usage.
    pub fn auto_create() -> Self {
        Self {
            auto_create: true,
            relaxed_match_floor: Some(RELAXED_MATCH_FLOOR),
            track_usage: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IngredientBreakdown {
    Resolved {
        name: String,
        quantity_grams: f64,
        nutrition: NutrientValues,
        food_id: String,
        source: FoodSource,
    },
    Missing {
        name: String,
        quantity_grams: f64,
        error: String,
    },
}

impl IngredientBreakdown {
    pub fn name(&self) -> &str {
        match self {
            IngredientBreakdown::Resolved { name, .. } | IngredientBreakdown::Missing { name, .. } => name,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, IngredientBreakdown::Resolved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeNutrition {
    /// Every nutrient field, summed over resolved ingredients and rounded to 2 decimals.
    #[serde(rename = "recipe_nutrition")]
    pub totals: NutrientValues,
    #[serde(rename = "ingredient_breakdown")]
    pub breakdown: Vec<IngredientBreakdown>,
}

impl RecipeNutrition {
    pub fn to_profile(&self) -> NutritionProfile {
        let mut macros = BTreeMap::new();
        let mut micros = BTreeMap::new();
        for field in NutrientField::ALL {
            let value = self.totals.value_or_zero(field);
            match field.class() {
                NutrientClass::Energy => {}
                NutrientClass::Macro => {
                    macros.insert(field.key().to_string(), value);
                }
                NutrientClass::Micro => {
                    micros.insert(field.key().to_string(), value);
                }
            }
        }
        NutritionProfile {
            calories: self.totals.value_or_zero(NutrientField::Calories),
            macros,
            micros,
        }
    }
}

/// Resolves each ingredient against the store, scales its per-100 g values by the quantity
/// and sums them. Unresolvable ingredients contribute nothing and get an error entry.
pub async fn calculate_recipe_nutrition(
    db: &mut NutritionDb,
    ingredients: &[IngredientQuantity],
    options: AggregationOptions,
) -> RecipeNutrition {
    let mut totals = NutrientValues::zeroed();
    let mut breakdown = Vec::with_capacity(ingredients.len());

    for ingredient in ingredients {
        let name = ingredient.name.as_str();
        let quantity_grams = ingredient.quantity_grams;

        let resolved = match db.find_or_create(name, options.auto_create).await {
            Ok(found) => found,
            Err(err) => {
                warn!(ingredient = name, error = %err, "Failed to resolve ingredient");
                breakdown.push(IngredientBreakdown::Missing {
                    name: name.to_string(),
                    quantity_grams,
                    error: format!("Failed to resolve '{}': {:#}", name, err),
                });
                continue;
            }
        };
        let resolved = resolved.or_else(|| {
            let floor = options.relaxed_match_floor?;
            let best = db.store().find_ingredient(name, 1).into_iter().next()?;
            (best.match_score >= floor).then_some(best.record)
        });

        let Some(food) = resolved else {
            debug!(ingredient = name, "No nutrition data found");
            breakdown.push(IngredientBreakdown::Missing {
                name: name.to_string(),
                quantity_grams,
                error: format!("No nutrition data found for '{}'", name),
            });
            continue;
        };

        let contribution = food.nutrients.scaled(quantity_grams / 100.0);
        totals.accumulate(&contribution);

        if options.track_usage {
            if let Err(err) = db.store_mut().increment_usage(&food.food_id) {
                warn!(food_id = %food.food_id, error = %err, "Failed to record food usage");
            }
        }

        debug!(ingredient = name, food_id = %food.food_id, quantity_grams, "Resolved ingredient");
        breakdown.push(IngredientBreakdown::Resolved {
            name: name.to_string(),
            quantity_grams,
            nutrition: contribution.rounded(),
            food_id: food.food_id,
            source: food.source,
        });
    }

    RecipeNutrition {
        totals: totals.rounded(),
        breakdown,
    }
}

/// Gram quantities for a recipe's ingredient list.
pub fn quantities_for(ingredients: &[Ingredient]) -> Vec<IngredientQuantity> {
    ingredients.iter().map(IngredientQuantity::from).collect()
}
