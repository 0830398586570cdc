use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::generation::Validate;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNeeds {
    pub cuisine: String,
    /// Minutes.
    pub max_prep_time: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dietary_needs: Option<String>,
}

impl UserNeeds {
    pub fn new(cuisine: &str, max_prep_time: u32, dietary_needs: Option<String>) -> Self {
        Self {
            cuisine: cuisine.to_string(),
            max_prep_time,
            dietary_needs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    #[serde(alias = "name")]
    pub item: String,
    /// Free-text amount such as "200g" or "2 tbsp".
    #[serde(alias = "quantity")]
    pub qty: String,
}

impl Ingredient {
    pub fn new(item: &str, qty: &str) -> Self {
        Self {
            item: item.to_string(),
            qty: qty.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub meal: String,
    pub ingredients: Vec<Ingredient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dietary_needs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub title: String,
    pub prep_time: u32,
    pub cook_time: u32,
    pub servings: u32,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<String>,
}

/// Recipe totals split the way people read a nutrition label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionProfile {
    pub calories: f64,
    /// Grams.
    pub macros: BTreeMap<String, f64>,
    /// Milligrams or micrograms, as named by the key suffix.
    pub micros: BTreeMap<String, f64>,
}

fn validate_ingredients(ingredients: &[Ingredient]) -> Result<(), String> {
    if ingredients.is_empty() {
        return Err("at least one ingredient is required".to_string());
    }
    if let Some(index) = ingredients.iter().position(|i| i.item.trim().is_empty()) {
        return Err(format!("ingredient {} has an empty name", index + 1));
    }
    Ok(())
}

impl Validate for Plan {
    fn validate(&self) -> Result<(), String> {
        if self.meal.trim().is_empty() {
            return Err("meal must not be empty".to_string());
        }
        validate_ingredients(&self.ingredients)
    }
}

impl Validate for Recipe {
    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if self.servings == 0 {
            return Err("servings must be at least 1".to_string());
        }
        validate_ingredients(&self.ingredients)?;
        if self.steps.iter().all(|step| step.trim().is_empty()) {
            return Err("at least one step is required".to_string());
        }
        Ok(())
    }
}
