use anyhow::Result;
use tracing::{debug, info, warn};

use super::estimator::{validate_estimate, NutritionEstimator};
use super::food_record::{FoodRecord, FoodSource};
use super::food_store::FoodStore;
use super::nutrients::COMPLETENESS_FIELDS;

/// Match score at which a stored food is taken as the ingredient without asking the estimator.
pub const HIGH_CONFIDENCE_MATCH: f64 = 0.8;
/// Confidence recorded on foods created from an estimate.
pub const ESTIMATE_CONFIDENCE: f64 = 0.7;

/// The food store plus an optional estimator used to fill its gaps.
pub struct NutritionDb {
    store: FoodStore,
    estimator: Option<Box<dyn NutritionEstimator>>,
}

impl NutritionDb {
    pub fn new(store: FoodStore) -> Self {
        Self { store, estimator: None }
    }

    pub fn with_estimator(mut self, estimator: Box<dyn NutritionEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn store(&self) -> &FoodStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut FoodStore {
        &mut self.store
    }

    /// Best stored food for `ingredient_name`, creating one from an estimate when nothing
    /// matches well enough and `auto_create` allows it.
    ///
    /// Errors only come from persisting a new record; every other failure yields `Ok(None)`.
    pub async fn find_or_create(&mut self, ingredient_name: &str, auto_create: bool) -> Result<Option<FoodRecord>> {
        let best = self.store.find_ingredient(ingredient_name, 1).into_iter().next();

        if let Some(found) = best.filter(|m| m.match_score >= HIGH_CONFIDENCE_MATCH) {
            let missing = found.record.nutrients.missing(&COMPLETENESS_FIELDS);
            if found.record.source != FoodSource::Estimate || missing.is_empty() {
                return Ok(Some(found.record));
            }
            if let Some(refreshed) = self.complete_estimate_named(&[ingredient_name, found.record.description.as_str()]) {
                debug!(
                    stale = %found.record.food_id,
                    food_id = %refreshed.food_id,
                    "Using the complete estimate stored for this food"
                );
                return Ok(Some(refreshed));
            }
            info!(
                food_id = %found.record.food_id,
                missing = ?missing,
                "Stored estimate is incomplete, estimating again"
            );
        }

        if !auto_create {
            return Ok(None);
        }
        let Some(estimator) = &self.estimator else {
            return Ok(None);
        };

        info!(ingredient = ingredient_name, "No confident match, requesting nutrition estimate");
        let Some(values) = estimator.estimate(ingredient_name).await else {
            return Ok(None);
        };
        if !validate_estimate(&values) {
            warn!(ingredient = ingredient_name, "Nutrition estimate failed validation");
            return Ok(None);
        }

        let food_id = self
            .store
            .add(ingredient_name, values, FoodSource::Estimate, ESTIMATE_CONFIDENCE)?;
        Ok(self.store.get_by_id(&food_id).cloned())
    }

    /// First stored estimate with every completeness field whose description is one of `names`.
    fn complete_estimate_named(&self, names: &[&str]) -> Option<FoodRecord> {
        self.store
            .by_source(FoodSource::Estimate)
            .into_iter()
            .find(|record| {
                record.nutrients.missing(&COMPLETENESS_FIELDS).is_empty()
                    && names.iter().any(|name| record.description.trim().eq_ignore_ascii_case(name.trim()))
            })
            .cloned()
    }
}
