use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::food_record::{FoodRecord, FoodSource, MatchResult, NUTRITION_PER};
use super::fuzzy_matcher::FuzzyMatcher;
use super::nutrients::{NutrientField, NutrientValues};

const MAX_LABEL_LEN: usize = 30;

/// How `find_ingredient` treats a query that appears verbatim inside a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Substring hits are returned with score 1.0 and fuzzy scoring is skipped.
    pub substring_shortcut: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { substring_shortcut: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_foods: usize,
    pub foods_with_serving_sizes: usize,
    pub foods_by_source: BTreeMap<String, usize>,
    pub foods_with_protein_data: usize,
    pub foods_with_fat_data: usize,
    pub foods_with_carb_data: usize,
}

#[derive(Serialize)]
struct StoreDocumentRef<'a> {
    foods: &'a [FoodRecord],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoreDocument {
    Foods { foods: Vec<FoodRecord> },
    // Table layout written by document stores: {"_default": {"1": {...}, "2": {...}}}
    Table {
        #[serde(rename = "_default")]
        default: BTreeMap<String, FoodRecord>,
    },
}

impl StoreDocument {
    fn into_foods(self) -> Vec<FoodRecord> {
        match self {
            StoreDocument::Foods { foods } => foods,
            StoreDocument::Table { default } => {
                let mut rows: Vec<(String, FoodRecord)> = default.into_iter().collect();
                // Row keys are numeric insertion counters.
                rows.sort_by_key(|(key, _)| key.parse::<u64>().unwrap_or(u64::MAX));
                rows.into_iter().map(|(_, record)| record).collect()
            }
        }
    }
}

/// Food records held in memory and mirrored to a JSON file.
///
/// Records are append-only; the only in-place mutation is the usage counter.
#[derive(Debug)]
pub struct FoodStore {
    path: Option<PathBuf>,
    foods: Vec<FoodRecord>,
    matcher: FuzzyMatcher,
    policy: MatchPolicy,
}

impl FoodStore {
    /// Opens an existing store file. A missing or unreadable file is an error.
    pub fn open(path: &Path, min_confidence: f64) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Nutrition database not found at {:?}. Run `setup` first.", path);
        }
        let raw = fs::read_to_string(path).with_context(|| format!("Failed to read nutrition database at {:?}", path))?;
        let document: StoreDocument = serde_json::from_str(&raw)
            .with_context(|| format!("Nutrition database at {:?} is not a valid store document", path))?;
        let foods = document.into_foods();
        info!(path = %path.display(), foods = foods.len(), "Opened nutrition database");

        Ok(Self {
            path: Some(path.to_path_buf()),
            foods,
            matcher: FuzzyMatcher::new(min_confidence),
            policy: MatchPolicy::default(),
        })
    }

    /// Writes `foods` to a new store file at `path` and opens it.
    pub fn create(path: &Path, foods: Vec<FoodRecord>, min_confidence: f64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        let store = Self {
            path: Some(path.to_path_buf()),
            foods,
            matcher: FuzzyMatcher::new(min_confidence),
            policy: MatchPolicy::default(),
        };
        store.save()?;
        info!(path = %path.display(), foods = store.foods.len(), "Created nutrition database");
        Ok(store)
    }

    /// A store that is never written to disk.
    pub fn in_memory(foods: Vec<FoodRecord>, min_confidence: f64) -> Self {
        Self {
            path: None,
            foods,
            matcher: FuzzyMatcher::new(min_confidence),
            policy: MatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn all(&self) -> &[FoodRecord] {
        &self.foods
    }

    pub fn count(&self) -> usize {
        self.foods.len()
    }

    pub fn get_by_id(&self, food_id: &str) -> Option<&FoodRecord> {
        self.foods.iter().find(|food| food.food_id == food_id)
    }

    /// Records whose description contains `text`, ignoring case, in insertion order.
    pub fn search_by_description(&self, text: &str) -> Vec<&FoodRecord> {
        let needle = text.to_lowercase();
        self.foods
            .iter()
            .filter(|food| food.description.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn find_ingredient(&self, ingredient_name: &str, max_results: usize) -> Vec<MatchResult> {
        if self.policy.substring_shortcut {
            let exact = self.search_by_description(ingredient_name);
            if !exact.is_empty() {
                debug!(ingredient = ingredient_name, hits = exact.len(), "Substring match");
                return exact
                    .into_iter()
                    .take(max_results)
                    .map(|record| MatchResult { record: record.clone(), match_score: 1.0 })
                    .collect();
            }
        }
        self.matcher.find_best_matches(ingredient_name, &self.foods, max_results)
    }

    pub fn high_protein(&self, min_protein: f64) -> Vec<&FoodRecord> {
        self.foods
            .iter()
            .filter(|food| matches!(food.nutrients.get(NutrientField::Protein), Some(p) if p >= min_protein))
            .collect()
    }

    pub fn by_source(&self, source: FoodSource) -> Vec<&FoodRecord> {
        self.foods.iter().filter(|food| food.source == source).collect()
    }

    pub fn with_serving_sizes(&self) -> Vec<&FoodRecord> {
        self.foods.iter().filter(|food| food.serving_sizes.is_some()).collect()
    }

    pub fn stats(&self) -> StoreStats {
        let with_field = |field: NutrientField| self.foods.iter().filter(|food| food.nutrients.contains(field)).count();
        StoreStats {
            total_foods: self.count(),
            foods_with_serving_sizes: self.with_serving_sizes().len(),
            foods_by_source: FoodSource::ALL
                .iter()
                .map(|&source| (source.to_string(), self.by_source(source).len()))
                .collect(),
            foods_with_protein_data: with_field(NutrientField::Protein),
            foods_with_fat_data: with_field(NutrientField::Fat),
            foods_with_carb_data: with_field(NutrientField::Carbs),
        }
    }

    /// Inserts a new record and persists the store. Returns the generated id.
    pub fn add(
        &mut self,
        description: &str,
        nutrients: NutrientValues,
        source: FoodSource,
        confidence: f64,
    ) -> Result<String> {
        let food_id = self.fresh_id(source);
        let mut record = FoodRecord::new(food_id.clone(), description, source).with_nutrients(nutrients);
        record.label = Some(slugify(description));
        record.confidence = confidence.clamp(0.0, 1.0);
        record.nutrition_per = NUTRITION_PER.to_string();
        record.created_date = Some(chrono::Local::now().format("%Y-%m-%d").to_string());

        self.foods.push(record);
        if let Err(err) = self.save() {
            self.foods.pop();
            return Err(err);
        }
        info!(food_id = %food_id, description, source = %source, "Added food");
        Ok(food_id)
    }

    /// Bumps the usage counter. `Ok(false)` when no record has this id.
    pub fn increment_usage(&mut self, food_id: &str) -> Result<bool> {
        let Some(food) = self.foods.iter_mut().find(|food| food.food_id == food_id) else {
            return Ok(false);
        };
        food.usage_count += 1;
        self.save()?;
        Ok(true)
    }

    fn fresh_id(&self, source: FoodSource) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = format!("{}_{:016x}", source, rng.gen::<u64>());
            if self.get_by_id(&candidate).is_none() {
                return candidate;
            }
        }
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&StoreDocumentRef { foods: &self.foods })
            .context("Failed to serialize nutrition database")?;
        fs::write(path, json).with_context(|| format!("Failed to write nutrition database to {:?}", path))
    }
}

/// Lowercase `[a-z0-9_]` form of a food name, at most 30 characters.
pub fn slugify(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();
    let slug = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    slug.chars().take(MAX_LABEL_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_foods() -> Vec<FoodRecord> {
        vec![
            FoodRecord::new("1", "Milk, whole", FoodSource::Reference).with_nutrients(
                NutrientValues::new()
                    .with(NutrientField::Calories, 61.0)
                    .with(NutrientField::Protein, 3.2)
                    .with(NutrientField::Fat, 3.3),
            ),
            FoodRecord::new("2", "Nuts, coconut milk, canned", FoodSource::Reference).with_nutrients(
                NutrientValues::new()
                    .with(NutrientField::Calories, 197.0)
                    .with(NutrientField::Protein, 2.0)
                    .with(NutrientField::Carbs, 2.8),
            ),
            FoodRecord::new("3", "Chicken, breast, skinless", FoodSource::Reference)
                .with_nutrients(NutrientValues::new().with(NutrientField::Protein, 31.0)),
            FoodRecord::new("4", "Tofu, firm", FoodSource::Estimate)
                .with_nutrients(NutrientValues::new().with(NutrientField::Protein, 17.3)),
        ]
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempdir().unwrap();
        let err = FoodStore::open(&dir.path().join("nope.json"), 0.3).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_create_then_open_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("nutrition.json");
        FoodStore::create(&path, sample_foods(), 0.3).unwrap();
        let store = FoodStore::open(&path, 0.3).unwrap();
        assert_eq!(store.count(), 4);
        assert_eq!(store.get_by_id("2").unwrap().description, "Nuts, coconut milk, canned");
    }

    #[test]
    fn test_open_accepts_table_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        let document = json!({"_default": {
            "2": {"food_id": "b", "description": "Rice, white", "source": "usda"},
            "10": {"food_id": "c", "description": "Rice, brown", "source": "llm_estimate"},
            "1": {"food_id": "a", "description": "Oats", "source": "usda", "protein": 13.0}
        }});
        fs::write(&path, document.to_string()).unwrap();

        let store = FoodStore::open(&path, 0.3).unwrap();
        let ids: Vec<&str> = store.all().iter().map(|f| f.food_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.by_source(FoodSource::Estimate).len(), 1);
    }

    #[test]
    fn test_rewrite_keeps_unknown_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nutrition.json");
        let document = json!({"foods": [
            {"food_id": "a", "description": "Oats", "protein": 13.0, "category": "Cereal Grains"}
        ]});
        fs::write(&path, document.to_string()).unwrap();

        let mut store = FoodStore::open(&path, 0.3).unwrap();
        assert!(store.increment_usage("a").unwrap());

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let food = &written["foods"][0];
        assert_eq!(food["category"], "Cereal Grains");
        assert_eq!(food["protein"], 13.0);
        assert_eq!(food["usage_count"], 1);
    }

    #[test]
    fn test_search_by_description_is_case_insensitive() {
        let store = FoodStore::in_memory(sample_foods(), 0.3);
        let hits = store.search_by_description("MILK");
        let ids: Vec<&str> = hits.iter().map(|f| f.food_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(store.search_by_description("quinoa").is_empty());
    }

    #[test]
    fn test_find_ingredient_substring_scores_one() {
        let store = FoodStore::in_memory(sample_foods(), 0.3);
        let matches = store.find_ingredient("coconut milk", 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].record.food_id, "2");
        assert_eq!(matches[0].match_score, 1.0);

        let limited = store.find_ingredient("milk", 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].record.food_id, "1");
    }

    #[test]
    fn test_find_ingredient_falls_back_to_fuzzy() {
        let store = FoodStore::in_memory(sample_foods(), 0.3);
        let matches = store.find_ingredient("skinless chicken breast", 3);
        assert_eq!(matches[0].record.food_id, "3");
        assert!(matches[0].match_score < 1.0);
        assert!(matches.iter().all(|m| m.match_score >= 0.3));
    }

    #[test]
    fn test_policy_without_substring_shortcut_scores_everything() {
        let store = FoodStore::in_memory(sample_foods(), 0.3)
            .with_policy(MatchPolicy { substring_shortcut: false });
        let matches = store.find_ingredient("milk", 5);
        assert!(matches.len() >= 2);
        assert!(matches.iter().all(|m| m.match_score <= 1.0));
    }

    #[test]
    fn test_add_persists_with_fresh_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nutrition.json");
        let mut store = FoodStore::create(&path, sample_foods(), 0.3).unwrap();

        let nutrients = NutrientValues::new().with(NutrientField::Calories, 120.0);
        let id = store.add("Tempeh (Smoked)", nutrients, FoodSource::Estimate, 0.7).unwrap();
        assert!(id.starts_with("estimate_"));
        assert_eq!(id.len(), "estimate_".len() + 16);

        let reopened = FoodStore::open(&path, 0.3).unwrap();
        let record = reopened.get_by_id(&id).unwrap();
        assert_eq!(record.label.as_deref(), Some("tempeh_smoked"));
        assert_eq!(record.confidence, 0.7);
        assert_eq!(record.nutrition_per, "100g");
        assert!(record.created_date.is_some());

        let second = store.add("Tempeh (Smoked)", NutrientValues::new(), FoodSource::Estimate, 0.7).unwrap();
        assert_ne!(id, second);
    }

    #[test]
    fn test_increment_usage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nutrition.json");
        let mut store = FoodStore::create(&path, sample_foods(), 0.3).unwrap();
        assert!(store.increment_usage("3").unwrap());
        assert!(store.increment_usage("3").unwrap());
        assert!(!store.increment_usage("missing").unwrap());
        assert_eq!(FoodStore::open(&path, 0.3).unwrap().get_by_id("3").unwrap().usage_count, 2);
    }

    #[test]
    fn test_analytic_queries() {
        let mut foods = sample_foods();
        foods[0].serving_sizes = Some(json!([{"unit": "cup", "grams": 244}]));
        let store = FoodStore::in_memory(foods, 0.3);

        let ids: Vec<&str> = store.high_protein(17.0).iter().map(|f| f.food_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4"]);

        let stats = store.stats();
        assert_eq!(stats.total_foods, 4);
        assert_eq!(stats.foods_with_serving_sizes, 1);
        assert_eq!(stats.foods_by_source["reference"], 3);
        assert_eq!(stats.foods_by_source["estimate"], 1);
        assert_eq!(stats.foods_by_source["user"], 0);
        assert_eq!(stats.foods_with_protein_data, 4);
        assert_eq!(stats.foods_with_fat_data, 1);
        assert_eq!(stats.foods_with_carb_data, 1);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Tempeh (Smoked)"), "tempeh_smoked");
        assert_eq!(slugify("  Crème   fraîche "), "crme_frache");
        assert_eq!(slugify(&"a".repeat(50)).len(), 30);
    }
}
