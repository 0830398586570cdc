use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::nutrients::{NutrientField, NutrientValues};

pub const NUTRITION_PER: &str = "100g";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodSource {
    /// Bulk-loaded from a reference dataset.
    #[default]
    #[serde(alias = "usda")]
    Reference,
    /// Synthesized by the nutrition estimator.
    #[serde(alias = "llm_estimate")]
    Estimate,
    #[serde(alias = "user_added")]
    User,
}

impl FoodSource {
    pub const ALL: [FoodSource; 3] = [FoodSource::Reference, FoodSource::Estimate, FoodSource::User];

    pub fn as_str(self) -> &'static str {
        match self {
            FoodSource::Reference => "reference",
            FoodSource::Estimate => "estimate",
            FoodSource::User => "user",
        }
    }
}

impl fmt::Display for FoodSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_confidence() -> f64 {
    1.0
}

fn default_nutrition_per() -> String {
    NUTRITION_PER.to_string()
}

/// One stored food. Persisted as a flat JSON object: the metadata keys below sit next to
/// the nutrient keys, every nutrient being an amount per 100 g.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodRecord {
    pub food_id: String,
    pub description: String,
    /// Readable slug of the description. Not used for identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub source: FoodSource,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_nutrition_per")]
    pub nutrition_per: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_sizes: Option<Value>,
    #[serde(flatten)]
    pub nutrients: NutrientValues,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Keys of a stored record that are neither metadata nor nutrients (e.g. a dataset's
/// `category`). Carried through unchanged so rewriting the store does not drop them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExtraFields(pub Map<String, Value>);

impl ExtraFields {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl<'de> Deserialize<'de> for ExtraFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ExtraVisitor;

        impl<'de> Visitor<'de> for ExtraVisitor {
            type Value = ExtraFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of additional record fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut extra = Map::new();
                while let Some(key) = access.next_key::<String>()? {
                    let value: Value = access.next_value()?;
                    // Nutrient keys belong to `NutrientValues`.
                    if NutrientField::from_key(&key).is_none() {
                        extra.insert(key, value);
                    }
                }
                Ok(ExtraFields(extra))
            }
        }

        deserializer.deserialize_map(ExtraVisitor)
    }
}

impl FoodRecord {
    pub fn new(food_id: impl Into<String>, description: impl Into<String>, source: FoodSource) -> Self {
        Self {
            food_id: food_id.into(),
            description: description.into(),
            label: None,
            source,
            confidence: default_confidence(),
            nutrition_per: default_nutrition_per(),
            created_date: None,
            usage_count: 0,
            serving_sizes: None,
            nutrients: NutrientValues::new(),
            extra: ExtraFields::default(),
        }
    }

    pub fn with_nutrients(mut self, nutrients: NutrientValues) -> Self {
        self.nutrients = nutrients;
        self
    }
}

/// A record paired with how well it matched a query. The score is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(flatten)]
    pub record: FoodRecord,
    pub match_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serializes_flat() {
        let record = FoodRecord::new("ref_1", "Milk, coconut, canned", FoodSource::Reference)
            .with_nutrients(NutrientValues::new().with(NutrientField::Fat, 21.3));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["food_id"], "ref_1");
        assert_eq!(value["source"], "reference");
        assert_eq!(value["nutrition_per"], "100g");
        assert_eq!(value["fat"], 21.3);
        assert!(value.get("label").is_none());
    }

    #[test]
    fn test_record_accepts_legacy_documents() {
        let record: FoodRecord = serde_json::from_value(json!({
            "food_id": "170172",
            "description": "Nuts, coconut milk, canned",
            "source": "usda",
            "calories": 197.0,
            "protein": 2.02,
            "serving_sizes": [{"unit": "cup", "grams": 226}],
            "category": "Nut and Seed Products"
        }))
        .unwrap();
        assert_eq!(record.source, FoodSource::Reference);
        assert_eq!(record.confidence, 1.0);
        assert_eq!(record.usage_count, 0);
        assert_eq!(record.nutrients.get(NutrientField::Calories), Some(197.0));
        assert_eq!(record.nutrients.len(), 2);
        assert!(record.serving_sizes.is_some());
        assert_eq!(record.extra.get("category"), Some(&json!("Nut and Seed Products")));
        assert!(record.extra.get("calories").is_none());

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["category"], "Nut and Seed Products");
        assert_eq!(written["calories"], 197.0);

        let estimate: FoodRecord = serde_json::from_value(json!({
            "food_id": "x", "description": "x", "source": "llm_estimate", "confidence": 0.7
        }))
        .unwrap();
        assert_eq!(estimate.source, FoodSource::Estimate);
    }

    #[test]
    fn test_match_result_flattens_record() {
        let result = MatchResult {
            record: FoodRecord::new("a", "Apples, raw", FoodSource::Reference),
            match_score: 0.9,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["description"], "Apples, raw");
        assert_eq!(value["match_score"], 0.9);
    }
}
