pub mod data_loader;
pub mod estimator;
pub mod food_record;
pub mod food_store;
pub mod fuzzy_matcher;
pub mod normalizer;
pub mod nutrients;
pub mod resolver;

pub use estimator::{LlmNutritionEstimator, NutritionEstimator};
pub use food_record::{ExtraFields, FoodRecord, FoodSource, MatchResult};
pub use food_store::{FoodStore, MatchPolicy, StoreStats};
pub use fuzzy_matcher::FuzzyMatcher;
pub use nutrients::{NutrientField, NutrientValues};
pub use resolver::NutritionDb;
