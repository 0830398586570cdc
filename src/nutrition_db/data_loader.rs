use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

use super::food_record::{FoodRecord, FoodSource};
use super::nutrients::{NutrientField, NutrientValues};

const DESCRIPTION_COL: &str = "description";
const FOOD_ID_COL: &str = "food_id";

fn parse_optional_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Loads a reference dataset, picking the format from the file extension (`.csv` or JSON).
pub fn load_reference_dataset(path: &Path) -> Result<Vec<FoodRecord>> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        load_reference_csv(path)
    } else {
        load_reference_json(path)
    }
}

/// Reads a JSON object mapping food ids to food objects
/// (`{"170172": {"description": "...", "protein": 2.0, ...}}`).
pub fn load_reference_json(json_path: &Path) -> Result<Vec<FoodRecord>> {
    if !json_path.exists() {
        return Err(anyhow::anyhow!("Reference dataset not found at: {:?}", json_path));
    }
    let raw = std::fs::read_to_string(json_path)
        .with_context(|| format!("Failed to read reference dataset at {:?}", json_path))?;
    let dataset: Map<String, Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Reference dataset at {:?} must be a JSON object keyed by food id", json_path))?;

    let mut foods = Vec::with_capacity(dataset.len());
    for (food_id, food_data) in dataset {
        let Value::Object(mut fields) = food_data else {
            warn!(food_id = %food_id, "Skipping reference entry that is not an object");
            continue;
        };
        fields.insert("food_id".to_string(), Value::String(food_id.clone()));
        // The dataset's own source labels are not trusted; everything here is reference data.
        fields.remove("source");
        fields.remove("confidence");

        let record: FoodRecord = match serde_json::from_value(Value::Object(fields)) {
            Ok(record) => record,
            Err(err) => {
                warn!(food_id = %food_id, error = %err, "Skipping unreadable reference entry");
                continue;
            }
        };
        if let Some(record) = accept_reference(record) {
            foods.push(record);
        }
    }

    if foods.is_empty() {
        return Err(anyhow::anyhow!("No valid reference foods loaded from {:?}", json_path));
    }
    info!(count = foods.len(), path = %json_path.display(), "Loaded reference foods");
    Ok(foods)
}

/// Reads a CSV with a `description` column, an optional `food_id` column and any number of
/// nutrient columns named by their nutrient key. Other columns are ignored.
pub fn load_reference_csv(csv_path: &Path) -> Result<Vec<FoodRecord>> {
    if !csv_path.exists() {
        return Err(anyhow::anyhow!("Reference dataset not found at: {:?}", csv_path));
    }

    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open reference CSV file at {:?}", csv_path))?;
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    let description_idx = headers
        .iter()
        .position(|h| h.trim() == DESCRIPTION_COL)
        .ok_or_else(|| anyhow::anyhow!("Column '{}' not found", DESCRIPTION_COL))?;
    let food_id_idx = headers.iter().position(|h| h.trim() == FOOD_ID_COL);
    let nutrient_columns: Vec<(usize, NutrientField)> = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, h)| NutrientField::from_key(h.trim()).map(|field| (idx, field)))
        .collect();

    let mut foods = Vec::new();
    for (row_index, result) in rdr.records().enumerate() {
        let row = result.with_context(|| format!("Failed to read record at row index {}", row_index))?;

        let description = row.get(description_idx).unwrap_or_default().trim().to_string();
        if description.is_empty() {
            continue;
        }
        let food_id = food_id_idx
            .and_then(|idx| row.get(idx))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("ref_{}", row_index + 1));

        let nutrients: NutrientValues = nutrient_columns
            .iter()
            .filter_map(|&(idx, field)| row.get(idx).and_then(parse_optional_f64).map(|value| (field, value)))
            .collect();

        let record = FoodRecord::new(food_id, description, FoodSource::Reference).with_nutrients(nutrients);
        if let Some(record) = accept_reference(record) {
            foods.push(record);
        }
    }

    if foods.is_empty() {
        return Err(anyhow::anyhow!("No valid reference foods loaded from {:?}", csv_path));
    }
    info!(count = foods.len(), path = %csv_path.display(), "Loaded reference foods");
    Ok(foods)
}

fn accept_reference(mut record: FoodRecord) -> Option<FoodRecord> {
    if record.description.trim().is_empty() {
        warn!(food_id = %record.food_id, "Skipping reference food without a description");
        return None;
    }
    let negative = record.nutrients.negative_fields();
    if !negative.is_empty() {
        warn!(food_id = %record.food_id, fields = ?negative, "Skipping reference food with negative nutrient values");
        return None;
    }
    record.source = FoodSource::Reference;
    record.confidence = 1.0;
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrition_db::FoodStore;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv_file() -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "food_id,description,calories,protein,fat,carbs,category")?;
        writeln!(file, "1001,\"Apples, raw\",52,0.3,0.2,13.8,fruit")?;
        writeln!(file, ",Banana,,1.1,0.3,22.8,fruit")?; // Missing id and calories
        writeln!(file, "1003,Carrot,41,0.9,0.2,9.6,vegetable")?;
        writeln!(file, "1004,,10,10,10,10,none")?; // Empty description
        writeln!(file, "1005,Mystery,text,1,1,1,none")?; // Invalid calories
        writeln!(file, "1006,Broken,-5,1,1,1,none")?; // Negative calories
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn test_load_reference_csv_success() -> Result<()> {
        let file = create_test_csv_file()?;
        let data = load_reference_csv(file.path())?;

        assert_eq!(data.len(), 4); // Empty description and negative rows skipped

        let apple = data.iter().find(|item| item.description == "Apples, raw").unwrap();
        assert_eq!(apple.food_id, "1001");
        assert_eq!(apple.nutrients.get(NutrientField::Calories), Some(52.0));
        assert_eq!(apple.nutrients.get(NutrientField::Carbs), Some(13.8));
        assert_eq!(apple.source, FoodSource::Reference);

        let banana = data.iter().find(|item| item.description == "Banana").unwrap();
        assert_eq!(banana.food_id, "ref_2");
        assert_eq!(banana.nutrients.get(NutrientField::Calories), None);
        assert_eq!(banana.nutrients.get(NutrientField::Protein), Some(1.1));

        let mystery = data.iter().find(|item| item.description == "Mystery").unwrap();
        assert_eq!(mystery.nutrients.get(NutrientField::Calories), None);
        assert_eq!(mystery.nutrients.len(), 3);
        Ok(())
    }

    #[test]
    fn test_load_reference_csv_missing_description_column() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "name,calories")?;
        writeln!(file, "Apple,52")?;
        file.flush()?;

        let result = load_reference_csv(file.path());
        assert!(result.unwrap_err().to_string().contains("Column 'description' not found"));
        Ok(())
    }

    #[test]
    fn test_load_reference_csv_headers_only() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "description,calories")?;
        file.flush()?;

        let result = load_reference_csv(file.path());
        assert!(result.unwrap_err().to_string().contains("No valid reference foods loaded"));
        Ok(())
    }

    #[test]
    fn test_load_reference_json_map() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            "{}",
            serde_json::json!({
                "170172": {
                    "description": "Nuts, coconut milk, canned",
                    "calories": 197.0,
                    "fat": 21.3,
                    "source": "llm_estimate",
                    "serving_sizes": [{"unit": "cup", "grams": 226}]
                },
                "999": {"description": "Bad", "protein": -1.0},
                "1000": "not an object"
            })
        )?;
        file.flush()?;

        let data = load_reference_json(file.path())?;
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].food_id, "170172");
        assert_eq!(data[0].source, FoodSource::Reference);
        assert_eq!(data[0].confidence, 1.0);
        assert_eq!(data[0].nutrients.get(NutrientField::Fat), Some(21.3));
        assert!(data[0].serving_sizes.is_some());
        Ok(())
    }

    #[test]
    fn test_load_reference_json_keeps_file_order() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"{{"900": {{"description": "Milk, whole", "calories": 61}},
                "100": {{"description": "Milk, coconut, canned", "calories": 197}},
                "1001": {{"description": "Milk, skim", "calories": 34}}}}"#
        )?;
        file.flush()?;

        let data = load_reference_json(file.path())?;
        let ids: Vec<&str> = data.iter().map(|food| food.food_id.as_str()).collect();
        assert_eq!(ids, ["900", "100", "1001"]);

        let store = FoodStore::in_memory(data, 0.3);
        assert_eq!(store.find_ingredient("milk", 1)[0].record.food_id, "900");
        Ok(())
    }

    #[test]
    fn test_load_reference_csv_skips_non_finite_values() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "description,calories,protein,fat")?;
        writeln!(file, "Oddity,NaN,inf,1.5")?;
        file.flush()?;

        let data = load_reference_csv(file.path())?;
        assert_eq!(data[0].nutrients.get(NutrientField::Calories), None);
        assert_eq!(data[0].nutrients.get(NutrientField::Protein), None);
        assert_eq!(data[0].nutrients.get(NutrientField::Fat), Some(1.5));
        Ok(())
    }

    #[test]
    fn test_load_reference_dataset_file_not_found() {
        let path = Path::new("this_file_does_not_exist.csv");
        let result = load_reference_dataset(path);
        assert!(result.unwrap_err().to_string().contains("Reference dataset not found"));
    }
}
