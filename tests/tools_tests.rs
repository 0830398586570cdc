use recipe_nutrition::nutrition_db::data_loader::load_reference_dataset;
use recipe_nutrition::nutrition_db::{FoodSource, FoodStore, NutritionDb};
use recipe_nutrition::recipe_aggregator::AggregationOptions;
use recipe_nutrition::tools::channel::{SubprocessChannel, ToolChannel};
use recipe_nutrition::tools::server::serve;
use recipe_nutrition::tools::NutritionTools;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const REFERENCE_JSON: &str = r#"{
  "170172": {"description": "Milk, coconut, canned", "calories": 197, "protein": 2.0, "fat": 21.3, "carbs": 2.8, "source": "usda"},
  "171077": {"description": "Chicken, breast, cooked", "calories": 165, "protein": 31.0, "fat": 3.6, "carbs": 0.0},
  "bad": "not a food",
  "171287": {"description": "Egg, whole, raw", "calories": 143, "protein": 12.6, "fat": 9.5, "carbs": 0.7, "serving_sizes": {"large": 50}}
}"#;

fn build_store(dir: &Path) -> FoodStore {
    let source = dir.join("reference.json");
    fs::write(&source, REFERENCE_JSON).unwrap();
    let foods = load_reference_dataset(&source).unwrap();
    FoodStore::create(&dir.join("data").join("nutrition.json"), foods, 0.3).unwrap()
}

async fn run_session(tools: &mut NutritionTools, requests: &[Value]) -> Vec<Value> {
    let input: String = requests.iter().map(|r| format!("{}\n", r)).collect();
    let mut output = Vec::new();
    serve(tools, input.as_bytes(), &mut output).await.unwrap();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn tool_payload(reply: &Value) -> Value {
    serde_json::from_str(reply["result"]["content"][0]["text"].as_str().unwrap()).unwrap()
}

fn call(id: u64, name: &str, arguments: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": "tools/call", "params": {"name": name, "arguments": arguments}})
}

#[test]
fn test_setup_imports_reference_json() {
    let dir = tempdir().unwrap();
    let store = build_store(dir.path());
    assert_eq!(store.count(), 3);

    let reopened = FoodStore::open(&dir.path().join("data").join("nutrition.json"), 0.3).unwrap();
    let stats = reopened.stats();
    assert_eq!(stats.total_foods, 3);
    assert_eq!(stats.foods_with_serving_sizes, 1);
    assert_eq!(stats.foods_by_source.get("reference"), Some(&3));
    assert!(reopened.all().iter().all(|food| food.source == FoodSource::Reference));
}

#[test]
fn test_setup_imports_reference_csv() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("reference.csv");
    fs::write(
        &source,
        "food_id,description,calories,protein,notes\n\
         11529,\"Tomatoes, red, raw\",18,0.9,garden\n\
         ,Lentils,116,9.0,\n",
    )
    .unwrap();
    let foods = load_reference_dataset(&source).unwrap();
    assert_eq!(foods.len(), 2);
    assert_eq!(foods[0].food_id, "11529");
    assert_eq!(foods[1].description, "Lentils");
}

#[tokio::test]
async fn test_stdio_session_against_imported_store() {
    let dir = tempdir().unwrap();
    let mut tools = NutritionTools::new(NutritionDb::new(build_store(dir.path())), AggregationOptions::lookup_only());

    let replies = run_session(
        &mut tools,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            call(3, "find_ingredient", json!({"ingredient_name": "coconut milk"})),
            call(4, "get_high_protein_foods", json!({})),
            call(
                5,
                "calculate_recipe_nutrition",
                json!({"ingredients": [
                    {"name": "chicken breast", "quantity_grams": 200},
                    {"name": "egg"}
                ]}),
            ),
        ],
    )
    .await;
    assert_eq!(replies.len(), 5);

    let tools_listed = replies[1]["result"]["tools"].as_array().unwrap();
    assert!(tools_listed.iter().any(|t| t["name"] == "calculate_recipe_nutrition"));

    let found = tool_payload(&replies[2]);
    assert_eq!(found["ingredient_searched"], "coconut milk");
    assert_eq!(found["matches"][0]["food_id"], "170172");
    assert!(found["matches"][0]["match_score"].as_f64().unwrap() > 0.8);

    let high_protein = tool_payload(&replies[3]);
    assert_eq!(high_protein["min_protein_threshold"], 20.0);
    assert_eq!(high_protein["foods_found"], 1);

    let nutrition = tool_payload(&replies[4]);
    // 2 x 165 chicken + 1 x 143 egg at the default 100 g
    assert_eq!(nutrition["recipe_nutrition"]["calories"], 473.0);
    assert_eq!(nutrition["ingredient_breakdown"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_tool_failures_come_back_as_payloads() {
    let dir = tempdir().unwrap();
    let mut tools = NutritionTools::new(NutritionDb::new(build_store(dir.path())), AggregationOptions::lookup_only());

    let replies = run_session(
        &mut tools,
        &[
            call(1, "drop_database", json!({})),
            call(
                2,
                "calculate_recipe_nutrition",
                json!({"ingredients": [{"name": "egg", "quantity_grams": -5}]}),
            ),
            call(3, "get_nutrition_by_id", json!({})),
        ],
    )
    .await;

    for reply in &replies {
        assert!(reply.get("error").is_none(), "protocol error: {}", reply);
        let payload = tool_payload(reply);
        assert!(payload["error"].is_string());
        assert!(payload.get("tool").is_some());
    }
    assert_eq!(tool_payload(&replies[1])["arguments"]["ingredients"][0]["quantity_grams"], -5);
}

#[tokio::test]
async fn test_serve_subcommand_over_child_stdio() {
    let dir = tempdir().unwrap();
    build_store(dir.path());
    let db_path = dir.path().join("data").join("nutrition.json");

    let mut channel = SubprocessChannel::spawn(
        Path::new(env!("CARGO_BIN_EXE_recipe_nutrition")),
        &["--db".to_string(), db_path.display().to_string(), "serve".to_string()],
    )
    .await
    .unwrap();

    let payload = channel.call("get_database_stats", json!({})).await.unwrap();
    assert_eq!(payload["database_statistics"]["total_foods"], 3);
    assert_eq!(payload["database_statistics"]["foods_by_source"]["reference"], 3);

    channel.close().await.unwrap();
}
