use anyhow::{Context, Result};
use recipe_nutrition::api_connection::Provider;
use recipe_nutrition::cli::{parse_args, Command};
use recipe_nutrition::config::{AppConfig, ModelConfig};
use recipe_nutrition::generation::TextGenerator;
use recipe_nutrition::models::UserNeeds;
use recipe_nutrition::nutrition_db::data_loader::load_reference_dataset;
use recipe_nutrition::nutrition_db::{FoodStore, LlmNutritionEstimator, NutritionDb};
use recipe_nutrition::pipeline::run_pipeline;
use recipe_nutrition::recipe_aggregator::AggregationOptions;
use recipe_nutrition::tools::channel::{InProcessChannel, SubprocessChannel, ToolChannel};
use recipe_nutrition::tools::server::serve_stdio;
use recipe_nutrition::tools::{tool_definitions, NutritionTools};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{}", text);
    Ok(())
}

fn build_generator(config: &AppConfig) -> Result<Arc<dyn TextGenerator>> {
    let provider = Provider::openrouter(&config.api_key_env_var, config.request_timeout)
        .context("Failed to build the model provider")?;
    Ok(Arc::new(provider))
}

/// Store plus, when `estimator_model` is set, a model-backed estimator for unknown foods.
fn open_db(config: &AppConfig, estimator_model: Option<&str>) -> Result<NutritionDb> {
    let store = FoodStore::open(&config.db_path, config.min_confidence).with_context(|| {
        format!(
            "Nutrition database unavailable at '{}' (run `setup` first)",
            config.db_path.display()
        )
    })?;
    let db = NutritionDb::new(store);
    match estimator_model {
        Some(model) => {
            let estimator = LlmNutritionEstimator::new(build_generator(config)?, ModelConfig::estimator(model));
            Ok(db.with_estimator(Box::new(estimator)))
        }
        None => Ok(db),
    }
}

#[allow(clippy::too_many_arguments)]
async fn generate(
    config: &AppConfig,
    cuisine: String,
    max_prep_time: u32,
    dietary_needs: Option<String>,
    goals: Option<String>,
    auto_create: bool,
    subprocess: bool,
    breakdown: bool,
) -> Result<()> {
    let generator = build_generator(config)?;
    let channel: Box<dyn ToolChannel> = if subprocess {
        let program = std::env::current_exe().context("Cannot locate the current executable")?;
        let mut args = vec![
            "serve".to_string(),
            "--db".to_string(),
            config.db_path.display().to_string(),
            "--model".to_string(),
            config.model.clone(),
        ];
        if auto_create {
            args.push("--auto-create".to_string());
        }
        Box::new(
            SubprocessChannel::spawn(&program, &args)
                .await
                .context("Failed to start the nutrition tool server")?,
        )
    } else {
        let estimator_model = auto_create.then_some(config.model.as_str());
        let options = if auto_create {
            AggregationOptions::auto_create()
        } else {
            AggregationOptions::lookup_only()
        };
        Box::new(InProcessChannel::new(NutritionTools::new(
            open_db(config, estimator_model)?,
            options,
        )))
    };

    let needs = UserNeeds::new(&cuisine, max_prep_time, dietary_needs);
    let output = run_pipeline(
        generator.as_ref(),
        &config.model,
        &needs,
        goals.as_deref(),
        channel,
        |message| eprintln!("{}", message),
    )
    .await?;

    if breakdown {
        print_json(&output)
    } else {
        print_json(&output.report())
    }
}

async fn serve(config: &AppConfig, auto_create: bool) -> Result<()> {
    let (db, options) = if auto_create {
        (open_db(config, Some(config.model.as_str()))?, AggregationOptions::auto_create())
    } else {
        (open_db(config, None)?, AggregationOptions::lookup_only())
    };
    serve_stdio(NutritionTools::new(db, options)).await
}

fn setup(config: &AppConfig, source: &Path, force: bool) -> Result<()> {
    if config.db_path.exists() && !force {
        anyhow::bail!(
            "Nutrition database already exists at '{}' (use --force to rebuild it)",
            config.db_path.display()
        );
    }
    let foods = load_reference_dataset(source)
        .with_context(|| format!("Failed to load reference data from '{}'", source.display()))?;
    let store = FoodStore::create(&config.db_path, foods, config.min_confidence)?;
    info!(
        foods = store.count(),
        path = %config.db_path.display(),
        "Nutrition database ready"
    );
    print_json(&store.stats())
}

async fn call_tool(config: &AppConfig, name: &str, arguments: &str) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(arguments).context("Tool arguments must be a JSON object")?;
    let mut tools = NutritionTools::new(open_db(config, None)?, AggregationOptions::lookup_only());
    let payload = tools.call(name, &arguments).await;
    print_json(&payload)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = parse_args();

    // stdout carries JSON output and the tool protocol, so logs go to stderr.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = AppConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Command::Generate {
            cuisine,
            max_prep_time,
            dietary_needs,
            goals,
            no_auto_create,
            subprocess,
            model,
            breakdown,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            generate(
                &config,
                cuisine,
                max_prep_time,
                dietary_needs,
                goals,
                !no_auto_create,
                subprocess,
                breakdown,
            )
            .await
        }
        Command::Serve { auto_create, model } => {
            if let Some(model) = model {
                config.model = model;
            }
            serve(&config, auto_create).await
        }
        Command::Setup { source, force } => setup(&config, &source, force),
        Command::Tool { name, arguments } => call_tool(&config, &name, &arguments).await,
        Command::Tools => print_json(&tool_definitions()),
    }
}
