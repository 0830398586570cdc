use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Generate a meal plan, a recipe and its nutrition profile",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Nutrition database file (defaults to NUTRITION_DB_PATH, then data/nutrition.json)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plan a meal, write the recipe and compute its nutrition
    Generate {
        /// Cuisine type (e.g. Indian, Italian, Mexican)
        #[arg(long)]
        cuisine: String,

        /// Maximum preparation time in minutes
        #[arg(long)]
        max_prep_time: u32,

        /// Dietary needs (e.g. vegan, vegetarian, gluten-free)
        #[arg(long)]
        dietary_needs: Option<String>,

        /// Nutrition goals for the recipe (e.g. "high protein, under 600 kcal")
        #[arg(long)]
        goals: Option<String>,

        /// Only use foods already in the database
        #[arg(long)]
        no_auto_create: bool,

        /// Run the nutrition tools in a child `serve` process
        #[arg(long)]
        subprocess: bool,

        /// Chat model override
        #[arg(long)]
        model: Option<String>,

        /// Print raw values with the per-ingredient breakdown instead of the report
        #[arg(long)]
        breakdown: bool,
    },

    /// Serve the nutrition tools as line-delimited JSON-RPC on stdin/stdout
    Serve {
        /// Estimate and store foods missing from the database
        #[arg(long)]
        auto_create: bool,

        /// Chat model used for estimates
        #[arg(long)]
        model: Option<String>,
    },

    /// Build the nutrition database from a reference dataset (.json or .csv)
    Setup {
        #[arg(long)]
        source: PathBuf,

        /// Overwrite an existing database
        #[arg(long)]
        force: bool,
    },

    /// Call a single nutrition tool and print its JSON result
    Tool {
        /// Tool name (find_ingredient, get_database_stats, ...)
        name: String,

        /// Tool arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },

    /// List the available tools with their input schemas
    Tools,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_arguments() {
        let cli = Cli::try_parse_from([
            "recipe_nutrition",
            "generate",
            "--cuisine",
            "Italian",
            "--max-prep-time",
            "30",
            "--dietary-needs",
            "vegan",
            "--db",
            "/tmp/foods.json",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/foods.json")));
        match cli.command {
            Command::Generate {
                cuisine,
                max_prep_time,
                dietary_needs,
                goals,
                no_auto_create,
                subprocess,
                ..
            } => {
                assert_eq!(cuisine, "Italian");
                assert_eq!(max_prep_time, 30);
                assert_eq!(dietary_needs.as_deref(), Some("vegan"));
                assert!(goals.is_none());
                assert!(!no_auto_create);
                assert!(!subprocess);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_generate_requires_prep_time() {
        assert!(Cli::try_parse_from(["recipe_nutrition", "generate", "--cuisine", "Thai"]).is_err());
    }

    #[test]
    fn test_tool_arguments_default_to_empty_object() {
        let cli = Cli::try_parse_from(["recipe_nutrition", "tool", "get_database_stats", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Tool { name, arguments } => {
                assert_eq!(name, "get_database_stats");
                assert_eq!(arguments, "{}");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
