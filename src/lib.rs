pub mod api_connection;
pub mod cli;
pub mod config;
pub mod generation;
pub mod models;
pub mod nutrition_db;
pub mod pipeline;
pub mod recipe_aggregator;
pub mod tools;
