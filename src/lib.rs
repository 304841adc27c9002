pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod strategies;
pub mod types;
pub mod utils;
