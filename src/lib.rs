// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod lane;
pub mod models;
pub mod registry;
pub mod scan;
pub mod store;
pub mod strategy;

// Re-export commonly used types
pub use api::{ApiError, BinanceClient};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
