/// Discussion Service Library
///
/// Feeds, votes and the community hierarchy for the discussion platform.
///
/// # Modules
///
/// - `handlers`: HTTP request handlers
/// - `models`: Posts, communities and feed responses
/// - `services`: Feed pagination, vote ledger and community tree cache
/// - `db`: Storage traits with PostgreSQL and in-memory implementations
/// - `jobs`: Background refresh of the community tree
/// - `error`: Error types and handling
/// - `config`: Configuration management
/// - `metrics`: Prometheus collectors
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
