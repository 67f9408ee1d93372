/// Configuration management for Discussion Service
///
/// This module handles loading and managing configuration from environment variables.
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Feed paging configuration
    pub feed: FeedConfig,
    /// Vote ledger configuration
    pub votes: VoteConfig,
    /// Community tree cache configuration
    pub community_tree: CommunityTreeConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    pub max_connections: u32,
    /// How long a request waits for a pooled connection
    pub acquire_timeout_secs: u64,
    /// Upper bound on waiting for a vote row lock
    pub lock_timeout_ms: u64,
    /// Run embedded migrations at startup
    pub run_migrations: bool,
}

/// Feed paging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Page size used when the request does not specify one
    pub default_page_size: i64,
    /// Largest page size the HTTP layer accepts
    pub max_page_size: i64,
    /// Per-request deadline for feed queries
    pub request_timeout_ms: u64,
}

/// Vote ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteConfig {
    /// Attempts per vote before a conflict is surfaced
    pub max_attempts: u32,
    /// Base backoff between attempts
    pub retry_backoff_ms: u64,
    /// Per-request deadline for vote application
    pub request_timeout_ms: u64,
}

/// Community tree cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityTreeConfig {
    /// Interval between background rebuilds
    pub refresh_interval_secs: u64,
    /// Timeout for a single rebuild attempt
    pub build_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) if app_env.eq_ignore_ascii_case("production") => {
                return Err("DATABASE_URL must be set in production".to_string())
            }
            Err(_) => "postgresql://localhost/discussion".to_string(),
        };

        let feed = FeedConfig {
            default_page_size: parse_env_or_default("FEED_DEFAULT_PAGE_SIZE", 20)?,
            max_page_size: parse_env_or_default("FEED_MAX_PAGE_SIZE", 100)?,
            request_timeout_ms: parse_env_or_default("FEED_REQUEST_TIMEOUT_MS", 5_000)?,
        };
        if feed.default_page_size < 1 || feed.default_page_size > feed.max_page_size {
            return Err(format!(
                "FEED_DEFAULT_PAGE_SIZE must be between 1 and FEED_MAX_PAGE_SIZE ({})",
                feed.max_page_size
            ));
        }

        let votes = VoteConfig {
            max_attempts: parse_env_or_default("VOTE_MAX_ATTEMPTS", 3)?,
            retry_backoff_ms: parse_env_or_default("VOTE_RETRY_BACKOFF_MS", 25)?,
            request_timeout_ms: parse_env_or_default("VOTE_REQUEST_TIMEOUT_MS", 5_000)?,
        };
        if votes.max_attempts == 0 {
            return Err("VOTE_MAX_ATTEMPTS must be at least 1".to_string());
        }

        Ok(Config {
            app: AppConfig {
                env: app_env,
                host: std::env::var("DISCUSSION_SERVICE_HOST")
                    .unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("DISCUSSION_SERVICE_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(10),
                acquire_timeout_secs: parse_env_or_default("DATABASE_ACQUIRE_TIMEOUT_SECS", 10)?,
                lock_timeout_ms: parse_env_or_default("DATABASE_LOCK_TIMEOUT_MS", 2_000)?,
                run_migrations: std::env::var("DATABASE_RUN_MIGRATIONS")
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            },
            feed,
            votes,
            community_tree: CommunityTreeConfig {
                refresh_interval_secs: parse_env_or_default(
                    "COMMUNITY_TREE_REFRESH_SECS",
                    20 * 60,
                )?,
                build_timeout_secs: parse_env_or_default("COMMUNITY_TREE_BUILD_TIMEOUT_SECS", 30)?,
            },
        })
    }
}

impl FeedConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl VoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl CommunityTreeConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 25,
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for CommunityTreeConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 20 * 60,
            build_timeout_secs: 30,
        }
    }
}

fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse()
            .map_err(|e| format!("Failed to parse {}='{}': {}", key, val, e)),
        Err(_) => Ok(default),
    }
}
