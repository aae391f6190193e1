use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// `AppConfig` holds all configuration parameters required by the application.
///
/// The configuration is loaded from environment variables (optionally via a `.env` file)
/// or uses default values if the variable is not set. Fields include database, HTTP
/// server, product-service client, and batch-processing settings. This struct is
/// deserializable via Serde.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Database settings ---
    /// Database hostname or service name (e.g. "postgres" in Docker Compose, "localhost" for local runs).
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,

    // --- Product service (inventory lookups) ---
    /// Base URL of the external product/inventory service.
    pub product_service_url: String,
    /// Request timeout for inventory lookups (human-friendly format, e.g. "10s").
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub inventory_timeout: Duration,

    // --- Batch processing ---
    /// Number of staging rows validated per transaction during batch validation.
    pub validation_chunk_size: usize,

    // --- Shutdown timeout ---
    /// Graceful shutdown timeout (human-friendly format, e.g. "5s", "1m").
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub shutdown_timeout: Duration,
}

/// Custom deserializer for human-readable durations.
/// Accepts formats like "5s", "1m", etc.
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid or missing required values.
    pub fn load() -> Result<Self> {
        // Load from .env file (for Docker environment)
        dotenvy::dotenv().ok();

        // Note: These default values are for Docker Compose compatibility.
        // When running locally, these values should be overridden by environment variables
        // with localhost as hostname.
        let settings = config::Config::builder()
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "procurement_user")?
            .set_default("db_password", "securepassword")?
            .set_default("db_name", "procurement_db")?
            // HTTP
            .set_default("http_port", 8004)?
            // Product service
            .set_default("product_service_url", "http://product-service:8005")?
            .set_default("inventory_timeout", "10s")?
            // Batch processing
            .set_default("validation_chunk_size", 5000)?
            // Shutdown
            .set_default("shutdown_timeout", "5s")?
            .add_source(config::Environment::default().separator("_"))
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }
}
