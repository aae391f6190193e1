/// Procurement Core Backend
///
/// This is the main entry point for the procurement core service.
/// The application provides REST API endpoints for the medical-supply
/// procurement workflows: order creation with real-time inventory
/// validation, order management, and the bulk product load pipeline
/// (CSV ingestion, batch validation, upsert promotion).
///
/// # Architecture
///
/// The application follows a modular architecture with:
/// - Repository layer for data access
/// - Service layer for business logic
/// - API layer for HTTP endpoints
/// - Metrics for monitoring
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info};

use app_config::AppConfig;
use inventory_client::HttpInventoryClient;
use repository::{
    PgFinalProductsRepository, PgOrderLinesRepository, PgOrdersRepository,
    PgStagingErrorsRepository, PgStagingRepository,
};
use server::{AppState, Server};
use service::{BatchValidator, IngestionService, OrderServiceImpl, UpsertService};
use tokio_postgres::{Client, NoTls};

/// Initialize the tracing subscriber for logging
fn init_logger() -> Result<()> {
    tracing_subscriber::fmt::init();
    Ok(())
}

/// Opens a dedicated Postgres connection and drives it in the background.
///
/// Each repository owns its own client because `tokio_postgres::Client`
/// does not implement `Clone`.
async fn connect(dsn: &str, label: &'static str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls)
        .await
        .with_context(|| format!("Failed to connect to database for {label} repository"))?;
    info!("Successfully connected to database for {} repository", label);

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("{} connection error: {}", label, e);
        }
    });
    Ok(client)
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = init_logger() {
        eprintln!("Failed to initialize logger: {}", err);
        return Err(anyhow::anyhow!("Failed to initialize logger"));
    }

    info!("Procurement core backend starting...");

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize database pool and apply migrations
    let db_pool = match db::init_db_pool(&config).await {
        Ok(pool) => {
            info!("Database initialized successfully");
            pool
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            error!("Database connection is required for application to function properly");
            return Err(anyhow::anyhow!("Failed to initialize database"));
        }
    };

    let dsn = format!(
        "host={} port={} user={} password={} dbname={} sslmode=disable",
        config.db_host, config.db_port, config.db_user, config.db_password, config.db_name
    );

    // Inventory client against the external product service
    let inventory = Arc::new(
        HttpInventoryClient::new(config.product_service_url.clone(), config.inventory_timeout)
            .context("Failed to build inventory client")?,
    );

    // Order workflow
    let orders_repo = PgOrdersRepository::new(connect(&dsn, "orders").await?);
    let lines_repo = PgOrderLinesRepository::new(connect(&dsn, "order lines").await?);
    let order_service = Arc::new(OrderServiceImpl::new(
        db_pool.clone(),
        inventory,
        orders_repo,
        lines_repo,
    ));

    // Bulk-load pipeline. Each stage gets its own repository instance
    // (and thus its own connection) since the services take ownership.
    let ingestion = Arc::new(IngestionService::new(
        db_pool.clone(),
        PgStagingRepository::new(connect(&dsn, "ingestion staging").await?),
    ));
    let validation = Arc::new(BatchValidator::new(
        db_pool.clone(),
        PgStagingRepository::new(connect(&dsn, "validation staging").await?),
        PgStagingErrorsRepository::new(connect(&dsn, "validation errors").await?),
        config.validation_chunk_size,
    ));
    let promotion = Arc::new(UpsertService::new(
        db_pool.clone(),
        PgStagingRepository::new(connect(&dsn, "promotion staging").await?),
        PgFinalProductsRepository::new(connect(&dsn, "final products").await?),
    ));

    // Read-side listings
    let staging_listing = Arc::new(PgStagingRepository::new(
        connect(&dsn, "staging listing").await?,
    ));
    let errors_listing = Arc::new(PgStagingErrorsRepository::new(
        connect(&dsn, "errors listing").await?,
    ));
    let products_listing = Arc::new(PgFinalProductsRepository::new(
        connect(&dsn, "products listing").await?,
    ));

    let state = AppState::new(
        order_service,
        ingestion,
        validation,
        promotion,
        staging_listing,
        errors_listing,
        products_listing,
    );

    // Create a JoinSet to manage all our tasks
    let mut tasks = JoinSet::new();

    let http_port = config.http_port;
    info!("Using HTTP port: {}", http_port);

    let http_server = Server::new(http_port, state);
    tasks.spawn(async move {
        if let Err(err) = http_server.start().await {
            error!("HTTP server error: {}", err);
            // Exit the application if the server fails to start
            std::process::exit(1);
        }
    });

    // Wait for all tasks to complete
    while let Some(res) = tasks.join_next().await {
        if let Err(err) = res {
            error!("Task error: {}", err);
        }
    }

    info!("Application stopped");
    Ok(())
}
