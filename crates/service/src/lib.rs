//! Business logic layer for the procurement core.
//!
//! This crate hosts the two workflows with real state transitions:
//! the order-creation flow with real-time inventory validation
//! ([`OrderService`]) and the bulk-load pipeline (CSV ingestion →
//! batch validation → upsert promotion).
//!
//! # Features
//! - Atomic persistence of order aggregates in a single transaction.
//! - Fail-closed inventory validation with per-line verdicts.
//! - Dependency injection for testability and loose coupling.
//! - Async-first API suitable for scalable web applications.
//! - Well-typed error handling via [`ServiceError`]: business outcomes
//!   are returned as data so callers can enumerate every violation.

mod batch;
mod ingestion;
mod orders;
mod upsert;

pub use batch::*;
pub use ingestion::*;
pub use orders::*;
pub use upsert::*;

use deadpool_postgres::PoolError;
use model::{InventoryValidation, OrderStatus};
use repository::RepositoryError;
use thiserror::Error;

/// The main error type for all service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request is structurally or semantically invalid.
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    /// One or more requested lines failed inventory validation; carries the
    /// per-line verdicts so the caller can suggest maximum quantities.
    #[error("{message}")]
    InsufficientInventory {
        message: String,
        validations: Vec<InventoryValidation>,
    },
    /// The requested entity does not exist.
    #[error("Not found")]
    NotFound,
    /// The order state machine defines no such transition.
    #[error("Transición de estado inválida: {} -> {}", .from.as_str(), .to.as_str())]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    /// The uploaded CSV lacks required columns; nothing was persisted.
    #[error("Faltan columnas en el CSV: {0:?}")]
    MissingColumns(Vec<String>),
    /// The uploaded file is not parseable as CSV; nothing was persisted.
    #[error("Error al leer el CSV: {0}")]
    CsvParse(String),
    /// A uniqueness constraint was violated (e.g. duplicate SKU on ingest).
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A repository (database) operation failed.
    #[error("Database error: {0}")]
    Db(RepositoryError),
    /// Failed to obtain a database connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
    /// Some unexpected or unhandled error.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ServiceError::NotFound,
            RepositoryError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Db(other),
        }
    }
}
