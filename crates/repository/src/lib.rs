//! # Data Repository Layer
//!
//! This module provides repository traits and PostgreSQL implementations
//! for all entities: orders, order lines, staging products, staging errors,
//! and final products. Each repository supports both regular and
//! transactional operations for integration with service/business logic.

mod orders;
mod staging;

pub use orders::*;
pub use staging::*;

use thiserror::Error;

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// A uniqueness constraint was violated (e.g. duplicate SKU).
    #[error("Conflict: {0}")]
    Conflict(String),
}
