use crate::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{FinalProduct, StagingError, StagingProduct, StagingRow, ValidationStatus};
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Row, Transaction};
use uuid::Uuid;

/// A staging error awaiting insertion (no id/timestamp yet).
#[derive(Debug, Clone, PartialEq)]
pub struct NewStagingError {
    pub sku: Option<String>,
    pub import_id: Uuid,
    pub error_message: String,
}

/// # StagingRepository
///
/// Repository interface for the staging table fed by CSV ingestion.
/// The `validation_status`/`processed` flags double as the concurrency
/// guard between the validator and upsert stages.
#[async_trait]
pub trait StagingRepository: Send + Sync {
    /// Bulk-insert ingested rows in one transaction, all stamped with the
    /// upload's batch id, status PENDING, processed false. A duplicate SKU
    /// surfaces as [`RepositoryError::Conflict`] and rolls the batch back.
    async fn bulk_insert_tx(
        &self,
        tx: &Transaction<'_>,
        rows: &[StagingRow],
        import_id: Uuid,
        created_by: &str,
    ) -> Result<(), RepositoryError>;

    /// Count rows of the batch still awaiting validation.
    async fn count_pending(&self, import_id: Uuid) -> Result<i64, RepositoryError>;

    /// Fetch up to `limit` PENDING rows of the batch, in stable id order.
    async fn fetch_pending_chunk(
        &self,
        import_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StagingProduct>, RepositoryError>;

    /// Record the validation verdict for one staging row.
    async fn set_validation_result_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: i32,
        status: ValidationStatus,
        errors: Option<&str>,
        validated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Fetch all rows eligible for promotion: VALID and not yet processed.
    async fn fetch_valid_unprocessed_tx(
        &self,
        tx: &Transaction<'_>,
    ) -> Result<Vec<StagingProduct>, RepositoryError>;

    /// Flip `processed` to true and stamp `updated_at`. Only ever called for
    /// VALID rows, inside the promotion transaction.
    async fn mark_processed_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: i32,
    ) -> Result<(), RepositoryError>;

    /// Plain paginated listing of staging rows.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<StagingProduct>, RepositoryError>;
}

/// PostgreSQL implementation of the StagingRepository trait.
pub struct PgStagingRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgStagingRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

const STAGING_COLUMNS: &str = "product_id, sku, name, description, category, manufacturer, \
                               storage_type, min_shelf_life_months, expiration_date, batch_number, \
                               cold_chain_required, certifications, commercialization_auth, \
                               country_regulations, unit_price, purchase_conditions, \
                               delivery_time_hours, external_code, import_id, created_at, \
                               updated_at, created_by, validation_status, validation_errors, \
                               validated_at, processed";

fn map_staging(row: &Row) -> Result<StagingProduct, RepositoryError> {
    let status: String = row.get("validation_status");
    Ok(StagingProduct {
        product_id: row.get("product_id"),
        row: StagingRow {
            sku: row.get("sku"),
            name: row.get("name"),
            description: row.get("description"),
            category: row.get("category"),
            manufacturer: row.get("manufacturer"),
            storage_type: row.get("storage_type"),
            min_shelf_life_months: row.get("min_shelf_life_months"),
            expiration_date: row.get("expiration_date"),
            batch_number: row.get("batch_number"),
            cold_chain_required: row.get("cold_chain_required"),
            certifications: row.get("certifications"),
            commercialization_auth: row.get("commercialization_auth"),
            country_regulations: row.get("country_regulations"),
            unit_price: row.get("unit_price"),
            purchase_conditions: row.get("purchase_conditions"),
            delivery_time_hours: row.get("delivery_time_hours"),
            external_code: row.get("external_code"),
        },
        import_id: row.get("import_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        created_by: row.get("created_by"),
        validation_status: ValidationStatus::parse(&status).ok_or(RepositoryError::NotFound)?,
        validation_errors: row.get("validation_errors"),
        validated_at: row.get("validated_at"),
        processed: row.get("processed"),
    })
}

#[async_trait]
impl StagingRepository for PgStagingRepository {
    async fn bulk_insert_tx(
        &self,
        tx: &Transaction<'_>,
        rows: &[StagingRow],
        import_id: Uuid,
        created_by: &str,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO products_stg (
                sku, name, description, category, manufacturer, storage_type,
                min_shelf_life_months, expiration_date, batch_number, cold_chain_required,
                certifications, commercialization_auth, country_regulations, unit_price,
                purchase_conditions, delivery_time_hours, external_code, import_id, created_by
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
        "#;
        for row in rows {
            let result = tx
                .execute(
                    query,
                    &[
                        &row.sku,
                        &row.name,
                        &row.description,
                        &row.category,
                        &row.manufacturer,
                        &row.storage_type,
                        &row.min_shelf_life_months,
                        &row.expiration_date,
                        &row.batch_number,
                        &row.cold_chain_required,
                        &row.certifications,
                        &row.commercialization_auth,
                        &row.country_regulations,
                        &row.unit_price,
                        &row.purchase_conditions,
                        &row.delivery_time_hours,
                        &row.external_code,
                        &import_id,
                        &created_by,
                    ],
                )
                .await;
            if let Err(e) = result {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    return Err(RepositoryError::Conflict(format!(
                        "SKU duplicado: {}",
                        row.sku
                    )));
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn count_pending(&self, import_id: Uuid) -> Result<i64, RepositoryError> {
        let row = self
            .db
            .query_one(
                "SELECT COUNT(*) FROM products_stg WHERE import_id = $1 AND validation_status = 'PENDING'",
                &[&import_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn fetch_pending_chunk(
        &self,
        import_id: Uuid,
        limit: i64,
    ) -> Result<Vec<StagingProduct>, RepositoryError> {
        let query = format!(
            "SELECT {STAGING_COLUMNS} FROM products_stg \
             WHERE import_id = $1 AND validation_status = 'PENDING' \
             ORDER BY product_id LIMIT $2"
        );
        let rows = self.db.query(&query, &[&import_id, &limit]).await?;
        rows.iter().map(map_staging).collect()
    }

    async fn set_validation_result_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: i32,
        status: ValidationStatus,
        errors: Option<&str>,
        validated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            UPDATE products_stg
            SET validation_status = $2, validation_errors = $3, validated_at = $4, updated_at = now()
            WHERE product_id = $1
        "#;
        tx.execute(
            query,
            &[&product_id, &status.as_str(), &errors, &validated_at],
        )
        .await?;
        Ok(())
    }

    async fn fetch_valid_unprocessed_tx(
        &self,
        tx: &Transaction<'_>,
    ) -> Result<Vec<StagingProduct>, RepositoryError> {
        let query = format!(
            "SELECT {STAGING_COLUMNS} FROM products_stg \
             WHERE validation_status = 'VALID' AND processed = FALSE \
             ORDER BY product_id"
        );
        let rows = tx.query(&query, &[]).await?;
        rows.iter().map(map_staging).collect()
    }

    async fn mark_processed_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: i32,
    ) -> Result<(), RepositoryError> {
        tx.execute(
            "UPDATE products_stg SET processed = TRUE, updated_at = now() WHERE product_id = $1",
            &[&product_id],
        )
        .await?;
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<StagingProduct>, RepositoryError> {
        let query = format!(
            "SELECT {STAGING_COLUMNS} FROM products_stg ORDER BY product_id LIMIT $1 OFFSET $2"
        );
        let rows = self.db.query(&query, &[&limit, &offset]).await?;
        rows.iter().map(map_staging).collect()
    }
}

/// # StagingErrorsRepository
///
/// One row per violated rule per staging row.
#[async_trait]
pub trait StagingErrorsRepository: Send + Sync {
    async fn insert_many_tx(
        &self,
        tx: &Transaction<'_>,
        errors: &[NewStagingError],
    ) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<StagingError>, RepositoryError>;
}

/// PostgreSQL implementation of the StagingErrorsRepository trait.
pub struct PgStagingErrorsRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgStagingErrorsRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StagingErrorsRepository for PgStagingErrorsRepository {
    async fn insert_many_tx(
        &self,
        tx: &Transaction<'_>,
        errors: &[NewStagingError],
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO products_stg_errors (sku, import_id, error_message)
            VALUES ($1, $2, $3)
        "#;
        for error in errors {
            tx.execute(query, &[&error.sku, &error.import_id, &error.error_message])
                .await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StagingError>, RepositoryError> {
        let rows = self
            .db
            .query(
                "SELECT error_id, sku, import_id, error_message, created_at \
                 FROM products_stg_errors ORDER BY error_id",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| StagingError {
                error_id: row.get("error_id"),
                sku: row.get("sku"),
                import_id: row.get("import_id"),
                error_message: row.get("error_message"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

/// # FinalProductsRepository
///
/// The authoritative product table, upsert target keyed by SKU.
#[async_trait]
pub trait FinalProductsRepository: Send + Sync {
    /// Insert-or-update the final product for this staging row's SKU.
    /// Re-upserting an existing SKU updates its mutable fields instead of
    /// duplicating the row.
    async fn upsert_from_staging_tx(
        &self,
        tx: &Transaction<'_>,
        staging: &StagingProduct,
    ) -> Result<(), RepositoryError>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<FinalProduct>, RepositoryError>;
}

/// PostgreSQL implementation of the FinalProductsRepository trait.
pub struct PgFinalProductsRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgFinalProductsRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FinalProductsRepository for PgFinalProductsRepository {
    async fn upsert_from_staging_tx(
        &self,
        tx: &Transaction<'_>,
        staging: &StagingProduct,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO products (
                sku, name, description, category, manufacturer, storage_type,
                expiration_date, batch_number, unit_price
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (sku) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                category = EXCLUDED.category,
                manufacturer = EXCLUDED.manufacturer,
                storage_type = EXCLUDED.storage_type,
                expiration_date = EXCLUDED.expiration_date,
                batch_number = EXCLUDED.batch_number,
                unit_price = EXCLUDED.unit_price
        "#;
        let row = &staging.row;
        tx.execute(
            query,
            &[
                &row.sku,
                &row.name,
                &row.description,
                &row.category,
                &row.manufacturer,
                &row.storage_type,
                &row.expiration_date,
                &row.batch_number,
                &row.unit_price,
            ],
        )
        .await?;
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<FinalProduct>, RepositoryError> {
        let rows = self
            .db
            .query(
                "SELECT product_id, sku, name, description, category, manufacturer, \
                 storage_type, expiration_date, batch_number, unit_price, created_at \
                 FROM products ORDER BY product_id LIMIT $1 OFFSET $2",
                &[&limit, &offset],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| FinalProduct {
                product_id: row.get("product_id"),
                sku: row.get("sku"),
                name: row.get("name"),
                description: row.get("description"),
                category: row.get("category"),
                manufacturer: row.get("manufacturer"),
                storage_type: row.get("storage_type"),
                expiration_date: row.get("expiration_date"),
                batch_number: row.get("batch_number"),
                unit_price: row.get("unit_price"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
