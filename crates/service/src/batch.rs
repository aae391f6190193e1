use crate::ServiceError;
use chrono::{NaiveDate, Utc};
use deadpool_postgres::Pool;
use model::{BatchValidationCounts, StagingProduct, ValidationStatus};
use repository::{NewStagingError, StagingErrorsRepository, StagingRepository};
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Storage types that satisfy the cold-chain requirement.
const COLD_STORAGE_TYPES: [&str; 2] = ["cold", "refrigerated"];

/// Applies every business rule to one staging row and returns one message
/// per violated rule. Rules never short-circuit: a row breaking three rules
/// reports three messages.
pub fn rule_errors(product: &StagingProduct, today: NaiveDate) -> Vec<String> {
    let row = &product.row;
    let mut errors = Vec::new();

    // Mandatory fields. `import_id` is stamped at ingestion and a nil batch
    // id means the row never went through the upload path.
    if row.sku.trim().is_empty() {
        errors.push("Campo sku obligatorio".to_string());
    }
    if row.name.trim().is_empty() {
        errors.push("Campo name obligatorio".to_string());
    }
    if row.category.as_deref().unwrap_or("").trim().is_empty() {
        errors.push("Campo category obligatorio".to_string());
    }
    if product.import_id.is_nil() {
        errors.push("Campo import_id obligatorio".to_string());
    }

    if let Some(expiration) = row.expiration_date {
        if expiration < today {
            errors.push("Producto expirado".to_string());
        }
    }

    // Shelf-life floor depends on the category; only rows that carry the
    // field at all are held to it.
    if let Some(months) = row.min_shelf_life_months {
        let category = row.category.as_deref().unwrap_or("").to_lowercase();
        if category == "categoria_a" && months < 24 {
            errors.push("Producto no cumple mínimo de vida útil (24 meses)".to_string());
        } else if category != "categoria_a" && months < 6 {
            errors.push("Producto no cumple mínimo de vida útil (6 meses)".to_string());
        }
    }

    if row.cold_chain_required {
        let storage = row.storage_type.as_deref().unwrap_or("").to_lowercase();
        if !COLD_STORAGE_TYPES.contains(&storage.as_str()) {
            errors.push(
                "Producto requiere cadena de frío pero almacenamiento no cumple".to_string(),
            );
        }
    }

    match row.unit_price {
        Some(price) if price.is_sign_positive() || price.is_zero() => {}
        _ => errors.push("Precio unitario inválido".to_string()),
    }

    errors
}

/// # BatchValidator
///
/// Runs the rule engine over a batch's PENDING staging rows in chunks.
/// Each chunk is its own transaction: verdicts and error rows for the
/// chunk land together or not at all. A failed chunk is logged and
/// aborts the run; its rows stay PENDING, so re-running the same batch
/// picks up exactly where the failure left off.
pub struct BatchValidator<S, E> {
    db_pool: Pool,
    staging_repo: S,
    errors_repo: E,
    chunk_size: usize,
}

impl<S, E> BatchValidator<S, E>
where
    S: StagingRepository,
    E: StagingErrorsRepository,
{
    pub fn new(db_pool: Pool, staging_repo: S, errors_repo: E, chunk_size: usize) -> Self {
        Self {
            db_pool,
            staging_repo,
            errors_repo,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Validates every PENDING row of the batch and returns the run's counts.
    #[instrument(skip(self))]
    pub async fn validate_batch(
        &self,
        import_id: Uuid,
    ) -> Result<BatchValidationCounts, ServiceError> {
        let total_pendientes = self.staging_repo.count_pending(import_id).await? as usize;

        let mut counts = BatchValidationCounts {
            total_pendientes,
            total_validados: 0,
            total_invalidos: 0,
            total_errores: 0,
        };

        loop {
            let chunk = self
                .staging_repo
                .fetch_pending_chunk(import_id, self.chunk_size as i64)
                .await?;
            if chunk.is_empty() {
                break;
            }

            match self.validate_chunk(&chunk).await {
                Ok((valid, invalid, errors)) => {
                    counts.total_validados += valid;
                    counts.total_invalidos += invalid;
                    counts.total_errores += errors;
                }
                Err(e) => {
                    error!(
                        "Validación del lote {} interrumpida, las filas pendientes se retoman en la próxima corrida: {}",
                        import_id, e
                    );
                    break;
                }
            }
        }

        info!(
            "Lote {} validado: {} válidos, {} inválidos, {} errores de {} pendientes",
            import_id,
            counts.total_validados,
            counts.total_invalidos,
            counts.total_errores,
            counts.total_pendientes
        );
        Ok(counts)
    }

    /// Validates one chunk inside a single transaction.
    async fn validate_chunk(
        &self,
        chunk: &[StagingProduct],
    ) -> Result<(usize, usize, usize), ServiceError> {
        let mut client = self.db_pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Begin transaction failed: {e}")))?;

        let today = Utc::now().date_naive();
        let validated_at = Utc::now();
        let mut valid = 0usize;
        let mut invalid = 0usize;
        let mut new_errors: Vec<NewStagingError> = Vec::new();

        for product in chunk {
            let violations = rule_errors(product, today);
            if violations.is_empty() {
                self.staging_repo
                    .set_validation_result_tx(
                        &tx,
                        product.product_id,
                        ValidationStatus::Valid,
                        None,
                        validated_at,
                    )
                    .await?;
                valid += 1;
            } else {
                let joined = violations.join("; ");
                self.staging_repo
                    .set_validation_result_tx(
                        &tx,
                        product.product_id,
                        ValidationStatus::Invalid,
                        Some(&joined),
                        validated_at,
                    )
                    .await?;
                invalid += 1;
                for message in violations {
                    new_errors.push(NewStagingError {
                        sku: Some(product.row.sku.clone()),
                        import_id: product.import_id,
                        error_message: message,
                    });
                }
            }
        }

        let error_count = new_errors.len();
        if !new_errors.is_empty() {
            self.errors_repo.insert_many_tx(&tx, &new_errors).await?;
        }
        tx.commit()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Commit failed: {e}")))?;

        Ok((valid, invalid, error_count))
    }
}
