use crate::ServiceError;
use deadpool_postgres::Pool;
use model::UpsertOutcome;
use repository::{FinalProductsRepository, StagingRepository};
use tracing::{info, instrument};

/// # UpsertService
///
/// Promotes validated staging rows into the authoritative product table.
/// Selection and promotion share one transaction, so a row is either
/// upserted and marked processed together or left untouched. Runs are
/// idempotent: a second run with nothing new to promote is a no-op.
pub struct UpsertService<S, F> {
    db_pool: Pool,
    staging_repo: S,
    products_repo: F,
}

impl<S, F> UpsertService<S, F>
where
    S: StagingRepository,
    F: FinalProductsRepository,
{
    pub fn new(db_pool: Pool, staging_repo: S, products_repo: F) -> Self {
        Self {
            db_pool,
            staging_repo,
            products_repo,
        }
    }

    /// Promotes every VALID, unprocessed staging row.
    #[instrument(skip(self))]
    pub async fn upsert_validated(&self) -> Result<UpsertOutcome, ServiceError> {
        let mut client = self.db_pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Begin transaction failed: {e}")))?;

        let eligible = self.staging_repo.fetch_valid_unprocessed_tx(&tx).await?;
        if eligible.is_empty() {
            return Ok(UpsertOutcome::empty());
        }

        for staging in &eligible {
            self.products_repo
                .upsert_from_staging_tx(&tx, staging)
                .await?;
            self.staging_repo
                .mark_processed_tx(&tx, staging.product_id)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Commit failed: {e}")))?;

        info!("{} productos promovidos a la tabla final", eligible.len());
        Ok(UpsertOutcome::inserted(eligible.len()))
    }
}
