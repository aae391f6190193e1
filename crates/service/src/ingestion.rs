use crate::ServiceError;
use chrono::NaiveDate;
use deadpool_postgres::Pool;
use model::{IngestResponse, IngestSummary, StagingRow};
use repository::StagingRepository;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{info, instrument};
use uuid::Uuid;

/// Exact column set an uploaded CSV must carry. Uploads missing any of these
/// are rejected wholesale before anything touches the database.
pub const REQUIRED_COLUMNS: [&str; 18] = [
    "sku",
    "name",
    "description",
    "category",
    "manufacturer",
    "storage_type",
    "min_shelf_life_months",
    "expiration_date",
    "batch_number",
    "cold_chain_required",
    "certifications",
    "commercialization_auth",
    "country_regulations",
    "unit_price",
    "purchase_conditions",
    "delivery_time_hours",
    "external_code",
    "import_id",
];

/// Lenient boolean: {"true","1","yes"} case-insensitively, everything else false.
fn coerce_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Lenient integer: accepts integer and float spellings, `None` on anything else.
fn coerce_int(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f as i32)
}

/// Decimal coercion, `None` on failure.
fn coerce_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<Decimal>().ok()
}

/// Calendar-date coercion over the formats seen in supplier exports.
fn coerce_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d/%m/%Y"))
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Empty/whitespace-only cells become `None`.
fn coerce_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parses the uploaded bytes as a comma-separated UTF-8 CSV with headers,
/// enforcing the column contract and coercing each field defensively.
pub fn parse_csv(content: &[u8]) -> Result<Vec<StagingRow>, ServiceError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(content);

    let headers = reader
        .headers()
        .map_err(|e| ServiceError::CsvParse(e.to_string()))?
        .clone();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ServiceError::MissingColumns(missing));
    }

    let index: BTreeMap<&str, usize> = REQUIRED_COLUMNS
        .iter()
        .map(|col| {
            // Presence checked above.
            let pos = headers.iter().position(|h| h == *col).unwrap();
            (*col, pos)
        })
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ServiceError::CsvParse(e.to_string()))?;
        let field = |name: &str| record.get(index[name]).unwrap_or("");

        rows.push(StagingRow {
            sku: field("sku").trim().to_string(),
            name: field("name").trim().to_string(),
            description: coerce_text(field("description")),
            category: coerce_text(field("category")),
            manufacturer: coerce_text(field("manufacturer")),
            storage_type: coerce_text(field("storage_type")),
            min_shelf_life_months: coerce_int(field("min_shelf_life_months")),
            expiration_date: coerce_date(field("expiration_date")),
            batch_number: coerce_text(field("batch_number")),
            cold_chain_required: coerce_bool(field("cold_chain_required")),
            certifications: coerce_text(field("certifications")),
            commercialization_auth: coerce_text(field("commercialization_auth")),
            country_regulations: coerce_text(field("country_regulations")),
            unit_price: coerce_decimal(field("unit_price")),
            purchase_conditions: coerce_text(field("purchase_conditions")),
            delivery_time_hours: coerce_int(field("delivery_time_hours")),
            external_code: coerce_text(field("external_code")),
        });
    }

    Ok(rows)
}

/// Aggregates the ingestion summary over the parsed rows.
pub fn summarize(rows: &[StagingRow], import_id: Uuid) -> IngestSummary {
    let mut categories_count: BTreeMap<String, usize> = BTreeMap::new();
    for row in rows {
        let key = row.category.clone().unwrap_or_default();
        *categories_count.entry(key).or_insert(0) += 1;
    }

    let cold_chain_required_count = rows.iter().filter(|r| r.cold_chain_required).count();

    let prices: Vec<Decimal> = rows.iter().filter_map(|r| r.unit_price).collect();
    let avg_unit_price = if prices.is_empty() {
        0.0
    } else {
        let sum: Decimal = prices.iter().copied().sum();
        (sum / Decimal::from(prices.len()))
            .round_dp(2)
            .to_f64()
            .unwrap_or(0.0)
    };

    IngestSummary {
        import_id,
        total_products: rows.len(),
        categories_count,
        cold_chain_required_count,
        avg_unit_price,
    }
}

/// CSV ingestion stage: parse, stamp with a per-upload batch id, and
/// bulk-insert into staging in a single all-or-nothing transaction.
pub struct IngestionService<S> {
    db_pool: Pool,
    staging_repo: S,
}

impl<S: StagingRepository> IngestionService<S> {
    pub fn new(db_pool: Pool, staging_repo: S) -> Self {
        Self {
            db_pool,
            staging_repo,
        }
    }

    /// Ingests an uploaded CSV.
    ///
    /// The bytes are staged through a uniquely-named scratch file so
    /// concurrent uploads never collide, then parsed, coerced, stamped with
    /// one fresh batch id, and inserted. A malformed file, missing columns,
    /// or a duplicate SKU rejects the whole upload with nothing persisted.
    #[instrument(skip(self, file_bytes))]
    pub async fn ingest(
        &self,
        file_bytes: &[u8],
        created_by: &str,
    ) -> Result<IngestResponse, ServiceError> {
        let scratch = std::env::temp_dir().join(format!("ingest_{}.csv", Uuid::new_v4()));
        tokio::fs::write(&scratch, file_bytes)
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Scratch write failed: {e}")))?;

        let parsed = tokio::fs::read(&scratch)
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Scratch read failed: {e}")))
            .and_then(|content| parse_csv(&content));

        // Scratch cleanup happens on every exit path.
        let _ = tokio::fs::remove_file(&scratch).await;
        let rows = parsed?;

        // One batch id per upload; the CSV's own import_id column is ignored.
        let import_id = Uuid::new_v4();

        let mut client = self.db_pool.get().await.map_err(ServiceError::from)?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Begin transaction failed: {e}")))?;
        self.staging_repo
            .bulk_insert_tx(&tx, &rows, import_id, created_by)
            .await?;
        tx.commit()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Commit failed: {e}")))?;

        info!(
            "Lote {} ingresado: {} filas (por {})",
            import_id,
            rows.len(),
            created_by
        );
        Ok(IngestResponse {
            message: format!("{} productos ingresados", rows.len()),
            summary: summarize(&rows, import_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "sku,name,description,category,manufacturer,storage_type,\
                          min_shelf_life_months,expiration_date,batch_number,cold_chain_required,\
                          certifications,commercialization_auth,country_regulations,unit_price,\
                          purchase_conditions,delivery_time_hours,external_code,import_id";

    fn csv_with_rows(rows: &[&str]) -> Vec<u8> {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out.into_bytes()
    }

    #[test]
    fn test_boolean_coercion() {
        for truthy in ["true", "TRUE", "1", "yes", "YES", " Yes "] {
            assert!(coerce_bool(truthy), "{truthy} should be true");
        }
        for falsy in ["false", "0", "no", "si", "", "2"] {
            assert!(!coerce_bool(falsy), "{falsy} should be false");
        }
    }

    #[test]
    fn test_integer_coercion_is_lenient() {
        assert_eq!(coerce_int("12"), Some(12));
        assert_eq!(coerce_int("12.0"), Some(12));
        assert_eq!(coerce_int(" 7 "), Some(7));
        assert_eq!(coerce_int("abc"), None);
        assert_eq!(coerce_int(""), None);
    }

    #[test]
    fn test_decimal_and_date_coercion() {
        assert_eq!(coerce_decimal("9.99"), Some("9.99".parse().unwrap()));
        assert_eq!(coerce_decimal("no-price"), None);
        assert_eq!(
            coerce_date("2030-06-01"),
            NaiveDate::from_ymd_opt(2030, 6, 1)
        );
        assert_eq!(
            coerce_date("01/06/2030"),
            NaiveDate::from_ymd_opt(2030, 6, 1)
        );
        assert_eq!(coerce_date("someday"), None);
    }

    #[test]
    fn test_missing_columns_rejected_with_names() {
        let content = b"sku,name\nA1,Jeringa";
        match parse_csv(content) {
            Err(ServiceError::MissingColumns(missing)) => {
                assert!(missing.contains(&"category".to_string()));
                assert!(missing.contains(&"import_id".to_string()));
                assert_eq!(missing.len(), 16);
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_rows_parse_with_defensive_coercion() {
        let content = csv_with_rows(&[
            "A1,Jeringa,desc,categoria_b,Acme,cold,12,2030-01-01,L-1,true,c,auth,reg,9.99,net30,48,E1,ignored",
            "A2,Guantes,,,,,not-a-number,not-a-date,,maybe,,,,bad-price,,,,",
        ]);
        let rows = parse_csv(&content).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].sku, "A1");
        assert!(rows[0].cold_chain_required);
        assert_eq!(rows[0].min_shelf_life_months, Some(12));
        assert_eq!(rows[0].unit_price, Some("9.99".parse().unwrap()));
        assert_eq!(
            rows[0].expiration_date,
            NaiveDate::from_ymd_opt(2030, 1, 1)
        );

        // Unparsable values become None/false instead of failing the upload.
        assert!(!rows[1].cold_chain_required);
        assert_eq!(rows[1].min_shelf_life_months, None);
        assert_eq!(rows[1].expiration_date, None);
        assert_eq!(rows[1].unit_price, None);
        assert_eq!(rows[1].category, None);
    }

    #[test]
    fn test_summary_average_excludes_null_prices() {
        let content = csv_with_rows(&[
            "A1,Uno,,categoria_a,,,,,,false,,,,10.00,,,,x",
            "A2,Dos,,categoria_a,,,,,,true,,,,20.00,,,,x",
            "A3,Tres,,categoria_b,,,,,,false,,,,,,,,x",
        ]);
        let rows = parse_csv(&content).unwrap();
        let summary = summarize(&rows, Uuid::nil());

        assert_eq!(summary.total_products, 3);
        assert_eq!(summary.categories_count["categoria_a"], 2);
        assert_eq!(summary.categories_count["categoria_b"], 1);
        assert_eq!(summary.cold_chain_required_count, 1);
        // (10 + 20) / 2, the null price is excluded.
        assert_eq!(summary.avg_unit_price, 15.0);
    }

    #[test]
    fn test_summary_all_null_prices_averages_zero() {
        let content = csv_with_rows(&["A1,Uno,,c,,,,,,false,,,,,,,,x"]);
        let rows = parse_csv(&content).unwrap();
        assert_eq!(summarize(&rows, Uuid::nil()).avg_unit_price, 0.0);
    }
}
