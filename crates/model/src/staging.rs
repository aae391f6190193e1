use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validation state of a staging row. A row moves `Pending → Valid|Invalid`
/// exactly once per ingestion batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "VALID")]
    Valid,
    #[serde(rename = "INVALID")]
    Invalid,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "PENDING",
            ValidationStatus::Valid => "VALID",
            ValidationStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ValidationStatus::Pending),
            "VALID" => Some(ValidationStatus::Valid),
            "INVALID" => Some(ValidationStatus::Invalid),
            _ => None,
        }
    }
}

/// Content fields of one CSV row after defensive coercion, before insertion
/// into the staging table. Unparsable numbers, prices and dates become `None`
/// rather than failing the upload; the batch validator flags them later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRow {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub storage_type: Option<String>,
    pub min_shelf_life_months: Option<i32>,
    pub expiration_date: Option<NaiveDate>,
    pub batch_number: Option<String>,
    pub cold_chain_required: bool,
    pub certifications: Option<String>,
    pub commercialization_auth: Option<String>,
    pub country_regulations: Option<String>,
    pub unit_price: Option<Decimal>,
    pub purchase_conditions: Option<String>,
    pub delivery_time_hours: Option<i32>,
    pub external_code: Option<String>,
}

/// A provisionally-ingested product awaiting validation and promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingProduct {
    pub product_id: i32,
    #[serde(flatten)]
    pub row: StagingRow,
    /// Batch identifier shared by all rows of one upload.
    pub import_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub validation_status: ValidationStatus,
    pub validation_errors: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
    pub processed: bool,
}

/// One violated rule for one staging row. A row breaking three rules
/// produces three of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingError {
    pub error_id: i32,
    pub sku: Option<String>,
    pub import_id: Uuid,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

/// Authoritative product record, upsert target keyed by SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalProduct {
    pub product_id: i32,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub storage_type: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub batch_number: Option<String>,
    pub unit_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_status_round_trip() {
        for s in [
            ValidationStatus::Pending,
            ValidationStatus::Valid,
            ValidationStatus::Invalid,
        ] {
            assert_eq!(ValidationStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ValidationStatus::parse("ERROR"), None);
    }

    #[test]
    fn test_staging_product_serializes_flat() {
        let product = StagingProduct {
            product_id: 1,
            row: StagingRow {
                sku: "A1".into(),
                name: "Jeringa".into(),
                description: None,
                category: Some("categoria_b".into()),
                manufacturer: None,
                storage_type: None,
                min_shelf_life_months: Some(12),
                expiration_date: None,
                batch_number: Some("L-01".into()),
                cold_chain_required: false,
                certifications: None,
                commercialization_auth: None,
                country_regulations: None,
                unit_price: Some("9.99".parse().unwrap()),
                purchase_conditions: None,
                delivery_time_hours: None,
                external_code: None,
            },
            import_id: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: Some("system".into()),
            validation_status: ValidationStatus::Pending,
            validation_errors: None,
            validated_at: None,
            processed: false,
        };
        let value = serde_json::to_value(&product).unwrap();
        // Row fields flatten into the top-level object on the wire.
        assert_eq!(value["sku"], "A1");
        assert_eq!(value["validation_status"], "PENDING");
        assert_eq!(value["processed"], false);
    }
}
