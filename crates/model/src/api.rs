use crate::{Order, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One requested product line in an order-creation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestedProduct {
    #[serde(rename = "producto_id")]
    pub product_id: String,
    /// Requested quantity, must be > 0.
    #[serde(rename = "cantidad_solicitada")]
    pub requested_qty: i32,
}

/// Body of `POST /pedidos`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateOrderRequest {
    pub nit: String,
    #[serde(rename = "productos")]
    pub products: Vec<RequestedProduct>,
    #[serde(rename = "observaciones")]
    pub notes: Option<String>,
}

/// Per-line inventory validation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryValidation {
    #[serde(rename = "producto_id")]
    pub product_id: String,
    #[serde(rename = "disponible")]
    pub available: bool,
    #[serde(rename = "cantidad_disponible")]
    pub available_qty: i32,
    #[serde(rename = "cantidad_solicitada")]
    pub requested_qty: i32,
    #[serde(rename = "mensaje")]
    pub message: String,
}

/// "Reduce to N" suggestion for a line that failed inventory validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuantitySuggestion {
    #[serde(rename = "producto_id")]
    pub product_id: String,
    #[serde(rename = "cantidad_maxima")]
    pub max_qty: i32,
    #[serde(rename = "cantidad_solicitada")]
    pub requested_qty: i32,
}

/// Successful response of `POST /pedidos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub exito: bool,
    pub pedido_id: Uuid,
    pub numero_pedido: String,
    pub mensaje: String,
    pub validaciones: Vec<InventoryValidation>,
    pub pedido: Order,
}

/// Response of `GET /pedidos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOrdersResponse {
    pub total: i64,
    pub pagina: i64,
    pub por_pagina: i64,
    pub pedidos: Vec<Order>,
}

/// Body of `PUT /pedidos/{id}/estado`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    #[serde(rename = "nuevo_estado")]
    pub new_status: OrderStatus,
    #[serde(rename = "observaciones")]
    pub notes: Option<String>,
}

/// Response of `PUT /pedidos/{id}/estado`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusResponse {
    pub exito: bool,
    pub pedido_id: Uuid,
    pub estado_anterior: OrderStatus,
    pub estado_nuevo: OrderStatus,
    pub mensaje: String,
}

/// Filters for listing orders; present filters are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilters {
    pub user_id: Option<i32>,
    pub nit: Option<String>,
    pub status: Option<OrderStatus>,
}

/// Aggregate figures of one CSV ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestSummary {
    /// Batch identifier stamped on every row of this upload.
    pub import_id: Uuid,
    pub total_products: usize,
    /// Row count per category; rows with no category land under "".
    pub categories_count: BTreeMap<String, usize>,
    pub cold_chain_required_count: usize,
    /// Mean of the non-null unit prices, rounded to two decimals; 0 if all null.
    pub avg_unit_price: f64,
}

/// Response of `POST /upload-csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub summary: IngestSummary,
}

/// Counters returned by one batch-validation run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchValidationCounts {
    pub total_pendientes: usize,
    pub total_validados: usize,
    pub total_invalidos: usize,
    pub total_errores: usize,
}

/// Response of `POST /validate/{batch_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateBatchResponse {
    pub estado: String,
    pub resumen: BatchValidationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchValidationSummary {
    #[serde(flatten)]
    pub counts: BatchValidationCounts,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one promotion run of the upsert stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpsertOutcome {
    pub message: String,
    pub inserted: usize,
}

impl UpsertOutcome {
    pub fn empty() -> Self {
        Self {
            message: "No hay productos para insertar".to_string(),
            inserted: 0,
        }
    }

    pub fn inserted(count: usize) -> Self {
        Self {
            message: format!("{count} productos insertados correctamente"),
            inserted: count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_order_request_wire_names() {
        let json = r#"
        {
            "nit": "123456789",
            "productos": [
                {"producto_id": "550e8400-e29b-41d4-a716-446655440000", "cantidad_solicitada": 5}
            ],
            "observaciones": "Entrega urgente"
        }
        "#;
        let req: CreateOrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.products.len(), 1);
        assert_eq!(req.products[0].requested_qty, 5);
        assert_eq!(req.notes.as_deref(), Some("Entrega urgente"));
    }

    #[test]
    fn test_suggestion_wire_names() {
        let suggestion = QuantitySuggestion {
            product_id: "p1".into(),
            max_qty: 5,
            requested_qty: 10,
        };
        let value = serde_json::to_value(&suggestion).unwrap();
        assert_eq!(value["cantidad_maxima"], 5);
        assert_eq!(value["cantidad_solicitada"], 10);
    }

    #[test]
    fn test_upsert_outcome_messages() {
        assert_eq!(UpsertOutcome::empty().message, "No hay productos para insertar");
        let ok = UpsertOutcome::inserted(3);
        assert_eq!(ok.message, "3 productos insertados correctamente");
        assert_eq!(ok.inserted, 3);
    }
}
