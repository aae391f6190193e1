//! Client for the external product/inventory service.
//!
//! The order workflow never trusts inventory optimistically: every failure
//! mode of the lookup (missing product, timeout, transport error, non-2xx)
//! folds into a fail-closed [`InventoryCheck`] with `available = false`
//! instead of propagating an error to the caller.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, warn};

/// Result of one availability lookup for a (product, requested quantity) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryCheck {
    pub available: bool,
    pub available_qty: i32,
    pub unit_price: Decimal,
    pub message: String,
}

impl InventoryCheck {
    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            available: false,
            available_qty: 0,
            unit_price: Decimal::ZERO,
            message: message.into(),
        }
    }
}

/// Catalog data for a product, fetched for the name snapshot at order creation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProductInfo {
    #[serde(rename = "nombre")]
    pub name: Option<String>,
}

/// Abstraction over the product-service inventory API.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Checks whether `requested_qty` units of `product_id` are available.
    /// Never fails hard: dependency failures come back as `available = false`.
    async fn check_availability(&self, product_id: &str, requested_qty: i32) -> InventoryCheck;

    /// Fetches product catalog info; `None` when the product is unknown or
    /// the service cannot be reached.
    async fn fetch_product(&self, product_id: &str) -> Option<ProductInfo>;
}

/// Wire shape of `GET /api/productos/{id}/inventario`.
#[derive(Debug, Deserialize)]
struct InventoryPayload {
    #[serde(default)]
    cantidad_disponible: i32,
    #[serde(default)]
    precio: Decimal,
}

/// HTTP implementation backed by reqwest with a per-request timeout.
pub struct HttpInventoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpInventoryClient {
    /// Creates a client against `base_url` (e.g. `http://product-service:8005`)
    /// with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn check_availability(&self, product_id: &str, requested_qty: i32) -> InventoryCheck {
        let url = format!("{}/api/productos/{}/inventario", self.base_url, product_id);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                error!("Timeout al consultar inventario para {}", product_id);
                return InventoryCheck::unavailable("Timeout al consultar inventario");
            }
            Err(e) => {
                error!("Error validando inventario: {}", e);
                return InventoryCheck::unavailable("Error al consultar inventario");
            }
        };

        match response.status() {
            reqwest::StatusCode::OK => match response.json::<InventoryPayload>().await {
                Ok(payload) => {
                    let available = payload.cantidad_disponible >= requested_qty;
                    let message = if available {
                        "Inventario disponible".to_string()
                    } else {
                        format!(
                            "Inventario insuficiente. Disponible: {}",
                            payload.cantidad_disponible
                        )
                    };
                    InventoryCheck {
                        available,
                        available_qty: payload.cantidad_disponible,
                        unit_price: payload.precio,
                        message,
                    }
                }
                Err(e) => {
                    error!("Respuesta de inventario inválida para {}: {}", product_id, e);
                    InventoryCheck::unavailable("Error al consultar inventario")
                }
            },
            reqwest::StatusCode::NOT_FOUND => InventoryCheck::unavailable("Producto no encontrado"),
            status => {
                warn!("Error al validar producto {}: {}", product_id, status);
                InventoryCheck::unavailable("Error al consultar inventario")
            }
        }
    }

    async fn fetch_product(&self, product_id: &str) -> Option<ProductInfo> {
        let url = format!("{}/api/productos/{}", self.base_url, product_id);

        match self.http.get(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                response.json::<ProductInfo>().await.ok()
            }
            Ok(response) => {
                warn!("Producto {} no encontrado: {}", product_id, response.status());
                None
            }
            Err(e) => {
                error!("Error obteniendo info de producto {}: {}", product_id, e);
                None
            }
        }
    }
}
