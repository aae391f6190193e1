//! Server crate provides HTTP server functionality.
//!
//! This module exposes the procurement API over axum: order creation and
//! management under `/pedidos`, the bulk-load pipeline endpoints
//! (`/upload-csv`, `/validate/{batch_id}`, `/products/upsert`) and their
//! read-side listings, plus health and Prometheus metrics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use model::{
    CreateOrderRequest, CreateOrderResponse, ListOrdersResponse, OrderFilters, OrderStatus,
    UpdateStatusRequest, UpdateStatusResponse, UserRole, ValidateBatchResponse,
};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use repository::{
    FinalProductsRepository, PgFinalProductsRepository, PgStagingErrorsRepository,
    PgStagingRepository, StagingErrorsRepository, StagingRepository,
};
use serde::Deserialize;
use serde_json::json;
use service::{
    BatchValidator, IngestionService, OrderService, ServiceError, UpsertService,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default page size for the staging/products listings.
const DEFAULT_LISTING_LIMIT: i64 = 100;
/// Hard cap for the staging/products listings.
const MAX_LISTING_LIMIT: i64 = 500;

type Ingestion = IngestionService<PgStagingRepository>;
type Validation = BatchValidator<PgStagingRepository, PgStagingErrorsRepository>;
type Promotion = UpsertService<PgStagingRepository, PgFinalProductsRepository>;

/// Application state shared between request handlers.
#[derive(Clone)]
pub struct AppState {
    orders: Arc<dyn OrderService>,
    ingestion: Arc<Ingestion>,
    validation: Arc<Validation>,
    promotion: Arc<Promotion>,
    staging: Arc<dyn StagingRepository>,
    staging_errors: Arc<dyn StagingErrorsRepository>,
    products: Arc<dyn FinalProductsRepository>,
    metrics: Arc<Metrics>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderService>,
        ingestion: Arc<Ingestion>,
        validation: Arc<Validation>,
        promotion: Arc<Promotion>,
        staging: Arc<dyn StagingRepository>,
        staging_errors: Arc<dyn StagingErrorsRepository>,
        products: Arc<dyn FinalProductsRepository>,
    ) -> Self {
        Self {
            orders,
            ingestion,
            validation,
            promotion,
            staging,
            staging_errors,
            products,
            metrics: Arc::new(Metrics::new()),
        }
    }
}

/// Server represents the HTTP server for the procurement API.
pub struct Server {
    state: AppState,
    port: u16,
}

/// Metrics collects and exposes HTTP server metrics.
struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("Failed to create http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )
        .expect("Failed to create http_request_duration_seconds metric");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )
        .expect("Failed to create errors_total metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("Failed to register http_requests_total metric");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("Failed to register http_request_duration_seconds metric");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total metric");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
        }
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total
            .with_label_values(&[source, endpoint])
            .inc();
    }
}

/// Query parameters of `GET /pedidos`.
#[derive(Debug, Deserialize)]
struct ListOrdersQuery {
    usuario_id: Option<i32>,
    nit: Option<String>,
    estado: Option<String>,
    pagina: Option<i64>,
    por_pagina: Option<i64>,
}

/// Query parameters of the staging/products listings.
#[derive(Debug, Deserialize)]
struct ListingQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl ListingQuery {
    fn window(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_LISTING_LIMIT)
            .clamp(1, MAX_LISTING_LIMIT);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

impl Server {
    /// Creates a new Server instance listening on `port`.
    pub fn new(port: u16, state: AppState) -> Self {
        info!("Initializing HTTP server on port {}", port);
        Self { state, port }
    }

    /// Starts the server and blocks until it's shut down.
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let metrics = self.state.metrics.clone();

        Router::new()
            .route("/pedidos", post(Self::handle_create_order))
            .route("/pedidos", get(Self::handle_list_orders))
            .route(
                "/pedidos/validar-inventario",
                post(Self::handle_validate_inventory),
            )
            .route("/pedidos/{id}", get(Self::handle_get_order))
            .route("/pedidos/{id}/estado", put(Self::handle_update_status))
            .route("/upload-csv", post(Self::handle_upload_csv))
            .route("/staging-products", get(Self::handle_list_staging))
            .route("/validate/{batch_id}", post(Self::handle_validate_batch))
            .route("/errors", get(Self::handle_list_errors))
            .route("/products/upsert", post(Self::handle_upsert))
            .route("/products", get(Self::handle_list_products))
            .route("/health", get(Self::handle_health))
            .route("/metrics", get(Self::handle_metrics))
            .layer(axum::middleware::from_fn_with_state(
                metrics,
                Self::metrics_middleware,
            ))
            .with_state(self.state.clone())
    }

    /// Middleware for collecting metrics on HTTP requests
    async fn metrics_middleware(
        State(metrics): State<Arc<Metrics>>,
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> Response {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let status = response.status().as_u16();

        metrics.record_request(&method, &path, status, start.elapsed());
        if status >= 400 {
            metrics.record_error("http", &path);
        }

        response
    }

    async fn handle_create_order(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<CreateOrderRequest>,
    ) -> Response {
        let (user_id, role) = match caller_identity(&headers) {
            Ok(identity) => identity,
            Err(response) => return response,
        };

        info!("Solicitud de creación de pedido para usuario {}", user_id);

        match state.orders.create_order(&request, user_id, role).await {
            Ok(created) => Json(CreateOrderResponse {
                exito: true,
                pedido_id: created.order.id,
                numero_pedido: created.order.order_number.clone(),
                mensaje: created.message,
                validaciones: created.validations,
                pedido: created.order,
            })
            .into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn handle_validate_inventory(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<CreateOrderRequest>,
    ) -> Response {
        if let Err(response) = caller_identity(&headers) {
            return response;
        }

        let validation = state.orders.validate_inventory(&request).await;
        Json(json!({
            "valido": validation.all_valid,
            "mensaje": validation.error.clone().unwrap_or_default(),
            "validaciones": validation.results,
        }))
        .into_response()
    }

    async fn handle_get_order(
        State(state): State<AppState>,
        Path(order_id): Path<Uuid>,
    ) -> Response {
        match state.orders.get_order(order_id).await {
            Ok(order) => Json(order).into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn handle_list_orders(
        State(state): State<AppState>,
        Query(query): Query<ListOrdersQuery>,
    ) -> Response {
        let status = match query.estado.as_deref() {
            Some(raw) => match OrderStatus::parse(raw) {
                Some(status) => Some(status),
                None => {
                    warn!("Estado de pedido desconocido en filtro: {}", raw);
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({
                            "error": "ESTADO_INVALIDO",
                            "mensaje": format!(
                                "Estado inválido. Estados válidos: {:?}",
                                OrderStatus::all_values()
                            ),
                        })),
                    )
                        .into_response();
                }
            },
            None => None,
        };

        let filters = OrderFilters {
            user_id: query.usuario_id,
            nit: query.nit,
            status,
        };
        // Clamp here too, so the echoed pagination matches what the service
        // actually returns.
        let (page, per_page) = order_page_window(query.pagina, query.por_pagina);

        match state.orders.list_orders(&filters, page, per_page).await {
            Ok((orders, total)) => Json(ListOrdersResponse {
                total,
                pagina: page,
                por_pagina: per_page,
                pedidos: orders,
            })
            .into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn handle_update_status(
        State(state): State<AppState>,
        Path(order_id): Path<Uuid>,
        headers: HeaderMap,
        Json(request): Json<UpdateStatusRequest>,
    ) -> Response {
        match caller_role(&headers) {
            Ok(UserRole::AccountManager) => {}
            Ok(_) => {
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({
                        "error": "ROL_NO_AUTORIZADO",
                        "mensaje": "Solo administradores pueden actualizar el estado de pedidos",
                    })),
                )
                    .into_response();
            }
            Err(response) => return response,
        }

        match state
            .orders
            .update_status(order_id, request.new_status, request.notes.as_deref())
            .await
        {
            Ok((previous, updated)) => Json(UpdateStatusResponse {
                exito: true,
                pedido_id: updated.id,
                estado_anterior: previous,
                estado_nuevo: updated.status,
                mensaje: "Estado actualizado exitosamente".to_string(),
            })
            .into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn handle_upload_csv(
        State(state): State<AppState>,
        mut multipart: Multipart,
    ) -> Response {
        let mut file_bytes: Option<Vec<u8>> = None;
        let mut created_by = "system".to_string();

        loop {
            match multipart.next_field().await {
                Ok(Some(field)) => {
                    let name = field.name().map(str::to_string);
                    match name.as_deref() {
                        Some("file") => match field.bytes().await {
                            Ok(bytes) => file_bytes = Some(bytes.to_vec()),
                            Err(e) => {
                                warn!("Lectura del archivo subido falló: {}", e);
                                return error_response(ServiceError::CsvParse(e.to_string()));
                            }
                        },
                        Some("created_by") => {
                            if let Ok(text) = field.text().await {
                                if !text.trim().is_empty() {
                                    created_by = text.trim().to_string();
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Multipart inválido: {}", e);
                    return error_response(ServiceError::CsvParse(e.to_string()));
                }
            }
        }

        let Some(file_bytes) = file_bytes else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "ARCHIVO_FALTANTE",
                    "mensaje": "Archivo CSV requerido en el campo 'file'",
                })),
            )
                .into_response();
        };

        match state.ingestion.ingest(&file_bytes, &created_by).await {
            Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn handle_list_staging(
        State(state): State<AppState>,
        Query(query): Query<ListingQuery>,
    ) -> Response {
        let (limit, offset) = query.window();
        match state.staging.list(limit, offset).await {
            Ok(rows) => Json(json!({ "total": rows.len(), "productos": rows })).into_response(),
            Err(e) => error_response(e.into()),
        }
    }

    async fn handle_validate_batch(
        State(state): State<AppState>,
        Path(batch_id): Path<Uuid>,
    ) -> Response {
        match state.validation.validate_batch(batch_id).await {
            Ok(counts) => Json(ValidateBatchResponse {
                estado: "validación completada".to_string(),
                resumen: model::BatchValidationSummary {
                    counts,
                    timestamp: chrono::Utc::now(),
                },
            })
            .into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn handle_list_errors(State(state): State<AppState>) -> Response {
        match state.staging_errors.list().await {
            Ok(errors) => Json(json!({ "total": errors.len(), "errores": errors })).into_response(),
            Err(e) => error_response(e.into()),
        }
    }

    async fn handle_upsert(State(state): State<AppState>) -> Response {
        match state.promotion.upsert_validated().await {
            Ok(outcome) => Json(outcome).into_response(),
            Err(e) => error_response(e),
        }
    }

    async fn handle_list_products(
        State(state): State<AppState>,
        Query(query): Query<ListingQuery>,
    ) -> Response {
        let (limit, offset) = query.window();
        match state.products.list(limit, offset).await {
            Ok(products) => {
                Json(json!({ "total": products.len(), "productos": products })).into_response()
            }
            Err(e) => error_response(e.into()),
        }
    }

    async fn handle_health() -> Response {
        Json(json!({ "status": "ok" })).into_response()
    }

    async fn handle_metrics(State(state): State<AppState>) -> Response {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
                .into_response();
        }

        match String::from_utf8(buffer) {
            Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
            Err(e) => {
                error!("Failed to convert metrics to UTF-8: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid metrics data").into_response()
            }
        }
    }
}

/// Effective pagination of `GET /pedidos`: 1-indexed page, page size
/// defaulted and clamped to the service's limits.
fn order_page_window(pagina: Option<i64>, por_pagina: Option<i64>) -> (i64, i64) {
    (
        pagina.unwrap_or(1).max(1),
        por_pagina.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    )
}

/// Reads the trusted identity headers the gateway injects after JWT checks.
fn caller_identity(headers: &HeaderMap) -> Result<(i32, UserRole), Response> {
    let user_id = headers
        .get("usuario-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i32>().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "ENCABEZADO_INVALIDO",
                    "mensaje": "Encabezado usuario-id requerido",
                })),
            )
                .into_response()
        })?;

    let role = caller_role(headers)?;
    Ok((user_id, role))
}

fn caller_role(headers: &HeaderMap) -> Result<UserRole, Response> {
    headers
        .get("rol-usuario")
        .and_then(|v| v.to_str().ok())
        .and_then(UserRole::parse)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "ROL_INVALIDO",
                    "mensaje": "Rol inválido. Debe ser 'usuario_institucional' o 'admin'",
                })),
            )
                .into_response()
        })
}

/// Maps a service error to its HTTP response.
///
/// Inventory shortfalls keep their structured body so clients can render
/// per-line verdicts and "reduce to N" suggestions.
fn error_response(err: ServiceError) -> Response {
    match err {
        ServiceError::InvalidOrder(msg) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "PEDIDO_INVALIDO", "mensaje": msg })),
        )
            .into_response(),
        ServiceError::InsufficientInventory {
            message,
            validations,
        } => {
            let sugerencias: Vec<serde_json::Value> = validations
                .iter()
                .filter(|v| !v.available)
                .map(|v| {
                    json!({
                        "producto_id": v.product_id,
                        "cantidad_maxima": v.available_qty,
                        "cantidad_solicitada": v.requested_qty,
                    })
                })
                .collect();
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "INVENTARIO_INSUFICIENTE",
                    "mensaje": message,
                    "validaciones": validations,
                    "sugerencias": sugerencias,
                })),
            )
                .into_response()
        }
        ServiceError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "NO_ENCONTRADO", "mensaje": "Pedido no encontrado" })),
        )
            .into_response(),
        e @ ServiceError::IllegalTransition { .. } => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "TRANSICION_INVALIDA", "mensaje": e.to_string() })),
        )
            .into_response(),
        ServiceError::MissingColumns(columns) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "COLUMNAS_FALTANTES",
                "mensaje": format!("Faltan columnas en el CSV: {columns:?}"),
                "columnas": columns,
            })),
        )
            .into_response(),
        ServiceError::CsvParse(msg) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "CSV_INVALIDO", "mensaje": msg })),
        )
            .into_response(),
        ServiceError::Conflict(msg) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "CONFLICTO", "mensaje": msg })),
        )
            .into_response(),
        e => {
            error!("Error interno: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "ERROR_INTERNO", "mensaje": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(user_id: &str, role: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("usuario-id", HeaderValue::from_str(user_id).unwrap());
        map.insert("rol-usuario", HeaderValue::from_str(role).unwrap());
        map
    }

    #[test]
    fn test_identity_headers_parse() {
        let Ok((user_id, role)) = caller_identity(&headers("42", "admin")) else {
            panic!("valid headers rejected");
        };
        assert_eq!(user_id, 42);
        assert_eq!(role, UserRole::AccountManager);

        let Ok((_, role)) = caller_identity(&headers("7", "usuario_institucional")) else {
            panic!("valid headers rejected");
        };
        assert_eq!(role, UserRole::InstitutionalClient);
    }

    #[test]
    fn test_identity_headers_reject_bad_values() {
        assert!(caller_identity(&headers("not-a-number", "admin")).is_err());
        assert!(caller_identity(&headers("42", "superuser")).is_err());
        assert!(caller_identity(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_insufficient_inventory_maps_to_structured_400() {
        let err = ServiceError::InsufficientInventory {
            message: "Inventario insuficiente para uno o más productos".into(),
            validations: vec![model::InventoryValidation {
                product_id: "p1".into(),
                available: false,
                available_qty: 5,
                requested_qty: 10,
                message: "Inventario insuficiente. Disponible: 5".into(),
            }],
        };
        let response = error_response(err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_illegal_transition_maps_to_409() {
        let err = ServiceError::IllegalTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Pending,
        };
        assert_eq!(error_response(err).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_order_pagination_echo_matches_effective_window() {
        // An oversized page size is reported clamped, not as requested.
        assert_eq!(order_page_window(Some(0), Some(5000)), (1, MAX_PAGE_SIZE));
        assert_eq!(order_page_window(Some(-3), Some(0)), (1, 1));
        assert_eq!(order_page_window(None, None), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(order_page_window(Some(4), Some(25)), (4, 25));
    }

    #[test]
    fn test_listing_window_clamps() {
        let query = ListingQuery {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(query.window(), (MAX_LISTING_LIMIT, 0));

        let query = ListingQuery {
            limit: None,
            offset: None,
        };
        assert_eq!(query.window(), (DEFAULT_LISTING_LIMIT, 0));
    }
}
