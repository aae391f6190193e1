use crate::ServiceError;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use inventory_client::InventoryClient;
use model::{
    format_order_number, CreateOrderRequest, InventoryValidation, Order, OrderFilters, OrderLine,
    OrderStatus, QuantitySuggestion, RequestedProduct, UserRole,
};
use repository::{OrderLinesRepository, OrdersRepository};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Maximum page size accepted by order listing.
pub const MAX_PAGE_SIZE: i64 = 100;
/// Default page size when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Outcome of validating every requested line against live inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderValidation {
    pub all_valid: bool,
    pub results: Vec<InventoryValidation>,
    pub error: Option<String>,
}

impl OrderValidation {
    /// "Reduce to N" suggestions for every line that failed validation.
    pub fn suggestions(&self) -> Vec<QuantitySuggestion> {
        self.results
            .iter()
            .filter(|v| !v.available)
            .map(|v| QuantitySuggestion {
                product_id: v.product_id.clone(),
                max_qty: v.available_qty,
                requested_qty: v.requested_qty,
            })
            .collect()
    }
}

/// Validates requested order lines against the inventory service.
///
/// Pure validation: no side effects, nothing persisted, and every line is
/// checked even after a failure so the caller can report all shortfalls at
/// once.
pub struct OrderValidator<C> {
    inventory: Arc<C>,
}

impl<C: InventoryClient> OrderValidator<C> {
    pub fn new(inventory: Arc<C>) -> Self {
        Self { inventory }
    }

    pub async fn validate(&self, products: &[RequestedProduct]) -> OrderValidation {
        let mut results = Vec::with_capacity(products.len());
        let mut all_valid = true;

        for product in products {
            let check = self
                .inventory
                .check_availability(&product.product_id, product.requested_qty)
                .await;

            if !check.available {
                all_valid = false;
            }
            results.push(InventoryValidation {
                product_id: product.product_id.clone(),
                available: check.available,
                available_qty: check.available_qty,
                requested_qty: product.requested_qty,
                message: check.message,
            });
        }

        let error = (!all_valid)
            .then(|| "Inventario insuficiente para uno o más productos".to_string());
        OrderValidation {
            all_valid,
            results,
            error,
        }
    }
}

/// An order created by [`OrderService::create_order`], with the validation
/// trail and the human-readable confirmation message.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    pub validations: Vec<InventoryValidation>,
    pub message: String,
}

/// Trait describing business operations for order management.
///
/// Service implementations are expected to guarantee atomicity and data
/// integrity when saving orders and their lines, typically via a transaction.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Validates all lines and, on full success, persists the order aggregate
    /// atomically with a fresh sequential order number.
    ///
    /// # Errors
    /// [`ServiceError::InvalidOrder`] for caller errors (empty product list,
    /// non-positive quantity), [`ServiceError::InsufficientInventory`] when
    /// any line fails validation (nothing persisted), plus the usual DB/pool
    /// errors.
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
        user_id: i32,
        role: UserRole,
    ) -> Result<CreatedOrder, ServiceError>;

    /// Validates inventory for the requested lines without creating anything.
    async fn validate_inventory(&self, request: &CreateOrderRequest) -> OrderValidation;

    /// Retrieves the full order (with lines) by id.
    async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError>;

    /// Lists orders matching the filters, newest first, 1-indexed pages.
    /// `per_page` is clamped to [`MAX_PAGE_SIZE`].
    async fn list_orders(
        &self,
        filters: &OrderFilters,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Order>, i64), ServiceError>;

    /// Transitions the order to `new_status`, appending a timestamped note.
    /// Returns the previous status and the updated order.
    ///
    /// # Errors
    /// [`ServiceError::IllegalTransition`] when the state machine defines no
    /// such transition, [`ServiceError::NotFound`] when the order is absent,
    /// [`ServiceError::Conflict`] when another writer changed the order's
    /// status between the read and the write.
    async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        notes: Option<&str>,
    ) -> Result<(OrderStatus, Order), ServiceError>;
}

/// Async implementation of [`OrderService`] using the repository pattern.
pub struct OrderServiceImpl<C, R1, R2> {
    db_pool: Pool,
    inventory: Arc<C>,
    validator: OrderValidator<C>,
    orders_repo: R1,
    lines_repo: R2,
}

impl<C, R1, R2> OrderServiceImpl<C, R1, R2>
where
    C: InventoryClient,
    R1: OrdersRepository + Send + Sync,
    R2: OrderLinesRepository + Send + Sync,
{
    /// Constructs a new [`OrderServiceImpl`] from the provided dependencies.
    ///
    /// # Arguments
    /// * `db_pool` - The Postgres connection pool to use for transactions.
    /// * `inventory` - Client for the external product/inventory service.
    /// * `orders_repo` - The repository for order aggregates.
    /// * `lines_repo` - The repository for order lines.
    ///
    /// This approach enables dependency injection and facilitates mocking/testing.
    pub fn new(db_pool: Pool, inventory: Arc<C>, orders_repo: R1, lines_repo: R2) -> Self {
        Self {
            db_pool,
            validator: OrderValidator::new(inventory.clone()),
            inventory,
            orders_repo,
            lines_repo,
        }
    }

    /// Structural checks the caller must get right before any business rule runs.
    fn check_request(&self, request: &CreateOrderRequest) -> Result<(), ServiceError> {
        if request.products.is_empty() {
            return Err(ServiceError::InvalidOrder(
                "El pedido debe contener al menos un producto".into(),
            ));
        }
        if let Some(bad) = request.products.iter().find(|p| p.requested_qty <= 0) {
            return Err(ServiceError::InvalidOrder(format!(
                "Cantidad solicitada inválida para {}",
                bad.product_id
            )));
        }
        if request.nit.trim().is_empty() {
            return Err(ServiceError::InvalidOrder("NIT requerido".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<C, R1, R2> OrderService for OrderServiceImpl<C, R1, R2>
where
    C: InventoryClient,
    R1: OrdersRepository + Send + Sync,
    R2: OrderLinesRepository + Send + Sync,
{
    #[instrument(skip(self, request))]
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
        user_id: i32,
        role: UserRole,
    ) -> Result<CreatedOrder, ServiceError> {
        self.check_request(request)?;

        // First pass: check every line so all shortfalls are reported at once.
        let validation = self.validator.validate(&request.products).await;
        if !validation.all_valid {
            return Err(ServiceError::InsufficientInventory {
                message: validation
                    .error
                    .unwrap_or_else(|| "Inventario insuficiente para uno o más productos".into()),
                validations: validation.results,
            });
        }

        let mut client = self.db_pool.get().await.map_err(ServiceError::from)?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Begin transaction failed: {e}")))?;

        // The counter row serializes number assignment under concurrent creation.
        let seq = self.orders_repo.next_order_seq_tx(&tx).await?;
        let order_number = format_order_number(seq);

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let mut lines = Vec::with_capacity(request.products.len());

        for product in &request.products {
            let info = self.inventory.fetch_product(&product.product_id).await;
            let name = info
                .and_then(|i| i.name)
                .unwrap_or_else(|| "Producto desconocido".to_string());

            // Second pass inside the transaction narrows the race between
            // "looked available" and "committed".
            let check = self
                .inventory
                .check_availability(&product.product_id, product.requested_qty)
                .await;
            if !check.available {
                error!("Inventario insuficiente para {}", product.product_id);
                // Dropping the transaction rolls the whole order back.
                return Err(ServiceError::InsufficientInventory {
                    message: format!("Inventario insuficiente para {name}"),
                    validations: Vec::new(),
                });
            }

            let subtotal = check.unit_price * Decimal::from(product.requested_qty);
            lines.push(OrderLine {
                id: Uuid::new_v4(),
                order_id,
                product_id: product.product_id.clone(),
                product_name: name,
                requested_qty: product.requested_qty,
                available_qty_at_creation: check.available_qty,
                unit_price: check.unit_price,
                subtotal,
                added_at: now,
            });
        }

        let order = Order {
            id: order_id,
            order_number: order_number.clone(),
            user_id,
            nit: request.nit.clone(),
            role,
            status: OrderStatus::Pending,
            total_amount: Order::compute_total(&lines),
            created_at: now,
            updated_at: now,
            notes: request.notes.clone(),
            lines,
        };

        self.orders_repo.insert_tx(&tx, &order).await?;
        self.lines_repo.insert_tx(&tx, &order.lines).await?;

        tx.commit()
            .await
            .map_err(|e| ServiceError::Unexpected(format!("Commit failed: {e}")))?;

        info!("Pedido {} creado para usuario {}", order_number, user_id);
        Ok(CreatedOrder {
            message: format!("Pedido creado exitosamente con número #{order_number}"),
            validations: validation.results,
            order,
        })
    }

    async fn validate_inventory(&self, request: &CreateOrderRequest) -> OrderValidation {
        self.validator.validate(&request.products).await
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let mut order = self.orders_repo.get_by_id(order_id).await?;
        order.lines = self.lines_repo.get_by_order_id(order_id).await?;
        Ok(order)
    }

    #[instrument(skip(self, filters))]
    async fn list_orders(
        &self,
        filters: &OrderFilters,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Order>, i64), ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        let (mut orders, total) = self.orders_repo.list(filters, page, per_page).await?;

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for line in self.lines_repo.get_by_order_ids(&ids).await? {
            by_order.entry(line.order_id).or_default().push(line);
        }
        for order in &mut orders {
            order.lines = by_order.remove(&order.id).unwrap_or_default();
        }

        Ok((orders, total))
    }

    #[instrument(skip(self, notes))]
    async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        notes: Option<&str>,
    ) -> Result<(OrderStatus, Order), ServiceError> {
        let order = self.orders_repo.get_by_id(order_id).await?;
        let previous = order.status;

        if !previous.can_transition_to(new_status) {
            return Err(ServiceError::IllegalTransition {
                from: previous,
                to: new_status,
            });
        }

        // Notes are append-only: prior history is always retained.
        let new_notes = match notes.filter(|n| !n.trim().is_empty()) {
            Some(note) => {
                let mut text = order.notes.unwrap_or_default();
                text.push_str(&format!("\n[{}] {}", Utc::now().to_rfc3339(), note));
                Some(text)
            }
            None => order.notes,
        };

        // The repository write is conditioned on the status we read, so a
        // concurrent transition turns into a Conflict instead of silently
        // overwriting the other writer's status and notes.
        self.orders_repo
            .update_status(order_id, previous, new_status, new_notes.as_deref())
            .await?;

        let updated = self.get_order(order_id).await?;
        Ok((previous, updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadpool_postgres::tokio_postgres::{Config as PgConfig, NoTls, Transaction};
    use deadpool_postgres::{Manager, ManagerConfig, RecyclingMethod};
    use inventory_client::{InventoryCheck, ProductInfo};
    use repository::RepositoryError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock inventory with fixed stock levels; records every product queried.
    struct MockInventory {
        stock: HashMap<String, (i32, Decimal)>,
        queried: Mutex<Vec<String>>,
    }

    impl MockInventory {
        fn new(stock: &[(&str, i32, &str)]) -> Self {
            Self {
                stock: stock
                    .iter()
                    .map(|(id, qty, price)| {
                        (id.to_string(), (*qty, price.parse::<Decimal>().unwrap()))
                    })
                    .collect(),
                queried: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InventoryClient for MockInventory {
        async fn check_availability(
            &self,
            product_id: &str,
            requested_qty: i32,
        ) -> InventoryCheck {
            self.queried.lock().unwrap().push(product_id.to_string());
            match self.stock.get(product_id) {
                Some(&(qty, price)) => {
                    let available = qty >= requested_qty;
                    InventoryCheck {
                        available,
                        available_qty: qty,
                        unit_price: price,
                        message: if available {
                            "Inventario disponible".into()
                        } else {
                            format!("Inventario insuficiente. Disponible: {qty}")
                        },
                    }
                }
                None => InventoryCheck {
                    available: false,
                    available_qty: 0,
                    unit_price: Decimal::ZERO,
                    message: "Producto no encontrado".into(),
                },
            }
        }

        async fn fetch_product(&self, product_id: &str) -> Option<ProductInfo> {
            self.stock.get(product_id).map(|_| ProductInfo {
                name: Some(format!("Producto {product_id}")),
            })
        }
    }

    fn lines(entries: &[(&str, i32)]) -> Vec<RequestedProduct> {
        entries
            .iter()
            .map(|(id, qty)| RequestedProduct {
                product_id: id.to_string(),
                requested_qty: *qty,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_lines_checked_even_after_failure() {
        let inventory = Arc::new(MockInventory::new(&[
            ("p1", 5, "10.00"),
            ("p2", 100, "2.50"),
            ("p3", 0, "1.00"),
        ]));
        let validator = OrderValidator::new(inventory.clone());

        let result = validator
            .validate(&lines(&[("p1", 10), ("p2", 3), ("p3", 1)]))
            .await;

        assert!(!result.all_valid);
        assert_eq!(result.results.len(), 3);
        // No early exit: every product was queried.
        assert_eq!(inventory.queried.lock().unwrap().len(), 3);
        assert!(!result.results[0].available);
        assert!(result.results[1].available);
        assert!(!result.results[2].available);
        assert_eq!(
            result.error.as_deref(),
            Some("Inventario insuficiente para uno o más productos")
        );
    }

    #[tokio::test]
    async fn test_suggestions_carry_max_and_requested_quantities() {
        let inventory = Arc::new(MockInventory::new(&[("p1", 5, "10.00"), ("p2", 50, "1.00")]));
        let validator = OrderValidator::new(inventory);

        let result = validator.validate(&lines(&[("p1", 10), ("p2", 7)])).await;
        let suggestions = result.suggestions();

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].product_id, "p1");
        assert_eq!(suggestions[0].max_qty, 5);
        assert_eq!(suggestions[0].requested_qty, 10);
    }

    #[tokio::test]
    async fn test_unknown_product_fails_closed() {
        let inventory = Arc::new(MockInventory::new(&[]));
        let validator = OrderValidator::new(inventory);

        let result = validator.validate(&lines(&[("ghost", 1)])).await;

        assert!(!result.all_valid);
        assert_eq!(result.results[0].message, "Producto no encontrado");
        assert_eq!(result.results[0].available_qty, 0);
    }

    #[tokio::test]
    async fn test_fully_available_order_validates() {
        let inventory = Arc::new(MockInventory::new(&[("p1", 10, "3.00")]));
        let validator = OrderValidator::new(inventory);

        let result = validator.validate(&lines(&[("p1", 10)])).await;

        assert!(result.all_valid);
        assert!(result.error.is_none());
        assert!(result.suggestions().is_empty());
        assert_eq!(result.results[0].message, "Inventario disponible");
    }

    /// In-memory orders repository holding one order. `steal_to` simulates a
    /// concurrent writer committing another status between the service's read
    /// and its guarded write.
    struct MockOrdersRepo {
        order: Arc<Mutex<Order>>,
        steal_to: Mutex<Option<OrderStatus>>,
    }

    #[async_trait]
    impl OrdersRepository for MockOrdersRepo {
        async fn insert_tx(
            &self,
            _tx: &Transaction<'_>,
            _order: &Order,
        ) -> Result<(), RepositoryError> {
            unimplemented!()
        }

        async fn next_order_seq_tx(&self, _tx: &Transaction<'_>) -> Result<i64, RepositoryError> {
            unimplemented!()
        }

        async fn get_by_id(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
            let snapshot = {
                let order = self.order.lock().unwrap();
                if order.id != order_id {
                    return Err(RepositoryError::NotFound);
                }
                order.clone()
            };
            if let Some(next) = self.steal_to.lock().unwrap().take() {
                self.order.lock().unwrap().status = next;
            }
            Ok(snapshot)
        }

        async fn list(
            &self,
            _filters: &OrderFilters,
            _page: i64,
            _per_page: i64,
        ) -> Result<(Vec<Order>, i64), RepositoryError> {
            unimplemented!()
        }

        async fn update_status(
            &self,
            order_id: Uuid,
            from: OrderStatus,
            to: OrderStatus,
            notes: Option<&str>,
        ) -> Result<(), RepositoryError> {
            let mut order = self.order.lock().unwrap();
            if order.id != order_id {
                return Err(RepositoryError::NotFound);
            }
            if order.status != from {
                return Err(RepositoryError::Conflict(format!(
                    "El pedido cambió de estado de forma concurrente: se esperaba {}",
                    from.as_str()
                )));
            }
            order.status = to;
            order.notes = notes.map(str::to_string);
            Ok(())
        }
    }

    struct MockLinesRepo;

    #[async_trait]
    impl OrderLinesRepository for MockLinesRepo {
        async fn insert_tx(
            &self,
            _tx: &Transaction<'_>,
            _lines: &[OrderLine],
        ) -> Result<(), RepositoryError> {
            unimplemented!()
        }

        async fn get_by_order_id(&self, _order_id: Uuid) -> Result<Vec<OrderLine>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn get_by_order_ids(
            &self,
            _order_ids: &[Uuid],
        ) -> Result<Vec<OrderLine>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    /// Pool that is never used: the status-update path runs entirely on the
    /// repository's own connection.
    fn idle_pool() -> Pool {
        let mut cfg = PgConfig::new();
        cfg.host("localhost").user("nobody").dbname("nowhere");
        let mgr = Manager::from_config(
            cfg,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        Pool::builder(mgr).max_size(1).build().unwrap()
    }

    fn stored_order(status: OrderStatus, notes: Option<&str>) -> Order {
        Order {
            id: Uuid::new_v4(),
            order_number: "PED-000001".into(),
            user_id: 7,
            nit: "123456789".into(),
            role: UserRole::InstitutionalClient,
            status,
            total_amount: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            notes: notes.map(str::to_string),
            lines: Vec::new(),
        }
    }

    fn status_service(
        order: Order,
        steal_to: Option<OrderStatus>,
    ) -> (
        OrderServiceImpl<MockInventory, MockOrdersRepo, MockLinesRepo>,
        Arc<Mutex<Order>>,
    ) {
        let stored = Arc::new(Mutex::new(order));
        let repo = MockOrdersRepo {
            order: stored.clone(),
            steal_to: Mutex::new(steal_to),
        };
        let service = OrderServiceImpl::new(
            idle_pool(),
            Arc::new(MockInventory::new(&[])),
            repo,
            MockLinesRepo,
        );
        (service, stored)
    }

    #[tokio::test]
    async fn test_update_status_appends_timestamped_note_keeping_history() {
        let order = stored_order(OrderStatus::Pending, Some("Pedido urgente"));
        let order_id = order.id;
        let (service, _) = status_service(order, None);

        let (previous, updated) = service
            .update_status(order_id, OrderStatus::Confirmed, Some("Confirmado por ventas"))
            .await
            .unwrap();

        assert_eq!(previous, OrderStatus::Pending);
        assert_eq!(updated.status, OrderStatus::Confirmed);
        let notes = updated.notes.unwrap();
        // Prior notes retained, new note appended as its own timestamped line.
        assert!(notes.starts_with("Pedido urgente\n["));
        assert!(notes.ends_with("] Confirmado por ventas"));

        // A transition without a note leaves the notes text untouched.
        let (_, updated) = service
            .update_status(order_id, OrderStatus::InProcess, None)
            .await
            .unwrap();
        assert_eq!(updated.notes.unwrap(), notes);
    }

    #[tokio::test]
    async fn test_update_status_rejects_illegal_transition() {
        let order = stored_order(OrderStatus::Delivered, None);
        let order_id = order.id;
        let (service, stored) = status_service(order, None);

        match service
            .update_status(order_id, OrderStatus::Pending, Some("reabrir"))
            .await
        {
            Err(ServiceError::IllegalTransition { from, to }) => {
                assert_eq!(from, OrderStatus::Delivered);
                assert_eq!(to, OrderStatus::Pending);
            }
            other => panic!("expected IllegalTransition, got {other:?}"),
        }
        // Nothing written.
        assert_eq!(stored.lock().unwrap().status, OrderStatus::Delivered);
        assert!(stored.lock().unwrap().notes.is_none());
    }

    #[tokio::test]
    async fn test_update_status_conflicts_when_status_changes_underneath() {
        let order = stored_order(OrderStatus::Pending, Some("historial"));
        let order_id = order.id;
        // Another writer commits Confirmed between our read and our write.
        let (service, stored) = status_service(order, Some(OrderStatus::Confirmed));

        match service
            .update_status(order_id, OrderStatus::Cancelled, Some("cancelación tardía"))
            .await
        {
            Err(ServiceError::Conflict(msg)) => {
                assert!(msg.contains("pendiente"));
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
        // The winner's status stands and its notes were not overwritten.
        let current = stored.lock().unwrap();
        assert_eq!(current.status, OrderStatus::Confirmed);
        assert_eq!(current.notes.as_deref(), Some("historial"));
    }
}
