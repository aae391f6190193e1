use crate::RepositoryError;
use async_trait::async_trait;
use model::{Order, OrderFilters, OrderLine, OrderStatus, UserRole};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row, Transaction};
use uuid::Uuid;

/// # OrdersRepository
///
/// Repository interface for the order aggregate root.
///
/// Orders are created only inside a transaction together with their lines
/// and the order-number counter bump; reads and the status update run
/// against the repository's own connection.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Insert an order row in a transaction (lines are inserted separately).
    async fn insert_tx(&self, tx: &Transaction<'_>, order: &Order) -> Result<(), RepositoryError>;

    /// Atomically advance the order-number counter and return the new value.
    ///
    /// Runs inside the order-creation transaction so concurrent creations
    /// serialize on the counter row and never share a number.
    async fn next_order_seq_tx(&self, tx: &Transaction<'_>) -> Result<i64, RepositoryError>;

    /// Get an order by id, without its lines.
    async fn get_by_id(&self, order_id: Uuid) -> Result<Order, RepositoryError>;

    /// List orders (without lines) matching the filters, newest first,
    /// with 1-indexed pagination. Returns the page and the total count.
    async fn list(
        &self,
        filters: &OrderFilters,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Order>, i64), RepositoryError>;

    /// Set the order's status and full notes text, stamping the update time.
    ///
    /// The write is guarded on `from`: it only lands if the stored status
    /// still matches what the caller read. A concurrent transition in
    /// between surfaces as [`RepositoryError::Conflict`] and leaves the
    /// row (including its notes) untouched.
    async fn update_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        notes: Option<&str>,
    ) -> Result<(), RepositoryError>;
}

/// PostgreSQL implementation of the OrdersRepository trait.
pub struct PgOrdersRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgOrdersRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

fn map_order(row: &Row) -> Result<Order, RepositoryError> {
    let role: String = row.get("rol_usuario");
    let status: String = row.get("estado");
    Ok(Order {
        id: row.get("pedido_id"),
        order_number: row.get("numero_pedido"),
        user_id: row.get("usuario_id"),
        nit: row.get("nit"),
        role: UserRole::parse(&role).unwrap_or(UserRole::InstitutionalClient),
        status: OrderStatus::parse(&status).ok_or(RepositoryError::NotFound)?,
        total_amount: row.get("monto_total"),
        created_at: row.get("fecha_creacion"),
        updated_at: row.get("fecha_actualizacion"),
        notes: row.get("observaciones"),
        lines: Vec::new(), // To be filled by service
    })
}

const ORDER_COLUMNS: &str = "pedido_id, numero_pedido, usuario_id, nit, rol_usuario, estado, \
                             monto_total, fecha_creacion, fecha_actualizacion, observaciones";

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn insert_tx(&self, tx: &Transaction<'_>, order: &Order) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO pedidos (
                pedido_id, numero_pedido, usuario_id, nit, rol_usuario, estado,
                monto_total, fecha_creacion, fecha_actualizacion, observaciones
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        "#;
        tx.execute(
            query,
            &[
                &order.id,
                &order.order_number,
                &order.user_id,
                &order.nit,
                &order.role.as_str(),
                &order.status.as_str(),
                &order.total_amount,
                &order.created_at,
                &order.updated_at,
                &order.notes,
            ],
        )
        .await?;
        Ok(())
    }

    async fn next_order_seq_tx(&self, tx: &Transaction<'_>) -> Result<i64, RepositoryError> {
        let row = tx
            .query_one(
                "UPDATE order_sequence SET last_value = last_value + 1 WHERE id = 1 RETURNING last_value",
                &[],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn get_by_id(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM pedidos WHERE pedido_id = $1");
        let row = self.db.query_opt(&query, &[&order_id]).await?;
        match row {
            Some(row) => map_order(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list(
        &self,
        filters: &OrderFilters,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Order>, i64), RepositoryError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        let status = filters.status.map(|s| s.as_str());
        if let Some(ref user_id) = filters.user_id {
            params.push(user_id);
            conditions.push(format!("usuario_id = ${}", params.len()));
        }
        if let Some(ref nit) = filters.nit {
            params.push(nit);
            conditions.push(format!("nit = ${}", params.len()));
        }
        if let Some(ref status) = status {
            params.push(status);
            conditions.push(format!("estado = ${}", params.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_query = format!("SELECT COUNT(*) FROM pedidos{where_clause}");
        let total: i64 = self.db.query_one(&count_query, &params).await?.get(0);

        let offset = (page - 1) * per_page;
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM pedidos{where_clause} \
             ORDER BY fecha_creacion DESC LIMIT {per_page} OFFSET {offset}"
        );
        let rows = self.db.query(&query, &params).await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(map_order(row)?);
        }
        Ok((orders, total))
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        notes: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let query = r#"
            UPDATE pedidos
            SET estado = $2, observaciones = $3, fecha_actualizacion = now()
            WHERE pedido_id = $1 AND estado = $4
        "#;
        let updated = self
            .db
            .execute(query, &[&order_id, &to.as_str(), &notes, &from.as_str()])
            .await?;
        if updated == 0 {
            // Zero rows means either the order is gone or another writer
            // already moved it off `from`.
            let exists = self
                .db
                .query_opt("SELECT 1 FROM pedidos WHERE pedido_id = $1", &[&order_id])
                .await?;
            return Err(match exists {
                Some(_) => RepositoryError::Conflict(format!(
                    "El pedido cambió de estado de forma concurrente: se esperaba {}",
                    from.as_str()
                )),
                None => RepositoryError::NotFound,
            });
        }
        Ok(())
    }
}

/// # OrderLinesRepository
///
/// Repository interface for order lines. Lines are owned exclusively by
/// their order: inserted in the order-creation transaction, deleted by
/// cascade, and their snapshots never change afterwards.
#[async_trait]
pub trait OrderLinesRepository: Send + Sync {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        lines: &[OrderLine],
    ) -> Result<(), RepositoryError>;

    async fn get_by_order_id(&self, order_id: Uuid) -> Result<Vec<OrderLine>, RepositoryError>;

    /// Fetch the lines of several orders at once, for list responses.
    async fn get_by_order_ids(
        &self,
        order_ids: &[Uuid],
    ) -> Result<Vec<OrderLine>, RepositoryError>;
}

/// PostgreSQL implementation of the OrderLinesRepository trait.
pub struct PgOrderLinesRepository {
    /// PostgreSQL client for database operations
    db: Client,
}

impl PgOrderLinesRepository {
    pub fn new(db: Client) -> Self {
        Self { db }
    }
}

fn map_line(row: &Row) -> OrderLine {
    OrderLine {
        id: row.get("detalle_id"),
        order_id: row.get("pedido_id"),
        product_id: row.get("producto_id"),
        product_name: row.get("nombre_producto"),
        requested_qty: row.get("cantidad_solicitada"),
        available_qty_at_creation: row.get("cantidad_disponible_al_momento"),
        unit_price: row.get("precio_unitario"),
        subtotal: row.get("subtotal"),
        added_at: row.get("fecha_agregado"),
    }
}

const LINE_COLUMNS: &str = "detalle_id, pedido_id, producto_id, nombre_producto, \
                            cantidad_solicitada, cantidad_disponible_al_momento, \
                            precio_unitario, subtotal, fecha_agregado";

#[async_trait]
impl OrderLinesRepository for PgOrderLinesRepository {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        lines: &[OrderLine],
    ) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO detalles_pedido (
                detalle_id, pedido_id, producto_id, nombre_producto,
                cantidad_solicitada, cantidad_disponible_al_momento,
                precio_unitario, subtotal, fecha_agregado
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        "#;
        for line in lines {
            tx.execute(
                query,
                &[
                    &line.id,
                    &line.order_id,
                    &line.product_id,
                    &line.product_name,
                    &line.requested_qty,
                    &line.available_qty_at_creation,
                    &line.unit_price,
                    &line.subtotal,
                    &line.added_at,
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn get_by_order_id(&self, order_id: Uuid) -> Result<Vec<OrderLine>, RepositoryError> {
        let query = format!(
            "SELECT {LINE_COLUMNS} FROM detalles_pedido WHERE pedido_id = $1 ORDER BY fecha_agregado"
        );
        let rows = self.db.query(&query, &[&order_id]).await?;
        Ok(rows.iter().map(map_line).collect())
    }

    async fn get_by_order_ids(
        &self,
        order_ids: &[Uuid],
    ) -> Result<Vec<OrderLine>, RepositoryError> {
        let query = format!(
            "SELECT {LINE_COLUMNS} FROM detalles_pedido WHERE pedido_id = ANY($1) ORDER BY fecha_agregado"
        );
        let rows = self.db.query(&query, &[&order_ids]).await?;
        Ok(rows.iter().map(map_line).collect())
    }
}
