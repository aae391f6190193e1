use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an order.
///
/// The happy path is `Pending → Confirmed → InProcess → Shipped → Delivered`.
/// `Cancelled` is reachable from `Pending` and `Confirmed`, `Rejected` only
/// from `Pending`. `Delivered`, `Cancelled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "confirmado")]
    Confirmed,
    #[serde(rename = "en_proceso")]
    InProcess,
    #[serde(rename = "enviado")]
    Shipped,
    #[serde(rename = "entregado")]
    Delivered,
    #[serde(rename = "cancelado")]
    Cancelled,
    #[serde(rename = "rechazado")]
    Rejected,
}

impl OrderStatus {
    /// Wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pendiente",
            OrderStatus::Confirmed => "confirmado",
            OrderStatus::InProcess => "en_proceso",
            OrderStatus::Shipped => "enviado",
            OrderStatus::Delivered => "entregado",
            OrderStatus::Cancelled => "cancelado",
            OrderStatus::Rejected => "rechazado",
        }
    }

    /// Parses a wire/database value, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "pendiente" => Some(OrderStatus::Pending),
            "confirmado" => Some(OrderStatus::Confirmed),
            "en_proceso" => Some(OrderStatus::InProcess),
            "enviado" => Some(OrderStatus::Shipped),
            "entregado" => Some(OrderStatus::Delivered),
            "cancelado" => Some(OrderStatus::Cancelled),
            "rechazado" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }

    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Whether the state machine defines a transition `self → next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Rejected)
                | (Confirmed, InProcess)
                | (Confirmed, Cancelled)
                | (InProcess, Shipped)
                | (Shipped, Delivered)
        )
    }

    /// All wire values, for error messages.
    pub fn all_values() -> [&'static str; 7] {
        [
            "pendiente",
            "confirmado",
            "en_proceso",
            "enviado",
            "entregado",
            "cancelado",
            "rechazado",
        ]
    }
}

/// Role of the requester, propagated by the upstream gateway in trusted headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    /// Institutional client placing orders.
    #[serde(rename = "usuario_institucional")]
    InstitutionalClient,
    /// Account manager (seller side), allowed to update order status.
    #[serde(rename = "admin")]
    AccountManager,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::InstitutionalClient => "usuario_institucional",
            UserRole::AccountManager => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "usuario_institucional" => Some(UserRole::InstitutionalClient),
            "admin" => Some(UserRole::AccountManager),
            _ => None,
        }
    }
}

/// One product-and-quantity entry within an order. Name, price and
/// availability are snapshots frozen at order-creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLine {
    #[serde(rename = "detalle_id")]
    pub id: Uuid,
    #[serde(rename = "pedido_id")]
    pub order_id: Uuid,
    #[serde(rename = "producto_id")]
    pub product_id: String,
    #[serde(rename = "nombre_producto")]
    pub product_name: String,
    #[serde(rename = "cantidad_solicitada")]
    pub requested_qty: i32,
    #[serde(rename = "cantidad_disponible_al_momento")]
    pub available_qty_at_creation: i32,
    #[serde(rename = "precio_unitario")]
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    #[serde(rename = "fecha_agregado")]
    pub added_at: DateTime<Utc>,
}

/// Order aggregate root. Created only through the order-creation workflow
/// after full line validation; mutated only via status transitions; never
/// hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    #[serde(rename = "pedido_id")]
    pub id: Uuid,
    #[serde(rename = "numero_pedido")]
    pub order_number: String,
    #[serde(rename = "usuario_id")]
    pub user_id: i32,
    pub nit: String,
    #[serde(rename = "rol_usuario")]
    pub role: UserRole,
    #[serde(rename = "estado")]
    pub status: OrderStatus,
    #[serde(rename = "monto_total")]
    pub total_amount: Decimal,
    #[serde(rename = "fecha_creacion")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "fecha_actualizacion")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "observaciones")]
    pub notes: Option<String>,
    #[serde(rename = "detalles")]
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Sum of line subtotals. The persisted `total_amount` must always equal this.
    pub fn compute_total(lines: &[OrderLine]) -> Decimal {
        lines.iter().map(|l| l.subtotal).sum()
    }
}

/// Formats a sequential order number: `PED-` plus the value zero-padded to six digits.
pub fn format_order_number(seq: i64) -> String {
    format!("PED-{seq:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_values_round_trip() {
        for value in OrderStatus::all_values() {
            let status = OrderStatus::parse(value).unwrap();
            assert_eq!(status.as_str(), value);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{value}\""));
        }
        assert!(OrderStatus::parse("desconocido").is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(InProcess));
        assert!(InProcess.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
    }

    #[test]
    fn test_side_branches() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Rejected));
        assert!(!InProcess.can_transition_to(Cancelled));
    }

    #[test]
    fn test_no_transition_out_of_terminal_states() {
        use OrderStatus::*;
        for terminal in [Delivered, Cancelled, Rejected] {
            assert!(terminal.is_terminal());
            for next in [
                Pending, Confirmed, InProcess, Shipped, Delivered, Cancelled, Rejected,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        // Regressing an active order is equally undefined.
        assert!(!Shipped.can_transition_to(Pending));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(
            UserRole::parse("usuario_institucional"),
            Some(UserRole::InstitutionalClient)
        );
        assert_eq!(UserRole::parse("admin"), Some(UserRole::AccountManager));
        assert_eq!(UserRole::parse("superuser"), None);
    }

    #[test]
    fn test_order_number_format() {
        assert_eq!(format_order_number(1), "PED-000001");
        assert_eq!(format_order_number(42), "PED-000042");
        assert_eq!(format_order_number(1_234_567), "PED-1234567");
    }

    #[test]
    fn test_compute_total_is_sum_of_subtotals() {
        use rust_decimal::Decimal;
        let line = |subtotal: &str| OrderLine {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: "p1".into(),
            product_name: "Guantes".into(),
            requested_qty: 2,
            available_qty_at_creation: 10,
            unit_price: Decimal::new(150, 2),
            subtotal: subtotal.parse().unwrap(),
            added_at: Utc::now(),
        };
        let lines = vec![line("3.00"), line("10.50")];
        assert_eq!(Order::compute_total(&lines), "13.50".parse().unwrap());
        assert_eq!(Order::compute_total(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_order_serializes_with_wire_field_names() {
        let order = Order {
            id: Uuid::nil(),
            order_number: "PED-000001".into(),
            user_id: 7,
            nit: "123456789".into(),
            role: UserRole::InstitutionalClient,
            status: OrderStatus::Pending,
            total_amount: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            notes: None,
            lines: vec![],
        };
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["numero_pedido"], "PED-000001");
        assert_eq!(value["estado"], "pendiente");
        assert_eq!(value["rol_usuario"], "usuario_institucional");
        assert!(value.get("detalles").is_some());
    }
}
