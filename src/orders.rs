//! Order creation and local status changes.
//!
//! Orders are written to the local store with `synchronized = false` and
//! picked up by the sync engine. Every status change goes through
//! [`crate::lifecycle`] and re-queues the order so the new status is pushed.

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lifecycle::{self, OrderAction, TransitionError};
use crate::models::{items_total, LineItem, Order, OrderStatus, MONEY_EPSILON};
use crate::settings::{self, ORDER_COUNTER_KEY};
use crate::store::LocalStore;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Client name is required")]
    MissingClientName,

    #[error("Order has no line items")]
    EmptyOrder,

    #[error("Line item {product_id}: quantity must be at least 1")]
    InvalidQuantity { product_id: String },

    #[error("Line item {product_id}: unit price {unit_price} is not a valid amount")]
    InvalidPrice { product_id: String, unit_price: f64 },

    #[error("Order total {declared:.2} does not match line items ({computed:.2})")]
    TotalMismatch { declared: f64, computed: f64 },

    #[error("Order not found: {0}")]
    NotFound(String),
}

/// Order as submitted by the UI.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub client_name: String,
    pub event_id: String,
    pub items: Vec<LineItem>,
    pub total: f64,
    #[serde(default)]
    pub note: Option<String>,
}

/// Reject malformed orders. The declared total is never corrected.
pub fn validate_new_order(order: &NewOrder) -> Result<(), OrderError> {
    if order.client_name.trim().is_empty() {
        return Err(OrderError::MissingClientName);
    }
    if order.items.is_empty() {
        return Err(OrderError::EmptyOrder);
    }
    for item in &order.items {
        if item.quantity < 1 {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id.clone(),
            });
        }
        if !item.unit_price.is_finite() || item.unit_price < 0.0 {
            return Err(OrderError::InvalidPrice {
                product_id: item.product_id.clone(),
                unit_price: item.unit_price,
            });
        }
    }

    let computed = items_total(&order.items);
    if !order.total.is_finite() || (order.total - computed).abs() > MONEY_EPSILON {
        return Err(OrderError::TotalMismatch {
            declared: order.total,
            computed,
        });
    }
    Ok(())
}

/// Generate a sequential order number in format ORD-DDMMYYYY-NNNNN.
///
/// The counter is persisted in the config collection under
/// `orders.counter` and bumped in a single transaction.
async fn next_order_number(store: &LocalStore) -> Result<String, StoreError> {
    let next = settings::increment_counter(store, ORDER_COUNTER_KEY).await?;

    let date_display = chrono::Local::now().format("%d%m%Y");
    Ok(format!("ORD-{date_display}-{next:05}"))
}

/// Create an order locally. It is queued for sync until the backend
/// acknowledges it.
pub async fn create_order(store: &LocalStore, new_order: NewOrder) -> Result<Order, OrderError> {
    if let Err(e) = validate_new_order(&new_order) {
        warn!(client = %new_order.client_name, error = %e, "Order creation rejected");
        return Err(e);
    }

    let order_number = next_order_number(store).await?;
    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4().to_string(),
        remote_id: None,
        order_number,
        client_name: new_order.client_name.trim().to_string(),
        event_id: new_order.event_id,
        items: new_order.items,
        total: new_order.total,
        status: OrderStatus::Pending,
        payment_method: None,
        note: new_order.note.filter(|n| !n.trim().is_empty()),
        created_at: now,
        updated_at: now,
        synchronized: false,
    };

    store.insert(order.clone()).await?;
    info!(
        order_id = %order.id,
        order_number = %order.order_number,
        total = order.total,
        "Order created locally"
    );
    Ok(order)
}

pub async fn get_order(store: &LocalStore, order_id: &str) -> Result<Option<Order>, StoreError> {
    store.get(order_id).await
}

/// Cancel a pending order, or void a paid one. The order is re-queued so the
/// cancellation reaches the backend.
pub async fn cancel_order(store: &LocalStore, order_id: &str) -> Result<Order, OrderError> {
    let updated = store
        .modify::<Order, _, OrderError, _>(order_id, |order| {
            let previous = order.status;
            lifecycle::apply(order, OrderAction::Cancel)?;
            order.updated_at = Utc::now();
            order.synchronized = false;
            info!(
                order_id = %order.id,
                from = %previous,
                "Order cancelled locally"
            );
            Ok(order.clone())
        })
        .await?;

    updated.ok_or_else(|| OrderError::NotFound(order_id.to_string()))
}

/// Orders not yet confirmed by the backend, oldest first (badge counts).
pub async fn unsynchronized_orders(store: &LocalStore) -> Result<Vec<Order>, StoreError> {
    store.get_by_index("synchronized", false).await
}

/// Look up a local order by the id the backend assigned to it.
pub async fn find_by_remote_id(
    store: &LocalStore,
    remote_id: i64,
) -> Result<Option<Order>, StoreError> {
    let orders: Vec<Order> = store.get_all().await?;
    Ok(orders.into_iter().find(|o| o.remote_id == Some(remote_id)))
}

/// Sum of settled sales. Cancelled orders, including voided paid ones, are
/// excluded.
pub fn settled_sales_total(orders: &[Order]) -> f64 {
    orders
        .iter()
        .filter(|o| o.status.counts_as_settled_sale())
        .map(|o| o.total)
        .sum()
}

// ===========================================================================
// Tests
// ===========================================================================
