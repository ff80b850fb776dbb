//! Payment recording.
//!
//! A payment is the intent to move its order from `pending` to `paid`. Both
//! records are written locally with `synchronized = false`; the sync engine
//! pushes the payment only once its order has been confirmed remotely.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lifecycle::{self, OrderAction};
use crate::models::{Order, Payment, PaymentMethod};
use crate::orders::OrderError;
use crate::store::LocalStore;

// ---------------------------------------------------------------------------
// Record payment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub order_id: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub note: Option<String>,
}

/// Record a payment for a pending order.
///
/// The order must exist locally and accept `Pay`; otherwise nothing is
/// written. The payment row is inserted first, then the order is moved to
/// `paid` with the chosen method. The order's own sync flag is left alone:
/// the payment push is what settles it remotely.
pub async fn record_payment(store: &LocalStore, payload: NewPayment) -> Result<Payment, OrderError> {
    let action = OrderAction::Pay {
        method: payload.method,
    };

    let order: Order = store
        .get(&payload.order_id)
        .await?
        .ok_or_else(|| OrderError::NotFound(payload.order_id.clone()))?;
    if let Err(e) = lifecycle::transition(order.status, action) {
        warn!(order_id = %order.id, error = %e, "Payment rejected");
        return Err(e.into());
    }

    let payment = Payment {
        id: Uuid::new_v4().to_string(),
        order_id: payload.order_id.clone(),
        method: payload.method,
        note: payload.note.filter(|n| !n.trim().is_empty()),
        created_at: Utc::now(),
        synchronized: false,
    };
    store.insert(payment.clone()).await?;

    // Re-checked inside the write transaction; a concurrent cancel wins and
    // the orphaned payment is removed again.
    let paid = store
        .modify::<Order, _, OrderError, _>(&payload.order_id, move |order| {
            lifecycle::apply(order, action)?;
            order.updated_at = Utc::now();
            Ok(())
        })
        .await;

    match paid {
        Ok(Some(())) => {
            info!(
                payment_id = %payment.id,
                order_id = %payment.order_id,
                method = %payment.method,
                "Payment recorded locally"
            );
            Ok(payment)
        }
        Ok(None) => {
            store.remove::<Payment>(&payment.id).await?;
            Err(OrderError::NotFound(payload.order_id))
        }
        Err(e) => {
            store.remove::<Payment>(&payment.id).await?;
            warn!(order_id = %payload.order_id, error = %e, "Payment rolled back");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Payments not yet confirmed by the backend, oldest first.
pub async fn unsynchronized_payments(store: &LocalStore) -> Result<Vec<Payment>, StoreError> {
    store.get_by_index("synchronized", false).await
}

pub async fn payments_for_order(
    store: &LocalStore,
    order_id: &str,
) -> Result<Vec<Payment>, StoreError> {
    store.get_by_index("order_id", order_id).await
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TransitionError;
    use crate::models::{LineItem, OrderStatus};
    use crate::orders::{self, NewOrder};

    async fn pending_order(store: &LocalStore, total: f64) -> Order {
        orders::create_order(
            store,
            NewOrder {
                client_name: "Mesa 4".into(),
                event_id: "ev-1".into(),
                items: vec![LineItem {
                    product_id: "vermut".into(),
                    quantity: 1,
                    unit_price: total,
                }],
                total,
                note: None,
            },
        )
        .await
        .unwrap()
    }

    fn pay(order_id: &str, method: PaymentMethod) -> NewPayment {
        NewPayment {
            order_id: order_id.to_string(),
            method,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_record_payment_marks_order_paid() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let order = pending_order(&store, 12.0).await;

        let payment = record_payment(&store, pay(&order.id, PaymentMethod::Transfer))
            .await
            .unwrap();
        assert!(!payment.synchronized);
        assert_eq!(payment.order_id, order.id);

        let stored: Order = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.payment_method, Some(PaymentMethod::Transfer));
        assert!(!stored.synchronized);

        assert_eq!(unsynchronized_payments(&store).await.unwrap().len(), 1);
        let for_order = payments_for_order(&store, &order.id).await.unwrap();
        assert_eq!(for_order, vec![payment]);
    }

    #[tokio::test]
    async fn test_paying_cancelled_order_is_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let order = pending_order(&store, 8.0).await;
        orders::cancel_order(&store, &order.id).await.unwrap();

        let err = record_payment(&store, pay(&order.id, PaymentMethod::Cash))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::Transition(TransitionError::InvalidTransition {
                from: OrderStatus::Cancelled,
                ..
            })
        ));

        let stored: Order = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert!(stored.payment_method.is_none());
        assert!(payments_for_order(&store, &order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_payment_is_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let order = pending_order(&store, 5.0).await;
        record_payment(&store, pay(&order.id, PaymentMethod::Cash))
            .await
            .unwrap();

        let err = record_payment(&store, pay(&order.id, PaymentMethod::Complimentary))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Transition(_)));
        assert_eq!(payments_for_order(&store, &order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payment_for_missing_order() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let err = record_payment(&store, pay("ghost", PaymentMethod::Cash))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::NotFound(ref id) if id == "ghost"));
        assert!(unsynchronized_payments(&store).await.unwrap().is_empty());
    }
}
