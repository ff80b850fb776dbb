//! Order status state machine.
//!
//! ```text
//!  pending ──Pay{method}──▶ paid
//!     │                      │
//!     └──Cancel──▶ cancelled ◀──Cancel (void / refund)
//! ```
//!
//! `cancelled` is terminal. The same table is used when the terminal acts
//! locally and when a remote acknowledgement reports a status.

use std::fmt;
use thiserror::Error;

use crate::models::{Order, OrderStatus, PaymentMethod};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    /// Settle the order; carried by a Payment record.
    Pay { method: PaymentMethod },
    Cancel,
}

impl OrderAction {
    pub fn name(&self) -> &'static str {
        match self {
            OrderAction::Pay { .. } => "pay",
            OrderAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot {action} an order that is {from}")]
    InvalidTransition {
        from: OrderStatus,
        action: OrderAction,
    },
}

/// Next status for `action`, or `InvalidTransition`.
pub fn transition(current: OrderStatus, action: OrderAction) -> Result<OrderStatus, TransitionError> {
    match (current, action) {
        (OrderStatus::Pending, OrderAction::Pay { .. }) => Ok(OrderStatus::Paid),
        (OrderStatus::Pending, OrderAction::Cancel) => Ok(OrderStatus::Cancelled),
        (OrderStatus::Paid, OrderAction::Cancel) => Ok(OrderStatus::Cancelled),
        (OrderStatus::Paid, OrderAction::Pay { .. })
        | (OrderStatus::Cancelled, OrderAction::Pay { .. })
        | (OrderStatus::Cancelled, OrderAction::Cancel) => Err(TransitionError::InvalidTransition {
            from: current,
            action,
        }),
    }
}

/// Apply `action` to `order` in place. On error the order is untouched.
pub fn apply(order: &mut Order, action: OrderAction) -> Result<OrderStatus, TransitionError> {
    let next = transition(order.status, action)?;
    order.status = next;
    if let OrderAction::Pay { method } = action {
        order.payment_method = Some(method);
    }
    Ok(next)
}

/// Whether a status reported by the backend is consistent with the local one:
/// equal, or reachable from the local status by one allowed transition.
pub fn agrees(local: OrderStatus, remote: OrderStatus) -> bool {
    if local == remote {
        return true;
    }
    let candidates = [
        OrderAction::Pay {
            method: PaymentMethod::NeedsReview,
        },
        OrderAction::Cancel,
    ];
    candidates
        .into_iter()
        .any(|action| transition(local, action) == Ok(remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const ALL_STATUSES: [OrderStatus; 3] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Cancelled,
    ];

    fn all_actions() -> Vec<OrderAction> {
        vec![
            OrderAction::Pay {
                method: PaymentMethod::Cash,
            },
            OrderAction::Pay {
                method: PaymentMethod::Transfer,
            },
            OrderAction::Pay {
                method: PaymentMethod::Complimentary,
            },
            OrderAction::Pay {
                method: PaymentMethod::NeedsReview,
            },
            OrderAction::Cancel,
        ]
    }

    fn order(status: OrderStatus) -> Order {
        Order {
            id: "o-1".into(),
            remote_id: None,
            order_number: "ORD-01012026-00001".into(),
            client_name: "A".into(),
            event_id: "ev-1".into(),
            items: Vec::new(),
            total: 0.0,
            status,
            payment_method: None,
            note: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            synchronized: false,
        }
    }

    #[test]
    fn test_allowed_transitions() {
        let pay = OrderAction::Pay {
            method: PaymentMethod::Cash,
        };
        assert_eq!(transition(OrderStatus::Pending, pay), Ok(OrderStatus::Paid));
        assert_eq!(
            transition(OrderStatus::Pending, OrderAction::Cancel),
            Ok(OrderStatus::Cancelled)
        );
        assert_eq!(
            transition(OrderStatus::Paid, OrderAction::Cancel),
            Ok(OrderStatus::Cancelled)
        );
    }

    #[test]
    fn test_every_other_transition_is_rejected_without_mutation() {
        for status in ALL_STATUSES {
            for action in all_actions() {
                let allowed = matches!(
                    (status, action),
                    (OrderStatus::Pending, _) | (OrderStatus::Paid, OrderAction::Cancel)
                );
                let mut o = order(status);
                let before = o.clone();
                let result = apply(&mut o, action);
                if allowed {
                    assert!(result.is_ok(), "{status} --{action}--> should be allowed");
                } else {
                    assert_eq!(
                        result,
                        Err(TransitionError::InvalidTransition {
                            from: status,
                            action
                        })
                    );
                    assert_eq!(o, before, "rejected transition must not mutate");
                }
            }
        }
    }

    #[test]
    fn test_pay_records_method() {
        let mut o = order(OrderStatus::Pending);
        apply(
            &mut o,
            OrderAction::Pay {
                method: PaymentMethod::Transfer,
            },
        )
        .unwrap();
        assert_eq!(o.status, OrderStatus::Paid);
        assert_eq!(o.payment_method, Some(PaymentMethod::Transfer));
    }

    #[test]
    fn test_remote_agreement() {
        assert!(agrees(OrderStatus::Pending, OrderStatus::Pending));
        assert!(agrees(OrderStatus::Pending, OrderStatus::Paid));
        assert!(agrees(OrderStatus::Paid, OrderStatus::Cancelled));
        assert!(!agrees(OrderStatus::Cancelled, OrderStatus::Paid));
        assert!(!agrees(OrderStatus::Paid, OrderStatus::Pending));
    }
}
