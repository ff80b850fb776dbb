//! Record shapes persisted by the local store and pushed to the backend.
//!
//! Every syncable record carries `synchronized`; `false` means the record is
//! part of the sync queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::store::{Collection, IndexValue, Record};

/// Tolerance used when comparing money amounts (half a cent).
pub const MONEY_EPSILON: f64 = 0.005;

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Only paid orders count towards settled sales; a voided (cancelled)
    /// paid order drops out.
    pub fn counts_as_settled_sale(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Complimentary,
    NeedsReview,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Complimentary => "complimentary",
            PaymentMethod::NeedsReview => "needs-review",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl LineItem {
    pub fn line_total(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Locally generated id. Doubles as the idempotency token for every push
    /// and stays the reconciliation key after the backend assigns `remote_id`.
    pub id: String,
    #[serde(default)]
    pub remote_id: Option<i64>,
    pub order_number: String,
    pub client_name: String,
    pub event_id: String,
    pub items: Vec<LineItem>,
    pub total: f64,
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synchronized: bool,
}

impl Order {
    pub fn computed_total(&self) -> f64 {
        items_total(&self.items)
    }
}

pub fn items_total(items: &[LineItem]) -> f64 {
    items.iter().map(LineItem::line_total).sum()
}

impl Record for Order {
    const COLLECTION: Collection = Collection::Orders;

    fn key(&self) -> &str {
        &self.id
    }

    fn set_key(&mut self, key: String) {
        self.id = key;
    }

    fn index_values(&self) -> Vec<IndexValue> {
        vec![IndexValue::from(self.synchronized)]
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    /// Local id of the paid order.
    pub order_id: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub synchronized: bool,
}

impl Record for Payment {
    const COLLECTION: Collection = Collection::Payments;

    fn key(&self) -> &str {
        &self.id
    }

    fn set_key(&mut self, key: String) {
        self.id = key;
    }

    fn index_values(&self) -> Vec<IndexValue> {
        vec![
            IndexValue::from(self.synchronized),
            IndexValue::from(self.order_id.as_str()),
        ]
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

// ---------------------------------------------------------------------------
// Cash session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CashSessionStatus {
    Open,
    Closed,
}

impl CashSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashSessionStatus::Open => "open",
            CashSessionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for CashSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashSession {
    pub id: String,
    #[serde(default)]
    pub remote_id: Option<i64>,
    pub opening_amount: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closing_amount: Option<f64>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    pub status: CashSessionStatus,
    pub synchronized: bool,
}

impl Record for CashSession {
    const COLLECTION: Collection = Collection::CashSessions;

    fn key(&self) -> &str {
        &self.id
    }

    fn set_key(&mut self, key: String) {
        self.id = key;
    }

    fn index_values(&self) -> Vec<IndexValue> {
        vec![
            IndexValue::from(self.status.as_str()),
            IndexValue::from(self.synchronized),
        ]
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.opened_at)
    }
}

// ---------------------------------------------------------------------------
// Config entry
// ---------------------------------------------------------------------------

/// Small persisted setting. Never synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

impl Record for ConfigEntry {
    const COLLECTION: Collection = Collection::Config;

    fn key(&self) -> &str {
        &self.key
    }

    fn set_key(&mut self, key: String) {
        self.key = key;
    }

    fn index_values(&self) -> Vec<IndexValue> {
        Vec::new()
    }
}
