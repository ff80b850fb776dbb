//! Backend API client.
//!
//! [`RemoteGateway`] is the boundary the sync engine pushes through;
//! [`HttpGateway`] implements it over authenticated JSON requests. Every push
//! carries the record's local id as its idempotency token, both in the body
//! and in the `Idempotency-Key` header, so a retried push never creates a
//! duplicate remotely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::connectivity::ReachabilityProbe;
use crate::error::RemoteError;
use crate::models::{
    CashSession, CashSessionStatus, LineItem, Order, OrderStatus, Payment, PaymentMethod,
};

/// Default timeout for API requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight health probe.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

const ORDERS_SYNC_PATH: &str = "/api/orders/sync";
const PAYMENTS_PATH: &str = "/api/payments";
const CASH_SESSIONS_SYNC_PATH: &str = "/api/cash-sessions/sync";
const HEALTH_PATH: &str = "/api/health";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPayload {
    /// Local id; idempotency token.
    pub id: String,
    pub order_number: String,
    pub client_name: String,
    pub event_id: String,
    pub items: Vec<LineItem>,
    pub total: f64,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderPayload {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.clone(),
            order_number: order.order_number.clone(),
            client_name: order.client_name.clone(),
            event_id: order.event_id.clone(),
            items: order.items.clone(),
            total: order.total,
            status: order.status,
            payment_method: order.payment_method,
            note: order.note.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Payment push. Only built once the order has a remote id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentPush {
    /// Local id; idempotency token.
    pub id: String,
    pub order_id: i64,
    pub order_local_id: String,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentPush {
    pub fn new(payment: &Payment, order_remote_id: i64) -> Self {
        Self {
            id: payment.id.clone(),
            order_id: order_remote_id,
            order_local_id: payment.order_id.clone(),
            method: payment.method,
            note: payment.note.clone(),
            created_at: payment.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CashSessionPayload {
    /// Local id; idempotency token.
    pub id: String,
    pub opening_amount: f64,
    pub opened_at: DateTime<Utc>,
    pub closing_amount: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: CashSessionStatus,
}

impl From<&CashSession> for CashSessionPayload {
    fn from(session: &CashSession) -> Self {
        Self {
            id: session.id.clone(),
            opening_amount: session.opening_amount,
            opened_at: session.opened_at,
            closing_amount: session.closing_amount,
            closed_at: session.closed_at,
            status: session.status,
        }
    }
}

/// Backend acknowledgement of an order upsert.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteOrderAck {
    #[serde(alias = "id")]
    pub remote_id: i64,
    /// Status as stored remotely, when the backend reports it.
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize)]
struct RemoteIdAck {
    #[serde(alias = "id")]
    remote_id: i64,
}

// ---------------------------------------------------------------------------
// Gateway boundary
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Create or update the order identified by `local_id`.
    async fn upsert_order(
        &self,
        local_id: &str,
        payload: &OrderPayload,
    ) -> Result<RemoteOrderAck, RemoteError>;

    async fn record_payment(&self, payment: &PaymentPush) -> Result<(), RemoteError>;

    /// Create or update the cash session identified by `local_id`; returns
    /// its remote id.
    async fn upsert_cash_session(
        &self,
        local_id: &str,
        payload: &CashSessionPayload,
    ) -> Result<i64, RemoteError>;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    // In case "/api/" was present
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a transient remote error with a readable
/// message.
fn network_error(url: &str, err: &reqwest::Error) -> RemoteError {
    let message = if err.is_connect() {
        format!("Cannot reach backend at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid backend URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    RemoteError::Transient(message)
}

/// Convert an HTTP status code into a readable message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Backend endpoint not found".to_string(),
        409 => "Record conflicts with backend state".to_string(),
        422 => "Record failed backend validation".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected response from backend (HTTP {s})"),
    }
}

/// Pull the most useful message out of an error response body.
fn error_detail(status: StatusCode, body_text: &str) -> String {
    let body_text = body_text.trim();
    let Ok(json) = serde_json::from_str::<Value>(body_text) else {
        return if body_text.is_empty() {
            status_error(status)
        } else {
            format!("{}: {body_text}", status_error(status))
        };
    };

    let message = json
        .get("error")
        .or_else(|| json.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status_error(status));
    match json.get("details").or_else(|| json.get("errors")) {
        Some(details) => format!("{message}: {details}"),
        None => message,
    }
}

fn decode<T: DeserializeOwned>(path: &str, body_text: &str) -> Result<T, RemoteError> {
    serde_json::from_str(body_text).map_err(|e| {
        // A 2xx we cannot read means the backend may or may not have stored
        // the record; retrying with the same idempotency key is safe.
        RemoteError::Transient(format!("Invalid JSON from backend ({path}): {e}"))
    })
}

// ---------------------------------------------------------------------------
// HTTP gateway
// ---------------------------------------------------------------------------

pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
    terminal_id: String,
}

impl HttpGateway {
    pub fn new(
        base_url: &str,
        api_key: &str,
        terminal_id: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            api_key: api_key.trim().to_string(),
            terminal_id: terminal_id.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `path` and return the response text of a 2xx reply.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        idempotency_key: &str,
        body: &B,
    ) -> Result<String, RemoteError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("X-POS-API-Key", &self.api_key)
            .header("x-terminal-id", &self.terminal_id)
            .header("Idempotency-Key", idempotency_key)
            .json(body)
            .send()
            .await
            .map_err(|e| network_error(&self.base_url, &e))?;

        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        if status.is_success() {
            debug!(path, idempotency_key, status = status.as_u16(), "Backend accepted push");
            return Ok(body_text);
        }

        let err = RemoteError::from_status(status.as_u16(), error_detail(status, &body_text));
        warn!(path, idempotency_key, error = %err, "Backend push failed");
        Err(err)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn upsert_order(
        &self,
        local_id: &str,
        payload: &OrderPayload,
    ) -> Result<RemoteOrderAck, RemoteError> {
        let body = self.post_json(ORDERS_SYNC_PATH, local_id, payload).await?;
        decode(ORDERS_SYNC_PATH, &body)
    }

    async fn record_payment(&self, payment: &PaymentPush) -> Result<(), RemoteError> {
        self.post_json(PAYMENTS_PATH, &payment.id, payment).await?;
        Ok(())
    }

    async fn upsert_cash_session(
        &self,
        local_id: &str,
        payload: &CashSessionPayload,
    ) -> Result<i64, RemoteError> {
        let body = self
            .post_json(CASH_SESSIONS_SYNC_PATH, local_id, payload)
            .await?;
        let ack: RemoteIdAck = decode(CASH_SESSIONS_SYNC_PATH, &body)?;
        Ok(ack.remote_id)
    }
}

#[async_trait]
impl ReachabilityProbe for HttpGateway {
    async fn probe(&self) -> bool {
        let url = format!("{}{HEALTH_PATH}", self.base_url);
        let start = Instant::now();
        match self
            .client
            .get(&url)
            .timeout(CONNECTIVITY_TIMEOUT)
            .header("X-POS-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                debug!(latency_ms = start.elapsed().as_millis() as u64, "Health probe passed");
                true
            }
            Ok(resp) => {
                info!(status = resp.status().as_u16(), "Health probe rejected");
                false
            }
            Err(e) => {
                debug!(error = %network_error(&self.base_url, &e), "Health probe failed");
                false
            }
        }
    }
}
