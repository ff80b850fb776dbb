//! Background sync engine.
//!
//! Drains the sync queue (every record with `synchronized = false`) against
//! the [`RemoteGateway`] while the terminal is online. Orders go first,
//! payments only once their order is confirmed remotely, then cash sessions.
//! An order voided after payment is sent as paid first, its payments follow,
//! and the cancellation goes out last.
//! Each record is pushed and confirmed on its own, so a failure in one never
//! blocks the rest of the queue; failed records simply stay queued.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{CashSessionPayload, OrderPayload, PaymentPush, RemoteGateway};
use crate::cash_sessions;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::{RemoteError, StoreError};
use crate::lifecycle;
use crate::models::{CashSession, CashSessionStatus, Order, OrderStatus, Payment};
use crate::orders;
use crate::payments;
use crate::settings::{self, LAST_SYNC_SUCCESS_KEY};
use crate::store::{Collection, LocalStore, Record, Rejection};

/// Confirmed records older than this are pruned locally.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The cycle did not run. Skipped cycles are dropped, not queued.
    Skipped(SkipReason),
    Completed(SyncReport),
}

/// What happened to one record during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Synced,
    /// Left queued for a later push: waiting on a dependency, or changed
    /// locally while its push was in flight.
    Deferred,
    /// Voided order sent as paid so its payments can follow; counted when
    /// the cancellation goes out.
    Staged,
    /// Parked by an earlier permanent rejection and unchanged since.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionTally {
    pub succeeded: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
}

impl CollectionTally {
    fn record(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Synced => self.succeeded += 1,
            PushOutcome::Deferred => self.deferred += 1,
            PushOutcome::Staged => {}
            PushOutcome::Skipped => self.skipped += 1,
            PushOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub orders: CollectionTally,
    pub payments: CollectionTally,
    pub cash_sessions: CollectionTally,
    /// Confirmed records removed by the retention sweep.
    pub swept: usize,
    /// Permanent rejections recorded during this cycle.
    pub rejections: Vec<Rejection>,
}

impl SyncReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            orders: CollectionTally::default(),
            payments: CollectionTally::default(),
            cash_sessions: CollectionTally::default(),
            swept: 0,
            rejections: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.orders.succeeded + self.payments.succeeded + self.cash_sessions.succeeded
    }

    pub fn failed(&self) -> usize {
        self.orders.failed + self.payments.failed + self.cash_sessions.failed
    }
}

/// Snapshot for the UI sync indicator.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub pending_orders: usize,
    pub pending_payments: usize,
    pub pending_cash_sessions: usize,
    pub rejections: Vec<Rejection>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectionState {
    None,
    /// Rejected before and unchanged since.
    Unchanged,
    /// Rejected before, modified since; worth another push.
    Changed,
}

/// Releases the is-syncing flag when the cycle ends, however it ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: Arc<ConnectivityMonitor>,
    retention: ChronoDuration,
    is_syncing: AtomicBool,
    last_report: Mutex<Option<SyncReport>>,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: Arc<ConnectivityMonitor>,
        retention: ChronoDuration,
    ) -> Self {
        Self {
            store,
            gateway,
            connectivity,
            retention,
            is_syncing: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> Option<SyncGuard<'_>> {
        self.is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(&self.is_syncing))
    }

    /// Run one drain of the sync queue. Never returns an error: per-record
    /// failures are logged, counted and left queued for the next cycle.
    pub async fn run_sync_cycle(&self) -> SyncOutcome {
        if !self.connectivity.is_online() {
            debug!("Network offline; deferring remote sync and keeping queue pending");
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        let Some(_guard) = self.try_begin() else {
            debug!("Sync cycle already in flight; skipping");
            return SyncOutcome::Skipped(SkipReason::AlreadyRunning);
        };

        let started_at = Utc::now();
        let mut report = SyncReport::new(started_at);

        let staged = self.sync_orders(&mut report).await;
        self.sync_payments(&staged, &mut report).await;
        self.finish_staged_orders(&staged, &mut report).await;
        self.sync_cash_sessions(&mut report).await;

        if report.failed() == 0 {
            match self.sweep(started_at).await {
                Ok(swept) => report.swept = swept,
                Err(e) => warn!(error = %e, "Retention sweep failed"),
            }
            if let Err(e) = settings::set_config(&self.store, LAST_SYNC_SUCCESS_KEY, started_at).await
            {
                warn!(error = %e, "Failed to persist last sync time");
            }
        }

        report.finished_at = Utc::now();
        if report.failed() > 0 {
            warn!(
                succeeded = report.succeeded(),
                failed = report.failed(),
                rejected = report.rejections.len(),
                "Sync cycle finished with failures"
            );
        } else if report.succeeded() > 0 || report.swept > 0 {
            info!(
                orders = report.orders.succeeded,
                payments = report.payments.succeeded,
                cash_sessions = report.cash_sessions.succeeded,
                deferred = report.payments.deferred,
                swept = report.swept,
                "Sync cycle complete"
            );
        } else {
            debug!("Sync cycle complete; nothing to push");
        }

        if let Ok(mut guard) = self.last_report.lock() {
            *guard = Some(report.clone());
        }
        SyncOutcome::Completed(report)
    }

    /// Whether any collection still has queued records.
    pub async fn has_pending(&self) -> Result<bool, StoreError> {
        Ok(self.store.count_by_index::<Order>("synchronized", false).await? > 0
            || self.store.count_by_index::<Payment>("synchronized", false).await? > 0
            || self
                .store
                .count_by_index::<CashSession>("synchronized", false)
                .await?
                > 0)
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, StoreError> {
        let last_report = self.last_report.lock().ok().and_then(|g| g.clone());
        Ok(SyncStatus {
            online: self.connectivity.is_online(),
            syncing: self.is_syncing(),
            pending_orders: self.store.count_by_index::<Order>("synchronized", false).await?,
            pending_payments: self
                .store
                .count_by_index::<Payment>("synchronized", false)
                .await?,
            pending_cash_sessions: self
                .store
                .count_by_index::<CashSession>("synchronized", false)
                .await?,
            rejections: self.store.rejections().await?,
            last_success_at: settings::get_config_as(&self.store, LAST_SYNC_SUCCESS_KEY).await?,
            last_report,
        })
    }

    /// Operator action: forget a permanent rejection so the record is pushed
    /// again on the next cycle even though it has not changed.
    pub async fn requeue_rejected(
        &self,
        collection: Collection,
        record_id: &str,
    ) -> Result<bool, StoreError> {
        let cleared = self.store.clear_rejection(collection, record_id).await?;
        if cleared {
            info!(%collection, record_id, "Rejected record requeued by operator");
        }
        Ok(cleared)
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Push queued orders. Returns the voided orders staged as paid this
    /// cycle, in queue order.
    async fn sync_orders(&self, report: &mut SyncReport) -> Vec<String> {
        let mut staged = Vec::new();
        let pending = match orders::unsynchronized_orders(&self.store).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to read queued orders");
                report.orders.failed += 1;
                return staged;
            }
        };
        for order in &pending {
            let outcome = self.push_order(order, report).await.unwrap_or_else(|e| {
                warn!(order_id = %order.id, error = %e, "Local store error while syncing order");
                PushOutcome::Failed
            });
            if outcome == PushOutcome::Staged {
                staged.push(order.id.clone());
            }
            report.orders.record(outcome);
        }
        staged
    }

    async fn push_order(&self, order: &Order, report: &mut SyncReport) -> Result<PushOutcome, StoreError> {
        let rejection = self.rejection_state(order).await?;
        if rejection == RejectionState::Unchanged {
            return Ok(skip_parked(order));
        }

        // The backend only takes a payment for an order it holds as paid.
        if order.status == OrderStatus::Cancelled && self.has_live_payments(&order.id).await? {
            return self.stage_paid(order, report).await;
        }

        let remote_id = match self.send_order(order, &OrderPayload::from(order)).await {
            Ok(id) => id,
            Err(e) => return self.push_failed(order, e, report).await,
        };

        let pushed = order.clone();
        let confirmed = self
            .store
            .modify::<Order, _, StoreError, _>(&order.id, move |current| {
                let mut unchanged = current.clone();
                unchanged.remote_id = pushed.remote_id;
                current.remote_id = Some(remote_id);
                if unchanged == pushed {
                    current.synchronized = true;
                }
                Ok(current.synchronized)
            })
            .await?;

        if rejection == RejectionState::Changed {
            self.store.clear_rejection(Collection::Orders, &order.id).await?;
        }
        match confirmed {
            Some(true) => {
                debug!(order_id = %order.id, remote_id, "Order confirmed");
                Ok(PushOutcome::Synced)
            }
            Some(false) => {
                debug!(order_id = %order.id, remote_id, "Order changed during push; kept queued");
                Ok(PushOutcome::Deferred)
            }
            None => {
                debug!(order_id = %order.id, "Order removed during push");
                Ok(PushOutcome::Synced)
            }
        }
    }

    /// Send a voided order in the paid state its queued payments expect.
    /// Only the remote id is stored; the order stays queued so the
    /// cancellation follows once the payments are confirmed.
    async fn stage_paid(&self, order: &Order, report: &mut SyncReport) -> Result<PushOutcome, StoreError> {
        let mut payload = OrderPayload::from(order);
        payload.status = OrderStatus::Paid;
        let remote_id = match self.send_order(order, &payload).await {
            Ok(id) => id,
            Err(e) => return self.push_failed(order, e, report).await,
        };

        self.store
            .modify::<Order, _, StoreError, _>(&order.id, move |current| {
                current.remote_id = Some(remote_id);
                Ok(())
            })
            .await?;
        debug!(order_id = %order.id, remote_id, "Voided order sent as paid ahead of its payments");
        Ok(PushOutcome::Staged)
    }

    /// Push the cancellation of orders staged as paid earlier in the cycle,
    /// once none of their payments is still waiting to go out.
    async fn finish_staged_orders(&self, staged: &[String], report: &mut SyncReport) {
        for order_id in staged {
            let outcome = self
                .finish_staged(order_id, report)
                .await
                .unwrap_or_else(|e| {
                    warn!(order_id = %order_id, error = %e, "Local store error while syncing order");
                    PushOutcome::Failed
                });
            report.orders.record(outcome);
        }
    }

    async fn finish_staged(&self, order_id: &str, report: &mut SyncReport) -> Result<PushOutcome, StoreError> {
        let Some(order) = self.store.get::<Order>(order_id).await? else {
            debug!(order_id, "Order removed during push");
            return Ok(PushOutcome::Synced);
        };
        if self.has_live_payments(order_id).await? {
            debug!(order_id, "Cancellation deferred until the order's payments are confirmed");
            return Ok(PushOutcome::Deferred);
        }
        self.push_order(&order, report).await
    }

    /// Upsert one order body, warning when the backend reports a different
    /// status. Returns the remote id.
    async fn send_order(&self, order: &Order, payload: &OrderPayload) -> Result<i64, RemoteError> {
        let ack = self.gateway.upsert_order(&order.id, payload).await?;
        if let Some(remote_status) = ack.status {
            if !lifecycle::agrees(payload.status, remote_status) {
                // Last writer wins at the backend; surface it and move on.
                warn!(
                    order_id = %order.id,
                    remote_id = ack.remote_id,
                    local = %payload.status,
                    remote = %remote_status,
                    "Backend reports an order status that disagrees with the local one"
                );
            }
        }
        Ok(ack.remote_id)
    }

    /// Whether the order has queued payments that are not parked by a
    /// rejection.
    async fn has_live_payments(&self, order_id: &str) -> Result<bool, StoreError> {
        for payment in payments::payments_for_order(&self.store, order_id).await? {
            if !payment.synchronized && self.rejection_state(&payment).await? != RejectionState::Unchanged {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Payments
    // -----------------------------------------------------------------------

    async fn sync_payments(&self, staged: &[String], report: &mut SyncReport) {
        let pending = match payments::unsynchronized_payments(&self.store).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to read queued payments");
                report.payments.failed += 1;
                return;
            }
        };
        for payment in &pending {
            let outcome = self
                .push_payment(payment, staged, report)
                .await
                .unwrap_or_else(|e| {
                    warn!(payment_id = %payment.id, error = %e, "Local store error while syncing payment");
                    PushOutcome::Failed
                });
            report.payments.record(outcome);
        }
    }

    async fn push_payment(
        &self,
        payment: &Payment,
        staged: &[String],
        report: &mut SyncReport,
    ) -> Result<PushOutcome, StoreError> {
        let rejection = self.rejection_state(payment).await?;
        if rejection == RejectionState::Unchanged {
            return Ok(skip_parked(payment));
        }

        let Some(order) = self.store.get::<Order>(&payment.order_id).await? else {
            let reason = format!("Order {} no longer exists locally", payment.order_id);
            return self.park(payment, None, &reason, report).await;
        };
        let held_as_paid = staged.contains(&order.id);
        if order.synchronized && order.status == OrderStatus::Cancelled && !held_as_paid {
            let reason = format!(
                "Order {} was voided remotely before this payment was confirmed",
                order.id
            );
            return self.park(payment, None, &reason, report).await;
        }
        let remote_order_id = match order.remote_id {
            Some(id) if order.synchronized || held_as_paid => id,
            _ => {
                debug!(
                    payment_id = %payment.id,
                    order_id = %order.id,
                    "Payment deferred until its order is confirmed"
                );
                return Ok(PushOutcome::Deferred);
            }
        };

        if let Err(e) = self
            .gateway
            .record_payment(&PaymentPush::new(payment, remote_order_id))
            .await
        {
            return self.push_failed(payment, e, report).await;
        }

        self.store
            .modify::<Payment, _, StoreError, _>(&payment.id, |current| {
                current.synchronized = true;
                Ok(())
            })
            .await?;
        debug!(payment_id = %payment.id, remote_order_id, "Payment confirmed");

        if rejection == RejectionState::Changed {
            self.store
                .clear_rejection(Collection::Payments, &payment.id)
                .await?;
        }
        Ok(PushOutcome::Synced)
    }

    // -----------------------------------------------------------------------
    // Cash sessions
    // -----------------------------------------------------------------------

    async fn sync_cash_sessions(&self, report: &mut SyncReport) {
        let pending = match cash_sessions::unsynchronized_sessions(&self.store).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to read queued cash sessions");
                report.cash_sessions.failed += 1;
                return;
            }
        };
        for session in &pending {
            let outcome = self
                .push_cash_session(session, report)
                .await
                .unwrap_or_else(|e| {
                    warn!(session_id = %session.id, error = %e, "Local store error while syncing cash session");
                    PushOutcome::Failed
                });
            report.cash_sessions.record(outcome);
        }
    }

    async fn push_cash_session(
        &self,
        session: &CashSession,
        report: &mut SyncReport,
    ) -> Result<PushOutcome, StoreError> {
        let rejection = self.rejection_state(session).await?;
        if rejection == RejectionState::Unchanged {
            return Ok(skip_parked(session));
        }

        let remote_id = match self
            .gateway
            .upsert_cash_session(&session.id, &CashSessionPayload::from(session))
            .await
        {
            Ok(id) => id,
            Err(e) => return self.push_failed(session, e, report).await,
        };

        let pushed = session.clone();
        let confirmed = self
            .store
            .modify::<CashSession, _, StoreError, _>(&session.id, move |current| {
                let mut unchanged = current.clone();
                unchanged.remote_id = pushed.remote_id;
                current.remote_id = Some(remote_id);
                if unchanged == pushed {
                    current.synchronized = true;
                }
                Ok(current.synchronized)
            })
            .await?;

        if rejection == RejectionState::Changed {
            self.store
                .clear_rejection(Collection::CashSessions, &session.id)
                .await?;
        }
        if confirmed == Some(false) {
            debug!(session_id = %session.id, remote_id, "Cash session changed during push; kept queued");
            return Ok(PushOutcome::Deferred);
        }
        debug!(session_id = %session.id, remote_id, "Cash session confirmed");
        Ok(PushOutcome::Synced)
    }

    // -----------------------------------------------------------------------
    // Rejections
    // -----------------------------------------------------------------------

    async fn rejection_state<R: Record>(&self, record: &R) -> Result<RejectionState, StoreError> {
        let Some(rejection) = self
            .store
            .rejection_for(R::COLLECTION, record.key())
            .await?
        else {
            return Ok(RejectionState::None);
        };
        if rejection.payload == serde_json::to_string(record)? {
            Ok(RejectionState::Unchanged)
        } else {
            Ok(RejectionState::Changed)
        }
    }

    /// Log a failed push. Permanent failures are parked in the rejection
    /// ledger.
    async fn push_failed<R: Record>(
        &self,
        record: &R,
        err: RemoteError,
        report: &mut SyncReport,
    ) -> Result<PushOutcome, StoreError> {
        match err {
            RemoteError::Transient(reason) => {
                warn!(
                    collection = %R::COLLECTION,
                    record_id = record.key(),
                    %reason,
                    "Push failed; will retry next cycle"
                );
                Ok(PushOutcome::Failed)
            }
            RemoteError::Permanent { status, message } => {
                self.park(record, Some(status), &message, report).await
            }
        }
    }

    /// Record a permanent rejection together with the body that was refused.
    async fn park<R: Record>(
        &self,
        record: &R,
        http_status: Option<u16>,
        reason: &str,
        report: &mut SyncReport,
    ) -> Result<PushOutcome, StoreError> {
        let collection = R::COLLECTION;
        let body = serde_json::to_string(record)?;
        self.store
            .record_rejection(collection, record.key(), http_status, reason, &body)
            .await?;
        warn!(
            %collection,
            record_id = record.key(),
            status = http_status,
            reason,
            "Record rejected; parked until it changes or is requeued"
        );
        if let Some(rejection) = self.store.rejection_for(collection, record.key()).await? {
            report.rejections.push(rejection);
        }
        Ok(PushOutcome::Failed)
    }

    // -----------------------------------------------------------------------
    // Retention sweep
    // -----------------------------------------------------------------------

    /// Delete confirmed records created before `now - retention`.
    ///
    /// Orders with a queued payment and open cash sessions are kept.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now - self.retention;
        let mut swept = 0;

        let queued_payment_orders: HashSet<String> = payments::unsynchronized_payments(&self.store)
            .await?
            .into_iter()
            .map(|p| p.order_id)
            .collect();

        let confirmed_payments: Vec<Payment> = self.store.get_by_index("synchronized", true).await?;
        for payment in confirmed_payments.iter().filter(|p| p.created_at < cutoff) {
            if self.store.remove::<Payment>(&payment.id).await? {
                swept += 1;
            }
        }

        let confirmed_orders: Vec<Order> = self.store.get_by_index("synchronized", true).await?;
        for order in confirmed_orders
            .iter()
            .filter(|o| o.created_at < cutoff && !queued_payment_orders.contains(&o.id))
        {
            if self.store.remove::<Order>(&order.id).await? {
                swept += 1;
            }
        }

        let confirmed_sessions: Vec<CashSession> =
            self.store.get_by_index("synchronized", true).await?;
        for session in confirmed_sessions
            .iter()
            .filter(|s| s.opened_at < cutoff && s.status != CashSessionStatus::Open)
        {
            if self.store.remove::<CashSession>(&session.id).await? {
                swept += 1;
            }
        }

        if swept > 0 {
            info!(swept, cutoff = %cutoff, "Pruned confirmed records past retention");
        }
        Ok(swept)
    }
}

fn skip_parked<R: Record>(record: &R) -> PushOutcome {
    debug!(
        collection = %R::COLLECTION,
        record_id = record.key(),
        "Skipping record parked by an earlier rejection"
    );
    PushOutcome::Skipped
}

// ---------------------------------------------------------------------------
// Background sync loop
// ---------------------------------------------------------------------------

/// Start the background sync loop.
///
/// A cycle runs `online_debounce` after every became-online event, and on
/// each `interval` tick while online with a non-empty queue. Nothing runs
/// while offline. The loop ends when `cancel` fires.
pub fn spawn_sync_loop(
    engine: Arc<SyncEngine>,
    interval: Duration,
    online_debounce: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut events = engine.connectivity.subscribe();
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Sync loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(ConnectivityEvent::BecameOnline) => {
                        info!("Network restored; resuming queued sync");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(online_debounce) => {}
                        }
                        engine.run_sync_cycle().await;
                    }
                    Ok(ConnectivityEvent::BecameOffline) => {
                        info!("Network offline; deferring remote sync and keeping queue pending");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Sync loop lagged behind connectivity events");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    if !engine.connectivity.is_online() {
                        continue;
                    }
                    match engine.has_pending().await {
                        Ok(true) => {
                            engine.run_sync_cycle().await;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "Failed to check sync queue"),
                    }
                }
            }
        }
        info!("Sync loop stopped");
    })
}

// ===========================================================================
// Tests
// ===========================================================================
