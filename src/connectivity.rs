//! Connectivity monitor.
//!
//! Raw reachability signals (platform events, the periodic health probe) are
//! fed through [`ConnectivityMonitor::report`]. A state change is committed
//! only after it has been observed continuously for the debounce window, and
//! each committed change emits exactly one [`ConnectivityEvent`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

impl ConnectivityEvent {
    fn for_state(online: bool) -> Self {
        if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::BecameOffline
        }
    }
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Pure debounce state machine, driven by explicit instants.
#[derive(Debug, Clone)]
pub struct Debouncer {
    committed: bool,
    pending: Option<(bool, Instant)>,
    window: Duration,
}

impl Debouncer {
    pub fn new(initial: bool, window: Duration) -> Self {
        Self {
            committed: initial,
            pending: None,
            window,
        }
    }

    pub fn committed(&self) -> bool {
        self.committed
    }

    /// Record a raw observation made at `now`.
    ///
    /// Observing the committed state cancels any pending transition; repeated
    /// observations of the pending state keep its original start time.
    pub fn observe(&mut self, online: bool, now: Instant) {
        if online == self.committed {
            self.pending = None;
            return;
        }
        match self.pending {
            Some((state, _)) if state == online => {}
            _ => self.pending = Some((online, now)),
        }
    }

    /// When the pending transition becomes eligible for commit.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, since)| since + self.window)
    }

    /// Commit the pending state if it has held for the whole window.
    /// Returns the newly committed state.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        let (state, since) = self.pending?;
        if now.saturating_duration_since(since) < self.window {
            return None;
        }
        self.pending = None;
        self.committed = state;
        Some(state)
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
    reports: mpsc::UnboundedSender<bool>,
}

impl ConnectivityMonitor {
    fn with_reports(initial: bool) -> (Self, mpsc::UnboundedReceiver<bool>) {
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(16);
        let (reports, rx) = mpsc::unbounded_channel();
        (
            Self {
                state,
                events,
                reports,
            },
            rx,
        )
    }

    /// Start the monitor with its debounce task. The task ends when `cancel`
    /// fires.
    pub fn spawn(initial: bool, debounce: Duration, cancel: CancellationToken) -> Arc<Self> {
        let (monitor, reports) = Self::with_reports(initial);
        let monitor = Arc::new(monitor);
        let task_monitor = Arc::clone(&monitor);
        tokio::spawn(async move {
            task_monitor.debounce_loop(reports, debounce, cancel).await;
        });
        info!(initial_online = initial, ?debounce, "Connectivity monitor started");
        monitor
    }

    /// Monitor without a debounce task; state changes only through `commit`.
    #[cfg(test)]
    pub(crate) fn manual(initial: bool) -> Arc<Self> {
        Arc::new(Self::with_reports(initial).0)
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Feed a raw reachability observation.
    pub fn report(&self, online: bool) {
        if self.reports.send(online).is_err() {
            debug!(online, "Connectivity report dropped; monitor stopped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Watch the committed state.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Commit `online` as the new state, emitting one event if it changed.
    pub(crate) fn commit(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return;
        }
        if online {
            info!("Network restored");
        } else {
            info!("Network offline");
        }
        // No subscribers is fine.
        let _ = self.events.send(ConnectivityEvent::for_state(online));
    }

    async fn debounce_loop(
        &self,
        mut reports: mpsc::UnboundedReceiver<bool>,
        debounce: Duration,
        cancel: CancellationToken,
    ) {
        let mut debouncer = Debouncer::new(self.is_online(), debounce);
        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                report = reports.recv() => match report {
                    Some(online) => debouncer.observe(online, Instant::now()),
                    None => break,
                },
                _ = sleep_until(deadline) => {}
            }
            if let Some(state) = debouncer.poll(Instant::now()) {
                self.commit(state);
            }
        }
        debug!("Connectivity monitor stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Reachability probe
// ---------------------------------------------------------------------------

/// Lightweight check that the backend can be reached.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Run `probe` every `interval` and report the result to `monitor`.
pub fn spawn_probe(
    monitor: Arc<ConnectivityMonitor>,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let online = tokio::select! {
                        _ = cancel.cancelled() => break,
                        online = probe.probe() => online,
                    };
                    debug!(online, "Reachability probe");
                    monitor.report(online);
                }
            }
        }
        debug!("Reachability probe stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const WINDOW: Duration = Duration::from_secs(2);

    #[test]
    fn test_transition_commits_after_window() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(true, WINDOW);

        d.observe(false, t0);
        assert_eq!(d.deadline(), Some(t0 + WINDOW));
        assert_eq!(d.poll(t0 + Duration::from_millis(1999)), None);
        assert!(d.committed());

        assert_eq!(d.poll(t0 + WINDOW), Some(false));
        assert!(!d.committed());
        assert_eq!(d.deadline(), None);
        assert_eq!(d.poll(t0 + WINDOW * 3), None);
    }

    #[test]
    fn test_flapping_cancels_pending_transition() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(true, WINDOW);

        d.observe(false, t0);
        d.observe(true, t0 + Duration::from_millis(500));
        assert_eq!(d.deadline(), None);
        assert_eq!(d.poll(t0 + WINDOW * 2), None);
        assert!(d.committed());

        // The window restarts from the latest change.
        d.observe(false, t0 + Duration::from_secs(3));
        d.observe(false, t0 + Duration::from_secs(4));
        assert_eq!(d.poll(t0 + Duration::from_millis(4999)), None);
        assert_eq!(d.poll(t0 + Duration::from_secs(5)), Some(false));
    }

    #[test]
    fn test_zero_window_commits_immediately() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(false, Duration::ZERO);
        d.observe(true, t0);
        assert_eq!(d.poll(t0), Some(true));
    }

    #[test]
    fn test_commit_emits_one_event_per_transition() {
        let monitor = ConnectivityMonitor::manual(true);
        let mut events = monitor.subscribe();

        monitor.commit(true);
        monitor.commit(false);
        monitor.commit(false);
        monitor.commit(true);

        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOffline);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOnline);
        assert!(events.try_recv().is_err());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_reports_flow_through_debounce_task() {
        let cancel = CancellationToken::new();
        let monitor = ConnectivityMonitor::spawn(true, Duration::ZERO, cancel.clone());
        let mut events = monitor.subscribe();

        monitor.report(false);
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event within timeout")
            .unwrap();
        assert_eq!(event, ConnectivityEvent::BecameOffline);
        assert!(!monitor.is_online());
        cancel.cancel();
    }

    struct FixedProbe(AtomicBool);

    #[async_trait]
    impl ReachabilityProbe for FixedProbe {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_probe_reports_to_monitor() {
        let cancel = CancellationToken::new();
        let monitor = ConnectivityMonitor::spawn(false, Duration::ZERO, cancel.clone());
        let mut state = monitor.watch();

        let probe = Arc::new(FixedProbe(AtomicBool::new(true)));
        let handle = spawn_probe(
            Arc::clone(&monitor),
            probe,
            Duration::from_millis(10),
            cancel.clone(),
        );

        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|online| *online))
            .await
            .expect("probe result committed")
            .unwrap();
        cancel.cancel();
        handle.await.unwrap();
    }
}
