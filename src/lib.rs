//! Comanda POS - offline order store and sync engine.
//!
//! The terminal keeps taking orders while the backend is unreachable. Every
//! business record is written to the local SQLite store first, flagged
//! `synchronized = false`, and pushed by the background sync engine once
//! connectivity returns.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cash_sessions;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod orders;
pub mod payments;
pub mod settings;
pub mod store;
pub mod sync;

use crate::api::HttpGateway;
use crate::config::TerminalConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::store::LocalStore;
use crate::sync::SyncEngine;

// ============================================================================
// Logging
// ============================================================================

/// Initialize structured logging (console + daily rolling file in `log_dir`).
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for the lifetime of the process.
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,comanda_pos_lib=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // After init so failed deletions are logged.
    let pruned = diagnostics::prune_old_logs(log_dir);
    if pruned > 0 {
        tracing::debug!(pruned, "Pruned old log files");
    }

    guard
}

// ============================================================================
// Terminal
// ============================================================================

/// A running terminal: local store, connectivity monitor, health probe and
/// sync loop, all stopped together by [`Terminal::shutdown`].
pub struct Terminal {
    pub config: TerminalConfig,
    pub store: LocalStore,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub engine: Arc<SyncEngine>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Terminal {
    pub async fn start(config: TerminalConfig) -> anyhow::Result<Self> {
        let store = LocalStore::open(config.db_path())
            .await
            .context("cannot open local store; orders cannot be saved offline")?;

        let gateway = Arc::new(
            HttpGateway::new(
                &config.remote_url,
                &config.api_key,
                &config.terminal_id,
                config.request_timeout,
            )
            .context("failed to create HTTP client")?,
        );

        let cancel = CancellationToken::new();
        // Offline until the first probe says otherwise.
        let connectivity =
            ConnectivityMonitor::spawn(false, config.online_debounce, cancel.child_token());

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            gateway.clone(),
            Arc::clone(&connectivity),
            chrono::Duration::days(config.retention_days),
        ));

        let tasks = vec![
            connectivity::spawn_probe(
                Arc::clone(&connectivity),
                gateway,
                config.probe_interval,
                cancel.child_token(),
            ),
            sync::spawn_sync_loop(
                Arc::clone(&engine),
                config.sync_interval,
                config.online_debounce,
                cancel.child_token(),
            ),
        ];

        info!(
            terminal_id = %config.terminal_id,
            remote_url = %config.remote_url,
            db = %store.path().display(),
            "Terminal started"
        );

        Ok(Self {
            config,
            store,
            connectivity,
            engine,
            cancel,
            tasks,
        })
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Terminal stopped");
    }
}

// ============================================================================
// App entry point
// ============================================================================

pub fn run() -> anyhow::Result<()> {
    let config = TerminalConfig::from_env();
    let _log_guard = init_logging(&config.log_dir());

    info!("Starting Comanda POS v{}", env!("CARGO_PKG_VERSION"));
    info!(about = %diagnostics::about_info(), "Build info");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let terminal = Terminal::start(config).await?;
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("Shutdown requested");
        terminal.shutdown().await;
        Ok(())
    })
}
