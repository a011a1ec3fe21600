//! Web server for filedepot.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::{ReconcileConfig, ServerConfig};
use crate::file::FileService;
use crate::{DepotError, Result};

use super::handlers::AppState;
use super::router::{create_health_router, create_router};

/// Web server for the file API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
    /// Periodic reconciliation settings.
    reconcile: ReconcileConfig,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(
        config: &ServerConfig,
        files: FileService,
        reconcile: &ReconcileConfig,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse::<SocketAddr>()
            .map_err(|e| {
                DepotError::Config(format!(
                    "invalid server address {}:{}: {}",
                    config.host, config.port, e
                ))
            })?;

        Ok(Self {
            addr,
            app_state: Arc::new(AppState::new(files)),
            reconcile: reconcile.clone(),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the reconciliation background task.
    ///
    /// The first sweep happens at startup, so the task waits one interval
    /// before its first run.
    fn start_reconcile_task(state: Arc<AppState>, config: &ReconcileConfig) {
        if !config.enabled || config.interval_secs == 0 {
            tracing::info!("Periodic reconcile disabled");
            return;
        }

        let period = Duration::from_secs(config.interval_secs);
        let grace = config.pending_grace();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;

                match state.files.reconcile(grace).await {
                    Ok(report) if report.is_clean() => {
                        tracing::debug!("Reconcile found nothing to repair");
                    }
                    Ok(report) => {
                        tracing::info!(
                            stale_pending = report.stale_pending,
                            orphan_blobs = report.orphan_blobs,
                            failed = report.failed,
                            "Reconciled store"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Reconcile failed");
                    }
                }
            }
        });

        tracing::info!(
            interval_secs = config.interval_secs,
            "Reconcile task started"
        );
    }

    fn build_router(&self) -> Router {
        create_router(self.app_state.clone()).merge(create_health_router())
    }

    /// Run the web server.
    pub async fn run(self) -> std::result::Result<(), std::io::Error> {
        let router = self.build_router();

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        // Start the reconcile task after a successful bind
        Self::start_reconcile_task(self.app_state.clone(), &self.reconcile);

        tracing::info!("Web server listening on http://{}", local_addr);

        axum::serve(listener, router).await
    }

    /// Run the server and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> std::result::Result<SocketAddr, std::io::Error> {
        let router = self.build_router();

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        Self::start_reconcile_task(self.app_state.clone(), &self.reconcile);

        tracing::info!("Web server listening on http://{}", local_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}
