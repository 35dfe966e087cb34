//! HTTP server lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    error::ServerResult,
    routes::create_router,
    shutdown::{wait_for_stop, ShutdownController},
    state::AppState,
    tasks::spawn_background_tasks,
};

/// Gateway HTTP server
#[derive(Debug)]
pub struct Server {
    state: AppState,
    shutdown: ShutdownController,
}

impl Server {
    /// Create a server over assembled state
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            shutdown: ShutdownController::new(),
        }
    }

    /// Shared state
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Address from the server configuration
    #[must_use]
    pub fn bind_address(&self) -> String {
        let server = &self.state.config.server;
        format!("{}:{}", server.host, server.port)
    }

    /// Bind the configured address and serve until `signal` resolves.
    ///
    /// # Errors
    /// Fails when the initial registry load or the bind fails.
    pub async fn run<F>(self, signal: F) -> ServerResult<()>
    where
        F: Future + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_address()).await?;
        self.serve(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves
    ///
    /// # Errors
    /// Fails when the initial registry load fails or the listener errors.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> ServerResult<()>
    where
        F: Future + Send + 'static,
    {
        let Self { state, shutdown } = self;

        // Channels must be loaded before the first request is accepted.
        state.registry.refresh().await?;

        let stop = shutdown.subscribe();
        let tasks = spawn_background_tasks(&state, &stop);

        let addr = listener.local_addr()?;
        info!(address = %addr, version = env!("CARGO_PKG_VERSION"), "Gateway listening");

        let shutdown_timeout = state.config.server.shutdown_timeout;
        let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

        let server_stop = shutdown.subscribe();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(wait_for_stop(server_stop))
                .await
        });

        signal.await;
        shutdown.trigger("signal");

        match tokio::time::timeout(shutdown_timeout, server).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => warn!(error = %e, "Server task failed"),
            Err(_) => warn!(
                timeout = ?shutdown_timeout,
                "Graceful shutdown timed out, dropping open connections"
            ),
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}
