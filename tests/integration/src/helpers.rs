//! Test helper utilities for integration tests

use axum::Router;
use gateway_config::GatewayConfig;
use gateway_core::{Channel, Group, RelayRequest, RelayResponse, RequestExecutor, Token};
use gateway_providers::ExecutorRegistry;
use gateway_server::{create_router, AppState, DispatchError};
use gateway_store::MemoryStore;
use once_cell::sync::Lazy;
use reqwest::{Client, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::fixtures::{bearer, test_group, test_token, TEST_TOKEN_KEY};
use crate::mock_providers::ScriptedExecutor;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Configuration tuned for fast, deterministic tests
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.retry.rate_limited_jitter = Duration::ZERO;
    config
}

/// Gateway state wired to a scripted executor and an in-memory store
pub struct Harness {
    /// Assembled state
    pub state: AppState,
    /// System of record behind the cache
    pub store: Arc<MemoryStore>,
    /// Upstream stand-in
    pub executor: Arc<ScriptedExecutor>,
}

impl Harness {
    /// Harness with the default token and group
    pub async fn new(config: GatewayConfig, channels: Vec<Channel>, executor: ScriptedExecutor) -> Self {
        Self::with_records(config, channels, vec![test_token()], vec![test_group()], executor).await
    }

    /// Harness over explicit records; the registry is loaded before returning
    pub async fn with_records(
        config: GatewayConfig,
        channels: Vec<Channel>,
        tokens: Vec<Token>,
        groups: Vec<Group>,
        executor: ScriptedExecutor,
    ) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::with_records(channels, tokens, groups));
        let executor = Arc::new(executor);
        let upstream: Arc<dyn RequestExecutor> = executor.clone();

        let state = AppState::builder(config)
            .store(store.clone())
            .executors(ExecutorRegistry::new().with_fallback(upstream))
            .rng_seed(42)
            .build()
            .expect("harness state should build");
        state.registry.refresh().await.expect("registry should load");

        Self {
            state,
            store,
            executor,
        }
    }

    /// Dispatch `request` with the default token
    pub async fn dispatch(&self, request: RelayRequest) -> Result<RelayResponse, DispatchError> {
        self.dispatch_as(TEST_TOKEN_KEY, request).await
    }

    /// Dispatch `request` with the stored key `key`
    pub async fn dispatch_as(
        &self,
        key: &str,
        request: RelayRequest,
    ) -> Result<RelayResponse, DispatchError> {
        self.state
            .dispatcher
            .dispatch(Some(&bearer(key)), None, request)
            .await
    }

    /// Router over the harness state
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }
}

/// Gateway router served on a real local listener
pub struct TestServer {
    /// The server address
    pub addr: SocketAddr,
    /// HTTP client for making requests
    pub client: Client,
    /// Base URL for the server
    pub base_url: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Serve `router` on an ephemeral port
    pub async fn new(router: Router) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = router.into_make_service_with_connect_info::<SocketAddr>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create client");

        Self {
            addr,
            client,
            base_url: format!("http://{addr}"),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the full URL for a path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make a GET request, optionally authenticated
    pub async fn get(&self, path: &str, key: Option<&str>) -> Response {
        let mut builder = self.client.get(self.url(path));
        if let Some(key) = key {
            builder = builder.header("Authorization", bearer(key));
        }
        builder.send().await.expect("Request failed")
    }

    /// Make an authenticated POST request with a JSON body
    pub async fn post_json(&self, path: &str, key: &str, body: &Value) -> Response {
        self.client
            .post(self.url(path))
            .header("Authorization", bearer(key))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Parse response body as JSON
    pub async fn json_body(response: Response) -> Value {
        response.json().await.expect("Failed to parse JSON")
    }

    /// Shutdown the test server
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
