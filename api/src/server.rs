use axum::{http::HeaderValue, Router};
use std::sync::Arc;
use std::time::Duration;

use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info, instrument, warn};

use crate::rest::{ApiConfig, ApiState};
use gateway_ledger::{Clock, ConfidentialLedger, DecryptionAuthorizationService, LedgerEvent};
use gateway_lib::{GatewayConfig, GatewayError, GatewayResult, LocalCoprocessor, NetworkKey};

// ============================================================================
// API SERVER CONFIGURATION
// ============================================================================

/// Configuration for the gateway API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Base API configuration
    pub api_config: ApiConfig,

    /// Server binding configuration
    pub host: String,
    pub port: u16,

    /// Middleware configuration
    pub enable_compression: bool,
    pub enable_cors: bool,
    pub request_timeout_seconds: u64,
    pub max_request_size_bytes: usize,

    /// Security configuration
    pub cors_origins: Vec<String>,

    /// Expose the network key at `/api/v1/keys`
    pub serve_network_key: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            api_config: ApiConfig::default(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_compression: true,
            enable_cors: true,
            request_timeout_seconds: 30,
            max_request_size_bytes: 1024 * 1024, // 1MB
            cors_origins: vec!["*".to_string()],
            serve_network_key: true,
        }
    }
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// Hosts one confidential ledger on the local development backend
pub struct ApiServer {
    config: ApiServerConfig,
    state: ApiState,
}

impl ApiServer {
    /// Deploy a ledger according to `gateway` and wrap it in an API server.
    #[instrument(skip_all, level = "info")]
    pub fn new(gateway: &GatewayConfig, config: ApiServerConfig) -> GatewayResult<Self> {
        Self::with_clock(gateway, config, None)
    }

    /// Same as [`ApiServer::new`] with an explicit clock for decryption grants.
    pub fn with_clock(
        gateway: &GatewayConfig,
        config: ApiServerConfig,
        clock: Option<Arc<dyn Clock>>,
    ) -> GatewayResult<Self> {
        info!("🚀 Initializing confidential payment gateway");
        gateway.validate()?;

        let chain_id = gateway.network.chain_id;
        // The local backend holds the network secret in process
        if !gateway.is_local_network() {
            return Err(GatewayError::Config(format!(
                "The local encryption backend only runs on a local chain, got chain {chain_id}"
            )));
        }

        let network_key = match gateway.network_key {
            Some(key) => NetworkKey::new(chain_id, key),
            None => {
                warn!("FHE_NETWORK_KEY not set, generating an ephemeral network key");
                NetworkKey::generate(chain_id)
            }
        };

        let coprocessor = Arc::new(LocalCoprocessor::new(network_key.clone()));
        let ledger = Arc::new(
            ConfidentialLedger::new(gateway.contract.address, chain_id, coprocessor.clone())
                .with_balance_type(gateway.contract.balance_type),
        );

        let mut decryption = DecryptionAuthorizationService::new(
            ledger.clone(),
            coprocessor,
            gateway.decryption.clone(),
        );
        if let Some(clock) = clock {
            decryption = decryption.with_clock(clock);
        }

        info!(
            "📜 Ledger deployed at {} on chain {} ({})",
            gateway.contract.address, chain_id, gateway.contract.balance_type
        );

        let state = ApiState {
            config: config.api_config.clone(),
            ledger,
            decryption: Arc::new(decryption),
            network_key: config.serve_network_key.then_some(network_key),
        };

        info!("✅ API server initialized successfully");
        Ok(Self { config, state })
    }

    /// Build the complete router with all endpoints
    #[instrument(skip(self), level = "info")]
    pub fn create_router(&self) -> Router {
        info!("🔧 Building API router");

        let router = crate::rest::create_router(self.state.clone());
        let router = self.add_middleware(router);

        info!("✅ API router built successfully");
        router
    }

    /// Add middleware layers to the router
    fn add_middleware(&self, router: Router) -> Router {
        let mut router = router
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyLimitLayer::new(
                self.config.max_request_size_bytes,
            ))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_seconds,
            )));

        if self.config.enable_compression {
            router = router.layer(CompressionLayer::new());
        }

        if self.config.enable_cors {
            let origins = if self.config.cors_origins.iter().any(|o| o == "*") {
                AllowOrigin::from(Any)
            } else {
                AllowOrigin::list(
                    self.config
                        .cors_origins
                        .iter()
                        .filter_map(|o| o.parse::<HeaderValue>().ok()),
                )
            };

            let cors = CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any);

            router = router.layer(cors);
        }

        router
    }

    /// Log ledger events until the ledger goes away.
    pub fn spawn_event_logger(&self) -> tokio::task::JoinHandle<()> {
        let mut events = self.state.ledger.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LedgerEvent::BalanceUpdated {
                        user,
                        operation,
                        balance_handle,
                        sequence,
                    }) => {
                        debug!(
                            "📣 BalanceUpdated user={} op={} handle={} seq={}",
                            user, operation, balance_handle, sequence
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event logger lagged, skipped {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Get server binding address
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Get API state reference
    #[must_use]
    pub const fn state(&self) -> &ApiState {
        &self.state
    }

    /// Get server configuration
    #[must_use]
    pub const fn config(&self) -> &ApiServerConfig {
        &self.config
    }
}

// ============================================================================
// SERVER BUILDER UTILITIES
// ============================================================================

/// Builder for API server configuration
pub struct ApiServerBuilder {
    config: ApiServerConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl ApiServerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ApiServerConfig::default(),
            clock: None,
        }
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn api_config(mut self, config: ApiConfig) -> Self {
        self.config.api_config = config;
        self
    }

    #[must_use]
    pub const fn enable_cors(mut self, enabled: bool) -> Self {
        self.config.enable_cors = enabled;
        self
    }

    #[must_use]
    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.config.cors_origins = origins;
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, seconds: u64) -> Self {
        self.config.request_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn max_request_size(mut self, bytes: usize) -> Self {
        self.config.max_request_size_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn serve_network_key(mut self, enabled: bool) -> Self {
        self.config.serve_network_key = enabled;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the API server with the current configuration
    ///
    /// # Errors
    /// Returns error if the gateway configuration is invalid
    pub fn build(self, gateway: &GatewayConfig) -> GatewayResult<ApiServer> {
        ApiServer::with_clock(gateway, self.config, self.clock)
    }
}

impl Default for ApiServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
