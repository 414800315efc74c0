use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use alloy_primitives::{Address, B256};
use gateway_ledger::{ConfidentialLedger, DecryptionAuthorizationService, TransactionReceipt};
use gateway_lib::{FheType, GatewayError, InputProof, NetworkKey, SignedAuthorization};

// ============================================================================
// API STATE
// ============================================================================

/// API state: the hosted ledger, its read path and the network key it serves
#[derive(Clone)]
pub struct ApiState {
    pub config: ApiConfig,
    pub ledger: Arc<ConfidentialLedger>,
    pub decryption: Arc<DecryptionAuthorizationService>,
    /// `None` when the key route is disabled
    pub network_key: Option<NetworkKey>,
}

/// Configuration for API server
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub server_name: String,
    pub version: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            server_name: "Confidential Payment Gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ============================================================================
// REQUEST/RESPONSE MODELS
// ============================================================================

/// Encrypted input submitted to `addPayment` or `applyRate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitInputRequest {
    pub caller: Address,
    pub handle: B256,
    pub proof: InputProof,
}

/// Ledger deployment details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressResponse {
    pub contract_address: Address,
    pub chain_id: u64,
    pub balance_type: FheType,
}

/// Balance handle of one user; the zero handle means uninitialized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user: Address,
    pub handle: B256,
    pub initialized: bool,
}

/// User decryption request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptRequest {
    pub requester: Address,
    pub owner: Address,
    /// Defaults to the handle named in the authorization
    #[serde(default)]
    pub handle: Option<B256>,
    pub authorization: SignedAuthorization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptResponse {
    pub owner: Address,
    pub handle: B256,
    pub value: u64,
}

/// API information response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiInfoResponse {
    pub server_name: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub method: String,
    pub path: String,
    pub description: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub committed_operations: u64,
}

/// Error body shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Map a protocol error to its HTTP status and body.
pub fn error_response(err: &GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        GatewayError::InvalidInputRange { .. }
        | GatewayError::InvalidHandle(_)
        | GatewayError::InvalidProof(_)
        | GatewayError::TypeMismatch { .. }
        | GatewayError::Signer(_)
        | GatewayError::Config(_) => StatusCode::BAD_REQUEST,
        GatewayError::ProofVerificationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::UnauthorizedDecryption => StatusCode::FORBIDDEN,
        GatewayError::OperationOnUninitializedBalance => StatusCode::CONFLICT,
        GatewayError::UnknownCiphertext(_) => StatusCode::NOT_FOUND,
        GatewayError::EncryptionBackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::NetworkSubmissionFailed(_) => StatusCode::BAD_GATEWAY,
    };

    (
        status,
        Json(ErrorResponse {
            error_code: err.error_code().to_string(),
            message: err.to_string(),
        }),
    )
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Create the main API router with all ledger endpoints
pub fn create_router(state: ApiState) -> Router {
    let mut router = Router::new()
        // Health and info endpoints
        .route("/health", get(health_check))
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/info", get(api_info))
        // Deployment and key material
        .route("/api/v1/address", get(get_address_endpoint));

    if state.network_key.is_some() {
        router = router.route("/api/v1/keys", get(get_keys_endpoint));
    }

    router
        // Ledger operations
        .route("/api/v1/payments", post(add_payment_endpoint))
        .route("/api/v1/rates", post(apply_rate_endpoint))
        .route("/api/v1/balances/{user}", get(get_balance_endpoint))
        // User decryption
        .route("/api/v1/decrypt", post(decrypt_endpoint))
        .with_state(state)
}

// ============================================================================
// ENDPOINT HANDLERS
// ============================================================================

/// Health check endpoint
#[instrument(skip(state), level = "info")]
async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    info!("🔍 API: Health check requested");

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        committed_operations: state.ledger.committed_operations(),
    })
}

/// API information endpoint
#[instrument(skip(state), level = "info")]
async fn api_info(State(state): State<ApiState>) -> Json<ApiInfoResponse> {
    info!("📋 API: API info requested");

    let keys = state.network_key.as_ref().map(|_| {
        (
            "GET",
            "/api/v1/keys",
            "Network key material for encryption clients",
        )
    });

    let endpoints = [
        ("GET", "/api/v1/health", "Health check"),
        (
            "GET",
            "/api/v1/address",
            "Ledger address, chain and balance type",
        ),
    ]
    .into_iter()
    .chain(keys)
    .chain([
        (
            "POST",
            "/api/v1/payments",
            "Add an encrypted payment to the caller's balance",
        ),
        (
            "POST",
            "/api/v1/rates",
            "Multiply the caller's balance by an encrypted rate",
        ),
        (
            "GET",
            "/api/v1/balances/{user}",
            "Encrypted balance handle of a user",
        ),
        (
            "POST",
            "/api/v1/decrypt",
            "Decrypt the requester's own balance",
        ),
    ])
    .map(|(method, path, description)| EndpointInfo {
        method: method.to_string(),
        path: path.to_string(),
        description: description.to_string(),
    })
    .collect();

    Json(ApiInfoResponse {
        server_name: state.config.server_name.clone(),
        version: state.config.version.clone(),
        timestamp: Utc::now(),
        endpoints,
    })
}

#[instrument(skip(state), level = "info")]
async fn get_address_endpoint(State(state): State<ApiState>) -> Json<AddressResponse> {
    Json(AddressResponse {
        contract_address: state.ledger.address(),
        chain_id: state.ledger.chain_id(),
        balance_type: state.ledger.balance_type(),
    })
}

#[instrument(skip(state), level = "info")]
async fn get_keys_endpoint(State(state): State<ApiState>) -> Result<Json<NetworkKey>, StatusCode> {
    info!("🔑 API: Network key requested");
    state
        .network_key
        .clone()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Add an encrypted payment
#[instrument(skip(state, request), fields(caller = %request.caller), level = "info")]
async fn add_payment_endpoint(
    State(state): State<ApiState>,
    Json(request): Json<SubmitInputRequest>,
) -> ApiResult<TransactionReceipt> {
    info!("💰 API: addPayment handle={}", request.handle);

    match state
        .ledger
        .add_payment(request.caller, request.handle, &request.proof)
        .await
    {
        Ok(receipt) => {
            info!("✅ API: Payment committed: tx={}", receipt.tx_hash);
            Ok(Json(receipt))
        }
        Err(e) => {
            warn!("addPayment rejected: {}", e.error_code());
            Err(error_response(&e))
        }
    }
}

/// Apply an encrypted rate
#[instrument(skip(state, request), fields(caller = %request.caller), level = "info")]
async fn apply_rate_endpoint(
    State(state): State<ApiState>,
    Json(request): Json<SubmitInputRequest>,
) -> ApiResult<TransactionReceipt> {
    info!("📈 API: applyRate handle={}", request.handle);

    match state
        .ledger
        .apply_rate(request.caller, request.handle, &request.proof)
        .await
    {
        Ok(receipt) => {
            info!("✅ API: Rate committed: tx={}", receipt.tx_hash);
            Ok(Json(receipt))
        }
        Err(e) => {
            warn!("applyRate rejected: {}", e.error_code());
            Err(error_response(&e))
        }
    }
}

#[instrument(skip(state), level = "info")]
async fn get_balance_endpoint(
    State(state): State<ApiState>,
    Path(user): Path<Address>,
) -> Json<BalanceResponse> {
    let balance = state.ledger.get_encrypted_balance(user);

    Json(BalanceResponse {
        user,
        handle: balance.handle(),
        initialized: balance.is_initialized(),
    })
}

/// User decryption with a signed authorization
#[instrument(
    skip(state, request),
    fields(requester = %request.requester, owner = %request.owner),
    level = "info"
)]
async fn decrypt_endpoint(
    State(state): State<ApiState>,
    Json(request): Json<DecryptRequest>,
) -> ApiResult<DecryptResponse> {
    let handle = request
        .handle
        .unwrap_or(request.authorization.authorization.handle);
    info!("🔓 API: Decryption requested for {}", handle);

    match state
        .decryption
        .request_decryption(handle, request.requester, request.owner, &request.authorization)
        .await
    {
        Ok(value) => Ok(Json(DecryptResponse {
            owner: request.owner,
            handle,
            value,
        })),
        Err(e) => {
            error!("❌ API: Decryption denied");
            Err(error_response(&e))
        }
    }
}
