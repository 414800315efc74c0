//! HTTP API client for the confidential payment gateway
//!
//! This client provides a typed interface to the gateway API server. The CLI
//! uses it for every ledger interaction; encryption stays on the client side
//! through [`RemoteKeyLoader`].

mod loader;

pub use loader::RemoteKeyLoader;

use alloy_primitives::Address;
use gateway_ledger::TransactionReceipt;
use gateway_lib::backend::EncryptedInput;
use gateway_lib::{GatewayError, NetworkKey};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::rest::{
    AddressResponse, ApiInfoResponse, BalanceResponse, DecryptRequest, DecryptResponse,
    ErrorResponse, HealthResponse, SubmitInputRequest,
};

/// Client for interacting with the gateway API
#[derive(Debug, Clone)]
pub struct GatewayApiClient {
    client: Client,
    base_url: String,
}

/// API client errors
#[derive(Error, Debug)]
pub enum ApiClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API returned error: {status} - {message}")]
    ApiError {
        status: u16,
        error_code: Option<String>,
        message: String,
    },

    #[error("Failed to serialize/deserialize: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<ApiClientError> for GatewayError {
    fn from(err: ApiClientError) -> Self {
        match err {
            ApiClientError::ApiError {
                error_code: Some(code),
                message,
                ..
            } => Self::from_code(&code, message.clone())
                .unwrap_or(Self::NetworkSubmissionFailed(message)),
            other => Self::NetworkSubmissionFailed(other.to_string()),
        }
    }
}

// ============================================================================
// CLIENT IMPLEMENTATION
// ============================================================================

impl GatewayApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiClientError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check API health
    pub async fn health_check(&self) -> Result<HealthResponse, ApiClientError> {
        let url = format!("{}/api/v1/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Get API information
    pub async fn get_api_info(&self) -> Result<ApiInfoResponse, ApiClientError> {
        let url = format!("{}/api/v1/info", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Ledger address, chain id and balance type
    pub async fn get_address(&self) -> Result<AddressResponse, ApiClientError> {
        let url = format!("{}/api/v1/address", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Network key material for client-side encryption
    pub async fn get_network_key(&self) -> Result<NetworkKey, ApiClientError> {
        let url = format!("{}/api/v1/keys", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Submit `addPayment`
    pub async fn add_payment(
        &self,
        caller: Address,
        input: &EncryptedInput,
    ) -> Result<TransactionReceipt, ApiClientError> {
        self.submit("payments", caller, input).await
    }

    /// Submit `applyRate`
    pub async fn apply_rate(
        &self,
        caller: Address,
        input: &EncryptedInput,
    ) -> Result<TransactionReceipt, ApiClientError> {
        self.submit("rates", caller, input).await
    }

    /// Encrypted balance handle of `user`
    pub async fn get_encrypted_balance(
        &self,
        user: Address,
    ) -> Result<BalanceResponse, ApiClientError> {
        let url = format!("{}/api/v1/balances/{}", self.base_url, user);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// User decryption
    pub async fn decrypt(
        &self,
        request: &DecryptRequest,
    ) -> Result<DecryptResponse, ApiClientError> {
        let url = format!("{}/api/v1/decrypt", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        self.handle_response(response).await
    }

    async fn submit(
        &self,
        path: &str,
        caller: Address,
        input: &EncryptedInput,
    ) -> Result<TransactionReceipt, ApiClientError> {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        let request = SubmitInputRequest {
            caller,
            handle: input.value.handle(),
            proof: input.proof.clone(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        self.handle_response(response).await
    }

    /// Generic response handler
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: Response,
    ) -> Result<T, ApiClientError> {
        if response.status().is_success() {
            let json = response.json().await?;
            Ok(json)
        } else {
            Err(self.handle_error_response(response).await)
        }
    }

    /// Handle error responses
    async fn handle_error_response(&self, response: Response) -> ApiClientError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => ApiClientError::ApiError {
                status,
                error_code: Some(error.error_code),
                message: error.message,
            },
            Err(_) => ApiClientError::ApiError {
                status,
                error_code: None,
                message: body,
            },
        }
    }
}
