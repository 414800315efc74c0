use super::GatewayApiClient;
use async_trait::async_trait;
use gateway_lib::{BackendLoader, GatewayError, GatewayResult, InputEncryptor, LocalEncryptor};
use std::sync::Arc;
use tracing::info;

/// Loads the encryption backend with key material fetched from a gateway.
///
/// Meant to sit behind an [`gateway_lib::EncryptionClient`], which calls
/// `load` once and shares the result.
#[derive(Debug, Clone)]
pub struct RemoteKeyLoader {
    client: GatewayApiClient,
}

impl RemoteKeyLoader {
    #[must_use]
    pub const fn new(client: GatewayApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendLoader for RemoteKeyLoader {
    async fn load(&self) -> GatewayResult<Arc<dyn InputEncryptor>> {
        info!("🔑 Fetching network key from {}", self.client.base_url());

        let key = self.client.get_network_key().await.map_err(|e| {
            GatewayError::EncryptionBackendUnavailable(format!("key fetch failed: {e}"))
        })?;

        Ok(Arc::new(LocalEncryptor::new(key)))
    }
}
