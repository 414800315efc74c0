//! Encryption client with a memoized backend lifecycle.
//!
//! Backend initialization is expensive, so the client keeps a single slot:
//! the first caller starts the load and parks a shared future in the slot,
//! concurrent callers await that same future, and the outcome settles the
//! slot to `Ready` on success or back to `Empty` on failure so the next call
//! retries. Only the waiters of the load still parked in the slot may settle
//! it, so a stale load (failed earlier, or abandoned by
//! [`EncryptionClient::reset`]) never touches a newer one.

use crate::backend::{BackendLoader, EncryptedInput, InputEncryptor};
use crate::error::{GatewayError, GatewayResult};
use crate::handle::{FheType, InputContext};
use alloy_primitives::Address;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type InitFuture = Shared<BoxFuture<'static, GatewayResult<Arc<dyn InputEncryptor>>>>;

enum BackendState {
    Empty,
    Pending(InitFuture),
    Ready(Arc<dyn InputEncryptor>),
}

/// Turns plaintext amounts into handles plus proofs bound to a context.
pub struct EncryptionClient {
    loader: Arc<dyn BackendLoader>,
    fhe_type: FheType,
    slot: Mutex<BackendState>,
}

impl EncryptionClient {
    #[must_use]
    pub fn new(loader: Arc<dyn BackendLoader>) -> Self {
        Self {
            loader,
            fhe_type: FheType::default(),
            slot: Mutex::new(BackendState::Empty),
        }
    }

    /// Encrypt values of `fhe_type` instead of the default `euint32`.
    #[must_use]
    pub const fn with_fhe_type(mut self, fhe_type: FheType) -> Self {
        self.fhe_type = fhe_type;
        self
    }

    #[must_use]
    pub const fn fhe_type(&self) -> FheType {
        self.fhe_type
    }

    /// Whether a backend is loaded and ready for use
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.lock(), BackendState::Ready(_))
    }

    /// Load the backend, or join the load already in flight.
    pub async fn init(&self) -> GatewayResult<Arc<dyn InputEncryptor>> {
        let future = {
            let mut slot = self.slot.lock();
            let in_flight = match &*slot {
                BackendState::Ready(backend) => return Ok(Arc::clone(backend)),
                BackendState::Pending(future) => Some(future.clone()),
                BackendState::Empty => None,
            };

            if let Some(future) = in_flight {
                debug!("Joining in-flight backend initialization");
                future
            } else {
                debug!("Starting backend initialization");
                let future = self.start_load();
                *slot = BackendState::Pending(future.clone());
                future
            }
        };

        // Await a clone: a completed `Shared` drops its inner and no longer
        // compares equal under `ptr_eq`.
        let outcome = future.clone().await;

        let mut slot = self.slot.lock();
        let owns_slot =
            matches!(&*slot, BackendState::Pending(pending) if Shared::ptr_eq(pending, &future));
        if owns_slot {
            *slot = match &outcome {
                Ok(backend) => {
                    info!("🔐 Encryption backend ready (chain {})", backend.chain_id());
                    BackendState::Ready(Arc::clone(backend))
                }
                Err(e) => {
                    warn!("Encryption backend failed to initialize: {e}");
                    BackendState::Empty
                }
            };
        }

        outcome
    }

    /// Discard the loaded backend, e.g. after switching networks.
    pub fn reset(&self) {
        *self.slot.lock() = BackendState::Empty;
        info!("🔄 Encryption backend reset");
    }

    /// Encrypt `value` for `target_contract` on behalf of `user`.
    ///
    /// The range check runs before the backend is touched. Encryption itself
    /// runs on the blocking pool; dropping the returned future abandons it.
    #[instrument(skip(self, value), fields(fhe_type = %self.fhe_type))]
    pub async fn encrypt(
        &self,
        value: u64,
        target_contract: Address,
        user: Address,
    ) -> GatewayResult<EncryptedInput> {
        let value = self.fhe_type.check_range(value)?;
        let backend = self.init().await?;

        let context = InputContext::new(target_contract, user, backend.chain_id());
        let fhe_type = self.fhe_type;
        let input = tokio::task::spawn_blocking(move || backend.encrypt(value, fhe_type, &context))
            .await
            .map_err(|e| {
                GatewayError::EncryptionBackendUnavailable(format!("encryption task failed: {e}"))
            })??;

        debug!("Encrypted input {}", input.value);
        Ok(input)
    }

    fn start_load(&self) -> InitFuture {
        let loader = Arc::clone(&self.loader);
        async move {
            loader.load().await.map_err(|e| match e {
                GatewayError::EncryptionBackendUnavailable(_) => e,
                other => GatewayError::EncryptionBackendUnavailable(other.to_string()),
            })
        }
        .boxed()
        .shared()
    }
}
