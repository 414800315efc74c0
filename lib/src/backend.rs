//! Capability traits for the external encryption backend.
//!
//! The homomorphic scheme and the proof system live behind these traits. The
//! client side needs an [`InputEncryptor`] (obtained once through a
//! [`BackendLoader`]); the ledger side needs a [`HomomorphicEvaluator`]; the
//! decryption service needs [`KeyManagement`].

use crate::error::GatewayResult;
use crate::handle::{EncryptedValue, FheType, InputContext, InputProof};
use crate::proof::VerifiedInput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Output of one encryption: the handle to submit and the proof binding it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub value: EncryptedValue,
    pub proof: InputProof,
}

/// An initialized encryption backend.
///
/// `encrypt` is CPU-bound and synchronous. Callers on an async runtime should
/// go through [`crate::EncryptionClient`], which moves it off the reactor.
pub trait InputEncryptor: Send + Sync {
    /// Chain whose network key this encryptor holds
    fn chain_id(&self) -> u64;

    /// Encrypt `value` and produce a proof bound to `context`.
    ///
    /// `value` has already been range-checked against `fhe_type`.
    fn encrypt(
        &self,
        value: u64,
        fhe_type: FheType,
        context: &InputContext,
    ) -> GatewayResult<EncryptedInput>;
}

/// Expensive one-time backend initialization.
#[async_trait]
pub trait BackendLoader: Send + Sync {
    async fn load(&self) -> GatewayResult<Arc<dyn InputEncryptor>>;
}

/// Ciphertext arithmetic performed on behalf of the ledger.
///
/// Results are fresh handles; operands are never mutated.
pub trait HomomorphicEvaluator: Send + Sync {
    /// Register a verified input ciphertext so that it can be used as an operand.
    fn ingest(&self, input: &VerifiedInput) -> GatewayResult<EncryptedValue>;

    /// `lhs + rhs mod 2^W`
    fn add(&self, lhs: &EncryptedValue, rhs: &EncryptedValue) -> GatewayResult<EncryptedValue>;

    /// `lhs * rhs mod 2^W`
    fn mul(&self, lhs: &EncryptedValue, rhs: &EncryptedValue) -> GatewayResult<EncryptedValue>;
}

/// Threshold decryption. Called only after authorization has succeeded.
#[async_trait]
pub trait KeyManagement: Send + Sync {
    async fn decrypt(&self, value: &EncryptedValue) -> GatewayResult<u64>;
}
