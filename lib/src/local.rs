//! Local development backend.
//!
//! Stands in for the external FHE coprocessor the same way a mock-mode
//! deployment does: ciphertexts are the plaintext masked with a keystream
//! derived from a single network key. Anyone holding the key can read every
//! value, so this backend is for local networks and tests only.
//!
//! The keystream for a ciphertext is `keccak256(key || nonce)` truncated to
//! the byte width of the type. Plaintexts are little-endian.

use crate::backend::{
    BackendLoader, EncryptedInput, HomomorphicEvaluator, InputEncryptor, KeyManagement,
};
use crate::error::{GatewayError, GatewayResult};
use crate::handle::{stamp_handle, EncryptedValue, FheType, InputContext};
use crate::proof::{derive_input_handle, encode_input_proof, VerifiedInput};
use crate::ComputationBinding;
use alloy_primitives::{keccak256, Bytes, B256};
use alloy_sol_types::SolType;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const OPCODE_ADD: u8 = 0;
const OPCODE_MUL: u8 = 1;

/// Key material shared by clients and the coprocessor of one network.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkKey {
    pub chain_id: u64,
    pub key: B256,
}

impl NetworkKey {
    #[must_use]
    pub const fn new(chain_id: u64, key: B256) -> Self {
        Self { chain_id, key }
    }

    /// Fresh random key for `chain_id`
    #[must_use]
    pub fn generate(chain_id: u64) -> Self {
        Self::new(chain_id, B256::random())
    }

    fn keystream(&self, nonce: B256) -> B256 {
        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(self.key.as_slice());
        seed[32..].copy_from_slice(nonce.as_slice());
        keccak256(seed)
    }

    fn mask(&self, value: u64, fhe_type: FheType, nonce: B256) -> Vec<u8> {
        let stream = self.keystream(nonce);
        value.to_le_bytes()[..fhe_type.byte_len()]
            .iter()
            .zip(stream.iter())
            .map(|(v, k)| v ^ k)
            .collect()
    }

    fn unmask(&self, ciphertext: &[u8], fhe_type: FheType, nonce: B256) -> GatewayResult<u64> {
        if ciphertext.len() != fhe_type.byte_len() {
            return Err(GatewayError::InvalidProof(format!(
                "ciphertext of {} bytes cannot hold {fhe_type}",
                ciphertext.len()
            )));
        }

        let stream = self.keystream(nonce);
        let mut plain = [0u8; 8];
        for (i, (c, k)) in ciphertext.iter().zip(stream.iter()).enumerate() {
            plain[i] = c ^ k;
        }
        Ok(u64::from_le_bytes(plain))
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkKey")
            .field("chain_id", &self.chain_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Client-side encryptor for the local backend.
#[derive(Debug, Clone)]
pub struct LocalEncryptor {
    key: NetworkKey,
}

impl LocalEncryptor {
    #[must_use]
    pub const fn new(key: NetworkKey) -> Self {
        Self { key }
    }
}

impl InputEncryptor for LocalEncryptor {
    fn chain_id(&self) -> u64 {
        self.key.chain_id
    }

    fn encrypt(
        &self,
        value: u64,
        fhe_type: FheType,
        context: &InputContext,
    ) -> GatewayResult<EncryptedInput> {
        let nonce = B256::random();
        let ciphertext = self.key.mask(value, fhe_type, nonce);
        let handle = derive_input_handle(&ciphertext, nonce, fhe_type, context);
        let proof = encode_input_proof(nonce, fhe_type, Bytes::from(ciphertext))?;

        Ok(EncryptedInput {
            value: EncryptedValue::from_handle(handle)?,
            proof,
        })
    }
}

/// Loader that hands out a [`LocalEncryptor`] for a key already in hand.
#[derive(Debug, Clone)]
pub struct LocalKeyLoader {
    key: NetworkKey,
}

impl LocalKeyLoader {
    #[must_use]
    pub const fn new(key: NetworkKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl BackendLoader for LocalKeyLoader {
    async fn load(&self) -> GatewayResult<Arc<dyn InputEncryptor>> {
        debug!("Loading local encryptor for chain {}", self.key.chain_id);
        Ok(Arc::new(LocalEncryptor::new(self.key.clone())))
    }
}

#[derive(Debug, Clone)]
struct StoredCiphertext {
    fhe_type: FheType,
    nonce: B256,
    ciphertext: Vec<u8>,
}

/// In-process coprocessor: ciphertext store, evaluator and key management.
#[derive(Debug)]
pub struct LocalCoprocessor {
    key: NetworkKey,
    store: RwLock<HashMap<B256, StoredCiphertext>>,
    sequence: AtomicU64,
}

impl LocalCoprocessor {
    #[must_use]
    pub fn new(key: NetworkKey) -> Self {
        Self {
            key,
            store: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn network_key(&self) -> &NetworkKey {
        &self.key
    }

    /// Number of ciphertexts held
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.store.read().len()
    }

    fn plaintext(&self, value: &EncryptedValue) -> GatewayResult<u64> {
        let stored = self
            .store
            .read()
            .get(&value.handle())
            .cloned()
            .ok_or(GatewayError::UnknownCiphertext(value.handle()))?;

        if stored.fhe_type != value.fhe_type() {
            return Err(GatewayError::TypeMismatch {
                expected: value.fhe_type(),
                found: stored.fhe_type,
            });
        }

        self.key.unmask(&stored.ciphertext, stored.fhe_type, stored.nonce)
    }

    fn compute(
        &self,
        opcode: u8,
        lhs: &EncryptedValue,
        rhs: &EncryptedValue,
        op: impl FnOnce(FheType, u64, u64) -> u64,
    ) -> GatewayResult<EncryptedValue> {
        if lhs.fhe_type() != rhs.fhe_type() {
            return Err(GatewayError::TypeMismatch {
                expected: lhs.fhe_type(),
                found: rhs.fhe_type(),
            });
        }

        let fhe_type = lhs.fhe_type();
        let result = op(fhe_type, self.plaintext(lhs)?, self.plaintext(rhs)?);

        let binding = ComputationBinding {
            opcode,
            lhs: lhs.handle(),
            rhs: rhs.handle(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        let digest = keccak256(ComputationBinding::abi_encode(&binding));
        let handle = stamp_handle(digest, self.key.chain_id, fhe_type);

        let nonce = B256::random();
        let ciphertext = self.key.mask(result, fhe_type, nonce);
        self.store.write().insert(
            handle,
            StoredCiphertext {
                fhe_type,
                nonce,
                ciphertext,
            },
        );

        EncryptedValue::from_handle(handle)
    }
}

impl HomomorphicEvaluator for LocalCoprocessor {
    fn ingest(&self, input: &VerifiedInput) -> GatewayResult<EncryptedValue> {
        let value = *input.value();

        // Reject ciphertexts this backend could never decrypt.
        self.key
            .unmask(input.ciphertext(), value.fhe_type(), input.nonce())?;

        self.store.write().insert(
            value.handle(),
            StoredCiphertext {
                fhe_type: value.fhe_type(),
                nonce: input.nonce(),
                ciphertext: input.ciphertext().to_vec(),
            },
        );
        Ok(value)
    }

    fn add(&self, lhs: &EncryptedValue, rhs: &EncryptedValue) -> GatewayResult<EncryptedValue> {
        self.compute(OPCODE_ADD, lhs, rhs, |ty, a, b| ty.wrapping_add(a, b))
    }

    fn mul(&self, lhs: &EncryptedValue, rhs: &EncryptedValue) -> GatewayResult<EncryptedValue> {
        self.compute(OPCODE_MUL, lhs, rhs, |ty, a, b| ty.wrapping_mul(a, b))
    }
}

#[async_trait]
impl KeyManagement for LocalCoprocessor {
    async fn decrypt(&self, value: &EncryptedValue) -> GatewayResult<u64> {
        self.plaintext(value)
    }
}
