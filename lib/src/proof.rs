//! Input proof construction and verification
//!
//! An input proof carries the ciphertext and the nonce it was encrypted
//! under. The handle of an input is a digest of the ciphertext together with
//! the (contract, user, chain) context, so a verifier can recompute it from
//! the proof and the context it expects. Any difference in context, or a
//! proof lifted from another ciphertext, yields a different handle.

use crate::error::{GatewayError, GatewayResult};
use crate::handle::{stamp_handle, EncryptedValue, FheType, InputContext, InputProof};
use crate::{InputBinding, InputProofPayload};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolType;

/// Layout version of [`InputProofPayload`]
pub const PROOF_VERSION: u8 = 1;

/// Handle an input must carry given its ciphertext and binding context.
#[must_use]
pub fn derive_input_handle(
    ciphertext: &[u8],
    nonce: B256,
    fhe_type: FheType,
    context: &InputContext,
) -> B256 {
    let binding = InputBinding {
        ciphertextDigest: keccak256(ciphertext),
        nonce,
        fheType: fhe_type.tag(),
        contractAddress: context.contract,
        userAddress: context.user,
        chainId: U256::from(context.chain_id),
    };

    let digest = keccak256(InputBinding::abi_encode(&binding));
    stamp_handle(digest, context.chain_id, fhe_type)
}

/// ABI-encode the proof bytes for a freshly encrypted input.
pub fn encode_input_proof(
    nonce: B256,
    fhe_type: FheType,
    ciphertext: Bytes,
) -> GatewayResult<InputProof> {
    let payload = InputProofPayload {
        version: PROOF_VERSION,
        fheType: fhe_type.tag(),
        nonce,
        ciphertext,
    };
    InputProof::new(InputProofPayload::abi_encode(&payload))
}

/// An input whose binding has been checked.
///
/// Only [`ProofVerifier::verify`] produces this, so holding one means the
/// ciphertext belongs to the handle and the context it was verified for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedInput {
    value: EncryptedValue,
    ciphertext: Bytes,
    nonce: B256,
    context: InputContext,
}

impl VerifiedInput {
    #[must_use]
    pub const fn value(&self) -> &EncryptedValue {
        &self.value
    }

    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Nonce the ciphertext was encrypted under
    #[must_use]
    pub const fn nonce(&self) -> B256 {
        self.nonce
    }

    #[must_use]
    pub const fn context(&self) -> &InputContext {
        &self.context
    }
}

/// Checks input proofs against the context of one chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProofVerifier {
    chain_id: u64,
}

impl ProofVerifier {
    #[must_use]
    pub const fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Verify that `proof` binds `value` to exactly (`expected_contract`,
    /// `expected_user`, this chain).
    ///
    /// Pure: no state is read or written.
    pub fn verify(
        &self,
        value: &EncryptedValue,
        proof: &InputProof,
        expected_contract: Address,
        expected_user: Address,
    ) -> GatewayResult<VerifiedInput> {
        let payload = InputProofPayload::abi_decode(proof.as_bytes())
            .map_err(|e| rejected(format!("malformed proof: {e}")))?;

        if payload.version != PROOF_VERSION {
            return Err(rejected(format!(
                "unsupported proof version {}",
                payload.version
            )));
        }

        let proof_type = FheType::from_tag(payload.fheType)
            .ok_or_else(|| rejected(format!("unknown type tag {}", payload.fheType)))?;
        if proof_type != value.fhe_type() {
            return Err(rejected(format!(
                "proof is for {proof_type}, handle is {}",
                value.fhe_type()
            )));
        }

        if payload.ciphertext.is_empty() {
            return Err(rejected("proof carries no ciphertext".to_string()));
        }

        if value.chain_id() != self.chain_id {
            return Err(rejected(format!(
                "handle was produced for chain {}, expected {}",
                value.chain_id(),
                self.chain_id
            )));
        }

        let context = InputContext::new(expected_contract, expected_user, self.chain_id);
        let expected =
            derive_input_handle(&payload.ciphertext, payload.nonce, proof_type, &context);
        if expected != value.handle() {
            return Err(rejected(
                "proof does not bind this handle to the expected contract and user".to_string(),
            ));
        }

        Ok(VerifiedInput {
            value: *value,
            ciphertext: payload.ciphertext,
            nonce: payload.nonce,
            context,
        })
    }
}

fn rejected(reason: String) -> GatewayError {
    GatewayError::ProofVerificationFailed(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN_ID: u64 = 31_337;

    fn bound_input(context: &InputContext) -> (EncryptedValue, InputProof) {
        let nonce = B256::repeat_byte(0x11);
        let ciphertext = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        let handle = derive_input_handle(&ciphertext, nonce, FheType::Euint32, context);
        let proof = encode_input_proof(nonce, FheType::Euint32, ciphertext).unwrap();
        (EncryptedValue::from_handle(handle).unwrap(), proof)
    }

    #[test]
    fn test_verify_matching_context() {
        let contract = Address::repeat_byte(0xaa);
        let user = Address::repeat_byte(0xbb);
        let context = InputContext::new(contract, user, CHAIN_ID);
        let (value, proof) = bound_input(&context);

        let verified = ProofVerifier::new(CHAIN_ID)
            .verify(&value, &proof, contract, user)
            .unwrap();

        assert_eq!(verified.value(), &value);
        assert_eq!(verified.context(), &context);
        assert_eq!(verified.ciphertext(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_wrong_contract_rejected() {
        let contract_a = Address::repeat_byte(0xaa);
        let contract_b = Address::repeat_byte(0xcc);
        let user = Address::repeat_byte(0xbb);
        let (value, proof) = bound_input(&InputContext::new(contract_a, user, CHAIN_ID));

        let result = ProofVerifier::new(CHAIN_ID).verify(&value, &proof, contract_b, user);
        assert!(matches!(result, Err(GatewayError::ProofVerificationFailed(_))));
    }

    #[test]
    fn test_wrong_user_rejected() {
        let contract = Address::repeat_byte(0xaa);
        let alice = Address::repeat_byte(0x01);
        let bob = Address::repeat_byte(0x02);
        let (value, proof) = bound_input(&InputContext::new(contract, alice, CHAIN_ID));

        let result = ProofVerifier::new(CHAIN_ID).verify(&value, &proof, contract, bob);
        assert!(matches!(result, Err(GatewayError::ProofVerificationFailed(_))));
    }

    #[test]
    fn test_wrong_chain_rejected() {
        let contract = Address::repeat_byte(0xaa);
        let user = Address::repeat_byte(0xbb);
        let (value, proof) = bound_input(&InputContext::new(contract, user, CHAIN_ID));

        let result = ProofVerifier::new(1).verify(&value, &proof, contract, user);
        assert!(matches!(result, Err(GatewayError::ProofVerificationFailed(_))));
    }

    #[test]
    fn test_proof_from_other_ciphertext_rejected() {
        let contract = Address::repeat_byte(0xaa);
        let user = Address::repeat_byte(0xbb);
        let context = InputContext::new(contract, user, CHAIN_ID);
        let (value, _) = bound_input(&context);

        let other_proof = encode_input_proof(
            B256::repeat_byte(0x22),
            FheType::Euint32,
            Bytes::from(vec![1, 2, 3, 4]),
        )
        .unwrap();

        let result = ProofVerifier::new(CHAIN_ID).verify(&value, &other_proof, contract, user);
        assert!(matches!(result, Err(GatewayError::ProofVerificationFailed(_))));
    }

    #[test]
    fn test_garbage_proof_rejected() {
        let contract = Address::repeat_byte(0xaa);
        let user = Address::repeat_byte(0xbb);
        let (value, _) = bound_input(&InputContext::new(contract, user, CHAIN_ID));
        let garbage = InputProof::new(vec![0x42u8; 7]).unwrap();

        let result = ProofVerifier::new(CHAIN_ID).verify(&value, &garbage, contract, user);
        assert!(matches!(result, Err(GatewayError::ProofVerificationFailed(_))));
    }
}
