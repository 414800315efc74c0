//! EIP-712 user decryption authorizations.
//!
//! The owner of a balance signs a [`UserDecryptRequest`] naming the handle,
//! the ledger contract, a validity window and a one-time nonce. The domain
//! binds the signature to one contract on one chain.

use crate::error::{GatewayError, GatewayResult};
use crate::UserDecryptRequest;
use alloy_primitives::{Address, Bytes, Signature, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{eip712_domain, Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};

/// EIP-712 domain name used for decryption requests
pub const DOMAIN_NAME: &str = "ConfidentialGateway";
/// EIP-712 domain version
pub const DOMAIN_VERSION: &str = "1";

/// The unsigned body of a decryption request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionAuthorization {
    pub handle: B256,
    pub contract_address: Address,
    pub user: Address,
    pub start_timestamp: u64,
    pub duration_seconds: u64,
    pub nonce: B256,
}

impl DecryptionAuthorization {
    /// Authorization starting at `start_timestamp` with a fresh random nonce.
    #[must_use]
    pub fn new(
        handle: B256,
        contract_address: Address,
        user: Address,
        start_timestamp: u64,
        duration_seconds: u64,
    ) -> Self {
        Self {
            handle,
            contract_address,
            user,
            start_timestamp,
            duration_seconds,
            nonce: B256::random(),
        }
    }

    /// Unix time after which the authorization is no longer valid
    #[must_use]
    pub const fn expires_at(&self) -> u64 {
        self.start_timestamp.saturating_add(self.duration_seconds)
    }

    #[must_use]
    pub fn domain(&self, chain_id: u64) -> Eip712Domain {
        eip712_domain! {
            name: DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id: chain_id,
            verifying_contract: self.contract_address,
        }
    }

    #[must_use]
    pub fn to_typed_data(&self) -> UserDecryptRequest {
        UserDecryptRequest {
            handle: self.handle,
            contractAddress: self.contract_address,
            user: self.user,
            startTimestamp: self.start_timestamp,
            durationSeconds: self.duration_seconds,
            nonce: self.nonce,
        }
    }

    /// Digest the owner signs
    #[must_use]
    pub fn signing_hash(&self, chain_id: u64) -> B256 {
        self.to_typed_data()
            .eip712_signing_hash(&self.domain(chain_id))
    }

    pub fn sign(
        self,
        signer: &PrivateKeySigner,
        chain_id: u64,
    ) -> GatewayResult<SignedAuthorization> {
        let signature = signer.sign_hash_sync(&self.signing_hash(chain_id))?;
        Ok(SignedAuthorization {
            authorization: self,
            signature: Bytes::from(signature.as_bytes().to_vec()),
        })
    }
}

/// A [`DecryptionAuthorization`] plus the owner's 65-byte signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAuthorization {
    pub authorization: DecryptionAuthorization,
    pub signature: Bytes,
}

impl SignedAuthorization {
    /// Address that produced the signature over this authorization.
    pub fn recover_signer(&self, chain_id: u64) -> GatewayResult<Address> {
        let signature = Signature::from_raw(&self.signature)
            .map_err(|e| GatewayError::Signer(format!("Invalid signature: {e}")))?;

        signature
            .recover_address_from_prehash(&self.authorization.signing_hash(chain_id))
            .map_err(|e| GatewayError::Signer(format!("Signature recovery failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN_ID: u64 = 31_337;

    fn authorization(user: Address) -> DecryptionAuthorization {
        DecryptionAuthorization::new(
            B256::repeat_byte(0x44),
            Address::repeat_byte(0xaa),
            user,
            1_700_000_000,
            600,
        )
    }

    #[test]
    fn test_sign_and_recover() {
        let signer = PrivateKeySigner::random();
        let signed = authorization(signer.address())
            .sign(&signer, CHAIN_ID)
            .unwrap();

        assert_eq!(signed.signature.len(), 65);
        assert_eq!(signed.recover_signer(CHAIN_ID).unwrap(), signer.address());
    }

    #[test]
    fn test_tampered_body_changes_signer() {
        let signer = PrivateKeySigner::random();
        let mut signed = authorization(signer.address())
            .sign(&signer, CHAIN_ID)
            .unwrap();

        signed.authorization.duration_seconds = 86_400;
        let recovered = signed.recover_signer(CHAIN_ID).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn test_domain_binds_chain() {
        let signer = PrivateKeySigner::random();
        let signed = authorization(signer.address())
            .sign(&signer, CHAIN_ID)
            .unwrap();

        assert_ne!(signed.recover_signer(1).unwrap(), signer.address());
    }

    #[test]
    fn test_malformed_signature() {
        let signer = PrivateKeySigner::random();
        let mut signed = authorization(signer.address())
            .sign(&signer, CHAIN_ID)
            .unwrap();
        signed.signature = Bytes::from(vec![0u8; 12]);

        assert!(matches!(
            signed.recover_signer(CHAIN_ID),
            Err(GatewayError::Signer(_))
        ));
    }

    #[test]
    fn test_expiry_saturates() {
        let mut auth = authorization(Address::ZERO);
        assert_eq!(auth.expires_at(), 1_700_000_600);

        auth.duration_seconds = u64::MAX;
        assert_eq!(auth.expires_at(), u64::MAX);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(authorization(Address::ZERO)).unwrap();
        assert!(json.get("contract_address").is_some());
        assert!(json.get("duration_seconds").is_some());
    }
}
