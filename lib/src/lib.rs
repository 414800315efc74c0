#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::uninlined_format_args)]

use alloy_sol_types::sol;

pub mod authorization;
pub mod backend;
pub mod config;
pub mod encryption;
pub mod error;
pub mod handle;
pub mod local;
pub mod proof;

pub use authorization::{DecryptionAuthorization, SignedAuthorization};
pub use backend::{BackendLoader, HomomorphicEvaluator, InputEncryptor, KeyManagement};
pub use config::GatewayConfig;
pub use encryption::EncryptionClient;
pub use error::{GatewayError, GatewayResult};
pub use handle::{EncryptedBalance, EncryptedValue, FheType, InputContext, InputProof};
pub use local::{LocalCoprocessor, LocalEncryptor, LocalKeyLoader, NetworkKey};
pub use proof::{ProofVerifier, VerifiedInput};

sol! {
    /// ABI layout of the bytes carried inside an [`InputProof`].
    struct InputProofPayload {
        uint8 version;
        uint8 fheType;
        bytes32 nonce;
        bytes ciphertext;
    }

    /// Everything an input handle commits to. Changing any field changes the handle.
    struct InputBinding {
        bytes32 ciphertextDigest;
        bytes32 nonce;
        uint8 fheType;
        address contractAddress;
        address userAddress;
        uint256 chainId;
    }

    /// Derivation input for handles produced by homomorphic computation.
    struct ComputationBinding {
        uint8 opcode;
        bytes32 lhs;
        bytes32 rhs;
        uint64 sequence;
    }

    /// EIP-712 message a balance owner signs to read one of their ciphertexts.
    struct UserDecryptRequest {
        bytes32 handle;
        address contractAddress;
        address user;
        uint64 startTimestamp;
        uint64 durationSeconds;
        bytes32 nonce;
    }
}
