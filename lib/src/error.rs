use crate::handle::FheType;
use alloy_primitives::B256;
use thiserror::Error;

/// Errors surfaced by the confidential balance protocol.
///
/// Messages never carry plaintext values or partial decryption results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The encryption backend could not be initialized or is unreachable
    #[error("Encryption backend unavailable: {0}")]
    EncryptionBackendUnavailable(String),

    /// Plaintext does not fit the declared bit width
    #[error("Value {value} does not fit in {fhe_type} (max {max})")]
    InvalidInputRange { value: u64, fhe_type: FheType, max: u64 },

    /// Proof does not bind the handle to the expected context
    #[error("Proof verification failed: {0}")]
    ProofVerificationFailed(String),

    /// Decryption denied; deliberately carries no detail about the value
    #[error("Unauthorized decryption")]
    UnauthorizedDecryption,

    /// Submission to the ledger service failed in transport
    #[error("Network submission failed: {0}")]
    NetworkSubmissionFailed(String),

    /// `applyRate` before any `addPayment`
    #[error("Operation requires an initialized balance")]
    OperationOnUninitializedBalance,

    /// Handle is zero, carries an unknown type tag or an unsupported version
    #[error("Invalid ciphertext handle: {0}")]
    InvalidHandle(String),

    /// Proof bytes are empty or structurally invalid
    #[error("Invalid input proof: {0}")]
    InvalidProof(String),

    /// Operands of different bit widths
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: FheType, found: FheType },

    /// The backend holds no ciphertext for this handle
    #[error("Unknown ciphertext for handle {0}")]
    UnknownCiphertext(B256),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing or signature parsing failed
    #[error("Signer error: {0}")]
    Signer(String),
}

/// Result type alias for protocol operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Whether the caller may resubmit. The protocol itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkSubmissionFailed(_) | Self::EncryptionBackendUnavailable(_)
        )
    }

    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::EncryptionBackendUnavailable(_) => "ENCRYPTION_BACKEND_UNAVAILABLE",
            Self::InvalidInputRange { .. } => "INVALID_INPUT_RANGE",
            Self::ProofVerificationFailed(_) => "PROOF_VERIFICATION_FAILED",
            Self::UnauthorizedDecryption => "UNAUTHORIZED_DECRYPTION",
            Self::NetworkSubmissionFailed(_) => "NETWORK_SUBMISSION_FAILED",
            Self::OperationOnUninitializedBalance => "OPERATION_ON_UNINITIALIZED_BALANCE",
            Self::InvalidHandle(_) => "INVALID_HANDLE",
            Self::InvalidProof(_) => "INVALID_PROOF",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::UnknownCiphertext(_) => "UNKNOWN_CIPHERTEXT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Signer(_) => "SIGNER_ERROR",
        }
    }

    /// Reverse of [`Self::error_code`] for errors relayed over HTTP.
    ///
    /// `message` is the error's display string. Payloads are recovered from
    /// it; a message that does not parse for a structured variant yields
    /// `None`.
    #[must_use]
    pub fn from_code(code: &str, message: String) -> Option<Self> {
        let error = match code {
            "ENCRYPTION_BACKEND_UNAVAILABLE" => Self::EncryptionBackendUnavailable(detail(
                message,
                "Encryption backend unavailable: ",
            )),
            "INVALID_INPUT_RANGE" => {
                let rest = message.strip_prefix("Value ")?;
                let (value, rest) = rest.split_once(" does not fit in ")?;
                let (fhe_type, max) = rest.strip_suffix(')')?.split_once(" (max ")?;
                Self::InvalidInputRange {
                    value: value.parse().ok()?,
                    fhe_type: fhe_type.parse().ok()?,
                    max: max.parse().ok()?,
                }
            }
            "PROOF_VERIFICATION_FAILED" => {
                Self::ProofVerificationFailed(detail(message, "Proof verification failed: "))
            }
            "UNAUTHORIZED_DECRYPTION" => Self::UnauthorizedDecryption,
            "NETWORK_SUBMISSION_FAILED" => {
                Self::NetworkSubmissionFailed(detail(message, "Network submission failed: "))
            }
            "OPERATION_ON_UNINITIALIZED_BALANCE" => Self::OperationOnUninitializedBalance,
            "INVALID_HANDLE" => Self::InvalidHandle(detail(message, "Invalid ciphertext handle: ")),
            "INVALID_PROOF" => Self::InvalidProof(detail(message, "Invalid input proof: ")),
            "TYPE_MISMATCH" => {
                let rest = message.strip_prefix("Type mismatch: expected ")?;
                let (expected, found) = rest.split_once(", found ")?;
                Self::TypeMismatch {
                    expected: expected.parse().ok()?,
                    found: found.parse().ok()?,
                }
            }
            "UNKNOWN_CIPHERTEXT" => Self::UnknownCiphertext(
                message
                    .strip_prefix("Unknown ciphertext for handle ")?
                    .parse()
                    .ok()?,
            ),
            "CONFIG_ERROR" => Self::Config(detail(message, "Configuration error: ")),
            "SIGNER_ERROR" => Self::Signer(detail(message, "Signer error: ")),
            _ => return None,
        };
        Some(error)
    }
}

fn detail(message: String, prefix: &str) -> String {
    match message.strip_prefix(prefix) {
        Some(rest) => rest.to_string(),
        None => message,
    }
}

impl From<alloy_signer::Error> for GatewayError {
    fn from(err: alloy_signer::Error) -> Self {
        Self::Signer(err.to_string())
    }
}

impl From<hex::FromHexError> for GatewayError {
    fn from(err: hex::FromHexError) -> Self {
        Self::Config(format!("Invalid hex: {err}"))
    }
}
