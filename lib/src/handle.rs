//! Ciphertext handles, input proofs and the per-user balance state.
//!
//! A handle is a 32-byte reference to a ciphertext held by the encryption
//! backend. Its trailing bytes carry metadata so that a handle can be
//! validated without consulting the backend:
//!
//! | bytes    | content                       |
//! |----------|-------------------------------|
//! | `0..22`  | digest of the binding context |
//! | `22..30` | chain id, big-endian          |
//! | `30`     | [`FheType`] tag               |
//! | `31`     | handle version                |

use crate::error::{GatewayError, GatewayResult};
use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current handle layout version
pub const HANDLE_VERSION: u8 = 0;

const CHAIN_ID_OFFSET: usize = 22;
const TYPE_OFFSET: usize = 30;
const VERSION_OFFSET: usize = 31;

/// Bit width of an encrypted unsigned integer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum FheType {
    Euint8,
    Euint16,
    #[default]
    Euint32,
    Euint64,
}

impl FheType {
    /// Tag stored in byte 30 of every handle of this type
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Euint8 => 2,
            Self::Euint16 => 3,
            Self::Euint32 => 4,
            Self::Euint64 => 5,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            2 => Some(Self::Euint8),
            3 => Some(Self::Euint16),
            4 => Some(Self::Euint32),
            5 => Some(Self::Euint64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Euint8 => 8,
            Self::Euint16 => 16,
            Self::Euint32 => 32,
            Self::Euint64 => 64,
        }
    }

    /// Ciphertext length produced by the local backend
    #[must_use]
    pub const fn byte_len(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Largest plaintext, `2^W - 1`
    #[must_use]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::Euint64 => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }

    /// Reject plaintexts that do not fit the width.
    pub fn check_range(self, value: u64) -> GatewayResult<u64> {
        if value > self.max_value() {
            return Err(GatewayError::InvalidInputRange {
                value,
                fhe_type: self,
                max: self.max_value(),
            });
        }
        Ok(value)
    }

    /// Addition modulo `2^W`
    #[must_use]
    pub const fn wrapping_add(self, lhs: u64, rhs: u64) -> u64 {
        lhs.wrapping_add(rhs) & self.max_value()
    }

    /// Multiplication modulo `2^W`
    #[must_use]
    pub const fn wrapping_mul(self, lhs: u64, rhs: u64) -> u64 {
        lhs.wrapping_mul(rhs) & self.max_value()
    }
}

impl fmt::Display for FheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "euint{}", self.bits())
    }
}

impl FromStr for FheType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "euint8" => Ok(Self::Euint8),
            "euint16" => Ok(Self::Euint16),
            "euint32" => Ok(Self::Euint32),
            "euint64" => Ok(Self::Euint64),
            other => Err(GatewayError::Config(format!("Unknown encrypted type: {other}"))),
        }
    }
}

/// Write chain id, type tag and version into the tail of `digest`.
#[must_use]
pub fn stamp_handle(digest: B256, chain_id: u64, fhe_type: FheType) -> B256 {
    let mut bytes = digest.0;
    bytes[CHAIN_ID_OFFSET..TYPE_OFFSET].copy_from_slice(&chain_id.to_be_bytes());
    bytes[TYPE_OFFSET] = fhe_type.tag();
    bytes[VERSION_OFFSET] = HANDLE_VERSION;
    B256::from(bytes)
}

/// An immutable reference to a ciphertext of a known bit width.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "B256", into = "B256")]
pub struct EncryptedValue {
    handle: B256,
    fhe_type: FheType,
}

impl EncryptedValue {
    /// Validate a raw handle.
    ///
    /// The all-zero handle is the uninitialized sentinel and is never a value.
    pub fn from_handle(handle: B256) -> GatewayResult<Self> {
        if handle == B256::ZERO {
            return Err(GatewayError::InvalidHandle(
                "zero handle is reserved for uninitialized balances".to_string(),
            ));
        }

        if handle[VERSION_OFFSET] != HANDLE_VERSION {
            return Err(GatewayError::InvalidHandle(format!(
                "unsupported handle version {}",
                handle[VERSION_OFFSET]
            )));
        }

        let fhe_type = FheType::from_tag(handle[TYPE_OFFSET]).ok_or_else(|| {
            GatewayError::InvalidHandle(format!("unknown type tag {}", handle[TYPE_OFFSET]))
        })?;

        Ok(Self { handle, fhe_type })
    }

    #[must_use]
    pub const fn handle(&self) -> B256 {
        self.handle
    }

    #[must_use]
    pub const fn fhe_type(&self) -> FheType {
        self.fhe_type
    }

    /// Chain the handle was produced on
    #[must_use]
    pub fn chain_id(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.handle[CHAIN_ID_OFFSET..TYPE_OFFSET]);
        u64::from_be_bytes(raw)
    }
}

impl TryFrom<B256> for EncryptedValue {
    type Error = GatewayError;

    fn try_from(handle: B256) -> GatewayResult<Self> {
        Self::from_handle(handle)
    }
}

impl From<EncryptedValue> for B256 {
    fn from(value: EncryptedValue) -> Self {
        value.handle
    }
}

impl fmt::Display for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fhe_type, self.handle)
    }
}

/// Opaque proof bytes binding a handle to (contract, user, chain).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Bytes", into = "Bytes")]
pub struct InputProof(Bytes);

impl InputProof {
    pub fn new(bytes: impl Into<Bytes>) -> GatewayResult<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(GatewayError::InvalidProof("proof is empty".to_string()));
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Bytes> for InputProof {
    type Error = GatewayError;

    fn try_from(bytes: Bytes) -> GatewayResult<Self> {
        Self::new(bytes)
    }
}

impl From<InputProof> for Bytes {
    fn from(proof: InputProof) -> Self {
        proof.0
    }
}

/// The (contract, user, chain) triple an input is bound to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputContext {
    pub contract: Address,
    pub user: Address,
    pub chain_id: u64,
}

impl InputContext {
    #[must_use]
    pub const fn new(contract: Address, user: Address, chain_id: u64) -> Self {
        Self {
            contract,
            user,
            chain_id,
        }
    }
}

/// Per-user balance: never written, or an active ciphertext.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "B256", into = "B256")]
pub enum EncryptedBalance {
    #[default]
    Uninitialized,
    Active(EncryptedValue),
}

impl EncryptedBalance {
    /// Wire representation of [`EncryptedBalance::Uninitialized`]
    pub const SENTINEL: B256 = B256::ZERO;

    pub fn from_handle(handle: B256) -> GatewayResult<Self> {
        if handle == Self::SENTINEL {
            return Ok(Self::Uninitialized);
        }
        EncryptedValue::from_handle(handle).map(Self::Active)
    }

    #[must_use]
    pub const fn handle(&self) -> B256 {
        match self {
            Self::Uninitialized => Self::SENTINEL,
            Self::Active(value) => value.handle(),
        }
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    #[must_use]
    pub const fn value(&self) -> Option<&EncryptedValue> {
        match self {
            Self::Uninitialized => None,
            Self::Active(value) => Some(value),
        }
    }
}

impl TryFrom<B256> for EncryptedBalance {
    type Error = GatewayError;

    fn try_from(handle: B256) -> GatewayResult<Self> {
        Self::from_handle(handle)
    }
}

impl From<EncryptedBalance> for B256 {
    fn from(balance: EncryptedBalance) -> Self {
        balance.handle()
    }
}
