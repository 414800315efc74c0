//! Balance transitions.
//!
//! | current         | operation  | next                          |
//! |-----------------|------------|-------------------------------|
//! | `Uninitialized` | `Add`      | `Active(incoming)`            |
//! | `Uninitialized` | `Multiply` | rejected                      |
//! | `Active(b)`     | `Add`      | `Active(b + incoming)`        |
//! | `Active(b)`     | `Multiply` | `Active(b * incoming)`        |
//!
//! Once active a balance never returns to `Uninitialized`.

use gateway_lib::{
    EncryptedBalance, EncryptedValue, GatewayError, GatewayResult, HomomorphicEvaluator,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomomorphicOperation {
    Add,
    Multiply,
}

impl HomomorphicOperation {
    /// Whether the operation can start from `current` at all.
    ///
    /// Checked before the incoming ciphertext is handed to the evaluator.
    pub fn check(self, current: &EncryptedBalance) -> GatewayResult<()> {
        match (self, current) {
            (Self::Multiply, EncryptedBalance::Uninitialized) => {
                Err(GatewayError::OperationOnUninitializedBalance)
            }
            _ => Ok(()),
        }
    }

    /// Compute the next committed value. Neither input is modified.
    pub fn apply(
        self,
        evaluator: &dyn HomomorphicEvaluator,
        current: &EncryptedBalance,
        incoming: &EncryptedValue,
    ) -> GatewayResult<EncryptedValue> {
        self.check(current)?;

        match (self, current) {
            (Self::Add, EncryptedBalance::Uninitialized) => Ok(*incoming),
            (Self::Add, EncryptedBalance::Active(balance)) => evaluator.add(balance, incoming),
            (Self::Multiply, EncryptedBalance::Active(balance)) => evaluator.mul(balance, incoming),
            (Self::Multiply, EncryptedBalance::Uninitialized) => {
                Err(GatewayError::OperationOnUninitializedBalance)
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Multiply => "multiply",
        }
    }

    /// Byte recorded in transaction hashes
    pub(crate) const fn code(self) -> u8 {
        match self {
            Self::Add => 0,
            Self::Multiply => 1,
        }
    }
}

impl fmt::Display for HomomorphicOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
