#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::uninlined_format_args)]

// Ledger state machine and the read path guarding it
pub mod acl;
pub mod balance;
pub mod decryption;
pub mod ledger;

#[cfg(test)]
mod test_utils;

pub use acl::AccessControlList;
pub use balance::HomomorphicOperation;
pub use decryption::{
    Clock, DecryptionAuthorizationService, DecryptionGrant, ManualClock, SystemClock,
};
pub use ledger::{ConfidentialLedger, LedgerEvent, TransactionReceipt};
