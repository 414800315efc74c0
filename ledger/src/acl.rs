use alloy_primitives::{Address, B256};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Which accounts may have a ciphertext decrypted on their behalf.
///
/// Entries are only ever added. A handle is immutable, so access granted to
/// one handle never leaks to the balance that replaces it.
#[derive(Debug, Default)]
pub struct AccessControlList {
    entries: RwLock<HashMap<B256, HashSet<Address>>>,
}

impl AccessControlList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, handle: B256, account: Address) {
        self.entries.write().entry(handle).or_default().insert(account);
    }

    #[must_use]
    pub fn is_allowed(&self, handle: B256, account: Address) -> bool {
        self.entries
            .read()
            .get(&handle)
            .is_some_and(|accounts| accounts.contains(&account))
    }

    /// Number of handles with at least one entry
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
