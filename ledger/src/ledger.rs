//! The confidential ledger: one opaque balance per user.
//!
//! Writers for the same user queue on that user's async mutex, so every
//! accepted operation composes with the state committed just before it.
//! Users never contend with each other. The committed balance itself sits
//! behind a short synchronous lock and is replaced in a single write, which
//! is what readers observe.

use crate::acl::AccessControlList;
use crate::balance::HomomorphicOperation;
use alloy_primitives::{keccak256, Address, B256};
use chrono::{DateTime, Utc};
use gateway_lib::{
    EncryptedBalance, EncryptedValue, FheType, GatewayError, GatewayResult, HomomorphicEvaluator,
    InputProof, ProofVerifier,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Record of one committed operation. Carries handles only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: B256,
    pub sequence: u64,
    pub operation: HomomorphicOperation,
    pub contract: Address,
    pub caller: Address,
    pub input_handle: B256,
    pub balance_handle: B256,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    BalanceUpdated {
        user: Address,
        operation: HomomorphicOperation,
        balance_handle: B256,
        sequence: u64,
    },
}

#[derive(Debug, Default)]
struct Account {
    writer: tokio::sync::Mutex<()>,
    committed: RwLock<EncryptedBalance>,
}

pub struct ConfidentialLedger {
    address: Address,
    verifier: ProofVerifier,
    evaluator: Arc<dyn HomomorphicEvaluator>,
    balance_type: FheType,
    accounts: RwLock<HashMap<Address, Arc<Account>>>,
    acl: AccessControlList,
    consumed: Mutex<HashSet<B256>>,
    sequence: AtomicU64,
    events: broadcast::Sender<LedgerEvent>,
}

impl ConfidentialLedger {
    #[must_use]
    pub fn new(address: Address, chain_id: u64, evaluator: Arc<dyn HomomorphicEvaluator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            address,
            verifier: ProofVerifier::new(chain_id),
            evaluator,
            balance_type: FheType::Euint32,
            accounts: RwLock::new(HashMap::new()),
            acl: AccessControlList::new(),
            consumed: Mutex::new(HashSet::new()),
            sequence: AtomicU64::new(0),
            events,
        }
    }

    #[must_use]
    pub fn with_balance_type(mut self, balance_type: FheType) -> Self {
        self.balance_type = balance_type;
        self
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn chain_id(&self) -> u64 {
        self.verifier.chain_id()
    }

    pub const fn balance_type(&self) -> FheType {
        self.balance_type
    }

    pub const fn acl(&self) -> &AccessControlList {
        &self.acl
    }

    /// Number of operations committed so far
    pub fn committed_operations(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Add an encrypted amount to the caller's balance.
    ///
    /// The first payment initializes the balance to the incoming value.
    pub async fn add_payment(
        &self,
        caller: Address,
        handle: B256,
        proof: &InputProof,
    ) -> GatewayResult<TransactionReceipt> {
        self.submit(caller, HomomorphicOperation::Add, handle, proof)
            .await
    }

    /// Multiply the caller's balance by an encrypted rate.
    ///
    /// Fails with `OperationOnUninitializedBalance` before any payment.
    pub async fn apply_rate(
        &self,
        caller: Address,
        handle: B256,
        proof: &InputProof,
    ) -> GatewayResult<TransactionReceipt> {
        self.submit(caller, HomomorphicOperation::Multiply, handle, proof)
            .await
    }

    /// Current balance handle of `user`. No authorization required.
    pub fn get_encrypted_balance(&self, user: Address) -> EncryptedBalance {
        self.accounts
            .read()
            .get(&user)
            .map(|account| *account.committed.read())
            .unwrap_or_default()
    }

    #[instrument(skip(self, proof), fields(contract = %self.address))]
    async fn submit(
        &self,
        caller: Address,
        operation: HomomorphicOperation,
        handle: B256,
        proof: &InputProof,
    ) -> GatewayResult<TransactionReceipt> {
        let incoming = EncryptedValue::from_handle(handle)?;
        if incoming.fhe_type() != self.balance_type {
            return Err(GatewayError::TypeMismatch {
                expected: self.balance_type,
                found: incoming.fhe_type(),
            });
        }

        let verified = self
            .verifier
            .verify(&incoming, proof, self.address, caller)?;

        let account = self.account(caller);
        let _writer = account.writer.lock().await;

        // Inputs are bound to their caller, so a replay can only race with
        // itself under this same lock.
        if self.consumed.lock().contains(&handle) {
            return Err(GatewayError::ProofVerificationFailed(
                "input has already been consumed".to_string(),
            ));
        }

        let current = *account.committed.read();
        operation.check(&current)?;

        let incoming = self.evaluator.ingest(&verified)?;
        let next = operation.apply(self.evaluator.as_ref(), &current, &incoming)?;

        self.consumed.lock().insert(handle);
        self.acl.allow(next.handle(), caller);
        self.acl.allow(next.handle(), self.address);
        *account.committed.write() = EncryptedBalance::Active(next);

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let receipt = TransactionReceipt {
            tx_hash: self.tx_hash(sequence, operation, caller, handle, next.handle()),
            sequence,
            operation,
            contract: self.address,
            caller,
            input_handle: handle,
            balance_handle: next.handle(),
            timestamp: Utc::now(),
        };

        // No subscribers is not an error
        let _ = self.events.send(LedgerEvent::BalanceUpdated {
            user: caller,
            operation,
            balance_handle: next.handle(),
            sequence,
        });

        info!(
            "✅ {} committed for {} (seq {}, balance {})",
            operation, caller, sequence, receipt.balance_handle
        );
        Ok(receipt)
    }

    fn account(&self, user: Address) -> Arc<Account> {
        if let Some(account) = self.accounts.read().get(&user) {
            return Arc::clone(account);
        }

        debug!("Opening account for {}", user);
        Arc::clone(self.accounts.write().entry(user).or_default())
    }

    fn tx_hash(
        &self,
        sequence: u64,
        operation: HomomorphicOperation,
        caller: Address,
        input: B256,
        balance: B256,
    ) -> B256 {
        let mut preimage = Vec::with_capacity(20 + 8 + 1 + 20 + 32 + 32);
        preimage.extend_from_slice(self.address.as_slice());
        preimage.extend_from_slice(&sequence.to_be_bytes());
        preimage.push(operation.code());
        preimage.extend_from_slice(caller.as_slice());
        preimage.extend_from_slice(input.as_slice());
        preimage.extend_from_slice(balance.as_slice());
        keccak256(preimage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Fixture, CHAIN_ID};
    use gateway_lib::config::DEV_CONTRACT_ADDRESS;
    use gateway_lib::{KeyManagement, LocalCoprocessor, VerifiedInput};
    use std::sync::atomic::AtomicBool;
    use tokio::sync::broadcast::error::TryRecvError;
    use tracing_test::traced_test;

    async fn decrypt(fixture: &Fixture, user: Address) -> u64 {
        let balance = fixture.ledger.get_encrypted_balance(user);
        let value = balance.value().expect("balance is initialized");
        fixture.coprocessor.decrypt(value).await.unwrap()
    }

    async fn pay(
        fixture: &Fixture,
        user: Address,
        value: u64,
    ) -> GatewayResult<TransactionReceipt> {
        let input = fixture.input(value, user);
        fixture
            .ledger
            .add_payment(user, input.value.handle(), &input.proof)
            .await
    }

    async fn rate(
        fixture: &Fixture,
        user: Address,
        value: u64,
    ) -> GatewayResult<TransactionReceipt> {
        let input = fixture.input(value, user);
        fixture
            .ledger
            .apply_rate(user, input.value.handle(), &input.proof)
            .await
    }

    #[tokio::test]
    #[traced_test]
    async fn test_first_payment_initializes_balance() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);

        let receipt = pay(&fixture, alice, 42).await.unwrap();

        assert_eq!(receipt.sequence, 1);
        assert_eq!(receipt.operation, HomomorphicOperation::Add);
        assert_eq!(
            fixture.ledger.get_encrypted_balance(alice).handle(),
            receipt.balance_handle
        );
        assert_eq!(decrypt(&fixture, alice).await, 42);
        assert!(logs_contain("add committed"));
    }

    #[tokio::test]
    async fn test_payments_accumulate() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);

        pay(&fixture, alice, 100).await.unwrap();
        pay(&fixture, alice, 23).await.unwrap();

        assert_eq!(decrypt(&fixture, alice).await, 123);
    }

    #[tokio::test]
    async fn test_payments_wrap_modulo_width() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);

        pay(&fixture, alice, u64::from(u32::MAX)).await.unwrap();
        pay(&fixture, alice, 2).await.unwrap();

        assert_eq!(decrypt(&fixture, alice).await, 1);
    }

    #[tokio::test]
    async fn test_rate_multiplies_balance() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);

        pay(&fixture, alice, 10).await.unwrap();
        let receipt = rate(&fixture, alice, 2).await.unwrap();

        assert_eq!(receipt.operation, HomomorphicOperation::Multiply);
        assert_eq!(decrypt(&fixture, alice).await, 20);
    }

    #[tokio::test]
    async fn test_rate_on_uninitialized_balance_rejected() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);

        let result = rate(&fixture, alice, 2).await;

        assert_eq!(result, Err(GatewayError::OperationOnUninitializedBalance));
        assert_eq!(
            fixture.ledger.get_encrypted_balance(alice),
            EncryptedBalance::Uninitialized
        );
        assert_eq!(fixture.ledger.committed_operations(), 0);
    }

    #[test]
    fn test_untouched_user_reads_sentinel() {
        let fixture = Fixture::new();
        let balance = fixture.ledger.get_encrypted_balance(Address::repeat_byte(9));

        assert_eq!(balance, EncryptedBalance::Uninitialized);
        assert_eq!(balance.handle(), B256::ZERO);
    }

    #[tokio::test]
    async fn test_proof_for_other_contract_rejected() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);
        let other_contract = Address::repeat_byte(0xee);
        let input = fixture.input_for(5, other_contract, alice);

        let result = fixture
            .ledger
            .add_payment(alice, input.value.handle(), &input.proof)
            .await;

        assert!(matches!(result, Err(GatewayError::ProofVerificationFailed(_))));
        assert!(!fixture.ledger.get_encrypted_balance(alice).is_initialized());
    }

    #[tokio::test]
    async fn test_proof_submitted_by_other_user_rejected() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);
        let mallory = Address::repeat_byte(6);
        let input = fixture.input(5, alice);

        let result = fixture
            .ledger
            .add_payment(mallory, input.value.handle(), &input.proof)
            .await;

        assert!(matches!(result, Err(GatewayError::ProofVerificationFailed(_))));
    }

    #[tokio::test]
    async fn test_replayed_input_rejected() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);
        let input = fixture.input(5, alice);

        fixture
            .ledger
            .add_payment(alice, input.value.handle(), &input.proof)
            .await
            .unwrap();
        let replay = fixture
            .ledger
            .add_payment(alice, input.value.handle(), &input.proof)
            .await;

        assert!(matches!(replay, Err(GatewayError::ProofVerificationFailed(_))));
        assert_eq!(decrypt(&fixture, alice).await, 5);
    }

    #[tokio::test]
    async fn test_wrong_type_rejected() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);
        let input = fixture.input(5, alice);

        let ledger = ConfidentialLedger::new(
            fixture.contract(),
            crate::test_utils::CHAIN_ID,
            fixture.coprocessor.clone(),
        )
        .with_balance_type(FheType::Euint64);

        let result = ledger
            .add_payment(alice, input.value.handle(), &input.proof)
            .await;
        assert_eq!(
            result,
            Err(GatewayError::TypeMismatch {
                expected: FheType::Euint64,
                found: FheType::Euint32,
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_payments_compose() {
        let fixture = Arc::new(Fixture::new());
        let alice = Address::repeat_byte(1);

        let tasks: Vec<_> = (1..=20u64)
            .map(|v| {
                let fixture = Arc::clone(&fixture);
                tokio::spawn(async move { pay(&fixture, alice, v).await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(decrypt(&fixture, alice).await, 210);
        assert_eq!(fixture.ledger.committed_operations(), 20);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);

        pay(&fixture, alice, 7).await.unwrap();
        pay(&fixture, bob, 9).await.unwrap();
        rate(&fixture, bob, 3).await.unwrap();

        assert_eq!(decrypt(&fixture, alice).await, 7);
        assert_eq!(decrypt(&fixture, bob).await, 27);
    }

    #[tokio::test]
    async fn test_commit_grants_owner_access() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);

        let receipt = pay(&fixture, alice, 7).await.unwrap();

        let acl = fixture.ledger.acl();
        assert!(acl.is_allowed(receipt.balance_handle, alice));
        assert!(acl.is_allowed(receipt.balance_handle, fixture.contract()));
        assert!(!acl.is_allowed(receipt.balance_handle, bob));
    }

    #[tokio::test]
    async fn test_events_published() {
        let fixture = Fixture::new();
        let alice = Address::repeat_byte(1);
        let mut events = fixture.ledger.subscribe();

        let receipt = pay(&fixture, alice, 7).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            LedgerEvent::BalanceUpdated {
                user: alice,
                operation: HomomorphicOperation::Add,
                balance_handle: receipt.balance_handle,
                sequence: 1,
            }
        );
    }

    /// Local coprocessor whose arithmetic can be switched off
    struct FlakyEvaluator {
        inner: Arc<LocalCoprocessor>,
        failing: AtomicBool,
    }

    impl FlakyEvaluator {
        fn check(&self) -> GatewayResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(GatewayError::EncryptionBackendUnavailable(
                    "coprocessor offline".to_string(),
                ));
            }
            Ok(())
        }
    }

    impl HomomorphicEvaluator for FlakyEvaluator {
        fn ingest(&self, input: &VerifiedInput) -> GatewayResult<EncryptedValue> {
            self.inner.ingest(input)
        }

        fn add(&self, lhs: &EncryptedValue, rhs: &EncryptedValue) -> GatewayResult<EncryptedValue> {
            self.check()?;
            self.inner.add(lhs, rhs)
        }

        fn mul(&self, lhs: &EncryptedValue, rhs: &EncryptedValue) -> GatewayResult<EncryptedValue> {
            self.check()?;
            self.inner.mul(lhs, rhs)
        }
    }

    #[tokio::test]
    async fn test_failed_evaluation_leaves_ledger_untouched() {
        let fixture = Fixture::new();
        let evaluator = Arc::new(FlakyEvaluator {
            inner: fixture.coprocessor.clone(),
            failing: AtomicBool::new(false),
        });
        let ledger = ConfidentialLedger::new(DEV_CONTRACT_ADDRESS, CHAIN_ID, evaluator.clone());
        let alice = Address::repeat_byte(1);

        let first = fixture.input(10, alice);
        let committed = ledger
            .add_payment(alice, first.value.handle(), &first.proof)
            .await
            .unwrap();
        let acl_entries = ledger.acl().len();
        let mut events = ledger.subscribe();

        evaluator.failing.store(true, Ordering::SeqCst);
        let second = fixture.input(5, alice);
        let result = ledger
            .add_payment(alice, second.value.handle(), &second.proof)
            .await;

        assert!(matches!(
            result,
            Err(GatewayError::EncryptionBackendUnavailable(_))
        ));
        assert_eq!(
            ledger.get_encrypted_balance(alice).handle(),
            committed.balance_handle
        );
        assert_eq!(ledger.committed_operations(), 1);
        assert_eq!(ledger.acl().len(), acl_entries);
        assert!(!ledger.consumed.lock().contains(&second.value.handle()));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        // Nothing was consumed, so the same input goes through once the backend is back
        evaluator.failing.store(false, Ordering::SeqCst);
        let receipt = ledger
            .add_payment(alice, second.value.handle(), &second.proof)
            .await
            .unwrap();

        assert_eq!(receipt.sequence, 2);
        let balance = ledger.get_encrypted_balance(alice);
        let value = balance.value().expect("balance is initialized");
        assert_eq!(fixture.coprocessor.decrypt(value).await.unwrap(), 15);
    }
}
