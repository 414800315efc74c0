//! User decryption.
//!
//! A request is authorized against a signed [`SignedAuthorization`] and turns
//! into a [`DecryptionGrant`], which is redeemed exactly once. Every denial
//! surfaces as the same `UnauthorizedDecryption` error; the reason is only
//! logged at debug level.

use crate::ledger::ConfidentialLedger;
use alloy_primitives::{Address, B256};
use gateway_lib::config::DecryptionConfig;
use gateway_lib::{
    EncryptedBalance, EncryptedValue, GatewayError, GatewayResult, KeyManagement,
    SignedAuthorization,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Source of unix time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    #[must_use]
    pub const fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Permission to decrypt one handle for one requester until `expires_at`.
///
/// Not `Clone`: redeeming consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct DecryptionGrant {
    requester: Address,
    contract: Address,
    handle: B256,
    expires_at: u64,
}

impl DecryptionGrant {
    #[must_use]
    pub const fn requester(&self) -> Address {
        self.requester
    }

    #[must_use]
    pub const fn contract(&self) -> Address {
        self.contract
    }

    #[must_use]
    pub const fn handle(&self) -> B256 {
        self.handle
    }

    #[must_use]
    pub const fn expires_at(&self) -> u64 {
        self.expires_at
    }
}

pub struct DecryptionAuthorizationService {
    ledger: Arc<ConfidentialLedger>,
    kms: Arc<dyn KeyManagement>,
    clock: Arc<dyn Clock>,
    config: DecryptionConfig,
    /// Consumed nonces and the expiry of the authorization that carried them
    used_nonces: Mutex<HashMap<B256, u64>>,
}

impl DecryptionAuthorizationService {
    #[must_use]
    pub fn new(
        ledger: Arc<ConfidentialLedger>,
        kms: Arc<dyn KeyManagement>,
        config: DecryptionConfig,
    ) -> Self {
        Self {
            ledger,
            kms,
            clock: Arc::new(SystemClock),
            config,
            used_nonces: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Authorize and decrypt in one step.
    ///
    /// `handle` is normally `owner`'s current balance handle. The zero
    /// sentinel yields `0` once the request is authorized.
    #[instrument(skip(self, signed), fields(contract = %self.ledger.address()))]
    pub async fn request_decryption(
        &self,
        handle: B256,
        requester: Address,
        owner: Address,
        signed: &SignedAuthorization,
    ) -> GatewayResult<u64> {
        let grant = self.authorize(handle, requester, owner, signed)?;
        self.redeem(grant).await
    }

    /// Check a signed authorization and issue a grant.
    ///
    /// The nonce is consumed only when every other check has passed.
    pub fn authorize(
        &self,
        handle: B256,
        requester: Address,
        owner: Address,
        signed: &SignedAuthorization,
    ) -> GatewayResult<DecryptionGrant> {
        if requester != owner {
            return Err(deny("requester is not the owner"));
        }

        let auth = &signed.authorization;
        if auth.user != requester {
            return Err(deny("authorization names another user"));
        }
        if auth.handle != handle {
            return Err(deny("authorization names another handle"));
        }
        if auth.contract_address != self.ledger.address() {
            return Err(deny("authorization names another contract"));
        }

        let signer = signed
            .recover_signer(self.ledger.chain_id())
            .map_err(|_| deny("signature does not recover"))?;
        if signer != requester {
            return Err(deny("signature is not the requester's"));
        }

        let now = self.clock.now();
        if auth.start_timestamp > now.saturating_add(self.config.clock_skew_seconds) {
            return Err(deny("authorization is not valid yet"));
        }
        if auth.duration_seconds == 0 || auth.duration_seconds > self.config.max_grant_seconds {
            return Err(deny("authorization duration out of bounds"));
        }
        if now >= auth.expires_at() {
            return Err(deny("authorization has expired"));
        }

        if handle != EncryptedBalance::SENTINEL && !self.ledger.acl().is_allowed(handle, owner) {
            return Err(deny("owner has no access to handle"));
        }

        {
            let mut used = self.used_nonces.lock();
            // An expired authorization is refused above, so its nonce can go
            used.retain(|_, expires_at| *expires_at > now);
            if used.contains_key(&auth.nonce) {
                return Err(deny("authorization nonce already used"));
            }
            used.insert(auth.nonce, auth.expires_at());
        }

        Ok(DecryptionGrant {
            requester,
            contract: self.ledger.address(),
            handle,
            expires_at: auth.expires_at(),
        })
    }

    /// Redeem a grant. The KMS call is bounded by the grant's remaining
    /// lifetime and fails closed.
    pub async fn redeem(&self, grant: DecryptionGrant) -> GatewayResult<u64> {
        if grant.contract != self.ledger.address() {
            return Err(deny("grant was issued by another contract"));
        }

        let now = self.clock.now();
        if now >= grant.expires_at {
            return Err(deny("grant expired before redemption"));
        }

        if grant.handle == EncryptedBalance::SENTINEL {
            info!("🔓 Sentinel balance disclosed to {}", grant.requester);
            return Ok(0);
        }

        let value = EncryptedValue::from_handle(grant.handle)
            .map_err(|_| deny("grant handle is not a ciphertext"))?;
        let remaining = Duration::from_secs(grant.expires_at - now);

        match tokio::time::timeout(remaining, self.kms.decrypt(&value)).await {
            Ok(Ok(cleartext)) => {
                info!("🔓 Balance disclosed to {}", grant.requester);
                Ok(cleartext)
            }
            Ok(Err(e)) => {
                warn!("Key management refused {}: {}", grant.handle, e.error_code());
                Err(GatewayError::UnauthorizedDecryption)
            }
            Err(_) => {
                warn!("Decryption of {} timed out at grant expiry", grant.handle);
                Err(GatewayError::UnauthorizedDecryption)
            }
        }
    }
}

fn deny(reason: &str) -> GatewayError {
    debug!("Decryption denied: {reason}");
    GatewayError::UnauthorizedDecryption
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;
    use alloy_signer_local::PrivateKeySigner;
    use async_trait::async_trait;
    use gateway_lib::DecryptionAuthorization;
    use tracing_test::traced_test;

    const NOW: u64 = 1_700_000_000;

    struct Harness {
        fixture: Fixture,
        clock: Arc<ManualClock>,
        service: DecryptionAuthorizationService,
    }

    impl Harness {
        fn new() -> Self {
            let fixture = Fixture::new();
            let clock = Arc::new(ManualClock::new(NOW));
            let service = DecryptionAuthorizationService::new(
                fixture.ledger.clone(),
                fixture.coprocessor.clone(),
                DecryptionConfig {
                    max_grant_seconds: 3_600,
                    clock_skew_seconds: 30,
                },
            )
            .with_clock(clock.clone());

            Self {
                fixture,
                clock,
                service,
            }
        }

        async fn pay(&self, user: Address, value: u64) -> B256 {
            let input = self.fixture.input(value, user);
            self.fixture
                .ledger
                .add_payment(user, input.value.handle(), &input.proof)
                .await
                .unwrap()
                .balance_handle
        }

        fn sign(
            &self,
            signer: &PrivateKeySigner,
            handle: B256,
            duration: u64,
        ) -> SignedAuthorization {
            DecryptionAuthorization::new(
                handle,
                self.fixture.contract(),
                signer.address(),
                NOW,
                duration,
            )
            .sign(signer, self.fixture.ledger.chain_id())
            .unwrap()
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_owner_decrypts_own_balance() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;

        let signed = harness.sign(&alice, handle, 600);
        let value = harness
            .service
            .request_decryption(handle, alice.address(), alice.address(), &signed)
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(logs_contain("Balance disclosed"));
    }

    #[tokio::test]
    async fn test_sentinel_decrypts_to_zero() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();

        let handle = harness
            .fixture
            .ledger
            .get_encrypted_balance(alice.address())
            .handle();
        let signed = harness.sign(&alice, handle, 600);

        let value = harness
            .service
            .request_decryption(handle, alice.address(), alice.address(), &signed)
            .await
            .unwrap();
        assert_eq!(value, 0);
    }

    #[tokio::test]
    async fn test_sentinel_grant_expires() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let signed = harness.sign(&alice, EncryptedBalance::SENTINEL, 10);

        let grant = harness
            .service
            .authorize(
                EncryptedBalance::SENTINEL,
                alice.address(),
                alice.address(),
                &signed,
            )
            .unwrap();

        harness.clock.advance(10_000);
        assert_eq!(
            harness.service.redeem(grant).await,
            Err(GatewayError::UnauthorizedDecryption)
        );
    }

    #[tokio::test]
    async fn test_requester_must_be_owner() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let bob = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;

        // Bob signs for himself but asks for Alice's balance
        let signed = harness.sign(&bob, handle, 600);
        let result = harness
            .service
            .request_decryption(handle, bob.address(), alice.address(), &signed)
            .await;

        assert_eq!(result, Err(GatewayError::UnauthorizedDecryption));
    }

    #[tokio::test]
    async fn test_handle_of_other_user_denied() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let bob = PrivateKeySigner::random();
        let alice_handle = harness.pay(alice.address(), 42).await;

        // Bob is requester and owner, but the handle is Alice's
        let signed = harness.sign(&bob, alice_handle, 600);
        let result = harness
            .service
            .request_decryption(alice_handle, bob.address(), bob.address(), &signed)
            .await;

        assert_eq!(result, Err(GatewayError::UnauthorizedDecryption));
    }

    #[tokio::test]
    async fn test_signature_by_other_key_denied() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let mallory = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;

        let signed = DecryptionAuthorization::new(
            handle,
            harness.fixture.contract(),
            alice.address(),
            NOW,
            600,
        )
        .sign(&mallory, harness.fixture.ledger.chain_id())
        .unwrap();

        let result = harness
            .service
            .request_decryption(handle, alice.address(), alice.address(), &signed)
            .await;
        assert_eq!(result, Err(GatewayError::UnauthorizedDecryption));
    }

    #[tokio::test]
    async fn test_expired_authorization_denied() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;
        let signed = harness.sign(&alice, handle, 600);

        harness.clock.advance(601);
        let result = harness
            .service
            .request_decryption(handle, alice.address(), alice.address(), &signed)
            .await;

        assert_eq!(result, Err(GatewayError::UnauthorizedDecryption));
    }

    #[tokio::test]
    async fn test_future_start_and_long_duration_denied() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;

        let too_long = harness.sign(&alice, handle, 3_601);
        assert!(harness
            .service
            .authorize(handle, alice.address(), alice.address(), &too_long)
            .is_err());

        harness.clock.set(NOW - 31);
        let early = harness.sign(&alice, handle, 600);
        assert!(harness
            .service
            .authorize(handle, alice.address(), alice.address(), &early)
            .is_err());

        // Within the allowed skew
        harness.clock.set(NOW - 30);
        assert!(harness
            .service
            .authorize(handle, alice.address(), alice.address(), &early)
            .is_ok());
    }

    #[tokio::test]
    async fn test_authorization_is_single_use() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;
        let signed = harness.sign(&alice, handle, 600);

        let first = harness
            .service
            .request_decryption(handle, alice.address(), alice.address(), &signed)
            .await;
        let replay = harness
            .service
            .request_decryption(handle, alice.address(), alice.address(), &signed)
            .await;

        assert_eq!(first, Ok(42));
        assert_eq!(replay, Err(GatewayError::UnauthorizedDecryption));
    }

    #[tokio::test]
    async fn test_expired_nonces_are_pruned() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;

        let short = harness.sign(&alice, handle, 60);
        harness
            .service
            .authorize(handle, alice.address(), alice.address(), &short)
            .unwrap();
        assert_eq!(harness.service.used_nonces.lock().len(), 1);

        // The first authorization has lapsed by the time the next one lands
        harness.clock.advance(120);
        let long = harness.sign(&alice, handle, 600);
        harness
            .service
            .authorize(handle, alice.address(), alice.address(), &long)
            .unwrap();

        let used = harness.service.used_nonces.lock();
        assert_eq!(used.len(), 1);
        assert!(used.contains_key(&long.authorization.nonce));
    }

    #[tokio::test]
    async fn test_failed_check_does_not_burn_nonce() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;
        let signed = harness.sign(&alice, handle, 600);

        let wrong_owner = Address::repeat_byte(7);
        assert!(harness
            .service
            .authorize(handle, alice.address(), wrong_owner, &signed)
            .is_err());

        assert!(harness
            .service
            .authorize(handle, alice.address(), alice.address(), &signed)
            .is_ok());
    }

    #[tokio::test]
    async fn test_stale_handle_still_owned() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let first = harness.pay(alice.address(), 5).await;
        harness.pay(alice.address(), 6).await;

        let signed = harness.sign(&alice, first, 600);
        let value = harness
            .service
            .request_decryption(first, alice.address(), alice.address(), &signed)
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    struct StalledKms;

    #[async_trait]
    impl KeyManagement for StalledKms {
        async fn decrypt(&self, _value: &EncryptedValue) -> GatewayResult<u64> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(7)
        }
    }

    #[tokio::test]
    async fn test_decryption_fails_closed_at_expiry() {
        let harness = Harness::new();
        let alice = PrivateKeySigner::random();
        let handle = harness.pay(alice.address(), 42).await;

        let service = DecryptionAuthorizationService::new(
            harness.fixture.ledger.clone(),
            Arc::new(StalledKms),
            DecryptionConfig {
                max_grant_seconds: 3_600,
                clock_skew_seconds: 30,
            },
        )
        .with_clock(harness.clock.clone());

        // One second left on the grant
        let signed = harness.sign(&alice, handle, 600);
        harness.clock.advance(599);

        let result = service
            .request_decryption(handle, alice.address(), alice.address(), &signed)
            .await;
        assert_eq!(result, Err(GatewayError::UnauthorizedDecryption));
    }
}
