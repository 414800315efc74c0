use crate::ledger::ConfidentialLedger;
use alloy_primitives::Address;
use gateway_lib::backend::EncryptedInput;
use gateway_lib::config::DEV_CONTRACT_ADDRESS;
use gateway_lib::{
    EncryptedValue, FheType, HomomorphicEvaluator, InputContext, InputEncryptor, LocalCoprocessor,
    LocalEncryptor, NetworkKey, ProofVerifier,
};
use std::sync::Arc;

pub const CHAIN_ID: u64 = 31_337;

/// One local network with a ledger deployed at the dev contract address.
pub struct Fixture {
    pub coprocessor: Arc<LocalCoprocessor>,
    pub ledger: Arc<ConfidentialLedger>,
    encryptor: LocalEncryptor,
}

impl Fixture {
    pub fn new() -> Self {
        let key = NetworkKey::generate(CHAIN_ID);
        let coprocessor = Arc::new(LocalCoprocessor::new(key.clone()));
        let ledger = Arc::new(ConfidentialLedger::new(
            DEV_CONTRACT_ADDRESS,
            CHAIN_ID,
            coprocessor.clone(),
        ));

        Self {
            coprocessor,
            ledger,
            encryptor: LocalEncryptor::new(key),
        }
    }

    pub fn contract(&self) -> Address {
        self.ledger.address()
    }

    /// Input encrypted by `user` for this ledger
    pub fn input(&self, value: u64, user: Address) -> EncryptedInput {
        self.input_for(value, self.contract(), user)
    }

    pub fn input_for(&self, value: u64, contract: Address, user: Address) -> EncryptedInput {
        self.encryptor
            .encrypt(value, FheType::Euint32, &InputContext::new(contract, user, CHAIN_ID))
            .unwrap()
    }

    /// Ciphertext registered with the coprocessor without touching the ledger
    pub fn ingest(&self, value: u64, user: Address) -> EncryptedValue {
        let input = self.input(value, user);
        let verified = ProofVerifier::new(CHAIN_ID)
            .verify(&input.value, &input.proof, self.contract(), user)
            .unwrap();
        self.coprocessor.ingest(&verified).unwrap()
    }
}
