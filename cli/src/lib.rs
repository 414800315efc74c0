//! Argument handling and ledger submissions shared by the `cli` binary.

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use eyre::{bail, eyre, Result};
use gateway_api::client::{GatewayApiClient, RemoteKeyLoader};
use gateway_api::ApiClientError;
use gateway_ledger::TransactionReceipt;
use gateway_lib::{EncryptionClient, FheType, GatewayError};
use std::sync::Arc;
use tracing::{error, info};

/// Default lifetime of a decryption authorization signed by the CLI.
pub const DEFAULT_GRANT_SECONDS: u64 = 300;

/// Ledger operation fed by an encrypted input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Payment,
    Rate,
}

/// Parse a `--value` argument.
///
/// Only plain non-negative decimal integers are accepted, so nothing reaches
/// the encryption client that the user did not literally type as a number.
pub fn parse_value(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        bail!("--value must be a non-negative integer, got {raw:?}");
    }

    trimmed
        .parse::<u64>()
        .map_err(|_| eyre!("--value {raw} does not fit in 64 bits"))
}

/// Contract to bind inputs to: `--address` if given, otherwise the one the
/// server reports.
#[must_use]
pub fn target_contract(override_address: Option<Address>, served: Address) -> Address {
    override_address.unwrap_or(served)
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> Result<u64> {
    u64::try_from(chrono::Utc::now().timestamp())
        .map_err(|_| eyre!("system clock before 1970"))
}

/// Encrypt `raw_value` and submit it as a payment or a rate.
///
/// The value is parsed before anything goes over the network.
pub async fn submit(
    client: &GatewayApiClient,
    signer: &PrivateKeySigner,
    kind: Submission,
    raw_value: &str,
    address: Option<Address>,
    fhe_type: Option<FheType>,
) -> Result<TransactionReceipt> {
    let value = parse_value(raw_value)?;

    let deployment = client.get_address().await.map_err(report)?;
    let fhe_type = fhe_type.unwrap_or(deployment.balance_type);
    let value = fhe_type.check_range(value)?;
    let contract = target_contract(address, deployment.contract_address);
    let caller = signer.address();

    let encryption = EncryptionClient::new(Arc::new(RemoteKeyLoader::new(client.clone())))
        .with_fhe_type(fhe_type);

    info!("🔐 Encrypting input for {} as {}", contract, caller);
    let input = encryption.encrypt(value, contract, caller).await?;

    let result = match kind {
        Submission::Payment => client.add_payment(caller, &input).await,
        Submission::Rate => client.apply_rate(caller, &input).await,
    };

    result.map_err(|e| {
        error!("❌ Transaction rejected: {}", e);
        report(e)
    })
}

/// Turn a client failure back into the protocol error it carries.
pub fn report(err: ApiClientError) -> eyre::Report {
    let error = GatewayError::from(err);
    if error.is_retryable() {
        info!("💡 Transient failure, the same command can be run again");
    }
    error.into()
}
