//! CLI for the confidential payment gateway
//!
//! This CLI is a thin client over the gateway API server. Values are
//! encrypted locally with key material fetched from the server; only handles
//! and proofs go over the wire.
//!
//! Usage examples:
//! ```shell
//! # Show the ledger address and chain
//! cli address
//!
//! # Pay 100 into your balance, then apply a 2x rate
//! cli add-payment --value 100
//! cli apply-rate --value 2
//!
//! # Decrypt your own balance
//! cli decrypt-balance
//!
//! # Check API health
//! cli health-check
//! ```

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use clap::{Parser, Subcommand};
use eyre::{eyre, Result};
use gateway_api::client::GatewayApiClient;
use gateway_api::rest::DecryptRequest;
use gateway_cli::{submit, target_contract, unix_now, Submission, DEFAULT_GRANT_SECONDS};
use gateway_ledger::TransactionReceipt;
use gateway_lib::config::SignerConfig;
use gateway_lib::{DecryptionAuthorization, FheType};
use std::env;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cli")]
#[command(about = "CLI for interacting with the confidential payment gateway")]
#[command(version)]
struct Cli {
    /// API server base URL
    #[arg(long, env = "GATEWAY_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Private key of the account acting as caller and requester
    #[arg(long, env = "GATEWAY_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ledger address, chain id and balance type
    Address,
    /// Decrypt a balance with a freshly signed authorization
    DecryptBalance {
        /// Balance owner (defaults to the signer)
        #[arg(long)]
        user: Option<Address>,
        /// Ledger address named in the authorization
        #[arg(long)]
        address: Option<Address>,
        /// Authorization lifetime in seconds
        #[arg(long, default_value_t = DEFAULT_GRANT_SECONDS)]
        duration: u64,
    },
    /// Encrypt a value and add it to the signer's balance
    AddPayment {
        /// Plaintext amount
        #[arg(long)]
        value: String,
        /// Ledger address to bind the input to
        #[arg(long)]
        address: Option<Address>,
        /// Encrypt as this type instead of the ledger's balance type
        #[arg(long, value_enum)]
        fhe_type: Option<FheType>,
    },
    /// Encrypt a rate and multiply the signer's balance by it
    ApplyRate {
        /// Plaintext multiplier
        #[arg(long)]
        value: String,
        /// Ledger address to bind the input to
        #[arg(long)]
        address: Option<Address>,
        /// Encrypt as this type instead of the ledger's balance type
        #[arg(long, value_enum)]
        fhe_type: Option<FheType>,
    },
    /// Check API server health
    HealthCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "cli=info".to_string()))
        .init();

    let cli = Cli::parse();

    // Create API client
    let client = GatewayApiClient::new(cli.api_url)?;

    // Execute command
    match cli.command {
        Commands::Address => {
            show_address(&client).await?;
        }
        Commands::DecryptBalance {
            user,
            address,
            duration,
        } => {
            let signer = load_signer(cli.private_key.as_deref())?;
            decrypt_balance(&client, &signer, user, address, duration).await?;
        }
        Commands::AddPayment {
            value,
            address,
            fhe_type,
        } => {
            let signer = load_signer(cli.private_key.as_deref())?;
            let receipt =
                submit(&client, &signer, Submission::Payment, &value, address, fhe_type).await?;
            show_receipt(&receipt);
        }
        Commands::ApplyRate {
            value,
            address,
            fhe_type,
        } => {
            let signer = load_signer(cli.private_key.as_deref())?;
            let receipt =
                submit(&client, &signer, Submission::Rate, &value, address, fhe_type).await?;
            show_receipt(&receipt);
        }
        Commands::HealthCheck => {
            health_check(&client).await?;
        }
    }

    Ok(())
}

fn load_signer(private_key: Option<&str>) -> Result<PrivateKeySigner> {
    let key = private_key
        .ok_or_else(|| eyre!("GATEWAY_PRIVATE_KEY (or --private-key) is required for this task"))?;
    Ok(SignerConfig::parse_key(key)?)
}

/// Show the ledger deployment
async fn show_address(client: &GatewayApiClient) -> Result<()> {
    let address = client.get_address().await?;

    info!("📜 Ledger address: {}", address.contract_address);
    info!("   Chain ID:       {}", address.chain_id);
    info!("   Balance type:   {}", address.balance_type);
    println!("{}", address.contract_address);

    Ok(())
}

fn show_receipt(receipt: &TransactionReceipt) {
    info!("✅ Transaction committed!");
    info!("   Tx hash:        {}", receipt.tx_hash);
    info!("   Operation:      {}", receipt.operation);
    info!("   Sequence:       {}", receipt.sequence);
    info!("   Balance handle: {}", receipt.balance_handle);
}

/// Sign an authorization and decrypt a balance
async fn decrypt_balance(
    client: &GatewayApiClient,
    signer: &PrivateKeySigner,
    user: Option<Address>,
    address: Option<Address>,
    duration: u64,
) -> Result<()> {
    let deployment = client.get_address().await?;
    let owner = user.unwrap_or_else(|| signer.address());
    let contract = target_contract(address, deployment.contract_address);

    let balance = client.get_encrypted_balance(owner).await?;
    if !balance.initialized {
        info!("ℹ️ Balance of {} is uninitialized", owner);
    }

    let authorization = DecryptionAuthorization::new(
        balance.handle,
        contract,
        signer.address(),
        unix_now()?,
        duration,
    )
    .sign(signer, deployment.chain_id)?;

    let request = DecryptRequest {
        requester: signer.address(),
        owner,
        handle: Some(balance.handle),
        authorization,
    };

    match client.decrypt(&request).await {
        Ok(response) => {
            info!("🔓 Balance of {}: {}", response.owner, response.value);
            println!("{}", response.value);
            Ok(())
        }
        Err(e) => {
            error!("❌ Decryption denied: {}", e);
            Err(e.into())
        }
    }
}

/// Check API server health
async fn health_check(client: &GatewayApiClient) -> Result<()> {
    info!("Checking API server health...");

    match client.health_check().await {
        Ok(health) => {
            info!("✅ API server is healthy!");
            info!("   Status:               {}", health.status);
            info!("   Committed operations: {}", health.committed_operations);
        }
        Err(e) => {
            error!("❌ Failed to check API health: {}", e);
        }
    }

    Ok(())
}
