use crate::error::{GatewayError, GatewayResult};
use crate::handle::FheType;
use alloy_primitives::{address, Address, B256};
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use std::env;

/// Ledger address used on a local network when none is configured
pub const DEV_CONTRACT_ADDRESS: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");

const DEFAULT_MAX_GRANT_SECONDS: u64 = 86_400;
const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub network: NetworkConfig,
    pub contract: ContractConfig,
    pub signer: Option<SignerConfig>,
    pub decryption: DecryptionConfig,
    /// Hex network key for the local backend; generated at startup when absent
    #[serde(skip_serializing)]
    pub network_key: Option<B256>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    pub address: Address,
    pub balance_type: FheType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(skip_serializing)]
    pub private_key: String,
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionConfig {
    pub max_grant_seconds: u64,
    pub clock_skew_seconds: u64,
}

impl GatewayConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source. `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> GatewayResult<Self> {
        let network_name =
            lookup("GATEWAY_NETWORK").unwrap_or_else(|| "localhost".to_string());
        let chain_id: u64 = lookup("CHAIN_ID")
            .unwrap_or_else(|| Self::default_chain_id(&network_name).to_string())
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid chain ID: {e}")))?;

        let contract_address = match lookup("GATEWAY_CONTRACT_ADDRESS") {
            Some(raw) => raw
                .parse::<Address>()
                .map_err(|e| GatewayError::Config(format!("Invalid contract address: {e}")))?,
            None if Self::is_local(chain_id) => DEV_CONTRACT_ADDRESS,
            None => {
                return Err(GatewayError::Config(
                    "GATEWAY_CONTRACT_ADDRESS is required outside a local network".to_string(),
                ))
            }
        };

        let balance_type = match lookup("BALANCE_TYPE") {
            None => FheType::Euint32,
            Some(raw) => raw
                .parse::<FheType>()
                .map_err(|_| GatewayError::Config(format!("Unknown BALANCE_TYPE: {raw}")))?,
        };

        let signer = match lookup("GATEWAY_PRIVATE_KEY") {
            Some(private_key) => {
                let signer = SignerConfig::parse_key(&private_key)?;

                // An explicit signer address must match the key
                if let Some(expected) = lookup("GATEWAY_SIGNER_ADDRESS") {
                    let expected = expected.parse::<Address>().map_err(|e| {
                        GatewayError::Config(format!("Invalid signer address: {e}"))
                    })?;
                    if signer.address() != expected {
                        return Err(GatewayError::Config(format!(
                            "Private key address ({}) does not match GATEWAY_SIGNER_ADDRESS ({})",
                            signer.address(),
                            expected
                        )));
                    }
                }

                Some(SignerConfig {
                    private_key,
                    address: signer.address(),
                })
            }
            None => None,
        };

        let network_key = lookup("FHE_NETWORK_KEY")
            .map(|raw| {
                raw.parse::<B256>()
                    .map_err(|e| GatewayError::Config(format!("Invalid FHE_NETWORK_KEY: {e}")))
            })
            .transpose()?;

        Ok(Self {
            network: NetworkConfig {
                name: network_name,
                chain_id,
                is_testnet: Self::is_testnet(chain_id),
            },
            contract: ContractConfig {
                address: contract_address,
                balance_type,
            },
            signer,
            decryption: DecryptionConfig {
                max_grant_seconds: lookup("DECRYPTION_MAX_GRANT_SECONDS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MAX_GRANT_SECONDS),
                clock_skew_seconds: lookup("CLOCK_SKEW_SECONDS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CLOCK_SKEW_SECONDS),
            },
            network_key,
        })
    }

    fn default_chain_id(network: &str) -> u64 {
        match network {
            "mainnet" => 1,
            "sepolia" => 11_155_111,
            _ => 31_337,
        }
    }

    /// Whether the chain is a local development network.
    #[must_use]
    pub const fn is_local_network(&self) -> bool {
        Self::is_local(self.network.chain_id)
    }

    const fn is_local(chain_id: u64) -> bool {
        matches!(chain_id, 31_337 | 1337)
    }

    const fn is_testnet(chain_id: u64) -> bool {
        matches!(chain_id, 11_155_111 | 31_337 | 1337)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.network.chain_id == 0 {
            return Err(GatewayError::Config("Chain ID must be non-zero".to_string()));
        }

        if self.contract.address == Address::ZERO {
            return Err(GatewayError::Config(
                "Contract address must be non-zero".to_string(),
            ));
        }

        if self.decryption.max_grant_seconds == 0 {
            return Err(GatewayError::Config(
                "Maximum grant duration must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl SignerConfig {
    /// Parse a hex private key, with or without `0x`.
    pub fn parse_key(private_key: &str) -> GatewayResult<PrivateKeySigner> {
        let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))?;
        let key = B256::try_from(bytes.as_slice())
            .map_err(|_| GatewayError::Config("Private key must be 32 bytes".to_string()))?;
        PrivateKeySigner::from_bytes(&key).map_err(|e| GatewayError::Signer(e.to_string()))
    }

    pub fn signer(&self) -> GatewayResult<PrivateKeySigner> {
        Self::parse_key(&self.private_key)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                name: "localhost".to_string(),
                chain_id: 31_337,
                is_testnet: true,
            },
            contract: ContractConfig {
                address: DEV_CONTRACT_ADDRESS,
                balance_type: FheType::Euint32,
            },
            signer: None,
            decryption: DecryptionConfig {
                max_grant_seconds: DEFAULT_MAX_GRANT_SECONDS,
                clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
            },
            network_key: None,
        }
    }
}
