// exchange/signing.rs
//! L1 action signing.
//!
//! An action is MessagePack-encoded, hashed together with its nonce and vault
//! flag into a connection id, and the connection id is signed as the EIP-712
//! `Agent` struct under the network's `Exchange` domain.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use super::errors::SigningError;
use super::types::Action;
use super::wallet::{decode_fixed, keccak256, EIP712Domain, HyperliquidWallet, Signature, TypedData};

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Network selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn api_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.hyperliquid.xyz",
            Network::Testnet => "https://api.hyperliquid-testnet.xyz",
        }
    }

    pub fn ws_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "wss://api.hyperliquid.xyz/ws",
            Network::Testnet => "wss://api.hyperliquid-testnet.xyz/ws",
        }
    }

    /// Source marker of the `Agent` struct
    pub fn source(&self) -> &'static str {
        match self {
            Network::Mainnet => "a",
            Network::Testnet => "b",
        }
    }

    /// Chain id of the signing domain (Arbitrum One / Arbitrum Sepolia).
    ///
    /// Check this first if a live endpoint rejects signatures: the exchange
    /// may verify agent signatures under one fixed chain id for both
    /// networks. See the chain id decision in DESIGN.md.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Mainnet => 42161,
            Network::Testnet => 421614,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Connection id of an action:
/// keccak256(msgpack(action) ‖ nonce (u64 BE) ‖ 0x00 | 0x01 ‖ vault address)
pub fn action_hash<T: Serialize>(
    action: &T,
    nonce: u64,
    vault_address: Option<&str>,
) -> Result<[u8; 32], SigningError> {
    let mut bytes =
        rmp_serde::to_vec_named(action).map_err(|e| SigningError::Encoding(e.to_string()))?;
    bytes.extend_from_slice(&nonce.to_be_bytes());

    match vault_address {
        None => bytes.push(0x00),
        Some(vault) => {
            let vault = decode_fixed::<20>(vault)
                .map_err(|_| SigningError::InvalidAddress(vault.to_string()))?;
            bytes.push(0x01);
            bytes.extend_from_slice(&vault);
        }
    }

    Ok(keccak256(&bytes))
}

/// `Agent { source, connectionId }` under the `Exchange` domain of `network`
pub fn agent_typed_data(connection_id: &[u8; 32], network: Network) -> TypedData {
    TypedData {
        domain: EIP712Domain {
            name: "Exchange".to_string(),
            version: "1".to_string(),
            chain_id: network.chain_id(),
            verifying_contract: ZERO_ADDRESS.to_string(),
        },
        primary_type: "Agent".to_string(),
        types: json!({
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            "Agent": [
                { "name": "source", "type": "string" },
                { "name": "connectionId", "type": "bytes32" }
            ]
        }),
        message: json!({
            "source": network.source(),
            "connectionId": format!("0x{}", hex::encode(connection_id)),
        }),
    }
}

/// Signs an L1 action. Pure: the same inputs always give the same signature.
pub fn sign_l1_action<T: Serialize>(
    wallet: &HyperliquidWallet,
    action: &T,
    nonce: u64,
    vault_address: Option<&str>,
    network: Network,
) -> Result<Signature, SigningError> {
    let connection_id = action_hash(action, nonce, vault_address)?;
    wallet.sign_typed_data(&agent_typed_data(&connection_id, network))
}

/// Wallet bound to a network
#[derive(Debug)]
pub struct ActionSigner {
    wallet: HyperliquidWallet,
    network: Network,
}

impl ActionSigner {
    pub fn new(wallet: HyperliquidWallet, network: Network) -> Self {
        Self { wallet, network }
    }

    pub fn from_private_key(private_key: &str, network: Network) -> Result<Self, SigningError> {
        Ok(Self::new(HyperliquidWallet::from_private_key(private_key)?, network))
    }

    pub fn address(&self) -> &str {
        &self.wallet.address
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn sign_action(&self, action: &Action, nonce: u64) -> Result<Signature, SigningError> {
        sign_l1_action(&self.wallet, action, nonce, None, self.network)
    }
}

/// Millisecond nonces that are strictly increasing per generator, even when
/// two requests are signed within the same millisecond.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    last: AtomicU64,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}
