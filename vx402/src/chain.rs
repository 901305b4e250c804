//! Supported chain identifiers and the transaction-lookup adapter trait.
//!
//! Each supported chain is backed by a [`ChainAdapter`] implementation living
//! in a chain-family crate (`vx402-evm`, `vx402-svm`). Adapters translate raw
//! RPC failures into [`AdapterError`] at the boundary so that transport
//! details never leak into the verification layer.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A supported blockchain network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Solana mainnet.
    Solana,
    /// Base (EIP-155 chain 8453).
    Base,
    /// Ethereum mainnet (EIP-155 chain 1).
    Ethereum,
    /// Polygon PoS (EIP-155 chain 137).
    Polygon,
    /// Arbitrum One (EIP-155 chain 42161).
    Arbitrum,
    /// Optimism (EIP-155 chain 10).
    Optimism,
}

impl Chain {
    /// All supported chains, in display order.
    pub const ALL: [Self; 6] = [
        Self::Solana,
        Self::Base,
        Self::Ethereum,
        Self::Polygon,
        Self::Arbitrum,
        Self::Optimism,
    ];

    /// The canonical lowercase name used on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Solana => "solana",
            Self::Base => "base",
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Arbitrum => "arbitrum",
            Self::Optimism => "optimism",
        }
    }

    /// Default confirmation threshold used when the configuration does not
    /// override it. These track each chain's practical finality depth.
    #[must_use]
    pub const fn default_confirmations(&self) -> u64 {
        match self {
            Self::Solana => 32,
            Self::Base => 6,
            Self::Ethereum => 12,
            Self::Polygon => 128,
            Self::Arbitrum | Self::Optimism => 10,
        }
    }

    /// Returns `true` for EIP-155 chains, where addresses are hex and
    /// compared case-insensitively.
    #[must_use]
    pub const fn is_evm(&self) -> bool {
        !matches!(self, Self::Solana)
    }

    /// Compares two addresses using this chain's address semantics.
    ///
    /// Hex addresses on EVM chains are case-insensitive; base58 Solana
    /// addresses are compared exactly.
    #[must_use]
    pub fn addresses_match(&self, a: &str, b: &str) -> bool {
        if self.is_evm() {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown chain name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported chain: {0}")]
pub struct UnsupportedChainError(pub String);

impl FromStr for Chain {
    type Err = UnsupportedChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solana" => Ok(Self::Solana),
            "base" => Ok(Self::Base),
            "ethereum" => Ok(Self::Ethereum),
            "polygon" => Ok(Self::Polygon),
            "arbitrum" => Ok(Self::Arbitrum),
            "optimism" => Ok(Self::Optimism),
            _ => Err(UnsupportedChainError(s.to_owned())),
        }
    }
}

/// A USDC transfer extracted from an on-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTransfer {
    /// Sender address, chain-native encoding.
    pub from: String,
    /// Recipient address, chain-native encoding.
    pub to: String,
    /// Transfer amount in whole USDC units.
    pub amount: Decimal,
    /// Currency symbol. Always `USDC` for the supported chains.
    pub currency: String,
    /// Confirmations on top of the block containing the transaction,
    /// measured against the chain head at fetch time.
    pub confirmations: u64,
    /// Block number (or slot, for Solana) containing the transaction.
    pub block_number: u64,
}

/// Failures surfaced by a [`ChainAdapter`].
///
/// Adapters catch raw RPC errors and translate them here; the verifier and
/// HTTP layer only ever see this taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The transaction hash is not syntactically valid for the chain.
    #[error("malformed transaction hash: {0}")]
    MalformedHash(String),

    /// The chain has no record of the transaction. Retryable: the chain may
    /// not have indexed it yet.
    #[error("transaction not found")]
    NotFound,

    /// The transaction exists but reverted or errored on-chain.
    #[error("transaction failed on-chain")]
    TransactionFailed,

    /// The transaction exists but contains no USDC transfer.
    #[error("no USDC transfer found in transaction")]
    NoTokenTransfer,

    /// RPC transport error. Retryable with backoff; never treated as
    /// "zero confirmations".
    #[error("chain RPC unavailable: {0}")]
    Unavailable(String),

    /// RPC call exceeded the bounded timeout.
    #[error("chain RPC timed out after {0:?}")]
    Timeout(Duration),
}

impl AdapterError {
    /// Returns `true` if the same request may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Unavailable(_) | Self::Timeout(_)
        )
    }
}

/// Fetches transaction details from one chain's canonical RPC.
///
/// Implementations must apply a bounded timeout to every RPC call and must
/// not cache confirmation counts beyond a TTL appropriate to the chain's
/// block time, since the verifier re-reads confirmations on every attempt.
#[async_trait::async_trait]
pub trait ChainAdapter: Send + Sync {
    /// The chain this adapter serves.
    fn chain(&self) -> Chain;

    /// Looks up a transaction by hash and extracts its USDC transfer.
    ///
    /// When a transaction carries several USDC transfers, the one paying the
    /// configured payment address is preferred so that the verifier sees the
    /// relevant leg.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] for missing, failed, or unreachable
    /// transactions.
    async fn fetch_transaction(&self, tx_hash: &str) -> Result<TxTransfer, AdapterError>;
}
