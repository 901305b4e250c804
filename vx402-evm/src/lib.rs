//! EIP-155 chain adapter for vx402 payment verification.
//!
//! One [`EvmAdapter`] serves one configured chain (Base, Ethereum, Polygon,
//! Arbitrum, Optimism). Verification is read-only: the adapter fetches the
//! transaction receipt, extracts the ERC-20 `Transfer` log emitted by the
//! chain's USDC contract, and measures confirmations against the current
//! head block. No signing keys are involved.

use std::sync::LazyLock;
use std::time::Duration;

use alloy_primitives::{Address, B256, TxHash, U256, keccak256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types_eth::Log;
use rust_decimal::Decimal;
use tokio::time::timeout;
use url::Url;

use vx402::chain::{AdapterError, Chain, ChainAdapter, TxTransfer};
use vx402::config::ChainSettings;

/// `keccak256("Transfer(address,address,uint256)")`, the topic0 of every
/// ERC-20 transfer event.
static TRANSFER_TOPIC: LazyLock<B256> =
    LazyLock::new(|| keccak256(b"Transfer(address,address,uint256)"));

const USDC_DECIMALS: u32 = 6;

/// Errors constructing an [`EvmAdapter`] from configuration.
#[derive(Debug, thiserror::Error)]
pub enum EvmConfigError {
    /// The configured RPC URL did not parse.
    #[error("invalid RPC URL for {chain}: {reason}")]
    InvalidRpcUrl {
        /// Chain being configured.
        chain: Chain,
        /// Parse failure detail.
        reason: String,
    },
    /// A configured address did not parse as a 20-byte hex address.
    #[error("invalid {field} address for {chain}: {value}")]
    InvalidAddress {
        /// Chain being configured.
        chain: Chain,
        /// Which config field was malformed.
        field: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Read-only transaction lookup for one EIP-155 chain.
#[derive(Debug)]
pub struct EvmAdapter {
    chain: Chain,
    provider: RootProvider,
    usdc_contract: Address,
    payment_address: Address,
    rpc_timeout: Duration,
}

impl EvmAdapter {
    /// Builds an adapter for `chain` from its settings.
    ///
    /// # Errors
    ///
    /// Returns [`EvmConfigError`] when the RPC URL or either address is
    /// malformed. RPC reachability is not probed here; transport failures
    /// surface per-call as [`AdapterError::Unavailable`].
    pub fn new(
        chain: Chain,
        settings: &ChainSettings,
        rpc_timeout: Duration,
    ) -> Result<Self, EvmConfigError> {
        let url: Url = settings
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| EvmConfigError::InvalidRpcUrl {
                chain,
                reason: e.to_string(),
            })?;
        let usdc_contract: Address =
            settings
                .usdc_contract
                .parse()
                .map_err(|_| EvmConfigError::InvalidAddress {
                    chain,
                    field: "usdc_contract",
                    value: settings.usdc_contract.clone(),
                })?;
        let payment_address: Address =
            settings
                .payment_address
                .parse()
                .map_err(|_| EvmConfigError::InvalidAddress {
                    chain,
                    field: "payment_address",
                    value: settings.payment_address.clone(),
                })?;

        Ok(Self {
            chain,
            provider: RootProvider::new_http(url),
            usdc_contract,
            payment_address,
            rpc_timeout,
        })
    }
}

#[async_trait::async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn fetch_transaction(&self, tx_hash: &str) -> Result<TxTransfer, AdapterError> {
        let hash: TxHash = tx_hash
            .parse()
            .map_err(|_| AdapterError::MalformedHash(tx_hash.to_owned()))?;

        let receipt = timeout(self.rpc_timeout, self.provider.get_transaction_receipt(hash))
            .await
            .map_err(|_| AdapterError::Timeout(self.rpc_timeout))?
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?
            .ok_or(AdapterError::NotFound)?;

        if !receipt.status() {
            return Err(AdapterError::TransactionFailed);
        }
        // A receipt without a block number is still pending.
        let block_number = receipt.block_number.ok_or(AdapterError::NotFound)?;

        let head = timeout(self.rpc_timeout, self.provider.get_block_number())
            .await
            .map_err(|_| AdapterError::Timeout(self.rpc_timeout))?
            .map_err(|e| AdapterError::Unavailable(e.to_string()))?;
        let confirmations = head.saturating_sub(block_number);

        let transfer = extract_usdc_transfer(
            receipt.inner.logs(),
            self.usdc_contract,
            self.payment_address,
        )
        .ok_or(AdapterError::NoTokenTransfer)?;

        tracing::debug!(
            chain = %self.chain,
            tx_hash,
            amount = %transfer.amount,
            confirmations,
            "fetched EVM transfer"
        );

        Ok(TxTransfer {
            from: transfer.from.to_string(),
            to: transfer.to.to_string(),
            amount: transfer.amount,
            currency: "USDC".to_owned(),
            confirmations,
            block_number,
        })
    }
}

/// A decoded ERC-20 transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecodedTransfer {
    from: Address,
    to: Address,
    amount: Decimal,
}

/// Picks the USDC `Transfer` log relevant to payment verification.
///
/// Transactions routed through aggregators can emit several USDC transfers;
/// the leg paying `preferred_to` wins so the verifier judges the right one.
/// Falls back to the first USDC transfer so a wrong-recipient payment is
/// reported with its actual recipient instead of "no transfer".
fn extract_usdc_transfer(
    logs: &[Log],
    usdc_contract: Address,
    preferred_to: Address,
) -> Option<DecodedTransfer> {
    let mut first = None;
    for log in logs {
        if log.inner.address != usdc_contract {
            continue;
        }
        let topics = log.inner.data.topics();
        if topics.len() < 3 || topics[0] != *TRANSFER_TOPIC {
            continue;
        }
        let from = Address::from_slice(&topics[1][12..]);
        let to = Address::from_slice(&topics[2][12..]);
        let raw = U256::from_be_slice(log.inner.data.data.as_ref());
        // Values past Decimal's 96-bit mantissa cannot be a real USDC
        // balance; skip the log rather than letting the conversion panic.
        let Some(amount) = i128::try_from(raw)
            .ok()
            .and_then(|units| Decimal::try_from_i128_with_scale(units, USDC_DECIMALS).ok())
        else {
            continue;
        };
        let decoded = DecodedTransfer { from, to, amount };
        if to == preferred_to {
            return Some(decoded);
        }
        first.get_or_insert(decoded);
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, LogData, address};

    const USDC: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
    const GATEWAY: Address = address!("742d35Cc6634C0532925a3b8D4B5e3A3A3b7b7b7");
    const PAYER: Address = address!("1111111111111111111111111111111111111111");
    const OTHER: Address = address!("2222222222222222222222222222222222222222");

    fn transfer_log(contract: Address, from: Address, to: Address, base_units: u128) -> Log {
        let mut amount = [0u8; 32];
        amount[16..].copy_from_slice(&base_units.to_be_bytes());
        let topics = vec![
            *TRANSFER_TOPIC,
            B256::left_padding_from(from.as_slice()),
            B256::left_padding_from(to.as_slice()),
        ];
        Log {
            inner: alloy_primitives::Log {
                address: contract,
                data: LogData::new_unchecked(topics, Bytes::copy_from_slice(&amount)),
            },
            ..Default::default()
        }
    }

    #[test]
    fn decodes_usdc_transfer_to_gateway() {
        let logs = vec![transfer_log(USDC, PAYER, GATEWAY, 1_000_000)];
        let decoded = extract_usdc_transfer(&logs, USDC, GATEWAY).unwrap();
        assert_eq!(decoded.from, PAYER);
        assert_eq!(decoded.to, GATEWAY);
        assert_eq!(decoded.amount, Decimal::ONE);
    }

    #[test]
    fn ignores_logs_from_other_contracts() {
        let logs = vec![transfer_log(OTHER, PAYER, GATEWAY, 1_000_000)];
        assert!(extract_usdc_transfer(&logs, USDC, GATEWAY).is_none());
    }

    #[test]
    fn prefers_the_leg_paying_the_gateway() {
        let logs = vec![
            transfer_log(USDC, PAYER, OTHER, 9_000_000),
            transfer_log(USDC, PAYER, GATEWAY, 500_000),
        ];
        let decoded = extract_usdc_transfer(&logs, USDC, GATEWAY).unwrap();
        assert_eq!(decoded.to, GATEWAY);
        assert_eq!(decoded.amount, "0.50".parse::<Decimal>().unwrap());
    }

    #[test]
    fn falls_back_to_first_transfer_for_wrong_recipient() {
        let logs = vec![transfer_log(USDC, PAYER, OTHER, 1_000_000)];
        let decoded = extract_usdc_transfer(&logs, USDC, GATEWAY).unwrap();
        assert_eq!(decoded.to, OTHER);
    }

    #[test]
    fn fractional_amounts_keep_six_decimals() {
        let logs = vec![transfer_log(USDC, PAYER, GATEWAY, 10_500)];
        let decoded = extract_usdc_transfer(&logs, USDC, GATEWAY).unwrap();
        assert_eq!(decoded.amount, "0.0105".parse::<Decimal>().unwrap());
    }

    #[test]
    fn amounts_past_decimal_range_are_skipped_not_panicked() {
        // u128::MAX overflows Decimal's 96-bit mantissa.
        let logs = vec![
            transfer_log(USDC, PAYER, GATEWAY, u128::MAX),
            transfer_log(USDC, PAYER, GATEWAY, 1_000_000),
        ];
        let decoded = extract_usdc_transfer(&logs, USDC, GATEWAY).unwrap();
        assert_eq!(decoded.amount, Decimal::ONE);

        let only_oversized = vec![transfer_log(USDC, PAYER, GATEWAY, u128::MAX)];
        assert!(extract_usdc_transfer(&only_oversized, USDC, GATEWAY).is_none());
    }

    #[test]
    fn config_rejects_bad_addresses() {
        let settings = ChainSettings {
            rpc_url: "https://mainnet.base.org".into(),
            payment_address: "not-an-address".into(),
            usdc_contract: format!("{USDC:#x}"),
            required_confirmations: 6,
        };
        let err = EvmAdapter::new(Chain::Base, &settings, Duration::from_secs(10)).unwrap_err();
        assert!(matches!(
            err,
            EvmConfigError::InvalidAddress {
                field: "payment_address",
                ..
            }
        ));
    }
}
