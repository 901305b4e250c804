//! Shared fixtures: a scriptable chain adapter and a canned configuration.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use vx402::chain::{AdapterError, Chain, ChainAdapter, TxTransfer};
use vx402::config::{ChainSettings, PricingConfig, X402Config};

pub const BASE_PAYMENT_ADDRESS: &str = "0x742d35Cc6634C0532925a3b8D4B5e3A3A3b7b7b7";
pub const BASE_USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

/// One scripted adapter response.
#[derive(Debug, Clone)]
pub enum MockReply {
    Transfer(TxTransfer),
    NotFound,
    Unavailable,
    Failed,
}

impl MockReply {
    fn into_result(self) -> Result<TxTransfer, AdapterError> {
        match self {
            Self::Transfer(t) => Ok(t),
            Self::NotFound => Err(AdapterError::NotFound),
            Self::Unavailable => Err(AdapterError::Unavailable("rpc connection refused".into())),
            Self::Failed => Err(AdapterError::TransactionFailed),
        }
    }
}

/// Chain adapter that replays a script of responses. The last entry repeats
/// once the script runs out, so steady-state behavior is easy to express.
#[derive(Debug)]
pub struct MockAdapter {
    chain: Chain,
    replies: Mutex<VecDeque<MockReply>>,
}

impl MockAdapter {
    pub fn new(chain: Chain, replies: impl IntoIterator<Item = MockReply>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            replies: Mutex::new(replies.into_iter().collect()),
        })
    }
}

#[async_trait::async_trait]
impl ChainAdapter for MockAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn fetch_transaction(&self, _tx_hash: &str) -> Result<TxTransfer, AdapterError> {
        let mut replies = self.replies.lock().expect("mock lock poisoned");
        let reply = if replies.len() > 1 {
            replies.pop_front().expect("non-empty")
        } else {
            replies.front().cloned().ok_or(AdapterError::NotFound)?
        };
        reply.into_result()
    }
}

/// A transfer paying the configured Base address.
pub fn base_transfer(amount: &str, confirmations: u64) -> TxTransfer {
    TxTransfer {
        from: "0x1111111111111111111111111111111111111111".into(),
        to: BASE_PAYMENT_ADDRESS.into(),
        amount: amount.parse::<Decimal>().expect("decimal literal"),
        currency: "USDC".into(),
        confirmations,
        block_number: 19_000_000,
    }
}

/// Default config: Base configured at 6 confirmations, $0.01 per call.
pub fn test_config() -> X402Config {
    X402Config::new(PricingConfig::default()).with_chain(
        Chain::Base,
        ChainSettings {
            rpc_url: "http://localhost:8545".into(),
            payment_address: BASE_PAYMENT_ADDRESS.into(),
            usdc_contract: BASE_USDC.into(),
            required_confirmations: 6,
        },
    )
}
