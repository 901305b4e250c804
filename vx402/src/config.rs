//! Immutable service configuration.
//!
//! Pricing, payment addresses, and confirmation thresholds are assembled once
//! at startup into an [`X402Config`] and injected into the verifier and token
//! issuer. Nothing in this module is mutable after construction; per-
//! environment substitution happens by building a different config.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::chain::Chain;

/// Default bounded timeout applied to chain RPC calls.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Default risk score above which a payment is rejected.
pub const DEFAULT_RISK_THRESHOLD: f64 = 0.5;

/// Pricing and token-lifetime parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Price of one protected-API call, in USDC.
    pub price_per_call: Decimal,
    /// Smallest accepted payment, in USDC.
    pub min_payment: Decimal,
    /// Access-token lifetime in seconds, measured from issuance.
    pub token_ttl_secs: u64,
}

impl PricingConfig {
    /// Number of protected-API calls a payment of `amount` USDC buys:
    /// `floor(amount / price_per_call)`.
    #[must_use]
    pub fn requests_for(&self, amount: Decimal) -> u32 {
        if self.price_per_call <= Decimal::ZERO {
            return 0;
        }
        (amount / self.price_per_call)
            .floor()
            .to_u32()
            .unwrap_or(u32::MAX)
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            price_per_call: Decimal::new(1, 2), // 0.01 USDC
            min_payment: Decimal::new(1, 2),
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Per-chain payment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    /// HTTP RPC endpoint for the chain.
    pub rpc_url: String,
    /// Address payments must be sent to on this chain.
    pub payment_address: String,
    /// USDC token contract (EVM) or mint (Solana) address.
    pub usdc_contract: String,
    /// Confirmations required before a payment is accepted.
    pub required_confirmations: u64,
}

/// Complete immutable configuration for the verification core.
#[derive(Debug, Clone)]
pub struct X402Config {
    /// Pricing parameters.
    pub pricing: PricingConfig,
    /// Risk score above which payments are rejected.
    pub risk_threshold: f64,
    /// Bounded timeout for chain RPC calls.
    pub rpc_timeout: Duration,
    chains: HashMap<Chain, ChainSettings>,
}

impl X402Config {
    /// Creates a config with default pricing and no chains.
    #[must_use]
    pub fn new(pricing: PricingConfig) -> Self {
        Self {
            pricing,
            risk_threshold: DEFAULT_RISK_THRESHOLD,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            chains: HashMap::new(),
        }
    }

    /// Builder-style: registers a chain and returns `self`.
    #[must_use]
    pub fn with_chain(mut self, chain: Chain, settings: ChainSettings) -> Self {
        self.chains.insert(chain, settings);
        self
    }

    /// Builder-style: overrides the risk rejection threshold.
    #[must_use]
    pub const fn with_risk_threshold(mut self, threshold: f64) -> Self {
        self.risk_threshold = threshold;
        self
    }

    /// Builder-style: overrides the RPC timeout.
    #[must_use]
    pub const fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Settings for a chain, or `None` when the chain is not configured.
    #[must_use]
    pub fn chain(&self, chain: Chain) -> Option<&ChainSettings> {
        self.chains.get(&chain)
    }

    /// Iterates over all configured chains.
    pub fn chains(&self) -> impl Iterator<Item = (Chain, &ChainSettings)> {
        self.chains.iter().map(|(c, s)| (*c, s))
    }

    /// Number of configured chains.
    #[must_use]
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }
}

impl Default for X402Config {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_dollar_buys_one_hundred_requests() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.requests_for(Decimal::ONE), 100);
    }

    #[test]
    fn allocation_rounds_down() {
        let pricing = PricingConfig::default();
        // 0.019 USDC at 0.01/call buys exactly one call.
        assert_eq!(pricing.requests_for(Decimal::new(19, 3)), 1);
        assert_eq!(pricing.requests_for(Decimal::new(9, 3)), 0);
    }

    #[test]
    fn zero_price_allocates_nothing() {
        let pricing = PricingConfig {
            price_per_call: Decimal::ZERO,
            ..PricingConfig::default()
        };
        assert_eq!(pricing.requests_for(Decimal::ONE_HUNDRED), 0);
    }

    #[test]
    fn chain_lookup() {
        let config = X402Config::default().with_chain(
            Chain::Base,
            ChainSettings {
                rpc_url: "https://mainnet.base.org".into(),
                payment_address: "0xabc".into(),
                usdc_contract: "0xdef".into(),
                required_confirmations: 6,
            },
        );
        assert_eq!(config.chain(Chain::Base).unwrap().required_confirmations, 6);
        assert!(config.chain(Chain::Polygon).is_none());
    }
}
