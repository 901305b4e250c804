//! Gateway configuration.
//!
//! Loads a TOML file with `$VAR` / `${VAR}` environment expansion in string
//! values, then converts it into the immutable core [`X402Config`] injected
//! into the verifier and issuer at startup.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4020
//! admin_key = "$X402_ADMIN_KEY"
//! risk_threshold = 0.5
//!
//! [pricing]
//! price_per_call = "0.01"
//! min_payment = "0.01"
//! token_ttl_secs = 86400
//!
//! [chains.base]
//! rpc_url = "https://mainnet.base.org"
//! payment_address = "$BASE_PAYMENT_ADDRESS"
//! usdc_contract = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
//!
//! [ratelimit]
//! max_requests = 120
//! window_secs = 60
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to the configuration file (default: `config.toml`)
//! - `HOST` / `PORT` — Override the bind address
//! - Any `$VAR` referenced from the file

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use vx402::chain::Chain;
use vx402::config::{
    ChainSettings, DEFAULT_RISK_THRESHOLD, DEFAULT_RPC_TIMEOUT, PricingConfig, X402Config,
};

/// Top-level gateway configuration as read from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4020`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Admin key guarding the stats endpoint. When unset, the endpoint
    /// rejects every caller.
    #[serde(default)]
    pub admin_key: Option<String>,

    /// Risk score above which payments are rejected.
    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: f64,

    /// Bounded timeout for chain RPC calls, in seconds.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// Pricing parameters.
    #[serde(default)]
    pub pricing: PricingSection,

    /// Chain configurations keyed by chain name (`base`, `solana`, ...).
    #[serde(default)]
    pub chains: HashMap<Chain, ChainSection>,

    /// Fixed-window rate limiting for protected routes.
    #[serde(default)]
    pub ratelimit: RateLimitSection,
}

/// `[pricing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSection {
    /// Price of one protected-API call, in USDC.
    pub price_per_call: Decimal,
    /// Smallest accepted payment, in USDC.
    pub min_payment: Decimal,
    /// Access-token lifetime in seconds.
    pub token_ttl_secs: u64,
}

impl Default for PricingSection {
    fn default() -> Self {
        let core = PricingConfig::default();
        Self {
            price_per_call: core.price_per_call,
            min_payment: core.min_payment,
            token_ttl_secs: core.token_ttl_secs,
        }
    }
}

/// One `[chains.<name>]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSection {
    /// HTTP RPC endpoint URL.
    pub rpc_url: String,
    /// Address payments must be sent to on this chain.
    pub payment_address: String,
    /// USDC token contract (EVM) or mint (Solana) address.
    pub usdc_contract: String,
    /// Confirmation threshold; falls back to the chain's default depth.
    #[serde(default)]
    pub confirmations: Option<u64>,
}

/// `[ratelimit]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSection {
    /// Requests allowed per window and caller.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window_secs: 60,
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    4020
}

fn default_risk_threshold() -> f64 {
    DEFAULT_RISK_THRESHOLD
}

fn default_rpc_timeout_secs() -> u64 {
    DEFAULT_RPC_TIMEOUT.as_secs()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_key: None,
            risk_threshold: default_risk_threshold(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            pricing: PricingSection::default(),
            chains: HashMap::new(),
            ratelimit: RateLimitSection::default(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path. A missing file yields
    /// the defaults, so the gateway can boot with env overrides alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("HOST")
            && let Ok(addr) = host.parse()
        {
            config.host = addr;
        }
        if let Ok(port) = std::env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        Ok(config)
    }

    /// RPC timeout as a [`Duration`].
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Converts the file representation into the immutable core config.
    #[must_use]
    pub fn into_core(self) -> X402Config {
        let mut core = X402Config::new(PricingConfig {
            price_per_call: self.pricing.price_per_call,
            min_payment: self.pricing.min_payment,
            token_ttl_secs: self.pricing.token_ttl_secs,
        })
        .with_risk_threshold(self.risk_threshold)
        .with_rpc_timeout(Duration::from_secs(self.rpc_timeout_secs));

        for (chain, section) in self.chains {
            core = core.with_chain(
                chain,
                ChainSettings {
                    rpc_url: section.rpc_url,
                    payment_address: section.payment_address,
                    usdc_contract: section.usdc_contract,
                    required_confirmations: section
                        .confirmations
                        .unwrap_or_else(|| chain.default_confirmations()),
                },
            );
        }
        core
    }
}

/// Expands `$VAR` and `${VAR}` patterns from the process environment.
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 4020);
        assert!(config.chains.is_empty());
        assert_eq!(config.ratelimit.max_requests, 120);
    }

    #[test]
    fn chains_parse_by_name_with_default_confirmations() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [chains.base]
            rpc_url = "https://mainnet.base.org"
            payment_address = "0x742d35Cc6634C0532925a3b8D4B5e3A3A3b7b7b7"
            usdc_contract = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"

            [chains.solana]
            rpc_url = "https://api.mainnet-beta.solana.com"
            payment_address = "9aE476sH92Vz7DMPyq5WLPkrKWivxeuTKEFKd2sZZcde"
            usdc_contract = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
            confirmations = 16
            "#,
        )
        .unwrap();

        let core = config.into_core();
        assert_eq!(core.chain(Chain::Base).unwrap().required_confirmations, 6);
        assert_eq!(
            core.chain(Chain::Solana).unwrap().required_confirmations,
            16
        );
    }

    #[test]
    fn pricing_decimals_parse_from_strings() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [pricing]
            price_per_call = "0.02"
            min_payment = "0.05"
            token_ttl_secs = 3600
            "#,
        )
        .unwrap();
        let core = config.into_core();
        assert_eq!(core.pricing.requests_for(Decimal::ONE), 50);
        assert_eq!(core.pricing.token_ttl_secs, 3600);
    }

    #[test]
    fn env_expansion_handles_both_forms() {
        // Unresolved names survive untouched.
        assert_eq!(
            expand_env_vars("key = \"$VX402_UNSET_VAR\""),
            "key = \"$VX402_UNSET_VAR\""
        );
        assert_eq!(
            expand_env_vars("key = \"${VX402_UNSET_VAR}\""),
            "key = \"${VX402_UNSET_VAR}\""
        );
        // A bare dollar is literal.
        assert_eq!(expand_env_vars("price = \"$\""), "price = \"$\"");
    }
}
