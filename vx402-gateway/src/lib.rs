//! HTTP 402 pay-per-call gateway.
//!
//! Wires the verification core to an Axum router: clients pay USDC on a
//! supported chain, verify the transaction through `/x402/verify-payment`,
//! mint an access token, and spend its quota against protected routes guarded
//! by the payment gate.

use std::sync::Arc;
use std::time::Duration;

use vx402::chain::ChainAdapter;
use vx402::config::X402Config;
use vx402::store::MemoryStore;
use vx402::token::{TokenIssuer, TokenValidator};
use vx402::verify::PaymentVerifier;

pub mod config;
pub mod error;
pub mod handlers;
pub mod paygate;
pub mod ratelimit;

pub use config::GatewayConfig;
pub use handlers::gateway_router;

use ratelimit::RateLimiter;

/// Shared application state behind every route.
pub type AppState = Arc<Gateway>;

/// The assembled gateway: verification core plus service-level concerns.
#[derive(Debug)]
pub struct Gateway {
    /// Immutable pricing and chain configuration.
    pub core: Arc<X402Config>,
    /// Admin key for the stats and cleanup endpoints; `None` locks them.
    pub admin_key: Option<String>,
    /// Payment and token records.
    pub store: Arc<MemoryStore>,
    /// The verification state machine.
    pub verifier: PaymentVerifier<MemoryStore>,
    /// Token minting.
    pub issuer: TokenIssuer<MemoryStore>,
    /// Token consumption on the protected hot path.
    pub validator: TokenValidator<MemoryStore>,
    /// Fixed-window limiter for protected routes.
    pub limiter: RateLimiter,
}

impl Gateway {
    /// Assembles a gateway around a fresh in-memory store. Chain adapters
    /// are registered separately via [`Gateway::register_adapter`].
    #[must_use]
    pub fn new(core: X402Config, admin_key: Option<String>, limiter: RateLimiter) -> Self {
        let core = Arc::new(core);
        let store = Arc::new(MemoryStore::new());
        Self {
            verifier: PaymentVerifier::new(Arc::clone(&core), Arc::clone(&store)),
            issuer: TokenIssuer::new(Arc::clone(&core), Arc::clone(&store)),
            validator: TokenValidator::new(Arc::clone(&store)),
            core,
            admin_key,
            store,
            limiter,
        }
    }

    /// Builds a gateway from the loaded file configuration.
    #[must_use]
    pub fn from_config(config: GatewayConfig) -> Self {
        let admin_key = config.admin_key.clone();
        let ratelimit = config.ratelimit;
        Self::new(
            config.into_core(),
            admin_key,
            RateLimiter::new(
                ratelimit.max_requests,
                Duration::from_secs(ratelimit.window_secs),
            ),
        )
    }

    /// Registers the transaction-lookup adapter for one chain.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.verifier.register_adapter(adapter);
    }
}
