//! Core types and verification engine for x402 on-chain payments.
//!
//! This crate implements the chain-agnostic half of an HTTP 402 pay-per-call
//! gateway: a client pays USDC on a supported chain, submits the transaction
//! hash for verification, and receives an opaque access token carrying a
//! request quota. Chain-specific transaction lookup is provided by separate
//! crates through the [`chain::ChainAdapter`] trait.
//!
//! # Modules
//!
//! - [`chain`] - Supported chain identifiers and the adapter trait
//! - [`config`] - Immutable pricing and per-chain configuration
//! - [`error`] - Error taxonomy with machine-readable codes
//! - [`payment`] - Payment and access-token records
//! - [`risk`] - Address/transfer risk heuristic
//! - [`store`] - Persistence trait and the in-memory store
//! - [`time`] - Unix timestamp wire type
//! - [`token`] - Token issuance and consumption
//! - [`verify`] - The payment verification state machine

pub mod chain;
pub mod config;
pub mod error;
pub mod payment;
pub mod risk;
pub mod store;
pub mod time;
pub mod token;
pub mod verify;

pub use chain::{Chain, ChainAdapter, TxTransfer};
pub use config::X402Config;
pub use error::{TokenError, VerifyError};
pub use payment::{Payment, PaymentId, PaymentStatus};
pub use store::{MemoryStore, PaymentStore};
pub use time::UnixTimestamp;
pub use token::{TokenIssuer, TokenValidator};
pub use verify::PaymentVerifier;
