//! Error taxonomy for verification, token lifecycle, and storage.
//!
//! Every error carries a stable machine-readable code (`error_code`) and a
//! retryability flag. The HTTP layer maps codes to status codes; nothing in
//! this crate formats HTTP responses.

use rust_decimal::Decimal;

use crate::chain::{AdapterError, Chain};
use crate::payment::PaymentId;

/// Failures of the payment verification state machine.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The requested chain is not configured.
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    /// The chain RPC was unreachable or timed out. Retry with backoff.
    #[error("chain {chain} unavailable: {reason}")]
    ChainUnavailable {
        /// Chain whose RPC failed.
        chain: Chain,
        /// Transport-level detail.
        reason: String,
    },

    /// The chain has no record of the transaction yet. Retryable.
    #[error("transaction not found on {chain}")]
    TransactionNotFound {
        /// Chain that was queried.
        chain: Chain,
    },

    /// The transaction reverted or errored on-chain. Terminal.
    #[error("transaction failed on {chain}")]
    TransactionFailed {
        /// Chain that was queried.
        chain: Chain,
    },

    /// Not enough confirmations yet. Retryable; re-checked on every call.
    #[error("insufficient confirmations: {current}/{required}")]
    InsufficientConfirmations {
        /// Confirmations observed now.
        current: u64,
        /// Confirmations required for this chain.
        required: u64,
    },

    /// The transfer did not pay the configured payment address. Terminal.
    #[error("transfer recipient {actual} does not match payment address {expected}")]
    InvalidRecipient {
        /// Configured payment address for the chain.
        expected: String,
        /// Recipient observed on-chain (empty when no transfer matched).
        actual: String,
    },

    /// The transfer amount is below the minimum or the expected amount.
    /// Terminal for this transaction.
    #[error("invalid payment amount: {actual} USDC")]
    InvalidPaymentAmount {
        /// Amount observed on-chain.
        actual: Decimal,
        /// Configured minimum payment.
        minimum: Decimal,
        /// Client-supplied expected amount, when given.
        expected: Option<Decimal>,
    },

    /// The `(chain, tx_hash)` pair already funded a verified payment.
    /// Terminal: one transfer can never mint two tokens.
    #[error("payment already used: {tx_hash} on {chain}")]
    PaymentAlreadyUsed {
        /// Chain of the replayed transaction.
        chain: Chain,
        /// The replayed hash.
        tx_hash: String,
        /// Id of the existing verified payment.
        payment_id: PaymentId,
    },

    /// Risk score exceeded the rejection threshold. Terminal business
    /// rejection, not a fault.
    #[error("risk score {score:.2} exceeds threshold {threshold:.2}")]
    HighRiskScore {
        /// Computed score.
        score: f64,
        /// Configured threshold.
        threshold: f64,
    },

    /// The backing store failed. Internal fault.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VerifyError {
    /// Stable machine-readable code for the error payload.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedChain(_) => "UNSUPPORTED_CHAIN",
            Self::ChainUnavailable { .. } => "CHAIN_UNAVAILABLE",
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::TransactionFailed { .. } => "TRANSACTION_FAILED",
            Self::InsufficientConfirmations { .. } => "INSUFFICIENT_CONFIRMATIONS",
            Self::InvalidRecipient { .. } => "INVALID_RECIPIENT",
            Self::InvalidPaymentAmount { .. } => "INVALID_PAYMENT_AMOUNT",
            Self::PaymentAlreadyUsed { .. } => "PAYMENT_ALREADY_USED",
            Self::HighRiskScore { .. } => "HIGH_RISK_SCORE",
            Self::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Returns `true` if the same request may succeed on a later retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChainUnavailable { .. }
                | Self::TransactionNotFound { .. }
                | Self::InsufficientConfirmations { .. }
                | Self::Store(_)
        )
    }

    /// Translates an adapter failure observed on `chain`.
    #[must_use]
    pub fn from_adapter(chain: Chain, err: AdapterError) -> Self {
        match err {
            AdapterError::NotFound | AdapterError::MalformedHash(_) => {
                Self::TransactionNotFound { chain }
            }
            AdapterError::TransactionFailed => Self::TransactionFailed { chain },
            AdapterError::NoTokenTransfer => Self::InvalidRecipient {
                expected: String::new(),
                actual: String::new(),
            },
            AdapterError::Unavailable(reason) => Self::ChainUnavailable { chain, reason },
            AdapterError::Timeout(d) => Self::ChainUnavailable {
                chain,
                reason: format!("timed out after {d:?}"),
            },
        }
    }
}

/// Failures of token issuance and consumption.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// No payment record with the given id.
    #[error("payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// The payment exists but is not in `Verified` state.
    #[error("payment not verified: {0}")]
    PaymentNotVerified(PaymentId),

    /// A token was already minted from this payment.
    #[error("token already issued for payment {0}")]
    TokenAlreadyIssued(PaymentId),

    /// The presented token's hash is unknown.
    #[error("token not found")]
    TokenNotFound,

    /// The token's expiry has passed, regardless of remaining quota.
    #[error("token expired")]
    TokenExpired,

    /// The token's quota is exhausted.
    #[error("no requests remaining")]
    NoRequestsRemaining,

    /// The backing store failed. Internal fault.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TokenError {
    /// Stable machine-readable code for the error payload.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::PaymentNotVerified(_) => "PAYMENT_NOT_VERIFIED",
            Self::TokenAlreadyIssued(_) => "TOKEN_ALREADY_ISSUED",
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::NoRequestsRemaining => "NO_REQUESTS_REMAINING",
            Self::Store(_) => "STORE_UNAVAILABLE",
        }
    }
}

/// Failures of the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A payment for this `(chain, tx_hash)` already exists.
    #[error("payment already recorded for {tx_hash} on {chain}")]
    DuplicatePayment {
        /// Chain of the existing record.
        chain: Chain,
        /// Hash of the existing record.
        tx_hash: String,
        /// Id of the existing record.
        payment_id: PaymentId,
    },

    /// A token already exists for this payment.
    #[error("token already exists for payment {0}")]
    DuplicateToken(PaymentId),

    /// No payment with the given id.
    #[error("no payment with id {0}")]
    PaymentMissing(PaymentId),

    /// No token with the given hash.
    #[error("no such token")]
    TokenMissing,

    /// The store backend is unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
